// Copyright 2019 The Lepton Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! libtx specific errors

use crate::core::transaction;
use crate::keychain;
use crate::util::secp;

/// Lib tx error definition
#[derive(Clone, Debug, Eq, Fail, PartialEq)]
pub enum Error {
	/// SECP error
	#[fail(display = "Secp Error: {}", _0)]
	Secp(secp::Error),
	/// Keychain error
	#[fail(display = "Keychain Error: {}", _0)]
	Keychain(keychain::Error),
	/// Transaction error
	#[fail(display = "Transaction Error: {}", _0)]
	Transaction(transaction::Error),
	/// Signature error
	#[fail(display = "Signature Error: {}", _0)]
	Signature(String),
	/// Rangeproof error
	#[fail(display = "Rangeproof Error: {}", _0)]
	RangeProof(String),
	/// Other error
	#[fail(display = "Other Error: {}", _0)]
	Other(String),
}

impl From<secp::Error> for Error {
	fn from(e: secp::Error) -> Error {
		Error::Secp(e)
	}
}

impl From<keychain::Error> for Error {
	fn from(e: keychain::Error) -> Error {
		Error::Keychain(e)
	}
}

impl From<transaction::Error> for Error {
	fn from(e: transaction::Error) -> Error {
		Error::Transaction(e)
	}
}
