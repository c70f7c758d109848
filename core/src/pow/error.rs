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

//! Cuckoo-cycle proof of work errors

use crate::ser;
use std::io;

/// Cuckoo-cycle proof of work errors.
#[derive(Debug, Fail)]
pub enum Error {
	/// Verification error
	#[fail(display = "Verification error: {}", _0)]
	Verification(String),
	/// Failure to cast edge or node usize
	#[fail(display = "Edge addition error")]
	EdgeAddition,
	/// Invalid edge_bits for the given proof of work variant
	#[fail(display = "Invalid edge bits: {}", _0)]
	InvalidEdgeBits(u8),
	/// IO Error
	#[fail(display = "PoW IO error")]
	IOError,
	/// Serialization error
	#[fail(display = "Serialization error: {}", _0)]
	Serialization(ser::Error),
}

impl From<io::Error> for Error {
	fn from(_e: io::Error) -> Error {
		Error::IOError
	}
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::Serialization(e)
	}
}
