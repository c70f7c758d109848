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

//! Builds the blinded output and related signature proof for the block
//! reward.

use crate::consensus::reward;
use crate::core::{KernelFeatures, Output, OutputFeatures, TxKernel};
use crate::keychain::{Identifier, Keychain};
use crate::libtx::error::Error;
use crate::libtx::{aggsig, proof};

/// output a reward output
pub fn output<K>(
	keychain: &K,
	key_id: &Identifier,
	fees: u64,
) -> Result<(Output, TxKernel), Error>
where
	K: Keychain,
{
	let value = reward(fees);
	let commit = keychain.commit(value, key_id)?;

	trace!("Block reward - Pedersen Commit is: {:?}", commit);

	let rproof = proof::create(keychain, value, key_id, commit, None)?;

	let output = Output::new(OutputFeatures::Coinbase, commit, rproof);

	let secp = keychain.secp();
	let over_commit = secp.commit_value(value)?;
	let out_commit = output.commitment();
	let excess = secp.commit_sum(vec![out_commit], vec![over_commit])?;
	let pubkey = excess.to_pubkey(&secp)?;

	let features = KernelFeatures::Coinbase;
	let msg = features.kernel_sig_msg()?;
	let sig = aggsig::sign_from_key_id(&secp, keychain, &msg, key_id, None, Some(&pubkey))?;

	let proof = TxKernel {
		features,
		excess,
		excess_sig: sig,
	};
	Ok((output, proof))
}
