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

//! Rangeproof library functions. The node side only ever batch-verifies
//! proofs; creation and rewinding are the wallet's side of the same coin and
//! share the deterministic rewind nonce scheme with it.

use crate::keychain::{Identifier, Keychain};
use crate::libtx::error::Error;
use crate::util::secp::pedersen::{Commitment, ProofMessage, RangeProof};
use crate::util::secp::{self, Secp256k1};

/// Create a bulletproof for the given amount under the key identified by
/// key_id. The rewind nonce is derived from the keychain and the commitment
/// so the owning wallet can later recognize and rewind the proof; the
/// identifier path rides along in the proof message.
pub fn create<K>(
	k: &K,
	amount: u64,
	key_id: &Identifier,
	_commit: Commitment,
	extra_data: Option<Vec<u8>>,
) -> Result<RangeProof, Error>
where
	K: Keychain,
{
	let commit = k.commit(amount, key_id)?;
	let skey = k.derive_key(key_id)?;
	let nonce = k.create_nonce(&commit)?;
	let message = ProofMessage::from_bytes(&key_id.to_bytes());
	Ok(k.secp()
		.bullet_proof(amount, skey, nonce.clone(), nonce, extra_data, Some(message)))
}

/// Verify a single proof (used in tests; consensus code always verifies in
/// batch via Output::batch_verify_proofs).
pub fn verify(
	secp: &Secp256k1,
	commit: Commitment,
	proof: RangeProof,
	extra_data: Option<Vec<u8>>,
) -> Result<(), secp::Error> {
	let result = secp.verify_bullet_proof(commit, proof, extra_data);
	match result {
		Ok(_) => Ok(()),
		Err(e) => Err(e),
	}
}

/// Attempt to rewind a rangeproof with the nonce derived from our keychain
/// and the commitment. Returns the value and identifier committed to if the
/// proof is ours, None otherwise.
pub fn rewind<K>(
	k: &K,
	commit: Commitment,
	extra_data: Option<Vec<u8>>,
	proof: RangeProof,
) -> Result<Option<(u64, Identifier)>, Error>
where
	K: Keychain,
{
	let nonce = k.create_nonce(&commit)?;
	let info = k.secp().rewind_bullet_proof(commit, nonce, extra_data, proof);
	if info.is_err() {
		return Ok(None);
	}
	let info = info.unwrap();

	let amount = info.value;
	let key_id = Identifier::from_bytes(&info.message.as_bytes());

	// Check this proof was really created under the recovered key. A proof
	// someone else created with our nonce would fail this.
	let commit_check = k.commit(amount, &key_id)?;
	if commit == commit_check {
		Ok(Some((amount, key_id)))
	} else {
		Ok(None)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::keychain::{ExtKeychain, Keychain};

	#[test]
	fn create_verify_rewind() {
		let keychain = ExtKeychain::from_random_seed().unwrap();
		let key_id = ExtKeychain::derive_key_id(1, 7, 0, 0, 0);
		let commit = keychain.commit(5, &key_id).unwrap();
		let proof = create(&keychain, 5, &key_id, commit, None).unwrap();

		assert!(verify(keychain.secp(), commit, proof, None).is_ok());

		// rewinding with the owning keychain recovers amount and key id
		let rewound = rewind(&keychain, commit, None, proof).unwrap();
		assert_eq!(rewound, Some((5, key_id)));

		// another keychain cannot rewind the proof
		let other = ExtKeychain::from_random_seed().unwrap();
		let rewound = rewind(&other, commit, None, proof).unwrap();
		assert_eq!(rewound, None);
	}
}
