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

//! Aggregated Schnorr signatures used in the creation of Lepton transaction
//! kernels. Thin wrappers over the aggsig module of the underlying secp
//! bindings, Musig-style: each party contributes a partial signature over a
//! shared public nonce sum and aggregate public key, the partials are summed
//! into a single 64 byte signature and verified against the aggregate key.

use crate::keychain::{BlindingFactor, Identifier, Keychain};
use crate::libtx::error::Error;
use crate::util::secp::key::{PublicKey, SecretKey};
use crate::util::secp::{self, aggsig, Message, Secp256k1, Signature};

/// Creates a new secure nonce (as a SecretKey), guaranteed to be usable
/// during aggsig creation.
pub fn create_secnonce(secp: &Secp256k1) -> Result<SecretKey, Error> {
	let nonce = aggsig::export_secnonce_single(secp)?;
	Ok(nonce)
}

/// Calculates a partial signature given the signer's secure key,
/// the sum of all public nonces and (optionally) the sum of all public keys.
///
/// The signer's secret nonce must be the one whose public version was added
/// to the `nonce_sum` total; both the nonce sum and the key sum are encoded
/// into the challenge so there is no ordering constraint on who signs first.
pub fn calculate_partial_sig(
	secp: &Secp256k1,
	sec_key: &SecretKey,
	sec_nonce: &SecretKey,
	nonce_sum: &PublicKey,
	pubkey_sum: Option<&PublicKey>,
	msg: &secp::Message,
) -> Result<Signature, Error> {
	//Now calculate signature using message M=fee, nonce in e=nonce_sum
	let sig = aggsig::sign_single(
		secp,
		&msg,
		sec_key,
		Some(sec_nonce),
		None,
		Some(nonce_sum),
		pubkey_sum,
		Some(nonce_sum),
	)?;
	Ok(sig)
}

/// Verifies a partial signature from a public key. All nonce and public
/// key sum values must be identical to those provided in the call to
/// `calculate_partial_sig`.
pub fn verify_partial_sig(
	secp: &Secp256k1,
	sig: &Signature,
	pub_nonce_sum: &PublicKey,
	pubkey: &PublicKey,
	pubkey_sum: Option<&PublicKey>,
	msg: &secp::Message,
) -> Result<(), Error> {
	if !verify_single(
		secp,
		sig,
		&msg,
		Some(&pub_nonce_sum),
		pubkey,
		pubkey_sum,
		true,
	) {
		return Err(Error::Signature(
			"Signature validation error".to_string(),
		));
	}
	Ok(())
}

/// Creates a single-signer aggsig signature from a key id. Generally,
/// this function is used to create transaction kernel signatures for
/// coinbase outputs.
///
/// * `blind_sum` - (optional) the sum of all blinding factors in the
/// transaction; in the case of a coinbase this is simply the corresponding
/// public key of the reward key.
pub fn sign_from_key_id<K>(
	secp: &Secp256k1,
	k: &K,
	msg: &Message,
	key_id: &Identifier,
	s_nonce: Option<&SecretKey>,
	blind_sum: Option<&PublicKey>,
) -> Result<Signature, Error>
where
	K: Keychain,
{
	let skey = k.derive_key(key_id)?;
	let sig = aggsig::sign_single(secp, &msg, &skey, s_nonce, None, None, blind_sum, None)?;
	Ok(sig)
}

/// Simple verification a single signature from a commitment. The public
/// key used to verify the signature is derived from the commit.
pub fn verify_single_from_commit(
	secp: &Secp256k1,
	sig: &Signature,
	msg: &Message,
	commit: &secp::pedersen::Commitment,
) -> Result<(), Error> {
	let pubkey = commit.to_pubkey(secp)?;
	if !verify_single(secp, sig, msg, None, &pubkey, Some(&pubkey), false) {
		return Err(Error::Signature(
			"Signature validation error".to_string(),
		));
	}
	Ok(())
}

/// Verifies a completed (summed) signature, which must be valid when
/// verified against the sum of all public keys of all signers.
pub fn verify_completed_sig(
	secp: &Secp256k1,
	sig: &Signature,
	pubkey: &PublicKey,
	pubkey_sum: Option<&PublicKey>,
	msg: &secp::Message,
) -> Result<(), Error> {
	if !verify_single(secp, sig, msg, None, pubkey, pubkey_sum, true) {
		return Err(Error::Signature(
			"Signature validation error".to_string(),
		));
	}
	Ok(())
}

/// Adds signatures. All partial signatures and the final nonce sum must be
/// consistent with one another or the resulting aggregate will not verify.
pub fn add_signatures(
	secp: &Secp256k1,
	part_sigs: Vec<&Signature>,
	nonce_sum: &PublicKey,
) -> Result<Signature, Error> {
	// Add public nonces kR*G + kS*G
	let sig = aggsig::add_signatures_single(&secp, part_sigs, &nonce_sum)?;
	Ok(sig)
}

/// Just a simple sig, creates its own nonce if not provided.
pub fn sign_single(
	secp: &Secp256k1,
	msg: &Message,
	skey: &SecretKey,
	snonce: Option<&SecretKey>,
	pubkey_sum: Option<&PublicKey>,
) -> Result<Signature, Error> {
	let sig = aggsig::sign_single(secp, &msg, skey, snonce, None, None, pubkey_sum, None)?;
	Ok(sig)
}

/// Creates a kernel signature with an explicit blinding factor.
pub fn sign_with_blinding(
	secp: &Secp256k1,
	msg: &Message,
	blinding: &BlindingFactor,
	pubkey_sum: Option<&PublicKey>,
) -> Result<Signature, Error> {
	let skey = &blinding.secret_key(&secp)?;
	let sig = aggsig::sign_single(secp, &msg, skey, None, None, None, pubkey_sum, None)?;
	Ok(sig)
}

/// Verifies an aggsig signature. Low level wrapper around the raw secp
/// verification.
pub fn verify_single(
	secp: &Secp256k1,
	sig: &Signature,
	msg: &Message,
	pubnonce: Option<&PublicKey>,
	pubkey: &PublicKey,
	pubkey_sum: Option<&PublicKey>,
	is_partial: bool,
) -> bool {
	aggsig::verify_single(
		secp, sig, msg, pubnonce, pubkey, pubkey_sum, None, is_partial,
	)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::util::secp::key::SecretKey;
	use crate::util::secp::{ContextFlag, Secp256k1};
	use rand::thread_rng;

	#[test]
	fn aggsig_sign_verify_partial() {
		let secp = Secp256k1::with_caps(ContextFlag::Full);

		// two parties with their own keys and nonces
		let sk1 = SecretKey::new(&secp, &mut thread_rng());
		let sk2 = SecretKey::new(&secp, &mut thread_rng());
		let nonce1 = create_secnonce(&secp).unwrap();
		let nonce2 = create_secnonce(&secp).unwrap();

		let pk1 = PublicKey::from_secret_key(&secp, &sk1).unwrap();
		let pk2 = PublicKey::from_secret_key(&secp, &sk2).unwrap();
		let pn1 = PublicKey::from_secret_key(&secp, &nonce1).unwrap();
		let pn2 = PublicKey::from_secret_key(&secp, &nonce2).unwrap();

		let nonce_sum = PublicKey::from_combination(&secp, vec![&pn1, &pn2]).unwrap();
		let key_sum = PublicKey::from_combination(&secp, vec![&pk1, &pk2]).unwrap();

		let msg = Message::from_slice(&[1u8; 32]).unwrap();

		// each party computes a partial over the shared nonce and key sums,
		// in no particular order
		let part2 = calculate_partial_sig(&secp, &sk2, &nonce2, &nonce_sum, Some(&key_sum), &msg)
			.unwrap();
		let part1 = calculate_partial_sig(&secp, &sk1, &nonce1, &nonce_sum, Some(&key_sum), &msg)
			.unwrap();

		// partials verify individually
		verify_partial_sig(&secp, &part1, &nonce_sum, &pk1, Some(&key_sum), &msg).unwrap();
		verify_partial_sig(&secp, &part2, &nonce_sum, &pk2, Some(&key_sum), &msg).unwrap();

		// and aggregate into a single signature valid under the key sum
		let sig = add_signatures(&secp, vec![&part1, &part2], &nonce_sum).unwrap();
		verify_completed_sig(&secp, &sig, &key_sum, Some(&key_sum), &msg).unwrap();

		// the aggregate does not verify against a different message
		let msg2 = Message::from_slice(&[2u8; 32]).unwrap();
		assert!(verify_completed_sig(&secp, &sig, &key_sum, Some(&key_sum), &msg2).is_err());
	}
}
