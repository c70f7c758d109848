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

//! Deterministic hierarchical key derivation in the style of BIP32,
//! reduced to the hardened-only derivation the node and tests need.

use byteorder::{BigEndian, ByteOrder};
use hmac::{Hmac, Mac};
use sha2::Sha512;

use blake2_rfc::blake2b::blake2b;
use rand::{thread_rng, Rng};

use crate::types::{BlindSum, BlindingFactor, Error, ExtKeychainPath, Identifier, Keychain};
use crate::util::secp::key::{PublicKey, SecretKey};
use crate::util::secp::pedersen::Commitment;
use crate::util::secp::{self, Message, Secp256k1, Signature};

/// Master key material: secret scalar plus a chain code extending it.
#[derive(Clone)]
struct ExtendedKey {
	secret_key: SecretKey,
	chain_code: [u8; 32],
}

impl ExtendedKey {
	/// Derive master key material from a seed.
	fn from_seed(secp: &Secp256k1, seed: &[u8]) -> Result<ExtendedKey, Error> {
		let (il, ir) = hmac_sha512(b"Lepton seed", seed)?;
		let secret_key = SecretKey::from_slice(secp, &il)
			.map_err(|_| Error::KeyDerivation("seed produced invalid master key".to_owned()))?;
		Ok(ExtendedKey {
			secret_key,
			chain_code: ir,
		})
	}

	/// Derive a hardened child of this key.
	fn child(&self, secp: &Secp256k1, index: u32) -> Result<ExtendedKey, Error> {
		let mut data = [0u8; 36];
		data[0..32].copy_from_slice(self.secret_key.as_ref());
		BigEndian::write_u32(&mut data[32..36], index);

		let (il, ir) = hmac_sha512(&self.chain_code, &data)?;

		let mut secret_key = SecretKey::from_slice(secp, &il)
			.map_err(|_| Error::KeyDerivation("child key out of range".to_owned()))?;
		secret_key
			.add_assign(secp, &self.secret_key)
			.map_err(Error::Secp)?;

		Ok(ExtendedKey {
			secret_key,
			chain_code: ir,
		})
	}
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> Result<([u8; 32], [u8; 32]), Error> {
	let mut hmac = Hmac::<Sha512>::new_varkey(key)
		.map_err(|_| Error::KeyDerivation("invalid hmac key length".to_owned()))?;
	hmac.input(data);
	let result = hmac.result().code();
	let mut il = [0u8; 32];
	let mut ir = [0u8; 32];
	il.copy_from_slice(&result[0..32]);
	ir.copy_from_slice(&result[32..64]);
	Ok((il, ir))
}

/// The default, deterministic keychain. All keys are derived from the
/// master seed through the path encoded in each Identifier, so holding
/// the seed is enough to re-derive every key ever handed out.
#[derive(Clone)]
pub struct ExtKeychain {
	secp: Secp256k1,
	master: ExtendedKey,
}

impl Keychain for ExtKeychain {
	fn from_seed(seed: &[u8]) -> Result<ExtKeychain, Error> {
		let secp = Secp256k1::with_caps(secp::ContextFlag::Commit);
		let master = ExtendedKey::from_seed(&secp, seed)?;
		Ok(ExtKeychain { secp, master })
	}

	fn from_random_seed() -> Result<ExtKeychain, Error> {
		let seed: [u8; 32] = thread_rng().gen();
		let seed = blake2b(32, &[], &seed[..]);
		ExtKeychain::from_seed(seed.as_bytes())
	}

	fn root_key_id() -> Identifier {
		Identifier::from_path(&ExtKeychainPath::new(0, 0, 0, 0, 0))
	}

	fn derive_key_id(depth: u8, d0: u32, d1: u32, d2: u32, d3: u32) -> Identifier {
		Identifier::from_path(&ExtKeychainPath::new(depth, d0, d1, d2, d3))
	}

	fn derive_key(&self, key_id: &Identifier) -> Result<SecretKey, Error> {
		let path = key_id.to_path();
		let mut key = self.master.clone();
		for i in 0..usize::from(path.depth) {
			key = key.child(&self.secp, path.path[i])?;
		}
		Ok(key.secret_key)
	}

	fn commit(&self, amount: u64, key_id: &Identifier) -> Result<Commitment, Error> {
		let key = self.derive_key(key_id)?;
		let commit = self.secp.commit(amount, key)?;
		Ok(commit)
	}

	fn blind_sum(&self, blind_sum: &BlindSum) -> Result<BlindingFactor, Error> {
		let mut pos_keys: Vec<SecretKey> = blind_sum
			.positive_key_ids
			.iter()
			.filter_map(|k| self.derive_key(k).ok())
			.collect();

		let mut neg_keys: Vec<SecretKey> = blind_sum
			.negative_key_ids
			.iter()
			.filter_map(|k| self.derive_key(k).ok())
			.collect();

		pos_keys.extend(
			blind_sum
				.positive_blinding_factors
				.iter()
				.filter_map(|b| b.secret_key(&self.secp).ok()),
		);

		neg_keys.extend(
			blind_sum
				.negative_blinding_factors
				.iter()
				.filter_map(|b| b.secret_key(&self.secp).ok()),
		);

		let sum = self.secp.blind_sum(pos_keys, neg_keys)?;
		Ok(BlindingFactor::from_secret_key(sum))
	}

	fn create_nonce(&self, commit: &Commitment) -> Result<SecretKey, Error> {
		// The rewind nonce is a deterministic function of the master key and
		// the commitment so the wallet can recognize its own outputs later.
		let res = blake2b(32, self.master.secret_key.as_ref(), &commit.0);
		SecretKey::from_slice(&self.secp, res.as_bytes())
			.map_err(|_| Error::KeyDerivation("rewind nonce out of range".to_owned()))
	}

	fn sign(&self, msg: &Message, key_id: &Identifier) -> Result<Signature, Error> {
		let skey = self.derive_key(key_id)?;
		let sig = self.secp.sign(msg, &skey)?;
		Ok(sig)
	}

	fn sign_with_blinding(
		&self,
		msg: &Message,
		blinding: &BlindingFactor,
	) -> Result<Signature, Error> {
		let skey = &blinding.secret_key(&self.secp)?;
		let sig = self.secp.sign(msg, &skey)?;
		Ok(sig)
	}

	fn public_key(&self, key_id: &Identifier) -> Result<PublicKey, Error> {
		let skey = self.derive_key(key_id)?;
		let pubkey = PublicKey::from_secret_key(&self.secp, &skey)?;
		Ok(pubkey)
	}

	fn secp(&self) -> &Secp256k1 {
		&self.secp
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn derivation_is_deterministic() {
		let k1 = ExtKeychain::from_seed(&[0u8; 32]).unwrap();
		let k2 = ExtKeychain::from_seed(&[0u8; 32]).unwrap();

		let id = ExtKeychain::derive_key_id(2, 4, 7, 0, 0);
		assert_eq!(k1.derive_key(&id).unwrap(), k2.derive_key(&id).unwrap());

		// different paths give different keys
		let other = ExtKeychain::derive_key_id(2, 4, 8, 0, 0);
		assert_ne!(k1.derive_key(&id).unwrap(), k1.derive_key(&other).unwrap());
	}

	#[test]
	fn commit_sums_to_zero() {
		// two commitments to the same value under the same key are identical
		let keychain = ExtKeychain::from_random_seed().unwrap();
		let id = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
		let c1 = keychain.commit(1000, &id).unwrap();
		let c2 = keychain.commit(1000, &id).unwrap();
		assert_eq!(c1, c2);
	}
}
