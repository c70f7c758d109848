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

//! The Keychain trait and its main supporting types. The Identifier is a
//! semi-opaque structure (a derivation path, really) used to track keys
//! within the Keychain. BlindingFactor is a useful wrapper around a
//! private key to help with commitment generation.

use std::cmp::min;
use std::io::Cursor;
use std::{error, fmt};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use serde::{de, ser};

use crate::util;
use crate::util::secp::constants::SECRET_KEY_SIZE;
use crate::util::secp::key::{PublicKey, SecretKey, ZERO_KEY};
use crate::util::secp::pedersen::Commitment;
use crate::util::secp::{self, Message, Secp256k1, Signature};

/// Size of an identifier in bytes: depth byte plus four path components.
pub const IDENTIFIER_SIZE: usize = 17;

/// Errors thrown by key derivation and blinding factor handling.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Error {
	/// Underlying secp256k1 error.
	Secp(secp::Error),
	/// Could not derive a child key.
	KeyDerivation(String),
	/// Generic error with enough context to debug.
	Generic(String),
}

impl From<secp::Error> for Error {
	fn from(e: secp::Error) -> Error {
		Error::Secp(e)
	}
}

impl error::Error for Error {}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match *self {
			Error::Secp(ref e) => write!(f, "secp error: {:?}", e),
			Error::KeyDerivation(ref s) => write!(f, "key derivation error: {}", s),
			Error::Generic(ref s) => write!(f, "keychain error: {}", s),
		}
	}
}

/// A semi-opaque identifier for a key: one depth byte followed by four
/// 32-bit path components, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Ord, Hash, PartialOrd)]
pub struct Identifier([u8; IDENTIFIER_SIZE]);

impl ser::Serialize for Identifier {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: ser::Serializer,
	{
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> de::Deserialize<'de> for Identifier {
	fn deserialize<D>(deserializer: D) -> Result<Identifier, D::Error>
	where
		D: de::Deserializer<'de>,
	{
		deserializer.deserialize_str(IdentifierVisitor)
	}
}

struct IdentifierVisitor;

impl<'de> de::Visitor<'de> for IdentifierVisitor {
	type Value = Identifier;

	fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
		formatter.write_str("an identifier")
	}

	fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
	where
		E: de::Error,
	{
		Identifier::from_hex(s).map_err(|e| de::Error::custom(format!("{}", e)))
	}
}

impl Identifier {
	/// The all-zero identifier (root).
	pub fn zero() -> Identifier {
		Identifier([0; IDENTIFIER_SIZE])
	}

	/// Build an identifier from a derivation path.
	pub fn from_path(path: &ExtKeychainPath) -> Identifier {
		let mut bytes = [0; IDENTIFIER_SIZE];
		bytes[0] = path.depth;
		BigEndian::write_u32(&mut bytes[1..5], path.path[0]);
		BigEndian::write_u32(&mut bytes[5..9], path.path[1]);
		BigEndian::write_u32(&mut bytes[9..13], path.path[2]);
		BigEndian::write_u32(&mut bytes[13..17], path.path[3]);
		Identifier(bytes)
	}

	/// Recover the derivation path from the identifier bytes.
	pub fn to_path(&self) -> ExtKeychainPath {
		let mut rdr = Cursor::new(self.0[1..].to_vec());
		ExtKeychainPath {
			depth: self.0[0],
			path: [
				rdr.read_u32::<BigEndian>().unwrap_or(0),
				rdr.read_u32::<BigEndian>().unwrap_or(0),
				rdr.read_u32::<BigEndian>().unwrap_or(0),
				rdr.read_u32::<BigEndian>().unwrap_or(0),
			],
		}
	}

	/// Build an identifier from raw bytes (truncating or zero-padding).
	pub fn from_bytes(bytes: &[u8]) -> Identifier {
		let mut identifier = [0; IDENTIFIER_SIZE];
		for i in 0..min(IDENTIFIER_SIZE, bytes.len()) {
			identifier[i] = bytes[i];
		}
		Identifier(identifier)
	}

	/// The raw identifier bytes.
	pub fn to_bytes(&self) -> [u8; IDENTIFIER_SIZE] {
		self.0
	}

	/// Parse an identifier from its hex representation.
	pub fn from_hex(hex: &str) -> Result<Identifier, Error> {
		let bytes = util::from_hex(hex.to_string()).map_err(Error::Generic)?;
		Ok(Identifier::from_bytes(&bytes))
	}

	/// Hex representation of the identifier.
	pub fn to_hex(&self) -> String {
		util::to_hex(self.0.to_vec())
	}
}

impl AsRef<[u8]> for Identifier {
	fn as_ref(&self) -> &[u8] {
		self.0.as_ref()
	}
}

impl fmt::Debug for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}({})", stringify!(Identifier), self.to_hex())
	}
}

impl fmt::Display for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

/// A BIP32-ish derivation path: depth plus four path components.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtKeychainPath {
	/// Depth of the path (how many of the components are meaningful).
	pub depth: u8,
	/// Path components.
	pub path: [u32; 4],
}

impl ExtKeychainPath {
	/// Build a path from its components.
	pub fn new(depth: u8, d0: u32, d1: u32, d2: u32, d3: u32) -> ExtKeychainPath {
		ExtKeychainPath {
			depth,
			path: [d0, d1, d2, d3],
		}
	}
}

/// A 32-byte scalar used to blind Pedersen commitments. Unlike a
/// SecretKey it may legitimately be zero (e.g. an empty kernel offset).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindingFactor([u8; SECRET_KEY_SIZE]);

impl fmt::Debug for BlindingFactor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl AsRef<[u8]> for BlindingFactor {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl BlindingFactor {
	/// Wrap a secret key as a blinding factor.
	pub fn from_secret_key(skey: SecretKey) -> BlindingFactor {
		BlindingFactor::from_slice(skey.as_ref())
	}

	/// Build a blinding factor from raw bytes.
	pub fn from_slice(data: &[u8]) -> BlindingFactor {
		let mut blind = [0; SECRET_KEY_SIZE];
		for i in 0..min(SECRET_KEY_SIZE, data.len()) {
			blind[i] = data[i];
		}
		BlindingFactor(blind)
	}

	/// The zero blinding factor. Not a valid secret key but a valid
	/// blinding factor.
	pub fn zero() -> BlindingFactor {
		BlindingFactor::from_secret_key(ZERO_KEY)
	}

	/// Hex representation.
	pub fn to_hex(&self) -> String {
		util::to_hex(self.0.to_vec())
	}

	/// Parse a blinding factor from hex.
	pub fn from_hex(hex: &str) -> Result<BlindingFactor, Error> {
		let bytes = util::from_hex(hex.to_string()).map_err(Error::Generic)?;
		Ok(BlindingFactor::from_slice(&bytes))
	}

	/// Convert to a secret key. The zero blinding factor maps to the zero
	/// key, which the secp lib would otherwise reject.
	pub fn secret_key(&self, secp: &Secp256k1) -> Result<SecretKey, Error> {
		if *self == BlindingFactor::zero() {
			Ok(ZERO_KEY)
		} else {
			SecretKey::from_slice(secp, &self.0).map_err(Error::Secp)
		}
	}

	/// Split this blinding factor into two random summands. One half signs
	/// the tx kernel, the other becomes the transaction offset carried in
	/// the header aggregate, which is what stops an observer re-pairing
	/// kernels with their inputs and outputs.
	pub fn split<R: rand::Rng>(
		&self,
		secp: &Secp256k1,
		rng: &mut R,
	) -> Result<(BlindingFactor, BlindingFactor), Error> {
		let skey_1 = SecretKey::new(secp, rng);
		let skey = self.secret_key(secp)?;
		let skey_2 = secp.blind_sum(vec![skey], vec![skey_1.clone()])?;
		Ok((
			BlindingFactor::from_secret_key(skey_1),
			BlindingFactor::from_secret_key(skey_2),
		))
	}
}

/// Accumulator to compute the sum of blinding factors. Keeps track of
/// each factor as well as the "sign" with which they should be combined.
#[derive(Clone, Debug, PartialEq)]
pub struct BlindSum {
	/// Identifiers of keys to be added to the sum.
	pub positive_key_ids: Vec<Identifier>,
	/// Identifiers of keys to be subtracted from the sum.
	pub negative_key_ids: Vec<Identifier>,
	/// Raw blinding factors to add.
	pub positive_blinding_factors: Vec<BlindingFactor>,
	/// Raw blinding factors to subtract.
	pub negative_blinding_factors: Vec<BlindingFactor>,
}

impl BlindSum {
	/// Creates a new blinding factor sum.
	pub fn new() -> BlindSum {
		BlindSum {
			positive_key_ids: vec![],
			negative_key_ids: vec![],
			positive_blinding_factors: vec![],
			negative_blinding_factors: vec![],
		}
	}

	/// Adds the key with the provided identifier to the sum.
	pub fn add_key_id(mut self, key_id: Identifier) -> BlindSum {
		self.positive_key_ids.push(key_id);
		self
	}

	/// Subtracts the key with the provided identifier from the sum.
	pub fn sub_key_id(mut self, key_id: Identifier) -> BlindSum {
		self.negative_key_ids.push(key_id);
		self
	}

	/// Adds the provided factor to the sum of blinding factors.
	pub fn add_blinding_factor(mut self, blind: BlindingFactor) -> BlindSum {
		self.positive_blinding_factors.push(blind);
		self
	}

	/// Subtracts the provided factor from the sum of blinding factors.
	pub fn sub_blinding_factor(mut self, blind: BlindingFactor) -> BlindSum {
		self.negative_blinding_factors.push(blind);
		self
	}
}

/// Generic signing and key derivation capability, implemented by the
/// deterministic ExtKeychain and mockable for tests.
pub trait Keychain: Sync + Send + Clone {
	/// Construct from a seed.
	fn from_seed(seed: &[u8]) -> Result<Self, Error>;
	/// Construct from a random seed, mostly for tests.
	fn from_random_seed() -> Result<Self, Error>;
	/// Root identifier for this keychain.
	fn root_key_id() -> Identifier;
	/// Identifier for a derivation path.
	fn derive_key_id(depth: u8, d0: u32, d1: u32, d2: u32, d3: u32) -> Identifier;
	/// Derive the secret key for the identifier's path.
	fn derive_key(&self, key_id: &Identifier) -> Result<SecretKey, Error>;
	/// Pedersen commitment to the amount under the identified key.
	fn commit(&self, amount: u64, key_id: &Identifier) -> Result<Commitment, Error>;
	/// Resolve the accumulated blinding sum to a single factor.
	fn blind_sum(&self, blind_sum: &BlindSum) -> Result<BlindingFactor, Error>;
	/// Deterministic nonce for rangeproof rewinding, bound to the commitment.
	fn create_nonce(&self, commit: &Commitment) -> Result<SecretKey, Error>;
	/// Schnorr signature under the identified key.
	fn sign(&self, msg: &Message, key_id: &Identifier) -> Result<Signature, Error>;
	/// Schnorr signature under an explicit blinding factor.
	fn sign_with_blinding(&self, msg: &Message, blinding: &BlindingFactor)
		-> Result<Signature, Error>;
	/// Public key of the identified key.
	fn public_key(&self, key_id: &Identifier) -> Result<PublicKey, Error>;
	/// The secp context this keychain signs with.
	fn secp(&self) -> &Secp256k1;
}

#[cfg(test)]
mod test {
	use rand::thread_rng;

	use crate::types::{BlindingFactor, ExtKeychainPath, Identifier};
	use crate::util::secp::key::{SecretKey, ZERO_KEY};
	use crate::util::secp::Secp256k1;

	#[test]
	fn split_blinding_factor() {
		let secp = Secp256k1::new();
		let skey_in = SecretKey::new(&secp, &mut thread_rng());
		let blind = BlindingFactor::from_secret_key(skey_in.clone());
		let (blind_1, blind_2) = blind.split(&secp, &mut thread_rng()).unwrap();

		// split a key, sum the split keys and confirm the sum matches the
		// original key
		let mut skey_sum = blind_1.secret_key(&secp).unwrap();
		let skey_2 = blind_2.secret_key(&secp).unwrap();
		skey_sum.add_assign(&secp, &skey_2).unwrap();
		assert_eq!(skey_in, skey_sum);
	}

	// Sanity check that we can add the zero key to a secret key and it is
	// still the same key that we started with (k + 0 = k)
	#[test]
	fn zero_key_addition() {
		let secp = Secp256k1::new();
		let skey_in = SecretKey::new(&secp, &mut thread_rng());
		let skey_zero = ZERO_KEY;

		let mut skey_out = skey_in.clone();
		skey_out.add_assign(&secp, &skey_zero).unwrap();

		assert_eq!(skey_in, skey_out);
	}

	#[test]
	fn identifier_path_round_trip() {
		let path = ExtKeychainPath::new(3, 1, 2, 3, 0);
		let id = Identifier::from_path(&path);
		assert_eq!(id.to_path(), path);
		let id2 = Identifier::from_hex(&id.to_hex()).unwrap();
		assert_eq!(id, id2);
	}
}
