// Copyright 2020 The Lepton Developers
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

//! Merkle Proofs

use crate::core::hash::Hash;
use crate::core::pmmr;
use crate::ser;
use crate::ser::{PMMRIndexHashable, Readable, Reader, Writeable, Writer};
use crate::util;

/// Merkle proof errors.
#[derive(Clone, Debug, PartialEq)]
pub enum MerkleProofError {
	/// Merkle proof root mismatch
	RootMismatch,
	/// Malformed proof
	MalformedProof,
}

/// A Merkle proof that a given element sits at a given position in the MMR.
/// Carries the sibling hashes from the element up to its peak, followed by
/// every other peak of the MMR in left to right order. Verification
/// reconstructs the peak from the path, slots it back among the other peaks
/// and re-bags them into the root.
#[derive(Clone, Debug, PartialEq, Eq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MerkleProof {
	/// The size of the MMR at the time the proof was created.
	pub mmr_size: u64,
	/// The sibling path from the leaf up to the final sibling hashing to the
	/// peak of the MMR.
	pub path: Vec<Hash>,
	/// All the other peaks of the MMR, in left to right order.
	pub peaks: Vec<Hash>,
}

impl Writeable for MerkleProof {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.mmr_size)?;
		writer.write_u64(self.path.len() as u64)?;
		self.path.write(writer)?;
		writer.write_u64(self.peaks.len() as u64)?;
		self.peaks.write(writer)?;
		Ok(())
	}
}

impl Readable for MerkleProof {
	fn read(reader: &mut dyn Reader) -> Result<MerkleProof, ser::Error> {
		let mmr_size = reader.read_u64()?;
		let path_len = reader.read_u64()?;
		let path = ser::read_multi(reader, path_len)?;
		let peaks_len = reader.read_u64()?;
		let peaks = ser::read_multi(reader, peaks_len)?;
		Ok(MerkleProof {
			mmr_size,
			path,
			peaks,
		})
	}
}

impl Default for MerkleProof {
	fn default() -> MerkleProof {
		MerkleProof::empty()
	}
}

impl MerkleProof {
	/// The "empty" Merkle proof.
	pub fn empty() -> MerkleProof {
		MerkleProof {
			mmr_size: 0,
			path: Vec::default(),
			peaks: Vec::default(),
		}
	}

	/// Serialize the Merkle proof as a hex string (for api json endpoints)
	pub fn to_hex(&self) -> String {
		let mut vec = Vec::new();
		ser::serialize(&mut vec, &self).expect("serialization failed");
		util::to_hex(vec)
	}

	/// Convert hex string representation back to a Merkle proof instance
	pub fn from_hex(hex: &str) -> Result<MerkleProof, String> {
		let bytes = util::from_hex(hex.to_string()).unwrap();
		let res = ser::deserialize(&mut &bytes[..])
			.map_err(|_| "failed to deserialize a Merkle Proof".to_string())?;
		Ok(res)
	}

	/// Verifies the Merkle proof against the provided root hash, element and
	/// position in the MMR.
	pub fn verify<T: PMMRIndexHashable>(
		&self,
		root: Hash,
		element: &T,
		node_pos: u64,
	) -> Result<(), MerkleProofError> {
		let peaks_pos = pmmr::peaks(self.mmr_size);
		if peaks_pos.is_empty() {
			return Err(MerkleProofError::MalformedProof);
		}

		// First follow the path from the leaf up to its peak,
		// deriving the left/right position of each sibling from the
		// positions in the family branch.
		let branch = pmmr::family_branch(node_pos, self.mmr_size);
		if branch.len() != self.path.len() {
			return Err(MerkleProofError::MalformedProof);
		}

		let mut current_hash = element.hash_with_index(node_pos);
		let mut current_pos = node_pos;
		for (sibling, &(parent_pos, sibling_pos)) in self.path.iter().zip(branch.iter()) {
			current_hash = if pmmr::is_left_sibling(sibling_pos) {
				(*sibling, current_hash).hash_with_index(parent_pos)
			} else {
				(current_hash, *sibling).hash_with_index(parent_pos)
			};
			current_pos = parent_pos;
		}

		// The final position must be one of the MMR peaks.
		let peak_idx = match peaks_pos.iter().position(|&x| x == current_pos) {
			Some(idx) => idx,
			None => return Err(MerkleProofError::MalformedProof),
		};

		if self.peaks.len() + 1 != peaks_pos.len() {
			return Err(MerkleProofError::MalformedProof);
		}

		// Slot our reconstructed peak in among the others and re-bag.
		let mut all_peaks = self.peaks.clone();
		all_peaks.insert(peak_idx, current_hash);

		if pmmr::bag_the_peaks(self.mmr_size, &all_peaks) == root {
			Ok(())
		} else {
			Err(MerkleProofError::RootMismatch)
		}
	}
}
