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

//! Readonly view of a PMMR.

use std::marker;

use crate::core::hash::{Hash, ZERO_HASH};
use crate::core::merkle_proof::MerkleProof;
use crate::core::pmmr::pmmr::{
	bag_the_peaks, family_branch, insertion_to_pmmr_index, is_leaf, peaks,
};
use crate::core::pmmr::Backend;
use crate::ser::{PMMRIndexHashable, PMMRable};

/// Readonly view of a PMMR.
pub struct ReadonlyPMMR<'a, T, B>
where
	T: PMMRable,
	B: Backend<T>,
{
	/// The size of the PMMR
	size: u64,
	/// The backend for this readonly PMMR
	backend: &'a B,
	// only needed to parameterise Backend
	_marker: marker::PhantomData<T>,
}

impl<'a, T, B> ReadonlyPMMR<'a, T, B>
where
	T: PMMRable,
	B: 'a + Backend<T>,
{
	/// Build a new readonly PMMR pre-initialized to
	/// size with the provided backend.
	pub fn at(backend: &'a B, size: u64) -> ReadonlyPMMR<'_, T, B> {
		ReadonlyPMMR {
			backend,
			size,
			_marker: marker::PhantomData,
		}
	}

	/// Is the MMR empty?
	pub fn is_empty(&self) -> bool {
		self.size == 0
	}

	/// Total size of the tree, including intermediary nodes and ignoring any
	/// pruning.
	pub fn unpruned_size(&self) -> u64 {
		self.size
	}

	/// Get the hash at provided position in the MMR.
	pub fn get_hash(&self, pos: u64) -> Option<Hash> {
		if pos >= self.size {
			None
		} else if is_leaf(pos) {
			self.backend.get_hash(pos)
		} else {
			self.backend.get_from_file(pos)
		}
	}

	/// Get the data element at provided position in the MMR.
	pub fn get_data(&self, pos: u64) -> Option<T::E> {
		if pos >= self.size {
			None
		} else if is_leaf(pos) {
			self.backend.get_data(pos)
		} else {
			None
		}
	}

	/// Get the hash from the underlying MMR file (ignores the spent flag).
	pub fn get_from_file(&self, pos: u64) -> Option<Hash> {
		if pos >= self.size {
			None
		} else {
			self.backend.get_from_file(pos)
		}
	}

	/// Get the data from the underlying MMR file (ignores the spent flag).
	pub fn get_data_from_file(&self, pos: u64) -> Option<T::E> {
		if pos >= self.size {
			None
		} else {
			self.backend.get_data_from_file(pos)
		}
	}

	/// Iterator over current (unspent, unpruned) leaf positions.
	pub fn leaf_pos_iter(&self) -> Box<dyn Iterator<Item = u64> + '_> {
		self.backend.leaf_pos_iter()
	}

	/// Number of leaves in the leaf set.
	pub fn n_unpruned_leaves(&self) -> u64 {
		self.backend.n_unpruned_leaves()
	}

	/// Returns a vec of the peaks of this MMR.
	pub fn peaks(&self) -> Vec<Hash> {
		peaks(self.size)
			.into_iter()
			.filter_map(|pi| self.backend.get_from_file(pi))
			.collect()
	}

	/// Computes the root of the MMR by bagging the peaks.
	pub fn root(&self) -> Result<Hash, String> {
		if self.is_empty() {
			return Ok(ZERO_HASH);
		}
		let peak_hashes = self.peaks();
		if peak_hashes.len() != peaks(self.size).len() {
			return Err("missing peaks, invalid tree".to_owned());
		}
		Ok(bag_the_peaks(self.size, &peak_hashes))
	}

	/// Build a Merkle proof for the element at the given position.
	pub fn merkle_proof(&self, pos: u64) -> Result<MerkleProof, String> {
		debug!("merkle_proof: pos {}, size {}", pos, self.size);

		// check this pos is actually a leaf in the MMR
		if !is_leaf(pos) {
			return Err(format!("not a leaf at pos {}", pos));
		}

		// check we actually have a hash in the MMR at this pos
		self.get_from_file(pos)
			.ok_or_else(|| format!("no element at pos {}", pos))?;

		let family_branch = family_branch(pos, self.size);

		let path = family_branch
			.iter()
			.map(|x| {
				self.get_from_file(x.1)
					.ok_or_else(|| format!("missing sibling at pos {}", x.1))
			})
			.collect::<Result<Vec<_>, _>>()?;

		let peak_pos = match family_branch.last() {
			Some(&(x, _)) => x,
			None => pos,
		};

		// all peaks except our own, retaining left to right order
		let other_peaks = peaks(self.size)
			.into_iter()
			.filter(|x| *x != peak_pos)
			.map(|x| {
				self.get_from_file(x)
					.ok_or_else(|| format!("missing peak at pos {}", x))
			})
			.collect::<Result<Vec<_>, _>>()?;

		Ok(MerkleProof {
			mmr_size: self.size,
			path,
			peaks: other_peaks,
		})
	}

	/// Helper function which returns un-pruned nodes from the insertion
	/// index forward, returning up to max_count entries. Also returns the
	/// last insertion index actually read.
	pub fn elements_from_insertion_index(
		&self,
		from_idx: u64,
		max_count: u64,
	) -> (u64, Vec<T::E>) {
		let mut return_vec = vec![];
		let mut last_leaf = from_idx;
		for leaf_idx in from_idx.. {
			let pos = insertion_to_pmmr_index(leaf_idx);
			if pos >= self.size {
				break;
			}
			if let Some(data) = self.get_data(pos) {
				return_vec.push(data);
				last_leaf = leaf_idx;
			}
			if return_vec.len() as u64 >= max_count {
				break;
			}
		}
		(last_leaf, return_vec)
	}

	/// Returns the last N leaves inserted into the tree (i.e. the 'bottom'
	/// nodes at level 0), along with their hashes.
	pub fn get_last_n_insertions(&self, n: u64) -> Vec<(Hash, T::E)> {
		let mut return_vec = vec![];
		let mut last_n = n;
		let mut last_pos = self.size;
		while last_pos > 0 && last_n > 0 {
			last_pos -= 1;
			if is_leaf(last_pos) {
				if let Some(hash) = self.backend.get_hash(last_pos) {
					if let Some(data) = self.backend.get_data(last_pos) {
						return_vec.push((hash, data));
						last_n -= 1;
					}
				}
			}
		}
		return_vec
	}
}
