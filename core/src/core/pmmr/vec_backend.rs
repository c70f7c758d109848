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

//! Simple in-memory vec-based backend, mostly for testing the PMMR without
//! dragging file storage in.

use croaring::Bitmap;
use std::path::Path;

use crate::core::hash::Hash;
use crate::core::pmmr::{self, Backend};
use crate::ser::PMMRable;

/// Simple/minimal/naive MMR backend implementation backed by Vec<T> and
/// Vec<Hash>. Removed leaves are tracked by insertion index in a bitmap.
#[derive(Clone, Debug)]
pub struct VecBackend<T: PMMRable> {
	/// Backend elements, keyed by insertion index.
	pub data: Vec<T::E>,
	/// Hashes, keyed by node position.
	pub hashes: Vec<Hash>,
	/// Leaf indices of leaves flagged spent.
	pub removed: Bitmap,
}

impl<T: PMMRable> Backend<T> for VecBackend<T> {
	fn append(&mut self, data: &T, hashes: &[Hash]) -> Result<(), String> {
		self.data.push(data.as_elmt());
		self.hashes.extend_from_slice(hashes);
		Ok(())
	}

	fn get_hash(&self, position: u64) -> Option<Hash> {
		if self.is_removed(position) {
			None
		} else {
			self.get_from_file(position)
		}
	}

	fn get_data(&self, position: u64) -> Option<T::E> {
		if self.is_removed(position) {
			None
		} else {
			self.get_data_from_file(position)
		}
	}

	fn get_from_file(&self, position: u64) -> Option<Hash> {
		self.hashes.get(position as usize).cloned()
	}

	fn get_data_from_file(&self, position: u64) -> Option<T::E> {
		let idx = pmmr::pmmr_pos_to_insertion_index(position);
		self.data.get(idx as usize).cloned()
	}

	fn rewind(&mut self, size: u64, leaves_to_restore: &Bitmap) -> Result<(), String> {
		self.hashes.truncate(size as usize);
		self.data.truncate(pmmr::n_leaves(size) as usize);
		// trim the removed set to only contain current leaves,
		// then restore the leaves spent in the rewound blocks
		let n_leaves = pmmr::n_leaves(size);
		self.removed = self
			.removed
			.iter()
			.filter(|x| u64::from(*x) < n_leaves)
			.collect();
		self.removed.andnot_inplace(leaves_to_restore);
		Ok(())
	}

	fn remove(&mut self, position: u64) -> Result<(), String> {
		let idx = pmmr::pmmr_pos_to_insertion_index(position);
		self.removed.add(idx as u32);
		Ok(())
	}

	fn leaf_pos_iter(&self) -> Box<dyn Iterator<Item = u64> + '_> {
		let n_leaves = self.data.len() as u64;
		Box::new(
			(0..n_leaves)
				.filter(move |x| !self.removed.contains(*x as u32))
				.map(|x| pmmr::insertion_to_pmmr_index(x)),
		)
	}

	fn n_unpruned_leaves(&self) -> u64 {
		self.data.len() as u64 - self.removed.cardinality()
	}

	fn get_data_file_path(&self) -> &Path {
		Path::new("")
	}

	fn release_files(&mut self) {}

	fn snapshot(&self, _block_hash: &Hash) -> Result<(), String> {
		Ok(())
	}

	fn dump_stats(&self) {}
}

impl<T: PMMRable> VecBackend<T> {
	/// Instantiates a new empty vec backend.
	pub fn new() -> VecBackend<T> {
		VecBackend {
			data: vec![],
			hashes: vec![],
			removed: Bitmap::create(),
		}
	}

	fn is_removed(&self, position: u64) -> bool {
		if !pmmr::is_leaf(position) {
			return false;
		}
		let idx = pmmr::pmmr_pos_to_insertion_index(position);
		self.removed.contains(idx as u32)
	}

	/// Size of this backend in nodes.
	pub fn size(&self) -> u64 {
		self.hashes.len() as u64
	}
}
