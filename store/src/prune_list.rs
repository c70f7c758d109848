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

//! The prune list: a compact (roaring) bitmap of the roots of the fully
//! pruned subtrees of an MMR. The roots themselves stay in the hash file,
//! everything beneath them is compacted away, and positions to the right of
//! a pruned subtree must be shifted accordingly when reading from the hash
//! and data files. A lone pruned leaf is never tracked here; only when both
//! siblings are spent does a parent enter the list.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use croaring::Bitmap;

use crate::core::core::pmmr::{bintree_leftmost, bintree_postorder_height, family};
use crate::read_bitmap;
use crate::util::file::save_via_temp_file;

/// Maintains a list of previously pruned nodes in PMMR, compacting the list
/// as parents get pruned and allowing checking whether a leaf is pruned.
/// Given a node's position, computes how much it should get shifted given
/// the subtrees that have been pruned before.
pub struct PruneList {
	path: Option<PathBuf>,
	/// Bitmap representing pruned root node positions.
	bitmap: Bitmap,
	/// Bitmap representing all pruned node positions (everything at and
	/// under the pruned roots).
	pruned_cache: Bitmap,
	shift_cache: Vec<u64>,
	leaf_shift_cache: Vec<u64>,
}

impl PruneList {
	/// Instantiate a new empty prune list.
	pub fn new() -> PruneList {
		PruneList {
			path: None,
			bitmap: Bitmap::create(),
			pruned_cache: Bitmap::create(),
			shift_cache: vec![],
			leaf_shift_cache: vec![],
		}
	}

	/// Open an existing prune_list or create a new one.
	pub fn open<P: AsRef<Path>>(path: P) -> io::Result<PruneList> {
		let file_path = path.as_ref().to_path_buf();
		let bitmap = if file_path.exists() {
			read_bitmap(&file_path)?
		} else {
			Bitmap::create()
		};

		let mut prune_list = PruneList {
			path: Some(file_path),
			bitmap,
			pruned_cache: Bitmap::create(),
			shift_cache: vec![],
			leaf_shift_cache: vec![],
		};

		// Now build the shift and pruned caches from the bitmap we read
		// from disk.
		prune_list.init_caches();

		if !prune_list.bitmap.is_empty() {
			debug!(
				"prune_list: bitmap {} pos ({} bytes), pruned_cache {} pos ({} bytes), shift_cache {}, leaf_shift_cache {}",
				prune_list.bitmap.cardinality(),
				prune_list.bitmap.get_serialized_size_in_bytes(),
				prune_list.pruned_cache.cardinality(),
				prune_list.pruned_cache.get_serialized_size_in_bytes(),
				prune_list.shift_cache.len(),
				prune_list.leaf_shift_cache.len(),
			);
		}

		Ok(prune_list)
	}

	fn init_caches(&mut self) {
		self.build_shift_cache();
		self.build_leaf_shift_cache();
		self.build_pruned_cache();
	}

	/// Save the prune_list to disk.
	/// Clears out lone leaf entries (pruned leaves whose sibling is still
	/// present) before saving to disk, as those never advance the shift and
	/// are tracked via the leaf bitmap instead.
	pub fn flush(&mut self) -> io::Result<()> {
		// Strip any height 0 "roots": the prune list only ever persists
		// fully pruned subtrees.
		let lone_leaves: Bitmap = self
			.bitmap
			.iter()
			.filter(|pos| bintree_postorder_height(*pos as u64) == 0)
			.collect();
		self.bitmap.andnot_inplace(&lone_leaves);

		// Run the optimization step on the bitmap.
		self.bitmap.run_optimize();

		// Write the updated bitmap file to disk.
		if let Some(ref path) = self.path {
			save_via_temp_file(path, ".tmp", |mut w| {
				w.write_all(&self.bitmap.serialize())
			})?;
		}

		// Rebuild our "shift caches" here as we are flushing changes to disk
		// and the contents of our prune_list has likely changed.
		self.init_caches();

		Ok(())
	}

	/// Return the total shift from all entries in the prune_list.
	pub fn get_total_shift(&self) -> u64 {
		if self.bitmap.is_empty() {
			return 0;
		}
		self.get_shift(self.bitmap.maximum() as u64)
	}

	/// Computes by how many positions a node at pos should be shifted given
	/// the number of nodes that have already been pruned before it.
	/// Note: the node at pos may be pruned and may be compacted away itself
	/// and the caller needs to be aware of this.
	pub fn get_shift(&self, pos: u64) -> u64 {
		if self.bitmap.is_empty() {
			return 0;
		}

		let idx = self.bitmap.rank(pos as u32);
		if idx == 0 {
			return 0;
		}

		if idx > self.shift_cache.len() as u64 {
			self.shift_cache[self.shift_cache.len() - 1]
		} else {
			self.shift_cache[idx as usize - 1]
		}
	}

	fn build_shift_cache(&mut self) {
		self.shift_cache.clear();
		if self.bitmap.is_empty() {
			return;
		}

		for pos in self.bitmap.iter() {
			let pos = pos as u64;
			let prev_shift = if pos == 0 { 0 } else { self.get_shift(pos - 1) };

			// A fully pruned subtree of height h loses all its 2^(h+1) - 2
			// children from the hash file; the root itself is retained.
			let height = bintree_postorder_height(pos);
			let curr_shift = 2 * ((1 << height) - 1);

			self.shift_cache.push(prev_shift + curr_shift);
		}
	}

	/// As above, but only returning the number of leaf nodes to skip for a
	/// given leaf. Helpful if, for instance, data for each leaf is being
	/// stored separately in a continuous flat-file.
	pub fn get_leaf_shift(&self, pos: u64) -> u64 {
		if self.bitmap.is_empty() {
			return 0;
		}

		let idx = self.bitmap.rank(pos as u32);
		if idx == 0 {
			return 0;
		}

		if idx > self.leaf_shift_cache.len() as u64 {
			self.leaf_shift_cache[self.leaf_shift_cache.len() - 1]
		} else {
			self.leaf_shift_cache[idx as usize - 1]
		}
	}

	fn build_leaf_shift_cache(&mut self) {
		self.leaf_shift_cache.clear();
		if self.bitmap.is_empty() {
			return;
		}

		for pos in self.bitmap.iter() {
			let pos = pos as u64;
			let prev_shift = if pos == 0 {
				0
			} else {
				self.get_leaf_shift(pos - 1)
			};

			let height = bintree_postorder_height(pos);
			let curr_shift = if height == 0 { 0 } else { 1 << height };

			self.leaf_shift_cache.push(prev_shift + curr_shift);
		}
	}

	/// Push the node at the provided position in the prune list. Compacts
	/// the list if pruning the additional node means a parent can get
	/// pruned as well.
	pub fn add(&mut self, pos: u64) {
		let mut current = pos;
		loop {
			let (parent, sibling) = family(current);

			if self.bitmap.contains(sibling as u32) || self.pruned_cache.contains(sibling as u32)
			{
				self.pruned_cache.add(current as u32);
				self.bitmap.remove(sibling as u32);
				current = parent;
			} else {
				self.pruned_cache.add(current as u32);
				self.bitmap.add(current as u32);
				break;
			}
		}
	}

	/// Number of entries in the prune_list.
	pub fn len(&self) -> u64 {
		self.bitmap.cardinality()
	}

	/// Is the prune_list empty?
	pub fn is_empty(&self) -> bool {
		self.bitmap.is_empty()
	}

	/// Convert the prune_list to a vec of pos.
	pub fn to_vec(&self) -> Vec<u64> {
		self.bitmap.to_vec().into_iter().map(|x| x as u64).collect()
	}

	/// Is the pos pruned?
	/// Assumes the pruned_cache is fully built and up to date.
	pub fn is_pruned(&self, pos: u64) -> bool {
		self.pruned_cache.contains(pos as u32)
	}

	fn build_pruned_cache(&mut self) {
		self.pruned_cache = Bitmap::create();
		for root in self.bitmap.iter() {
			let root = root as u64;
			for pos in bintree_leftmost(root)..=root {
				self.pruned_cache.add(pos as u32);
			}
		}
		self.pruned_cache.run_optimize();
	}

	/// Is the specified position a root of a pruned subtree?
	pub fn is_pruned_root(&self, pos: u64) -> bool {
		self.bitmap.contains(pos as u32)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::pmmr::insertion_to_pmmr_index;

	#[test]
	fn prune_siblings_merge_to_parent() {
		let mut pl = PruneList::new();

		// pruning a lone leaf records it but as a height 0 entry
		pl.add(0);
		assert_eq!(pl.to_vec(), [0]);
		assert!(pl.is_pruned(0));
		assert!(!pl.is_pruned(1));

		// pruning its sibling merges both into the parent at pos 2
		pl.add(1);
		assert_eq!(pl.to_vec(), [2]);
		assert!(pl.is_pruned(0));
		assert!(pl.is_pruned(1));
		assert!(pl.is_pruned(2));
		assert!(pl.is_pruned_root(2));
	}

	#[test]
	fn shifts_after_prune() {
		let mut pl = PruneList::new();

		// prune the first two leaves (positions 0 and 1), they merge into
		// the subtree rooted at 2
		pl.add(0);
		pl.add(1);
		// rebuild caches as flush would
		pl.init_caches();

		// the two children of pos 2 are gone from the hash file
		assert_eq!(pl.get_shift(2), 2);
		assert_eq!(pl.get_shift(3), 2);
		// both leaves are gone from the data file
		assert_eq!(pl.get_leaf_shift(3), 2);

		// positions before the pruned root see no shift
		assert_eq!(pl.get_shift(1), 0);
	}

	#[test]
	fn flush_strips_lone_leaves() {
		let dir = std::env::temp_dir().join("lepton_prune_list_tests");
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("prune_list_lone");
		let _ = std::fs::remove_file(&path);

		let mut pl = PruneList::open(&path).unwrap();
		// a lone spent leaf (sibling unspent) at leaf idx 4 (pos 7)
		pl.add(insertion_to_pmmr_index(4));
		// a fully spent pair at leaves 0 and 1
		pl.add(0);
		pl.add(1);
		pl.flush().unwrap();

		// only the merged parent survives the flush
		assert_eq!(pl.to_vec(), [2]);

		// and that is what a reload sees
		let pl2 = PruneList::open(&path).unwrap();
		assert_eq!(pl2.to_vec(), [2]);
	}
}
