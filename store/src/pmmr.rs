// Copyright 2019 The Lepton Developers
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

//! Implementation of the persistent Backend for the prunable MMR tree.

use std::path::{Path, PathBuf};
use std::{fs, io};

use croaring::Bitmap;

use crate::bitmap_file::BitmapFile;
use crate::core::core::hash::Hash;
use crate::core::core::pmmr::{self, Backend};
use crate::core::ser::PMMRable;
use crate::prune_list::PruneList;
use crate::types::{DataFile, HashFile};

/// Hash file name within the PMMR directory.
pub const PMMR_HASH_FILE: &str = "pmmr_hash.bin";
/// Data file name within the PMMR directory.
pub const PMMR_DATA_FILE: &str = "pmmr_data.bin";
/// Size file name (for variable size data) within the PMMR directory.
pub const PMMR_SIZE_FILE: &str = "pmmr_size.bin";
/// Leaf bitmap file name within the PMMR directory.
pub const PMMR_LEAF_FILE: &str = "pmmr_leaf.bin";
/// Prune list file name within the PMMR directory.
pub const PMMR_PRUN_FILE: &str = "pmmr_prun.bin";

/// PMMR persistent backend implementation. Relies on multiple facilities to
/// handle writing, reading and pruning:
///
/// * A main storage file appends hashes as they come. This AppendOnlyFile is
/// also backed by a mmap for reads.
/// * A corresponding data file stores the leaf elements themselves.
/// * A leaf bitmap tracks unspent leaves by insertion index.
/// * A prune list tracks the positions of fully pruned subtrees so reads
/// can translate MMR positions to file offsets.
pub struct PMMRBackend<T: PMMRable> {
	data_dir: PathBuf,
	prunable: bool,
	hash_file: HashFile,
	data_file: DataFile<T::E>,
	leaf_set: BitmapFile,
	prune_list: PruneList,
}

impl<T: PMMRable> Backend<T> for PMMRBackend<T> {
	/// Append the provided data and hashes to the backend storage.
	fn append(&mut self, data: &T, hashes: &[Hash]) -> Result<(), String> {
		let size = self.unpruned_size();
		if self.prunable {
			// the new leaf sits at position `size`, flag it unspent
			let leaf_idx = pmmr::pmmr_pos_to_insertion_index(size);
			self.leaf_set.set(leaf_idx);
		}

		self.data_file
			.append(&data.as_elmt())
			.map_err(|e| format!("Failed to append data to file. {}", e))?;
		for h in hashes {
			self.hash_file
				.append(h)
				.map_err(|e| format!("Failed to append hash to file. {}", e))?;
		}
		Ok(())
	}

	fn get_from_file(&self, pos: u64) -> Option<Hash> {
		if self.is_compacted(pos) {
			return None;
		}
		let shift = self.prune_list.get_shift(pos);
		self.hash_file.read(pos - shift)
	}

	fn get_data_from_file(&self, pos: u64) -> Option<T::E> {
		if !pmmr::is_leaf(pos) {
			return None;
		}
		if self.is_compacted(pos) {
			return None;
		}
		let leaf_idx = pmmr::pmmr_pos_to_insertion_index(pos);
		let leaf_shift = self.prune_list.get_leaf_shift(pos);
		self.data_file.read(leaf_idx - leaf_shift)
	}

	/// Get the hash at pos.
	/// Return None if pos is a leaf and it has been removed (or pruned or
	/// compacted).
	fn get_hash(&self, pos: u64) -> Option<Hash> {
		if self.prunable && pmmr::is_leaf(pos) && !self.is_leaf_unspent(pos) {
			return None;
		}
		self.get_from_file(pos)
	}

	/// Get the data at pos.
	/// Return None if it has been removed or if pos is not a leaf node.
	fn get_data(&self, pos: u64) -> Option<T::E> {
		if !pmmr::is_leaf(pos) {
			return None;
		}
		if self.prunable && !self.is_leaf_unspent(pos) {
			return None;
		}
		self.get_data_from_file(pos)
	}

	/// Rewind the PMMR backend to the given size (in nodes), restoring the
	/// provided leaves (spent in the rewound blocks) as unspent.
	fn rewind(&mut self, size: u64, leaves_to_restore: &Bitmap) -> Result<(), String> {
		// First rewind the leaf_set with the necessary added and removed
		// positions.
		if self.prunable {
			self.leaf_set
				.rewind(pmmr::n_leaves(size), leaves_to_restore);
		}

		// Rewind the hash file accounting for pruned/compacted pos
		let shift = if size == 0 {
			0
		} else {
			self.prune_list.get_shift(size - 1)
		};
		self.hash_file.rewind(size - shift);

		// Rewind the data file accounting for pruned/compacted pos
		let leaf_count = pmmr::n_leaves(size);
		let leaf_shift = if size == 0 {
			0
		} else {
			self.prune_list.get_leaf_shift(size - 1)
		};
		self.data_file.rewind(leaf_count - leaf_shift);

		Ok(())
	}

	/// Remove by insertion position: flags the leaf as spent in the leaf
	/// set, leaving hash and data in place until the next compaction.
	fn remove(&mut self, pos: u64) -> Result<(), String> {
		assert!(self.prunable, "Remove on non-prunable MMR");
		let leaf_idx = pmmr::pmmr_pos_to_insertion_index(pos);
		self.leaf_set.unset(leaf_idx);
		Ok(())
	}

	fn leaf_pos_iter(&self) -> Box<dyn Iterator<Item = u64> + '_> {
		Box::new(
			self.leaf_set
				.to_bitmap()
				.iter()
				.map(|x| pmmr::insertion_to_pmmr_index(x as u64))
				.collect::<Vec<_>>()
				.into_iter(),
		)
	}

	fn n_unpruned_leaves(&self) -> u64 {
		self.leaf_set.count()
	}

	/// Return data file path
	fn get_data_file_path(&self) -> &Path {
		self.data_file.path()
	}

	fn release_files(&mut self) {
		self.hash_file.release();
		self.data_file.release();
	}

	fn snapshot(&self, block_hash: &Hash) -> Result<(), String> {
		let path = format!(
			"{}.{}",
			self.leaf_set.path().display(),
			block_hash.to_hex()
		);
		self.leaf_set
			.snapshot(&path)
			.map_err(|_| format!("Failed to save copy of leaf bitmap for {}", block_hash))?;
		Ok(())
	}

	fn dump_stats(&self) {
		debug!(
			"pmmr backend: unpruned: {}, hashes: {}, data: {}, leaf_set: {}, prune_list: {}",
			self.unpruned_size(),
			self.hash_size(),
			self.data_size(),
			self.leaf_set.count(),
			self.prune_list.len(),
		);
	}
}

impl<T: PMMRable> PMMRBackend<T> {
	/// Instantiates a new PMMR backend.
	/// If optional size is provided, treat data files as "fixed size"
	/// (size must be provided on every open, it is not stored).
	pub fn new<P: AsRef<Path>>(data_dir: P, prunable: bool) -> io::Result<PMMRBackend<T>> {
		let data_dir = data_dir.as_ref().to_path_buf();
		fs::create_dir_all(&data_dir)?;

		let hash_file = HashFile::open(data_dir.join(PMMR_HASH_FILE))?;
		let data_file = if let Some(elmt_size) = T::elmt_size() {
			DataFile::open(data_dir.join(PMMR_DATA_FILE), None, Some(elmt_size))?
		} else {
			DataFile::open(
				data_dir.join(PMMR_DATA_FILE),
				Some(data_dir.join(PMMR_SIZE_FILE)),
				None,
			)?
		};
		let leaf_set = BitmapFile::open(data_dir.join(PMMR_LEAF_FILE))?;
		let prune_list = PruneList::open(data_dir.join(PMMR_PRUN_FILE))?;

		Ok(PMMRBackend {
			data_dir,
			prunable,
			hash_file,
			data_file,
			leaf_set,
			prune_list,
		})
	}

	/// Number of hashes, accounting for the pruned positions, i.e. the
	/// "virtual" size of the full MMR.
	pub fn unpruned_size(&self) -> u64 {
		self.hash_size() + self.prune_list.get_total_shift()
	}

	/// Number of elements in the underlying data file.
	pub fn data_size(&self) -> u64 {
		self.data_file.size_unsync()
	}

	/// Size of the underlying hashed data.
	pub fn hash_size(&self) -> u64 {
		self.hash_file.size_unsync()
	}

	/// Is the provided leaf position unspent per the leaf bitmap?
	fn is_leaf_unspent(&self, pos: u64) -> bool {
		let leaf_idx = pmmr::pmmr_pos_to_insertion_index(pos);
		self.leaf_set.is_set(leaf_idx)
	}

	// A position is compacted away entirely if it is under a pruned subtree
	// root (the root itself is retained in the hash file).
	fn is_compacted(&self, pos: u64) -> bool {
		self.prune_list.is_pruned(pos) && !self.prune_list.is_pruned_root(pos)
	}

	/// Syncs all files to disk. A call to sync is required to ensure all
	/// the data has been successfully written to disk.
	pub fn sync(&mut self) -> io::Result<()> {
		self.hash_file.flush()?;
		self.data_file.flush()?;
		if self.prunable {
			self.leaf_set.flush()?;
		}
		Ok(())
	}

	/// Discard the current, non synced state of the backend.
	pub fn discard(&mut self) {
		self.hash_file.discard();
		self.data_file.discard();
		self.leaf_set.discard();
	}

	/// Checks the length of the remove log to see if it should get
	/// compacted. We compact everything spent up to (and not including)
	/// cutoff_pos, except the leaves protected by the rewind data
	/// (rewind_protect holds leaf indices spent in blocks that may still be
	/// rewound).
	///
	/// Returns true if compaction occurred, false otherwise.
	pub fn check_compact(&mut self, cutoff_pos: u64, rewind_protect: &Bitmap) -> io::Result<bool> {
		assert!(self.prunable, "Trying to compact a non-prunable PMMR");

		// Calculate the sets of leaves and positions to remove based on the
		// cutoff_pos provided.
		let (leaves_removed, pos_to_rm) = self.pos_to_rm(cutoff_pos, rewind_protect);
		if leaves_removed.is_empty() {
			return Ok(false);
		}

		// 1. Save a compact copy of the hash file, skipping removed hashes.
		{
			let rm_offsets = map_rm_to_offsets(&pos_to_rm, &self.prune_list);
			self.hash_file.write_compacted(&rm_offsets)?;
		}

		// 2. Save compact copy of the data file, skipping removed leaves.
		{
			let leaf_pos_to_rm: Vec<u64> = pos_to_rm
				.iter()
				.map(|x| x as u64)
				.filter(|x| pmmr::is_leaf(*x))
				.collect();
			let rm_offsets = map_leaves_to_offsets(&leaf_pos_to_rm, &self.prune_list);
			self.data_file.write_compacted(&rm_offsets)?;
		}

		// 3. Update the prune list and write it in place. Lone spent leaves
		// get stripped on flush, everything else merges into subtree roots.
		{
			for leaf_pos in leaves_removed.iter() {
				self.prune_list.add(leaf_pos as u64);
			}
			self.prune_list.flush()?;
		}

		// 4. Write the leaf bitmap through so everything is consistent.
		self.leaf_set.flush()?;

		debug!(
			"check_compact: compacted {} pos ({} leaves) up to cutoff {}",
			pos_to_rm.cardinality(),
			leaves_removed.cardinality(),
			cutoff_pos,
		);

		Ok(true)
	}

	// The leaves (by position) we can remove, and the full set of positions
	// (expanded to maximal fully-spent subtrees, minus their retained roots)
	// to drop from the hash file.
	fn pos_to_rm(&self, cutoff_pos: u64, rewind_protect: &Bitmap) -> (Bitmap, Bitmap) {
		let mut expanded = Bitmap::create();

		let leaf_cutoff = pmmr::n_leaves(cutoff_pos);
		let unspent = self.leaf_set.to_bitmap();

		let mut leaf_pos_to_rm = Bitmap::create();
		for leaf_idx in 0..leaf_cutoff {
			let pos = pmmr::insertion_to_pmmr_index(leaf_idx);
			if !unspent.contains(leaf_idx as u32)
				&& !rewind_protect.contains(leaf_idx as u32)
				&& !self.prune_list.is_pruned(pos)
			{
				leaf_pos_to_rm.add(pos as u32);
			}
		}

		for x in leaf_pos_to_rm.iter() {
			expanded.add(x);
			let mut current = x as u64;
			loop {
				let (parent, sibling) = pmmr::family(current);
				let sibling_pruned = self.prune_list.is_pruned_root(sibling);

				// if sibling previously pruned, push it back onto the list
				// of pos to remove so we can compact it away too, and
				// traverse up to the parent
				if sibling_pruned {
					expanded.add(sibling as u32);
				}
				if sibling_pruned || expanded.contains(sibling as u32) {
					expanded.add(parent as u32);
					current = parent;
				} else {
					break;
				}
			}
		}
		(leaf_pos_to_rm, self.removed_excl_roots(&expanded))
	}

	// Filter the expanded set removing the roots of the maximal pruned
	// subtrees; those stay in the hash file.
	fn removed_excl_roots(&self, removed: &Bitmap) -> Bitmap {
		removed
			.iter()
			.filter(|pos| {
				let (parent_pos, _) = pmmr::family(*pos as u64);
				removed.contains(parent_pos as u32)
			})
			.collect()
	}
}

// Map positions to their current hash file offsets given the (pre-update)
// prune list.
fn map_rm_to_offsets(pos_to_rm: &Bitmap, prune_list: &PruneList) -> Vec<u64> {
	let mut offsets: Vec<u64> = pos_to_rm
		.iter()
		.map(|pos| {
			let shift = prune_list.get_shift(pos as u64);
			pos as u64 - shift
		})
		.collect();
	offsets.sort_unstable();
	offsets
}

// Map leaf positions to their current data file offsets given the
// (pre-update) prune list.
fn map_leaves_to_offsets(leaf_pos: &[u64], prune_list: &PruneList) -> Vec<u64> {
	let mut offsets: Vec<u64> = leaf_pos
		.iter()
		.map(|pos| {
			let leaf_idx = pmmr::pmmr_pos_to_insertion_index(*pos);
			let leaf_shift = prune_list.get_leaf_shift(*pos);
			leaf_idx - leaf_shift
		})
		.collect();
	offsets.sort_unstable();
	offsets
}
