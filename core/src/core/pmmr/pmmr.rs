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

use std::marker;
use std::u64;

use croaring::Bitmap;

use crate::core::hash::{Hash, ZERO_HASH};
use crate::core::merkle_proof::MerkleProof;
use crate::core::pmmr::{Backend, ReadonlyPMMR};
use crate::ser::{PMMRIndexHashable, PMMRable};

/// 64 bits all ones: 0b11111111...1
const ALL_ONES: u64 = u64::MAX;

/// Prunable Merkle Mountain Range implementation. All positions within the
/// tree are 0-based postorder traversal positions rather than insertion
/// order, so the leaf inserted as number `i` sits at node position
/// `2*i - popcount(i)`.
///
/// Heavily relies on navigation operations within a binary tree. In
/// particular, all the implementation needs to keep track of the MMR
/// structure is how far we are in the sequence of nodes making up the MMR.
pub struct PMMR<'a, T, B>
where
	T: PMMRable,
	B: Backend<T>,
{
	/// Number of nodes in the PMMR
	pub size: u64,
	backend: &'a mut B,
	// only needed to parameterise Backend
	_marker: marker::PhantomData<T>,
}

impl<'a, T, B> PMMR<'a, T, B>
where
	T: PMMRable,
	B: 'a + Backend<T>,
{
	/// Build a new prunable Merkle Mountain Range using the provided backend.
	pub fn new(backend: &'a mut B) -> PMMR<'_, T, B> {
		PMMR {
			backend,
			size: 0,
			_marker: marker::PhantomData,
		}
	}

	/// Build a new prunable Merkle Mountain Range pre-initialized to
	/// size with the provided backend.
	pub fn at(backend: &'a mut B, size: u64) -> PMMR<'_, T, B> {
		PMMR {
			backend,
			size,
			_marker: marker::PhantomData,
		}
	}

	/// Build a "readonly" view of this PMMR.
	pub fn readonly_pmmr(&self) -> ReadonlyPMMR<'_, T, B> {
		ReadonlyPMMR::at(&self.backend, self.size)
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

	/// Push a new element into the MMR. Computes new related peaks at
	/// the same time if applicable. Returns the position of the new leaf.
	pub fn push(&mut self, elmt: &T) -> Result<u64, String> {
		let leaf_pos = self.size;
		let mut current_hash = elmt.hash_with_index(leaf_pos);

		let mut hashes = vec![current_hash];
		let mut pos = leaf_pos;

		let (peak_map, height) = peak_map_height(pos);
		if height != 0 {
			return Err(format!("bad mmr size {}", pos));
		}
		// hash with all immediately preceding peaks, as indicated by peak map
		let mut peak = 1;
		while (peak_map & peak) != 0 {
			let left_sibling = pos + 1 - 2 * peak;
			let left_hash = self
				.backend
				.get_from_file(left_sibling)
				.ok_or("missing left sibling in tree, should not have been pruned")?;
			peak *= 2;
			pos += 1;
			current_hash = (left_hash, current_hash).hash_with_index(pos);
			hashes.push(current_hash);
		}

		// append all the new nodes and update the MMR index
		self.backend.append(elmt, &hashes)?;
		self.size = pos + 1;
		Ok(leaf_pos)
	}

	/// Rewind the PMMR to a previous position, as if all push operations
	/// after that had been canceled. Expects the position of a leaf (the
	/// last one to keep) and a bitmap of the leaf indices of spent leaves to
	/// flag unspent again as part of the rewind.
	pub fn rewind(&mut self, position: u64, leaves_to_restore: &Bitmap) -> Result<(), String> {
		// Identify which actual position we should rewind to as the provided
		// position is a leaf. We traverse the MMR to include any parent(s)
		// that need to be included for the MMR to be valid.
		let mut pos = position;
		while bintree_postorder_height(pos + 1) > 0 {
			pos += 1;
		}

		self.backend.rewind(pos + 1, leaves_to_restore)?;
		self.size = pos + 1;
		Ok(())
	}

	/// Truncate the MMR by rewinding back to empty state.
	pub fn truncate(&mut self) -> Result<(), String> {
		self.backend.rewind(0, &Bitmap::create())?;
		self.size = 0;
		Ok(())
	}

	/// Marks (but does not remove) the leaf at the specified position as
	/// spent. Returns an error if prune is called on a non-leaf position.
	/// Returns false if the leaf node has already been marked spent.
	/// Returns true otherwise.
	pub fn prune(&mut self, position: u64) -> Result<bool, String> {
		if !is_leaf(position) {
			return Err(format!("Node at {} is not a leaf, can't prune.", position));
		}

		if self.backend.get_hash(position).is_none() {
			return Ok(false);
		}

		self.backend.remove(position)?;
		Ok(true)
	}

	/// Get the hash at provided position in the MMR.
	pub fn get_hash(&self, pos: u64) -> Option<Hash> {
		if pos >= self.size {
			None
		} else if is_leaf(pos) {
			// If we are a leaf then get hash from the backend.
			self.backend.get_hash(pos)
		} else {
			// If we are not a leaf get hash ignoring the spent flag.
			self.backend.get_from_file(pos)
		}
	}

	/// Get the data element at provided position in the MMR.
	pub fn get_data(&self, pos: u64) -> Option<T::E> {
		if pos >= self.size {
			// If we are beyond the rhs of the MMR return None.
			None
		} else if is_leaf(pos) {
			// If we are a leaf then get data from the backend.
			self.backend.get_data(pos)
		} else {
			// If we are not a leaf then return None as only leaves have data.
			None
		}
	}

	/// Get the hash from the underlying MMR file, ignoring the spent flag.
	pub fn get_from_file(&self, pos: u64) -> Option<Hash> {
		if pos >= self.size {
			None
		} else {
			self.backend.get_from_file(pos)
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
			.filter_map(|pi| {
				// here we want to get from underlying hash file
				// as the pos *may* have been "removed"
				self.backend.get_from_file(pi)
			})
			.collect()
	}

	/// Computes the root of the MMR. Find all the peaks in the current tree
	/// and "bags" them, from left to right, each fold salted with the size
	/// of the MMR so the root commits to the overall shape of the tree.
	pub fn root(&self) -> Result<Hash, String> {
		if self.is_empty() {
			return Ok(ZERO_HASH);
		}
		let peaks = self.peaks();
		if peaks.len() != peaks(self.size).len() {
			return Err("missing peaks, invalid tree".to_owned());
		}
		Ok(bag_the_peaks(self.size, &peaks))
	}

	/// Build a Merkle proof for the element at the given position.
	pub fn merkle_proof(&self, pos: u64) -> Result<MerkleProof, String> {
		self.readonly_pmmr().merkle_proof(pos)
	}

	/// Saves a snapshot of the MMR tagged with the block hash.
	/// Specifically - snapshots the utxo file as we need this rewound before
	/// sending the txhashset zip file to another node for fast-sync.
	pub fn snapshot(&mut self, block_hash: &Hash) -> Result<(), String> {
		self.backend.snapshot(block_hash)?;
		Ok(())
	}

	/// Walks all unpruned nodes in the MMR and revalidate all parent hashes.
	pub fn validate(&self) -> Result<(), String> {
		// iterate on all parent nodes
		for n in 0..self.size {
			let height = bintree_postorder_height(n);
			if height > 0 {
				if let Some(hash) = self.get_from_file(n) {
					let left_pos = n - (1 << height);
					let right_pos = n - 1;
					// using get_from_file here for the children (they may have
					// been spent)
					if let Some(left_child_hs) = self.get_from_file(left_pos) {
						if let Some(right_child_hs) = self.get_from_file(right_pos) {
							// hash the two child nodes together with parent_pos
							// and compare
							if (left_child_hs, right_child_hs).hash_with_index(n) != hash {
								return Err(format!(
									"Invalid MMR, hash of parent at {} does \
									 not match children.",
									n
								));
							}
						}
					}
				}
			}
		}
		Ok(())
	}

	/// Debugging utility to print information about the MMRs. Short version
	/// only prints the last 8 nodes.
	pub fn dump(&self, short: bool) {
		let sz = self.unpruned_size();
		if sz > 2000 && !short {
			return;
		}
		let start = if short && sz > 7 { sz / 8 - 1 } else { 0 };
		for n in start..(sz / 8 + 1) {
			let mut idx = "".to_owned();
			let mut hashes = "".to_owned();
			for m in (n * 8)..(n + 1) * 8 {
				if m >= sz {
					break;
				}
				idx.push_str(&format!("{:>8} ", m));
				let ohs = self.get_hash(m);
				match ohs {
					Some(hs) => hashes.push_str(&format!("{} ", hs)),
					None => hashes.push_str(&format!("{:>8} ", "??")),
				}
			}
			trace!("{}", idx);
			trace!("{}", hashes);
		}
	}

	/// Prints PMMR statistics to the logs, used for debugging.
	pub fn dump_stats(&self) {
		debug!("pmmr: unpruned - {}", self.unpruned_size());
		self.backend.dump_stats();
	}
}

/// Bag the provided peak hashes (in left to right order) into a single root
/// hash. Each fold is hashed with the MMR size, and a lone peak is itself
/// wrapped so the root of a one-peak tree still binds the size.
pub fn bag_the_peaks(size: u64, peaks: &[Hash]) -> Hash {
	let mut res: Option<Hash> = None;
	for peak in peaks {
		res = Some(match res {
			None => peak.hash_with_index(size),
			Some(acc) => (acc, *peak).hash_with_index(size),
		});
	}
	res.unwrap_or(ZERO_HASH)
}

/// Gets the 0-based postorder traversal index of all peaks in a MMR given
/// its size. Starts with the top peak, which is always on the left side of
/// the range, and navigates toward lower siblings toward the right of the
/// range. Returns empty vec for a size that does not describe a valid MMR.
pub fn peaks(size: u64) -> Vec<u64> {
	if size == 0 {
		return vec![];
	}
	let mut peak_size = ALL_ONES >> size.leading_zeros();
	let mut num_left = size;
	let mut sum_prev_peaks = 0;
	let mut peaks = vec![];
	while peak_size != 0 {
		if num_left >= peak_size {
			peaks.push(sum_prev_peaks + peak_size - 1);
			sum_prev_peaks += peak_size;
			num_left -= peak_size;
		}
		peak_size >>= 1;
	}
	if num_left > 0 {
		return vec![];
	}
	peaks
}

/// The number of leaves in a MMR of the provided size.
pub fn n_leaves(size: u64) -> u64 {
	let (sizes, height) = peak_sizes_height(size);
	let nleaves = sizes.iter().map(|n| (n + 1) / 2).sum();
	if height == 0 {
		nleaves
	} else {
		nleaves + 1
	}
}

/// Returns the 0-based pmmr index of the leaf with the provided 0-based
/// insertion index: `2*i - popcount(i)`.
pub fn insertion_to_pmmr_index(leaf_idx: u64) -> u64 {
	2 * leaf_idx - leaf_idx.count_ones() as u64
}

/// Returns the insertion index of the leaf at the provided position.
/// Only valid for leaf positions.
pub fn pmmr_pos_to_insertion_index(pos: u64) -> u64 {
	n_leaves(pos + 1) - 1
}

/// sizes of peaks and height of next node in mmr of given size
/// Example: on input 5 returns ([3,1], 1) as mmr state before adding 5 was
///    2
///   / \
///  0   1   3   4
pub fn peak_sizes_height(size: u64) -> (Vec<u64>, u64) {
	if size == 0 {
		return (vec![], 0);
	}
	let mut peak_size = ALL_ONES >> size.leading_zeros();
	let mut sizes = vec![];
	let mut size_left = size;
	while peak_size != 0 {
		if size_left >= peak_size {
			sizes.push(peak_size);
			size_left -= peak_size;
		}
		peak_size >>= 1;
	}
	(sizes, size_left)
}

/// return (peak_map, pos_height) of given 0-based node pos prior to its
/// addition
/// Example: on input 4 returns (0b11, 0) as mmr state before adding 4 was
///    2
///   / \
///  0   1   3
/// with 0b11 indicating presence of peaks of height 0 and 1.
/// NOTE:
/// the peak map also encodes the path taken from the root to the added node
/// since the path turns left (resp. right) if-and-only-if
/// a peak at that height is absent (resp. present)
pub fn peak_map_height(mut pos: u64) -> (u64, u64) {
	if pos == 0 {
		return (0, 0);
	}
	let mut peak_size = ALL_ONES >> pos.leading_zeros();
	let mut bitmap = 0;
	while peak_size != 0 {
		bitmap <<= 1;
		if pos >= peak_size {
			pos -= peak_size;
			bitmap |= 1;
		}
		peak_size >>= 1;
	}
	(bitmap, pos)
}

/// The height of a node in a full binary tree from its postorder traversal
/// index. This function is the base on which all others, as well as the MMR,
/// are built.
pub fn bintree_postorder_height(pos: u64) -> u64 {
	peak_map_height(pos).1
}

/// Is this position a leaf in the MMR?
/// We know the positions of all leaves based on the postorder height of an
/// MMR of any size (somewhat unintuitively but this is how the PMMR is
/// "append only").
pub fn is_leaf(pos: u64) -> bool {
	bintree_postorder_height(pos) == 0
}

/// Calculates the positions of the parent and sibling of the node at the
/// provided position.
pub fn family(pos: u64) -> (u64, u64) {
	let (peak_map, height) = peak_map_height(pos);
	let peak = 1 << height;
	if (peak_map & peak) != 0 {
		(pos + 1, pos + 1 - 2 * peak)
	} else {
		(pos + 2 * peak, pos + 2 * peak - 1)
	}
}

/// Is the node at this pos the "left" sibling of its parent?
pub fn is_left_sibling(pos: u64) -> bool {
	let (peak_map, height) = peak_map_height(pos);
	let peak = 1 << height;
	(peak_map & peak) == 0
}

/// For a given starting position calculate the parent and sibling positions
/// for the branch/path from that position to the peak of the tree.
/// We will use the sibling positions to generate the "path" of a Merkle
/// proof.
pub fn family_branch(pos: u64, size: u64) -> Vec<(u64, u64)> {
	// loop going up the tree, from node to parent, as long as we stay inside
	// the tree (as defined by size).
	let (peak_map, height) = peak_map_height(pos);
	let mut peak = 1 << height;
	let mut branch = vec![];
	let mut current = pos;
	let mut sibling;
	while current + 1 < size {
		if (peak_map & peak) != 0 {
			current += 1;
			sibling = current - 2 * peak;
		} else {
			current += 2 * peak;
			sibling = current - 1;
		};
		if current >= size {
			break;
		}
		branch.push((current, sibling));
		peak <<= 1;
	}
	branch
}

/// Gets the position of the rightmost node (i.e. leaf) beneath the provided
/// subtree root.
pub fn bintree_rightmost(pos: u64) -> u64 {
	pos - bintree_postorder_height(pos)
}

/// Gets the position of the leftmost node (i.e. leaf) beneath the provided
/// subtree root.
pub fn bintree_leftmost(pos: u64) -> u64 {
	let height = bintree_postorder_height(pos);
	pos + 2 - (2 << height)
}

/// Iterator over all leaf positions beneath the provided subtree root.
pub fn bintree_leaves(pos: u64) -> impl Iterator<Item = u64> {
	(bintree_leftmost(pos)..=bintree_rightmost(pos)).filter(|x| is_leaf(*x))
}
