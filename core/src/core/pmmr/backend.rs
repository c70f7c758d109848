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

use croaring::Bitmap;

use crate::core::hash::Hash;
use crate::ser::PMMRable;
use std::path::Path;

/// Storage backend for the MMR, just needs to be indexed by order of insertion.
/// The PMMR itself does not need the backend to be able to tell which
/// elements have been removed or pruned, only to return None where data is
/// no longer available.
pub trait Backend<T: PMMRable> {
	/// Append the provided data and hashes to the backend storage, with the
	/// given leaf data. The position of the first element of the Vec in the
	/// MMR is provided to help the implementation.
	fn append(&mut self, data: &T, hashes: &[Hash]) -> Result<(), String>;

	/// Rewind the backend state to the given size (in nodes). The
	/// `leaves_to_restore` bitmap contains the leaf indices of spent leaves
	/// that must be flagged unspent again as part of the rewind.
	fn rewind(&mut self, size: u64, leaves_to_restore: &Bitmap) -> Result<(), String>;

	/// Get a Hash by node position, filtering out any position flagged as
	/// spent or pruned away.
	fn get_hash(&self, position: u64) -> Option<Hash>;

	/// Get underlying data by leaf position, filtering out spent leaves.
	fn get_data(&self, position: u64) -> Option<T::E>;

	/// Get a Hash by original insertion position, ignoring the spent flag.
	fn get_from_file(&self, position: u64) -> Option<Hash>;

	/// Get a Data Element by original insertion position, ignoring the
	/// spent flag.
	fn get_data_from_file(&self, position: u64) -> Option<T::E>;

	/// Remove (flag as spent) a leaf from the leaf set at the given node
	/// position. The hash and data stay on disk until compaction.
	fn remove(&mut self, position: u64) -> Result<(), String>;

	/// Iterator over current (unspent, unpruned) leaf positions.
	fn leaf_pos_iter(&self) -> Box<dyn Iterator<Item = u64> + '_>;

	/// Number of leaves in the leaf set.
	fn n_unpruned_leaves(&self) -> u64;

	/// Returns the data file path
	fn get_data_file_path(&self) -> &Path;

	/// Release underlying datafiles and locks
	fn release_files(&mut self);

	/// Saves a snapshot of the rewound utxo file with the block hash as
	/// filename suffix. We need this when sending the txhashset zip file to a
	/// node for fast sync.
	fn snapshot(&self, block_hash: &Hash) -> Result<(), String>;

	/// For debugging purposes so we can see how compaction is doing.
	fn dump_stats(&self);
}
