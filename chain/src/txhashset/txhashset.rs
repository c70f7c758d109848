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

//! Utility structs to handle the 3 MMRs (output, rangeproof, kernel) along
//! the overall header MMR conveniently and transactionally. The three MMRs
//! and the output leaf bitmap always move together: a block is applied (or
//! rewound) across all of them inside a single extension that either commits
//! as a whole or rolls back as a whole.

use crate::core::core::committed::Committed;
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::merkle_proof::MerkleProof;
use crate::core::core::pmmr::{self, Backend, ReadonlyPMMR, PMMR};
use crate::core::core::{
	Block, BlockHeader, KernelFeatures, Output, OutputIdentifier, TxKernel,
};
use crate::error::{Error, ErrorKind};
use crate::store::{Batch, ChainStore};
use crate::txhashset::UTXOView;
use crate::types::{CommitPos, Tip, TxHashSetRoots, TxHashsetWriteStatus};
use crate::util::secp::pedersen::{Commitment, RangeProof};
use crate::util::secp::Secp256k1;
use crate::util::{file, zip};
use croaring::Bitmap;
use lepton_store::pmmr::PMMRBackend;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

const TXHASHSET_SUBDIR: &str = "txhashset";
const HEADERHASHSET_SUBDIR: &str = "header";

const OUTPUT_SUBDIR: &str = "output";
const RANGE_PROOF_SUBDIR: &str = "rangeproof";
const KERNEL_SUBDIR: &str = "kernel";

const HEADER_HEAD_SUBDIR: &str = "header_head";
const SYNC_HEAD_SUBDIR: &str = "sync_head";

const TXHASHSET_ZIP: &str = "txhashset_snapshot";

/// Batch verification chunk size for rangeproofs and kernel signatures
/// during a full txhashset validation.
const VERIFY_CHUNK_SIZE: usize = 1_000;

struct PMMRHandle<T: crate::core::ser::PMMRable> {
	backend: PMMRBackend<T>,
	size: u64,
}

impl<T: crate::core::ser::PMMRable> PMMRHandle<T> {
	fn new<P: AsRef<Path>>(path: P, prunable: bool) -> Result<PMMRHandle<T>, Error> {
		fs::create_dir_all(&path)?;
		let backend = PMMRBackend::new(&path, prunable)?;
		let size = backend.unpruned_size();
		Ok(PMMRHandle { backend, size })
	}
}

/// An easy to manipulate structure holding the 3 MMRs necessary to validate
/// blocks and capturing the output set, the range proofs and the kernels.
/// Also handles the index of commitments to positions in the output and
/// range proof MMRs.
///
/// Note that the index is never authoritative, only the trees are guaranteed
/// to indicate whether an output is spent or not.
pub struct TxHashSet {
	output_pmmr_h: PMMRHandle<Output>,
	rproof_pmmr_h: PMMRHandle<RangeProof>,
	kernel_pmmr_h: PMMRHandle<TxKernel>,

	/// Header MMR supporting the candidate header chain.
	header_pmmr_h: PMMRHandle<BlockHeader>,
	/// Header MMR used as scratch space by header sync.
	sync_pmmr_h: PMMRHandle<BlockHeader>,

	// chain store used as index of commitments to MMR positions
	commit_index: Arc<ChainStore>,
}

impl TxHashSet {
	/// Open an existing or new set of backends for the TxHashSet
	pub fn open(root_dir: &str, commit_index: Arc<ChainStore>) -> Result<TxHashSet, Error> {
		let txhashset_path = Path::new(root_dir).join(TXHASHSET_SUBDIR);
		let header_path = Path::new(root_dir).join(HEADERHASHSET_SUBDIR);
		Ok(TxHashSet {
			output_pmmr_h: PMMRHandle::new(txhashset_path.join(OUTPUT_SUBDIR), true)?,
			rproof_pmmr_h: PMMRHandle::new(txhashset_path.join(RANGE_PROOF_SUBDIR), true)?,
			kernel_pmmr_h: PMMRHandle::new(txhashset_path.join(KERNEL_SUBDIR), false)?,
			header_pmmr_h: PMMRHandle::new(header_path.join(HEADER_HEAD_SUBDIR), false)?,
			sync_pmmr_h: PMMRHandle::new(header_path.join(SYNC_HEAD_SUBDIR), false)?,
			commit_index,
		})
	}

	/// Close all backend file handles
	pub fn release_backend_files(&mut self) {
		self.header_pmmr_h.backend.release_files();
		self.sync_pmmr_h.backend.release_files();
		self.output_pmmr_h.backend.release_files();
		self.rproof_pmmr_h.backend.release_files();
		self.kernel_pmmr_h.backend.release_files();
	}

	/// Check if an output is unspent.
	/// We look in the index to find the output MMR pos and check the
	/// output MMR leaf set directly, per the declared is_unspent rule:
	/// the leaf bitmap bit is set and the leaf still exists in the MMR.
	pub fn get_unspent(
		&self,
		output_id: &OutputIdentifier,
	) -> Result<Option<CommitPos>, Error> {
		let commit = output_id.commit;
		match self.commit_index.get_output_pos(&commit) {
			Ok(cp) => {
				let output_pmmr: ReadonlyPMMR<'_, Output, _> =
					ReadonlyPMMR::at(&self.output_pmmr_h.backend, self.output_pmmr_h.size);
				if let Some(out) = output_pmmr.get_data(cp.pos) {
					if out == *output_id {
						Ok(Some(cp))
					} else {
						Ok(None)
					}
				} else {
					Ok(None)
				}
			}
			Err(e) => match e.kind() {
				ErrorKind::StoreErr(lepton_store::lmdb::Error::NotFoundErr(_), _) => Ok(None),
				_ => Err(e),
			},
		}
	}

	/// returns the last N nodes inserted into the tree (i.e. the 'bottom'
	/// nodes at level 0
	pub fn last_n_output(&self, distance: u64) -> Vec<(Hash, OutputIdentifier)> {
		ReadonlyPMMR::at(&self.output_pmmr_h.backend, self.output_pmmr_h.size)
			.get_last_n_insertions(distance)
	}

	/// as above, for range proofs
	pub fn last_n_rangeproof(&self, distance: u64) -> Vec<(Hash, RangeProof)> {
		ReadonlyPMMR::at(&self.rproof_pmmr_h.backend, self.rproof_pmmr_h.size)
			.get_last_n_insertions(distance)
	}

	/// as above, for kernels
	pub fn last_n_kernel(&self, distance: u64) -> Vec<(Hash, TxKernel)> {
		ReadonlyPMMR::at(&self.kernel_pmmr_h.backend, self.kernel_pmmr_h.size)
			.get_last_n_insertions(distance)
	}

	/// returns outputs from the given leaf insertion index up to the
	/// specified limit. Also returns the last index actually populated.
	pub fn outputs_by_insertion_index(
		&self,
		start_index: u64,
		max_count: u64,
	) -> (u64, Vec<OutputIdentifier>) {
		ReadonlyPMMR::at(&self.output_pmmr_h.backend, self.output_pmmr_h.size)
			.elements_from_insertion_index(start_index, max_count)
	}

	/// as above, for range proofs
	pub fn rangeproofs_by_insertion_index(
		&self,
		start_index: u64,
		max_count: u64,
	) -> (u64, Vec<RangeProof>) {
		ReadonlyPMMR::at(&self.rproof_pmmr_h.backend, self.rproof_pmmr_h.size)
			.elements_from_insertion_index(start_index, max_count)
	}

	/// Root of the candidate header MMR over the headers up to and
	/// including the one at the provided height. The header MMR is
	/// append-only so the root at any prefix can be computed readonly.
	pub fn header_root_at(&self, height: u64) -> Result<Hash, Error> {
		let leaf_count = height + 1;
		let size = 2 * leaf_count - u64::from(leaf_count.count_ones());
		if size > self.header_pmmr_h.size {
			return Err(ErrorKind::Other(format!(
				"header MMR too short for height {}",
				height
			))
			.into());
		}
		ReadonlyPMMR::<BlockHeader, _>::at(&self.header_pmmr_h.backend, size)
			.root()
			.map_err(|_| ErrorKind::InvalidRoot.into())
	}

	/// Get MMR roots.
	pub fn roots(&self) -> TxHashSetRoots {
		let output_pmmr = ReadonlyPMMR::at(&self.output_pmmr_h.backend, self.output_pmmr_h.size);
		let rproof_pmmr = ReadonlyPMMR::at(&self.rproof_pmmr_h.backend, self.rproof_pmmr_h.size);
		let kernel_pmmr = ReadonlyPMMR::at(&self.kernel_pmmr_h.backend, self.kernel_pmmr_h.size);

		TxHashSetRoots {
			output_root: output_pmmr.root().unwrap_or(Hash::default()),
			rproof_root: rproof_pmmr.root().unwrap_or(Hash::default()),
			kernel_root: kernel_pmmr.root().unwrap_or(Hash::default()),
		}
	}

	/// The sizes of each of the MMRs (output, rangeproof, kernel).
	pub fn sizes(&self) -> (u64, u64, u64) {
		(
			self.output_pmmr_h.size,
			self.rproof_pmmr_h.size,
			self.kernel_pmmr_h.size,
		)
	}

	/// Commitments of every currently unspent output, gathered from the
	/// output MMR leaf set.
	pub fn unspent_output_commits(&self) -> Vec<Commitment> {
		let pmmr = ReadonlyPMMR::<Output, _>::at(&self.output_pmmr_h.backend, self.output_pmmr_h.size);
		pmmr.leaf_pos_iter()
			.filter_map(|pos| pmmr.get_data(pos))
			.map(|out| out.commit)
			.collect()
	}

	/// Excess commitments of every kernel in the kernel MMR.
	pub fn kernel_excess_commits(&self) -> Vec<Commitment> {
		let pmmr = ReadonlyPMMR::<TxKernel, _>::at(&self.kernel_pmmr_h.backend, self.kernel_pmmr_h.size);
		let mut commits = vec![];
		for n in 0..self.kernel_pmmr_h.size {
			if pmmr::is_leaf(n) {
				if let Some(kernel) = pmmr.get_data(n) {
					commits.push(kernel.excess());
				}
			}
		}
		commits
	}

	/// Build a merkle proof for the given output commitment.
	pub fn merkle_proof(&self, commit: Commitment) -> Result<MerkleProof, Error> {
		let pos = self.commit_index.get_output_pos(&commit)?.pos;
		ReadonlyPMMR::<Output, _>::at(&self.output_pmmr_h.backend, self.output_pmmr_h.size)
			.merkle_proof(pos)
			.map_err(|_| ErrorKind::MerkleProof.into())
	}

	/// Compact the MMR data files and flush the rm logs
	pub fn compact(
		&mut self,
		horizon_header: &BlockHeader,
		batch: &Batch<'_>,
	) -> Result<(), Error> {
		debug!("txhashset: starting compaction...");

		let head_header = batch.head_header()?;
		let rewind_protect = input_leaves_to_protect(horizon_header, &head_header, batch)?;

		debug!("txhashset: check_compact output mmr backend...");
		self.output_pmmr_h
			.backend
			.check_compact(horizon_header.output_mmr_size, &rewind_protect)?;

		debug!("txhashset: check_compact rangeproof mmr backend...");
		self.rproof_pmmr_h
			.backend
			.check_compact(horizon_header.output_mmr_size, &rewind_protect)?;

		debug!("txhashset: ... compaction finished");

		Ok(())
	}
}

/// Starts a new unit of work to extend (or rewind) the chain with additional
/// blocks. Accepts a closure that will operate within that unit of work.
/// The closure has access to an Extension object that allows the addition
/// of blocks to the txhashset and the checking of the current tree roots.
///
/// The unit of work is always discarded (always rollback) as this is read-only.
pub fn extending_readonly<F, T>(trees: &mut TxHashSet, inner: F) -> Result<T, Error>
where
	F: FnOnce(&mut Extension<'_>, &Batch<'_>) -> Result<T, Error>,
{
	let commit_index = trees.commit_index.clone();
	let batch = commit_index.batch()?;

	trace!("Starting new txhashset (readonly) extension.");

	let head = batch.head().unwrap_or_else(|_| Tip::default());

	let res = {
		let mut extension = Extension::new(trees, head);
		extension.force_rollback();
		inner(&mut extension, &batch)
	};

	trace!("Rollbacking txhashset (readonly) extension.");

	trees.output_pmmr_h.backend.discard();
	trees.rproof_pmmr_h.backend.discard();
	trees.kernel_pmmr_h.backend.discard();

	trace!("TxHashSet (readonly) extension done.");

	res
}

/// Readonly view on the UTXO set.
/// Based on the current txhashset output_pmmr.
pub fn utxo_view<F, T>(trees: &TxHashSet, inner: F) -> Result<T, Error>
where
	F: FnOnce(&UTXOView<'_>, &Batch<'_>) -> Result<T, Error>,
{
	let res: Result<T, Error>;
	{
		let output_pmmr = ReadonlyPMMR::at(&trees.output_pmmr_h.backend, trees.output_pmmr_h.size);

		// Create a new batch here to pass into the utxo_view.
		// Discard it (rollback) after we finish with the utxo_view.
		let batch = trees.commit_index.batch()?;
		let utxo = UTXOView::new(output_pmmr);
		res = inner(&utxo, &batch);
	}
	res
}

/// Starts a new unit of work to extend the chain with additional blocks,
/// accepting a closure that will work within that unit of work. The closure
/// has access to an Extension object that allows the addition of blocks to
/// the txhashset and the checking of the current tree roots.
///
/// If the closure returns an error, modifications are canceled and the unit
/// of work is abandoned. Otherwise, the unit of work is permanently applied.
pub fn extending<'a, F, T>(
	trees: &'a mut TxHashSet,
	batch: &'a mut Batch<'_>,
	inner: F,
) -> Result<T, Error>
where
	F: FnOnce(&mut Extension<'_>, &Batch<'_>) -> Result<T, Error>,
{
	let sizes: (u64, u64, u64);
	let res: Result<T, Error>;
	let rollback: bool;

	let head = batch.head().unwrap_or_else(|_| Tip::default());

	// create a child transaction so if the state is rolled back by itself,
	// all index saving can be undone
	let child_batch = batch.child()?;
	{
		trace!("Starting new txhashset extension.");

		let mut extension = Extension::new(trees, head);
		res = inner(&mut extension, &child_batch);

		rollback = extension.rollback;
		sizes = extension.sizes();
	}

	match res {
		Err(e) => {
			debug!("Error returned, discarding txhashset extension: {}", e);
			trees.output_pmmr_h.backend.discard();
			trees.rproof_pmmr_h.backend.discard();
			trees.kernel_pmmr_h.backend.discard();
			Err(e)
		}
		Ok(r) => {
			if rollback {
				trace!("Rollbacking txhashset extension. sizes {:?}", sizes);
				trees.output_pmmr_h.backend.discard();
				trees.rproof_pmmr_h.backend.discard();
				trees.kernel_pmmr_h.backend.discard();
			} else {
				trace!("Committing txhashset extension. sizes {:?}", sizes);
				child_batch.commit()?;
				trees.output_pmmr_h.backend.sync()?;
				trees.rproof_pmmr_h.backend.sync()?;
				trees.kernel_pmmr_h.backend.sync()?;
				trees.output_pmmr_h.size = sizes.0;
				trees.rproof_pmmr_h.size = sizes.1;
				trees.kernel_pmmr_h.size = sizes.2;
			}

			trace!("TxHashSet extension done.");
			Ok(r)
		}
	}
}

/// Start a new header MMR unit of work. This MMR tracks the candidate
/// header chain. This MMR can be extended individually beyond the other
/// (output, rangeproof and kernel) MMRs to allow headers to be validated
/// before we receive the full block data.
pub fn header_extending<'a, F, T>(
	trees: &'a mut TxHashSet,
	batch: &'a mut Batch<'_>,
	inner: F,
) -> Result<T, Error>
where
	F: FnOnce(&mut HeaderExtension<'_>, &Batch<'_>) -> Result<T, Error>,
{
	let size: u64;
	let res: Result<T, Error>;
	let rollback: bool;

	let head = batch.candidate_head().unwrap_or_else(|_| Tip::default());

	// create a child transaction so if the state is rolled back by itself,
	// all index saving can be undone
	let child_batch = batch.child()?;
	{
		trace!("Starting new txhashset header extension.");
		let pmmr = PMMR::at(&mut trees.header_pmmr_h.backend, trees.header_pmmr_h.size);
		let mut extension = HeaderExtension::new(pmmr, head);
		res = inner(&mut extension, &child_batch);

		rollback = extension.rollback;
		size = extension.size();
	}

	match res {
		Err(e) => {
			debug!(
				"Error returned, discarding txhashset header extension: {}",
				e
			);
			trees.header_pmmr_h.backend.discard();
			Err(e)
		}
		Ok(r) => {
			if rollback {
				trace!("Rollbacking txhashset header extension. size {:?}", size);
				trees.header_pmmr_h.backend.discard();
			} else {
				trace!("Committing txhashset header extension. size {:?}", size);
				child_batch.commit()?;
				trees.header_pmmr_h.backend.sync()?;
				trees.header_pmmr_h.size = size;
			}
			trace!("TxHashSet header extension done.");
			Ok(r)
		}
	}
}

/// Start a new sync MMR unit of work. This MMR tracks the sync_head. This
/// is used during header sync to validate batches of headers as they arrive
/// without needing to repeatedly rewind the header MMR that continues to
/// track the candidate chain as they diverge during sync.
pub fn sync_extending<'a, F, T>(
	trees: &'a mut TxHashSet,
	batch: &'a mut Batch<'_>,
	inner: F,
) -> Result<T, Error>
where
	F: FnOnce(&mut HeaderExtension<'_>, &Batch<'_>) -> Result<T, Error>,
{
	let size: u64;
	let res: Result<T, Error>;
	let rollback: bool;

	let head = batch.sync_head().unwrap_or_else(|_| Tip::default());

	let child_batch = batch.child()?;
	{
		trace!("Starting new txhashset sync_head extension.");
		let pmmr = PMMR::at(&mut trees.sync_pmmr_h.backend, trees.sync_pmmr_h.size);
		let mut extension = HeaderExtension::new(pmmr, head);
		res = inner(&mut extension, &child_batch);

		rollback = extension.rollback;
		size = extension.size();
	}

	match res {
		Err(e) => {
			debug!(
				"Error returned, discarding txhashset sync_head extension: {}",
				e
			);
			trees.sync_pmmr_h.backend.discard();
			Err(e)
		}
		Ok(r) => {
			if rollback {
				trace!("Rollbacking txhashset sync_head extension. size {:?}", size);
				trees.sync_pmmr_h.backend.discard();
			} else {
				trace!("Committing txhashset sync_head extension. size {:?}", size);
				child_batch.commit()?;
				trees.sync_pmmr_h.backend.sync()?;
				trees.sync_pmmr_h.size = size;
			}
			trace!("TxHashSet sync_head extension done.");
			Ok(r)
		}
	}
}

/// A header extension to allow the header MMR to extend beyond the other
/// MMRs individually. This is to allow headers to be validated against the
/// MMR before we have the full block data.
pub struct HeaderExtension<'a> {
	head: Tip,

	pmmr: PMMR<'a, BlockHeader, PMMRBackend<BlockHeader>>,

	/// Rollback flag.
	rollback: bool,
}

impl<'a> HeaderExtension<'a> {
	fn new(
		pmmr: PMMR<'a, BlockHeader, PMMRBackend<BlockHeader>>,
		head: Tip,
	) -> HeaderExtension<'a> {
		HeaderExtension {
			head,
			pmmr,
			rollback: false,
		}
	}

	/// The head representing the furthest extent of the current extension.
	pub fn head(&self) -> Tip {
		self.head
	}

	/// Get the header hash for the specified pos from the underlying MMR
	/// backend.
	pub fn get_header_hash(&self, pos: u64) -> Option<Hash> {
		self.pmmr.get_data(pos).map(|x| x.hash())
	}

	/// Force the rollback of this extension, no matter the result.
	pub fn force_rollback(&mut self) {
		self.rollback = true;
	}

	/// Apply a new header to the header MMR extension.
	/// This may be either the header MMR or the sync MMR depending on the
	/// extension.
	pub fn apply_header(&mut self, header: &BlockHeader) -> Result<(), Error> {
		self.pmmr
			.push(header)
			.map_err(&ErrorKind::TxHashSetErr)?;
		self.head = Tip::from_header(header);
		Ok(())
	}

	/// Rewind the header extension to the specified header.
	/// Note the close relationship between header height and insertion
	/// index.
	pub fn rewind(&mut self, header: &BlockHeader) -> Result<(), Error> {
		debug!(
			"Rewind header extension to {} at {}",
			header.hash(),
			header.height
		);

		let header_pos = pmmr::insertion_to_pmmr_index(header.height);
		self.pmmr
			.rewind(header_pos, &Bitmap::create())
			.map_err(&ErrorKind::TxHashSetErr)?;

		// Update our head to reflect the header we rewound to.
		self.head = Tip::from_header(header);

		Ok(())
	}

	/// Truncate the header MMR (rewind all the way back to pos 0).
	/// Used when rebuilding the header MMR by reapplying all headers
	/// including the genesis block header.
	pub fn truncate(&mut self) -> Result<(), Error> {
		debug!("Truncating header extension.");
		self.pmmr.truncate().map_err(&ErrorKind::TxHashSetErr)?;
		self.head = Tip::default();
		Ok(())
	}

	/// The size of the header MMR.
	pub fn size(&self) -> u64 {
		self.pmmr.unpruned_size()
	}

	/// The root of the header MMR for convenience.
	pub fn root(&self) -> Result<Hash, Error> {
		Ok(self.pmmr.root().map_err(|_| ErrorKind::InvalidRoot)?)
	}

	/// Validate the prev_root of the header against the root of the current
	/// header MMR.
	pub fn validate_root(&self, header: &BlockHeader) -> Result<(), Error> {
		// If we are validating the genesis block then we have no prev_root.
		// So we are done here.
		if header.height == 0 {
			return Ok(());
		}
		let root = self.root()?;
		if root != header.prev_root {
			Err(ErrorKind::InvalidRoot.into())
		} else {
			Ok(())
		}
	}
}

/// Allows the application of new blocks on top of the txhashset in a
/// reversible manner within a unit of work provided by the `extending`
/// function.
pub struct Extension<'a> {
	head: Tip,

	output_pmmr: PMMR<'a, Output, PMMRBackend<Output>>,
	rproof_pmmr: PMMR<'a, RangeProof, PMMRBackend<RangeProof>>,
	kernel_pmmr: PMMR<'a, TxKernel, PMMRBackend<TxKernel>>,

	/// Rollback flag.
	rollback: bool,
}

impl<'a> Committed for Extension<'a> {
	fn inputs_committed(&self) -> Vec<Commitment> {
		vec![]
	}

	fn outputs_committed(&self) -> Vec<Commitment> {
		let mut commitments = vec![];
		for pos in self.output_pmmr.leaf_pos_iter() {
			if let Some(out) = self.output_pmmr.get_data(pos) {
				commitments.push(out.commit);
			}
		}
		commitments
	}

	fn kernels_committed(&self) -> Vec<Commitment> {
		let mut commitments = vec![];
		for n in 0..self.kernel_pmmr.unpruned_size() {
			if pmmr::is_leaf(n) {
				if let Some(kernel) = self.kernel_pmmr.get_data(n) {
					commitments.push(kernel.excess());
				}
			}
		}
		commitments
	}
}

impl<'a> Extension<'a> {
	fn new(trees: &'a mut TxHashSet, head: Tip) -> Extension<'a> {
		Extension {
			head,
			output_pmmr: PMMR::at(&mut trees.output_pmmr_h.backend, trees.output_pmmr_h.size),
			rproof_pmmr: PMMR::at(&mut trees.rproof_pmmr_h.backend, trees.rproof_pmmr_h.size),
			kernel_pmmr: PMMR::at(&mut trees.kernel_pmmr_h.backend, trees.kernel_pmmr_h.size),
			rollback: false,
		}
	}

	/// The head representing the furthest extent of the current extension.
	pub fn head(&self) -> Tip {
		self.head
	}

	/// Build a view of the current UTXO set based on the output PMMR.
	pub fn utxo_view(&'a self) -> UTXOView<'a> {
		UTXOView::new(self.output_pmmr.readonly_pmmr())
	}

	/// Apply a new block to the current txhashet state.
	///
	/// Applies the following -
	///   * outputs
	///   * inputs
	///   * kernels
	///
	/// Returns the spent positions for the block inputs so the caller can
	/// index them.
	pub fn apply_block(&mut self, b: &Block, batch: &Batch<'_>) -> Result<Vec<CommitPos>, Error> {
		let mut affected_pos = vec![];

		// Apply the output to the output and rangeproof MMRs.
		// Add pos to affected_pos to update the accumulator later on.
		// Add the new output to the output_pos index.
		for out in b.outputs() {
			let pos = self.apply_output(out, batch)?;
			affected_pos.push(pos);
			batch.save_output_pos(
				&out.commitment(),
				CommitPos {
					pos,
					height: b.header.height,
				},
			)?;
		}

		// Remove the output from the output and rangeproof MMRs.
		// Keep track of the positions of the spent outputs.
		let mut spent = vec![];
		for input in b.inputs() {
			let spent_pos = self.apply_input(input, batch)?;
			spent.push(spent_pos);
		}
		batch.save_spent_index(&b.hash(), &spent)?;

		for kernel in b.kernels() {
			self.apply_kernel(kernel)?;
		}

		// Update the head of the extension to reflect the block we just
		// applied.
		self.head = Tip::from_header(&b.header);

		Ok(spent)
	}

	fn apply_input(
		&mut self,
		input: &crate::core::core::Input,
		batch: &Batch<'_>,
	) -> Result<CommitPos, Error> {
		let commit = input.commitment();
		if let Ok(cp) = batch.get_output_pos(&commit) {
			// First check this input corresponds to an existing entry in the
			// output MMR.
			if let Some(out) = self.output_pmmr.get_data(cp.pos) {
				if OutputIdentifier::from(input) != out {
					return Err(ErrorKind::TxHashSetErr("output pmmr mismatch".to_string()).into());
				}
			}

			// Now prune the output_pmmr, rproof_pmmr and their storage.
			// Input is not valid if we cannot prune successfully (to spend an
			// unspent output).
			match self.output_pmmr.prune(cp.pos) {
				Ok(true) => {
					self.rproof_pmmr
						.prune(cp.pos)
						.map_err(ErrorKind::TxHashSetErr)?;
					Ok(cp)
				}
				Ok(false) => Err(ErrorKind::AlreadySpent(commit).into()),
				Err(e) => Err(ErrorKind::TxHashSetErr(e).into()),
			}
		} else {
			Err(ErrorKind::AlreadySpent(commit).into())
		}
	}

	fn apply_output(&mut self, out: &Output, batch: &Batch<'_>) -> Result<u64, Error> {
		let commit = out.commitment();

		if let Ok(cp) = batch.get_output_pos(&commit) {
			if let Some(out_mmr) = self.output_pmmr.get_data(cp.pos) {
				if out_mmr.commitment() == commit {
					return Err(ErrorKind::DuplicateCommitment(commit).into());
				}
			}
		}
		// push the new output to the MMR.
		let output_pos = self
			.output_pmmr
			.push(out)
			.map_err(&ErrorKind::TxHashSetErr)?;

		// push the rangeproof to the MMR.
		let rproof_pos = self
			.rproof_pmmr
			.push(&out.proof)
			.map_err(&ErrorKind::TxHashSetErr)?;

		// The output and rproof MMRs should be exactly the same size
		// and we should have inserted to both in exactly the same pos.
		{
			if self.output_pmmr.unpruned_size() != self.rproof_pmmr.unpruned_size() {
				return Err(
					ErrorKind::Other("output vs rproof MMRs different sizes".to_string()).into(),
				);
			}

			if output_pos != rproof_pos {
				return Err(
					ErrorKind::Other("output vs rproof MMRs different pos".to_string()).into(),
				);
			}
		}

		Ok(output_pos)
	}

	/// Push kernel onto MMR (hash and data files).
	fn apply_kernel(&mut self, kernel: &TxKernel) -> Result<(), Error> {
		self.kernel_pmmr
			.push(kernel)
			.map_err(&ErrorKind::TxHashSetErr)?;
		Ok(())
	}

	/// Build a Merkle proof for the given output and the block
	/// this extension is currently referencing.
	/// Note: this relies on the MMR being stable even after pruning/compaction.
	/// We need the hash of each sibling pos from the pos up to the peak
	/// including the sibling leaf node which may have been removed.
	pub fn merkle_proof(
		&self,
		output: &OutputIdentifier,
		batch: &Batch<'_>,
	) -> Result<MerkleProof, Error> {
		debug!("txhashset: merkle_proof: output: {:?}", output.commit);
		// then calculate the Merkle Proof based on the known pos
		let pos = batch.get_output_pos(&output.commit)?.pos;
		let merkle_proof = self
			.output_pmmr
			.merkle_proof(pos)
			.map_err(&ErrorKind::TxHashSetErr)?;

		Ok(merkle_proof)
	}

	/// Saves a snapshot of the output and rangeproof MMRs to disk.
	/// Specifically - saves a snapshot of the utxo file, tagged with
	/// the block hash as filename suffix.
	/// Needed for fast-sync (utxo file needs to be rewound before sending
	/// across).
	pub fn snapshot(&mut self, batch: &Batch<'_>) -> Result<(), Error> {
		let header = batch.get_block_header(&self.head.last_block_h)?;
		self.output_pmmr
			.snapshot(&header.hash())
			.map_err(ErrorKind::Other)?;
		self.rproof_pmmr
			.snapshot(&header.hash())
			.map_err(ErrorKind::Other)?;
		Ok(())
	}

	/// Rewinds the MMRs to the provided block, rewinding to the last output
	/// pos and last kernel pos of that block.
	pub fn rewind(&mut self, header: &BlockHeader, batch: &Batch<'_>) -> Result<(), Error> {
		debug!("Rewind extension to {} at {}", header.hash(), header.height);

		// We need to build a bitmap of the leaf indices of all the outputs
		// spent by blocks being rewound, so the leaf bitmap can flag them
		// unspent again. We also undo the output position index and NRD
		// index for the rewound blocks.
		let head_header = batch.get_block_header(&self.head.last_block_h)?;

		let mut restore_leaves = Bitmap::create();
		let mut current = head_header;
		while current.height > header.height {
			let block = batch.get_block(&current.hash())?;
			self.undo_block_index(&block, batch, &mut restore_leaves)?;
			current = batch.get_previous_header(&current)?;
		}

		self.rewind_to_pos(
			header.output_mmr_size,
			header.kernel_mmr_size,
			&restore_leaves,
		)?;

		// Update our head to reflect the header we rewound to.
		self.head = Tip::from_header(header);

		Ok(())
	}

	// Undo the db index changes for a single rewound block: remove the
	// output_pos entries for its outputs, restore the entries for its
	// inputs (from the spent index) and drop its NRD kernel heights.
	// Accumulates the leaf indices of spent outputs to restore.
	fn undo_block_index(
		&self,
		block: &Block,
		batch: &Batch<'_>,
		restore_leaves: &mut Bitmap,
	) -> Result<(), Error> {
		for out in block.outputs() {
			batch.delete_output_pos(&out.commitment())?;
		}

		let spent = batch.get_spent_index(&block.hash()).unwrap_or_else(|_| vec![]);
		for (input, spent_pos) in block.inputs().iter().zip(spent.iter()) {
			batch.save_output_pos(&input.commitment(), *spent_pos)?;
			restore_leaves.add(pmmr::pmmr_pos_to_insertion_index(spent_pos.pos) as u32);
		}

		for kernel in block.kernels() {
			if let KernelFeatures::NoRecentDuplicate { .. } = kernel.features {
				batch.rewind_nrd_kernel_heights(
					&kernel.excess(),
					block.header.height.saturating_sub(1),
				)?;
			}
		}

		Ok(())
	}

	/// Rewind the MMRs to the provided sizes without touching the leaf
	/// bitmap or any db index. Only used when adopting a freshly imported
	/// txhashset whose files may run past the horizon header (the imported
	/// leaf bitmap is already the snapshot at that header).
	pub fn rewind_mmrs_to_sizes(
		&mut self,
		output_size: u64,
		kernel_size: u64,
	) -> Result<(), Error> {
		self.rewind_to_pos(output_size, kernel_size, &Bitmap::create())
	}

	/// Rewinds the MMRs to the provided positions, given the output and
	/// kernel MMR sizes we want to rewind to.
	fn rewind_to_pos(
		&mut self,
		output_size: u64,
		kernel_size: u64,
		restore_leaves: &Bitmap,
	) -> Result<(), Error> {
		debug!(
			"txhashset: rewind_to_pos: output {}, kernel {}",
			output_size, kernel_size,
		);

		// The rewind API expects the last leaf position to keep; a zero
		// size (e.g. a genesis block with an empty body) truncates the MMR
		// entirely.
		if output_size == 0 {
			self.output_pmmr
				.truncate()
				.map_err(&ErrorKind::TxHashSetErr)?;
			self.rproof_pmmr
				.truncate()
				.map_err(&ErrorKind::TxHashSetErr)?;
		} else {
			self.output_pmmr
				.rewind(last_leaf_pos(output_size), restore_leaves)
				.map_err(&ErrorKind::TxHashSetErr)?;
			self.rproof_pmmr
				.rewind(last_leaf_pos(output_size), restore_leaves)
				.map_err(&ErrorKind::TxHashSetErr)?;
		}
		if kernel_size == 0 {
			self.kernel_pmmr
				.truncate()
				.map_err(&ErrorKind::TxHashSetErr)?;
		} else {
			self.kernel_pmmr
				.rewind(last_leaf_pos(kernel_size), &Bitmap::create())
				.map_err(&ErrorKind::TxHashSetErr)?;
		}
		Ok(())
	}

	/// Current root hashes and sums (if applicable) for the Output, range
	/// proof and kernel MMRs.
	pub fn roots(&self) -> Result<TxHashSetRoots, Error> {
		Ok(TxHashSetRoots {
			output_root: self
				.output_pmmr
				.root()
				.map_err(|_| ErrorKind::InvalidRoot)?,
			rproof_root: self
				.rproof_pmmr
				.root()
				.map_err(|_| ErrorKind::InvalidRoot)?,
			kernel_root: self
				.kernel_pmmr
				.root()
				.map_err(|_| ErrorKind::InvalidRoot)?,
		})
	}

	/// Validate the MMR roots against the latest header applied.
	pub fn validate_roots(&self, header: &BlockHeader) -> Result<(), Error> {
		if header.height == 0 {
			return Ok(());
		}
		self.roots()?.validate(header)
	}

	/// Validate the output, rangeproof and kernel MMR sizes against the
	/// block header.
	pub fn validate_sizes(&self, header: &BlockHeader) -> Result<(), Error> {
		if header.height == 0 {
			return Ok(());
		}
		let (output_mmr_size, rproof_mmr_size, kernel_mmr_size) = self.sizes();
		if output_mmr_size != header.output_mmr_size
			|| kernel_mmr_size != header.kernel_mmr_size
		{
			Err(ErrorKind::InvalidMMRSize.into())
		} else if output_mmr_size != rproof_mmr_size {
			Err(ErrorKind::InvalidMMRSize.into())
		} else {
			Ok(())
		}
	}

	fn validate_mmrs(&self) -> Result<(), Error> {
		let now = Instant::now();

		// validate all hashes and sums within the trees
		if let Err(e) = self.output_pmmr.validate() {
			return Err(ErrorKind::InvalidTxHashSet(e).into());
		}
		if let Err(e) = self.rproof_pmmr.validate() {
			return Err(ErrorKind::InvalidTxHashSet(e).into());
		}
		if let Err(e) = self.kernel_pmmr.validate() {
			return Err(ErrorKind::InvalidTxHashSet(e).into());
		}

		debug!(
			"txhashset: validated the output {}, rproof {}, kernel {} mmrs, took {}s",
			self.output_pmmr.unpruned_size(),
			self.rproof_pmmr.unpruned_size(),
			self.kernel_pmmr.unpruned_size(),
			now.elapsed().as_secs(),
		);

		Ok(())
	}

	/// Force the rollback of this extension, no matter the result
	pub fn force_rollback(&mut self) {
		self.rollback = true;
	}

	/// Sizes of each of the MMRs.
	pub fn sizes(&self) -> (u64, u64, u64) {
		(
			self.output_pmmr.unpruned_size(),
			self.rproof_pmmr.unpruned_size(),
			self.kernel_pmmr.unpruned_size(),
		)
	}

	/// Validate full kernel sums against the provided header (for overage
	/// and kernel_offset). This is an expensive operation as we need to
	/// retrieve all the UTXOs and kernels from the respective MMRs.
	/// For a significantly faster way of validating full kernel sums see
	/// BlockSums.
	pub fn validate_kernel_sums(
		&self,
		header: &BlockHeader,
		genesis_had_reward: bool,
		secp: &Secp256k1,
	) -> Result<(Commitment, Commitment), Error> {
		let now = Instant::now();

		let (utxo_sum, kernel_sum) = self.verify_kernel_sums(
			header.total_overage(genesis_had_reward),
			header.total_kernel_offset(),
			secp,
		)?;

		debug!(
			"txhashset: validated total kernel sums, took {}s",
			now.elapsed().as_secs(),
		);

		Ok((utxo_sum, kernel_sum))
	}

	/// Validate the txhashset state against the provided header.
	/// A "fast validation" will skip rangeproof verification and kernel
	/// signature verification.
	pub fn validate(
		&self,
		header: &BlockHeader,
		genesis_had_reward: bool,
		fast_validation: bool,
		status: &dyn TxHashsetWriteStatus,
		secp: &Secp256k1,
	) -> Result<(Commitment, Commitment), Error> {
		self.validate_mmrs()?;
		self.validate_roots(header)?;
		self.validate_sizes(header)?;

		if header.height == 0 {
			let zero_commit = secp.commit_value(0)?;
			return Ok((zero_commit, zero_commit));
		}

		// The real magicking happens here. Sum of kernel excesses should
		// equal sum of unspent outputs minus total supply.
		let (output_sum, kernel_sum) =
			self.validate_kernel_sums(header, genesis_had_reward, secp)?;

		// These are expensive verification step (skipped for "fast
		// validation").
		if !fast_validation {
			// Verify the rangeproof associated with each unspent output.
			self.verify_rangeproofs(status, secp)?;

			// Verify all the kernel signatures.
			self.verify_kernel_signatures(status, secp)?;
		}

		Ok((output_sum, kernel_sum))
	}

	/// Rebuild the index of MMR positions to the corresponding UTXOs.
	/// This is a costly operation performed only when we receive a full new
	/// chain state.
	pub fn rebuild_index(&self, batch: &Batch<'_>) -> Result<(), Error> {
		let now = Instant::now();

		batch.clear_output_pos()?;

		let mut count = 0;
		for pos in self.output_pmmr.leaf_pos_iter() {
			if let Some(out) = self.output_pmmr.get_data(pos) {
				// the leaf's creation height is not directly known here; it
				// is repopulated lazily as blocks reference the outputs.
				// Use the header height for the rebuilt horizon state.
				batch.save_output_pos(
					&out.commit,
					CommitPos {
						pos,
						height: self.head.height,
					},
				)?;
				count += 1;
			}
		}

		debug!(
			"txhashset: rebuild_index: {} UTXOs, took {}s",
			count,
			now.elapsed().as_secs(),
		);

		Ok(())
	}

	fn verify_kernel_signatures(
		&self,
		status: &dyn TxHashsetWriteStatus,
		secp: &Secp256k1,
	) -> Result<(), Error> {
		let now = Instant::now();

		let mut kernels = Vec::with_capacity(VERIFY_CHUNK_SIZE);
		let mut kern_count = 0;
		let total_kernels = pmmr::n_leaves(self.kernel_pmmr.unpruned_size());
		for n in 0..self.kernel_pmmr.unpruned_size() {
			if pmmr::is_leaf(n) {
				let kernel = self
					.kernel_pmmr
					.get_data(n)
					.ok_or_else(|| ErrorKind::TxKernelNotFound)?;
				kernels.push(kernel);

				if kernels.len() >= VERIFY_CHUNK_SIZE {
					TxKernel::batch_sig_verify(&kernels, secp)?;
					kern_count += kernels.len() as u64;
					kernels.clear();
					status.on_validation_kernels(kern_count, total_kernels);
					debug!(
						"txhashset: verify_kernel_signatures: verified {} signatures",
						kern_count,
					);
				}
			}
		}

		if !kernels.is_empty() {
			TxKernel::batch_sig_verify(&kernels, secp)?;
			kern_count += kernels.len() as u64;
		}

		debug!(
			"txhashset: verified {} kernel signatures, pmmr size {}, took {}s",
			kern_count,
			self.kernel_pmmr.unpruned_size(),
			now.elapsed().as_secs(),
		);

		Ok(())
	}

	fn verify_rangeproofs(
		&self,
		status: &dyn TxHashsetWriteStatus,
		secp: &Secp256k1,
	) -> Result<(), Error> {
		let now = Instant::now();

		let mut commits: Vec<Commitment> = Vec::with_capacity(VERIFY_CHUNK_SIZE);
		let mut proofs: Vec<RangeProof> = Vec::with_capacity(VERIFY_CHUNK_SIZE);

		let mut proof_count = 0;
		let total_rproofs = self.output_pmmr.n_unpruned_leaves();
		for pos in self.output_pmmr.leaf_pos_iter() {
			let output = self.output_pmmr.get_data(pos);
			let proof = self.rproof_pmmr.get_data(pos);

			// Output and corresponding rangeproof *must* exist.
			// It is invalid for either to be missing and we fail immediately
			// in this case.
			match (output, proof) {
				(None, _) => return Err(ErrorKind::OutputNotFound.into()),
				(_, None) => return Err(ErrorKind::RangeproofNotFound.into()),
				(Some(output), Some(proof)) => {
					commits.push(output.commit);
					proofs.push(proof);
				}
			}

			proof_count += 1;

			if proofs.len() >= VERIFY_CHUNK_SIZE {
				Output::batch_verify_proofs(&commits, &proofs, secp)?;
				commits.clear();
				proofs.clear();
				debug!(
					"txhashset: verify_rangeproofs: verified {} rangeproofs",
					proof_count,
				);
				status.on_validation_rproofs(proof_count, total_rproofs);
			}
		}

		// remaining part which not full of VERIFY_CHUNK_SIZE range proofs
		if !proofs.is_empty() {
			Output::batch_verify_proofs(&commits, &proofs, secp)?;
			commits.clear();
			proofs.clear();
			debug!(
				"txhashset: verify_rangeproofs: verified {} rangeproofs",
				proof_count,
			);
		}

		debug!(
			"txhashset: verified {} rangeproofs, pmmr size {}, took {}s",
			proof_count,
			self.rproof_pmmr.unpruned_size(),
			now.elapsed().as_secs(),
		);
		Ok(())
	}
}

// The last leaf position within an MMR of the given size.
fn last_leaf_pos(size: u64) -> u64 {
	let mut pos = size - 1;
	while !pmmr::is_leaf(pos) {
		pos -= 1;
	}
	pos
}

/// Packages the txhashset data files into a zip and returns a Read to the
/// resulting file
pub fn zip_read(root_dir: String, header: &BlockHeader) -> Result<File, Error> {
	let txhashset_zip = format!("{}_{}.zip", TXHASHSET_ZIP, header.hash().to_string());

	let txhashset_path = Path::new(&root_dir).join(TXHASHSET_SUBDIR);
	let zip_path = Path::new(&root_dir).join(txhashset_zip);

	// if file exist, just re-use it
	let zip_file = File::open(zip_path.clone());
	if let Ok(zip) = zip_file {
		return Ok(zip);
	}

	// otherwise, create the zip archive
	let path_to_be_cleanup = {
		// Temp txhashset directory
		let temp_txhashset_path = Path::new(&root_dir).join(format!(
			"{}_zip_{}",
			TXHASHSET_SUBDIR,
			header.hash().to_string()
		));
		// Remove temp dir if it exist
		if temp_txhashset_path.exists() {
			fs::remove_dir_all(&temp_txhashset_path)?;
		}
		// Copy file to another dir
		file::copy_dir_to(&txhashset_path, &temp_txhashset_path)?;

		let zip_file = File::create(zip_path.clone())?;

		// Explicit list of files to add to our zip archive.
		let files = file_list(header);

		zip::create_zip(&zip_file, &temp_txhashset_path, files)?;

		temp_txhashset_path
	};

	// open it again to read it back
	let zip_file = File::open(zip_path.clone())?;

	// clean-up temp txhashset directory.
	if let Err(e) = fs::remove_dir_all(&path_to_be_cleanup) {
		warn!(
			"txhashset zip file: {:?} fail to remove, err: {}",
			zip_path.to_str(),
			e
		);
	}
	Ok(zip_file)
}

// Explicit list of files to extract from our zip archive.
// We include *only* these files when building the txhashset zip.
// We extract *only* these files when receiving a txhashset zip.
// Everything else will be safely ignored.
// Return Vec<PathBuf> as some of these are dynamic (specifically the
// "rewound" leaf files).
fn file_list(header: &BlockHeader) -> Vec<PathBuf> {
	vec![
		// kernel MMR
		PathBuf::from("kernel/pmmr_data.bin"),
		PathBuf::from("kernel/pmmr_hash.bin"),
		PathBuf::from("kernel/pmmr_size.bin"),
		// output MMR
		PathBuf::from("output/pmmr_data.bin"),
		PathBuf::from("output/pmmr_hash.bin"),
		PathBuf::from("output/pmmr_prun.bin"),
		// rangeproof MMR
		PathBuf::from("rangeproof/pmmr_data.bin"),
		PathBuf::from("rangeproof/pmmr_hash.bin"),
		PathBuf::from("rangeproof/pmmr_size.bin"),
		PathBuf::from("rangeproof/pmmr_prun.bin"),
		// Header specific "rewound" leaf files for output and rangeproof
		// MMR.
		PathBuf::from(format!("output/pmmr_leaf.bin.{}", header.hash().to_hex())),
		PathBuf::from(format!(
			"rangeproof/pmmr_leaf.bin.{}",
			header.hash().to_hex()
		)),
	]
}

/// Extract the txhashset data from a zip file and writes the content into
/// the txhashset storage dir.
pub fn zip_write(
	root_dir: PathBuf,
	txhashset_data: File,
	header: &BlockHeader,
) -> Result<(), Error> {
	debug!("zip_write on path: {:?}", root_dir);
	let txhashset_path = root_dir.join(TXHASHSET_SUBDIR);
	fs::create_dir_all(&txhashset_path)?;

	// Explicit list of files to extract from our zip archive.
	let files = file_list(header);

	// We expect to see *exactly* the paths listed above.
	// No attempt is made to be permissive or forgiving with "alternative"
	// paths. These are the *only* files we will attempt to extract from the
	// zip file. If any of these are missing we will attempt to continue as
	// some are potentially optional.
	zip::extract_files(txhashset_data, &txhashset_path, files)?;

	// Rename the "rewound" leaf files to their plain names so the backends
	// pick them up on open.
	for dir in &[OUTPUT_SUBDIR, RANGE_PROOF_SUBDIR] {
		let from = txhashset_path
			.join(dir)
			.join(format!("pmmr_leaf.bin.{}", header.hash().to_hex()));
		let to = txhashset_path.join(dir).join("pmmr_leaf.bin");
		if from.exists() {
			if to.exists() {
				fs::remove_file(&to)?;
			}
			fs::rename(from, to)?;
		}
	}

	Ok(())
}

/// Overwrite txhashset folder in "to" folder with "from" folder
pub fn txhashset_replace(from: PathBuf, to: PathBuf) -> Result<(), Error> {
	debug!("txhashset_replace: move from {:?} to {:?}", from, to);

	// clean the 'to' folder firstly
	clean_txhashset_folder(&to);

	// rename the 'from' folder as the 'to' folder
	if let Err(e) = fs::rename(from.join(TXHASHSET_SUBDIR), to.join(TXHASHSET_SUBDIR)) {
		error!("txhashset_replace fail on {}. err: {}", TXHASHSET_SUBDIR, e);
		Err(ErrorKind::TxHashSetErr("txhashset replacing fail".to_string()).into())
	} else {
		Ok(())
	}
}

/// Clean the txhashset folder
pub fn clean_txhashset_folder(root_dir: &PathBuf) {
	let txhashset_path = root_dir.join(TXHASHSET_SUBDIR);
	if txhashset_path.exists() {
		if let Err(e) = fs::remove_dir_all(txhashset_path.clone()) {
			warn!(
				"clean_txhashset_folder: fail on {:?}. err: {}",
				txhashset_path, e
			);
		}
	}
}

/// Given a block header to compact to and the block header at the head of
/// the current chain, we need to calculate the leaf indices of all the
/// outputs spent by blocks above the horizon, so those spends are protected
/// from compaction (they could still be un-spent by a rewind).
pub fn input_leaves_to_protect(
	horizon_header: &BlockHeader,
	head_header: &BlockHeader,
	batch: &Batch<'_>,
) -> Result<Bitmap, Error> {
	if head_header.height < horizon_header.height {
		debug!(
			"input_leaves_to_protect: {} < {}, nothing to do",
			head_header.height, horizon_header.height
		);
		return Ok(Bitmap::create());
	}

	let mut bitmap = Bitmap::create();
	let mut current = head_header.clone();
	while current.hash() != horizon_header.hash() {
		if current.height < 1 {
			break;
		}

		if let Ok(spent) = batch.get_spent_index(&current.hash()) {
			for cp in spent {
				bitmap.add(pmmr::pmmr_pos_to_insertion_index(cp.pos) as u32);
			}
		}
		current = batch.get_previous_header(&current)?;
	}

	Ok(bitmap)
}
