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

//! Facade and handler for the blockchain block processing pipeline. Maintains
//! the candidate header chain, the confirmed block chain and the sync chain
//! over a shared set of block indices, and orchestrates every state change
//! as a single batch across the block DB, the txhashset and the chain files.

use crate::core::consensus;
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::merkle_proof::MerkleProof;
use crate::core::core::verifier_cache::VerifierCache;
use crate::core::core::{
	Block, BlockHeader, BlockSums, Committed, OutputIdentifier, Transaction,
};
use crate::core::pow;
use crate::error::{Error, ErrorKind};
use crate::pipe;
use crate::store::{BlockIndex, ChainStore, DifficultyIter, NamedChains};
use crate::txhashset::{self, TxHashSet};
use crate::types::{
	BlockStatus, ChainAdapter, CommitPos, Options, Tip, TxHashsetWriteStatus,
};
use crate::util::secp::pedersen::{Commitment, RangeProof};
use crate::util::secp::Secp256k1;
use crate::util::{Mutex, RwLock, StopState};
use chrono::prelude::{DateTime, Utc};
use chrono::Duration;
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

/// Orphan pool size is limited by MAX_ORPHAN_SIZE
pub const MAX_ORPHAN_SIZE: usize = 200;

/// When evicting, very old orphans are evicted first
const MAX_ORPHAN_AGE_SECS: i64 = 300;

#[derive(Debug, Clone)]
struct Orphan {
	block: Block,
	opts: Options,
	added: DateTime<Utc>,
}

/// Contains the information about the blocks that we could not process yet
/// because their parent is missing, with bounded capacity and age based
/// eviction.
pub struct OrphanBlockPool {
	// blocks indexed by their hash
	orphans: RwLock<HashMap<Hash, Orphan>>,
	// additional index of height -> hash
	// so we can efficiently identify a child block (ex-orphan) after processing a block
	height_idx: RwLock<HashMap<u64, Vec<Hash>>>,
}

impl OrphanBlockPool {
	fn new() -> OrphanBlockPool {
		OrphanBlockPool {
			orphans: RwLock::new(HashMap::new()),
			height_idx: RwLock::new(HashMap::new()),
		}
	}

	fn len(&self) -> usize {
		self.orphans.read().len()
	}

	fn add(&self, orphan: Orphan) {
		{
			let mut orphans = self.orphans.write();
			let mut height_idx = self.height_idx.write();

			let height_hashes = height_idx
				.entry(orphan.block.header.height)
				.or_insert_with(|| vec![]);
			height_hashes.push(orphan.block.hash());
			orphans.insert(orphan.block.hash(), orphan);
		}

		if self.len() > MAX_ORPHAN_SIZE {
			self.evict();
		}
	}

	fn evict(&self) {
		let mut orphans = self.orphans.write();
		let mut height_idx = self.height_idx.write();

		// Evict aged out orphans first, then the lowest height ones.
		let horizon = crate::types::now_utc() - Duration::seconds(MAX_ORPHAN_AGE_SECS);
		orphans.retain(|_, x| x.added > horizon);

		while orphans.len() > MAX_ORPHAN_SIZE {
			let min_height = match orphans.values().map(|x| x.block.header.height).min() {
				Some(h) => h,
				None => break,
			};
			let hashes: Vec<Hash> = orphans
				.values()
				.filter(|x| x.block.header.height == min_height)
				.map(|x| x.block.hash())
				.collect();
			for h in hashes {
				orphans.remove(&h);
			}
		}

		height_idx.retain(|_, hashes| hashes.iter().any(|x| orphans.contains_key(x)));
	}

	/// Is the block hash in the orphan pool?
	pub fn contains(&self, hash: &Hash) -> bool {
		self.orphans.read().contains_key(hash)
	}

	fn remove_by_height(&self, height: u64) -> Vec<Orphan> {
		let mut orphans = self.orphans.write();
		let mut height_idx = self.height_idx.write();
		height_idx
			.remove(&height)
			.map(|hs| hs.iter().filter_map(|h| orphans.remove(h)).collect())
			.unwrap_or_else(|| vec![])
	}
}

/// Facade to the blockchain block processing pipeline and storage. Provides
/// the current view of the UTXO set according to the chain state. Also
/// maintains locking for the pipeline to avoid conflicting processing.
pub struct Chain {
	db_root: String,
	store: Arc<ChainStore>,
	adapter: Arc<dyn ChainAdapter + Send + Sync>,
	orphans: Arc<OrphanBlockPool>,
	txhashset: Arc<RwLock<TxHashSet>>,
	verifier_cache: Arc<RwLock<dyn VerifierCache>>,
	pow_verifier: fn(&BlockHeader) -> Result<(), pow::Error>,
	genesis: BlockHeader,
	secp: Arc<Mutex<Secp256k1>>,
	coinbase_maturity: u64,
	archive_mode: bool,
	stop_state: StopState,
}

impl Chain {
	/// Initializes the blockchain and returns a new Chain instance. Does a
	/// check on the current chain head to make sure it exists and creates one
	/// based on the genesis block if necessary.
	pub fn init(
		db_root: String,
		adapter: Arc<dyn ChainAdapter + Send + Sync>,
		genesis: Block,
		pow_verifier: fn(&BlockHeader) -> Result<(), pow::Error>,
		verifier_cache: Arc<RwLock<dyn VerifierCache>>,
		secp: Arc<Mutex<Secp256k1>>,
		coinbase_maturity: u64,
		archive_mode: bool,
		stop_state: StopState,
	) -> Result<Chain, Error> {
		let store = Arc::new(ChainStore::new(&db_root)?);

		let mut txhashset = TxHashSet::open(&db_root, store.clone())?;

		setup_head(&genesis, &store, &mut txhashset, &secp)?;

		let head = store.head()?;
		debug!(
			"init: head: {} @ {} [{}]",
			head.total_difficulty.to_num(),
			head.height,
			head.last_block_h
		);

		Ok(Chain {
			db_root,
			store,
			adapter,
			orphans: Arc::new(OrphanBlockPool::new()),
			txhashset: Arc::new(RwLock::new(txhashset)),
			verifier_cache,
			pow_verifier,
			genesis: genesis.header,
			secp,
			coinbase_maturity,
			archive_mode,
			stop_state,
		})
	}

	/// Shared store instance.
	pub fn store(&self) -> Arc<ChainStore> {
		self.store.clone()
	}

	/// The secp context used by this chain for all validation.
	pub fn secp(&self) -> Arc<Mutex<Secp256k1>> {
		self.secp.clone()
	}

	/// Shared txhashset instance.
	pub fn txhashset(&self) -> Arc<RwLock<TxHashSet>> {
		self.txhashset.clone()
	}

	/// The genesis header this chain was initialized with.
	pub fn genesis(&self) -> &BlockHeader {
		&self.genesis
	}

	fn new_ctx(&self, opts: Options) -> pipe::BlockContext {
		pipe::BlockContext {
			opts,
			pow_verifier: self.pow_verifier,
			verifier_cache: self.verifier_cache.clone(),
			coinbase_maturity: self.coinbase_maturity,
			secp: self.secp.clone(),
		}
	}

	/// Attempt to add a new block to the chain.
	/// Returns true if it has been added to the longest chain
	/// or false if it has added to a fork (or orphan?).
	pub fn process_block(&self, b: Block, opts: Options) -> Result<Option<Tip>, Error> {
		let (maybe_new_head, prev_head, fork_height) = self.process_block_single(&b, opts)?;

		let status = block_status(&maybe_new_head, &prev_head, fork_height);
		self.adapter.block_accepted(&b, status, opts);

		// We accepted a block, so see if we can accept any orphans
		self.check_orphans(b.header.height + 1);

		Ok(maybe_new_head)
	}

	fn process_block_single(
		&self,
		b: &Block,
		opts: Options,
	) -> Result<(Option<Tip>, Tip, u64), Error> {
		// Process the header first.
		// If invalid then fail early.
		// If valid then continue with block processing with header_head committed to db etc.
		let mut txhashset = self.txhashset.write();
		let mut chains = self.store.chains().write();
		let mut batch = self.store.batch()?;

		let prev_head = batch.head()?;

		// Check if we know about the previous block. If not, add this block
		// to the orphan pool and request its parent through the adapter.
		if !batch.block_exists(&b.header.prev_hash)? && b.header.height > 0 {
			let block_hash = b.hash();
			let orphan = Orphan {
				block: b.clone(),
				opts,
				added: crate::types::now_utc(),
			};

			self.orphans.add(orphan);

			debug!(
				"process_block: orphan: {:?}, # orphans {}",
				block_hash,
				self.orphans.len(),
			);
			return Err(ErrorKind::Orphan.into());
		}

		let ctx = self.new_ctx(opts);

		let (fork_point, fork_hashes) = fork_info(b, &batch, &chains)?;

		let res = pipe::process_block(
			b,
			&ctx,
			&mut txhashset,
			&mut batch,
			&fork_point,
			&fork_hashes,
		);

		match res {
			Ok(head) => {
				// Update the candidate header MMR and chain before committing
				// if this block also extends our best header chain (the
				// candidate chain can legitimately be ahead during sync).
				if head.is_some() {
					let candidate_head = batch.candidate_head()?;
					if b.header.total_difficulty() > candidate_head.total_difficulty {
						self.update_candidate_chain(
							&b.header,
							&mut txhashset,
							&mut chains,
							&mut batch,
						)?;
					}
				}

				batch.commit()?;

				// Now reflect the new head in the confirmed chain file.
				if let Some(tip) = head {
					chains.confirmed.rewind(fork_point.height);
					let mut height = fork_point.height;
					for h in &fork_hashes {
						height += 1;
						let index = chains.get_or_create_index(*h, height);
						chains.confirmed.append(index)?;
					}
					let index = chains.get_or_create_index(b.hash(), tip.height);
					chains.confirmed.append(index)?;
				}
				chains.commit()?;

				Ok((head, prev_head, fork_point.height))
			}
			Err(e) => {
				chains.rollback()?;
				Err(e)
			}
		}
	}

	/// Process a block header received during "header first" propagation.
	pub fn process_block_header(&self, bh: &BlockHeader, opts: Options) -> Result<(), Error> {
		let mut txhashset = self.txhashset.write();
		let mut chains = self.store.chains().write();
		let mut batch = self.store.batch()?;

		let ctx = self.new_ctx(opts);
		let res = (|| -> Result<(), Error> {
			pipe::process_block_header(bh, &ctx, &batch)?;
			batch.save_block_header(bh)?;

			let candidate_head = batch.candidate_head()?;
			if bh.total_difficulty() > candidate_head.total_difficulty {
				self.update_candidate_chain(bh, &mut txhashset, &mut chains, &mut batch)?;
			}
			Ok(())
		})();

		match res {
			Ok(()) => {
				batch.commit()?;
				chains.commit()?;
				Ok(())
			}
			Err(e) => {
				chains.rollback()?;
				Err(e)
			}
		}
	}

	/// Attempt to add new headers to the sync header chain. This is only
	/// ever used during sync and is based on sync_head.
	pub fn sync_block_headers(&self, headers: &[BlockHeader], opts: Options) -> Result<(), Error> {
		let mut txhashset = self.txhashset.write();
		let mut chains = self.store.chains().write();
		let mut batch = self.store.batch()?;

		if headers.is_empty() {
			return Ok(());
		}

		let ctx = self.new_ctx(opts);

		let res = (|| -> Result<(), Error> {
			// Validate each header against its previous, all previous
			// headers must be known (the first connects to the sync chain).
			for header in headers {
				let prev = batch
					.get_block_header(&header.prev_hash)
					.map_err(|_| Error::from(ErrorKind::Orphan))?;
				pipe::validate_header_solo(header, &prev, &ctx, &batch)?;
				batch.save_block_header(header)?;
			}

			// Now apply the headers to the sync MMR and the sync chain. We
			// rewind to the most recent ancestor actually on the sync chain,
			// pulling any intermediate (already known) headers into the
			// batch to apply so the chain stays contiguous.
			let first = headers.first().expect("non-empty headers");
			let mut all_headers = headers.to_vec();
			let mut fork_header = batch.get_block_header(&first.prev_hash)?;
			while fork_header.height > 0
				&& !chains.sync.is_on_chain(fork_header.height, fork_header.hash())
			{
				all_headers.insert(0, fork_header.clone());
				fork_header = batch.get_previous_header(&fork_header)?;
			}

			txhashset::sync_extending(&mut txhashset, &mut batch, |ext, child_batch| {
				// re-orging the sync chain, rewind to the fork point first
				if ext.size() > 0 && ext.head().last_block_h != fork_header.hash() {
					ext.rewind(&fork_header)?;
				}
				for header in &all_headers {
					ext.apply_header(header)?;
				}
				child_batch.save_sync_head(&Tip::from_header(
					all_headers.last().expect("non-empty headers"),
				))?;
				Ok(())
			})?;

			// Mirror the new state in the sync chain file.
			chains.sync.rewind(fork_header.height);
			for header in &all_headers {
				let index = chains.get_or_create_index(header.hash(), header.height);
				chains.sync.append(index)?;
			}

			// If the sync chain now carries more work than the candidate
			// chain, adopt it as the candidate chain as well.
			let candidate_head = batch.candidate_head()?;
			let last = headers.last().expect("non-empty headers");
			if last.total_difficulty() > candidate_head.total_difficulty {
				self.update_candidate_chain(last, &mut txhashset, &mut chains, &mut batch)?;
			}

			Ok(())
		})();

		match res {
			Ok(()) => {
				batch.commit()?;
				chains.commit()?;
				Ok(())
			}
			Err(e) => {
				chains.rollback()?;
				Err(e)
			}
		}
	}

	// Extend (rewinding as necessary) the candidate header MMR and chain
	// file with the chain of headers ending in `header`. Validates each
	// header's prev_root commitment against the MMR along the way.
	fn update_candidate_chain(
		&self,
		header: &BlockHeader,
		txhashset: &mut TxHashSet,
		chains: &mut NamedChains,
		batch: &mut crate::store::Batch<'_>,
	) -> Result<(), Error> {
		// Walk back from the header until we are on the candidate chain.
		let mut fork_headers = vec![header.clone()];
		let mut current = batch.get_block_header(&header.prev_hash);
		loop {
			match current {
				Ok(h) => {
					if chains.candidate.is_on_chain(h.height, h.hash()) {
						break;
					}
					let prev = batch.get_block_header(&h.prev_hash);
					fork_headers.push(h);
					current = prev;
				}
				Err(_) => {
					// walked all the way back to (and past) the genesis
					break;
				}
			}
		}
		fork_headers.reverse();

		let fork_header = match fork_headers.first() {
			Some(first) => batch.get_block_header(&first.prev_hash)?,
			None => return Ok(()),
		};

		txhashset::header_extending(txhashset, batch, |ext, child_batch| {
			if ext.size() > 0 && ext.head().last_block_h != fork_header.hash() {
				ext.rewind(&fork_header)?;
			}
			for h in &fork_headers {
				// each header must commit to the root of the header MMR of
				// all headers before it
				ext.validate_root(h)?;
				ext.apply_header(h)?;
			}
			child_batch.save_candidate_head(&Tip::from_header(header))?;
			Ok(())
		})?;

		chains.candidate.rewind(fork_header.height);
		for h in &fork_headers {
			let index = chains.get_or_create_index(h.hash(), h.height);
			chains.candidate.append(index)?;
		}

		Ok(())
	}

	/// Check if hash is for a known orphan.
	pub fn is_orphan(&self, hash: &Hash) -> bool {
		self.orphans.contains(hash)
	}

	/// Get the OrphanBlockPool accumulated evidence.
	pub fn orphans_len(&self) -> usize {
		self.orphans.len()
	}

	/// Check for orphans, once a block is successfully added.
	pub fn check_orphans(&self, mut height: u64) {
		// Is there an orphan in our orphans that we can now process?
		loop {
			trace!("check_orphans: at {}, # orphans {}", height, self.orphans.len());

			let orphans = self.orphans.remove_by_height(height);
			if orphans.is_empty() {
				break;
			}

			let mut processed = 0;
			for orphan in orphans {
				debug!("check_orphans: processing orphan {}", orphan.block.hash());
				if let Ok((head, prev_head, fork_height)) =
					self.process_block_single(&orphan.block, orphan.opts)
				{
					let status = block_status(&head, &prev_head, fork_height);
					self.adapter
						.block_accepted(&orphan.block, status, orphan.opts);
					if head.is_some() {
						processed += 1;
					}
				}
			}
			if processed == 0 {
				break;
			}
			height += 1;

			if self.stop_state.is_stopped() {
				break;
			}
		}
	}

	/// For the given commitment find the unspent output and return the
	/// associated Return an error if the output does not exist or has been
	/// spent. This querying is done in a way that is consistent with the
	/// current chain state, specifically the current winning (valid, most
	/// work) fork.
	pub fn get_unspent(&self, output_ref: &OutputIdentifier) -> Result<Option<CommitPos>, Error> {
		self.txhashset.read().get_unspent(output_ref)
	}

	/// Validate the tx against the current UTXO set and the coinbase
	/// maturity rule.
	pub fn validate_tx(&self, tx: &Transaction) -> Result<(), Error> {
		let txhashset = self.txhashset.read();
		txhashset::utxo_view(&txhashset, |utxo, batch| {
			utxo.validate_tx(tx, batch)?;
			let height = self.next_block_height()?;
			for input in tx.inputs() {
				utxo.verify_coinbase_maturity(input, height, self.coinbase_maturity, batch)?;
			}
			Ok(())
		})
	}

	/// Verify we are not attempting to spend a coinbase output
	/// that has not yet sufficiently matured.
	pub fn verify_coinbase_maturity(&self, tx: &Transaction) -> Result<(), Error> {
		let height = self.next_block_height()?;
		let txhashset = self.txhashset.read();
		txhashset::utxo_view(&txhashset, |utxo, batch| {
			for input in tx.inputs() {
				utxo.verify_coinbase_maturity(input, height, self.coinbase_maturity, batch)?;
			}
			Ok(())
		})
	}

	/// Validate the current chain state.
	pub fn validate(&self, fast_validation: bool) -> Result<(), Error> {
		let head = self.store.head()?;
		let header = self.store.get_block_header(&head.last_block_h)?;

		// Lets just treat an "empty" node that just got started up as valid.
		if head.height == 0 {
			return Ok(());
		}

		let mut txhashset = self.txhashset.write();
		let secp = self.secp.clone();

		// Now create an extension from the txhashset and validate against the
		// latest block header. Rewind the extension to the specified header to
		// ensure the view is consistent.
		txhashset::extending_readonly(&mut txhashset, |ext, batch| {
			ext.rewind(&header, batch)?;
			let genesis_had_reward = false;
			let secp = secp.lock();
			ext.validate(
				&header,
				genesis_had_reward,
				fast_validation,
				&crate::types::NoStatus,
				&secp,
			)?;
			Ok(())
		})
	}

	/// Sets the txhashset roots on a brand new block by applying the block on
	/// the current txhashset state. Also commits to the root of the header
	/// MMR at the previous header.
	pub fn set_txhashset_roots(&self, b: &mut Block) -> Result<(), Error> {
		let mut txhashset = self.txhashset.write();

		let prev_root = {
			let prev = self.store.get_block_header(&b.header.prev_hash)?;
			txhashset.header_root_at(prev.height)?
		};

		let (roots, sizes) = txhashset::extending_readonly(&mut txhashset, |ext, batch| {
			let head = batch.head()?;
			// rewind to the previous block if necessary (we build on the
			// current head)
			if b.header.prev_hash != head.last_block_h {
				let prev = batch.get_block_header(&b.header.prev_hash)?;
				ext.rewind(&prev, batch)?;
			}
			ext.apply_block(b, batch)?;
			Ok((ext.roots()?, ext.sizes()))
		})?;

		b.header.prev_root = prev_root;
		b.header.output_root = roots.output_root;
		b.header.range_proof_root = roots.rproof_root;
		b.header.kernel_root = roots.kernel_root;
		b.header.output_mmr_size = sizes.0;
		b.header.kernel_mmr_size = sizes.2;
		Ok(())
	}

	/// Return a merkle proof valid for the current output pmmr state at the
	/// given pos
	pub fn get_merkle_proof_for_output(
		&self,
		output: &OutputIdentifier,
	) -> Result<MerkleProof, Error> {
		self.txhashset.read().merkle_proof(output.commit)
	}

	/// Provides a reading view into the current txhashset state as well as
	/// the required indexes for a consumer to rewind to a consistent state
	/// and be able to validate it.
	pub fn txhashset_read(&self, h: Hash) -> Result<(u64, u64, File), Error> {
		let header = self.get_block_header(&h)?;

		// get the txhashset data ready to be zipped: rewind a (readonly)
		// extension to the requested header and snapshot the leaf bitmaps
		{
			let mut txhashset = self.txhashset.write();
			txhashset::extending_readonly(&mut txhashset, |ext, batch| {
				ext.rewind(&header, batch)?;
				ext.snapshot(batch)?;
				Ok(())
			})?;
		}

		// prepares the zip and return the corresponding Read
		let txhashset_reader = txhashset::zip_read(self.db_root.clone(), &header)?;
		Ok((
			header.output_mmr_size,
			header.kernel_mmr_size,
			txhashset_reader,
		))
	}

	/// Writes a reading view on a txhashset state that's been provided to us.
	/// If we're willing to accept that new state, the data stream will be
	/// read as a zip file, unzipped and the resulting state files should be
	/// rewound to the provided indexes.
	pub fn txhashset_write(
		&self,
		h: Hash,
		txhashset_data: File,
		status: &dyn TxHashsetWriteStatus,
	) -> Result<(), Error> {
		status.on_setup();

		// The provided header must be on our current candidate header chain.
		let header = self.get_block_header(&h)?;
		{
			let chains = self.store.chains().read();
			if !chains.candidate.is_on_chain(header.height, header.hash()) {
				return Err(ErrorKind::InvalidTxHashSet(
					"header not on candidate chain".to_string(),
				)
				.into());
			}
		}

		let sandbox_dir = PathBuf::from(&self.db_root).join("txhashset_sandbox");
		if sandbox_dir.exists() {
			let _ = std::fs::remove_dir_all(&sandbox_dir);
		}
		std::fs::create_dir_all(&sandbox_dir)?;

		txhashset::zip_write(sandbox_dir.clone(), txhashset_data, &header)?;

		let sandbox_str = sandbox_dir
			.to_str()
			.ok_or_else(|| ErrorKind::Other("invalid sandbox path".to_string()))?
			.to_string();

		let mut sandbox_txhashset = TxHashSet::open(&sandbox_str, self.store.clone())?;

		// Validate the full state, everything from roots to every single
		// rangeproof and kernel signature. The archive files may run past
		// the horizon header so rewind the MMRs to its declared sizes first.
		let secp = self.secp.clone();
		txhashset::extending_readonly(&mut sandbox_txhashset, |ext, _batch| {
			ext.rewind_mmrs_to_sizes(header.output_mmr_size, header.kernel_mmr_size)?;
			let secp = secp.lock();
			ext.validate(&header, false, false, status, &secp)?;
			Ok(())
		})?;

		if self.stop_state.is_stopped() {
			return Err(ErrorKind::Other("node is stopping".to_string()).into());
		}

		status.on_save();

		// All good, swap the new state in under the write lock and rebuild
		// the affected indexes.
		{
			let mut txhashset_ref = self.txhashset.write();
			let mut chains = self.store.chains().write();

			// release the file handles on both sets of files before moving
			// directories around
			txhashset_ref.release_backend_files();
			sandbox_txhashset.release_backend_files();
			drop(sandbox_txhashset);

			txhashset::txhashset_replace(sandbox_dir.clone(), PathBuf::from(&self.db_root))?;

			let mut new_txhashset = TxHashSet::open(&self.db_root, self.store.clone())?;

			let mut batch = self.store.batch()?;
			let tip = Tip::from_header(&header);

			let res = (|| -> Result<(), Error> {
				txhashset::extending(&mut new_txhashset, &mut batch, |ext, child_batch| {
					ext.rewind_mmrs_to_sizes(
						header.output_mmr_size,
						header.kernel_mmr_size,
					)?;
					ext.rebuild_index(child_batch)?;
					Ok(())
				})?;
				batch.save_head(&tip)?;
				batch.save_block_header(&header)?;
				batch.save_block_sums(
					&header.hash(),
					BlockSums {
						output_sum: self.compute_output_sum(&new_txhashset, &header)?,
						kernel_sum: self.compute_kernel_sum(&new_txhashset, &header)?,
					},
				)?;
				Ok(())
			})();
			match res {
				Ok(()) => batch.commit()?,
				Err(e) => return Err(e),
			}

			// Rebuild the confirmed chain from the candidate chain up to the
			// horizon header.
			chains.confirmed.rewind(0);
			for height in 1..=header.height {
				let hash = chains.candidate.hash_at(height).ok_or_else(|| {
					Error::from(ErrorKind::InvalidTxHashSet(
						"candidate chain too short".to_string(),
					))
				})?;
				let index = chains.get_or_create_index(hash, height);
				chains.confirmed.append(index)?;
			}
			chains.commit()?;

			*txhashset_ref = new_txhashset;
		}

		debug!("txhashset_write: replaced our txhashset with the new one");

		status.on_done();
		Ok(())
	}

	// Total sum of all unspent outputs at the horizon header, used to seed
	// the block_sums after a fast sync.
	fn compute_output_sum(
		&self,
		txhashset: &TxHashSet,
		header: &BlockHeader,
	) -> Result<Commitment, Error> {
		let secp = self.secp.lock();
		let over_commit = secp.commit_value(reward_overage_at(header))?;
		let output_sum = {
			let commits = txhashset.unspent_output_commits();
			secp.commit_sum(commits, vec![over_commit])?
		};
		Ok(output_sum)
	}

	// Total sum of all kernel excesses plus the total kernel offset at the
	// horizon header.
	fn compute_kernel_sum(
		&self,
		txhashset: &TxHashSet,
		header: &BlockHeader,
	) -> Result<Commitment, Error> {
		let secp = self.secp.lock();
		let kernel_commits = txhashset.kernel_excess_commits();
		let mut commits = vec![secp.commit_sum(kernel_commits, vec![])?];
		let offset = header.total_kernel_offset();
		if offset != crate::keychain::BlindingFactor::zero() {
			let key = offset
				.secret_key(&secp)
				.map_err(|e| ErrorKind::Other(format!("offset key: {:?}", e)))?;
			commits.push(secp.commit(0, key)?);
		}
		Ok(secp.commit_sum(commits, vec![])?)
	}

	/// Triggers chain compaction: prune fully spent outputs beyond the
	/// horizon from the output and rangeproof MMR files and remove old
	/// blocks from the db (unless running as an archival node).
	pub fn compact(&self) -> Result<(), Error> {
		// A node needs the full window back to the horizon to serve rewinds
		// and reorgs; nothing to do until the chain is past it.
		let head = self.store.head()?;
		let horizon = u64::from(consensus::CUT_THROUGH_HORIZON);
		if head.height <= horizon {
			return Ok(());
		}
		let horizon_height = head.height.saturating_sub(horizon);
		let horizon_hash = {
			let chains = self.store.chains().read();
			chains.confirmed.hash_at(horizon_height)
		};
		let horizon_hash = horizon_hash
			.ok_or_else(|| Error::from(ErrorKind::Other("horizon not on chain".to_string())))?;
		let horizon_header = self.store.get_block_header(&horizon_hash)?;

		let mut txhashset = self.txhashset.write();
		let batch = self.store.batch()?;

		txhashset.compact(&horizon_header, &batch)?;

		// Remove old blocks (beyond the horizon) from the db unless we are
		// running in archive mode.
		if !self.archive_mode {
			let mut count = 0;
			let mut current = horizon_header.clone();
			while current.height > 0 {
				match batch.get_previous_header(&current) {
					Ok(prev) => {
						if batch.delete_block(&current.hash()).is_ok() {
							count += 1;
						}
						current = prev;
					}
					Err(_) => break,
				}
			}
			debug!("compact: removed {} old blocks from the db", count);
		}

		batch.commit()?;
		Ok(())
	}

	/// returns the last n nodes inserted into the output sum tree
	pub fn get_last_n_output(&self, distance: u64) -> Vec<(Hash, OutputIdentifier)> {
		self.txhashset.read().last_n_output(distance)
	}

	/// as above, for rangeproofs
	pub fn get_last_n_rangeproof(&self, distance: u64) -> Vec<(Hash, RangeProof)> {
		self.txhashset.read().last_n_rangeproof(distance)
	}

	/// Chain head (confirmed).
	pub fn head(&self) -> Result<Tip, Error> {
		self.store.head()
	}

	/// Tip of the candidate header chain.
	pub fn candidate_head(&self) -> Result<Tip, Error> {
		self.store.candidate_head()
	}

	/// Tip of the sync chain.
	pub fn sync_head(&self) -> Result<Tip, Error> {
		self.store.sync_head()
	}

	/// Block header for the chain head
	pub fn head_header(&self) -> Result<BlockHeader, Error> {
		self.store.head_header()
	}

	/// Height of the next block to be added to the confirmed chain.
	fn next_block_height(&self) -> Result<u64, Error> {
		let bh = self.head_header()?;
		Ok(bh.height + 1)
	}

	/// Gets a block by hash
	pub fn get_block(&self, h: &Hash) -> Result<Block, Error> {
		self.store.get_block(h)
	}

	/// Gets a block header by hash
	pub fn get_block_header(&self, h: &Hash) -> Result<BlockHeader, Error> {
		self.store.get_block_header(h)
	}

	/// Get previous block header.
	pub fn get_previous_header(&self, header: &BlockHeader) -> Result<BlockHeader, Error> {
		self.store.get_previous_header(header)
	}

	/// Gets the block header at the provided height on the confirmed chain.
	pub fn get_header_by_height(&self, height: u64) -> Result<BlockHeader, Error> {
		let hash = {
			let chains = self.store.chains().read();
			chains.confirmed.hash_at(height)
		};
		match hash {
			Some(hash) => self.store.get_block_header(&hash),
			None => Err(ErrorKind::Other(format!("not on chain: height {}", height)).into()),
		}
	}

	/// Gets the block header at the provided height on the candidate header
	/// chain.
	pub fn get_candidate_header_by_height(&self, height: u64) -> Result<BlockHeader, Error> {
		let hash = {
			let chains = self.store.chains().read();
			chains.candidate.hash_at(height)
		};
		match hash {
			Some(hash) => self.store.get_block_header(&hash),
			None => Err(ErrorKind::Other(format!("not on chain: height {}", height)).into()),
		}
	}

	/// Whether the provided block is on the current confirmed chain.
	pub fn is_on_current_chain(&self, header: &BlockHeader) -> Result<bool, Error> {
		let chains = self.store.chains().read();
		Ok(chains.confirmed.is_on_chain(header.height, header.hash()))
	}

	/// Does the block with the given hash exist in our db?
	pub fn block_exists(&self, h: Hash) -> Result<bool, Error> {
		self.store.block_exists(&h)
	}

	/// Get the tip of the current "sync" header chain.
	/// This may be significantly different to current header chain.
	pub fn get_sync_head(&self) -> Result<Tip, Error> {
		self.store.sync_head()
	}

	/// Check whether we need to sync the full txhashset state (the candidate
	/// header chain is too far ahead of our confirmed chain to catch up by
	/// fetching blocks) or can continue with block body sync. In the latter
	/// case, fills `hashes` with the candidate-chain block hashes above the
	/// current confirmed chain (descending order).
	pub fn check_txhashset_needed(
		&self,
		caller: String,
		hashes: &mut Option<Vec<Hash>>,
	) -> Result<bool, Error> {
		let horizon = u64::from(consensus::STATE_SYNC_THRESHOLD);
		let body_head = self.head()?;
		let header_head = self.candidate_head()?;

		if body_head.total_difficulty >= header_head.total_difficulty {
			return Ok(false);
		}

		// If we are far behind the candidate chain, sync the txhashset state
		// at the horizon instead of replaying every block.
		if header_head.height.saturating_sub(body_head.height) > horizon {
			debug!(
				"{}: body head {} is too far behind header head {}, state sync needed",
				caller, body_head.height, header_head.height
			);
			return Ok(true);
		}

		// Collect the candidate chain hashes not yet on the confirmed chain.
		if let Some(hs) = hashes {
			let chains = self.store.chains().read();
			let mut height = header_head.height;
			while height > 0 {
				match chains.candidate.hash_at(height) {
					Some(hash) => {
						if chains.confirmed.is_on_chain(height, hash) {
							break;
						}
						hs.push(hash);
					}
					None => break,
				}
				height -= 1;
			}
		}
		Ok(false)
	}

	/// Builds an iterator on blocks starting from the current chain head and
	/// running backward. Specialized to return information pertaining to
	/// block difficulty calculation (timestamp and previous difficulties).
	pub fn difficulty_iter(&self) -> Result<DifficultyIter<'static>, Error> {
		let head = self.head()?;
		Ok(DifficultyIter::from(head.last_block_h, self.store.clone()))
	}

	/// Reset the sync chain and sync head back to the candidate chain state.
	/// Done at the start of each header sync run.
	pub fn reset_sync_head(&self) -> Result<Tip, Error> {
		let mut txhashset = self.txhashset.write();
		let mut chains = self.store.chains().write();
		let mut batch = self.store.batch()?;

		let candidate_head = batch.candidate_head()?;
		let header = batch.get_block_header(&candidate_head.last_block_h)?;

		let res = txhashset::sync_extending(&mut txhashset, &mut batch, |ext, child_batch| {
			// rebuild the sync MMR to mirror the candidate header MMR
			ext.truncate()?;
			let mut headers = vec![];
			let mut current = header.clone();
			while current.height > 0 {
				headers.push(current.clone());
				current = child_batch.get_previous_header(&current)?;
			}
			headers.push(current);
			headers.reverse();
			for h in &headers {
				ext.apply_header(h)?;
			}
			child_batch.save_sync_head(&candidate_head)?;
			Ok(())
		});

		match res {
			Ok(()) => {
				batch.commit()?;
				// mirror candidate chain file into sync chain file
				chains.sync.rewind(0);
				for height in 1..=candidate_head.height {
					if let Some(hash) = chains.candidate.hash_at(height) {
						let index = chains.get_or_create_index(hash, height);
						chains.sync.append(index)?;
					}
				}
				chains.commit()?;
				Ok(candidate_head)
			}
			Err(e) => {
				chains.rollback()?;
				Err(e)
			}
		}
	}
}

fn block_status(head: &Option<Tip>, prev_head: &Tip, fork_height: u64) -> BlockStatus {
	match head {
		Some(tip) => {
			if tip.prev_block_h == prev_head.last_block_h {
				BlockStatus::Next
			} else {
				BlockStatus::Reorg(prev_head.height.saturating_sub(fork_height))
			}
		}
		None => BlockStatus::Fork,
	}
}

fn reward_overage_at(header: &BlockHeader) -> u64 {
	// cumulative coinbase subsidy through the header height, genesis did not
	// carry a reward
	header.height * consensus::reward(0)
}

fn fork_info(
	b: &Block,
	batch: &crate::store::Batch<'_>,
	chains: &NamedChains,
) -> Result<(BlockHeader, Vec<Hash>), Error> {
	let prev = batch.get_block_header(&b.header.prev_hash)?;

	// Most common case: the block builds directly on the current head.
	let head = batch.head()?;
	if b.header.prev_hash == head.last_block_h {
		return Ok((prev, vec![]));
	}

	// Otherwise walk back from the previous block until we find a block on
	// the confirmed chain: that is the fork point, and the blocks walked
	// (ascending) need re-applying after the rewind.
	let mut fork_hashes = vec![];
	let mut current = prev;
	while !chains.confirmed.is_on_chain(current.height, current.hash()) {
		if current.height == 0 {
			return Err(ErrorKind::Other("fork root not found".to_string()).into());
		}
		fork_hashes.push(current.hash());
		current = batch.get_previous_header(&current)?;
	}
	fork_hashes.reverse();

	Ok((current, fork_hashes))
}

fn setup_head(
	genesis: &Block,
	store: &Arc<ChainStore>,
	txhashset: &mut TxHashSet,
	secp: &Arc<Mutex<Secp256k1>>,
) -> Result<(), Error> {
	let mut batch = store.batch()?;

	if batch.head().is_ok() {
		// We have an existing head; trust the files on disk, the pipeline
		// re-validates everything as the chain advances.
		return Ok(());
	}

	// Initialize the genesis state: save the block, the header, all three
	// heads, the genesis block_sums, and apply the genesis body (if any) to
	// the txhashset.
	let tip = Tip::from_header(&genesis.header);

	batch.save_block(genesis)?;
	batch.save_block_header(&genesis.header)?;
	batch.save_head(&tip)?;
	batch.save_candidate_head(&tip)?;
	batch.save_sync_head(&tip)?;

	// Note: the zero sums use the shared static secp context internally, so
	// build them before taking the explicit lock below.
	let zero_sums = BlockSums::default();
	if !genesis.kernels().is_empty() {
		let (utxo_sum, kernel_sum) = {
			let secp = secp.lock();
			(zero_sums, genesis as &dyn Committed).verify_kernel_sums(
				genesis.header.overage(),
				genesis.header.total_kernel_offset(),
				&secp,
			)?
		};
		batch.save_block_sums(
			&genesis.hash(),
			BlockSums {
				output_sum: utxo_sum,
				kernel_sum,
			},
		)?;
	} else {
		batch.save_block_sums(&genesis.hash(), zero_sums)?;
	}

	txhashset::extending(txhashset, &mut batch, |ext, child_batch| {
		if !genesis.kernels().is_empty() {
			ext.apply_block(genesis, child_batch)?;
		}
		Ok(())
	})?;

	// The header MMRs get the genesis header.
	txhashset::header_extending(txhashset, &mut batch, |ext, _child_batch| {
		if ext.size() == 0 {
			ext.apply_header(&genesis.header)?;
		}
		Ok(())
	})?;
	txhashset::sync_extending(txhashset, &mut batch, |ext, _child_batch| {
		if ext.size() == 0 {
			ext.apply_header(&genesis.header)?;
		}
		Ok(())
	})?;

	batch.commit()?;

	// And the three chain files get the genesis entry.
	let mut chains = store.chains().write();
	if chains.confirmed.is_empty() {
		let index = Arc::new(BlockIndex::new(genesis.hash(), 0));
		chains.confirmed.append(index.clone())?;
		chains.candidate.append(index.clone())?;
		chains.sync.append(index)?;
		chains.commit()?;
	}

	info!("init: saved genesis: {:?}", genesis.hash());
	Ok(())
}
