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

//! A single bucket of transactions (the txpool or the stempool both wrap
//! one of these). Maintains insertion order and supports aggregation,
//! reconciliation against new blocks and retrieval by kernel short-id.

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::id::{ShortId, ShortIdentifiable};
use crate::core::core::transaction;
use crate::core::core::verifier_cache::VerifierCache;
use crate::core::core::{Block, Transaction, TxKernel, Weighting};
use crate::types::{BlockChain, PoolEntry, PoolError};
use crate::util::secp::pedersen::Commitment;
use crate::util::secp::Secp256k1;
use crate::util::{Mutex, RwLock};

/// A single pool of transactions, both in the txpool and stempool
/// incarnations.
pub struct Pool {
	/// Entries in the pool (tx + info + timer) in simple insertion order.
	pub entries: Vec<PoolEntry>,
	/// The blockchain
	pub blockchain: Arc<dyn BlockChain>,
	/// Cache of previous txs in case of a chain reorg.
	pub verifier_cache: Arc<RwLock<dyn VerifierCache>>,
	/// The active secp context.
	pub secp: Arc<Mutex<Secp256k1>>,
	/// For logging, the name of this pool.
	pub name: String,
}

impl Pool {
	/// Build a new pool bucket.
	pub fn new(
		chain: Arc<dyn BlockChain>,
		verifier_cache: Arc<RwLock<dyn VerifierCache>>,
		secp: Arc<Mutex<Secp256k1>>,
		name: String,
	) -> Pool {
		Pool {
			entries: vec![],
			blockchain: chain,
			verifier_cache,
			secp,
			name,
		}
	}

	/// Does the transaction pool contain an entry for the given transaction?
	pub fn contains_tx(&self, hash: Hash) -> bool {
		self.entries.iter().any(|x| x.tx.hash() == hash)
	}

	/// Get a transaction from the pool by hash.
	pub fn get_tx(&self, hash: Hash) -> Option<Transaction> {
		self.entries
			.iter()
			.find(|x| x.tx.hash() == hash)
			.map(|x| x.tx.clone())
	}

	/// Query the tx pool for an individual tx matching the given kernel hash.
	pub fn retrieve_tx_by_kernel_hash(&self, hash: Hash) -> Option<Transaction> {
		for x in &self.entries {
			for k in x.tx.kernels() {
				if k.hash() == hash {
					return Some(x.tx.clone());
				}
			}
		}
		None
	}

	/// Query the tx pool for all known txs based on kernel short_ids
	/// from the provided compact_block.
	/// Note: does not validate that we return the full set of required txs.
	/// The caller will need to validate that themselves.
	pub fn retrieve_transactions(
		&self,
		hash: Hash,
		nonce: u64,
		kern_ids: &[ShortId],
	) -> (Vec<Transaction>, Vec<ShortId>) {
		let mut txs = vec![];
		let mut found_ids = vec![];

		// Rehash all entries in the pool using short_ids based on provided
		// hash and nonce.
		'outer: for x in &self.entries {
			for k in x.tx.kernels() {
				// rehash each kernel to calculate the block specific short_id
				let short_id = k.short_id(&hash, nonce);
				if kern_ids.contains(&short_id) {
					txs.push(x.tx.clone());
					found_ids.push(short_id);
				}
				if found_ids.len() == kern_ids.len() {
					break 'outer;
				}
			}
		}
		txs.dedup();
		(
			txs,
			kern_ids
				.iter()
				.filter(|id| !found_ids.contains(id))
				.cloned()
				.collect(),
		)
	}

	/// Take the first num_to_fetch txs based on insertion order.
	pub fn prepare_mineable_transactions(
		&self,
		max_weight: usize,
	) -> Result<Vec<Transaction>, PoolError> {
		let header = self.blockchain.chain_head()?;

		let mut weight = 0;
		let mut txs = vec![];
		for x in &self.entries {
			let tx_weight = x.tx.weight();
			if weight + tx_weight > max_weight {
				break;
			}
			weight += tx_weight;
			txs.push(x.tx.clone());
		}

		// Validate the single aggregate transaction "as pool", not subject
		// to tx weight limits.
		let tx = {
			let secp = self.secp.lock();
			transaction::aggregate(txs.clone(), &secp)?
		};
		tx.validate(
			Weighting::NoLimit,
			self.verifier_cache.clone(),
			&self.secp.lock(),
		)?;

		// Validate the aggregate tx against the current chain state.
		self.validate_raw_tx(&tx, &header, Weighting::NoLimit)?;

		Ok(txs)
	}

	/// All transactions in this pool, in insertion order.
	pub fn all_transactions(&self) -> Vec<Transaction> {
		self.entries.iter().map(|x| x.tx.clone()).collect()
	}

	/// Return a single aggregate tx representing all txs in the pool.
	/// Returns None if the pool is empty.
	pub fn all_transactions_aggregate(&self) -> Result<Option<Transaction>, PoolError> {
		let txs = self.all_transactions();
		if txs.is_empty() {
			return Ok(None);
		}

		let tx = {
			let secp = self.secp.lock();
			transaction::aggregate(txs, &secp)?
		};

		// Validate the single aggregate transaction "as pool", not subject
		// to tx weight limits.
		tx.validate(
			Weighting::NoLimit,
			self.verifier_cache.clone(),
			&self.secp.lock(),
		)?;

		Ok(Some(tx))
	}

	/// Add the given tx to the pool, validating it against the chain state
	/// and the other pool transactions.
	pub fn add_to_pool(
		&mut self,
		entry: PoolEntry,
		extra_txs: Vec<Transaction>,
		header: &crate::core::core::BlockHeader,
	) -> Result<(), PoolError> {
		// Combine all the txs from the pool with any extra txs provided.
		let mut txs = self.all_transactions();

		// Quick check to see if we have seen this tx before.
		if txs.iter().any(|x| x == &entry.tx) {
			return Err(PoolError::DuplicateTx);
		}

		txs.extend(extra_txs);

		let agg_tx = if txs.is_empty() {
			// If we have nothing to aggregate then simply return the tx
			// itself.
			entry.tx.clone()
		} else {
			// Create a single aggregated tx from the existing pool txs and
			// the new entry.
			txs.push(entry.tx.clone());
			let secp = self.secp.lock();
			transaction::aggregate(txs, &secp)?
		};

		// Validate aggregated tx (existing pool + new tx), ignoring tx
		// weight limits. Validate against known chain state at the provided
		// header.
		self.validate_raw_tx(&agg_tx, header, Weighting::NoLimit)?;

		// If we get here successfully then we can safely add the entry to
		// the pool.
		self.log_pool_add(&entry);
		self.entries.push(entry);

		Ok(())
	}

	fn log_pool_add(&self, entry: &PoolEntry) {
		debug!(
			"add_to_pool [{}]: {} ({:?}) [in/out/kern: {}/{}/{}] pool: {}",
			self.name,
			entry.tx.hash(),
			entry.src,
			entry.tx.inputs().len(),
			entry.tx.outputs().len(),
			entry.tx.kernels().len(),
			self.size()
		);
	}

	fn validate_raw_tx(
		&self,
		tx: &Transaction,
		header: &crate::core::core::BlockHeader,
		weighting: Weighting,
	) -> Result<(), PoolError> {
		{
			let secp = self.secp.lock();
			tx.validate(weighting, self.verifier_cache.clone(), &secp)?;
		}

		// Validate the tx against current chain state.
		// Check all inputs are in the current UTXO set.
		// Check all outputs are unique in current UTXO set.
		self.blockchain.validate_tx(tx)?;

		// The header is where we plan to include this tx, coinbase maturity
		// and lock heights apply relative to it.
		let _ = header;
		self.blockchain.verify_coinbase_maturity(tx)?;
		self.blockchain.verify_tx_lock_height(tx)?;

		Ok(())
	}

	/// Reconcile the pool with the provided block: remove txs made invalid
	/// by the block (kernels already confirmed or inputs now spent) and
	/// revalidate the remainder against the new chain state.
	pub fn reconcile_block(&mut self, block: &Block) -> Result<(), PoolError> {
		// Filter txs in the pool that appear in the "reconciled" block.
		let block_kernels: HashSet<TxKernel> = block.kernels().iter().cloned().collect();
		self.entries
			.retain(|x| !x.tx.kernels().iter().any(|k| block_kernels.contains(k)));

		// Now reconcile our pool with the updated chain state.
		self.reconcile(None)?;

		Ok(())
	}

	/// Reconcile the pool against the current chain state: quietly drop any
	/// entries that no longer validate (inputs spent from under them, say),
	/// keeping everything that still holds up, with an optional extra tx
	/// (the aggregate txpool tx when reconciling the stempool).
	pub fn reconcile(&mut self, extra_tx: Option<Transaction>) -> Result<(), PoolError> {
		let header = self.blockchain.chain_head()?;
		let existing_entries = self.entries.clone();
		self.entries.clear();

		let mut extra_txs = vec![];
		if let Some(extra_tx) = extra_tx {
			extra_txs.push(extra_tx);
		}

		for x in existing_entries {
			let _ = self.add_to_pool(x, extra_txs.clone(), &header);
		}

		Ok(())
	}

	/// Size of the pool.
	pub fn size(&self) -> usize {
		self.entries.len()
	}

	/// Number of transactions in the pool.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Total weight of all txs in the pool.
	pub fn total_weight(&self) -> usize {
		self.entries.iter().map(|x| x.tx.weight()).sum()
	}

	/// Transactions in the pool whose kernels are all contained within the
	/// provided kernel set. Used to deaggregate an incoming multi-kernel tx
	/// against what we already hold.
	pub fn find_matching_transactions(&self, kernels: &[TxKernel]) -> Vec<Transaction> {
		let kernel_set: HashSet<&TxKernel> = kernels.iter().collect();
		self.entries
			.iter()
			.filter(|x| x.tx.kernels().iter().all(|k| kernel_set.contains(k)))
			.map(|x| x.tx.clone())
			.collect()
	}

	/// All output commitments of every tx in the pool.
	pub fn all_output_commits(&self) -> Vec<Commitment> {
		self.entries
			.iter()
			.flat_map(|x| x.tx.outputs().iter().map(|out| out.commitment()))
			.collect()
	}
}
