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

//! Transaction pool implementation leveraging two separate buckets: the
//! regular txpool for fluffed transactions and the stempool for Dandelion
//! stem transactions carrying an embargo.

use chrono::prelude::*;
use chrono::Duration;
use std::sync::Arc;

use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::id::ShortId;
use crate::core::core::transaction;
use crate::core::core::verifier_cache::VerifierCache;
use crate::core::core::{Block, BlockHeader, Transaction, Weighting};
use crate::pool::Pool;
use crate::types::{
	BlockChain, DandelionConfig, PoolAdapter, PoolConfig, PoolEntry, PoolError, TxSource,
};
use crate::util::secp::Secp256k1;
use crate::util::{Mutex, RwLock};

/// Transaction pool implementation.
pub struct TransactionPool {
	/// Pool Config
	pub config: PoolConfig,
	/// Dandelion config for the embargo timers.
	pub dandelion_config: DandelionConfig,
	/// Our transaction pool.
	pub txpool: Pool,
	/// Our Dandelion "stempool".
	pub stempool: Pool,
	/// Cache of previous txs in case of a chain reorg.
	verifier_cache: Arc<RwLock<dyn VerifierCache>>,
	/// The blockchain
	pub blockchain: Arc<dyn BlockChain>,
	/// The pool adapter
	pub adapter: Arc<dyn PoolAdapter>,
	/// The active secp context.
	secp: Arc<Mutex<Secp256k1>>,
}

impl TransactionPool {
	/// Create a new transaction pool
	pub fn new(
		config: PoolConfig,
		dandelion_config: DandelionConfig,
		chain: Arc<dyn BlockChain>,
		verifier_cache: Arc<RwLock<dyn VerifierCache>>,
		secp: Arc<Mutex<Secp256k1>>,
		adapter: Arc<dyn PoolAdapter>,
	) -> TransactionPool {
		TransactionPool {
			config,
			dandelion_config,
			txpool: Pool::new(
				chain.clone(),
				verifier_cache.clone(),
				secp.clone(),
				"txpool".to_string(),
			),
			stempool: Pool::new(
				chain.clone(),
				verifier_cache.clone(),
				secp.clone(),
				"stempool".to_string(),
			),
			verifier_cache,
			blockchain: chain,
			adapter,
			secp,
		}
	}

	/// The current chain head.
	pub fn chain_head(&self) -> Result<BlockHeader, PoolError> {
		self.blockchain.chain_head()
	}

	fn add_to_stempool(&mut self, entry: PoolEntry, header: &BlockHeader) -> Result<(), PoolError> {
		// Add tx to stempool (passing in all txs from txpool to validate
		// against).
		self.stempool
			.add_to_pool(entry, self.txpool.all_transactions(), header)?;

		// Note: we do not notify the adapter here,
		// we let the dandelion monitor handle this.
		Ok(())
	}

	fn add_to_txpool(&mut self, mut entry: PoolEntry, header: &BlockHeader) -> Result<(), PoolError> {
		// First deaggregate the tx based on current txpool txs.
		if entry.tx.kernels().len() > 1 {
			let txs = self.txpool.find_matching_transactions(entry.tx.kernels());
			if !txs.is_empty() {
				let tx = {
					let secp = self.secp.lock();
					transaction::deaggregate(entry.tx, txs, &secp)?
				};
				tx.validate(
					Weighting::AsTransaction,
					self.verifier_cache.clone(),
					&self.secp.lock(),
				)?;
				entry.tx = tx;
				entry.src = TxSource::Deaggregate;
			}
		}
		self.txpool.add_to_pool(entry.clone(), vec![], header)?;

		// We now need to reconcile the stempool based on the new state of
		// the txpool. Some stempool txs may no longer be valid and we need
		// to evict them.
		{
			let txpool_agg = self.txpool.all_transactions_aggregate()?;
			self.stempool.reconcile(txpool_agg)?;
		}

		Ok(())
	}

	/// Verify the tx kernel variants and features, taking into account both
	/// the active "feature flags" and the current chain state.
	fn verify_kernel_variants(&self, tx: &Transaction, header: &BlockHeader) -> Result<(), PoolError> {
		if tx.kernels().iter().any(|k| k.is_nrd()) {
			if !crate::core::consensus::nrd_enabled(header.height + 1) {
				return Err(PoolError::NRDKernelNotEnabled);
			}
		}
		Ok(())
	}

	/// Add the given tx to the pool, directing it to either the stempool or
	/// the regular txpool based on stem flag provided.
	pub fn add_to_pool(
		&mut self,
		src: TxSource,
		tx: Transaction,
		stem: bool,
		header: &BlockHeader,
	) -> Result<(), PoolError> {
		// Quick check for duplicate txs.
		// Our stempool is private and we do not want to reveal anything about
		// the txs contained. If this is a stem tx and is already present in
		// stempool then fluff by adding to txpool. Otherwise if already
		// present in txpool return a "duplicate tx" error.
		if stem && self.stempool.contains_tx(tx.hash()) {
			return self.add_to_pool(src, tx, false, header);
		} else if self.txpool.contains_tx(tx.hash()) {
			return Err(PoolError::DuplicateTx);
		}

		// Check this tx is valid based on current header version.
		self.verify_kernel_variants(&tx, header)?;

		// Do we have the capacity to accept this transaction?
		let acceptability = self.is_acceptable(&tx, stem);
		let mut evict = false;
		if !stem && acceptability.as_ref().err() == Some(&PoolError::OverCapacity) {
			evict = true;
		} else if acceptability.is_err() {
			return acceptability;
		}

		// Make sure the transaction is valid before anything else.
		// Validate tx accounting for max tx weight.
		{
			let secp = self.secp.lock();
			tx.validate(
				Weighting::AsTransaction,
				self.verifier_cache.clone(),
				&secp,
			)
			.map_err(PoolError::InvalidTx)?;
		}

		// Check the tx lock_time is valid based on current chain state.
		self.blockchain.verify_tx_lock_height(&tx)?;

		// Check coinbase maturity before we go any further.
		self.blockchain.verify_coinbase_maturity(&tx)?;

		let entry = PoolEntry {
			src,
			tx_at: Utc::now(),
			tx,
		};

		// If not stem then we are fluffing.
		// If this is a stem tx then attempt to stem.
		// Any problems during stem, fluff the tx.
		if stem {
			// TODO - what happens to txs in the stempool in a re-org scenario?
			self.add_to_stempool(entry.clone(), header)?;
			if self.adapter.stem_tx_accepted(&entry).is_err() {
				// Our adapter says we are in "fluff" epoch or have no relay
				// peer: fluff the tx instead, broadcasting to everyone.
				self.stempool
					.entries
					.retain(|x| x.tx.hash() != entry.tx.hash());
				let mut fluffable_entry = entry;
				fluffable_entry.src = TxSource::Fluff;
				self.add_to_txpool(fluffable_entry.clone(), header)?;
				self.adapter.tx_accepted(&fluffable_entry);
			}
		} else {
			self.add_to_txpool(entry.clone(), header)?;
			self.adapter.tx_accepted(&entry);
		}

		// Transaction passed all the checks but we have to make space for it
		if evict {
			self.evict_from_txpool();
		}

		Ok(())
	}

	// Evict a transaction from the txpool to make space: the lowest
	// fee-rate entry that no other pool tx builds on.
	pub fn evict_from_txpool(&mut self) {
		let pool_inputs = crate::core::core::transaction::input_commitments(
			&self.txpool.all_transactions(),
		);
		let evictable = self
			.txpool
			.entries
			.iter()
			.enumerate()
			.filter(|(_, x)| {
				// no other pool tx spends one of this tx's outputs
				!x.tx
					.outputs()
					.iter()
					.any(|out| pool_inputs.binary_search(&out.commitment()).is_ok())
			})
			.min_by_key(|(_, x)| x.tx.fee_rate());

		if let Some((idx, _)) = evictable {
			let entry = self.txpool.entries.remove(idx);
			debug!("evict_from_txpool: evicted {}", entry.tx.hash());
		}
	}

	/// Reconcile the transaction pool (both txpool and stempool) against the
	/// provided block: remove confirmed txs and revalidate the rest.
	pub fn reconcile_block(&mut self, block: &Block) -> Result<(), PoolError> {
		// First reconcile the txpool.
		self.txpool.reconcile_block(block)?;

		// Now reconcile our stempool, accounting for the updated txpool txs.
		self.stempool.reconcile_block(block)?;
		{
			let txpool_tx = self.txpool.all_transactions_aggregate()?;
			self.stempool.reconcile(txpool_tx)?;
		}

		Ok(())
	}

	/// All stem txs whose embargo expired: to be force-fluffed into the
	/// txpool by the dandelion monitor. The embargo is the configured base
	/// plus a small per-node random component so expiry does not itself
	/// identify the origin.
	pub fn embargo_expired_entries(&self, embargo_extra_secs: u16) -> Vec<PoolEntry> {
		let embargo_secs =
			i64::from(self.dandelion_config.embargo_secs) + i64::from(embargo_extra_secs);
		let cutoff = Utc::now() - Duration::seconds(embargo_secs);
		self.stempool
			.entries
			.iter()
			.filter(|x| x.tx_at < cutoff)
			.cloned()
			.collect()
	}

	/// All stem txs older than the aggregation patience window, ready to be
	/// aggregated and relayed onward (or fluffed) by the dandelion monitor.
	pub fn stem_entries_past_patience(&self) -> Vec<PoolEntry> {
		let cutoff =
			Utc::now() - Duration::seconds(i64::from(self.dandelion_config.aggregation_secs));
		self.stempool
			.entries
			.iter()
			.filter(|x| x.tx_at < cutoff)
			.cloned()
			.collect()
	}

	/// Remove the given txs from the stempool (they were fluffed or relayed
	/// onward).
	pub fn remove_from_stempool(&mut self, txs: &[Transaction]) {
		let hashes: Vec<Hash> = txs.iter().map(|x| x.hash()).collect();
		self.stempool
			.entries
			.retain(|x| !hashes.contains(&x.tx.hash()));
	}

	/// Fluff a tx: move it from the stempool into the txpool and notify the
	/// adapter so it gets broadcast to all peers.
	pub fn fluff(&mut self, entry: PoolEntry, header: &BlockHeader) -> Result<(), PoolError> {
		self.stempool
			.entries
			.retain(|x| x.tx.hash() != entry.tx.hash());
		self.add_to_txpool(entry.clone(), header)?;
		self.adapter.tx_accepted(&entry);
		Ok(())
	}

	/// Retrieve an individual transaction from the txpool by kernel hash, if
	/// we have it.
	pub fn retrieve_tx_by_kernel_hash(&self, hash: Hash) -> Option<Transaction> {
		self.txpool.retrieve_tx_by_kernel_hash(hash)
	}

	/// Retrieve all transactions matching the provided "compact block"
	/// based on the kernel set.
	/// Note: we only look in the txpool for this (stempool is under embargo).
	pub fn retrieve_transactions(
		&self,
		hash: Hash,
		nonce: u64,
		kern_ids: &[ShortId],
	) -> (Vec<Transaction>, Vec<ShortId>) {
		self.txpool.retrieve_transactions(hash, nonce, kern_ids)
	}

	/// Whether the transaction is acceptable to the pool, given both how
	/// full the pool is and the transaction weight.
	fn is_acceptable(&self, tx: &Transaction, stem: bool) -> Result<(), PoolError> {
		if self.total_size() > self.config.max_pool_size {
			return Err(PoolError::OverCapacity);
		}

		// Check that the stempool can accept this transaction
		if stem && self.stempool.size() > self.config.max_stempool_size {
			return Err(PoolError::OverCapacity);
		}

		// for a basic transaction (1 input, 2 outputs) -
		// (-1 * 1) + (4 * 2) + 1 = 8
		// 8 * 10 = 80
		if self.config.accept_fee_base > 0 {
			let threshold = (tx.weight() as u64) * self.config.accept_fee_base;
			if tx.shifted_fee() < threshold {
				return Err(PoolError::LowFeeTransaction(threshold));
			}
		}
		Ok(())
	}

	/// Get the total size of the pool.
	/// Note: we only consider the txpool here as stempool is under embargo.
	pub fn total_size(&self) -> usize {
		self.txpool.size()
	}

	/// Returns a vec of transactions from the txpool so we can build a
	/// block from them.
	pub fn prepare_mineable_transactions(&self) -> Result<Vec<Transaction>, PoolError> {
		self.txpool
			.prepare_mineable_transactions(self.config.mineable_max_weight)
	}
}
