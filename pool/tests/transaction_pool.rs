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

//! Pool behavior: txpool/stempool routing, Dandelion embargo, block
//! reconciliation.

use lepton_core as core;
use lepton_keychain as keychain;
use lepton_pool as pool;
use lepton_util as util;

use self::core::core::hash::Hashed;
use self::core::core::verifier_cache::{LruVerifierCache, VerifierCache};
use self::core::core::{Block, BlockHeader, KernelFeatures, Transaction};
use self::core::libtx::build::{self, input, output};
use self::core::libtx::reward;
use self::core::pow::Difficulty;
use self::keychain::{ExtKeychain, Keychain};
use self::pool::types::{
	BlockChain, DandelionConfig, PoolAdapter, PoolConfig, PoolEntry, PoolError, TxSource,
};
use self::pool::TransactionPool;
use self::util::secp::pedersen::Commitment;
use self::util::{Mutex, RwLock};
use chrono::{Duration, Utc};
use std::sync::Arc;

/// A minimal in-memory chain backing the pool: a UTXO set of commitments
/// plus a head header.
#[derive(Clone)]
struct DummyChain {
	head: Arc<RwLock<BlockHeader>>,
	utxo: Arc<RwLock<Vec<Commitment>>>,
}

impl DummyChain {
	fn new() -> DummyChain {
		DummyChain {
			head: Arc::new(RwLock::new(BlockHeader::default())),
			utxo: Arc::new(RwLock::new(vec![])),
		}
	}

	fn add_utxo(&self, commit: Commitment) {
		self.utxo.write().push(commit);
	}

	fn spend_utxo(&self, commit: &Commitment) {
		self.utxo.write().retain(|x| x != commit);
	}

	fn set_head(&self, header: BlockHeader) {
		*self.head.write() = header;
	}
}

impl BlockChain for DummyChain {
	fn chain_head(&self) -> Result<BlockHeader, PoolError> {
		Ok(self.head.read().clone())
	}

	fn get_block_header(
		&self,
		_hash: &core::core::hash::Hash,
	) -> Result<BlockHeader, PoolError> {
		Ok(self.head.read().clone())
	}

	fn validate_tx(&self, tx: &Transaction) -> Result<(), PoolError> {
		let utxo = self.utxo.read();
		for input in tx.inputs() {
			if !utxo.contains(&input.commitment()) {
				return Err(PoolError::Other("input not in utxo".to_string()));
			}
		}
		for out in tx.outputs() {
			if utxo.contains(&out.commitment()) {
				return Err(PoolError::DuplicateCommitment);
			}
		}
		Ok(())
	}

	fn verify_coinbase_maturity(&self, _tx: &Transaction) -> Result<(), PoolError> {
		Ok(())
	}

	fn verify_tx_lock_height(&self, tx: &Transaction) -> Result<(), PoolError> {
		let head = self.head.read();
		for k in tx.kernels() {
			if let KernelFeatures::HeightLocked { lock_height, .. } = k.features {
				if lock_height > head.height + 1 {
					return Err(PoolError::ImmatureTransaction);
				}
			}
		}
		Ok(())
	}
}

/// Adapter recording what the pool relayed, with a switch deciding whether
/// a stem relay is currently possible.
struct RecordingAdapter {
	stem_ok: Mutex<bool>,
	stemmed: Mutex<Vec<Transaction>>,
	broadcast: Mutex<Vec<Transaction>>,
}

impl RecordingAdapter {
	fn new(stem_ok: bool) -> RecordingAdapter {
		RecordingAdapter {
			stem_ok: Mutex::new(stem_ok),
			stemmed: Mutex::new(vec![]),
			broadcast: Mutex::new(vec![]),
		}
	}
}

impl PoolAdapter for RecordingAdapter {
	fn tx_accepted(&self, entry: &PoolEntry) {
		self.broadcast.lock().push(entry.tx.clone());
	}

	fn stem_tx_accepted(&self, entry: &PoolEntry) -> Result<(), PoolError> {
		if *self.stem_ok.lock() {
			self.stemmed.lock().push(entry.tx.clone());
			Ok(())
		} else {
			Err(PoolError::DandelionError)
		}
	}
}

fn test_setup(
	chain: &DummyChain,
	adapter: Arc<RecordingAdapter>,
) -> TransactionPool {
	let config = PoolConfig {
		accept_fee_base: 1,
		max_pool_size: 50,
		max_stempool_size: 50,
		mineable_max_weight: 10_000,
	};
	let verifier_cache: Arc<RwLock<dyn VerifierCache>> =
		Arc::new(RwLock::new(LruVerifierCache::new()));
	TransactionPool::new(
		config,
		DandelionConfig::default(),
		Arc::new(chain.clone()),
		verifier_cache,
		util::static_secp_instance(),
		adapter,
	)
}

// Build a valid tx spending the provided (seeded) input amount.
fn test_transaction(
	keychain: &ExtKeychain,
	chain: &DummyChain,
	in_d0: u32,
	out_d0: u32,
	amount: u64,
	fee: u32,
) -> Transaction {
	let key_in = ExtKeychain::derive_key_id(1, in_d0, 0, 0, 0);
	let key_out = ExtKeychain::derive_key_id(1, out_d0, 0, 0, 0);

	// seed the input into the dummy utxo set
	let commit = keychain.commit(amount, &key_in).unwrap();
	chain.add_utxo(commit);

	build::transaction(
		KernelFeatures::Plain { fee: fee.into() },
		vec![
			input(amount, key_in),
			output(amount - fee as u64, key_out),
		],
		keychain,
	)
	.unwrap()
}

#[test]
fn add_and_duplicate_tx() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let chain = DummyChain::new();
	let adapter = Arc::new(RecordingAdapter::new(true));
	let mut pool = test_setup(&chain, adapter.clone());
	let header = chain.chain_head().unwrap();

	let tx = test_transaction(&keychain, &chain, 1, 2, 10_000, 1_000);
	pool.add_to_pool(TxSource::Broadcast, tx.clone(), false, &header)
		.unwrap();
	assert_eq!(pool.total_size(), 1);
	assert_eq!(adapter.broadcast.lock().len(), 1);

	// the same tx again is a duplicate
	let res = pool.add_to_pool(TxSource::Broadcast, tx, false, &header);
	assert_eq!(res.err(), Some(PoolError::DuplicateTx));
}

#[test]
fn low_fee_tx_rejected() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let chain = DummyChain::new();
	let adapter = Arc::new(RecordingAdapter::new(true));
	let mut pool = test_setup(&chain, adapter);
	let header = chain.chain_head().unwrap();

	// a 1-in 1-out tx has weight 25; a fee of 10 is below the threshold
	let tx = test_transaction(&keychain, &chain, 1, 2, 10_000, 10);
	let res = pool.add_to_pool(TxSource::Broadcast, tx, false, &header);
	match res {
		Err(PoolError::LowFeeTransaction(_)) => {}
		other => panic!("expected low fee error, got {:?}", other.err()),
	}
}

#[test]
fn stem_tx_forwarded_to_relay() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let chain = DummyChain::new();
	let adapter = Arc::new(RecordingAdapter::new(true));
	let mut pool = test_setup(&chain, adapter.clone());
	let header = chain.chain_head().unwrap();

	let tx = test_transaction(&keychain, &chain, 1, 2, 10_000, 1_000);
	pool.add_to_pool(TxSource::Stem, tx.clone(), true, &header)
		.unwrap();

	// stays in the stempool and went to the (single) relay peer on the
	// stem channel, nothing broadcast
	assert_eq!(pool.stempool.size(), 1);
	assert_eq!(pool.total_size(), 0);
	assert_eq!(adapter.stemmed.lock().len(), 1);
	assert_eq!(adapter.broadcast.lock().len(), 0);
}

#[test]
fn stem_tx_fluffed_when_no_relay() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let chain = DummyChain::new();
	let adapter = Arc::new(RecordingAdapter::new(false));
	let mut pool = test_setup(&chain, adapter.clone());
	let header = chain.chain_head().unwrap();

	let tx = test_transaction(&keychain, &chain, 1, 2, 10_000, 1_000);
	pool.add_to_pool(TxSource::Stem, tx.clone(), true, &header)
		.unwrap();

	// with no stem relay available the tx got fluffed instead
	assert_eq!(pool.stempool.size(), 0);
	assert_eq!(pool.total_size(), 1);
	assert_eq!(adapter.broadcast.lock().len(), 1);
}

#[test]
fn embargo_expiry_force_fluffs() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let chain = DummyChain::new();
	let adapter = Arc::new(RecordingAdapter::new(true));
	let mut pool = test_setup(&chain, adapter.clone());
	let header = chain.chain_head().unwrap();

	let tx = test_transaction(&keychain, &chain, 1, 2, 10_000, 1_000);
	pool.add_to_pool(TxSource::Stem, tx.clone(), true, &header)
		.unwrap();
	assert_eq!(pool.stempool.size(), 1);

	// nothing has expired yet
	assert!(pool.embargo_expired_entries(0).is_empty());

	// age the entry past the embargo; the monitor would now force-fluff it
	let embargo = pool.dandelion_config.embargo_secs;
	pool.stempool.entries[0].tx_at =
		Utc::now() - Duration::seconds(i64::from(embargo) + 1);

	let expired = pool.embargo_expired_entries(0);
	assert_eq!(expired.len(), 1);

	for entry in expired {
		let mut entry = entry;
		entry.src = TxSource::EmbargoExpired;
		pool.fluff(entry, &header).unwrap();
	}

	// the tx moved from the stempool to the txpool and was broadcast to
	// all peers
	assert_eq!(pool.stempool.size(), 0);
	assert_eq!(pool.total_size(), 1);
	assert_eq!(adapter.broadcast.lock().len(), 1);
	assert!(pool.txpool.contains_tx(tx.hash()));
}

#[test]
fn block_reconciliation_removes_confirmed() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let chain = DummyChain::new();
	let adapter = Arc::new(RecordingAdapter::new(true));
	let mut pool = test_setup(&chain, adapter);
	let header = chain.chain_head().unwrap();

	let tx1 = test_transaction(&keychain, &chain, 1, 2, 10_000, 1_000);
	let tx2 = test_transaction(&keychain, &chain, 3, 4, 20_000, 1_000);
	pool.add_to_pool(TxSource::Broadcast, tx1.clone(), false, &header)
		.unwrap();
	pool.add_to_pool(TxSource::Broadcast, tx2.clone(), false, &header)
		.unwrap();
	assert_eq!(pool.total_size(), 2);

	// "mine" tx1 into a block and reconcile: tx1's inputs leave the utxo
	let reward_id = ExtKeychain::derive_key_id(1, 10, 0, 0, 0);
	let reward = reward::output(&keychain, &reward_id, tx1.fee()).unwrap();
	let block = Block::new(&header, vec![tx1.clone()], Difficulty::min(), reward).unwrap();

	for input in tx1.inputs() {
		chain.spend_utxo(&input.commitment());
	}
	chain.set_head(block.header.clone());

	pool.reconcile_block(&block).unwrap();

	// tx1 removed as confirmed, tx2 still valid and retained
	assert_eq!(pool.total_size(), 1);
	assert!(pool.txpool.contains_tx(tx2.hash()));
	assert!(!pool.txpool.contains_tx(tx1.hash()));
}

#[test]
fn retrieve_transactions_by_short_id() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let chain = DummyChain::new();
	let adapter = Arc::new(RecordingAdapter::new(true));
	let mut pool = test_setup(&chain, adapter);
	let header = chain.chain_head().unwrap();

	let tx = test_transaction(&keychain, &chain, 1, 2, 10_000, 1_000);
	pool.add_to_pool(TxSource::Broadcast, tx.clone(), false, &header)
		.unwrap();

	use self::core::core::id::ShortIdentifiable;
	let block_hash = header.hash();
	let nonce = 42;
	let short_id = tx.kernels()[0].short_id(&block_hash, nonce);

	let (found, missing) = pool.retrieve_transactions(block_hash, nonce, &[short_id]);
	assert_eq!(found.len(), 1);
	assert_eq!(found[0], tx);
	assert!(missing.is_empty());

	// an unknown short id is reported as missing
	let unknown = self::core::core::ShortId::zero();
	let (found, missing) = pool.retrieve_transactions(block_hash, nonce, &[unknown]);
	assert!(found.is_empty());
	assert_eq!(missing.len(), 1);
}
