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

//! The primary module containing the implementations of the transaction pool
//! and its top-level members.

use chrono::prelude::{DateTime, Utc};

use crate::core::consensus;
use crate::core::core::block;
use crate::core::core::committed;
use crate::core::core::hash::Hash;
use crate::core::core::transaction::{self, Transaction};
use crate::core::core::BlockHeader;

/// Dandelion "epoch" length.
const DANDELION_EPOCH_SECS: u16 = 600;

/// Dandelion embargo timer.
const DANDELION_EMBARGO_SECS: u16 = 180;

/// Dandelion aggregation timer.
const DANDELION_AGGREGATION_SECS: u16 = 30;

/// Dandelion stem probability (stem 90% of the time, fluff 10%).
const DANDELION_STEM_PROBABILITY: u8 = 90;

/// Configuration for "Dandelion".
/// Note: shared between p2p and pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DandelionConfig {
	/// Length of each "epoch".
	#[serde(default = "default_dandelion_epoch_secs")]
	pub epoch_secs: u16,
	/// Dandelion embargo timer. Fluff and broadcast individual txs if not
	/// seen on the network before the embargo expires.
	#[serde(default = "default_dandelion_embargo_secs")]
	pub embargo_secs: u16,
	/// Dandelion aggregation timer: the patience window in which stem txs
	/// to the same relay peer are merged into a single aggregate tx.
	#[serde(default = "default_dandelion_aggregation_secs")]
	pub aggregation_secs: u16,
	/// Dandelion stem probability (stem vs fluff, per epoch).
	#[serde(default = "default_dandelion_stem_probability")]
	pub stem_probability: u8,
	/// Always stem our (pushed via api) txs regardless of stem/fluff epoch
	/// (defaults to true)
	#[serde(default = "default_dandelion_always_stem_our_txs")]
	pub always_stem_our_txs: bool,
}

impl Default for DandelionConfig {
	fn default() -> DandelionConfig {
		DandelionConfig {
			epoch_secs: default_dandelion_epoch_secs(),
			embargo_secs: default_dandelion_embargo_secs(),
			aggregation_secs: default_dandelion_aggregation_secs(),
			stem_probability: default_dandelion_stem_probability(),
			always_stem_our_txs: default_dandelion_always_stem_our_txs(),
		}
	}
}

fn default_dandelion_epoch_secs() -> u16 {
	DANDELION_EPOCH_SECS
}

fn default_dandelion_embargo_secs() -> u16 {
	DANDELION_EMBARGO_SECS
}

fn default_dandelion_aggregation_secs() -> u16 {
	DANDELION_AGGREGATION_SECS
}

fn default_dandelion_stem_probability() -> u8 {
	DANDELION_STEM_PROBABILITY
}

fn default_dandelion_always_stem_our_txs() -> bool {
	true
}

/// Transaction pool configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
	/// Base fee for a transaction to be accepted by the pool. The transaction
	/// weight is computed from its number of inputs, outputs and kernels and
	/// multiplied by the base fee to compare to the actual transaction fee.
	#[serde(default = "default_accept_fee_base")]
	pub accept_fee_base: u64,

	/// Maximum capacity of the pool in number of transactions
	#[serde(default = "default_max_pool_size")]
	pub max_pool_size: usize,

	/// Maximum capacity of the pool in number of transactions
	#[serde(default = "default_max_stempool_size")]
	pub max_stempool_size: usize,

	/// Maximum total weight of transactions that can get selected to build a
	/// block from. Allows miners to restrict the maximum weight of their
	/// blocks.
	#[serde(default = "default_mineable_max_weight")]
	pub mineable_max_weight: usize,
}

impl Default for PoolConfig {
	fn default() -> PoolConfig {
		PoolConfig {
			accept_fee_base: default_accept_fee_base(),
			max_pool_size: default_max_pool_size(),
			max_stempool_size: default_max_stempool_size(),
			mineable_max_weight: default_mineable_max_weight(),
		}
	}
}

fn default_accept_fee_base() -> u64 {
	consensus::MILLI_LEPTON
}
fn default_max_pool_size() -> usize {
	50_000
}
fn default_max_stempool_size() -> usize {
	50_000
}
fn default_mineable_max_weight() -> usize {
	consensus::MAX_BLOCK_WEIGHT
}

/// Represents a single entry in the pool.
/// A single (possibly aggregated) transaction.
#[derive(Clone, Debug)]
pub struct PoolEntry {
	/// Info on where this tx originated from.
	pub src: TxSource,
	/// Timestamp of when this tx was originally added to the pool.
	pub tx_at: DateTime<Utc>,
	/// The transaction itself.
	pub tx: Transaction,
}

/// Used to make decisions based on transaction acceptance priority from
/// various sources. For example, a node may want to bypass pool size
/// restrictions when accepting a transaction from a local wallet.
///
/// Most likely this will evolve to contain some sort of network identifier,
/// once we get a better sense of what transaction building protocols look
/// like.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TxSource {
	/// Pushed to us via the api (i.e. our user sent it from their wallet).
	PushApi,
	/// Broadcast to us from a peer.
	Broadcast,
	/// Relayed to us on the Dandelion stem channel.
	Stem,
	/// An embargo expired and we fluffed the tx ourselves.
	EmbargoExpired,
	/// Fluffed to us by a peer deciding to end a stem.
	Fluff,
	/// A multi-kernel tx deaggregated against the existing pool contents.
	Deaggregate,
}

impl TxSource {
	/// Convenience to check if this tx was created by our own node.
	pub fn is_pushed(&self) -> bool {
		match self {
			TxSource::PushApi => true,
			_ => false,
		}
	}
}

/// Possible errors when interacting with the transaction pool.
#[derive(Debug, Fail, PartialEq)]
pub enum PoolError {
	/// An invalid pool entry caused by underlying tx validation error
	#[fail(display = "Invalid Tx {}", _0)]
	InvalidTx(transaction::Error),
	/// An invalid pool entry caused by underlying block validation error
	#[fail(display = "Invalid Block {}", _0)]
	InvalidBlock(block::Error),
	/// Underlying keychain error.
	#[fail(display = "Keychain error {}", _0)]
	Keychain(crate::util::secp::Error),
	/// Underlying "committed" error.
	#[fail(display = "Committed error {}", _0)]
	Committed(committed::Error),
	/// Attempt to add a transaction to the pool with lock_height
	/// greater than height of current block
	#[fail(display = "Immature transaction")]
	ImmatureTransaction,
	/// Attempt to spend a coinbase output before it has sufficiently matured.
	#[fail(display = "Immature coinbase")]
	ImmatureCoinbase,
	/// Problem propagating a stem tx to the next Dandelion relay node.
	#[fail(display = "Dandelion error")]
	DandelionError,
	/// Transaction pool is over capacity, can't accept more transactions
	#[fail(display = "Over capacity")]
	OverCapacity,
	/// Transaction fee is too low given its weight
	#[fail(display = "Low fee transaction {}", _0)]
	LowFeeTransaction(u64),
	/// Attempt to add a duplicate output to the pool.
	#[fail(display = "Duplicate commitment")]
	DuplicateCommitment,
	/// Attempt to add a duplicate tx to the pool.
	#[fail(display = "Duplicate tx")]
	DuplicateTx,
	/// NRD kernels will not be accepted by the txpool/stempool pre-HF3.
	#[fail(display = "NRD kernel not enabled")]
	NRDKernelNotEnabled,
	/// NRD kernels are not valid if disabled locally via "feature flag".
	#[fail(display = "NRD kernel relative height")]
	NRDKernelRelativeHeight,
	/// Other kinds of error (not yet pulled out into meaningful errors).
	#[fail(display = "General pool error {}", _0)]
	Other(String),
}

impl From<transaction::Error> for PoolError {
	fn from(e: transaction::Error) -> PoolError {
		PoolError::InvalidTx(e)
	}
}

impl From<block::Error> for PoolError {
	fn from(e: block::Error) -> PoolError {
		PoolError::InvalidBlock(e)
	}
}

impl From<committed::Error> for PoolError {
	fn from(e: committed::Error) -> PoolError {
		PoolError::Committed(e)
	}
}

/// Interface that the pool requires from a blockchain implementation.
pub trait BlockChain: Sync + Send {
	/// Verify the block chain tip header.
	fn chain_head(&self) -> Result<BlockHeader, PoolError>;

	/// Get a block header by hash.
	fn get_block_header(&self, hash: &Hash) -> Result<BlockHeader, PoolError>;

	/// Validate a transaction against the current utxo.
	fn validate_tx(&self, tx: &Transaction) -> Result<(), PoolError>;

	/// Verify any coinbase outputs being spent have sufficiently matured.
	fn verify_coinbase_maturity(&self, tx: &Transaction) -> Result<(), PoolError>;

	/// Verify any tx lock heights are valid for the chain tip.
	fn verify_tx_lock_height(&self, tx: &Transaction) -> Result<(), PoolError>;
}

/// Bridge between the transaction pool and the rest of the system. Handles
/// downstream processing of valid transactions by the rest of the system,
/// most importantly the broadcasting of transactions to our peers.
pub trait PoolAdapter: Send + Sync {
	/// The transaction pool has accepted this transaction as valid.
	fn tx_accepted(&self, entry: &PoolEntry);

	/// The stem transaction pool has accepted this transactions as valid.
	/// If we are "fluffing" in this epoch (or have no relay peer) return a
	/// DandelionError so the caller fluffs the tx instead.
	fn stem_tx_accepted(&self, entry: &PoolEntry) -> Result<(), PoolError>;
}

/// Dummy adapter used as a placeholder for real implementations
pub struct NoopPoolAdapter {}

impl PoolAdapter for NoopPoolAdapter {
	fn tx_accepted(&self, _entry: &PoolEntry) {}
	fn stem_tx_accepted(&self, _entry: &PoolEntry) -> Result<(), PoolError> {
		Ok(())
	}
}

/// Tracks the "epoch" of the Dandelion relay: one relay peer is chosen per
/// epoch, and the stem-vs-fluff decision is made once per epoch based on
/// the configured stem probability. The generic R is whatever "relay peer"
/// representation the p2p layer provides.
pub struct DandelionEpoch<R> {
	config: DandelionConfig,
	// When did this epoch start?
	start_time: Option<DateTime<Utc>>,
	// Are we stemming (or fluffing) in this epoch?
	is_stem: bool,
	// Our current Dandelion relay peer.
	relay_peer: Option<R>,
}

impl<R> DandelionEpoch<R> {
	/// Create a new epoch tracker with the provided config.
	pub fn new(config: DandelionConfig) -> DandelionEpoch<R> {
		DandelionEpoch {
			config,
			start_time: None,
			is_stem: true,
			relay_peer: None,
		}
	}

	/// Is the current epoch expired (or was one never started)?
	pub fn is_expired(&self) -> bool {
		match self.start_time {
			None => true,
			Some(start_time) => {
				let epoch_secs = i64::from(self.config.epoch_secs);
				Utc::now().timestamp().saturating_sub(start_time.timestamp()) > epoch_secs
			}
		}
	}

	/// Start a new epoch: pick a new relay peer via the provided selector
	/// and re-roll the stem/fluff decision.
	pub fn next_epoch<F>(&mut self, select_relay: F)
	where
		F: FnOnce() -> Option<R>,
	{
		self.start_time = Some(Utc::now());
		self.relay_peer = select_relay();

		// If stem_probability == 90 then we stem 90% of the time.
		let mut rng = rand::thread_rng();
		let random: u8 = rand::Rng::gen_range(&mut rng, 0, 100);
		self.is_stem = random < self.config.stem_probability;

		let addr = if self.relay_peer.is_some() {
			"set"
		} else {
			"none"
		};
		info!(
			"DandelionEpoch: next_epoch: is_stem: {} ({}%), relay: {}",
			self.is_stem, self.config.stem_probability, addr
		);
	}

	/// Are we stemming txs in the current epoch?
	pub fn is_stem(&self) -> bool {
		self.is_stem
	}

	/// Always stem our own (pushed via api) txs?
	pub fn always_stem_our_txs(&self) -> bool {
		self.config.always_stem_our_txs
	}

	/// The current Dandelion relay peer, if any.
	pub fn relay_peer(&self) -> Option<&R> {
		self.relay_peer.as_ref()
	}
}
