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

//! Adapters connecting new block, new transaction and accepted transaction
//! events to consumers of those events.

use chrono::prelude::*;
use std::fs::File;
use std::sync::Arc;

use crate::chain::{self, BlockStatus, Options, SyncState, SyncStatus};
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::transaction::Transaction;
use crate::core::core::verifier_cache::VerifierCache;
use crate::core::core::{Block, BlockHeader, CompactBlock};
use crate::core::pow::Difficulty;
use crate::p2p;
use crate::pool::{self, BlockChain, PoolAdapter, PoolEntry};
use crate::util::{Mutex, OneTime, RwLock};

/// Implementation of the NetAdapter for the . Gets notified when new
/// blocks and transactions are received and forwards to the chain and pool
/// implementations.
pub struct NetToChainAdapter {
	sync_state: Arc<SyncState>,
	chain: Arc<chain::Chain>,
	tx_pool: Arc<RwLock<pool::TransactionPool>>,
	peers: OneTime<Arc<p2p::Peers>>,
}

impl p2p::ChainAdapter for NetToChainAdapter {
	fn total_difficulty(&self) -> Result<Difficulty, p2p::Error> {
		Ok(self.chain.head().map_err(|_| p2p::Error::Chain)?.total_difficulty)
	}

	fn total_height(&self) -> Result<u64, p2p::Error> {
		Ok(self.chain.head().map_err(|_| p2p::Error::Chain)?.height)
	}

	fn get_transaction(&self, kernel_hash: Hash) -> Option<Transaction> {
		self.tx_pool.read().retrieve_tx_by_kernel_hash(kernel_hash)
	}

	fn tx_kernel_received(
		&self,
		kernel_hash: Hash,
		peer_info: &p2p::PeerInfo,
	) -> Result<bool, p2p::Error> {
		// nothing much we can do with a new transaction while syncing
		if self.sync_state.is_syncing() {
			return Ok(true);
		}

		let tx = self.tx_pool.read().retrieve_tx_by_kernel_hash(kernel_hash);

		if tx.is_none() {
			// we do not have this tx, ask the peer for the full tx
			if let Some(peer) = self.peers().get_connected_peer(peer_info.addr) {
				peer.send_tx_request(kernel_hash)
					.map_err(|_| p2p::Error::Chain)?;
			}
		}
		Ok(true)
	}

	fn transaction_received(&self, tx: Transaction, stem: bool) -> Result<bool, p2p::Error> {
		// nothing much we can do with a new transaction while syncing
		if self.sync_state.is_syncing() {
			return Ok(true);
		}

		let source = if stem {
			pool::TxSource::Stem
		} else {
			pool::TxSource::Broadcast
		};

		let header = match self.chain.head_header() {
			Ok(header) => header,
			Err(_) => return Ok(true),
		};

		let tx_hash = tx.hash();

		let mut tx_pool = self.tx_pool.write();
		match tx_pool.add_to_pool(source, tx, stem, &header) {
			Ok(_) => Ok(true),
			Err(e) => {
				debug!("Transaction {} rejected: {:?}", tx_hash, e);
				// Pool errors are not grounds for a ban; only an invalid tx
				// proper is.
				match e {
					pool::PoolError::InvalidTx(_) => Ok(false),
					_ => Ok(true),
				}
			}
		}
	}

	fn block_received(
		&self,
		b: Block,
		peer_info: &p2p::PeerInfo,
		was_requested: bool,
	) -> Result<bool, p2p::Error> {
		debug!(
			"Received block {} at {} from {} [in/out/kern: {}/{}/{}] going to process.",
			b.hash(),
			b.header.height,
			peer_info.addr,
			b.inputs().len(),
			b.outputs().len(),
			b.kernels().len(),
		);
		self.process_block(b, peer_info, was_requested)
	}

	fn compact_block_received(
		&self,
		cb: CompactBlock,
		peer_info: &p2p::PeerInfo,
	) -> Result<bool, p2p::Error> {
		let bhash = cb.hash();
		debug!(
			"Received compact_block {} at {} from {} [out/kern/kern_ids: {}/{}/{}] going to process.",
			bhash,
			cb.header.height,
			peer_info.addr,
			cb.out_full().len(),
			cb.kern_full().len(),
			cb.kern_ids().len(),
		);

		let cb_hash = cb.hash();
		if cb.kern_ids().is_empty() {
			// push the freshly hydrated block through the chain pipeline
			match crate::core::core::Block::hydrate_from(cb, &[]) {
				Ok(block) => self.process_block(block, peer_info, false),
				Err(e) => {
					debug!("Invalid hydrated block {}: {:?}", cb_hash, e);
					return Ok(false);
				}
			}
		} else {
			// check at least the header is valid before hydrating
			if let Err(e) = self.chain.process_block_header(&cb.header, self.chain_opts(false)) {
				debug!("Invalid compact block header {}: {:?}", cb_hash, e.kind());
				return Ok(!e.is_bad_data());
			}

			let (txs, missing_short_ids) = {
				let tx_pool = self.tx_pool.read();
				tx_pool.retrieve_transactions(cb.hash(), cb.nonce, cb.kern_ids())
			};

			debug!(
				"compact_block_received: txs from tx pool - {}, (unknown kern_ids: {})",
				txs.len(),
				missing_short_ids.len(),
			);

			// If we have missing kernels then we know we cannot hydrate this
			// compact block: request the full block from the sending peer.
			if !missing_short_ids.is_empty() {
				self.request_block(&cb.header, peer_info);
				return Ok(true);
			}

			// attempt to hydrate the block from the compact block + txs
			match crate::core::core::Block::hydrate_from(cb, &txs) {
				Ok(block) => {
					// The block may not validate because our pool txs differ
					// (e.g. different aggregation cut-through); fall back to
					// requesting the full block.
					let res = self.process_block(block, peer_info, false);
					match res {
						Ok(true) => Ok(true),
						_ => {
							debug!(
								"compact_block_received: hydrated block failed, requesting full block"
							);
							self.request_block(&cb.header, peer_info);
							Ok(true)
						}
					}
				}
				Err(e) => {
					debug!("Invalid hydrated block {}: {:?}", cb_hash, e);
					Ok(false)
				}
			}
		}
	}

	fn header_received(
		&self,
		bh: BlockHeader,
		peer_info: &p2p::PeerInfo,
	) -> Result<bool, p2p::Error> {
		// A new header has been broadcast to us ("header first"
		// propagation): validate it and if it checks out request the
		// compact block.
		let res = self.chain.process_block_header(&bh, self.chain_opts(false));

		if let Err(e) = res {
			debug!(
				"Block header {} refused by chain: {:?}",
				bh.hash(),
				e.kind()
			);
			if e.is_bad_data() {
				return Ok(false);
			} else {
				// we got an error when trying to process the block header
				// but nothing serious enough to need to ban the peer
				return Ok(true);
			}
		}

		// we have successfully processed a block header
		// so we can go request the block itself
		self.request_compact_block(&bh, peer_info);

		// done receiving the header
		Ok(true)
	}

	fn headers_received(
		&self,
		bhs: &[BlockHeader],
		peer_info: &p2p::PeerInfo,
	) -> Result<bool, p2p::Error> {
		info!(
			"Received {} block headers from {}",
			bhs.len(),
			peer_info.addr
		);

		if bhs.is_empty() {
			return Ok(false);
		}

		// try to add headers to our header chain
		match self.chain.sync_block_headers(bhs, self.chain_opts(true)) {
			Ok(_) => Ok(true),
			Err(e) => {
				debug!("Block headers refused by chain: {:?}", e.kind());
				if e.is_bad_data() {
					Ok(false)
				} else {
					Ok(true)
				}
			}
		}
	}

	fn locate_headers(&self, locator: &[Hash]) -> Result<Vec<BlockHeader>, p2p::Error> {
		debug!("locate_headers: {:?}", locator);

		let header = match self.find_common_header(locator) {
			Some(header) => header,
			None => return Ok(vec![]),
		};

		debug!("locate_headers: common header: {:?}", header.hash());

		// looks like we know one, getting as many following headers as
		// allowed from the candidate header chain
		let hh = header.height;
		let mut headers = vec![];
		for h in (hh + 1)..=(hh + (p2p::MAX_BLOCK_HEADERS as u64)) {
			match self.chain.get_candidate_header_by_height(h) {
				Ok(header) => headers.push(header),
				Err(_) => break,
			}
		}

		debug!("locate_headers: returning headers: {}", headers.len());

		Ok(headers)
	}

	/// Gets a full block by its hash.
	fn get_block(&self, h: Hash) -> Option<Block> {
		self.chain.get_block(&h).ok()
	}

	/// Provides a reading view into the current txhashset state as well as
	/// the required indexes for a consumer to rewind to a consistent state
	/// at the provided block hash.
	fn txhashset_read(&self, h: Hash) -> Option<p2p::TxHashSetRead> {
		match self.chain.txhashset_read(h) {
			Ok((output_index, kernel_index, read)) => Some(p2p::TxHashSetRead {
				output_index,
				kernel_index,
				reader: read,
			}),
			Err(e) => {
				warn!("Couldn't produce txhashset data for block {}: {:?}", h, e);
				None
			}
		}
	}

	fn txhashset_receive_ready(&self) -> bool {
		match self.sync_state.status() {
			SyncStatus::TxHashsetDownload { .. } => true,
			_ => false,
		}
	}

	fn txhashset_download_update(
		&self,
		start_time: DateTime<Utc>,
		downloaded_size: u64,
		total_size: u64,
	) -> bool {
		match self.sync_state.status() {
			SyncStatus::TxHashsetDownload { .. } => {
				let _ = start_time;
				self.sync_state.update(SyncStatus::TxHashsetDownload {
					downloaded_size,
					total_size,
				});
				true
			}
			_ => false,
		}
	}

	/// Writes a reading view on a txhashset state that's been provided to us.
	/// If we're willing to accept that new state, the data stream will be
	/// read as a zip file, unzipped and the resulting state files should be
	/// rewound to the provided indexes.
	fn txhashset_write(
		&self,
		h: Hash,
		txhashset_data: File,
		_peer_info: &p2p::PeerInfo,
	) -> Result<bool, p2p::Error> {
		// check status again after download, in case 2 txhashsets made it
		// somehow
		if let SyncStatus::TxHashsetDownload { .. } = self.sync_state.status() {
		} else {
			return Ok(false);
		}

		match self
			.chain
			.txhashset_write(h, txhashset_data, self.sync_state.as_ref())
		{
			Ok(_) => {
				info!("txhashset written to chain");
				Ok(true)
			}
			Err(e) => {
				error!("Failed to save txhashset archive: {}", e);
				self.sync_state.set_sync_error(format!("{}", e));
				Ok(!e.is_bad_data())
			}
		}
	}
}

impl p2p::NetAdapter for NetToChainAdapter {
	/// Find good peers we know with the provided capability and return their
	/// addresses.
	fn find_peer_addrs(&self, capab: p2p::Capabilities) -> Vec<p2p::PeerAddr> {
		let peers = self
			.peers()
			.find_peers(p2p::State::Healthy, capab, p2p::MAX_PEER_ADDRS as usize);
		trace!("find_peer_addrs: {} healthy peers picked", peers.len());
		peers.iter().map(|p| p.addr).collect()
	}

	/// A list of peers has been received from one of our peers.
	fn peer_addrs_received(&self, peer_addrs: Vec<p2p::PeerAddr>) {
		self.peers().peer_addrs_received(peer_addrs)
	}

	fn peer_difficulty(&self, addr: p2p::PeerAddr, diff: Difficulty, height: u64) {
		self.peers().peer_difficulty(addr, diff, height)
	}

	fn is_banned(&self, addr: p2p::PeerAddr) -> bool {
		self.peers().is_banned(addr)
	}
}

impl NetToChainAdapter {
	/// Construct a new NetToChainAdapter instance
	pub fn new(
		sync_state: Arc<SyncState>,
		chain: Arc<chain::Chain>,
		tx_pool: Arc<RwLock<pool::TransactionPool>>,
	) -> NetToChainAdapter {
		NetToChainAdapter {
			sync_state,
			chain,
			tx_pool,
			peers: OneTime::new(),
		}
	}

	/// Initialize a NetToChainAdaptor with reference to a Peers object.
	/// Required due to any circular reference between the chain and p2p.
	pub fn init(&self, peers: Arc<p2p::Peers>) {
		self.peers.init(peers);
	}

	fn peers(&self) -> Arc<p2p::Peers> {
		self.peers.borrow()
	}

	// Find the first locator hash that refers to a known header on our
	// candidate chain.
	fn find_common_header(&self, locator: &[Hash]) -> Option<BlockHeader> {
		for hash in locator {
			if let Ok(header) = self.chain.get_block_header(hash) {
				if let Ok(header_at) =
					self.chain.get_candidate_header_by_height(header.height)
				{
					if header.hash() == header_at.hash() {
						return Some(header);
					}
				}
			}
		}
		None
	}

	// pushing the new block through the chain pipeline
	// remembering to reset the head if we have a bad block
	fn process_block(
		&self,
		b: Block,
		peer_info: &p2p::PeerInfo,
		was_requested: bool,
	) -> Result<bool, p2p::Error> {
		// We cannot process blocks earlier than the horizon so check for this
		// here.
		{
			let head = self.chain.head().map_err(|_| p2p::Error::Chain)?;
			let horizon = head
				.height
				.saturating_sub(crate::core::consensus::CUT_THROUGH_HORIZON as u64);
			if b.header.height < horizon {
				return Ok(true);
			}
		}

		let bhash = b.hash();
		let prev_hash = b.header.prev_hash;
		let res = self.chain.process_block(b, self.chain_opts(was_requested));
		match res {
			Ok(_) => Ok(true),
			Err(ref e) if e.is_bad_data() => {
				debug!("process_block: {} is a bad block", bhash);
				Ok(false)
			}
			Err(e) => {
				match e.kind() {
					chain::ErrorKind::Orphan => {
						// go fetch the missing parent from the sending peer
						if !self.sync_state.is_syncing() {
							debug!("process_block: received an orphan block: {}", bhash);
							self.request_block_by_hash(prev_hash, peer_info)
						}
						Ok(true)
					}
					_ => {
						debug!(
							"process_block: block {} refused by chain: {}",
							bhash,
							e.kind()
						);
						Ok(true)
					}
				}
			}
		}
	}

	// After we have received a block header in "header first" propagation
	// we need to go request the block (compact representation) from the
	// same peer that gave us the header (unless we have already accepted the
	// block).
	fn request_compact_block(&self, bh: &BlockHeader, peer_info: &p2p::PeerInfo) {
		if self.chain.block_exists(bh.hash()).unwrap_or(false) {
			return;
		}
		if let Some(peer) = self.peers().get_connected_peer(peer_info.addr) {
			if let Err(e) = peer.send_compact_block_request(bh.hash()) {
				debug!("send_compact_block_request error: {:?}", e);
			}
		}
	}

	fn request_block(&self, bh: &BlockHeader, peer_info: &p2p::PeerInfo) {
		self.request_block_by_hash(bh.hash(), peer_info)
	}

	fn request_block_by_hash(&self, h: Hash, peer_info: &p2p::PeerInfo) {
		if let Some(peer) = self.peers().get_connected_peer(peer_info.addr) {
			if let Err(e) = peer.send_block_request(h) {
				debug!("send_block_request error: {:?}", e);
			}
		}
	}

	/// Prepare options for the chain pipeline
	fn chain_opts(&self, was_requested: bool) -> Options {
		let opts = if was_requested || self.sync_state.is_syncing() {
			Options::SYNC
		} else {
			Options::NONE
		};
		opts
	}
}

/// Implementation of the ChainAdapter for the network. Gets notified when the
/// accepted a new block, asking the pool to update its state and
/// the network to broadcast the block
pub struct ChainToPoolAndNetAdapter {
	tx_pool: Arc<RwLock<pool::TransactionPool>>,
	peers: OneTime<Arc<p2p::Peers>>,
}

impl chain::ChainAdapter for ChainToPoolAndNetAdapter {
	fn block_accepted(&self, b: &Block, status: BlockStatus, opts: Options) {
		// not broadcasting blocks received through sync
		if !opts.contains(chain::Options::SYNC) {
			// If we mined the block then we want to broadcast the compact
			// block. If we received the block from another node then broadcast
			// "header first" to minimize network traffic.
			if opts.contains(Options::MINE) {
				// propagate compact block out if we mined the block
				let cb: CompactBlock = b.clone().into();
				self.peers().broadcast_compact_block(&cb);
			} else {
				// "header first" propagation if we are not the originator of
				// this block
				self.peers().broadcast_header(&b.header);
			}
		}

		// Reconcile the txpool against the new block *after* we have
		// broadcast it too our peers. We "reconcile" with the txpool on
		// every block accepted to the chain, a fork or not.
		match status {
			BlockStatus::Next | BlockStatus::Reorg(_) => {
				let mut tx_pool = self.tx_pool.write();
				if let Err(e) = tx_pool.reconcile_block(b) {
					error!("Pool could not update itself at block {}: {:?}", b.hash(), e);
				}
			}
			BlockStatus::Fork => {
				// the pool state is unchanged by a losing fork block
			}
		}
	}
}

impl ChainToPoolAndNetAdapter {
	/// Construct a ChainToPoolAndNetAdapter instance.
	pub fn new(tx_pool: Arc<RwLock<pool::TransactionPool>>) -> ChainToPoolAndNetAdapter {
		ChainToPoolAndNetAdapter {
			tx_pool,
			peers: OneTime::new(),
		}
	}

	/// Initialize a ChainToPoolAndNetAdapter instance with a handle to the
	/// Peers.
	pub fn init(&self, peers: Arc<p2p::Peers>) {
		self.peers.init(peers);
	}

	fn peers(&self) -> Arc<p2p::Peers> {
		self.peers.borrow()
	}
}

/// Adapter between the transaction pool and the p2p layer, to relay
/// transactions that have been accepted.
pub struct PoolToNetAdapter {
	peers: OneTime<Arc<p2p::Peers>>,
	dandelion_epoch: Arc<Mutex<pool::DandelionEpoch<Arc<p2p::Peer>>>>,
}

impl PoolAdapter for PoolToNetAdapter {
	fn tx_accepted(&self, entry: &PoolEntry) {
		self.peers().broadcast_transaction(&entry.tx);
	}

	fn stem_tx_accepted(&self, entry: &PoolEntry) -> Result<(), pool::PoolError> {
		// Take write lock on the current epoch.
		// We need to be able to update the epoch as part of this check.
		let mut epoch = self.dandelion_epoch.lock();

		// If "stem" epoch attempt to relay the tx to the next Dandelion relay.
		// Fallback to immediately fluffing the tx if we cannot stem for any
		// reason.
		// If "fluff" epoch then nothing to do right now (fluff via Dandelion
		// monitor). If node is configured to always stem our (pushed via api)
		// txs then do so.
		if epoch.is_expired() {
			let peers = self.peers();
			epoch.next_epoch(|| {
				peers.update_dandelion_relay();
				peers.get_dandelion_relay().map(|(_, p)| p)
			});
		}

		let stem = epoch.is_stem() || (entry.src.is_pushed() && epoch.always_stem_our_txs());

		if stem {
			debug!("Not fluffing stem tx, we are in stem epoch.");
			if let Some(relay) = epoch.relay_peer() {
				if relay.is_connected() {
					return relay
						.send_stem_transaction(&entry.tx)
						.map_err(|_| pool::PoolError::DandelionError);
				}
			}
			// no relay to stem through, fluff instead
			return Err(pool::PoolError::DandelionError);
		}

		// Inform the caller (pool) this tx should be fluffed.
		Err(pool::PoolError::DandelionError)
	}
}

impl PoolToNetAdapter {
	/// Create a new pool to net adapter
	pub fn new(config: pool::DandelionConfig) -> PoolToNetAdapter {
		PoolToNetAdapter {
			peers: OneTime::new(),
			dandelion_epoch: Arc::new(Mutex::new(pool::DandelionEpoch::new(config))),
		}
	}

	/// Setup the p2p server on the adapter
	pub fn init(&self, peers: Arc<p2p::Peers>) {
		self.peers.init(peers);
	}

	/// Is the node in a stem epoch right now (without rolling the epoch)?
	pub fn is_stem(&self) -> bool {
		self.dandelion_epoch.lock().is_stem()
	}

	fn peers(&self) -> Arc<p2p::Peers> {
		self.peers.borrow()
	}
}

/// Implements the view of the  required by the TransactionPool to
/// operate. Mostly needed to break any direct lifecycle or implementation
/// dependency between the pool and the chain.
pub struct PoolToChainAdapter {
	chain: OneTime<Arc<chain::Chain>>,
}

impl PoolToChainAdapter {
	/// Create a new pool adapter
	pub fn new() -> PoolToChainAdapter {
		PoolToChainAdapter {
			chain: OneTime::new(),
		}
	}

	/// Set the pool adapter's chain. Should only be called once.
	pub fn set_chain(&self, chain_ref: Arc<chain::Chain>) {
		self.chain.init(chain_ref);
	}

	fn chain(&self) -> Arc<chain::Chain> {
		self.chain.borrow()
	}
}

impl BlockChain for PoolToChainAdapter {
	fn chain_head(&self) -> Result<BlockHeader, pool::PoolError> {
		self.chain()
			.head_header()
			.map_err(|_| pool::PoolError::Other("failed to get head_header".to_string()))
	}

	fn get_block_header(&self, hash: &Hash) -> Result<BlockHeader, pool::PoolError> {
		self.chain()
			.get_block_header(hash)
			.map_err(|_| pool::PoolError::Other("failed to get block_header".to_string()))
	}

	fn validate_tx(&self, tx: &Transaction) -> Result<(), pool::PoolError> {
		self.chain().validate_tx(tx).map_err(|e| match e.kind() {
			chain::ErrorKind::ImmatureCoinbase => pool::PoolError::ImmatureCoinbase,
			chain::ErrorKind::DuplicateCommitment(_) => pool::PoolError::DuplicateCommitment,
			_ => pool::PoolError::Other(format!("failed to validate tx: {}", e.kind())),
		})
	}

	fn verify_coinbase_maturity(&self, tx: &Transaction) -> Result<(), pool::PoolError> {
		self.chain()
			.verify_coinbase_maturity(tx)
			.map_err(|_| pool::PoolError::ImmatureCoinbase)
	}

	fn verify_tx_lock_height(&self, tx: &Transaction) -> Result<(), pool::PoolError> {
		let height = self
			.chain()
			.head_header()
			.map_err(|_| pool::PoolError::Other("failed to get head_header".to_string()))?
			.height;
		for kernel in tx.kernels() {
			if let crate::core::core::KernelFeatures::HeightLocked { lock_height, .. } =
				kernel.features
			{
				if lock_height > height + 1 {
					return Err(pool::PoolError::ImmatureTransaction);
				}
			}
		}
		Ok(())
	}
}
