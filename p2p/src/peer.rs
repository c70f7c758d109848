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

//! A single connected peer: tracks connection state, queues outgoing
//! messages, and remembers what was exchanged so we don't echo objects back
//! to the peer that sent them.

use std::fmt;
use std::fs::File;
use std::net::TcpStream;
use std::sync::Arc;

use chrono::prelude::*;
use lru_cache::LruCache;

use crate::conn;
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::{Block, BlockHeader, CompactBlock, Transaction};
use crate::core::pow::Difficulty;
use crate::handshake::Handshake;
use crate::msg::{self, BanReasonPayload, GetPeerAddrs, Locator, Ping, TxHashSetRequest, Type};
use crate::protocol::Protocol;
use crate::types::{
	Capabilities, ChainAdapter, Error, NetAdapter, PeerAddr, PeerInfo, ReasonForBan,
	TxHashSetRead,
};
use crate::util::{Mutex, RwLock};

const MAX_TRACK_SIZE: usize = 30;

/// State of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectedState {
	/// The peer is connected and the connection threads are running.
	Connected,
	/// We chose to disconnect (or the connection dropped).
	Disconnected,
	/// The peer was banned (by us).
	Banned,
}

/// A connected peer.
pub struct Peer {
	/// The static info negotiated on handshake.
	pub info: PeerInfo,
	state: Arc<RwLock<ConnectedState>>,
	// set of all hashes known to this peer (so no need to send)
	tracking_adapter: TrackingAdapter,
	connection: Option<Mutex<conn::Tracker>>,
}

impl fmt::Debug for Peer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Peer({:?})", &self.info.addr)
	}
}

impl Peer {
	// Only accept and connect can be externally used to build a peer
	fn new(info: PeerInfo, adapter: Arc<dyn NetAdapter>) -> Peer {
		Peer {
			info,
			state: Arc::new(RwLock::new(ConnectedState::Connected)),
			tracking_adapter: TrackingAdapter::new(adapter),
			connection: None,
		}
	}

	/// Accept an inbound connection and build a peer from the handshake.
	pub fn accept(
		conn: &mut TcpStream,
		capab: Capabilities,
		total_difficulty: Difficulty,
		hs: &Handshake,
		adapter: Arc<dyn NetAdapter>,
	) -> Result<Peer, Error> {
		debug!("accept: handshaking from {:?}", conn.peer_addr());
		let info = hs.accept(capab, total_difficulty, conn);
		match info {
			Ok(info) => Ok(Peer::new(info, adapter)),
			Err(e) => {
				debug!(
					"accept: handshaking from {:?} failed with error: {:?}",
					conn.peer_addr(),
					e
				);
				Err(e)
			}
		}
	}

	/// Connect to a peer: initiate the handshake on an established outbound
	/// TCP connection.
	pub fn connect(
		conn: &mut TcpStream,
		capab: Capabilities,
		total_difficulty: Difficulty,
		self_addr: PeerAddr,
		hs: &Handshake,
		adapter: Arc<dyn NetAdapter>,
	) -> Result<Peer, Error> {
		debug!("connect: handshaking with {:?}", conn.peer_addr());
		let info = hs.initiate(capab, total_difficulty, self_addr, conn);
		match info {
			Ok(info) => Ok(Peer::new(info, adapter)),
			Err(e) => {
				debug!(
					"connect: handshaking with {:?} failed with error: {:?}",
					conn.peer_addr(),
					e
				);
				Err(e)
			}
		}
	}

	/// Main peer loop listening for messages and forwarding to the rest of
	/// the system.
	pub fn start(&mut self, conn: TcpStream) -> Result<(), Error> {
		let adapter = Arc::new(self.tracking_adapter.clone());
		let handler = Protocol::new(adapter, self.info.clone());
		let tracker = conn::listen(conn, handler)?;
		self.connection = Some(Mutex::new(tracker));
		Ok(())
	}

	/// Whether this peer is still connected.
	pub fn is_connected(&self) -> bool {
		self.check_connection()
	}

	/// Whether this peer has been banned.
	pub fn is_banned(&self) -> bool {
		ConnectedState::Banned == *self.state.read()
	}

	/// Whether this peer is stuck on sync.
	pub fn is_stuck(&self) -> (bool, Difficulty) {
		let live_info = self.info.live_info.read();
		let now = Utc::now().timestamp_millis();
		// if last updated difficulty is 2 hours ago, we're sure this peer is a stuck node.
		if now > live_info.stuck_detector.timestamp_millis() + global_stuck_detection_ms() {
			(true, live_info.total_difficulty)
		} else {
			(false, live_info.total_difficulty)
		}
	}

	/// Number of bytes sent to the peer
	pub fn last_min_sent_bytes(&self) -> Option<u64> {
		if let Some(ref tracker) = self.connection {
			let conn = tracker.lock();
			return Some(conn.sent_bytes.load(std::sync::atomic::Ordering::Relaxed));
		}
		None
	}

	/// Set this peer status to banned
	pub fn set_banned(&self) {
		*self.state.write() = ConnectedState::Banned;
	}

	/// Send a msg with given msg_type to our peer via the connection.
	fn send<T: crate::core::ser::Writeable>(&self, msg: T, msg_type: Type) -> Result<(), Error> {
		if let Some(ref tracker) = self.connection {
			let conn = tracker.lock();
			conn.send(msg, msg_type)
		} else {
			Err(Error::PeerNotConnected)
		}
	}

	/// Send a ping to the remote peer, providing our local difficulty and
	/// height
	pub fn send_ping(&self, total_difficulty: Difficulty, height: u64) -> Result<(), Error> {
		let ping_msg = Ping {
			total_difficulty,
			height,
		};
		self.send(ping_msg, Type::Ping)
	}

	/// Send the ban reason before banning
	pub fn send_ban_reason(&self, ban_reason: ReasonForBan) -> Result<(), Error> {
		let ban_reason_msg = BanReasonPayload { ban_reason };
		self.send(ban_reason_msg, Type::BanReason)
	}

	/// Sends the provided block to the remote peer. The request may be
	/// dropped if the remote peer is known to already have the block.
	pub fn send_block(&self, b: &Block) -> Result<bool, Error> {
		if !self.tracking_adapter.has_recv(b.hash()) {
			trace!("Send block {} to {}", b.hash(), self.info.addr);
			self.send(b, Type::Block)?;
			Ok(true)
		} else {
			debug!(
				"Suppress block send {} to {} (already seen)",
				b.hash(),
				self.info.addr,
			);
			Ok(false)
		}
	}

	/// Sends the provided compact block to the remote peer.
	pub fn send_compact_block(&self, b: &CompactBlock) -> Result<bool, Error> {
		if !self.tracking_adapter.has_recv(b.hash()) {
			trace!("Send compact block {} to {}", b.hash(), self.info.addr);
			self.send(b, Type::CompactBlock)?;
			Ok(true)
		} else {
			debug!(
				"Suppress compact block send {} to {} (already seen)",
				b.hash(),
				self.info.addr,
			);
			Ok(false)
		}
	}

	/// Sends the provided block header to the remote peer ("header first"
	/// propagation).
	pub fn send_header(&self, bh: &BlockHeader) -> Result<bool, Error> {
		if !self.tracking_adapter.has_recv(bh.hash()) {
			debug!("Send header {} to {}", bh.hash(), self.info.addr);
			self.send(bh, Type::Header)?;
			Ok(true)
		} else {
			debug!(
				"Suppress header send {} to {} (already seen)",
				bh.hash(),
				self.info.addr,
			);
			Ok(false)
		}
	}

	/// Sends the provided tx kernel hash to the remote peer.
	pub fn send_tx_kernel_hash(&self, h: Hash) -> Result<bool, Error> {
		if !self.tracking_adapter.has_recv(h) {
			debug!("Send tx kernel hash {} to {}", h, self.info.addr);
			self.send(h, Type::TransactionKernel)?;
			Ok(true)
		} else {
			debug!(
				"Not sending tx kernel hash {} to {} (already seen)",
				h, self.info.addr
			);
			Ok(false)
		}
	}

	/// Sends the provided transaction to the remote peer. The request may be
	/// dropped if the remote peer is known to already have the transaction.
	/// We support broadcast of lightweight tx kernel hash here if the peer
	/// supports it.
	pub fn send_transaction(&self, tx: &Transaction) -> Result<bool, Error> {
		let kernel = &tx.kernels()[0];

		if self
			.info
			.capabilities
			.contains(Capabilities::TX_KERNEL_HASH)
		{
			return self.send_tx_kernel_hash(kernel.hash());
		}

		if !self.tracking_adapter.has_recv(kernel.hash()) {
			debug!("Send full tx {} to {}", tx.hash(), self.info.addr);
			self.send(tx, Type::Transaction)?;
			Ok(true)
		} else {
			debug!(
				"Not sending tx {} to {} (already seen)",
				tx.hash(),
				self.info.addr
			);
			Ok(false)
		}
	}

	/// Sends the provided stem transaction to the remote peer.
	/// Note: tracking adapter is ignored for stem transactions (while under
	/// embargo).
	pub fn send_stem_transaction(&self, tx: &Transaction) -> Result<(), Error> {
		debug!("Send (stem) tx {} to {}", tx.hash(), self.info.addr);
		self.send(tx, Type::StemTransaction)
	}

	/// Sends a request for block headers from the provided block locator
	pub fn send_header_request(&self, locator: Vec<Hash>) -> Result<(), Error> {
		self.send(&Locator { hashes: locator }, Type::GetHeaders)
	}

	/// Sends a request for a specific block by hash
	pub fn send_block_request(&self, h: Hash) -> Result<(), Error> {
		debug!("Requesting block {} from peer {}.", h, self.info.addr);
		self.tracking_adapter.push_req(h);
		self.send(&h, Type::GetBlock)
	}

	/// Sends a request for a specific compact block by hash
	pub fn send_compact_block_request(&self, h: Hash) -> Result<(), Error> {
		debug!("Requesting compact block {} from {}", h, self.info.addr);
		self.send(&h, Type::GetCompactBlock)
	}

	/// Sends a request for a specific transaction by kernel hash.
	pub fn send_tx_request(&self, h: Hash) -> Result<(), Error> {
		debug!(
			"Requesting tx (kernel hash) {} from peer {}.",
			h, self.info.addr
		);
		self.send(&h, Type::GetTransaction)
	}

	/// Sends a request for some peer addresses.
	pub fn send_peer_request(&self, capab: Capabilities) -> Result<(), Error> {
		trace!("Asking {} for more peers {:?}", self.info.addr, capab);
		self.send(
			&GetPeerAddrs {
				capabilities: capab,
			},
			Type::GetPeerAddrs,
		)
	}

	/// Sends a request for the txhashset archive at the provided block.
	pub fn send_txhashset_request(&self, height: u64, hash: Hash) -> Result<(), Error> {
		debug!(
			"Asking {} for txhashset archive at {} {}.",
			self.info.addr, height, hash
		);
		self.send(
			&TxHashSetRequest { hash, height },
			Type::TxHashSetRequest,
		)
	}

	/// Stops the peer, closing its connection.
	pub fn stop(&self) {
		if let Some(ref tracker) = self.connection {
			tracker.lock().close();
		}
		*self.state.write() = ConnectedState::Disconnected;
	}

	fn check_connection(&self) -> bool {
		let tracker = match self.connection {
			Some(ref tracker) => tracker,
			None => return false,
		};
		let conn = tracker.lock();
		if conn.is_closed() {
			if let Some(err) = conn.take_error() {
				debug!("Client {} connection lost: {:?}", self.info.addr, err);
			}
			let mut state = self.state.write();
			if *state == ConnectedState::Connected {
				*state = ConnectedState::Disconnected;
			}
			false
		} else {
			*self.state.read() == ConnectedState::Connected
		}
	}
}

// 2 hours, in millis.
fn global_stuck_detection_ms() -> i64 {
	2 * 3600 * 1000
}

/// Adapter implementation that forwards everything to an underlying adapter
/// but keeps track of the block and transaction hashes that were received or
/// requested from the peer, so they are not relayed right back.
#[derive(Clone)]
struct TrackingAdapter {
	adapter: Arc<dyn NetAdapter>,
	known: Arc<RwLock<LruCache<Hash, ()>>>,
	requested: Arc<RwLock<LruCache<Hash, ()>>>,
}

impl TrackingAdapter {
	fn new(adapter: Arc<dyn NetAdapter>) -> TrackingAdapter {
		TrackingAdapter {
			adapter,
			known: Arc::new(RwLock::new(LruCache::new(MAX_TRACK_SIZE))),
			requested: Arc::new(RwLock::new(LruCache::new(MAX_TRACK_SIZE))),
		}
	}

	fn has_recv(&self, hash: Hash) -> bool {
		self.known.write().contains_key(&hash)
	}

	fn push_recv(&self, hash: Hash) {
		self.known.write().insert(hash, ());
	}

	fn has_req(&self, hash: Hash) -> bool {
		self.requested.write().contains_key(&hash)
	}

	fn push_req(&self, hash: Hash) {
		self.requested.write().insert(hash, ());
	}
}

impl ChainAdapter for TrackingAdapter {
	fn total_difficulty(&self) -> Result<Difficulty, Error> {
		self.adapter.total_difficulty()
	}

	fn total_height(&self) -> Result<u64, Error> {
		self.adapter.total_height()
	}

	fn get_transaction(&self, kernel_hash: Hash) -> Option<Transaction> {
		self.adapter.get_transaction(kernel_hash)
	}

	fn tx_kernel_received(
		&self,
		kernel_hash: Hash,
		peer_info: &PeerInfo,
	) -> Result<bool, Error> {
		self.push_recv(kernel_hash);
		self.adapter.tx_kernel_received(kernel_hash, peer_info)
	}

	fn transaction_received(&self, tx: Transaction, stem: bool) -> Result<bool, Error> {
		// Do not track the tx hash for stem txs.
		// Otherwise we fail to handle the subsequent fluff or embargo
		// expiration correctly.
		if !stem {
			let kernel = &tx.kernels()[0];
			self.push_recv(kernel.hash());
		}
		self.adapter.transaction_received(tx, stem)
	}

	fn block_received(
		&self,
		b: Block,
		peer_info: &PeerInfo,
		_was_requested: bool,
	) -> Result<bool, Error> {
		let bh = b.hash();
		self.push_recv(bh);
		self.adapter.block_received(b, peer_info, self.has_req(bh))
	}

	fn compact_block_received(
		&self,
		cb: CompactBlock,
		peer_info: &PeerInfo,
	) -> Result<bool, Error> {
		self.push_recv(cb.hash());
		self.adapter.compact_block_received(cb, peer_info)
	}

	fn header_received(&self, bh: BlockHeader, peer_info: &PeerInfo) -> Result<bool, Error> {
		self.push_recv(bh.hash());
		self.adapter.header_received(bh, peer_info)
	}

	fn headers_received(
		&self,
		bh: &[BlockHeader],
		peer_info: &PeerInfo,
	) -> Result<bool, Error> {
		self.adapter.headers_received(bh, peer_info)
	}

	fn locate_headers(&self, locator: &[Hash]) -> Result<Vec<BlockHeader>, Error> {
		self.adapter.locate_headers(locator)
	}

	fn get_block(&self, h: Hash) -> Option<Block> {
		self.adapter.get_block(h)
	}

	fn txhashset_read(&self, h: Hash) -> Option<TxHashSetRead> {
		self.adapter.txhashset_read(h)
	}

	fn txhashset_receive_ready(&self) -> bool {
		self.adapter.txhashset_receive_ready()
	}

	fn txhashset_write(
		&self,
		h: Hash,
		txhashset_data: File,
		peer_info: &PeerInfo,
	) -> Result<bool, Error> {
		self.adapter.txhashset_write(h, txhashset_data, peer_info)
	}

	fn txhashset_download_update(
		&self,
		start_time: DateTime<Utc>,
		downloaded_size: u64,
		total_size: u64,
	) -> bool {
		self.adapter
			.txhashset_download_update(start_time, downloaded_size, total_size)
	}
}

impl NetAdapter for TrackingAdapter {
	fn find_peer_addrs(&self, capab: Capabilities) -> Vec<PeerAddr> {
		self.adapter.find_peer_addrs(capab)
	}

	fn peer_addrs_received(&self, addrs: Vec<PeerAddr>) {
		self.adapter.peer_addrs_received(addrs)
	}

	fn peer_difficulty(&self, addr: PeerAddr, diff: Difficulty, height: u64) {
		self.adapter.peer_difficulty(addr, diff, height)
	}

	fn is_banned(&self, addr: PeerAddr) -> bool {
		self.adapter.is_banned(addr)
	}
}
