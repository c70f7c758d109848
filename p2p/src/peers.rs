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

//! The registry of connected peers: connection bookkeeping, ban policy,
//! broadcast fan-out and the Dandelion relay peer.

use std::collections::HashMap;
use std::fs::File;
use std::sync::Arc;

use chrono::prelude::*;
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::{Block, BlockHeader, CompactBlock, Transaction};
use crate::core::pow::Difficulty;
use crate::peer::Peer;
use crate::store::{PeerData, PeerStore, State};
use crate::types::{
	Capabilities, ChainAdapter, Error, NetAdapter, P2PConfig, PeerAddr, PeerInfo, ReasonForBan,
	TxHashSetRead, MAX_PEER_ADDRS,
};
use crate::util::RwLock;

/// The registry of connected peers.
pub struct Peers {
	/// The chain adapter all peer events flow into.
	pub adapter: Arc<dyn ChainAdapter>,
	store: PeerStore,
	peers: RwLock<HashMap<PeerAddr, Arc<Peer>>>,
	dandelion_relay: RwLock<Option<(i64, Arc<Peer>)>>,
	config: P2PConfig,
}

impl Peers {
	/// Build a new registry over the provided peer store.
	pub fn new(store: PeerStore, adapter: Arc<dyn ChainAdapter>, config: P2PConfig) -> Peers {
		Peers {
			adapter,
			store,
			config,
			peers: RwLock::new(HashMap::new()),
			dandelion_relay: RwLock::new(None),
		}
	}

	/// Adds the peer to our internal peer mapping. Note that the peer is
	/// still returned so the server can run it.
	pub fn add_connected(&self, peer: Arc<Peer>) -> Result<(), Error> {
		let peer_data = PeerData {
			addr: peer.info.addr,
			capabilities: peer.info.capabilities,
			user_agent: peer.info.user_agent.clone(),
			flags: State::Healthy,
			last_banned: 0,
			ban_reason: ReasonForBan::None,
			last_connected: Utc::now().timestamp(),
		};
		debug!("Saving newly connected peer {}.", peer_data.addr);
		self.save_peer(&peer_data)?;

		let mut peers = self.peers.write();
		peers.insert(peer.info.addr, peer);
		Ok(())
	}

	/// Add a peer as banned to prevent repeat connection attempts.
	pub fn add_banned(&self, addr: PeerAddr, ban_reason: ReasonForBan) -> Result<(), Error> {
		let peer_data = PeerData {
			addr,
			capabilities: Capabilities::UNKNOWN,
			user_agent: "".to_string(),
			flags: State::Banned,
			last_banned: Utc::now().timestamp(),
			ban_reason,
			last_connected: Utc::now().timestamp(),
		};
		debug!("Banning peer {}.", addr);
		self.save_peer(&peer_data)
	}

	/// Is this peer address connected?
	pub fn is_known(&self, addr: PeerAddr) -> bool {
		self.peers.read().contains_key(&addr)
	}

	/// Get vec of peers we are currently connected to.
	pub fn connected_peers(&self) -> Vec<Arc<Peer>> {
		let mut res = self
			.peers
			.read()
			.values()
			.filter(|p| p.is_connected())
			.cloned()
			.collect::<Vec<_>>();
		res.shuffle(&mut thread_rng());
		res
	}

	/// Get a peer we're connected to by address.
	pub fn get_connected_peer(&self, addr: PeerAddr) -> Option<Arc<Peer>> {
		self.peers.read().get(&addr).cloned()
	}

	/// Number of peers currently connected to.
	pub fn peer_count(&self) -> u32 {
		self.connected_peers().len() as u32
	}

	/// Random peer from the set of all currently connected, non banned
	/// peers.
	pub fn random_peer(&self) -> Option<Arc<Peer>> {
		self.connected_peers()
			.into_iter()
			.find(|p| !p.is_banned())
	}

	/// The peer with the most worked branch, showing the highest total
	/// difficulty.
	pub fn most_work_peer(&self) -> Option<Arc<Peer>> {
		self.most_work_peers().pop()
	}

	/// Ordered vec of all peers that currently advertise more work
	/// (total_difficulty) than we do.
	pub fn most_work_peers(&self) -> Vec<Arc<Peer>> {
		let total_difficulty = match self.total_difficulty() {
			Ok(x) => x,
			Err(_) => return vec![],
		};

		let mut max_peers = self
			.connected_peers()
			.into_iter()
			.filter(|x| x.info.total_difficulty() > total_difficulty)
			.collect::<Vec<_>>();

		max_peers.sort_by_key(|x| x.info.total_difficulty());
		max_peers
	}

	/// The configured ban window, in seconds.
	pub fn ban_window(&self) -> i64 {
		self.config.ban_window()
	}

	/// Do we have a reasonable number of peers connected?
	pub fn enough_peers(&self) -> bool {
		self.peer_count() >= self.config.peer_min_preferred_count()
	}

	/// The current Dandelion relay peer for the epoch, if still connected.
	pub fn get_dandelion_relay(&self) -> Option<(i64, Arc<Peer>)> {
		self.dandelion_relay.read().clone()
	}

	/// Choose a new random (connected, outbound preferred) peer as our
	/// Dandelion relay for the new epoch.
	pub fn update_dandelion_relay(&self) {
		let peers = self.connected_peers();

		let peer = peers
			.iter()
			.find(|x| x.info.direction == crate::types::Direction::Outbound)
			.or_else(|| peers.first())
			.cloned();

		match peer {
			Some(peer) => {
				debug!("Switching dandelion relay to {}", peer.info.addr);
				*self.dandelion_relay.write() = Some((Utc::now().timestamp(), peer));
			}
			None => {
				debug!("Could not find a peer to be our dandelion relay");
				*self.dandelion_relay.write() = None;
			}
		}
	}

	/// Ban a peer, disconnecting it if we're currently connected.
	pub fn ban_peer(&self, peer_addr: PeerAddr, ban_reason: ReasonForBan) {
		if let Err(e) = self.update_state(peer_addr, State::Banned) {
			error!("Couldn't ban {}: {:?}", peer_addr, e);
		}

		if let Some(peer) = self.get_connected_peer(peer_addr) {
			debug!("Banning peer {}", peer_addr);
			// setting peer status will get it removed at the next clean_peers
			if let Err(e) = peer.send_ban_reason(ban_reason) {
				error!("failed to send a ban reason to{}: {:?}", peer_addr, e);
			};
			peer.set_banned();
			peer.stop();
		}
	}

	/// Unban a peer: checks if it exists and banned then unbans.
	pub fn unban_peer(&self, peer_addr: PeerAddr) {
		debug!("unban_peer: peer {}", peer_addr);
		match self.get_peer(peer_addr) {
			Ok(_) => {
				if self.is_banned(peer_addr) {
					if let Err(e) = self.update_state(peer_addr, State::Healthy) {
						error!("Couldn't unban {}: {:?}", peer_addr, e);
					}
				} else {
					error!("Couldn't unban {}: peer is not banned", peer_addr);
				}
			}
			Err(e) => error!("Couldn't unban {}: {:?}", peer_addr, e),
		};
	}

	fn broadcast<F>(&self, obj_name: &str, inner: F) -> u32
	where
		F: Fn(&Peer) -> Result<bool, Error>,
	{
		let mut count = 0;

		for p in self.connected_peers().iter() {
			match inner(&p) {
				Ok(true) => count += 1,
				Ok(false) => (),
				Err(e) => {
					debug!(
						"Error sending {:?} to peer {:?}: {:?}",
						obj_name, &p.info.addr, e
					);
					p.stop();
					let mut peers = self.peers.write();
					peers.remove(&p.info.addr);
				}
			}
		}
		count
	}

	/// Broadcast a compact block to all our connected peers.
	/// This is only used when initially broadcasting a newly mined block.
	pub fn broadcast_compact_block(&self, b: &CompactBlock) {
		let count = self.broadcast("compact block", |p| p.send_compact_block(b));
		debug!(
			"broadcast_compact_block: {}, {} at {}, to {} peers, done.",
			b.hash(),
			b.header.pow.total_difficulty,
			b.header.height,
			count,
		);
	}

	/// Broadcast a block header to all our connected peers ("header first"
	/// propagation).
	pub fn broadcast_header(&self, bh: &BlockHeader) {
		let count = self.broadcast("header", |p| p.send_header(bh));
		debug!(
			"broadcast_header: {}, {} at {}, to {} peers, done.",
			bh.hash(),
			bh.pow.total_difficulty,
			bh.height,
			count,
		);
	}

	/// Broadcasts the provided transaction to all our connected peers.
	pub fn broadcast_transaction(&self, tx: &Transaction) {
		let count = self.broadcast("transaction", |p| p.send_transaction(tx));
		debug!(
			"broadcast_transaction: {} to {} peers, done.",
			tx.hash(),
			count,
		);
	}

	/// Relays the provided stem transaction to our single Dandelion relay
	/// peer (if any).
	pub fn relay_stem_transaction(&self, tx: &Transaction) -> Result<(), Error> {
		let relay = self.get_dandelion_relay().map(|(_, p)| p);
		match relay {
			Some(relay) if relay.is_connected() => {
				debug!("relay_stem_transaction: sending to {}", relay.info.addr);
				relay.send_stem_transaction(tx)
			}
			_ => {
				debug!("No dandelion relay, updating.");
				self.update_dandelion_relay();
				Err(Error::PeerNotConnected)
			}
		}
	}

	/// Ping all our connected peers. Always automatically expects a pong back
	/// or disconnects. This acts as a liveness test.
	pub fn check_all(&self, total_difficulty: Difficulty, height: u64) {
		for p in self.connected_peers().iter() {
			if let Err(e) = p.send_ping(total_difficulty, height) {
				debug!("Error pinging peer {:?}: {:?}", &p.info.addr, e);
				p.stop();
				let mut peers = self.peers.write();
				peers.remove(&p.info.addr);
			}
		}
	}

	/// All peer information we have in storage
	pub fn all_peers(&self) -> Vec<PeerData> {
		match self.store.all_peers() {
			Ok(peers) => peers,
			Err(e) => {
				error!("all_peers failed: {:?}", e);
				vec![]
			}
		}
	}

	/// Find peers in store (not necessarily connected) and return their data
	pub fn find_peers(&self, state: State, cap: Capabilities, count: usize) -> Vec<PeerData> {
		match self.store.find_peers(state, cap, count) {
			Ok(peers) => peers,
			Err(e) => {
				error!("failed to find peers: {:?}", e);
				vec![]
			}
		}
	}

	/// Get peer in store by address
	pub fn get_peer(&self, peer_addr: PeerAddr) -> Result<PeerData, Error> {
		self.store.get_peer(peer_addr).map_err(From::from)
	}

	/// Whether we've already seen a peer with the provided address
	pub fn exists_peer(&self, peer_addr: PeerAddr) -> Result<bool, Error> {
		self.store.exists_peer(peer_addr).map_err(From::from)
	}

	/// Saves updated information about a peer
	pub fn save_peer(&self, p: &PeerData) -> Result<(), Error> {
		self.store.save_peer(p).map_err(From::from)
	}

	/// Updates the state of a peer in store
	pub fn update_state(&self, peer_addr: PeerAddr, new_state: State) -> Result<(), Error> {
		self.store
			.update_state(peer_addr, new_state)
			.map_err(From::from)
	}

	/// Iterate over the peer list and prune all peers we have lost
	/// connection to or have been deemed problematic. Also avoid connected
	/// peer count getting too high.
	pub fn clean_peers(&self, max_count: usize) {
		let mut rm = vec![];

		// build a list of peers to be cleaned up
		{
			let peers = self.peers.read();
			for peer in peers.values() {
				if peer.is_banned() {
					debug!("clean_peers {:?}, peer banned", peer.info.addr);
					rm.push(peer.info.addr);
				} else if !peer.is_connected() {
					debug!("clean_peers {:?}, not connected", peer.info.addr);
					rm.push(peer.info.addr);
				} else {
					let (stuck, diff) = peer.is_stuck();
					match self.adapter.total_difficulty() {
						Ok(total_difficulty) => {
							if stuck && diff < total_difficulty {
								debug!("clean_peers {:?}, stuck peer", peer.info.addr);
								let _ = self.update_state(peer.info.addr, State::Defunct);
								rm.push(peer.info.addr);
							}
						}
						Err(e) => error!("failed to get total difficulty: {:?}", e),
					}
				}
			}
		}

		// ensure we do not have too many connected peers
		let excess_count = (self.peer_count() as usize).saturating_sub(max_count);
		if excess_count > 0 {
			rm.extend(
				self.connected_peers()
					.iter()
					.take(excess_count)
					.map(|x| x.info.addr),
			);
		}

		// now remove them from the peer map, stopping each one *outside*
		// the lock (stop joins the peer threads, which may themselves be
		// blocked waiting on the peer map)
		let stopped = {
			let mut peers = self.peers.write();
			rm.iter().filter_map(|addr| peers.remove(addr)).collect::<Vec<_>>()
		};
		for peer in stopped {
			peer.stop();
		}
	}

	/// Stop all peers
	pub fn stop(&self) {
		let peers = {
			let mut peers = self.peers.write();
			peers.drain().map(|(_, p)| p).collect::<Vec<_>>()
		};
		for peer in peers {
			peer.stop();
		}
	}

	/// Whether a peer is currently banned.
	pub fn is_banned(&self, peer_addr: PeerAddr) -> bool {
		if let Ok(peer) = self.store.get_peer(peer_addr) {
			return peer.flags == State::Banned;
		}
		false
	}
}

impl ChainAdapter for Peers {
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
		self.adapter.tx_kernel_received(kernel_hash, peer_info)
	}

	fn transaction_received(&self, tx: Transaction, stem: bool) -> Result<bool, Error> {
		self.adapter.transaction_received(tx, stem)
	}

	fn block_received(
		&self,
		b: Block,
		peer_info: &PeerInfo,
		was_requested: bool,
	) -> Result<bool, Error> {
		let hash = b.hash();
		if !self.adapter.block_received(b, peer_info, was_requested)? {
			// if the peer sent us a block that's intrinsically bad
			// they are either mistaken or malevolent, both of which require a ban
			debug!(
				"Received a bad block {} from  {}, the peer will be banned",
				hash, peer_info.addr,
			);
			self.ban_peer(peer_info.addr, ReasonForBan::BadBlock);
			Ok(false)
		} else {
			Ok(true)
		}
	}

	fn compact_block_received(
		&self,
		cb: CompactBlock,
		peer_info: &PeerInfo,
	) -> Result<bool, Error> {
		let hash = cb.hash();
		if !self.adapter.compact_block_received(cb, peer_info)? {
			// if the peer sent us a block that's intrinsically bad
			// they are either mistaken or malevolent, both of which require a ban
			debug!(
				"Received a bad compact block {} from  {}, the peer will be banned",
				hash, peer_info.addr
			);
			self.ban_peer(peer_info.addr, ReasonForBan::BadCompactBlock);
			Ok(false)
		} else {
			Ok(true)
		}
	}

	fn header_received(&self, bh: BlockHeader, peer_info: &PeerInfo) -> Result<bool, Error> {
		if !self.adapter.header_received(bh, peer_info)? {
			// if the peer sent us a block header that's intrinsically bad
			// they are either mistaken or malevolent, both of which require a ban
			self.ban_peer(peer_info.addr, ReasonForBan::BadBlockHeader);
			Ok(false)
		} else {
			Ok(true)
		}
	}

	fn headers_received(
		&self,
		headers: &[BlockHeader],
		peer_info: &PeerInfo,
	) -> Result<bool, Error> {
		if !self.adapter.headers_received(headers, peer_info)? {
			// if the peer sent us a block header that's intrinsically bad
			// they are either mistaken or malevolent, both of which require a ban
			self.ban_peer(peer_info.addr, ReasonForBan::BadBlockHeader);
			Ok(false)
		} else {
			Ok(true)
		}
	}

	fn locate_headers(&self, hs: &[Hash]) -> Result<Vec<BlockHeader>, Error> {
		self.adapter.locate_headers(hs)
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
		if !self.adapter.txhashset_write(h, txhashset_data, peer_info)? {
			debug!(
				"Received a bad txhashset data from {}, the peer will be banned",
				peer_info.addr
			);
			self.ban_peer(peer_info.addr, ReasonForBan::BadHandshake);
			Ok(false)
		} else {
			Ok(true)
		}
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

impl NetAdapter for Peers {
	/// Find good peers we know with the provided capability and return their
	/// addresses.
	fn find_peer_addrs(&self, capab: Capabilities) -> Vec<PeerAddr> {
		let peers = self.find_peers(State::Healthy, capab, MAX_PEER_ADDRS as usize);
		trace!("find_peer_addrs: {} healthy peers picked", peers.len());
		peers.iter().map(|p| p.addr).collect()
	}

	/// A list of peers has been received from one of our peers.
	fn peer_addrs_received(&self, peer_addrs: Vec<PeerAddr>) {
		trace!("Received {} peer addrs, saving.", peer_addrs.len());
		for pa in peer_addrs {
			if let Ok(e) = self.exists_peer(pa) {
				if e {
					continue;
				}
			}
			let peer = PeerData {
				addr: pa,
				capabilities: Capabilities::UNKNOWN,
				user_agent: "".to_string(),
				flags: State::Healthy,
				last_banned: 0,
				ban_reason: ReasonForBan::None,
				last_connected: Utc::now().timestamp(),
			};
			if let Err(e) = self.save_peer(&peer) {
				error!("Could not save received peer address: {:?}", e);
			}
		}
	}

	fn peer_difficulty(&self, addr: PeerAddr, diff: Difficulty, height: u64) {
		if let Some(peer) = self.get_connected_peer(addr) {
			peer.info.update(height, diff);
		}
	}

	fn is_banned(&self, addr: PeerAddr) -> bool {
		Peers::is_banned(self, addr)
	}
}
