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

//! Server: the accept loop and outbound connection entry points.

use std::fs::File;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::prelude::{DateTime, Utc};

use crate::core::core::hash::Hash;
use crate::core::core::{Block, BlockHeader, CompactBlock, Transaction};
use crate::core::pow::Difficulty;
use crate::handshake::Handshake;
use crate::peer::Peer;
use crate::peers::Peers;
use crate::store::PeerStore;
use crate::types::{
	Capabilities, ChainAdapter, Error, NetAdapter, P2PConfig, PeerAddr, PeerInfo, TxHashSetRead,
};
use crate::util::StopState;

/// P2P server implementation, handling bootstrapping to find and connect to
/// peers, receiving connections from other peers and keep track of all of
/// them.
pub struct Server {
	/// The p2p configuration.
	pub config: P2PConfig,
	capabilities: Capabilities,
	handshake: Arc<Handshake>,
	/// The registry of connected peers.
	pub peers: Arc<Peers>,
	stop_state: StopState,
}

impl Server {
	/// Creates a new idle p2p server with no peers
	pub fn new(
		db_root: &str,
		capabilities: Capabilities,
		config: P2PConfig,
		adapter: Arc<dyn ChainAdapter>,
		genesis: Hash,
		stop_state: StopState,
	) -> Result<Server, Error> {
		Ok(Server {
			config: config.clone(),
			capabilities,
			handshake: Arc::new(Handshake::new(genesis)),
			peers: Arc::new(Peers::new(PeerStore::new(db_root)?, adapter, config)),
			stop_state,
		})
	}

	/// Starts a new TCP server and listen to incoming connections. This is a
	/// blocking call until the TCP server stops.
	pub fn listen(&self) -> Result<(), Error> {
		// start TCP listener and handle incoming connections
		let addr = SocketAddr::new(self.config.host, self.config.port);
		let listener = TcpListener::bind(addr)?;
		listener.set_nonblocking(true)?;

		let sleep_time = Duration::from_millis(5);
		loop {
			// Pause peer ingest when the node is shutting down.
			if self.stop_state.is_stopped() {
				break;
			}

			match listener.accept() {
				Ok((stream, peer_addr)) => {
					let peer_addr = PeerAddr(peer_addr);

					if self.check_undesirable(&stream) {
						continue;
					}
					match self.handle_new_peer(stream) {
						Err(Error::ConnectionClose) => {
							debug!("shutting down, ignoring a new peer")
						}
						Err(e) => {
							debug!("Error accepting peer {}: {:?}", peer_addr, e);
							let _ = self.peers.add_banned(
								peer_addr,
								crate::types::ReasonForBan::BadHandshake,
							);
						}
						Ok(_) => {}
					}
				}
				Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
					// nothing to do, will retry in next iteration
				}
				Err(e) => {
					debug!("Couldn't establish new client connection: {:?}", e);
				}
			}
			thread::sleep(sleep_time);
		}
		Ok(())
	}

	/// Asks the server to connect to a new peer. Directly returns the peer
	/// if we're already connected to the provided address.
	pub fn connect(&self, addr: PeerAddr) -> Result<Arc<Peer>, Error> {
		if self.stop_state.is_stopped() {
			return Err(Error::ConnectionClose);
		}

		if let Some(p) = self.peers.get_connected_peer(addr) {
			// if we're already connected to the addr, just return the peer
			trace!("connect_peer: already connected {}", addr);
			return Ok(p);
		}

		trace!(
			"connect_peer: on {}:{}. connecting to {}",
			self.config.host,
			self.config.port,
			addr
		);
		match TcpStream::connect_timeout(&addr.0, Duration::from_secs(10)) {
			Ok(mut stream) => {
				let addr = SocketAddr::new(self.config.host, self.config.port);
				let total_diff = self.peers.total_difficulty()?;

				let mut peer = Peer::connect(
					&mut stream,
					self.capabilities,
					total_diff,
					PeerAddr(addr),
					&self.handshake,
					self.peers.clone(),
				)?;
				peer.start(stream)?;
				let peer = Arc::new(peer);
				self.peers.add_connected(peer.clone())?;
				Ok(peer)
			}
			Err(e) => {
				trace!(
					"connect_peer: on {}:{}. Could not connect to {}: {:?}",
					self.config.host,
					self.config.port,
					addr,
					e
				);
				Err(Error::Connection(e.kind()))
			}
		}
	}

	fn handle_new_peer(&self, mut stream: TcpStream) -> Result<(), Error> {
		if self.stop_state.is_stopped() {
			return Err(Error::ConnectionClose);
		}
		let total_diff = self.peers.total_difficulty()?;

		// accept the peer and add it to the server map
		let mut peer = Peer::accept(
			&mut stream,
			self.capabilities,
			total_diff,
			&self.handshake,
			self.peers.clone(),
		)?;
		peer.start(stream)?;
		self.peers.add_connected(Arc::new(peer))?;
		Ok(())
	}

	/// Checks whether there's any reason we don't want to accept an incoming
	/// peer connection. There can be a few of them:
	/// 1. Accepting the peer connection would exceed the configured maximum
	/// allowed inbound peer count.
	/// 2. The peer has been previously banned and the ban period hasn't
	/// expired yet.
	/// 3. We're already connected to a peer at the same IP. While there are
	/// many reasons multiple peers can legitimately share identical IP
	/// addresses (NAT), network distribution is improved if they choose
	/// different sets of peers themselves. In addition, it prevents some
	/// attacks.
	fn check_undesirable(&self, stream: &TcpStream) -> bool {
		if self.peers.peer_count() >= self.config.peer_max_count() {
			debug!("Accepting new connection will exceed peer limit, refusing connection.");
			let _ = stream.shutdown(Shutdown::Both);
			return true;
		}
		if let Ok(peer_addr) = stream.peer_addr() {
			let peer_addr = PeerAddr(peer_addr);
			if self.peers.is_banned(peer_addr) {
				debug!("Peer {} banned, refusing connection.", peer_addr);
				if stream.shutdown(Shutdown::Both).is_err() {
					debug!("Error shutting down conn with {}", peer_addr);
				}
				return true;
			}
		}
		false
	}

	/// Stops the server. Disconnect from all peers at the same time.
	pub fn stop(&self) {
		info!("calling stop on server");
		self.stop_state.stop();
		self.peers.stop();
	}
}

/// A no-op network adapter useful for testing.
pub struct DummyAdapter {}

impl ChainAdapter for DummyAdapter {
	fn total_difficulty(&self) -> Result<Difficulty, Error> {
		Ok(Difficulty::min())
	}
	fn total_height(&self) -> Result<u64, Error> {
		Ok(0)
	}
	fn get_transaction(&self, _h: Hash) -> Option<Transaction> {
		None
	}
	fn tx_kernel_received(&self, _h: Hash, _peer_info: &PeerInfo) -> Result<bool, Error> {
		Ok(true)
	}
	fn transaction_received(&self, _: Transaction, _stem: bool) -> Result<bool, Error> {
		Ok(true)
	}
	fn compact_block_received(
		&self,
		_cb: CompactBlock,
		_peer_info: &PeerInfo,
	) -> Result<bool, Error> {
		Ok(true)
	}
	fn header_received(&self, _bh: BlockHeader, _peer_info: &PeerInfo) -> Result<bool, Error> {
		Ok(true)
	}
	fn block_received(
		&self,
		_: Block,
		_: &PeerInfo,
		_: bool,
	) -> Result<bool, Error> {
		Ok(true)
	}
	fn headers_received(
		&self,
		_: &[BlockHeader],
		_: &PeerInfo,
	) -> Result<bool, Error> {
		Ok(true)
	}
	fn locate_headers(&self, _: &[Hash]) -> Result<Vec<BlockHeader>, Error> {
		Ok(vec![])
	}
	fn get_block(&self, _: Hash) -> Option<Block> {
		None
	}
	fn txhashset_read(&self, _h: Hash) -> Option<TxHashSetRead> {
		unimplemented!()
	}

	fn txhashset_receive_ready(&self) -> bool {
		false
	}

	fn txhashset_write(
		&self,
		_h: Hash,
		_txhashset_data: File,
		_peer_info: &PeerInfo,
	) -> Result<bool, Error> {
		Ok(false)
	}

	fn txhashset_download_update(
		&self,
		_start_time: DateTime<Utc>,
		_downloaded_size: u64,
		_total_size: u64,
	) -> bool {
		false
	}
}

impl NetAdapter for DummyAdapter {
	fn find_peer_addrs(&self, _: Capabilities) -> Vec<PeerAddr> {
		vec![]
	}
	fn peer_addrs_received(&self, _: Vec<PeerAddr>) {}
	fn peer_difficulty(&self, _: PeerAddr, _: Difficulty, _: u64) {}
	fn is_banned(&self, _: PeerAddr) -> bool {
		false
	}
}
