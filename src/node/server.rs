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

//! The lepton server: assembles the chain, the transaction pool and the
//! p2p server into one runnable node and runs the maintenance threads
//! (sync, dandelion, peer upkeep).

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::{thread, time};

use crate::chain::{self, SyncState};
use crate::config::{ChainType, ServerConfig};
use crate::core::core::hash::Hashed;
use crate::core::core::verifier_cache::{LruVerifierCache, VerifierCache};
use crate::core::{genesis, pow};
use crate::node::adapters::{
	ChainToPoolAndNetAdapter, NetToChainAdapter, PoolToChainAdapter, PoolToNetAdapter,
};
use crate::node::dandelion_monitor;
use crate::node::sync;
use crate::p2p;
use crate::pool;
use crate::util::{RwLock, StopState};

/// The running node server: handles to every subsystem plus the background
/// thread handles.
pub struct Server {
	/// Server config.
	pub config: ServerConfig,
	/// The blockchain.
	pub chain: Arc<chain::Chain>,
	/// The transaction pool.
	pub tx_pool: Arc<RwLock<pool::TransactionPool>>,
	/// The p2p server.
	pub p2p: Arc<p2p::Server>,
	/// The published sync status.
	pub sync_state: Arc<SyncState>,
	/// Shared stop flag observed by every loop.
	pub stop_state: StopState,
	threads: Vec<thread::JoinHandle<()>>,
}

impl Server {
	/// Build and start a new server from the provided configuration.
	pub fn start(config: ServerConfig) -> Result<Server, chain::Error> {
		let stop_state = StopState::new();
		let sync_state = Arc::new(SyncState::new());

		let genesis = match config.chain_type {
			ChainType::Mainnet => genesis::genesis_main(),
			ChainType::UserTesting => genesis::genesis_dev(),
		};
		info!("Starting node on {:?}, genesis {}", config.chain_type, genesis.hash());

		let pow_verifier: fn(
			&crate::core::core::BlockHeader,
		) -> Result<(), pow::Error> = match config.chain_type {
			ChainType::Mainnet => pow::verify_size,
			ChainType::UserTesting => |_| Ok(()),
		};

		let verifier_cache: Arc<RwLock<dyn VerifierCache>> =
			Arc::new(RwLock::new(LruVerifierCache::new()));
		let secp = crate::util::static_secp_instance();

		// The chain of adapters: pool -> chain, chain -> (pool, net),
		// net -> (chain, pool). The circular handles are resolved with
		// OneTime initialization once everything is constructed.
		let pool_adapter = Arc::new(PoolToChainAdapter::new());
		let pool_net_adapter = Arc::new(PoolToNetAdapter::new(config.dandelion_config.clone()));
		let tx_pool = Arc::new(RwLock::new(pool::TransactionPool::new(
			config.pool_config.clone(),
			config.dandelion_config.clone(),
			pool_adapter.clone(),
			verifier_cache.clone(),
			secp.clone(),
			pool_net_adapter.clone(),
		)));

		let chain_adapter = Arc::new(ChainToPoolAndNetAdapter::new(tx_pool.clone()));

		let chain = Arc::new(chain::Chain::init(
			config.db_root.clone(),
			chain_adapter.clone(),
			genesis.clone(),
			pow_verifier,
			verifier_cache.clone(),
			secp.clone(),
			config.coinbase_maturity,
			config.archive_mode,
			stop_state.clone(),
		)?);

		pool_adapter.set_chain(chain.clone());

		let net_adapter = Arc::new(NetToChainAdapter::new(
			sync_state.clone(),
			chain.clone(),
			tx_pool.clone(),
		));

		let p2p_server = Arc::new(
			p2p::Server::new(
				&config.db_root,
				p2p::Capabilities::FULL_NODE,
				config.p2p_config.clone(),
				net_adapter.clone(),
				genesis.hash(),
				stop_state.clone(),
			)
			.map_err(|e| {
				chain::ErrorKind::Other(format!("p2p server init failed: {:?}", e))
			})?,
		);

		// close the loop between the adapters and the p2p server
		chain_adapter.init(p2p_server.peers.clone());
		pool_net_adapter.init(p2p_server.peers.clone());
		net_adapter.init(p2p_server.peers.clone());

		let mut threads = vec![];

		// the p2p accept loop
		{
			let p2p = p2p_server.clone();
			threads.push(
				thread::Builder::new()
					.name("p2p-server".to_string())
					.spawn(move || {
						if let Err(e) = p2p.listen() {
							error!("p2p server failed: {:?}", e);
						}
					})
					.map_err(|e| chain::ErrorKind::Other(format!("{}", e)))?,
			);
		}

		// seed and maintain outbound connections
		threads.push(Server::run_peer_maintenance(
			config.clone(),
			p2p_server.clone(),
			chain.clone(),
			stop_state.clone(),
		)?);

		// the sync runner
		threads.push(
			sync::run_sync(
				sync_state.clone(),
				p2p_server.peers.clone(),
				chain.clone(),
				config.archive_mode,
				stop_state.clone(),
			)
			.map_err(|e| chain::ErrorKind::Other(format!("{}", e)))?,
		);

		// the dandelion monitor
		threads.push(
			dandelion_monitor::monitor_transactions(
				config.dandelion_config.clone(),
				tx_pool.clone(),
				pool_net_adapter.clone(),
				secp,
				stop_state.clone(),
			)
			.map_err(|e| chain::ErrorKind::Other(format!("{}", e)))?,
		);

		Ok(Server {
			config,
			chain,
			tx_pool,
			p2p: p2p_server,
			sync_state,
			stop_state,
			threads,
		})
	}

	// Connect to configured seeds, ping connected peers, ask for more peer
	// addresses when low, clean up dead connections and trigger the
	// periodic chain compaction.
	fn run_peer_maintenance(
		config: ServerConfig,
		p2p_server: Arc<p2p::Server>,
		chain: Arc<chain::Chain>,
		stop_state: StopState,
	) -> Result<thread::JoinHandle<()>, chain::Error> {
		thread::Builder::new()
			.name("peer-maintenance".to_string())
			.spawn(move || {
				let mut ticks: u64 = 0;
				loop {
					if stop_state.is_stopped() {
						break;
					}

					// (re)connect to seeds when we are low on peers
					if !p2p_server.peers.enough_peers() {
						for seed in &config.p2p_config.seeds {
							if let Ok(addrs) = seed.to_socket_addrs() {
								for addr in addrs {
									let _ = p2p_server.connect(p2p::PeerAddr(addr));
								}
							}
						}
						// also try previously known healthy peers
						for p in p2p_server.peers.find_peers(
							p2p::State::Healthy,
							p2p::Capabilities::FULL_NODE,
							8,
						) {
							let _ = p2p_server.connect(p.addr);
						}
					}

					// monitor and ping peers, dropping the dead ones
					if let Ok(head) = chain.head() {
						p2p_server
							.peers
							.check_all(head.total_difficulty, head.height);
					}
					p2p_server
						.peers
						.clean_peers(config.p2p_config.peer_max_count() as usize);

					// ask peers for fresh addresses when running low
					if !p2p_server.peers.enough_peers() {
						if let Some(peer) = p2p_server.peers.random_peer() {
							let _ = peer.send_peer_request(p2p::Capabilities::PEER_LIST);
						}
					}

					// trigger compaction roughly every 10 minutes
					ticks += 1;
					if ticks % 60 == 0 {
						if let Err(e) = chain.compact() {
							error!("compaction failed: {:?}", e);
						}
					}

					thread::sleep(time::Duration::from_secs(10));
				}
			})
			.map_err(|e| chain::ErrorKind::Other(format!("{}", e)).into())
	}

	/// Stop the server and join all its threads.
	pub fn stop(mut self) {
		info!("Stopping server...");
		self.stop_state.stop();
		self.p2p.stop();
		for handle in self.threads.drain(..) {
			let _ = handle.join();
		}
		info!("Server stopped.");
	}
}
