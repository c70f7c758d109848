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

//! The top level sync runner: brings the node in sync with the rest of the
//! network, first syncing headers, then either block bodies (for a recent
//! chain) or the full txhashset state at the horizon.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::chain::{self, SyncState, SyncStatus};
use crate::node::sync::body_sync::BodySync;
use crate::node::sync::header_sync::HeaderSync;
use crate::node::sync::state_sync::StateSync;
use crate::p2p;
use crate::util::StopState;

/// Starts the syncing loop, just spawns two threads that loop forever
pub fn run_sync(
	sync_state: Arc<SyncState>,
	peers: Arc<p2p::Peers>,
	chain: Arc<chain::Chain>,
	archive_mode: bool,
	stop_state: StopState,
) -> std::io::Result<thread::JoinHandle<()>> {
	thread::Builder::new()
		.name("sync".to_string())
		.spawn(move || {
			let runner = SyncRunner::new(sync_state, peers, chain, archive_mode, stop_state);
			runner.sync_loop();
		})
}

struct SyncRunner {
	sync_state: Arc<SyncState>,
	peers: Arc<p2p::Peers>,
	chain: Arc<chain::Chain>,
	archive_mode: bool,
	stop_state: StopState,
}

impl SyncRunner {
	fn new(
		sync_state: Arc<SyncState>,
		peers: Arc<p2p::Peers>,
		chain: Arc<chain::Chain>,
		archive_mode: bool,
		stop_state: StopState,
	) -> SyncRunner {
		SyncRunner {
			sync_state,
			peers,
			chain,
			archive_mode,
			stop_state,
		}
	}

	fn wait_for_min_peers(&self) {
		// Initial sleep to give us time to peer with some nodes.
		// Note: Duration::from_secs(30) is too slow for some tests.
		let wait_secs = 30;

		let head = match self.chain.head() {
			Ok(h) => h,
			Err(_) => return,
		};

		let mut n = 0;
		const MIN_PEERS: usize = 3;
		loop {
			if self.stop_state.is_stopped() {
				break;
			}
			let wp = self.peers.most_work_peers();
			// exit loop when:
			// * we have more than MIN_PEERS more_work peers
			// * we are synced already, e.g. lepton was quickly restarted
			// * timeout
			if wp.len() > MIN_PEERS
				|| (wp.is_empty() && self.peers.enough_peers() && head.total_difficulty.to_num() > 0)
				|| n > wait_secs
			{
				break;
			}
			thread::sleep(Duration::from_secs(1));
			n += 1;
		}
	}

	/// Starts the syncing loop, just spawns two threads that loop forever
	fn sync_loop(&self) {
		// Wait for connections reach at least MIN_PEERS
		self.wait_for_min_peers();

		// Our 3 main sync stages
		let mut header_sync = HeaderSync::new(
			self.sync_state.clone(),
			self.peers.clone(),
			self.chain.clone(),
		);
		let mut body_sync = BodySync::new(
			self.sync_state.clone(),
			self.peers.clone(),
			self.chain.clone(),
		);
		let mut state_sync = StateSync::new(
			self.sync_state.clone(),
			self.peers.clone(),
			self.chain.clone(),
		);

		// Highest height seen on the network, generally useful for a fast test on
		// whether some sync is needed
		let mut highest_height = 0;

		// Main syncing loop
		loop {
			if self.stop_state.is_stopped() {
				break;
			}

			thread::sleep(Duration::from_millis(10));

			// check whether syncing is generally needed, when we compare our state with others
			let (syncing, most_work_height) = self.needs_syncing();

			if most_work_height > 0 {
				// we can occasionally get a most work height of 0 if read locks fail
				highest_height = most_work_height;
			}

			// quick short-circuit (and a decent sleep) if no syncing is needed
			if !syncing {
				self.sync_state.update(SyncStatus::NoSync);
				thread::sleep(Duration::from_secs(10));
				continue;
			}

			// if syncing is needed
			let head = match self.chain.head() {
				Ok(h) => h,
				Err(e) => {
					error!("sync_loop: failed to get chain head: {:?}", e);
					continue;
				}
			};
			let header_head = match self.chain.candidate_head() {
				Ok(h) => h,
				Err(e) => {
					error!("sync_loop: failed to get candidate head: {:?}", e);
					continue;
				}
			};

			// run each sync stage, each of them deciding whether they're needed
			// except for state sync that only runs if body sync return true (means txhashset is needed)
			header_sync.check_run(&header_head, highest_height);

			let mut check_state_sync = false;
			if self.archive_mode {
				body_sync.check_run(&head, highest_height);
			} else {
				match body_sync.check_run(&head, highest_height) {
					true => check_state_sync = true,
					false => {}
				}
			}

			if check_state_sync {
				state_sync.check_run(&header_head, &head, highest_height);
			}
		}
	}

	/// Whether we're currently syncing the chain or we're fully caught up and
	/// just receiving blocks through gossip.
	fn needs_syncing(&self) -> (bool, u64) {
		let local_diff = match self.chain.head() {
			Ok(h) => h.total_difficulty,
			Err(_) => return (false, 0),
		};
		let mut is_syncing = self.sync_state.is_syncing();
		let peer = self.peers.most_work_peer();

		let peer_info = if let Some(p) = peer {
			p.info.clone()
		} else {
			warn!("sync: no peers available, disabling sync");
			return (false, 0);
		};

		// if we're already syncing, we're caught up if no peer has a higher
		// difficulty than us
		if is_syncing {
			if peer_info.total_difficulty() <= local_diff {
				let ch = match self.chain.head() {
					Ok(h) => h,
					Err(_) => return (false, 0),
				};
				info!(
					"synchronized at {} @ {} [{}]",
					local_diff.to_num(),
					ch.height,
					ch.last_block_h
				);
				is_syncing = false;
			}
		} else {
			// sum the last 5 difficulties to give us the threshold
			let threshold = {
				match self.chain.difficulty_iter() {
					Ok(iter) => iter
						.map(|x| x.difficulty)
						.take(5)
						.fold(crate::core::pow::Difficulty::zero(), |sum, val| sum + val),
					Err(e) => {
						error!("failed to get difficulty iter: {:?}", e);
						return (false, 0);
					}
				}
			};

			let peer_diff = peer_info.total_difficulty();
			if peer_diff > local_diff + threshold {
				info!(
					"sync: total_difficulty {}, peer_difficulty {}, threshold {} (last 5 blocks), enabling sync",
					local_diff, peer_diff, threshold,
				);
				is_syncing = true;
			}
		}
		(is_syncing, peer_info.height())
	}
}
