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

//! Block body sync: fetch the full blocks of the candidate header chain in
//! windows, spreading requests over our most-work peers with a bounded
//! number of blocks in flight per peer.

use chrono::prelude::{DateTime, Utc};
use chrono::Duration;
use rand::prelude::*;
use std::cmp;
use std::sync::Arc;

use crate::chain::{self, SyncState, SyncStatus, Tip};
use crate::core::core::hash::{Hash, Hashed};
use crate::p2p;

/// How many blocks to ask for at once from each peer.
const BLOCK_DOWNLOAD_WINDOW: u64 = 10;

pub struct BodySync {
	chain: Arc<chain::Chain>,
	peers: Arc<p2p::Peers>,
	sync_state: Arc<SyncState>,

	blocks_requested: u64,

	receive_timeout: DateTime<Utc>,
	prev_blocks_received: u64,
}

impl BodySync {
	pub fn new(
		sync_state: Arc<SyncState>,
		peers: Arc<p2p::Peers>,
		chain: Arc<chain::Chain>,
	) -> BodySync {
		BodySync {
			sync_state,
			peers,
			chain,
			blocks_requested: 0,
			receive_timeout: Utc::now(),
			prev_blocks_received: 0,
		}
	}

	/// Check whether a body sync is needed and run it if so.
	/// Returns true if state sync (txhashset download) is needed instead
	/// (we are too far behind to catch up by downloading blocks).
	pub fn check_run(&mut self, head: &Tip, highest_height: u64) -> bool {
		// if fast_sync disabled or not needed, run the body_sync every 5s
		if self.body_sync_due() {
			if self.body_sync() {
				return true;
			}

			self.sync_state.update(SyncStatus::BodySync {
				current_height: head.height,
				highest_height,
			});
		}
		false
	}

	/// Return true if txhashset download is needed (when requested block is
	/// under the horizon).
	fn body_sync(&mut self) -> bool {
		let mut hashes: Option<Vec<Hash>> = Some(vec![]);
		let txhashset_needed = match self
			.chain
			.check_txhashset_needed("body_sync".to_owned(), &mut hashes)
		{
			Ok(v) => v,
			Err(e) => {
				error!("body_sync: failed to call txhashset_needed: {:?}", e);
				return false;
			}
		};
		if txhashset_needed {
			debug!("body_sync: cannot sync full blocks earlier than horizon, will request txhashset",);
			return true;
		}

		let mut hashes = match hashes {
			Some(v) => v,
			None => {
				error!("unexpected: hashes is None");
				return false;
			}
		};

		// the hashes we got back are the "next" blocks to fetch, earliest
		// first
		hashes.reverse();

		let peers = self.peers.most_work_peers();
		if peers.is_empty() {
			debug!("body_sync: no available peers to request blocks from");
			return false;
		}

		// if we have 5 peers to sync from then ask for 50 blocks total (peer_count * 10)
		// max will be 80 if all 8 peers are advertising more work
		// also if the chain is already saturated with orphans, throttle
		let block_count = cmp::min(
			cmp::min(100, peers.len() * (BLOCK_DOWNLOAD_WINDOW as usize)),
			chain::MAX_ORPHAN_SIZE.saturating_sub(self.chain.orphans_len()) + 1,
		);

		let hashes_to_get = hashes
			.iter()
			.filter(|x| {
				// only ask for blocks that we have not yet processed
				// either successfully stored or in our orphan list
				!self.chain.block_exists(**x).unwrap_or(false) && !self.chain.is_orphan(x)
			})
			.take(block_count)
			.collect::<Vec<_>>();

		if !hashes_to_get.is_empty() {
			debug!(
				"block_sync: requesting blocks {:?} from {} peers",
				hashes_to_get,
				peers.len(),
			);

			// reinitialize download tracking state
			self.blocks_requested = 0;
			self.receive_timeout = Utc::now() + Duration::seconds(6);

			let mut rng = rand::thread_rng();
			for hash in hashes_to_get.clone() {
				if let Some(peer) = peers.choose(&mut rng) {
					if let Err(e) = peer.send_block_request(*hash) {
						debug!("Skipped request to {}: {:?}", peer.info.addr, e);
						peer.stop();
					} else {
						self.blocks_requested += 1;
					}
				}
			}
		}
		false
	}

	// Should we run block body sync and ask for more blocks?
	fn body_sync_due(&mut self) -> bool {
		let blocks_received = self.blocks_received();

		// some blocks have been requested
		if self.blocks_requested > 0 {
			// but none received since timeout, ask again
			let timeout = Utc::now() > self.receive_timeout;
			if timeout && blocks_received <= self.prev_blocks_received {
				debug!(
					"body_sync: expecting {} more blocks and none received for a while",
					self.blocks_requested,
				);
				return true;
			}
		}

		if blocks_received > self.prev_blocks_received {
			// some received, update for next check
			self.receive_timeout = Utc::now() + Duration::seconds(1);
			self.blocks_requested = self
				.blocks_requested
				.saturating_sub(blocks_received - self.prev_blocks_received);
			self.prev_blocks_received = blocks_received;
		}

		// off by one to account for broadcast blocks
		if self.blocks_requested < 2 {
			return true;
		}
		false
	}

	// Total number of full blocks we have processed so far (our chain
	// height is a decent proxy while body syncing along a single chain).
	fn blocks_received(&self) -> u64 {
		self.chain.head().map(|x| x.height).unwrap_or(0)
	}
}
