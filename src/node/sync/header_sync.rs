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

//! Header-first sync: request batches of headers from the most-work peer
//! using a block locator over our candidate header chain.

use chrono::prelude::{DateTime, Utc};
use chrono::Duration;
use std::sync::Arc;

use crate::chain::{self, SyncState, SyncStatus, Tip};
use crate::core::core::hash::{Hash, Hashed};
use crate::p2p;

pub struct HeaderSync {
	sync_state: Arc<SyncState>,
	peers: Arc<p2p::Peers>,
	chain: Arc<chain::Chain>,

	history_locator: Vec<(u64, Hash)>,
	prev_header_sync: (DateTime<Utc>, u64, u64),
}

impl HeaderSync {
	pub fn new(
		sync_state: Arc<SyncState>,
		peers: Arc<p2p::Peers>,
		chain: Arc<chain::Chain>,
	) -> HeaderSync {
		HeaderSync {
			sync_state,
			peers,
			chain,
			history_locator: vec![],
			prev_header_sync: (Utc::now(), 0, 0),
		}
	}

	pub fn check_run(&mut self, header_head: &Tip, highest_height: u64) -> bool {
		if !self.header_sync_due(header_head) {
			return false;
		}

		let enable_header_sync = match self.sync_state.status() {
			SyncStatus::BodySync { .. }
			| SyncStatus::HeaderSync { .. }
			| SyncStatus::TxHashsetDone => true,
			SyncStatus::NoSync | SyncStatus::Initial | SyncStatus::AwaitingPeers(_) => {
				// Reset sync_head to the current candidate head so the sync
				// scratch chain starts from a clean fork point.
				let sync_head = match self.chain.reset_sync_head() {
					Ok(h) => h,
					Err(e) => {
						error!("failed to reset sync_head: {:?}", e);
						return false;
					}
				};
				debug!(
					"sync: initial transition to HeaderSync. sync_head: {} at {}",
					sync_head.hash(),
					sync_head.height,
				);
				self.history_locator.clear();
				true
			}
			_ => false,
		};

		if enable_header_sync {
			self.sync_state.update(SyncStatus::HeaderSync {
				current_height: header_head.height,
				highest_height,
			});

			self.header_sync();
			return true;
		}
		false
	}

	fn header_sync_due(&mut self, header_head: &Tip) -> bool {
		let now = Utc::now();
		let (timeout, latest_height, prev_height) = self.prev_header_sync;

		// received all necessary headers, can ask for more
		let all_headers_received =
			header_head.height >= prev_height + (p2p::MAX_BLOCK_HEADERS as u64) - 4;
		// no headers processed and we're past timeout, need to ask for more
		let stalling = header_head.height <= latest_height && now > timeout;

		if all_headers_received || stalling {
			self.prev_header_sync = (
				now + Duration::seconds(10),
				header_head.height,
				header_head.height,
			);
			true
		} else {
			// resetting the timeout as long as we progress
			if header_head.height > latest_height {
				self.prev_header_sync =
					(now + Duration::seconds(2), header_head.height, prev_height);
			}
			false
		}
	}

	fn header_sync(&mut self) {
		if let Ok(header_head) = self.chain.candidate_head() {
			let difficulty = header_head.total_difficulty;

			if let Some(peer) = self.peers.most_work_peer() {
				if peer.info.total_difficulty() > difficulty {
					self.request_headers(&peer);
				}
			}
		}
	}

	/// Request some block headers from a peer to advance us.
	fn request_headers(&mut self, peer: &p2p::Peer) {
		if let Ok(locator) = self.get_locator() {
			debug!(
				"sync: request_headers: asking {} for headers, {:?}",
				peer.info.addr, locator,
			);

			let _ = peer.send_header_request(locator);
		}
	}

	/// We build a locator based on sync_head.
	/// Even if sync_head is significantly out of date we will "reset" it once
	/// we start getting headers back from a peer.
	fn get_locator(&mut self) -> Result<Vec<Hash>, chain::Error> {
		let sync_head = self.chain.sync_head()?;
		let heights = get_locator_heights(sync_head.height);

		// for security, clear history_locator[] in any case of header chain
		// rollback, the easiest way is to check whether the sync head and
		// the latest local chain head are identical.
		if !self.history_locator.is_empty()
			&& !self
				.history_locator
				.contains(&(sync_head.height, sync_head.last_block_h))
		{
			self.history_locator.clear();
		}

		let mut locator: Vec<(u64, Hash)> = vec![(sync_head.height, sync_head.last_block_h)];
		for h in heights {
			// use the cached locator entries where we have them
			if let Some(l) = self.history_locator.iter().find(|x| x.0 == h) {
				locator.push(*l);
			} else if let Ok(header) = self.chain.get_candidate_header_by_height(h) {
				locator.push((header.height, header.hash()));
			}
		}
		locator.dedup_by(|a, b| a.0 == b.0);

		self.history_locator = locator.clone();

		Ok(locator.iter().map(|l| l.1).collect())
	}
}

// current height back to 0 decreasing in powers of 2
fn get_locator_heights(height: u64) -> Vec<u64> {
	let mut current = height;
	let mut heights = vec![];
	while current > 0 {
		heights.push(current);
		if heights.len() >= (p2p::MAX_LOCATORS as usize) - 1 {
			break;
		}
		let next = 2u64.pow(heights.len() as u32);
		current = if current > next { current - next } else { 0 }
	}
	heights.push(0);
	heights
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_get_locator_heights() {
		assert_eq!(get_locator_heights(0), vec![0]);
		assert_eq!(get_locator_heights(1), vec![1, 0]);
		assert_eq!(get_locator_heights(2), vec![2, 0]);
		assert_eq!(get_locator_heights(3), vec![3, 1, 0]);
		assert_eq!(get_locator_heights(10), vec![10, 8, 4, 0]);
		assert_eq!(get_locator_heights(100), vec![100, 98, 94, 86, 70, 38, 0]);
		assert_eq!(
			get_locator_heights(1000),
			vec![1000, 998, 994, 986, 970, 938, 874, 746, 490, 0]
		);
		// check the locator is bounded by MAX_LOCATORS
		let heights = get_locator_heights(10_000_000);
		assert!(heights.len() <= p2p::MAX_LOCATORS as usize);
	}
}
