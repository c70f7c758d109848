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

//! Fast sync of the full txhashset state at the horizon: request the
//! archive from a capable peer, track the download, and let the chain
//! validate and swap it in.

use chrono::prelude::{DateTime, Utc};
use chrono::Duration;
use std::sync::Arc;

use crate::chain::{self, SyncState, SyncStatus, Tip};
use crate::core::consensus;
use crate::core::core::hash::Hashed;
use crate::p2p::{self, Capabilities};

/// Fast sync has 3 "states":
/// * syncing headers
/// * once all headers are sync'd, requesting the txhashset state
/// * once we have the state, get blocks after that
///
/// The StateSync struct implements and monitors the middle step.
pub struct StateSync {
	sync_state: Arc<SyncState>,
	peers: Arc<p2p::Peers>,
	chain: Arc<chain::Chain>,

	prev_state_sync: Option<DateTime<Utc>>,
}

impl StateSync {
	pub fn new(
		sync_state: Arc<SyncState>,
		peers: Arc<p2p::Peers>,
		chain: Arc<chain::Chain>,
	) -> StateSync {
		StateSync {
			sync_state,
			peers,
			chain,
			prev_state_sync: None,
		}
	}

	/// Check whether state sync should run and triggers a state download when
	/// it's time (we're behind the horizon). Returns true as long as state
	/// sync needs monitoring, false when it's either done or turned off.
	pub fn check_run(&mut self, header_head: &Tip, head: &Tip, highest_height: u64) -> bool {
		trace!("state_sync: head.height: {}, header_head.height: {}. sync_state: {:?}",
			head.height,
			header_head.height,
			self.sync_state.status(),
		);

		let mut sync_need_restart = false;

		// check sync error
		if let Some(sync_error) = self.sync_state.sync_error() {
			error!("state_sync: error = {:?}. restart fast sync", sync_error);
			sync_need_restart = true;
		}

		// if txhashset downloaded and validated successfully, we switch to
		// BodySync state and we are done here.
		if let SyncStatus::TxHashsetDone = self.sync_state.status() {
			self.sync_state.update(SyncStatus::BodySync {
				current_height: head.height,
				highest_height,
			});
			return false;
		}

		// run fast sync if applicable, normally only run one-time, except
		// restart in error
		if sync_need_restart || header_head.height == highest_height {
			let (go, download_timeout) = self.state_sync_due();

			if let SyncStatus::TxHashsetDownload { .. } = self.sync_state.status() {
				if download_timeout {
					error!("state_sync: TxHashsetDownload status timeout in 10 minutes!");
					self.sync_state
						.set_sync_error("txhashset download timeout".to_string());
				}
			}

			if go {
				self.sync_state.clear_sync_error();
				if let Err(e) = self.request_state(header_head) {
					error!("state_sync: send_txhashset_request err! {:?}", e);
					// restart the timer on failure so we retry in a bit
					self.prev_state_sync = None;
				} else {
					self.sync_state.update(SyncStatus::TxHashsetDownload {
						downloaded_size: 0,
						total_size: 0,
					});
				}
			}
		}
		true
	}

	fn request_state(&self, header_head: &Tip) -> Result<(), p2p::Error> {
		// The horizon header we request the state at: far enough below the
		// candidate head to be comfortably past any competing fork.
		let threshold = u64::from(consensus::STATE_SYNC_THRESHOLD);
		let horizon_height = header_head.height.saturating_sub(threshold);

		let peer = self
			.peers
			.most_work_peers()
			.into_iter()
			.find(|p| p.info.capabilities.contains(Capabilities::TXHASHSET_HIST));

		if let Some(peer) = peer {
			// ask for txhashset at state sync horizon
			let bhash = self
				.chain
				.get_candidate_header_by_height(horizon_height)
				.map_err(|_| p2p::Error::Internal("horizon header not found".to_string()))?
				.hash();
			debug!(
				"state_sync: before txhashset request, header head: {} / {}, horizon: {} {}",
				header_head.height,
				header_head.last_block_h,
				horizon_height,
				bhash
			);
			peer.send_txhashset_request(horizon_height, bhash)?;
			Ok(())
		} else {
			Err(p2p::Error::PeerNotConnected)
		}
	}

	// For now this is a one-time thing (it can be slow) at initial startup.
	fn state_sync_due(&mut self) -> (bool, bool) {
		let now = Utc::now();
		let mut download_timeout = false;

		match self.prev_state_sync {
			None => {
				self.prev_state_sync = Some(now);
				(true, download_timeout)
			}
			Some(prev) => {
				if now - prev > Duration::minutes(10) {
					download_timeout = true;
				}
				(false, download_timeout)
			}
		}
	}
}
