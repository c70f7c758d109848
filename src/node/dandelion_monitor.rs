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

//! The dandelion monitor: a timer thread driving the stempool. Aggregates
//! stem transactions past the patience window and relays them on the stem
//! channel (or fluffs them in a fluff epoch), and force-fluffs anything
//! whose embargo expired without being seen back on the network.

use chrono::prelude::Utc;
use rand::{thread_rng, Rng};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::core::core::hash::Hashed;
use crate::core::core::transaction;
use crate::node::adapters::PoolToNetAdapter;
use crate::pool::PoolAdapter;
use crate::pool::{self, PoolEntry, TransactionPool, TxSource};
use crate::util::{Mutex, RwLock, StopState};
use lepton_util::secp::Secp256k1;

/// A process to monitor transactions in the stempool.
/// With Dandelion, transactions can be broadcast in stem or fluff phase.
/// When sent in stem phase, the transaction is relayed to only 1 node: the
/// dandelion relay. In order to maintain reliability a timer is started for
/// each transaction sent in stem phase. This function will monitor the
/// stempool and test if the timer is expired for each transaction. In that
/// case the transaction will be sent in fluff phase (to multiple peers)
/// instead of sending only to the peer relay.
pub fn monitor_transactions(
	dandelion_config: pool::DandelionConfig,
	tx_pool: Arc<RwLock<TransactionPool>>,
	pool_net_adapter: Arc<PoolToNetAdapter>,
	secp: Arc<Mutex<Secp256k1>>,
	stop_state: StopState,
) -> std::io::Result<thread::JoinHandle<()>> {
	debug!("Started Dandelion transaction monitor.");

	// The embargo gets a small random per-node component so the expiry
	// itself does not identify the stem origin.
	let embargo_extra: u16 = thread_rng().gen_range(0, 31);

	thread::Builder::new()
		.name("dandelion".to_string())
		.spawn(move || {
			loop {
				if stop_state.is_stopped() {
					break;
				}

				if let Err(e) =
					process_stem_phase(&dandelion_config, &tx_pool, &pool_net_adapter, &secp)
				{
					error!("dand_mon: Problem with stem phase. {:?}", e);
				}

				if let Err(e) = process_expired_entries(embargo_extra, &tx_pool) {
					error!("dand_mon: Problem with expired entries. {:?}", e);
				}

				thread::sleep(Duration::from_secs(10));
			}
		})
}

fn process_stem_phase(
	_dandelion_config: &pool::DandelionConfig,
	tx_pool: &Arc<RwLock<TransactionPool>>,
	pool_net_adapter: &Arc<PoolToNetAdapter>,
	secp: &Arc<Mutex<Secp256k1>>,
) -> Result<(), pool::PoolError> {
	// Take the write lock on the txpool for the duration of this processing.
	let mut tx_pool = tx_pool.write();

	let header = tx_pool.chain_head()?;

	let stem_entries = tx_pool.stem_entries_past_patience();
	if stem_entries.is_empty() {
		return Ok(());
	}

	// Aggregate all the stem txs awaiting relay into a single tx, improving
	// the anonymity of each of them.
	let txs: Vec<transaction::Transaction> =
		stem_entries.iter().map(|x| x.tx.clone()).collect();
	let agg_tx = {
		let secp = secp.lock();
		transaction::aggregate(txs.clone(), &secp)?
	};

	let entry = PoolEntry {
		src: TxSource::Stem,
		tx_at: Utc::now(),
		tx: agg_tx,
	};

	if pool_net_adapter.is_stem() {
		debug!(
			"dand_mon: relaying aggregate stem tx {} ({} txs) onward.",
			entry.tx.hash(),
			txs.len()
		);
		if pool_net_adapter.stem_tx_accepted(&entry).is_ok() {
			// The txs remain in our stempool under embargo; they leave
			// either via a fluff seen back from the network, a confirmed
			// block, or embargo expiry.
			return Ok(());
		}
		debug!("dand_mon: relay failed, fluffing instead.");
	}

	// Fluff phase (or stem relay failed): move the txs into the txpool and
	// broadcast to all peers.
	for mut entry in stem_entries {
		entry.src = TxSource::Fluff;
		tx_pool.fluff(entry, &header)?;
	}
	Ok(())
}

fn process_expired_entries(
	embargo_extra: u16,
	tx_pool: &Arc<RwLock<TransactionPool>>,
) -> Result<(), pool::PoolError> {
	let mut tx_pool = tx_pool.write();
	let header = tx_pool.chain_head()?;

	let expired_entries = tx_pool.embargo_expired_entries(embargo_extra);
	if expired_entries.is_empty() {
		return Ok(());
	}

	debug!(
		"dand_mon: {} stem tx(s) with an expired embargo, fluffing.",
		expired_entries.len()
	);

	for mut entry in expired_entries {
		let hash = entry.tx.hash();
		entry.src = TxSource::EmbargoExpired;
		match tx_pool.fluff(entry, &header) {
			Ok(()) => info!("dand_mon: embargo expired, fluffed tx {}.", hash),
			Err(e) => debug!("dand_mon: failed to fluff expired tx {}: {:?}", hash, e),
		}
	}
	Ok(())
}
