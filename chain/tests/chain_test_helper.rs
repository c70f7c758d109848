// Copyright 2020 The Lepton Developers
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

//! Common helpers for the chain integration tests.

use lepton_chain as chain;
use lepton_core as core;
use lepton_keychain as keychain;
use lepton_util as util;

use self::chain::types::{NoopAdapter, Options};
use self::chain::Chain;
use self::core::core::hash::Hashed;
use self::core::core::verifier_cache::LruVerifierCache;
use self::core::core::{Block, BlockHeader, Transaction};
use self::core::genesis;
use self::core::libtx::reward;
use self::core::pow::Difficulty;
use self::keychain::{ExtKeychain, Identifier, Keychain};
use self::util::{RwLock, StopState};
use chrono::Duration;
use std::fs;
use std::sync::Arc;

/// Low maturity so tests can spend coinbase outputs without mining a day's
/// worth of blocks.
pub const TEST_COINBASE_MATURITY: u64 = 3;

pub fn clean_output_dir(dir_name: &str) {
	let _ = fs::remove_dir_all(dir_name);
}

pub fn setup(dir_name: &str) -> Chain {
	util::init_test_logger();
	clean_output_dir(dir_name);
	init_chain(dir_name, genesis::genesis_dev())
}

pub fn init_chain(dir_name: &str, genesis: Block) -> Chain {
	let verifier_cache = Arc::new(RwLock::new(LruVerifierCache::new()));
	Chain::init(
		dir_name.to_string(),
		Arc::new(NoopAdapter {}),
		genesis,
		|_| Ok(()),
		verifier_cache,
		util::static_secp_instance(),
		TEST_COINBASE_MATURITY,
		false,
		StopState::new(),
	)
	.unwrap()
}

/// Build the next block on the current chain head, with the given txs and
/// reward key. Sets sane timestamps and roots; PoW is skipped in tests.
pub fn prepare_block(
	chain: &Chain,
	keychain: &ExtKeychain,
	reward_id: &Identifier,
	txs: Vec<Transaction>,
) -> Block {
	let prev = chain.head_header().unwrap();
	prepare_block_on(chain, keychain, reward_id, &prev, txs, 1)
}

/// Build the next block on the provided header (for forks), adding
/// `diff_gap` to the difficulty so competing forks can out-work each other.
pub fn prepare_block_on(
	chain: &Chain,
	keychain: &ExtKeychain,
	reward_id: &Identifier,
	prev: &BlockHeader,
	txs: Vec<Transaction>,
	diff_gap: u64,
) -> Block {
	let fees = txs.iter().map(|tx| tx.fee()).sum();
	let reward = reward::output(keychain, reward_id, fees).unwrap();
	let mut b = Block::new(prev, txs, Difficulty::from_num(diff_gap), reward).unwrap();
	b.header.timestamp = prev.timestamp + Duration::seconds(60);
	chain.set_txhashset_roots(&mut b).unwrap();
	b
}

pub fn process_block(chain: &Chain, b: &Block) {
	chain
		.process_block(b.clone(), Options::SKIP_POW)
		.unwrap_or_else(|e| panic!("failed to process block {}: {:?}", b.hash(), e));
}

/// Mine n empty blocks onto the chain head.
pub fn mine_empty_blocks(chain: &Chain, keychain: &ExtKeychain, from_d0: u32, n: usize) {
	for i in 0..n {
		let reward_id = ExtKeychain::derive_key_id(1, from_d0 + i as u32, 0, 0, 0);
		let b = prepare_block(chain, keychain, &reward_id, vec![]);
		process_block(chain, &b);
	}
}
