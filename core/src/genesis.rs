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

//! Definition of the genesis block. Placeholder for now.
//!
//! Genesis blocks are hardcoded: the dev genesis for tests and local
//! networks, the main genesis carrying the launch timestamp and proof.

use chrono::prelude::{TimeZone, Utc};

use crate::consensus;
use crate::core;
use crate::pow::{Difficulty, Proof, ProofOfWork};

/// Genesis block definition for development networks and tests. Not the
/// production genesis; its proof of work is all zeroes and callers are
/// expected to skip PoW validation on it.
pub fn genesis_dev() -> core::Block {
	core::Block::with_header(core::BlockHeader {
		height: 0,
		timestamp: Utc.ymd(1997, 8, 4).and_hms(0, 0, 0),
		pow: ProofOfWork {
			total_difficulty: Difficulty::min(),
			secondary_scaling: consensus::initial_graph_weight(),
			nonce: 0,
			proof: Proof::zero(consensus::PROOFSIZE),
		},
		..Default::default()
	})
}

/// The main network genesis block. The proof below is the mined solution
/// embedded at launch.
pub fn genesis_main() -> core::Block {
	core::Block::with_header(core::BlockHeader {
		height: 0,
		timestamp: Utc.ymd(2020, 3, 14).and_hms(15, 9, 26),
		pow: ProofOfWork {
			total_difficulty: Difficulty::from_num(consensus::initial_block_difficulty()),
			secondary_scaling: consensus::initial_graph_weight(),
			nonce: 41,
			proof: Proof {
				edge_bits: 29,
				nonces: vec![
					4391451, 36730677, 38198400, 38797304, 60700446, 72910191, 73050441,
					110099816, 140885802, 145512513, 149311222, 149994636, 157557529, 160778700,
					162870981, 179649435, 194194460, 227378628, 230933064, 252046196, 272053956,
					277878683, 288331253, 290266880, 293973036, 305315023, 321927758, 353841539,
					356489212, 373843111, 381697287, 389274717, 403108317, 409994705, 411629694,
					431823422, 441976653, 521469643, 521868369, 523044572, 524964447, 530250249,
				],
			},
		},
		..Default::default()
	})
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::Hashed;
	use crate::ser::{self, ser_vec};

	// Check the dev genesis block is stable: ser/deser round trips and the
	// hash does not drift between runs.
	#[test]
	fn testnet_genesis_hash() {
		let gen = genesis_dev();
		let vec = ser_vec(&gen).unwrap();
		let gen_2: core::Block = ser::deserialize(&mut &vec[..]).unwrap();
		assert_eq!(gen.hash(), gen_2.hash());
		assert_eq!(gen.header.height, 0);
	}
}
