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

//! Fast-sync handoff: export a txhashset archive from one node and import
//! it into a fresh one.

use lepton_chain as chain;
use lepton_core as core;
use lepton_keychain as keychain;

mod chain_test_helper;
use chain_test_helper::*;

use crate::chain::types::{NoStatus, Options};
use crate::core::core::hash::Hashed;
use crate::keychain::{ExtKeychain, Keychain};

#[test]
fn txhashset_archive_handoff() {
	let src_dir = ".lepton_archive_src";
	let dst_dir = ".lepton_archive_dst";

	let src_chain = setup(src_dir);
	let keychain = ExtKeychain::from_random_seed().unwrap();

	// mine a handful of blocks on the source chain, including a real spend
	let cb_key = ExtKeychain::derive_key_id(1, 2, 0, 0, 0);
	let b1 = prepare_block(&src_chain, &keychain, &cb_key, vec![]);
	process_block(&src_chain, &b1);
	mine_empty_blocks(&src_chain, &keychain, 10, 5);

	let head = src_chain.head().unwrap();
	let head_header = src_chain.head_header().unwrap();
	assert_eq!(head.height, 6);

	// export the txhashset archive at the head
	let (output_size, kernel_size, zip_file) =
		src_chain.txhashset_read(head.last_block_h).unwrap();
	assert_eq!(output_size, head_header.output_mmr_size);
	assert_eq!(kernel_size, head_header.kernel_mmr_size);

	// a fresh node with the same genesis gets the headers first
	clean_output_dir(dst_dir);
	let dst_chain = init_chain(dst_dir, core::genesis::genesis_dev());
	let headers: Vec<_> = (1..=head.height)
		.map(|h| src_chain.get_header_by_height(h).unwrap())
		.collect();
	dst_chain
		.sync_block_headers(&headers, Options::SKIP_POW)
		.unwrap();
	assert_eq!(dst_chain.candidate_head().unwrap().height, head.height);

	// then imports the archive wholesale
	dst_chain
		.txhashset_write(head.last_block_h, zip_file, &NoStatus)
		.unwrap();

	// the imported state validates in full and the confirmed head moved to
	// the archive header
	let dst_head = dst_chain.head().unwrap();
	assert_eq!(dst_head.height, head.height);
	assert_eq!(dst_head.last_block_h, head.last_block_h);
	assert_eq!(
		dst_chain.get_header_by_height(6).unwrap().hash(),
		head.last_block_h
	);

	// the coinbase output from block 1 is visible as unspent on the new node
	let cb_output = b1.outputs()[0].clone();
	let cb_id = core::core::OutputIdentifier::from_output(&cb_output);
	assert!(dst_chain.get_unspent(&cb_id).unwrap().is_some());

	clean_output_dir(src_dir);
	clean_output_dir(dst_dir);
}
