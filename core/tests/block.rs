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

//! Block construction and validation.

use lepton_core as core;
use lepton_keychain as keychain;
use lepton_util as util;

use crate::core::core::block::{Block, BlockHeader, Error};
use crate::core::core::hash::Hashed;
use crate::core::core::verifier_cache::{LruVerifierCache, VerifierCache};
use crate::core::core::{transaction, CompactBlock, KernelFeatures, Transaction};
use crate::core::libtx::build::{self, input, output};
use crate::core::libtx::reward;
use crate::core::pow::Difficulty;
use crate::core::ser::{self, Writeable};
use crate::keychain::{BlindingFactor, ExtKeychain, Keychain};
use crate::util::RwLock;
use std::sync::Arc;

fn verifier_cache() -> Arc<RwLock<dyn VerifierCache>> {
	Arc::new(RwLock::new(LruVerifierCache::new()))
}

fn new_block(
	txs: Vec<Transaction>,
	keychain: &ExtKeychain,
	previous_header: &BlockHeader,
	reward_id: &keychain::Identifier,
) -> Block {
	let fees = txs.iter().map(|tx| tx.fee()).sum();
	let reward_output = reward::output(keychain, reward_id, fees).unwrap();
	Block::new(previous_header, txs, Difficulty::min(), reward_output).unwrap()
}

fn tx_spending(keychain: &ExtKeychain, src: u32, fee: u32) -> Transaction {
	let key_in = ExtKeychain::derive_key_id(1, src, 0, 0, 0);
	let key_out = ExtKeychain::derive_key_id(1, src + 100, 0, 0, 0);
	build::transaction(
		KernelFeatures::Plain { fee: fee.into() },
		vec![input(1_000_000, key_in), output(1_000_000 - fee as u64, key_out)],
		keychain,
	)
	.unwrap()
}

#[test]
fn empty_block_with_reward_validates() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let reward_id = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
	let prev = BlockHeader::default();

	let b = new_block(vec![], &keychain, &prev, &reward_id);

	assert_eq!(b.outputs().len(), 1);
	assert_eq!(b.kernels().len(), 1);
	b.validate(&BlindingFactor::zero(), verifier_cache(), keychain.secp())
		.unwrap();
}

#[test]
fn block_with_txs_validates() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let reward_id = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
	let prev = BlockHeader::default();

	let tx1 = tx_spending(&keychain, 2, 2);
	let tx2 = tx_spending(&keychain, 3, 3);

	let b = new_block(vec![tx1, tx2], &keychain, &prev, &reward_id);

	assert_eq!(b.total_fees(), 5);
	b.validate(&BlindingFactor::zero(), verifier_cache(), keychain.secp())
		.unwrap();
}

#[test]
fn block_ser_deser_and_stable_hash() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let reward_id = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
	let prev = BlockHeader::default();
	let b = new_block(vec![tx_spending(&keychain, 2, 2)], &keychain, &prev, &reward_id);

	let vec = ser::ser_vec(&b).expect("serialization failed");
	let b2: Block = ser::deserialize(&mut &vec[..]).unwrap();

	assert_eq!(b.hash(), b2.hash());
	assert_eq!(b.header, b2.header);
	assert_eq!(b.inputs(), b2.inputs());
	assert_eq!(b.outputs(), b2.outputs());
	assert_eq!(b.kernels(), b2.kernels());

	// the block hash is the header hash
	assert_eq!(b.hash(), b.header.hash());
}

#[test]
fn block_tampered_kernel_sum_rejected() {
	// adding 1*H to the kernel excess breaks the kernel sum equation
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let reward_id = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
	let prev = BlockHeader::default();
	let b = new_block(vec![tx_spending(&keychain, 2, 2)], &keychain, &prev, &reward_id);

	// replace a plain kernel excess with excess + 1*H
	let secp = keychain.secp();
	let one_h = secp.commit_value(1).unwrap();
	let kern_idx = b
		.kernels()
		.iter()
		.position(|k| !k.is_coinbase())
		.expect("plain kernel");
	let old_excess = b.kernels()[kern_idx].excess;
	let new_excess = secp.commit_sum(vec![old_excess, one_h], vec![]).unwrap();

	let mut kernels = b.kernels().clone();
	kernels[kern_idx].excess = new_excess;
	let body = transaction::TransactionBody::init(
		b.inputs().clone(),
		b.outputs().clone(),
		kernels,
		false,
	)
	.unwrap();
	// rebuild the block with the tampered body
	let b = block_with_body(&b.header, &body);

	assert!(b
		.validate(&BlindingFactor::zero(), verifier_cache(), keychain.secp())
		.is_err());
}

// Blocks keep their body private; in tests we rebuild a tampered block by
// round tripping the parts through the serialized form.
fn block_with_body(header: &BlockHeader, body: &transaction::TransactionBody) -> Block {
	let mut vec = vec![];
	{
		let mut writer = ser::BinWriter::new(&mut vec);
		header.write(&mut writer).unwrap();
		body.write(&mut writer).unwrap();
	}
	ser::deserialize(&mut &vec[..]).unwrap()
}

#[test]
fn block_with_nrd_kernel_validates() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let reward_id = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
	let prev = BlockHeader::default();

	let key_in = ExtKeychain::derive_key_id(1, 9, 0, 0, 0);
	let key_out = ExtKeychain::derive_key_id(1, 10, 0, 0, 0);
	let tx = build::transaction(
		KernelFeatures::NoRecentDuplicate {
			fee: 2.into(),
			relative_height: transaction::NRDRelativeHeight::new(1440).unwrap(),
		},
		vec![input(1_000_000, key_in), output(999_998, key_out)],
		&keychain,
	)
	.unwrap();

	let b = new_block(vec![tx], &keychain, &prev, &reward_id);
	b.validate(&BlindingFactor::zero(), verifier_cache(), keychain.secp())
		.unwrap();
}

#[test]
fn block_height_locked_kernel_immature_rejected() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let reward_id = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
	let prev = BlockHeader::default();

	let key_in = ExtKeychain::derive_key_id(1, 9, 0, 0, 0);
	let key_out = ExtKeychain::derive_key_id(1, 10, 0, 0, 0);
	let tx = build::transaction(
		KernelFeatures::HeightLocked {
			fee: 2.into(),
			lock_height: 100,
		},
		vec![input(1_000_000, key_in), output(999_998, key_out)],
		&keychain,
	)
	.unwrap();

	// the new block is at height 1, the kernel is locked until 100
	let b = new_block(vec![tx], &keychain, &prev, &reward_id);
	assert_eq!(
		b.validate(&BlindingFactor::zero(), verifier_cache(), keychain.secp())
			.err(),
		Some(Error::KernelLockHeight(100))
	);
}

#[test]
fn block_with_tampered_rangeproof_rejected() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let reward_id = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
	let prev = BlockHeader::default();

	// several outputs so the batch verifier is exercised with a mix of
	// valid proofs and a single corrupted one
	let key_in = ExtKeychain::derive_key_id(1, 9, 0, 0, 0);
	let outs: Vec<_> = (0..5)
		.map(|i| output(100_000, ExtKeychain::derive_key_id(1, 20 + i, 0, 0, 0)))
		.collect();
	let mut elems = vec![input(500_000 + 2, key_in)];
	elems.extend(outs);
	let tx = build::transaction(KernelFeatures::Plain { fee: 2.into() }, elems, &keychain)
		.unwrap();

	let b = new_block(vec![tx], &keychain, &prev, &reward_id);
	b.validate(&BlindingFactor::zero(), verifier_cache(), keychain.secp())
		.unwrap();

	// flip the last byte of one output's range proof
	let mut outputs = b.outputs().clone();
	{
		let proof = &mut outputs[2].proof;
		proof.proof[proof.plen - 1] ^= 0x01;
	}
	let body = transaction::TransactionBody::init(
		b.inputs().clone(),
		outputs,
		b.kernels().clone(),
		false,
	)
	.unwrap();
	let b = block_with_body(&b.header, &body);

	// the batch verification fails and the block is rejected
	assert!(b
		.validate(&BlindingFactor::zero(), verifier_cache(), keychain.secp())
		.is_err());
}

#[test]
fn compact_block_round_trip() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let reward_id = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
	let prev = BlockHeader::default();

	let tx = tx_spending(&keychain, 2, 2);
	let b = new_block(vec![tx.clone()], &keychain, &prev, &reward_id);

	let cb: CompactBlock = b.clone().into();
	assert_eq!(cb.out_full().len(), 1);
	assert_eq!(cb.kern_full().len(), 1);
	assert_eq!(cb.kern_ids().len(), 1);

	// hydrate the compact block back into the full block using the tx
	let hydrated = Block::hydrate_from(cb, &[tx]).unwrap();
	assert_eq!(hydrated.hash(), b.hash());
	assert_eq!(hydrated.inputs(), b.inputs());
	assert_eq!(hydrated.outputs(), b.outputs());
	assert_eq!(hydrated.kernels(), b.kernels());
}
