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

//! Transaction body validation rules.

use lepton_core as core;
use lepton_keychain as keychain;
use lepton_util as util;

use crate::core::core::transaction::{self, Weighting};
use crate::core::core::verifier_cache::{LruVerifierCache, VerifierCache};
use crate::core::core::{
	Input, KernelFeatures, Output, OutputFeatures, Transaction, TransactionBody,
};
use crate::core::libtx::build::{self, input, output};
use crate::core::ser;
use crate::keychain::{ExtKeychain, Keychain};
use crate::util::secp::pedersen::Commitment;
use crate::util::RwLock;
use std::sync::Arc;

fn verifier_cache() -> Arc<RwLock<dyn VerifierCache>> {
	Arc::new(RwLock::new(LruVerifierCache::new()))
}

fn tx1i1o(keychain: &ExtKeychain) -> Transaction {
	let key_id1 = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
	let key_id2 = ExtKeychain::derive_key_id(1, 2, 0, 0, 0);
	build::transaction(
		KernelFeatures::Plain { fee: 2.into() },
		vec![input(10, key_id1), output(8, key_id2)],
		keychain,
	)
	.unwrap()
}

// synthetic commitment for structural (non-crypto) tests
fn commit_n(n: u32) -> Commitment {
	let mut bytes = vec![0u8; 33];
	bytes[29..33].copy_from_slice(&n.to_be_bytes());
	Commitment::from_vec(bytes)
}

#[test]
fn tx_ser_deser_and_stable_hash() {
	use crate::core::core::hash::Hashed;

	let keychain = ExtKeychain::from_random_seed().unwrap();
	let tx = tx1i1o(&keychain);

	let vec = ser::ser_vec(&tx).expect("serialization failed");
	let tx_2: Transaction = ser::deserialize(&mut &vec[..]).unwrap();

	assert_eq!(tx, tx_2);
	assert_eq!(tx.hash(), tx_2.hash());

	// truncated bytes do not deserialize
	assert!(ser::deserialize::<Transaction>(&mut &vec[..vec.len() - 1]).is_err());
}

#[test]
fn tx_with_valid_kernel_sig_validates() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let tx = tx1i1o(&keychain);
	tx.validate(Weighting::AsTransaction, verifier_cache(), keychain.secp())
		.unwrap();
	assert_eq!(tx.fee(), 2);
}

#[test]
fn tx_tampered_excess_rejected() {
	// replace the kernel excess with an unrelated commitment, the kernel
	// signature no longer verifies and the tx is rejected
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let mut tx = tx1i1o(&keychain);

	let key_id = ExtKeychain::derive_key_id(1, 42, 0, 0, 0);
	tx.body.kernels[0].excess = keychain.commit(1, &key_id).unwrap();

	assert!(tx
		.validate(Weighting::AsTransaction, verifier_cache(), keychain.secp())
		.is_err());
}

#[test]
fn tx_coinbase_output_rejected() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let mut tx = tx1i1o(&keychain);

	// a transaction carrying a coinbase-flagged output is invalid
	let out = tx.body.outputs[0].clone();
	tx.body.outputs[0] = Output::new(OutputFeatures::Coinbase, out.commit, out.proof);
	assert_eq!(
		tx.validate_read().err(),
		Some(transaction::Error::InvalidOutputFeatures)
	);
}

#[test]
fn tx_coinbase_kernel_rejected() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let mut tx = tx1i1o(&keychain);

	tx.body.kernels[0].features = KernelFeatures::Coinbase;
	assert_eq!(
		tx.validate_read().err(),
		Some(transaction::Error::InvalidKernelFeatures)
	);
}

#[test]
fn body_duplicate_input_rejected() {
	let input = Input::new(OutputFeatures::Plain, commit_n(7));
	let res = TransactionBody::init(vec![input, input], vec![], vec![], true);
	assert!(res.is_err());
}

#[test]
fn body_cut_through_violation_rejected() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let tx = tx1i1o(&keychain);
	let out = tx.body.outputs[0].clone();

	// spend an output created in the same body
	let body = TransactionBody::init(
		vec![Input::new(out.features, out.commit)],
		vec![out],
		vec![],
		false,
	)
	.unwrap();
	assert_eq!(
		body.validate_read(Weighting::NoLimit).err(),
		Some(transaction::Error::CutThrough)
	);
}

#[test]
fn body_weight_boundaries() {
	use crate::core::consensus;

	// weight cap expressed in input units (input weight is 1)
	let cap = consensus::MAX_BLOCK_WEIGHT;

	let build_body = |n: usize| -> TransactionBody {
		let inputs = (0..n as u32)
			.map(|i| Input::new(OutputFeatures::Plain, commit_n(i)))
			.collect();
		TransactionBody::init(inputs, vec![], vec![], false).unwrap()
	};

	// at the cap the body passes the weight check
	let body = build_body(cap);
	assert!(body.validate_read(Weighting::AsBlock).is_ok());

	// one past the cap is rejected
	let body = build_body(cap + 1);
	assert_eq!(
		body.validate_read(Weighting::AsBlock).err(),
		Some(transaction::Error::TooHeavy)
	);
}

#[test]
fn tx_aggregation_and_deaggregation() {
	let keychain = ExtKeychain::from_random_seed().unwrap();
	let vc = verifier_cache();

	let key_id1 = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
	let key_id2 = ExtKeychain::derive_key_id(1, 2, 0, 0, 0);
	let key_id3 = ExtKeychain::derive_key_id(1, 3, 0, 0, 0);
	let key_id4 = ExtKeychain::derive_key_id(1, 4, 0, 0, 0);

	let tx1 = build::transaction(
		KernelFeatures::Plain { fee: 2.into() },
		vec![input(10, key_id1), output(8, key_id2)],
		&keychain,
	)
	.unwrap();
	let tx2 = build::transaction(
		KernelFeatures::Plain { fee: 3.into() },
		vec![input(20, key_id3), output(17, key_id4)],
		&keychain,
	)
	.unwrap();

	let agg = transaction::aggregate(vec![tx1.clone(), tx2.clone()], keychain.secp()).unwrap();
	agg.validate(Weighting::AsTransaction, vc.clone(), keychain.secp())
		.unwrap();
	assert_eq!(agg.fee(), 5);
	assert_eq!(agg.kernels().len(), 2);

	// deaggregating tx2 out of the aggregate recovers tx1
	let deagg =
		transaction::deaggregate(agg, vec![tx2], keychain.secp()).unwrap();
	deagg
		.validate(Weighting::AsTransaction, vc.clone(), keychain.secp())
		.unwrap();
	assert_eq!(deagg, tx1);
}
