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

//! Utility functions to build Lepton transactions. Handles the blinding of
//! inputs and outputs, maintaining the sum of blinding factors, producing
//! the excess signature, etc.
//!
//! Each building function is a combinator that produces a function taking
//! a transaction a sum of blinding factors, to return another transaction
//! and sum. Combinators can then be chained and executed using the
//! _transaction_ function.
//!
//! Example:
//! ```ignore
//! let tx = build::transaction(
//!     KernelFeatures::Plain { fee: 2.into() },
//!     vec![
//!         build::input(75, key_id1),
//!         build::output(42, key_id2),
//!         build::output(32, key_id3),
//!     ],
//!     &keychain,
//! )?;
//! ```

use crate::core::{Input, KernelFeatures, Output, OutputFeatures, Transaction, TxKernel};
use crate::keychain::{BlindSum, Identifier, Keychain};
use crate::libtx::error::Error;
use crate::libtx::{aggsig, proof};
use rand::thread_rng;

/// Context information available to transaction combinators.
pub struct Context<'a, K>
where
	K: Keychain,
{
	/// The keychain used for key derivation
	pub keychain: &'a K,
}

/// Function type returned by the transaction combinators. Transforms a
/// (Transaction, BlindSum) tuple into another, given the provided context.
/// Will return an Err if seriously unhappy.
pub type Append<K> = dyn for<'a> Fn(
	&'a mut Context<'_, K>,
	Result<(Transaction, BlindSum), Error>,
) -> Result<(Transaction, BlindSum), Error>;

/// Adds an input with the provided value and blinding key to the transaction
/// being built.
fn build_input<K>(value: u64, features: OutputFeatures, key_id: Identifier) -> Box<Append<K>>
where
	K: Keychain,
{
	Box::new(
		move |build, acc| -> Result<(Transaction, BlindSum), Error> {
			if let Ok((tx, sum)) = acc {
				let commit = build.keychain.commit(value, &key_id)?;
				let input = Input::new(features, commit);
				Ok((
					tx.with_input(input),
					sum.sub_key_id(key_id.clone()),
				))
			} else {
				acc
			}
		},
	)
}

/// Adds an input with the provided value and blinding key to the transaction
/// being built.
pub fn input<K>(value: u64, key_id: Identifier) -> Box<Append<K>>
where
	K: Keychain,
{
	debug!(
		"Building input (spending regular output): {}, {}",
		value, key_id
	);
	build_input(value, OutputFeatures::Plain, key_id)
}

/// Adds a coinbase input spending a coinbase output.
pub fn coinbase_input<K>(value: u64, key_id: Identifier) -> Box<Append<K>>
where
	K: Keychain,
{
	debug!("Building input (spending coinbase): {}, {}", value, key_id);
	build_input(value, OutputFeatures::Coinbase, key_id)
}

/// Adds an output with the provided value and key identifier from the
/// keychain.
pub fn output<K>(value: u64, key_id: Identifier) -> Box<Append<K>>
where
	K: Keychain,
{
	Box::new(
		move |build, acc| -> Result<(Transaction, BlindSum), Error> {
			let (tx, sum) = acc?;

			let commit = build.keychain.commit(value, &key_id)?;

			debug!("Building output: {}, {:?}", value, commit);

			let rproof = proof::create(build.keychain, value, &key_id, commit, None)?;

			Ok((
				tx.with_output(Output::new(OutputFeatures::Plain, commit, rproof)),
				sum.add_key_id(key_id.clone()),
			))
		},
	)
}

/// Takes an existing transaction and partially builds on top of it.
pub fn initial_tx<K>(tx: Transaction) -> Box<Append<K>>
where
	K: Keychain,
{
	Box::new(
		move |_build, acc| -> Result<(Transaction, BlindSum), Error> {
			let (_, sum) = acc?;
			Ok((tx.clone(), sum))
		},
	)
}

/// Builds a complete transaction.
/// NOTE: We only use this in tests (for convenience).
/// The transaction building process is more complex in the real world: the
/// kernel is signed interactively with partial signatures and the offset is
/// agreed between the parties. This function plays every role at once.
pub fn transaction<K>(
	features: KernelFeatures,
	elems: Vec<Box<Append<K>>>,
	keychain: &K,
) -> Result<Transaction, Error>
where
	K: Keychain,
{
	let mut ctx = Context { keychain };
	let (mut tx, sum) = elems.iter().fold(
		Ok((Transaction::empty(), BlindSum::new())),
		|acc, elem| elem(&mut ctx, acc),
	)?;
	let blind_sum = ctx.keychain.blind_sum(&sum)?;

	// Split the key so we can generate an offset for the tx.
	let (k1, k2) = blind_sum.split(keychain.secp(), &mut thread_rng())?;

	// Construct the kernel and sign it with k1, committing to the
	// feature-appropriate message.
	let mut kern = TxKernel::with_features(features);
	let msg = kern.msg_to_sign()?;
	let skey = k1.secret_key(keychain.secp())?;
	kern.excess = ctx.keychain.secp().commit(0, skey)?;
	let pubkey = &kern.excess.to_pubkey(keychain.secp())?;
	kern.excess_sig = aggsig::sign_with_blinding(keychain.secp(), &msg, &k1, Some(&pubkey))?;

	// Store the kernel offset (k2) on the tx.
	// Commitments will sum correctly when accounting for the offset.
	tx.offset = k2;

	// Set the kernel on the tx.
	let tx = tx.replace_kernel(kern);

	Ok(tx)
}

/// Builds a complete transaction around an existing, pre-built kernel.
/// The caller provides the kernel's secret excess so the tx offset can be
/// derived from the overall blinding sum. Mostly useful for tests that
/// need precise control over the kernel (e.g. duplicating an NRD kernel).
pub fn transaction_with_kernel<K>(
	elems: Vec<Box<Append<K>>>,
	kernel: TxKernel,
	excess: crate::keychain::BlindingFactor,
	keychain: &K,
) -> Result<Transaction, Error>
where
	K: Keychain,
{
	let mut ctx = Context { keychain };
	let (tx, sum) = elems.iter().fold(
		Ok((Transaction::empty(), BlindSum::new())),
		|acc, elem| elem(&mut ctx, acc),
	)?;

	let blind_sum = ctx.keychain.blind_sum(&sum)?;

	// The tx offset is the overall blinding sum minus the kernel's own
	// excess key.
	let secp = keychain.secp();
	let offset = crate::keychain::BlindingFactor::from_secret_key(secp.blind_sum(
		vec![blind_sum.secret_key(secp)?],
		vec![excess.secret_key(secp)?],
	)?);

	let mut tx = tx.replace_kernel(kernel);
	tx.offset = offset;
	Ok(tx)
}

/// Build a kernel with the provided features, signed with the provided
/// excess key.
pub fn build_kernel<K>(
	features: KernelFeatures,
	excess: &crate::keychain::BlindingFactor,
	keychain: &K,
) -> Result<TxKernel, Error>
where
	K: Keychain,
{
	let secp = keychain.secp();
	let mut kern = TxKernel::with_features(features);
	let msg = kern.msg_to_sign()?;
	let skey = excess.secret_key(secp)?;
	kern.excess = secp.commit(0, skey)?;
	let pubkey = &kern.excess.to_pubkey(secp)?;
	kern.excess_sig = aggsig::sign_with_blinding(secp, &msg, excess, Some(&pubkey))?;
	Ok(kern)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::transaction::Weighting;
	use crate::core::verifier_cache::{LruVerifierCache, VerifierCache};
	use crate::keychain::ExtKeychain;
	use crate::util::RwLock;
	use std::sync::Arc;

	fn verifier_cache() -> Arc<RwLock<dyn VerifierCache>> {
		Arc::new(RwLock::new(LruVerifierCache::new()))
	}

	#[test]
	fn blind_simple_tx() {
		let keychain = ExtKeychain::from_random_seed().unwrap();
		let key_id1 = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
		let key_id2 = ExtKeychain::derive_key_id(1, 2, 0, 0, 0);
		let key_id3 = ExtKeychain::derive_key_id(1, 3, 0, 0, 0);

		let vc = verifier_cache();

		let tx = transaction(
			KernelFeatures::Plain { fee: 2.into() },
			vec![
				input(10, key_id1),
				input(12, key_id2),
				output(20, key_id3),
			],
			&keychain,
		)
		.unwrap();

		tx.validate(Weighting::AsTransaction, vc.clone(), keychain.secp())
			.unwrap();
	}

	#[test]
	fn blind_simple_tx_with_offset() {
		// the offset is generated by the build and stored on the tx,
		// a tx without its offset must not validate
		let keychain = ExtKeychain::from_random_seed().unwrap();
		let key_id1 = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
		let key_id2 = ExtKeychain::derive_key_id(1, 2, 0, 0, 0);

		let vc = verifier_cache();

		let tx = transaction(
			KernelFeatures::Plain { fee: 2.into() },
			vec![input(6, key_id1), output(4, key_id2)],
			&keychain,
		)
		.unwrap();

		tx.validate(Weighting::AsTransaction, vc.clone(), keychain.secp())
			.unwrap();

		let mut stripped = tx.clone();
		stripped.offset = crate::keychain::BlindingFactor::zero();
		assert!(stripped
			.validate(Weighting::AsTransaction, vc.clone(), keychain.secp())
			.is_err());
	}

	#[test]
	fn blind_simpler_tx() {
		let keychain = ExtKeychain::from_random_seed().unwrap();
		let key_id1 = ExtKeychain::derive_key_id(1, 1, 0, 0, 0);
		let key_id2 = ExtKeychain::derive_key_id(1, 2, 0, 0, 0);

		let vc = verifier_cache();

		// first build a valid tx with corresponding blinding factor
		let tx = transaction(
			KernelFeatures::Plain { fee: 4.into() },
			vec![input(6, key_id1), output(2, key_id2)],
			&keychain,
		)
		.unwrap();

		tx.validate(Weighting::AsTransaction, vc.clone(), keychain.secp())
			.unwrap();
	}
}
