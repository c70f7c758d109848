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

//! Implementation of the chain block acceptance (or refusal) pipeline.

use crate::core::consensus;
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::verifier_cache::VerifierCache;
use crate::core::core::{Block, BlockHeader, BlockSums, Committed, KernelFeatures};
use crate::core::pow;
use crate::error::{Error, ErrorKind};
use crate::store::{Batch, DifficultyIter};
use crate::txhashset::{self, TxHashSet};
use crate::types::{Options, Tip};
use crate::util::secp::Secp256k1;
use crate::util::{Mutex, RwLock};
use std::sync::Arc;

/// Contextual information required to process a new block and either
/// reject or accept it.
pub struct BlockContext {
	/// The options
	pub opts: Options,
	/// The pow verifier to use when processing a block.
	pub pow_verifier: fn(&BlockHeader) -> Result<(), pow::Error>,
	/// Recently processed outputs and kernels to avoid double verification.
	pub verifier_cache: Arc<RwLock<dyn VerifierCache>>,
	/// Number of blocks a coinbase output must wait before it can be spent.
	pub coinbase_maturity: u64,
	/// The active secp context.
	pub secp: Arc<Mutex<Secp256k1>>,
}

/// Runs the block processing pipeline, including validation and applying
/// the block to the txhashset within the provided batch.
///
/// `fork_point` is the most recent common ancestor of the new block and the
/// current chain head; `fork_hashes` lists the blocks (ascending) between
/// the fork point and the new block's parent which must be re-applied after
/// a rewind when processing a fork.
///
/// Returns the new chain head if the total work of the chain increased.
pub fn process_block(
	b: &Block,
	ctx: &BlockContext,
	txhashset: &mut TxHashSet,
	batch: &mut Batch<'_>,
	fork_point: &BlockHeader,
	fork_hashes: &[Hash],
) -> Result<Option<Tip>, Error> {
	debug!(
		"pipe: process_block {} at {} [in/out/kern: {}/{}/{}]",
		b.hash(),
		b.header.height,
		b.inputs().len(),
		b.outputs().len(),
		b.kernels().len()
	);

	// Check if we have already processed this block.
	check_known(&b.header, batch)?;

	// Header specific processing.
	let prev = prev_header_stored(b, batch)?;
	validate_header(&b.header, &prev, ctx, batch)?;

	// Validate the block itself, make sure it is internally consistent.
	// Use the verifier_cache for verifying rangeproofs and kernel
	// signatures.
	validate_block(b, &prev, ctx)?;

	let head = batch.head()?;

	// Start a chain extension unit of work dependent on the success of the
	// internal validation and saving operations.
	txhashset::extending(txhashset, batch, |ext, child_batch| {
		// First rewind to the fork point and (re)apply the fork blocks if
		// we are processing a block on a fork.
		if fork_point.hash() != ext.head().last_block_h {
			rewind_and_apply_fork(ext, child_batch, ctx, fork_point, fork_hashes)?;
		}

		// Check any coinbase being spent have matured sufficiently.
		verify_coinbase_maturity(b, ctx.coinbase_maturity, ext, child_batch)?;

		// Validate the block against the UTXO set.
		ext.utxo_view().validate_block(b, child_batch)?;

		// NRD kernels must not duplicate a recent instance of the same
		// excess within the relative height window.
		verify_nrd_relative_height(b, child_batch)?;

		// Using block_sums (utxo_sum, kernel_sum) for the previous block
		// to check the full kernel sum equation for the new block.
		verify_block_sums(b, child_batch, &ctx.secp)?;

		// Apply the block to the txhashset state, index the spent outputs
		// and the NRD kernels.
		apply_block_to_extension(b, ext, child_batch)?;

		// If applying this block does not increase the work on the chain
		// then we know we have not yet updated the chain to produce a new
		// chain head, so we discard the extension (the block and all its
		// indexes stay in the db for a possible later reorg).
		if !has_more_work(&b.header, &head) {
			ext.force_rollback();
		}

		Ok(())
	})?;

	// Add the validated block to the db.
	add_block(b, batch)?;

	// If we have no "tail" yet let's set it now.
	if has_more_work(&b.header, &head) {
		let tip = Tip::from_header(&b.header);
		batch.save_head(&tip)?;
		Ok(Some(tip))
	} else {
		Ok(None)
	}
}

/// Process a block header received during "header first" propagation.
/// The header is validated (including PoW) against its previous header,
/// which must already be known.
pub fn process_block_header(
	header: &BlockHeader,
	ctx: &BlockContext,
	batch: &Batch<'_>,
) -> Result<(), Error> {
	debug!(
		"pipe: process_block_header: {} at {}",
		header.hash(),
		header.height
	);

	check_header_known(header, batch)?;
	let prev = batch.get_previous_header(header).map_err(|e| match e.kind() {
		ErrorKind::StoreErr(lepton_store::lmdb::Error::NotFoundErr(_), _) => {
			ErrorKind::Orphan.into()
		}
		_ => e,
	})?;
	validate_header(header, &prev, ctx, batch)?;
	Ok(())
}

/// Validate a header against its (already known) previous header, without
/// any already-known short-circuiting. Used during header sync where whole
/// batches of sequential headers go through validation.
pub fn validate_header_solo(
	header: &BlockHeader,
	prev: &BlockHeader,
	ctx: &BlockContext,
	batch: &Batch<'_>,
) -> Result<(), Error> {
	validate_header(header, prev, ctx, batch)
}

/// Quick in-memory check to fast-reject any block header we've already
/// handled recently. Keeps duplicates from the network in check.
fn check_header_known(header: &BlockHeader, batch: &Batch<'_>) -> Result<(), Error> {
	let candidate_head = batch.candidate_head()?;
	if header.hash() == candidate_head.last_block_h
		|| header.hash() == candidate_head.prev_block_h
	{
		return Err(ErrorKind::Unfit("header already known".to_string()).into());
	}
	Ok(())
}

/// Quick check to reject recently handled blocks (through the chain head).
fn check_known(header: &BlockHeader, batch: &Batch<'_>) -> Result<(), Error> {
	let head = batch.head()?;
	if header.hash() == head.last_block_h || header.hash() == head.prev_block_h {
		return Err(ErrorKind::Unfit("already known in head".to_string()).into());
	}
	if batch.block_exists(&header.hash())? {
		return Err(ErrorKind::Unfit("already known in store".to_string()).into());
	}
	Ok(())
}

// The previous block must exist as a full block for us to process this
// block (otherwise it is an orphan).
fn prev_header_stored(b: &Block, batch: &Batch<'_>) -> Result<BlockHeader, Error> {
	if !batch.block_exists(&b.header.prev_hash)? {
		return Err(ErrorKind::Orphan.into());
	}
	batch
		.get_block_header(&b.header.prev_hash)
		.map_err(|_| Error::from(ErrorKind::Orphan))
}

/// First level of block validation that only needs to act on the block
/// header to make it as cheap as possible. The different validations are
/// also arranged by order of cost to have as little DoS surface as possible.
fn validate_header(
	header: &BlockHeader,
	prev: &BlockHeader,
	ctx: &BlockContext,
	batch: &Batch<'_>,
) -> Result<(), Error> {
	// check version, enforces scheduled hard fork
	if !consensus::valid_header_version(header.height, header.version) {
		return Err(ErrorKind::InvalidBlockVersion.into());
	}

	if header.height != prev.height + 1 {
		return Err(ErrorKind::InvalidBlockHeight.into());
	}

	// block timestamp must be strictly greater than the previous block's
	if header.timestamp <= prev.timestamp {
		return Err(ErrorKind::InvalidBlockTime.into());
	}

	if !ctx.opts.contains(Options::SKIP_POW) {
		// Each header must carry strictly more total work than its parent.
		if header.total_difficulty() <= prev.total_difficulty() {
			return Err(ErrorKind::DifficultyTooLow.into());
		}

		// The edge_bits must be sane for one of the two proofs of work.
		if !header.pow.is_primary() && !header.pow.is_secondary() {
			return Err(ErrorKind::LowEdgebits.into());
		}

		// A secondary proof with a zeroed scaling factor could otherwise
		// claim arbitrary difficulty.
		if header.pow.is_secondary() && header.pow.secondary_scaling == 0 {
			return Err(ErrorKind::InvalidScaling.into());
		}

		// The work claimed by the header (the difficulty target it says it
		// meets) must actually be achieved by the proof hash.
		let target_difficulty = header.total_difficulty() - prev.total_difficulty();
		if header.pow.to_difficulty(header.height) < target_difficulty {
			return Err(ErrorKind::DifficultyTooLow.into());
		}

		// The cuckoo cycle itself must check out for the header's pre-PoW
		// hash.
		if let Err(e) = (ctx.pow_verifier)(header) {
			error!(
				"pipe: error validating header with cuckoo edge_bits {}: {}",
				header.pow.edge_bits(),
				e
			);
			return Err(ErrorKind::InvalidPow.into());
		}

		// Explicit check to ensure total_difficulty has increased by exactly
		// the difficulty of the consensus retarget calculation.
		let child_batch = DifficultyIter::from_batch(prev.hash(), batch);
		let next_header_info = consensus::next_difficulty(header.height, child_batch);
		if target_difficulty != next_header_info.difficulty {
			info!(
				"validate_header: header target difficulty {} != {}",
				target_difficulty.to_num(),
				next_header_info.difficulty.to_num()
			);
			return Err(ErrorKind::WrongTotalDifficulty.into());
		}

		// check the secondary PoW scaling factor if applicable
		if header.pow.secondary_scaling != next_header_info.secondary_scaling {
			info!(
				"validate_header: header secondary scaling {} != {}",
				header.pow.secondary_scaling, next_header_info.secondary_scaling
			);
			return Err(ErrorKind::InvalidScaling.into());
		}
	}

	Ok(())
}

fn validate_block(b: &Block, prev: &BlockHeader, ctx: &BlockContext) -> Result<(), Error> {
	let secp = ctx.secp.lock();
	b.validate(
		&prev.total_kernel_offset,
		ctx.verifier_cache.clone(),
		&secp,
	)
	.map_err(ErrorKind::InvalidBlockProof)?;
	Ok(())
}

/// Verify the block is not attempting to spend coinbase outputs
/// before they have sufficiently matured.
fn verify_coinbase_maturity(
	b: &Block,
	maturity: u64,
	ext: &txhashset::Extension<'_>,
	batch: &Batch<'_>,
) -> Result<(), Error> {
	let view = ext.utxo_view();
	for input in b.inputs() {
		view.verify_coinbase_maturity(input, b.header.height, maturity, batch)?;
	}
	Ok(())
}

/// An NRD kernel is invalid if an instance of the same kernel excess was
/// accepted in any block within the preceding relative_height blocks.
fn verify_nrd_relative_height(b: &Block, batch: &Batch<'_>) -> Result<(), Error> {
	if !consensus::nrd_enabled(b.header.height) {
		return Ok(());
	}
	for kernel in b.kernels() {
		if let KernelFeatures::NoRecentDuplicate {
			relative_height, ..
		} = kernel.features
		{
			let heights = batch.get_nrd_kernel_heights(&kernel.excess())?;
			if let Some(prev_height) = heights.last() {
				let diff = b.header.height.saturating_sub(*prev_height);
				if diff < u64::from(relative_height) {
					return Err(ErrorKind::NRDRelativeHeight.into());
				}
			}
		}
	}
	Ok(())
}

/// Verify the block against the (previous block's) block_sums: applying the
/// block to the cumulative output and kernel sums must balance with the
/// cumulative kernel offset and total overage. Saves the new block_sums on
/// success.
fn verify_block_sums(
	b: &Block,
	batch: &Batch<'_>,
	secp: &Arc<Mutex<Secp256k1>>,
) -> Result<(), Error> {
	// Retrieve the block_sums for the previous block.
	let block_sums = batch.get_block_sums(&b.header.prev_hash)?;

	// Overage is based purely on the new block.
	// Previous block_sums have taken all previous overage into account.
	let overage = b.header.overage();

	// Offset on the other hand is the total kernel offset from the new block.
	let offset = b.header.total_kernel_offset();

	// Verify the kernel sums for the block_sums with the new block applied.
	let secp = secp.lock();
	let (utxo_sum, kernel_sum) =
		(block_sums, b as &dyn Committed).verify_kernel_sums(overage, offset, &secp)?;

	batch.save_block_sums(
		&b.hash(),
		BlockSums {
			output_sum: utxo_sum,
			kernel_sum,
		},
	)?;

	Ok(())
}

/// Fully validate the block by applying it to the txhashset extension.
/// Check both the txhashset roots and sizes are correct after applying the
/// block.
fn apply_block_to_extension(
	b: &Block,
	ext: &mut txhashset::Extension<'_>,
	batch: &Batch<'_>,
) -> Result<(), Error> {
	ext.apply_block(b, batch)?;
	ext.validate_roots(&b.header)?;
	ext.validate_sizes(&b.header)?;

	// Index the NRD kernels of the accepted block.
	if consensus::nrd_enabled(b.header.height) {
		for kernel in b.kernels() {
			if kernel.is_nrd() {
				batch.push_nrd_kernel_height(&kernel.excess(), b.header.height)?;
			}
		}
	}
	Ok(())
}

/// Officially adds the block to our chain (db).
/// Header must be added separately (assume this has been done previously).
fn add_block(b: &Block, batch: &Batch<'_>) -> Result<(), Error> {
	batch.save_block(b)?;
	batch.save_block_header(&b.header)?;
	Ok(())
}

/// Whether the provided block totals more work than the chain tip.
fn has_more_work(header: &BlockHeader, head: &Tip) -> bool {
	header.total_difficulty() > head.total_difficulty
}

/// Rewind the txhashset to the fork point, then (re)apply the blocks on the
/// winning fork branch in ascending order.
pub fn rewind_and_apply_fork(
	ext: &mut txhashset::Extension<'_>,
	batch: &Batch<'_>,
	ctx: &BlockContext,
	fork_point: &BlockHeader,
	fork_hashes: &[Hash],
) -> Result<(), Error> {
	debug!(
		"rewind_and_apply_fork: rewinding to {} at {}, re-applying {} blocks",
		fork_point.hash(),
		fork_point.height,
		fork_hashes.len()
	);

	// Rewind the txhashset state back to the fork point.
	ext.rewind(fork_point, batch)?;

	// Now re-apply all blocks on this fork.
	for h in fork_hashes {
		let fb = batch.get_block(h)?;

		// Re-verify coinbase maturity and utxo against the rewound state.
		verify_coinbase_maturity(&fb, ctx.coinbase_maturity, ext, batch)?;
		ext.utxo_view().validate_block(&fb, batch)?;
		verify_nrd_relative_height(&fb, batch)?;
		// The block sums for fork blocks were discarded along with the
		// losing state when first seen, recompute and store them as we
		// replay the fork.
		verify_block_sums(&fb, batch, &ctx.secp)?;
		ext.apply_block(&fb, batch)?;
		ext.validate_roots(&fb.header)?;
		ext.validate_sizes(&fb.header)?;
		if consensus::nrd_enabled(fb.header.height) {
			for kernel in fb.kernels() {
				if kernel.is_nrd() {
					batch.push_nrd_kernel_height(&kernel.excess(), fb.header.height)?;
				}
			}
		}
	}
	Ok(())
}
