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

//! Lightweight readonly view into the output MMR for convenience.

use crate::core::core::pmmr::ReadonlyPMMR;
use crate::core::core::{Block, Input, Output, OutputIdentifier, Transaction};
use crate::error::{Error, ErrorKind};
use crate::store::Batch;
use lepton_store::pmmr::PMMRBackend;

/// Readonly view of the UTXO set (based on output MMR).
pub struct UTXOView<'a> {
	output_pmmr: ReadonlyPMMR<'a, Output, PMMRBackend<Output>>,
}

impl<'a> UTXOView<'a> {
	/// Build a new UTXO view.
	pub fn new(output_pmmr: ReadonlyPMMR<'a, Output, PMMRBackend<Output>>) -> UTXOView<'a> {
		UTXOView { output_pmmr }
	}

	/// Validate a block against the current UTXO set.
	/// Every input must spend an output that currently exists in the UTXO
	/// set. No duplicate outputs.
	pub fn validate_block(&self, block: &Block, batch: &Batch<'_>) -> Result<(), Error> {
		for output in block.outputs() {
			self.validate_output(output, batch)?;
		}

		for input in block.inputs() {
			self.validate_input(input, batch)?;
		}
		Ok(())
	}

	/// Validate a transaction against the current UTXO set.
	/// Every input must spend an output that currently exists in the UTXO
	/// set. No duplicate outputs.
	pub fn validate_tx(&self, tx: &Transaction, batch: &Batch<'_>) -> Result<(), Error> {
		for output in tx.outputs() {
			self.validate_output(output, batch)?;
		}

		for input in tx.inputs() {
			self.validate_input(input, batch)?;
		}
		Ok(())
	}

	fn validate_input(&self, input: &Input, batch: &Batch<'_>) -> Result<(), Error> {
		if let Ok(cp) = batch.get_output_pos(&input.commitment()) {
			if let Some(out) = self.output_pmmr.get_data(cp.pos) {
				if out == OutputIdentifier::from(input) {
					return Ok(());
				}
			}
		}
		Err(ErrorKind::AlreadySpent(input.commitment()).into())
	}

	fn validate_output(&self, output: &Output, batch: &Batch<'_>) -> Result<(), Error> {
		if let Ok(cp) = batch.get_output_pos(&output.commitment()) {
			if let Some(out_mmr) = self.output_pmmr.get_data(cp.pos) {
				if out_mmr.commitment() == output.commitment() {
					return Err(ErrorKind::DuplicateCommitment(output.commitment()).into());
				}
			}
		}
		Ok(())
	}

	/// Retrieve an unspent output using its PMMR position.
	pub fn get_unspent_output_at(&self, pos: u64) -> Result<OutputIdentifier, Error> {
		self.output_pmmr
			.get_data(pos)
			.ok_or_else(|| ErrorKind::OutputNotFound.into())
	}

	/// Verify that an output being spent as an input is sufficiently mature:
	/// coinbase outputs can only be spent COINBASE_MATURITY blocks after the
	/// block that created them.
	pub fn verify_coinbase_maturity(
		&self,
		input: &Input,
		height: u64,
		maturity: u64,
		batch: &Batch<'_>,
	) -> Result<(), Error> {
		if !input.is_coinbase() {
			return Ok(());
		}
		let cp = batch
			.get_output_pos(&input.commitment())
			.map_err(|_| Error::from(ErrorKind::OutputNotFound))?;
		// an output created at height h has a lock height of h + maturity
		if cp.height + maturity > height {
			return Err(ErrorKind::ImmatureCoinbase.into());
		}
		Ok(())
	}
}
