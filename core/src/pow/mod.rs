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

//! The proof of work needs to strike a balance between fast header
//! verification to avoid DoS attacks and difficulty for block verifiers to
//! build new blocks. In addition, mining new blocks should also be as
//! difficult on high end custom-made hardware (ASICs) as on commodity
//! hardware or smartphones. For this reason we use Cuckoo Cycle (see the
//! [whitepaper](https://github.com/tromp/cuckoo/blob/master/doc/cuckoo.pdf)
//! for more information), in two variants: an ASIC-resistant one (Cuckaroo,
//! at a fixed graph size) and an ASIC-targeted one (Cuckatoo, at growing
//! graph sizes).

mod common;
mod cuckaroo;
mod cuckatoo;
mod error;
pub mod siphash;
mod types;

use crate::core::BlockHeader;

pub use self::common::CuckooParams;
pub use self::cuckaroo::{new_cuckaroo_ctx, CuckarooContext};
pub use self::cuckatoo::{new_cuckatoo_ctx, CuckatooContext};
pub use self::error::Error;
pub use self::types::{Difficulty, Proof, ProofOfWork};

/// Generic trait for a solver/verifier providing common interface into the
/// Cuckoo-family of PoWs. Mostly used for verification, but also for test
/// mining if necessary.
pub trait PoWContext {
	/// Sets the header along with an optional nonce at the end.
	/// solve: whether to set up structures for a solve (true) or just
	/// validate (false)
	fn set_header_nonce(
		&mut self,
		header: Vec<u8>,
		nonce: Option<u32>,
		solve: bool,
	) -> Result<(), Error>;
	/// find solutions using the stored parameters and header
	fn find_cycles(&mut self) -> Result<Vec<Proof>, Error>;
	/// Verify a solution with the stored parameters
	fn verify(&self, proof: &Proof) -> Result<(), Error>;
}

/// Build a PoW verification context appropriate for the proof's edge_bits:
/// the AR (Cuckaroo) variant for the secondary size, the AT (Cuckatoo)
/// variant for primary sizes.
pub fn create_pow_context(edge_bits: u8, proof_size: usize) -> Result<Box<dyn PoWContext>, Error> {
	if edge_bits == crate::consensus::SECOND_POW_EDGE_BITS {
		new_cuckaroo_ctx(edge_bits, proof_size)
	} else {
		new_cuckatoo_ctx(edge_bits, proof_size)
	}
}

/// Validates the proof of work of a given header. Only the cycle itself is
/// checked here; the difficulty target is the caller's concern as it
/// depends on the previous header.
pub fn verify_size(bh: &BlockHeader) -> Result<(), Error> {
	let proof = &bh.pow.proof;
	let mut ctx = create_pow_context(proof.edge_bits, proof.proof_size())?;
	ctx.set_header_nonce(bh.pre_pow(), None, false)?;
	ctx.verify(&bh.pow.proof)
}
