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

//! Implementation of Cuckatoo Cycle, the ASIC-targeted (AT) variant of the
//! Cuckoo Cycle proof of work, designed by John Tromp. Only verification is
//! provided; solving is left to dedicated miners.

use crate::pow::common::CuckooParams;
use crate::pow::error::Error;
use crate::pow::{PoWContext, Proof};

/// Instantiate a new CuckatooContext as a PowContext.
pub fn new_cuckatoo_ctx(edge_bits: u8, proof_size: usize) -> Result<Box<dyn PoWContext>, Error> {
	let params = CuckooParams::new(edge_bits, proof_size)?;
	Ok(Box::new(CuckatooContext { params }))
}

/// Cuckatoo cycle context.
pub struct CuckatooContext {
	params: CuckooParams,
}

impl PoWContext for CuckatooContext {
	fn set_header_nonce(
		&mut self,
		header: Vec<u8>,
		nonce: Option<u32>,
		_solve: bool,
	) -> Result<(), Error> {
		self.params.reset_header_nonce(header, nonce)
	}

	fn find_cycles(&mut self) -> Result<Vec<Proof>, Error> {
		// There is no mining support here, cycles are found by dedicated
		// miners and only verified by the node.
		Err(Error::Verification("no cuckatoo solver".to_owned()))
	}

	fn verify(&self, proof: &Proof) -> Result<(), Error> {
		if proof.proof_size() != self.params.proof_size {
			return Err(Error::Verification("wrong cycle length".to_owned()));
		}
		if proof.edge_bits != self.params.edge_bits {
			return Err(Error::Verification("wrong edge bits".to_owned()));
		}

		let nonces = &proof.nonces;
		let size = proof.proof_size();
		let mut uvs = vec![0u64; 2 * size];
		let mut xor0: u64 = (size as u64 / 2) & 1;
		let mut xor1: u64 = xor0;

		for n in 0..size {
			if nonces[n] > self.params.edge_mask {
				return Err(Error::Verification("edge too big".to_owned()));
			}
			if n > 0 && nonces[n] <= nonces[n - 1] {
				return Err(Error::Verification("edges not ascending".to_owned()));
			}
			// In cuckatoo each endpoint is generated by its own siphash call
			// keyed by the edge index and the u/v side, with the side bit
			// appended to keep the two partitions disjoint.
			let u = self.params.sipnode(nonces[n], 0)?;
			let v = self.params.sipnode(nonces[n], 1)?;
			uvs[2 * n] = (u << 1) | 0;
			uvs[2 * n + 1] = (v << 1) | 1;
			xor0 ^= uvs[2 * n];
			xor1 ^= uvs[2 * n + 1];
		}
		if xor0 | xor1 != 0 {
			return Err(Error::Verification("endpoints don't match up".to_owned()));
		}
		let mut n = 0;
		let mut i = 0;
		let mut j;
		loop {
			// follow cycle
			j = i;
			let mut k = j;
			loop {
				k = (k + 2) % (2 * size);
				if k == i {
					break;
				}
				if uvs[k] >> 1 == uvs[i] >> 1 {
					// find other edge endpoint matching one at i
					if j != i {
						return Err(Error::Verification("branch in cycle".to_owned()));
					}
					j = k;
				}
			}
			if j == i || uvs[j] == uvs[i] {
				return Err(Error::Verification("cycle dead ends".to_owned()));
			}
			i = j ^ 1;
			n += 1;
			if i == 0 {
				break;
			}
		}
		if n == size {
			Ok(())
		} else {
			Err(Error::Verification("cycle too short".to_owned()))
		}
	}
}
