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

//! Common types and traits for the cuckoo-family of proof of work solvers
//! and verifiers.

use blake2_rfc::blake2b::blake2b;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::Cursor;

use crate::pow::error::Error;
use crate::pow::siphash::siphash24;

/// Operations on a graph of edge_bits size, shared between the cuckoo-family
/// verifiers. The four siphash keys are derived from the blake2b hash of the
/// header's pre-PoW bytes (with the nonce included).
#[derive(Clone, Debug, PartialEq)]
pub struct CuckooParams {
	/// The 2-log of the graph's number of edges
	pub edge_bits: u8,
	/// Size of the cycle to look for
	pub proof_size: usize,
	/// Number of edges in the graph
	pub num_edges: u64,
	/// The keys, from the header's hash, driving the siphash edge generation
	pub siphash_keys: [u64; 4],
	/// Mask for edge indices, 2^edge_bits - 1
	pub edge_mask: u64,
}

impl CuckooParams {
	/// Instantiates new params and calculate edge mask, etc
	pub fn new(edge_bits: u8, proof_size: usize) -> Result<CuckooParams, Error> {
		if edge_bits == 0 || edge_bits > 63 {
			return Err(Error::InvalidEdgeBits(edge_bits));
		}
		let num_edges = 1u64 << edge_bits;
		let edge_mask = num_edges - 1;
		Ok(CuckooParams {
			edge_bits,
			proof_size,
			num_edges,
			siphash_keys: [0; 4],
			edge_mask,
		})
	}

	/// Reset the main keys used for siphash from the header and nonce
	pub fn reset_header_nonce(&mut self, header: Vec<u8>, nonce: Option<u32>) -> Result<(), Error> {
		self.siphash_keys = set_header_nonce(&header, nonce)?;
		Ok(())
	}

	/// Return siphash masked for type
	pub fn sipnode(&self, edge: u64, uorv: u64) -> Result<u64, Error> {
		let hash_u64 = siphash24(&self.siphash_keys, 2 * edge + uorv);
		let node = hash_u64 & self.edge_mask;
		Ok(node)
	}
}

/// Utility to transform a 8 bytes of a given slice into a u64.
pub fn set_header_nonce(header: &[u8], nonce: Option<u32>) -> Result<[u64; 4], Error> {
	if let Some(n) = nonce {
		let len = header.len();
		let mut header = header.to_owned();
		header.truncate(len - 4); // drop the last 4 nonce bytes
		header.write_u32::<LittleEndian>(n)?;
		create_siphash_keys(&header)
	} else {
		create_siphash_keys(&header)
	}
}

/// Derive the four siphash keys from the blake2b hash of the header bytes,
/// reading the digest as four little-endian u64 halves.
pub fn create_siphash_keys(header: &[u8]) -> Result<[u64; 4], Error> {
	let h = blake2b(32, &[], &header);
	let hb = h.as_bytes();
	let mut rdr = Cursor::new(hb);
	Ok([
		read_u64(&mut rdr)?,
		read_u64(&mut rdr)?,
		read_u64(&mut rdr)?,
		read_u64(&mut rdr)?,
	])
}

fn read_u64(rdr: &mut Cursor<&[u8]>) -> Result<u64, Error> {
	let pos = rdr.position() as usize;
	let buf = *rdr.get_ref();
	if buf.len() < pos + 8 {
		return Err(Error::IOError);
	}
	rdr.set_position((pos + 8) as u64);
	Ok(LittleEndian::read_u64(&buf[pos..pos + 8]))
}
