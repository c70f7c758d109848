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

//! PMMR tests on the in-memory backend.

use lepton_core as core;

use croaring::Bitmap;

use crate::core::core::hash::DefaultHashable;
use crate::core::core::pmmr::{self, Backend, VecBackend, PMMR};
use crate::core::ser::{self, PMMRable, Readable, Reader, Writeable, Writer};

/// Minimal leaf element for exercising the MMR.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TestElem(u32);

impl DefaultHashable for TestElem {}

impl PMMRable for TestElem {
	type E = Self;

	fn as_elmt(&self) -> Self::E {
		*self
	}

	fn elmt_size() -> Option<u16> {
		Some(4)
	}
}

impl Writeable for TestElem {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.0)
	}
}

impl Readable for TestElem {
	fn read(reader: &mut dyn Reader) -> Result<TestElem, ser::Error> {
		Ok(TestElem(reader.read_u32()?))
	}
}

fn elems(n: u32) -> Vec<TestElem> {
	(0..n).map(TestElem).collect()
}

#[test]
fn some_peak_map_and_heights() {
	// heights of the first few positions in post-order
	let heights: Vec<u64> = (0..11).map(pmmr::bintree_postorder_height).collect();
	assert_eq!(heights, [0, 0, 1, 0, 0, 1, 2, 0, 0, 1, 0]);

	// leaf insertion indices map to the expected node positions
	assert_eq!(pmmr::insertion_to_pmmr_index(0), 0);
	assert_eq!(pmmr::insertion_to_pmmr_index(1), 1);
	assert_eq!(pmmr::insertion_to_pmmr_index(2), 3);
	assert_eq!(pmmr::insertion_to_pmmr_index(3), 4);
	assert_eq!(pmmr::insertion_to_pmmr_index(4), 7);

	// and back again
	for i in 0..100 {
		let pos = pmmr::insertion_to_pmmr_index(i);
		assert!(pmmr::is_leaf(pos));
		assert_eq!(pmmr::pmmr_pos_to_insertion_index(pos), i);
	}
}

#[test]
fn peaks_and_n_leaves() {
	// a single leaf is its own peak
	assert_eq!(pmmr::peaks(1), [0]);
	// 3 nodes make a perfect tree with a single peak
	assert_eq!(pmmr::peaks(3), [2]);
	// 4 nodes: the perfect tree plus a dangling leaf
	assert_eq!(pmmr::peaks(4), [2, 3]);
	// 7 nodes: perfect tree of 7
	assert_eq!(pmmr::peaks(7), [6]);
	// 10 nodes: peaks at 6 and 9
	assert_eq!(pmmr::peaks(10), [6, 9]);
	// 11 nodes: 6, 9, 10
	assert_eq!(pmmr::peaks(11), [6, 9, 10]);
	// invalid sizes that cut a parent in half have no peaks
	assert_eq!(pmmr::peaks(5), Vec::<u64>::new());

	assert_eq!(pmmr::n_leaves(1), 1);
	assert_eq!(pmmr::n_leaves(3), 2);
	assert_eq!(pmmr::n_leaves(4), 3);
	assert_eq!(pmmr::n_leaves(7), 4);
	assert_eq!(pmmr::n_leaves(10), 6);
}

#[test]
fn pmmr_push_root() {
	let mut ba = VecBackend::new();
	let mut pmmr = PMMR::new(&mut ba);

	let mut roots = vec![];
	for e in elems(9) {
		pmmr.push(&e).unwrap();
		roots.push(pmmr.root().unwrap());
	}

	// all roots are distinct
	for w in roots.windows(2) {
		assert_ne!(w[0], w[1]);
	}

	// sizes line up with the number of leaves pushed
	assert_eq!(pmmr.unpruned_size(), 16);
	assert_eq!(pmmr::n_leaves(pmmr.unpruned_size()), 9);

	// the in-tree parent hashes check out
	pmmr.validate().unwrap();
}

#[test]
fn pmmr_apply_rewind_apply_same_root() {
	// apply(L); rewind(0); apply(L) must produce the same root as a single
	// apply(L)
	let leaves = elems(12);

	let mut ba = VecBackend::new();
	let root_once = {
		let mut pmmr = PMMR::new(&mut ba);
		for e in &leaves {
			pmmr.push(e).unwrap();
		}
		pmmr.root().unwrap()
	};

	let mut ba2 = VecBackend::new();
	let root_twice = {
		let mut pmmr = PMMR::new(&mut ba2);
		for e in &leaves {
			pmmr.push(e).unwrap();
		}
		pmmr.truncate().unwrap();
		assert_eq!(pmmr.root().unwrap(), core::core::hash::ZERO_HASH);
		for e in &leaves {
			pmmr.push(e).unwrap();
		}
		pmmr.root().unwrap()
	};

	assert_eq!(root_once, root_twice);
}

#[test]
fn pmmr_rewind_to_partial_state() {
	let leaves = elems(10);

	// build the full MMR, remembering the root after 6 leaves
	let mut ba = VecBackend::new();
	let mut pmmr = PMMR::new(&mut ba);
	let mut root_at_6 = None;
	let mut size_at_6 = 0;
	for (i, e) in leaves.iter().enumerate() {
		pmmr.push(e).unwrap();
		if i == 5 {
			root_at_6 = Some(pmmr.root().unwrap());
			size_at_6 = pmmr.unpruned_size();
		}
	}

	// rewind to the 6th leaf
	let pos_of_leaf_5 = pmmr::insertion_to_pmmr_index(5);
	pmmr.rewind(pos_of_leaf_5, &Bitmap::create()).unwrap();
	assert_eq!(pmmr.unpruned_size(), size_at_6);
	assert_eq!(Some(pmmr.root().unwrap()), root_at_6);
}

#[test]
fn pmmr_prune_leaf_retains_hashes() {
	let leaves = elems(8);

	let mut ba = VecBackend::new();
	let mut pmmr = PMMR::new(&mut ba);
	for e in &leaves {
		pmmr.push(e).unwrap();
	}
	let root = pmmr.root().unwrap();

	// marking a leaf spent does not change the root
	assert_eq!(pmmr.prune(0).unwrap(), true);
	assert_eq!(pmmr.root().unwrap(), root);

	// pruning twice is a no-op returning false
	assert_eq!(pmmr.prune(0).unwrap(), false);

	// pruning a non-leaf position is an error
	assert!(pmmr.prune(2).is_err());

	// the spent leaf no longer surfaces data but the hash file retains it
	assert_eq!(pmmr.get_data(0), None);
	assert!(pmmr.get_from_file(0).is_some());

	// number of unspent leaves reflects the prune
	assert_eq!(pmmr.n_unpruned_leaves(), 7);
}

#[test]
fn pmmr_merkle_proof() {
	let leaves = elems(11);

	let mut ba = VecBackend::new();
	let mut pmmr = PMMR::new(&mut ba);
	let mut positions = vec![];
	for e in &leaves {
		positions.push(pmmr.push(e).unwrap());
	}
	let root = pmmr.root().unwrap();

	for (i, e) in leaves.iter().enumerate() {
		let proof = pmmr.merkle_proof(positions[i]).unwrap();
		proof.verify(root, e, positions[i]).unwrap();

		// proof does not verify against the wrong element
		let wrong = TestElem(999);
		assert!(proof.verify(root, &wrong, positions[i]).is_err());
	}

	// proof for a non-leaf position is an error
	assert!(pmmr.merkle_proof(2).is_err());
}

#[test]
fn pmmr_rewind_restores_spent_leaves() {
	let leaves = elems(6);

	let mut ba = VecBackend::new();
	let mut pmmr = PMMR::new(&mut ba);
	for e in &leaves {
		pmmr.push(e).unwrap();
	}

	// spend leaf 1 then rewind past it, restoring it
	pmmr.prune(pmmr::insertion_to_pmmr_index(1)).unwrap();
	assert_eq!(pmmr.get_data(pmmr::insertion_to_pmmr_index(1)), None);

	let mut restore = Bitmap::create();
	restore.add(1);
	pmmr.rewind(pmmr::insertion_to_pmmr_index(5), &restore)
		.unwrap();

	assert_eq!(
		pmmr.get_data(pmmr::insertion_to_pmmr_index(1)),
		Some(TestElem(1))
	);
}
