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

//! PMMR disk backend: persistence, pruning and compaction.

use lepton_core as core;
use lepton_store as store;

use croaring::Bitmap;
use std::fs;
use std::path::PathBuf;

use crate::core::core::hash::DefaultHashable;
use crate::core::core::pmmr::{self, Backend, PMMR};
use crate::core::ser::{self, PMMRable, Readable, Reader, Writeable, Writer};
use crate::store::pmmr::PMMRBackend;

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

fn setup(test_name: &str) -> PathBuf {
	lepton_util::init_test_logger();
	let dir = std::env::temp_dir()
		.join("lepton_store_pmmr_tests")
		.join(test_name);
	let _ = fs::remove_dir_all(&dir);
	fs::create_dir_all(&dir).unwrap();
	dir
}

fn load(backend: &mut PMMRBackend<TestElem>, elems: &[TestElem]) -> u64 {
	let size = backend.unpruned_size();
	let mut pmmr = PMMR::at(backend, size);
	for e in elems {
		pmmr.push(e).unwrap();
	}
	pmmr.unpruned_size()
}

fn elems(n: u32) -> Vec<TestElem> {
	(0..n).map(TestElem).collect()
}

#[test]
fn persist_and_reload() {
	let data_dir = setup("persist_and_reload");

	let root = {
		let mut backend = PMMRBackend::new(&data_dir, true).unwrap();
		let size = load(&mut backend, &elems(10));
		backend.sync().unwrap();

		let pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		pmmr.root().unwrap()
	};

	// a fresh backend from the same files sees the same state
	{
		let mut backend = PMMRBackend::<TestElem>::new(&data_dir, true).unwrap();
		let size = backend.unpruned_size();
		assert_eq!(size, 18); // 10 leaves
		let pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		assert_eq!(pmmr.root().unwrap(), root);
		assert_eq!(pmmr.get_data(0), Some(TestElem(0)));
	}
}

#[test]
fn discard_drops_unsynced_changes() {
	let data_dir = setup("discard");

	let mut backend = PMMRBackend::new(&data_dir, true).unwrap();
	let size = load(&mut backend, &elems(4));
	backend.sync().unwrap();

	let root = PMMR::<TestElem, _>::at(&mut backend, size).root().unwrap();

	// push more leaves but discard instead of syncing
	load(&mut backend, &elems(6)[4..]);
	backend.discard();

	assert_eq!(backend.unpruned_size(), size);
	let pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
	assert_eq!(pmmr.root().unwrap(), root);
}

#[test]
fn prune_compact_shifts_reads() {
	let data_dir = setup("prune_compact");

	let mut backend = PMMRBackend::new(&data_dir, true).unwrap();
	let size = load(&mut backend, &elems(8));
	backend.sync().unwrap();

	let root = {
		let pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		pmmr.root().unwrap()
	};

	// spend leaves 0 and 1 (positions 0 and 1)
	{
		let mut pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		pmmr.prune(0).unwrap();
		pmmr.prune(1).unwrap();
	}
	backend.sync().unwrap();

	// compact everything up to the full size, no rewind protection
	let compacted = backend
		.check_compact(size, &Bitmap::create())
		.unwrap();
	assert!(compacted);

	// the root is unchanged after compaction
	{
		let pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		assert_eq!(pmmr.root().unwrap(), root);
		// spent leaves are gone
		assert_eq!(pmmr.get_data(0), None);
		assert_eq!(pmmr.get_data(1), None);
		// their parent hash survives in the hash file
		assert!(pmmr.get_from_file(2).is_some());
		// unspent leaves still resolve through the shifted offsets
		assert_eq!(pmmr.get_data(pmmr::insertion_to_pmmr_index(2)), Some(TestElem(2)));
		assert_eq!(pmmr.get_data(pmmr::insertion_to_pmmr_index(7)), Some(TestElem(7)));
	}

	// and a reload from disk agrees
	{
		let mut backend = PMMRBackend::<TestElem>::new(&data_dir, true).unwrap();
		assert_eq!(backend.unpruned_size(), size);
		let pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		assert_eq!(pmmr.root().unwrap(), root);
		assert_eq!(pmmr.get_data(pmmr::insertion_to_pmmr_index(7)), Some(TestElem(7)));
	}
}

#[test]
fn compact_twice_with_lone_leaf() {
	let data_dir = setup("compact_twice");

	let mut backend = PMMRBackend::new(&data_dir, true).unwrap();
	let size = load(&mut backend, &elems(8));
	backend.sync().unwrap();

	let root = PMMR::<TestElem, _>::at(&mut backend, size).root().unwrap();

	// spend leaves 0, 1 and 2; leaf 2's sibling (leaf 3) stays unspent so
	// leaf 2 remains a lone spent leaf after the first compaction
	{
		let mut pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		pmmr.prune(pmmr::insertion_to_pmmr_index(0)).unwrap();
		pmmr.prune(pmmr::insertion_to_pmmr_index(1)).unwrap();
		pmmr.prune(pmmr::insertion_to_pmmr_index(2)).unwrap();
	}
	backend.sync().unwrap();
	assert!(backend.check_compact(size, &Bitmap::create()).unwrap());

	{
		let pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		assert_eq!(pmmr.root().unwrap(), root);
		// the lone leaf data is retained on disk but reads as spent
		assert_eq!(pmmr.get_data(pmmr::insertion_to_pmmr_index(2)), None);
	}

	// now spend leaf 3, the pair merges on the second compaction
	{
		let mut pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		pmmr.prune(pmmr::insertion_to_pmmr_index(3)).unwrap();
	}
	backend.sync().unwrap();
	assert!(backend.check_compact(size, &Bitmap::create()).unwrap());

	{
		let pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		assert_eq!(pmmr.root().unwrap(), root);
		assert_eq!(pmmr.get_data(pmmr::insertion_to_pmmr_index(4)), Some(TestElem(4)));
	}

	// reload once more for good measure
	{
		let mut backend = PMMRBackend::<TestElem>::new(&data_dir, true).unwrap();
		let pmmr = PMMR::<TestElem, _>::at(&mut backend, size);
		assert_eq!(pmmr.root().unwrap(), root);
	}
}

#[test]
fn rewind_after_sync() {
	let data_dir = setup("rewind_after_sync");

	let mut backend = PMMRBackend::new(&data_dir, true).unwrap();

	// push 4 leaves and remember the state
	let size_4 = load(&mut backend, &elems(4));
	backend.sync().unwrap();
	let root_4 = PMMR::<TestElem, _>::at(&mut backend, size_4).root().unwrap();

	// push 4 more
	let size_8 = load(&mut backend, &elems(8)[4..]);
	backend.sync().unwrap();

	// rewind to the 4-leaf state
	{
		let mut pmmr = PMMR::<TestElem, _>::at(&mut backend, size_8);
		pmmr.rewind(pmmr::insertion_to_pmmr_index(3), &Bitmap::create())
			.unwrap();
		assert_eq!(pmmr.root().unwrap(), root_4);
	}
	backend.sync().unwrap();

	// reload and verify the rewound state stuck
	{
		let mut backend = PMMRBackend::<TestElem>::new(&data_dir, true).unwrap();
		assert_eq!(backend.unpruned_size(), size_4);
		let pmmr = PMMR::<TestElem, _>::at(&mut backend, size_4);
		assert_eq!(pmmr.root().unwrap(), root_4);
	}
}
