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

//! On-disk bitmap of output leaves, one bit per leaf insertion index,
//! recording whether the leaf is currently unspent. The on-disk form is a
//! plain byte array with bit 0 of byte 0 representing leaf 0; bits are
//! numbered from the left (most significant) within each byte.
//!
//! Modifications are accumulated as dirty bytes and patched into the file
//! on flush, so a failed batch leaves the committed file untouched.

use croaring::Bitmap;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::core::pmmr;
use crate::util::file::save_via_temp_file;

/// Name of the sentinel file marking a bitmap already stored in the
/// leaf-indexed (version 1) format. Files written before this sentinel
/// existed were indexed by MMR position and are migrated on first load.
const VERSION_1_SENTINEL: &str = "version1";

/// A bitmap of leaf indices persisted as a byte array on disk.
pub struct BitmapFile {
	path: PathBuf,
	/// Committed bytes, as per the file on disk.
	bytes: Vec<u8>,
	/// Dirty bytes to be patched into the file on flush.
	modified_bytes: BTreeMap<u64, u8>,
}

impl BitmapFile {
	/// Open (or create) a bitmap file at the provided path, migrating a
	/// legacy position-indexed file to leaf indexing if the version
	/// sentinel is missing.
	pub fn open<P: AsRef<Path>>(path: P) -> io::Result<BitmapFile> {
		let path = path.as_ref().to_path_buf();
		let bytes = if path.exists() {
			let mut file = File::open(&path)?;
			let mut buffer = vec![];
			file.read_to_end(&mut buffer)?;
			buffer
		} else {
			vec![]
		};

		let mut bitmap_file = BitmapFile {
			path,
			bytes,
			modified_bytes: BTreeMap::new(),
		};

		bitmap_file.maybe_migrate()?;

		Ok(bitmap_file)
	}

	// If the version1 sentinel is absent and the file is non-empty, the
	// bits are indexed by MMR position. Re-index by leaf insertion index,
	// rewrite the file, then touch the sentinel.
	fn maybe_migrate(&mut self) -> io::Result<()> {
		let sentinel = self.sentinel_path();
		if sentinel.exists() || self.bytes.is_empty() {
			return Ok(());
		}

		warn!(
			"bitmap_file: migrating legacy position-indexed file {:?}",
			self.path
		);

		let mut migrated = BitmapFile {
			path: self.path.clone(),
			bytes: vec![],
			modified_bytes: BTreeMap::new(),
		};
		for pos in 0..(self.bytes.len() as u64 * 8) {
			if byte_is_set(&self.bytes, pos) && pmmr::is_leaf(pos) {
				migrated.set(pmmr::pmmr_pos_to_insertion_index(pos));
			}
		}
		migrated.flush()?;
		self.bytes = migrated.bytes;
		self.modified_bytes.clear();

		File::create(&sentinel)?;
		Ok(())
	}

	fn sentinel_path(&self) -> PathBuf {
		let mut path = self.path.clone().into_os_string();
		path.push(".");
		path.push(VERSION_1_SENTINEL);
		PathBuf::from(path)
	}

	/// Whether the bit for the given leaf index is currently set, taking
	/// pending modifications into account.
	pub fn is_set(&self, leaf_idx: u64) -> bool {
		let byte_idx = leaf_idx / 8;
		let byte = match self.modified_bytes.get(&byte_idx) {
			Some(b) => *b,
			None => *self.bytes.get(byte_idx as usize).unwrap_or(&0),
		};
		byte & bit_to_byte(leaf_idx % 8) != 0
	}

	/// Set the bit for the given leaf index.
	pub fn set(&mut self, leaf_idx: u64) {
		let byte_idx = leaf_idx / 8;
		let mut byte = match self.modified_bytes.get(&byte_idx) {
			Some(b) => *b,
			None => *self.bytes.get(byte_idx as usize).unwrap_or(&0),
		};
		byte |= bit_to_byte(leaf_idx % 8);
		self.modified_bytes.insert(byte_idx, byte);
	}

	/// Unset the bit for the given leaf index.
	pub fn unset(&mut self, leaf_idx: u64) {
		let byte_idx = leaf_idx / 8;
		let mut byte = match self.modified_bytes.get(&byte_idx) {
			Some(b) => *b,
			None => *self.bytes.get(byte_idx as usize).unwrap_or(&0),
		};
		byte &= 0xff ^ bit_to_byte(leaf_idx % 8);
		self.modified_bytes.insert(byte_idx, byte);
	}

	/// Rewind the bitmap: truncate to num_leaves bits, then re-set the bits
	/// for the leaves being restored (inputs spent in the rewound blocks).
	pub fn rewind(&mut self, num_leaves: u64, leaves_to_restore: &Bitmap) {
		// unset all bits at or beyond the new leaf count
		let total_bits = (self.bytes.len() as u64).saturating_mul(8);
		for leaf_idx in num_leaves..total_bits {
			if self.is_set(leaf_idx) {
				self.unset(leaf_idx);
			}
		}
		for leaf_idx in leaves_to_restore.iter() {
			if (leaf_idx as u64) < num_leaves {
				self.set(leaf_idx as u64);
			}
		}
	}

	/// Patch the dirty bytes into the file on disk.
	pub fn flush(&mut self) -> io::Result<()> {
		if self.modified_bytes.is_empty() {
			return Ok(());
		}

		// Extend the committed byte view to cover the highest dirty byte.
		if let Some(max_idx) = self.modified_bytes.keys().next_back() {
			if *max_idx >= self.bytes.len() as u64 {
				self.bytes.resize(*max_idx as usize + 1, 0);
			}
		}
		for (idx, byte) in &self.modified_bytes {
			self.bytes[*idx as usize] = *byte;
		}

		if !self.path.exists() {
			File::create(&self.path)?;
		}

		// Grow the file as needed then patch only the dirty bytes in place.
		let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
		if file.metadata()?.len() < self.bytes.len() as u64 {
			file.set_len(self.bytes.len() as u64)?;
		}
		for (idx, byte) in &self.modified_bytes {
			file.seek(SeekFrom::Start(*idx))?;
			file.write_all(&[*byte])?;
		}
		file.sync_all()?;

		self.modified_bytes.clear();

		// First flush of a new file doubles as the version sentinel.
		let sentinel = self.sentinel_path();
		if !sentinel.exists() {
			File::create(&sentinel)?;
		}

		Ok(())
	}

	/// Drop any pending modifications.
	pub fn discard(&mut self) {
		self.modified_bytes.clear();
	}

	/// Number of currently set bits.
	pub fn count(&self) -> u64 {
		self.to_bitmap().cardinality()
	}

	/// Convert to an in-memory Roaring bitmap of leaf indices.
	pub fn to_bitmap(&self) -> Bitmap {
		let total_bits = ((self.bytes.len() as u64).max(
			self.modified_bytes
				.keys()
				.next_back()
				.map(|x| x + 1)
				.unwrap_or(0),
		)) * 8;
		(0..total_bits)
			.filter(|x| self.is_set(*x))
			.map(|x| x as u32)
			.collect()
	}

	/// Write a snapshot of the current (committed plus pending) bitmap to
	/// the provided path. Used to store the rewound leaf set tagged by
	/// block hash for the fast-sync archive.
	pub fn snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
		let mut bytes = self.bytes.clone();
		if let Some(max_idx) = self.modified_bytes.keys().next_back() {
			if *max_idx >= bytes.len() as u64 {
				bytes.resize(*max_idx as usize + 1, 0);
			}
		}
		for (idx, byte) in &self.modified_bytes {
			bytes[*idx as usize] = *byte;
		}
		save_via_temp_file(path, ".tmp", |mut w| w.write_all(&bytes))?;
		Ok(())
	}

	/// Path of the underlying file.
	pub fn path(&self) -> &Path {
		&self.path
	}
}

// Bits are numbered from the left within each byte: bit 0 is 0b1000_0000.
fn bit_to_byte(bit: u64) -> u8 {
	0x80 >> bit
}

fn byte_is_set(bytes: &[u8], bit_idx: u64) -> bool {
	bytes
		.get((bit_idx / 8) as usize)
		.map(|b| b & bit_to_byte(bit_idx % 8) != 0)
		.unwrap_or(false)
}

#[cfg(test)]
mod test {
	use super::*;

	fn tmp_path(name: &str) -> PathBuf {
		let dir = std::env::temp_dir().join("lepton_bitmap_file_tests");
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join(name);
		let _ = std::fs::remove_file(&path);
		let _ = std::fs::remove_file(format!("{}.version1", path.display()));
		path
	}

	#[test]
	fn set_unset_flush_reload() {
		let path = tmp_path("set_unset");
		{
			let mut bf = BitmapFile::open(&path).unwrap();
			bf.set(0);
			bf.set(9);
			bf.set(10);
			bf.unset(9);
			assert!(bf.is_set(0));
			assert!(!bf.is_set(9));
			assert!(bf.is_set(10));
			bf.flush().unwrap();
		}
		{
			let bf = BitmapFile::open(&path).unwrap();
			assert!(bf.is_set(0));
			assert!(!bf.is_set(9));
			assert!(bf.is_set(10));
			assert_eq!(bf.count(), 2);
		}
	}

	#[test]
	fn discard_drops_pending() {
		let path = tmp_path("discard");
		let mut bf = BitmapFile::open(&path).unwrap();
		bf.set(3);
		bf.flush().unwrap();

		bf.set(4);
		bf.unset(3);
		bf.discard();
		assert!(bf.is_set(3));
		assert!(!bf.is_set(4));
	}

	#[test]
	fn rewind_restores_leaves() {
		let path = tmp_path("rewind");
		let mut bf = BitmapFile::open(&path).unwrap();
		for i in 0..10 {
			bf.set(i);
		}
		// leaves 2 and 3 get spent
		bf.unset(2);
		bf.unset(3);
		// rewind to 8 leaves, restoring leaf 2 (spent in a rewound block)
		let mut restore = Bitmap::create();
		restore.add(2);
		bf.rewind(8, &restore);

		assert!(bf.is_set(2));
		assert!(!bf.is_set(3));
		assert!(bf.is_set(7));
		assert!(!bf.is_set(8));
		assert!(!bf.is_set(9));
	}

	#[test]
	fn on_disk_format_bit_zero_is_msb() {
		let path = tmp_path("format");
		let mut bf = BitmapFile::open(&path).unwrap();
		bf.set(0);
		bf.set(7);
		bf.flush().unwrap();

		let bytes = std::fs::read(&path).unwrap();
		assert_eq!(bytes, vec![0b1000_0001]);
	}

	#[test]
	fn legacy_position_indexed_file_is_migrated() {
		let path = tmp_path("migrate");
		// legacy file with bits set at MMR positions 0, 1 and 3 (leaves 0,
		// 1 and 2) plus position 2 (a parent, dropped by the migration)
		std::fs::write(&path, &[0b1111_0000u8]).unwrap();

		let bf = BitmapFile::open(&path).unwrap();
		assert!(bf.is_set(0));
		assert!(bf.is_set(1));
		assert!(bf.is_set(2));
		assert!(!bf.is_set(3));

		// migrated file carries the version sentinel, reloading does not
		// migrate again
		let bf2 = BitmapFile::open(&path).unwrap();
		assert_eq!(bf2.count(), 3);
	}
}
