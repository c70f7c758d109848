// Copyright 2019 The Lepton Developers
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

//! Common storage-related types
use memmap;

use crate::core::core::hash::Hash;
use crate::core::ser::{
	self, BinWriter, FixedLength, Readable, Reader, StreamingReader, Writeable, Writer,
};
use std::fmt::Debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::marker;
use std::path::{Path, PathBuf};

/// Represents a single entry in the size_file.
/// Offset (in bytes) and size (in bytes) of a variable sized entry
/// in the corresponding data_file.
/// i.e. To read a single entry from the data_file at position p, read
/// the entry in the size_file to obtain the offset (and size) and then
/// read those bytes from the data_file.
#[derive(Clone, Debug)]
pub struct SizeEntry {
	/// Offset (bytes) in the corresponding data_file.
	pub offset: u64,
	/// Size (bytes) in the corresponding data_file.
	pub size: u16,
}

impl FixedLength for SizeEntry {
	const LEN: usize = 8 + 2;
}

impl Readable for SizeEntry {
	fn read(reader: &mut dyn Reader) -> Result<SizeEntry, ser::Error> {
		Ok(SizeEntry {
			offset: reader.read_u64()?,
			size: reader.read_u16()?,
		})
	}
}

impl Writeable for SizeEntry {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.offset)?;
		writer.write_u16(self.size)?;
		Ok(())
	}
}

/// Hash file (MMR) wrapper around an append-only file, fixed 32 byte
/// records.
pub struct HashFile {
	file: AppendOnlyFile<Hash>,
}

impl HashFile {
	/// Open (or create) a hash file at the provided path on disk.
	pub fn open<P: AsRef<Path>>(path: P) -> io::Result<HashFile> {
		let file = AppendOnlyFile::open(path, None, Some(Hash::LEN as u16))?;
		Ok(HashFile { file })
	}

	/// Append a hash to this hash file.
	/// Will not be written to disk until flush() is subsequently called.
	/// Alternatively discard() may be called to discard any pending changes.
	pub fn append(&mut self, hash: &Hash) -> io::Result<()> {
		self.file.append_elmt(hash)?;
		Ok(())
	}

	/// Read a hash from the hash file by position.
	pub fn read(&self, position: u64) -> Option<Hash> {
		match self.file.read_as_elmt(position) {
			Ok(hash) => Some(hash),
			Err(e) => {
				error!(
					"Corrupted storage, could not read an entry from hash file: {:?}",
					e
				);
				None
			}
		}
	}

	/// Rewind the backend file to the specified position (number of
	/// elements to keep).
	pub fn rewind(&mut self, position: u64) {
		self.file.rewind(position)
	}

	/// Flush unsynced changes to the hash file to disk.
	pub fn flush(&mut self) -> io::Result<()> {
		self.file.flush()
	}

	/// Discard any unsynced changes to the hash file.
	pub fn discard(&mut self) {
		self.file.discard()
	}

	/// Size of the hash file in number of hashes (including unflushed).
	pub fn size_unsync(&self) -> u64 {
		self.file.size_unsync_in_elmts().unwrap_or(0)
	}

	/// Size of the hash file in number of hashes (flushed only).
	pub fn size(&self) -> u64 {
		self.file.size_in_elmts().unwrap_or(0)
	}

	/// Path of the hash file.
	pub fn path(&self) -> &Path {
		self.file.path()
	}

	/// Drop underlying file handles.
	pub fn release(&mut self) {
		self.file.release()
	}

	/// Rewrite the file out to disk, dropping the element at the provided
	/// (pre-compaction file) offsets.
	pub fn write_compacted(&mut self, rm_offsets: &[u64]) -> io::Result<()> {
		self.file.save_prune(rm_offsets)
	}
}

/// Data file (MMR) wrapper around an append-only file.
pub struct DataFile<T> {
	file: AppendOnlyFile<T>,
}

impl<T> DataFile<T>
where
	T: Readable + Writeable + Debug,
{
	/// Open (or create) a file at the provided path on disk.
	pub fn open<P>(path: P, size_path: Option<P>, elmt_size: Option<u16>) -> io::Result<DataFile<T>>
	where
		P: AsRef<Path>,
	{
		let size_file = if let Some(size_path) = size_path {
			Some(AppendOnlyFile::open(
				size_path,
				None,
				Some(SizeEntry::LEN as u16),
			)?)
		} else {
			None
		};
		let file = AppendOnlyFile::open(path, size_file, elmt_size)?;
		Ok(DataFile { file })
	}

	/// Append an element to the file.
	/// Will not be written to disk until flush() is subsequently called.
	/// Alternatively discard() may be called to discard any pending changes.
	pub fn append(&mut self, data: &T) -> io::Result<u64> {
		self.file.append_elmt(data)?;
		Ok(self.size_unsync())
	}

	/// Read an element from the file by position (0-indexed).
	/// Assumes we have already "shifted" the position to account for pruned
	/// data.
	pub fn read(&self, position: u64) -> Option<T> {
		match self.file.read_as_elmt(position) {
			Ok(x) => Some(x),
			Err(e) => {
				error!(
					"Corrupted storage, could not read an entry from data file: {:?}",
					e
				);
				None
			}
		}
	}

	/// Rewind the backend file to the specified position (number of
	/// elements to keep).
	pub fn rewind(&mut self, position: u64) {
		self.file.rewind(position)
	}

	/// Flush unsynced changes to the file to disk.
	pub fn flush(&mut self) -> io::Result<()> {
		self.file.flush()
	}

	/// Discard any unsynced changes to the file.
	pub fn discard(&mut self) {
		self.file.discard()
	}

	/// Size of the file in number of elements (not bytes).
	pub fn size(&self) -> u64 {
		self.file.size_in_elmts().unwrap_or(0)
	}

	/// Size of the unsync'd file, in elements (not bytes).
	pub fn size_unsync(&self) -> u64 {
		self.file.size_unsync_in_elmts().unwrap_or(0)
	}

	/// Path of the underlying file
	pub fn path(&self) -> &Path {
		self.file.path()
	}

	/// Drop underlying file handles
	pub fn release(&mut self) {
		self.file.release();
	}

	/// Write the file out to disk, pruning removed elements.
	pub fn write_compacted(&mut self, rm_offsets: &[u64]) -> io::Result<()> {
		self.file.save_prune(rm_offsets)
	}
}

/// Wrapper for a file that can be read at any position (random read) but for
/// which writes are append only. Reads are backed by a memory map (mmap(2)),
/// relying on the operating system for fast access and caching. The memory
/// map is reallocated to expand it when new writes are flushed.
///
/// Despite being append-only, the file can still be pruned and truncated. The
/// former simply happens by rewriting it, ignoring some of the data. The
/// latter by truncating the underlying file and re-creating the mmap.
pub struct AppendOnlyFile<T> {
	path: PathBuf,
	file: Option<File>,

	// We either have a fixed_size or an associated "size" file.
	elmt_size: Option<u16>,
	size_file: Option<Box<AppendOnlyFile<SizeEntry>>>,

	mmap: Option<memmap::Mmap>,

	// Buffer of unsync'd bytes. These bytes will be appended to the file
	// when flushed.
	buffer: Vec<u8>,
	buffer_start_pos: u64,
	buffer_start_pos_bak: u64,
	_marker: marker::PhantomData<T>,
}

impl<T> AppendOnlyFile<T>
where
	T: Debug + Readable + Writeable,
{
	/// Open a file (existing or not) as append-only, backed by a mmap.
	pub fn open<P>(
		path: P,
		size_file: Option<AppendOnlyFile<SizeEntry>>,
		elmt_size: Option<u16>,
	) -> io::Result<AppendOnlyFile<T>>
	where
		P: AsRef<Path>,
	{
		let mut aof = AppendOnlyFile {
			file: None,
			path: path.as_ref().to_path_buf(),
			elmt_size,
			mmap: None,
			size_file: size_file.map(Box::new),
			buffer: vec![],
			buffer_start_pos: 0,
			buffer_start_pos_bak: 0,
			_marker: marker::PhantomData,
		};
		aof.init()?;

		// (Re)build the size file if inconsistent with the data file.
		// This will occur during "fast sync" as we do not sync the size_file
		// and must build it locally.
		// And we can *only* do this after init() the data file (so we know
		// sizes).
		if let Some(ref mut size_file) = &mut aof.size_file {
			if size_file.size()? == 0 && aof.path.exists() && fs::metadata(&aof.path)?.len() > 0 {
				aof.rebuild_size_file()?;

				// (Re)init the entire file as we just rebuilt the size_file
				// and things may have changed.
				aof.init()?;
			}
		}

		Ok(aof)
	}

	/// (Re)init an underlying file and its associated memmap.
	fn init(&mut self) -> io::Result<()> {
		if let Some(ref mut size_file) = self.size_file {
			size_file.init()?;
		}

		self.file = Some(
			OpenOptions::new()
				.read(true)
				.append(true)
				.create(true)
				.open(self.path.clone())?,
		);

		// If we have a non-empty file then mmap it.
		if self.size()? == 0 {
			self.buffer_start_pos = 0;
		} else {
			self.mmap = Some(unsafe { memmap::Mmap::map(&self.file.as_ref().unwrap())? });
			self.buffer_start_pos = self.size_in_elmts()?;
		}

		Ok(())
	}

	/// Size of the committed file prefix, in elements.
	pub fn size_in_elmts(&self) -> io::Result<u64> {
		if let Some(elmt_size) = self.elmt_size {
			Ok(self.size()? / elmt_size as u64)
		} else if let Some(ref size_file) = &self.size_file {
			size_file.size_in_elmts()
		} else {
			Ok(0)
		}
	}

	/// Size including the buffered-but-unflushed tail, in elements.
	pub fn size_unsync_in_elmts(&self) -> io::Result<u64> {
		if let Some(elmt_size) = self.elmt_size {
			Ok(self.buffer_start_pos + (self.buffer.len() as u64 / elmt_size as u64))
		} else if let Some(ref size_file) = &self.size_file {
			size_file.size_unsync_in_elmts()
		} else {
			Err(io::Error::new(io::ErrorKind::Other, "size file missing"))
		}
	}

	/// Append element to append-only file by serializing it to bytes and
	/// appending the bytes.
	fn append_elmt(&mut self, data: &T) -> io::Result<()> {
		let bytes = ser::ser_vec(data).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
		self.append(&bytes)?;
		Ok(())
	}

	/// Append data to the file. Until the append-only file is synced, data is
	/// only written to memory.
	pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
		if let Some(ref mut size_file) = &mut self.size_file {
			let next_pos = size_file.size_unsync_in_elmts()?;
			let offset = if next_pos == 0 {
				0
			} else {
				let prev_entry = size_file.read_as_elmt(next_pos.saturating_sub(1))?;
				prev_entry.offset + prev_entry.size as u64
			};
			size_file.append_elmt(&SizeEntry {
				offset,
				size: bytes.len() as u16,
			})?;
		}

		self.buffer.extend_from_slice(bytes);
		Ok(())
	}

	// Returns the offset and size of bytes to read.
	// If pos is in the buffer then caller needs to remember to account for
	// this when reading from the buffer.
	fn offset_and_size(&self, pos: u64) -> io::Result<(u64, u16)> {
		if let Some(size) = self.elmt_size {
			// Calculating offset and size is simple if we have fixed size
			// elements.
			Ok((pos * size as u64, size))
		} else if let Some(ref size_file) = &self.size_file {
			// Otherwise we need to calculate offset and size from entries in
			// the size_file.
			let entry = size_file.read_as_elmt(pos)?;
			Ok((entry.offset, entry.size))
		} else {
			Err(io::Error::new(
				io::ErrorKind::Other,
				"variable size, missing size file",
			))
		}
	}

	/// Rewinds the data file back to a previous position (in elements).
	/// Two cases: if the new position falls within the in-memory buffer we
	/// truncate the buffer, otherwise the buffer is dropped entirely and the
	/// committed prefix will be truncated on the next flush.
	pub fn rewind(&mut self, pos: u64) {
		if self.buffer_start_pos_bak == 0 {
			self.buffer_start_pos_bak = self.buffer_start_pos;
		}

		if pos > self.buffer_start_pos {
			// Rewinding within the buffer: keep the bytes of the elements
			// below the new position.
			let keep = match (
				self.offset_and_size(pos),
				self.offset_and_size(self.buffer_start_pos),
			) {
				(Ok((off, _)), Ok((buf_off, _))) => off.saturating_sub(buf_off) as usize,
				_ => 0,
			};
			self.buffer.truncate(keep);
		} else {
			self.buffer.clear();
			self.buffer_start_pos = pos;
		}

		if let Some(ref mut size_file) = &mut self.size_file {
			size_file.rewind(pos);
		}
	}

	/// Syncs all writes (fsync), reallocating the memory map to make the
	/// newly written data accessible.
	pub fn flush(&mut self) -> io::Result<()> {
		if let Some(ref mut size_file) = &mut self.size_file {
			// Flush the associated size_file if we have one.
			size_file.flush()?
		}

		if self.buffer_start_pos_bak > 0 {
			// Flushing a rewound state, we need to truncate via set_len()
			// before applying. Drop and recreate, or windows throws an access
			// error.
			self.mmap = None;
			self.file = None;
			{
				let file = OpenOptions::new()
					.read(true)
					.create(true)
					.write(true)
					.open(&self.path)?;

				// Set length of the file to truncate it as necessary.
				if self.buffer_start_pos == 0 {
					file.set_len(0)?;
				} else {
					let (offset, size) =
						self.offset_and_size(self.buffer_start_pos.saturating_sub(1))?;
					file.set_len(offset + size as u64)?;
				};
			}
		}

		{
			let file = OpenOptions::new()
				.read(true)
				.create(true)
				.append(true)
				.open(&self.path)?;
			self.file = Some(file);
			self.buffer_start_pos_bak = 0;
		}

		self.file.as_mut().unwrap().write_all(&self.buffer[..])?;
		self.file.as_mut().unwrap().sync_all()?;

		self.buffer.clear();
		self.buffer_start_pos = self.size_in_elmts()?;

		// Note: file must be non-empty to memory map it
		if self.file.as_ref().unwrap().metadata()?.len() == 0 {
			self.mmap = None;
		} else {
			self.mmap = Some(unsafe { memmap::Mmap::map(&self.file.as_ref().unwrap())? });
		}

		Ok(())
	}

	/// Discard the current non-flushed data.
	pub fn discard(&mut self) {
		if self.buffer_start_pos_bak > 0 {
			// discarding a rewound state, restore the buffer start
			self.buffer_start_pos = self.buffer_start_pos_bak;
			self.buffer_start_pos_bak = 0;
		}

		// Discarding the data file will discard the associated size file if
		// we have one.
		if let Some(ref mut size_file) = &mut self.size_file {
			size_file.discard();
		}

		self.buffer = vec![];
	}

	/// Read the bytes representing the element at the given position
	/// (0-indexed). Reads transparently from either the memory map or the
	/// uncommitted buffer.
	pub fn read(&self, pos: u64) -> io::Result<Vec<u8>> {
		if pos >= self.size_unsync_in_elmts()? {
			return Ok(vec![]);
		}
		let (offset, length) = self.offset_and_size(pos)?;
		let res = if pos < self.buffer_start_pos {
			self.read_from_mmap(offset, length)
		} else {
			let buffer_offset = if let Some(elmt_size) = self.elmt_size {
				self.buffer_start_pos * elmt_size as u64
			} else {
				let (offset, _) = self.offset_and_size(self.buffer_start_pos)?;
				offset
			};
			self.read_from_buffer(offset.saturating_sub(buffer_offset), length)
		};
		Ok(res)
	}

	fn read_as_elmt(&self, pos: u64) -> io::Result<T> {
		let data = self.read(pos)?;
		ser::deserialize(&mut &data[..]).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
	}

	// Read length bytes starting at offset from the buffer.
	// Return empty vec if we do not have enough bytes in the buffer to read
	// the full length bytes.
	fn read_from_buffer(&self, offset: u64, length: u16) -> Vec<u8> {
		if self.buffer.len() < (offset as usize + length as usize) {
			vec![]
		} else {
			self.buffer[(offset as usize)..(offset as usize + length as usize)].to_vec()
		}
	}

	// Read length bytes starting at offset from the mmap.
	// Return empty vec if we do not have enough bytes in the mmap to read
	// the full length bytes, or if we have no mmap currently.
	fn read_from_mmap(&self, offset: u64, length: u16) -> Vec<u8> {
		if let Some(mmap) = &self.mmap {
			if mmap.len() < (offset as usize + length as usize) {
				vec![]
			} else {
				mmap[(offset as usize)..(offset as usize + length as usize)].to_vec()
			}
		} else {
			vec![]
		}
	}

	/// Saves a copy of the current file content, skipping data at the
	/// provided (pre-compaction, 0-indexed) element offsets. rm_offsets must
	/// be ordered ascending.
	pub fn save_prune(&mut self, rm_offsets: &[u64]) -> io::Result<()> {
		let tmp_path = self.path.with_extension("tmp");

		{
			let reader = File::open(&self.path)?;
			let mut buf_reader = BufReader::new(reader);
			let mut streaming_reader = StreamingReader::new(&mut buf_reader);

			let mut buf_writer = BufWriter::new(File::create(&tmp_path)?);
			let mut bin_writer = BinWriter::new(&mut buf_writer);

			let mut current_pos = 0;
			let mut rm_offsets = rm_offsets;
			while let Ok(elmt) = T::read(&mut streaming_reader) {
				if rm_offsets.first() == Some(&current_pos) {
					// Pruned pos, moving on.
					rm_offsets = &rm_offsets[1..];
				} else {
					// Not pruned, write to file.
					elmt.write(&mut bin_writer)
						.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
				}
				current_pos += 1;
			}
			buf_writer.flush()?;
		}

		// Replace the underlying file -
		// pmmr_data.tmp -> pmmr_data.bin
		self.replace(&tmp_path)?;

		// Now rebuild our size file to reflect the pruned data file.
		// This will replace the underlying file internally.
		if self.size_file.is_some() {
			self.rebuild_size_file()?;
		}

		// Now (re)init the file and associated size_file so everything is
		// consistent.
		self.init()?;

		Ok(())
	}

	fn rebuild_size_file(&mut self) -> io::Result<()> {
		if let Some(ref mut size_file) = &mut self.size_file {
			// Note: Reading from the data file and writing sizes to the
			// associated (tmp) size_file.
			let tmp_path = size_file.path.with_extension("tmp");

			{
				let reader = File::open(&self.path)?;
				let mut buf_reader = BufReader::new(reader);
				let mut streaming_reader = StreamingReader::new(&mut buf_reader);

				let mut buf_writer = BufWriter::new(File::create(&tmp_path)?);
				let mut bin_writer = BinWriter::new(&mut buf_writer);

				let mut current_offset = 0;
				while T::read(&mut streaming_reader).is_ok() {
					let size = streaming_reader
						.total_bytes_read()
						.saturating_sub(current_offset) as u16;
					let entry = SizeEntry {
						offset: current_offset,
						size,
					};

					entry
						.write(&mut bin_writer)
						.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

					current_offset += size as u64;
				}
				buf_writer.flush()?;
			}

			// Replace the underlying file for our size_file -
			// pmmr_size.tmp -> pmmr_size.bin
			size_file.replace(&tmp_path)?;
		}

		Ok(())
	}

	/// Replace the underlying file with another file, deleting the original.
	fn replace<P>(&mut self, with: P) -> io::Result<()>
	where
		P: AsRef<Path>,
	{
		self.release();
		if self.path.exists() {
			fs::remove_file(&self.path)?;
		}
		fs::rename(with, &self.path)?;
		Ok(())
	}

	/// Release underlying file handles.
	pub fn release(&mut self) {
		self.mmap = None;
		self.file = None;

		// Remember to release the size_file as well if we have one.
		if let Some(ref mut size_file) = self.size_file {
			size_file.release();
		}
	}

	/// Current size of the file in bytes.
	pub fn size(&self) -> io::Result<u64> {
		fs::metadata(&self.path).map(|md| md.len())
	}

	/// Path of the underlying file
	pub fn path(&self) -> &Path {
		&self.path
	}
}
