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

//! Implements storage primitives required by the chain: the block DB itself
//! plus the three named chains (confirmed, candidate, sync) persisted as
//! 32-bytes-per-entry append-only files sharing BlockIndex records.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::consensus::HeaderInfo;
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::{Block, BlockHeader, BlockSums};
use crate::core::pow::Difficulty;
use crate::error::{Error, ErrorKind};
use crate::types::{CommitPos, Tip};
use crate::util::secp::pedersen::Commitment;
use crate::util::RwLock;
use lepton_store as store;
use lepton_store::types::HashFile;
use lepton_store::{option_to_not_found, SerIterator};

const STORE_DB_NAME: &str = "lepton_chain";
const CHAIN_SUBPATH: &str = "chain";

const BLOCK_PREFIX: u8 = b'b';
const BLOCK_HEADER_PREFIX: u8 = b'h';
const HEAD_PREFIX: u8 = b'H';
const CANDIDATE_HEAD_PREFIX: u8 = b'C';
const SYNC_HEAD_PREFIX: u8 = b'y';
const COMMIT_POS_PREFIX: u8 = b'o';
const BLOCK_SUMS_PREFIX: u8 = b'M';
const BLOCK_SPENT_PREFIX: u8 = b'S';
const NRD_KERNEL_PREFIX: u8 = b'k';

/// Lightweight identity of a block, an entry shared by all the chains that
/// contain the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndex {
	/// Hash of the block.
	pub hash: Hash,
	/// Height of the block.
	pub height: u64,
}

impl BlockIndex {
	/// New block index.
	pub fn new(hash: Hash, height: u64) -> BlockIndex {
		BlockIndex { hash, height }
	}
}

/// One named chain: an in-memory vector of shared BlockIndex entries backed
/// by an append-only file of 32-byte hash entries, indexed by height.
pub struct ChainFile {
	name: String,
	file: HashFile,
	indices: Vec<Arc<BlockIndex>>,
}

impl ChainFile {
	/// Open (or create) the named chain at the given path.
	pub fn open<P: AsRef<Path>>(path: P, name: &str) -> Result<ChainFile, Error> {
		let file = HashFile::open(path.as_ref())
			.map_err(|e| ErrorKind::FileReadErr(format!("{} chain file: {}", name, e)))?;

		let mut indices = vec![];
		for height in 0..file.size() {
			let hash = file.read(height).ok_or_else(|| {
				ErrorKind::FileReadErr(format!("{} chain file entry {}", name, height))
			})?;
			indices.push(Arc::new(BlockIndex::new(hash, height)));
		}

		Ok(ChainFile {
			name: name.to_owned(),
			file,
			indices,
		})
	}

	/// Name of this chain (confirmed, candidate or sync).
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Height of the current tip. Chains always contain at least the
	/// genesis entry once initialized.
	pub fn height(&self) -> u64 {
		self.indices.len().saturating_sub(1) as u64
	}

	/// Is this chain still empty (not even a genesis entry)?
	pub fn is_empty(&self) -> bool {
		self.indices.is_empty()
	}

	/// The tip entry of this chain.
	pub fn tip(&self) -> Option<Arc<BlockIndex>> {
		self.indices.last().cloned()
	}

	/// The entry at the given height, if this chain is that tall.
	pub fn get_index(&self, height: u64) -> Option<Arc<BlockIndex>> {
		self.indices.get(height as usize).cloned()
	}

	/// The block hash at the given height, if this chain is that tall.
	pub fn hash_at(&self, height: u64) -> Option<Hash> {
		self.indices.get(height as usize).map(|x| x.hash)
	}

	/// Whether the given block is part of this chain.
	pub fn is_on_chain(&self, height: u64, hash: Hash) -> bool {
		self.hash_at(height) == Some(hash)
	}

	/// Append a new entry to this chain. The entry must extend the current
	/// tip by exactly one height.
	pub fn append(&mut self, index: Arc<BlockIndex>) -> Result<(), Error> {
		if index.height != self.indices.len() as u64 {
			return Err(ErrorKind::Other(format!(
				"cannot append to {} chain, height {} != {}",
				self.name,
				index.height,
				self.indices.len()
			))
			.into());
		}
		self.file
			.append(&index.hash)
			.map_err(|e| ErrorKind::FileReadErr(format!("{} chain append: {}", self.name, e)))?;
		self.indices.push(index);
		Ok(())
	}

	/// Rewind this chain back to the provided height (the entry at that
	/// height becomes the tip).
	pub fn rewind(&mut self, height: u64) {
		if self.height() <= height {
			return;
		}
		self.file.rewind(height + 1);
		self.indices.truncate(height as usize + 1);
	}

	/// Commit pending appends or rewinds to the underlying file.
	pub fn commit(&mut self) -> Result<(), Error> {
		self.file
			.flush()
			.map_err(|e| ErrorKind::FileReadErr(format!("{} chain flush: {}", self.name, e)).into())
	}

	/// Roll back pending changes, restoring the in-memory index from the
	/// last committed file contents.
	pub fn rollback(&mut self) -> Result<(), Error> {
		self.file.discard();
		self.indices.clear();
		for height in 0..self.file.size() {
			let hash = self.file.read(height).ok_or_else(|| {
				ErrorKind::FileReadErr(format!("{} chain file entry {}", self.name, height))
			})?;
			self.indices
				.push(Arc::new(BlockIndex::new(hash, height)));
		}
		Ok(())
	}
}

/// The three named chain views over the shared block index entries.
pub struct NamedChains {
	/// The confirmed (full block) chain.
	pub confirmed: ChainFile,
	/// The candidate (most work header) chain.
	pub candidate: ChainFile,
	/// The sync scratch (header) chain.
	pub sync: ChainFile,
}

impl NamedChains {
	/// Find or create a shared BlockIndex entry for (hash, height). A fork
	/// segment shared between chains is represented by a single entry.
	pub fn get_or_create_index(&self, hash: Hash, height: u64) -> Arc<BlockIndex> {
		for chain in &[&self.confirmed, &self.candidate, &self.sync] {
			if let Some(index) = chain.get_index(height) {
				if index.hash == hash {
					return index;
				}
			}
		}
		Arc::new(BlockIndex::new(hash, height))
	}

	/// Commit all three chains, in fixed order.
	pub fn commit(&mut self) -> Result<(), Error> {
		self.confirmed.commit()?;
		self.candidate.commit()?;
		self.sync.commit()?;
		Ok(())
	}

	/// Roll all three chains back, in fixed order.
	pub fn rollback(&mut self) -> Result<(), Error> {
		self.confirmed.rollback()?;
		self.candidate.rollback()?;
		self.sync.rollback()?;
		Ok(())
	}
}

/// All chain-related database operations: blocks, headers, the output
/// position index, the spent index and the NRD kernel index, plus the three
/// named chain files.
pub struct ChainStore {
	db: store::Store,
	chains: RwLock<NamedChains>,
}

impl ChainStore {
	/// Create new chain store.
	pub fn new(db_root: &str) -> Result<ChainStore, Error> {
		let db_env = Arc::new(store::new_env(db_root.to_string()));
		let db = store::Store::open(db_env, STORE_DB_NAME);

		let chain_dir = PathBuf::from(db_root).join(CHAIN_SUBPATH);
		fs::create_dir_all(&chain_dir)
			.map_err(|e| ErrorKind::FileReadErr(format!("chain dir: {}", e)))?;

		let chains = NamedChains {
			confirmed: ChainFile::open(
				chain_dir.join("confirmed.chain"),
				crate::types::CONFIRMED_CHAIN,
			)?,
			candidate: ChainFile::open(
				chain_dir.join("candidate.chain"),
				crate::types::CANDIDATE_CHAIN,
			)?,
			sync: ChainFile::open(chain_dir.join("sync.chain"), crate::types::SYNC_CHAIN)?,
		};

		Ok(ChainStore {
			db,
			chains: RwLock::new(chains),
		})
	}

	/// Shared access to the three named chains.
	pub fn chains(&self) -> &RwLock<NamedChains> {
		&self.chains
	}

	/// The current confirmed chain head.
	pub fn head(&self) -> Result<Tip, Error> {
		option_to_not_found(self.db.get_ser(&[HEAD_PREFIX]), "HEAD").map_err(Into::into)
	}

	/// The current candidate (header) chain head.
	pub fn candidate_head(&self) -> Result<Tip, Error> {
		option_to_not_found(self.db.get_ser(&[CANDIDATE_HEAD_PREFIX]), "CANDIDATE_HEAD")
			.map_err(Into::into)
	}

	/// The current sync chain head.
	pub fn sync_head(&self) -> Result<Tip, Error> {
		option_to_not_found(self.db.get_ser(&[SYNC_HEAD_PREFIX]), "SYNC_HEAD").map_err(Into::into)
	}

	/// Header of the confirmed chain head.
	pub fn head_header(&self) -> Result<BlockHeader, Error> {
		self.get_block_header(&self.head()?.last_block_h)
	}

	/// Get full block.
	pub fn get_block(&self, h: &Hash) -> Result<Block, Error> {
		option_to_not_found(
			self.db.get_ser(&to_key(BLOCK_PREFIX, &mut h.to_vec())),
			&format!("BLOCK: {}", h),
		)
		.map_err(Into::into)
	}

	/// Does this full block exist?
	pub fn block_exists(&self, h: &Hash) -> Result<bool, Error> {
		self.db
			.exists(&to_key(BLOCK_PREFIX, &mut h.to_vec()))
			.map_err(Into::into)
	}

	/// Get block header.
	pub fn get_block_header(&self, h: &Hash) -> Result<BlockHeader, Error> {
		option_to_not_found(
			self.db
				.get_ser(&to_key(BLOCK_HEADER_PREFIX, &mut h.to_vec())),
			&format!("BLOCK HEADER: {}", h),
		)
		.map_err(Into::into)
	}

	/// Get previous header.
	pub fn get_previous_header(&self, header: &BlockHeader) -> Result<BlockHeader, Error> {
		self.get_block_header(&header.prev_hash)
	}

	/// Get block sums for the block hash.
	pub fn get_block_sums(&self, h: &Hash) -> Result<BlockSums, Error> {
		option_to_not_found(
			self.db.get_ser(&to_key(BLOCK_SUMS_PREFIX, &mut h.to_vec())),
			&format!("Block sums for block: {}", h),
		)
		.map_err(Into::into)
	}

	/// Get the position and creation height of an output by commitment.
	pub fn get_output_pos(&self, commit: &Commitment) -> Result<CommitPos, Error> {
		option_to_not_found(
			self.db
				.get_ser(&to_key(COMMIT_POS_PREFIX, &mut commit.as_ref().to_vec())),
			&format!("Output position for: {:?}", commit),
		)
		.map_err(Into::into)
	}

	/// Builds a new batch to be used with this store.
	pub fn batch(&self) -> Result<Batch<'_>, Error> {
		Ok(Batch {
			db: self.db.batch()?,
		})
	}
}

/// An atomic batch in which all changes can be committed or rolled back at
/// once. The chain files are committed separately, after the database
/// transaction lands, by the single chain-mutating caller that holds the
/// chain write lock.
pub struct Batch<'a> {
	/// The underlying db instance.
	pub db: store::lmdb::Batch<'a>,
}

impl<'a> Batch<'a> {
	/// The head of the confirmed chain.
	pub fn head(&self) -> Result<Tip, Error> {
		option_to_not_found(self.db.get_ser(&[HEAD_PREFIX]), "HEAD").map_err(Into::into)
	}

	/// Header of the confirmed chain head.
	pub fn head_header(&self) -> Result<BlockHeader, Error> {
		self.get_block_header(&self.head()?.last_block_h)
	}

	/// The head of the candidate header chain.
	pub fn candidate_head(&self) -> Result<Tip, Error> {
		option_to_not_found(self.db.get_ser(&[CANDIDATE_HEAD_PREFIX]), "CANDIDATE_HEAD")
			.map_err(Into::into)
	}

	/// The head of the sync chain.
	pub fn sync_head(&self) -> Result<Tip, Error> {
		option_to_not_found(self.db.get_ser(&[SYNC_HEAD_PREFIX]), "SYNC_HEAD").map_err(Into::into)
	}

	/// Save confirmed chain head.
	pub fn save_head(&self, t: &Tip) -> Result<(), Error> {
		self.db.put_ser(&[HEAD_PREFIX], t).map_err(Into::into)
	}

	/// Save candidate header chain head.
	pub fn save_candidate_head(&self, t: &Tip) -> Result<(), Error> {
		self.db
			.put_ser(&[CANDIDATE_HEAD_PREFIX], t)
			.map_err(Into::into)
	}

	/// Save sync chain head.
	pub fn save_sync_head(&self, t: &Tip) -> Result<(), Error> {
		self.db.put_ser(&[SYNC_HEAD_PREFIX], t).map_err(Into::into)
	}

	/// Save the block to the db.
	/// Note: the block header is not saved to the db here, assumes this has
	/// already been done.
	pub fn save_block(&self, b: &Block) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(BLOCK_PREFIX, &mut b.hash().to_vec())[..], b)
			.map_err(Into::into)
	}

	/// Delete a full block. Does not delete any record associated with a
	/// block header.
	pub fn delete_block(&self, bh: &Hash) -> Result<(), Error> {
		self.db
			.delete(&to_key(BLOCK_PREFIX, &mut bh.to_vec())[..])?;

		// Best effort at deleting associated data for this block.
		// Not an error if these fail.
		let _ = self.delete_block_sums(bh);
		let _ = self.delete_spent_index(bh);

		Ok(())
	}

	/// Save the block header.
	pub fn save_block_header(&self, header: &BlockHeader) -> Result<(), Error> {
		let hash = header.hash();
		self.db
			.put_ser(
				&to_key(BLOCK_HEADER_PREFIX, &mut hash.to_vec())[..],
				header,
			)
			.map_err(Into::into)
	}

	/// Get full block.
	pub fn get_block(&self, h: &Hash) -> Result<Block, Error> {
		option_to_not_found(
			self.db.get_ser(&to_key(BLOCK_PREFIX, &mut h.to_vec())),
			&format!("Block with hash: {}", h),
		)
		.map_err(Into::into)
	}

	/// Does the block exist?
	pub fn block_exists(&self, h: &Hash) -> Result<bool, Error> {
		self.db
			.exists(&to_key(BLOCK_PREFIX, &mut h.to_vec()))
			.map_err(Into::into)
	}

	/// Get block header.
	pub fn get_block_header(&self, h: &Hash) -> Result<BlockHeader, Error> {
		option_to_not_found(
			self.db
				.get_ser(&to_key(BLOCK_HEADER_PREFIX, &mut h.to_vec())),
			&format!("BLOCK HEADER: {}", h),
		)
		.map_err(Into::into)
	}

	/// Get previous header.
	pub fn get_previous_header(&self, header: &BlockHeader) -> Result<BlockHeader, Error> {
		self.get_block_header(&header.prev_hash)
	}

	/// Save the output position and creation height to the db.
	pub fn save_output_pos(&self, commit: &Commitment, pos: CommitPos) -> Result<(), Error> {
		self.db
			.put_ser(
				&to_key(COMMIT_POS_PREFIX, &mut commit.as_ref().to_vec())[..],
				&pos,
			)
			.map_err(Into::into)
	}

	/// Get the output position and creation height.
	pub fn get_output_pos(&self, commit: &Commitment) -> Result<CommitPos, Error> {
		option_to_not_found(
			self.db
				.get_ser(&to_key(COMMIT_POS_PREFIX, &mut commit.as_ref().to_vec())),
			&format!("Output position for: {:?}", commit),
		)
		.map_err(Into::into)
	}

	/// Delete the output position index entry for this commitment.
	pub fn delete_output_pos(&self, commit: &Commitment) -> Result<(), Error> {
		self.db
			.delete(&to_key(COMMIT_POS_PREFIX, &mut commit.as_ref().to_vec()))
			.map_err(Into::into)
	}

	/// Clear all entries from the output position index. Used when
	/// rebuilding the index after a fast sync.
	pub fn clear_output_pos(&self) -> Result<(), Error> {
		let key = vec![COMMIT_POS_PREFIX];
		let entries = self.db.iter::<CommitPos>(&key)?.collect::<Vec<_>>();
		for (key, _) in entries {
			self.db.delete(&key)?;
		}
		Ok(())
	}

	/// Save block sums for the block.
	pub fn save_block_sums(&self, h: &Hash, sums: BlockSums) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(BLOCK_SUMS_PREFIX, &mut h.to_vec())[..], &sums)
			.map_err(Into::into)
	}

	/// Get block sums.
	pub fn get_block_sums(&self, h: &Hash) -> Result<BlockSums, Error> {
		option_to_not_found(
			self.db.get_ser(&to_key(BLOCK_SUMS_PREFIX, &mut h.to_vec())),
			&format!("Block sums for block: {}", h),
		)
		.map_err(Into::into)
	}

	fn delete_block_sums(&self, h: &Hash) -> Result<(), Error> {
		self.db
			.delete(&to_key(BLOCK_SUMS_PREFIX, &mut h.to_vec()))
			.map_err(Into::into)
	}

	/// Save the spent index for the block: one entry per input, aligned
	/// with the block's (sorted) inputs, giving the position and creation
	/// height of the output each input spends.
	pub fn save_spent_index(&self, h: &Hash, spent: &[CommitPos]) -> Result<(), Error> {
		use crate::core::ser::{Writeable, Writer};
		let mut val = vec![];
		{
			let mut writer = crate::core::ser::BinWriter::new(&mut val);
			writer.write_u64(spent.len() as u64)?;
			for x in spent {
				x.write(&mut writer)?;
			}
		}
		self.db
			.put(&to_key(BLOCK_SPENT_PREFIX, &mut h.to_vec())[..], &val)
			.map_err(Into::into)
	}

	/// Get the spent index for the block.
	pub fn get_spent_index(&self, h: &Hash) -> Result<Vec<CommitPos>, Error> {
		use crate::core::ser::{Reader};
		let bytes = option_to_not_found(
			self.db.get(&to_key(BLOCK_SPENT_PREFIX, &mut h.to_vec())),
			&format!("spent index: {}", h),
		)?;
		let mut cursor = &bytes[..];
		let mut reader = crate::core::ser::BinReader::new(&mut cursor);
		let count = reader.read_u64()?;
		let spent = crate::core::ser::read_multi(&mut reader, count)?;
		Ok(spent)
	}

	fn delete_spent_index(&self, h: &Hash) -> Result<(), Error> {
		self.db
			.delete(&to_key(BLOCK_SPENT_PREFIX, &mut h.to_vec()))
			.map_err(Into::into)
	}

	/// Heights at which a kernel with this excess was accepted, ascending.
	/// Used to enforce the NRD relative height rule.
	pub fn get_nrd_kernel_heights(&self, excess: &Commitment) -> Result<Vec<u64>, Error> {
		let res: Option<Vec<u64>> = self
			.db
			.get(&to_key(NRD_KERNEL_PREFIX, &mut excess.as_ref().to_vec()))?
			.map(|bytes| {
				bytes
					.chunks(8)
					.filter(|x| x.len() == 8)
					.map(|x| {
						let mut buf = [0u8; 8];
						buf.copy_from_slice(x);
						u64::from_be_bytes(buf)
					})
					.collect()
			});
		Ok(res.unwrap_or_else(Vec::new))
	}

	/// Record the height at which a kernel with this excess was accepted.
	pub fn push_nrd_kernel_height(&self, excess: &Commitment, height: u64) -> Result<(), Error> {
		let mut heights = self.get_nrd_kernel_heights(excess)?;
		heights.push(height);
		heights.sort_unstable();
		let bytes: Vec<u8> = heights.iter().flat_map(|x| x.to_be_bytes().to_vec()).collect();
		self.db
			.put(&to_key(NRD_KERNEL_PREFIX, &mut excess.as_ref().to_vec())[..], &bytes)
			.map_err(Into::into)
	}

	/// Drop all recorded heights above the provided height for this excess
	/// (used on rewind).
	pub fn rewind_nrd_kernel_heights(&self, excess: &Commitment, height: u64) -> Result<(), Error> {
		let mut heights = self.get_nrd_kernel_heights(excess)?;
		heights.retain(|x| *x <= height);
		let key = to_key(NRD_KERNEL_PREFIX, &mut excess.as_ref().to_vec());
		if heights.is_empty() {
			self.db.delete(&key)?;
		} else {
			let bytes: Vec<u8> =
				heights.iter().flat_map(|x| x.to_be_bytes().to_vec()).collect();
			self.db.put(&key[..], &bytes)?;
		}
		Ok(())
	}

	/// An iterator to all blocks in the db, a pair of the key and the block
	/// itself.
	pub fn blocks_iter(&self) -> Result<SerIterator<Block>, Error> {
		let key = vec![BLOCK_PREFIX];
		self.db.iter(&key).map_err(Into::into)
	}

	/// Commits this batch. If it's a child batch, it will be merged with
	/// the parent, otherwise the batch is written to db.
	pub fn commit(self) -> Result<(), Error> {
		self.db.commit().map_err(Into::into)
	}

	/// Creates a child of this batch. It will be merged with its parent on
	/// commit, abandoned otherwise.
	pub fn child(&mut self) -> Result<Batch<'_>, Error> {
		Ok(Batch {
			db: self.db.child()?,
		})
	}
}

/// Build a db key from a prefix and a byte vector identifier.
pub fn to_key(prefix: u8, k: &mut Vec<u8>) -> Vec<u8> {
	let mut res = Vec::with_capacity(k.len() + 2);
	res.push(prefix);
	res.push(b'/');
	res.append(k);
	res
}

/// An iterator on blocks, from latest to earliest, specialized to return
/// information pertaining to block difficulty calculation (timestamp and
/// previous difficulties). Mostly used by the consensus next difficulty
/// calculation.
pub struct DifficultyIter<'a> {
	start: Hash,
	store: Option<Arc<ChainStore>>,
	batch: Option<&'a Batch<'a>>,

	// maintain state for both the "next" header in this iteration
	// and its previous header in the chain ("next next" in the iteration)
	// so we effectively read-ahead on each iteration
	header: Option<BlockHeader>,
	prev_header: Option<BlockHeader>,
}

impl<'a> DifficultyIter<'a> {
	/// Build a new iterator using the provided chain store and starting from
	/// the provided block hash.
	pub fn from<'b>(start: Hash, store: Arc<ChainStore>) -> DifficultyIter<'b> {
		DifficultyIter {
			start,
			store: Some(store),
			batch: None,
			header: None,
			prev_header: None,
		}
	}

	/// Build a new iterator using the provided chain store batch and
	/// starting from the provided block hash.
	pub fn from_batch(start: Hash, batch: &'a Batch<'a>) -> DifficultyIter<'a> {
		DifficultyIter {
			start,
			store: None,
			batch: Some(batch),
			header: None,
			prev_header: None,
		}
	}
}

impl<'a> Iterator for DifficultyIter<'a> {
	type Item = HeaderInfo;

	fn next(&mut self) -> Option<Self::Item> {
		// Get both header and previous_header if this is the initial iteration.
		// Otherwise move prev_header to header and get the next prev_header.
		self.header = if self.header.is_none() {
			if let Some(ref batch) = self.batch {
				batch.get_block_header(&self.start).ok()
			} else if let Some(ref store) = self.store {
				store.get_block_header(&self.start).ok()
			} else {
				None
			}
		} else {
			self.prev_header.clone()
		};

		// If we have a header we can do this iteration.
		// Otherwise we are done.
		if let Some(header) = self.header.clone() {
			if let Some(ref batch) = self.batch {
				self.prev_header = batch.get_previous_header(&header).ok();
			} else if let Some(ref store) = self.store {
				self.prev_header = store.get_previous_header(&header).ok();
			} else {
				self.prev_header = None;
			}

			let prev_difficulty = self
				.prev_header
				.clone()
				.map_or(Difficulty::zero(), |x| x.total_difficulty());
			let difficulty = header.total_difficulty() - prev_difficulty;
			let scaling = header.pow.secondary_scaling;

			Some(HeaderInfo::new(
				header.timestamp.timestamp() as u64,
				difficulty,
				scaling,
				header.pow.is_secondary(),
			))
		} else {
			None
		}
	}
}
