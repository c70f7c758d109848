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

//! Storage facilities: the typed, batchable key-value store backing the
//! block DB and the specialized append-only file structures backing the
//! MMRs (hash and data files, leaf bitmap, prune list).

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

use lepton_core as core;
use lepton_util as util;

#[macro_use]
extern crate log;
#[macro_use]
extern crate failure_derive;

pub mod bitmap_file;
pub mod lmdb;
pub mod pmmr;
pub mod prune_list;
pub mod types;

pub use crate::bitmap_file::BitmapFile;
pub use crate::lmdb::*;
pub use crate::prune_list::PruneList;

use croaring::Bitmap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read a Roaring bitmap from the given file path.
pub fn read_bitmap<P: AsRef<Path>>(file_path: P) -> io::Result<Bitmap> {
	let mut bitmap_file = File::open(file_path)?;
	let f_md = bitmap_file.metadata()?;
	let mut buffer = Vec::with_capacity(f_md.len() as usize);
	bitmap_file.read_to_end(&mut buffer)?;
	Ok(Bitmap::deserialize(&buffer))
}
