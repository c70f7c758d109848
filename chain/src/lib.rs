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

//! The block chain itself, validates and accepts new blocks, handles reorgs.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

use lepton_core as core;
use lepton_keychain as keychain;
use lepton_util as util;

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate failure_derive;

mod chain;
mod error;
pub mod pipe;
pub mod store;
pub mod txhashset;
pub mod types;

pub use crate::chain::{Chain, OrphanBlockPool, MAX_ORPHAN_SIZE};
pub use crate::error::{Error, ErrorKind};
pub use crate::store::{BlockIndex, ChainStore, DifficultyIter};
pub use crate::types::{
	BlockStatus, ChainAdapter, CommitPos, NoStatus, NoopAdapter, Options, SyncState, SyncStatus,
	Tip, TxHashSetRoots, TxHashsetWriteStatus,
};
