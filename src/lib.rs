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

//! The lepton node: configuration and the server wiring the chain, pool
//! and p2p subsystems together.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

use lepton_chain as chain;
use lepton_core as core;
use lepton_p2p as p2p;
use lepton_pool as pool;
use lepton_util as util;

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;

pub mod config;
pub mod node;
