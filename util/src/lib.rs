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

//! Logging, re-exports of locking primitives and a handful of helpers
//! shared by every other crate in the workspace.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

// Re-export so only has to be included once
pub use parking_lot::{Mutex, RwLock};

// Re-export the secp256k1-zkp bindings under a single name.
pub use secp256k1zkp as secp;

// Logging related
pub mod logger;
pub use crate::logger::{init_logger, init_test_logger};

pub mod types;
pub use crate::types::LoggingConfig;

mod hex;
pub use crate::hex::*;

pub mod file;
pub mod zip;

mod secp_static;
pub use crate::secp_static::static_secp_instance;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Encapsulation of a value initialized exactly once, after construction.
/// Used for the p2p peer reference held by adapters that are built before
/// the p2p server itself exists.
pub struct OneTime<T> {
	inner: RwLock<Option<T>>,
}

impl<T> OneTime<T>
where
	T: Clone,
{
	/// Builds a new uninitialized OneTime.
	pub fn new() -> OneTime<T> {
		OneTime {
			inner: RwLock::new(None),
		}
	}

	/// Initializes the OneTime, should only be called once after construction.
	/// Will panic (via assert) if called more than once.
	pub fn init(&self, value: T) {
		let mut inner = self.inner.write();
		assert!(inner.is_none());
		*inner = Some(value);
	}

	/// Whether the OneTime has been initialized.
	pub fn is_init(&self) -> bool {
		self.inner.read().is_some()
	}

	/// Borrows the OneTime, should only be called after initialization.
	/// Will panic if called before initialization.
	pub fn borrow(&self) -> T {
		let inner = self.inner.read();
		inner
			.clone()
			.expect("Cannot borrow one_time before initialization.")
	}
}

/// Simple shared flag that long running loops check between steps so they
/// can unwind cleanly on shutdown.
#[derive(Clone)]
pub struct StopState {
	stopped: Arc<AtomicBool>,
}

impl StopState {
	/// New running state.
	pub fn new() -> StopState {
		StopState {
			stopped: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Have we been asked to stop?
	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::Relaxed)
	}

	/// Ask all loops watching this state to stop.
	pub fn stop(&self) {
		self.stopped.store(true, Ordering::Relaxed)
	}
}

/// Construct msg of rlimit if needed, used at startup on unix systems to
/// complain loudly when the open-file limit is too small for the MMR files.
pub fn log_fd_limit() {
	#[cfg(any(target_os = "linux", target_os = "macos"))]
	{
		if let Some(limit) = fd_limit() {
			if limit < 1024 {
				warn!(
					"open file limit is low ({}), consider raising it with ulimit -n",
					limit
				);
			}
		}
	}
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn fd_limit() -> Option<u64> {
	use std::fs;
	// best effort, /proc only exists on linux
	fs::read_to_string("/proc/self/limits").ok().and_then(|s| {
		s.lines()
			.find(|l| l.starts_with("Max open files"))
			.and_then(|l| l.split_whitespace().nth(3))
			.and_then(|v| v.parse().ok())
	})
}
