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

//! A few serialization helper macros.

/// Allows the writing of multiple fields to a writer in one expression,
/// propagating the first error encountered.
#[macro_export]
macro_rules! ser_multiwrite {
	($wrtr:ident, $([ $write_call:ident, $val:expr ]),* ) => {
		$( $wrtr.$write_call($val)? );*
	}
}

/// Allows the reading of multiple fields from a reader in one expression,
/// binding them as a tuple.
#[macro_export]
macro_rules! ser_multiread {
	($rdr:ident, $($read_call:ident),*) => {
		( $($rdr.$read_call()?),* )
	}
}

/// Implements Ord, PartialOrd, PartialEq and Eq on a type based on its hash,
/// which is also the canonical ordering of inputs, outputs and kernels
/// within transaction bodies.
#[macro_export]
macro_rules! hashable_ord {
	($hashable:ident) => {
		impl Ord for $hashable {
			fn cmp(&self, other: &$hashable) -> ::std::cmp::Ordering {
				self.hash().cmp(&other.hash())
			}
		}
		impl PartialOrd for $hashable {
			fn partial_cmp(&self, other: &$hashable) -> Option<::std::cmp::Ordering> {
				Some(self.hash().cmp(&other.hash()))
			}
		}
		impl PartialEq for $hashable {
			fn eq(&self, other: &$hashable) -> bool {
				self.hash() == other.hash()
			}
		}
		impl Eq for $hashable {}
	};
}
