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

//! The Hand/Shake exchange: version and capability negotiation, genesis
//! check, self-connection detection.

use rand::{thread_rng, Rng};
use std::collections::VecDeque;
use std::net::TcpStream;

use crate::core::core::hash::Hash;
use crate::core::pow::Difficulty;
use crate::msg::{read_message, write_message, Hand, Shake, Type, PROTOCOL_VERSION, USER_AGENT};
use crate::types::{Capabilities, Direction, Error, PeerAddr, PeerInfo};
use crate::util::RwLock;

const NONCES_CAP: usize = 100;

/// Handshake protocol, initiating or accepting connections while detecting
/// connections to self by keeping track of the nonces we sent out recently.
pub struct Handshake {
	/// Ring buffer of nonces sent on outbound handshakes.
	nonces: RwLock<VecDeque<u64>>,
	/// The genesis block header hash of the chain we are on.
	genesis: Hash,
}

impl Handshake {
	/// Creates a new handshake handler.
	pub fn new(genesis: Hash) -> Handshake {
		Handshake {
			nonces: RwLock::new(VecDeque::with_capacity(NONCES_CAP)),
			genesis,
		}
	}

	/// Initiate a handshake on an outbound connection: send our Hand, wait
	/// for the peer's Shake.
	pub fn initiate(
		&self,
		capabilities: Capabilities,
		total_difficulty: Difficulty,
		self_addr: PeerAddr,
		conn: &mut TcpStream,
	) -> Result<PeerInfo, Error> {
		// prepare the first part of the handshake
		let nonce = self.next_nonce();
		let peer_addr = match conn.peer_addr() {
			Ok(pa) => PeerAddr(pa),
			Err(e) => return Err(Error::Connection(e.kind())),
		};

		let hand = Hand {
			version: PROTOCOL_VERSION,
			capabilities,
			nonce,
			genesis: self.genesis,
			total_difficulty,
			sender_addr: self_addr,
			receiver_addr: peer_addr,
			user_agent: USER_AGENT.to_string(),
		};

		// write and read the handshake response
		write_message(conn, &hand, Type::Hand)?;

		let shake: Shake = read_message(conn, Type::Shake)?;
		if shake.genesis != self.genesis {
			return Err(Error::GenesisMismatch {
				us: self.genesis,
				peer: shake.genesis,
			});
		}
		if shake.version != PROTOCOL_VERSION {
			return Err(Error::ProtocolMismatch {
				us: PROTOCOL_VERSION,
				peer: shake.version,
			});
		}

		let peer_info = PeerInfo::new(
			shake.capabilities,
			shake.user_agent,
			shake.version,
			peer_addr,
			Direction::Outbound,
			shake.total_difficulty,
		);

		debug!(
			"Connected! Cumulative {} offered from {:?} {:?} {:?}",
			peer_info.total_difficulty().to_num(),
			peer_info.addr,
			peer_info.user_agent,
			peer_info.capabilities
		);

		Ok(peer_info)
	}

	/// Accept a handshake on an inbound connection: wait for the peer's
	/// Hand, respond with our Shake.
	pub fn accept(
		&self,
		capabilities: Capabilities,
		total_difficulty: Difficulty,
		conn: &mut TcpStream,
	) -> Result<PeerInfo, Error> {
		let hand: Hand = read_message(conn, Type::Hand)?;

		// all the reasons we could refuse this connection for
		if hand.version != PROTOCOL_VERSION {
			return Err(Error::ProtocolMismatch {
				us: PROTOCOL_VERSION,
				peer: hand.version,
			});
		}
		if hand.genesis != self.genesis {
			return Err(Error::GenesisMismatch {
				us: self.genesis,
				peer: hand.genesis,
			});
		}
		// check the nonce to see if we are trying to connect to ourselves
		{
			let nonces = self.nonces.read();
			if nonces.contains(&hand.nonce) {
				return Err(Error::PeerWithSelf);
			}
		}

		// The sender tells us their listening address; their ephemeral port
		// on this connection is useless for connecting back.
		let peer_addr = hand.sender_addr;

		let peer_info = PeerInfo::new(
			hand.capabilities,
			hand.user_agent,
			hand.version,
			peer_addr,
			Direction::Inbound,
			hand.total_difficulty,
		);

		// send our reply with our info
		let shake = Shake {
			version: PROTOCOL_VERSION,
			capabilities,
			genesis: self.genesis,
			total_difficulty,
			user_agent: USER_AGENT.to_string(),
		};

		write_message(conn, &shake, Type::Shake)?;
		trace!("Success handshake with {}.", peer_info.addr);

		Ok(peer_info)
	}

	/// Generate a new random nonce and store it in our ring buffer
	fn next_nonce(&self) -> u64 {
		let nonce = thread_rng().gen();

		let mut nonces = self.nonces.write();
		nonces.push_back(nonce);
		if nonces.len() >= NONCES_CAP {
			nonces.pop_front();
		}
		nonce
	}
}
