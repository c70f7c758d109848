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

//! Wire serialization of the p2p messages.

use lepton_core as core;
use lepton_p2p as p2p;

use crate::core::core::hash::Hash;
use crate::core::pow::Difficulty;
use crate::p2p::msg::{
	read_message, write_message, Hand, Headers, Locator, Ping, Shake, Type, PROTOCOL_VERSION,
	USER_AGENT,
};
use crate::p2p::types::{Capabilities, PeerAddr};
use std::io::Cursor;
use std::net::SocketAddr;

fn peer_addr(port: u16) -> PeerAddr {
	PeerAddr(SocketAddr::new("127.0.0.1".parse().unwrap(), port))
}

#[test]
fn hand_round_trip() {
	let hand = Hand {
		version: PROTOCOL_VERSION,
		capabilities: Capabilities::FULL_NODE,
		nonce: 42,
		genesis: Hash::from_vec(&[7u8; 32]),
		total_difficulty: Difficulty::from_num(1000),
		sender_addr: peer_addr(3414),
		receiver_addr: peer_addr(3415),
		user_agent: USER_AGENT.to_string(),
	};

	let mut buf = Cursor::new(vec![]);
	write_message(&mut buf, &hand, Type::Hand).unwrap();

	buf.set_position(0);
	let hand2: Hand = read_message(&mut buf, Type::Hand).unwrap();

	assert_eq!(hand2.version, PROTOCOL_VERSION);
	assert_eq!(hand2.capabilities, Capabilities::FULL_NODE);
	assert_eq!(hand2.nonce, 42);
	assert_eq!(hand2.genesis, Hash::from_vec(&[7u8; 32]));
	assert_eq!(hand2.total_difficulty, Difficulty::from_num(1000));
	assert_eq!(hand2.sender_addr, peer_addr(3414));
	assert_eq!(hand2.receiver_addr, peer_addr(3415));
	assert_eq!(hand2.user_agent, USER_AGENT);
}

#[test]
fn shake_round_trip() {
	let shake = Shake {
		version: PROTOCOL_VERSION,
		capabilities: Capabilities::FULL_NODE,
		genesis: Hash::from_vec(&[9u8; 32]),
		total_difficulty: Difficulty::from_num(9000),
		user_agent: USER_AGENT.to_string(),
	};

	let mut buf = Cursor::new(vec![]);
	write_message(&mut buf, &shake, Type::Shake).unwrap();

	buf.set_position(0);
	let shake2: Shake = read_message(&mut buf, Type::Shake).unwrap();
	assert_eq!(shake2.genesis, Hash::from_vec(&[9u8; 32]));
	assert_eq!(shake2.total_difficulty, Difficulty::from_num(9000));
}

#[test]
fn wrong_type_rejected() {
	let ping = Ping {
		total_difficulty: Difficulty::min(),
		height: 0,
	};
	let mut buf = Cursor::new(vec![]);
	write_message(&mut buf, &ping, Type::Ping).unwrap();

	buf.set_position(0);
	assert!(read_message::<Ping>(&mut buf, Type::Pong).is_err());
}

#[test]
fn bad_magic_rejected() {
	let ping = Ping {
		total_difficulty: Difficulty::min(),
		height: 0,
	};
	let mut buf = Cursor::new(vec![]);
	write_message(&mut buf, &ping, Type::Ping).unwrap();

	// corrupt the magic bytes
	let mut bytes = buf.into_inner();
	bytes[0] = 0xff;
	let mut buf = Cursor::new(bytes);
	assert!(read_message::<Ping>(&mut buf, Type::Ping).is_err());
}

#[test]
fn oversize_message_rejected() {
	// hand-craft a header declaring a body far beyond the Ping cap
	use crate::core::ser;
	let mut bytes = vec![];
	{
		let header = p2p::msg::MsgHeader::new(Type::Ping, 1_000_000);
		ser::serialize(&mut bytes, &header).unwrap();
	}
	bytes.extend_from_slice(&[0u8; 64]);
	let mut buf = Cursor::new(bytes);
	assert!(read_message::<Ping>(&mut buf, Type::Ping).is_err());
}

#[test]
fn locator_and_headers_limits() {
	// an over-large locator fails to deserialize
	let hashes: Vec<Hash> = (0..=p2p::MAX_LOCATORS as u8)
		.map(|x| Hash::from_vec(&[x; 32]))
		.collect();
	let loc = Locator { hashes };
	let mut vec = vec![];
	core::ser::serialize(&mut vec, &loc).unwrap();
	assert!(core::ser::deserialize::<Locator>(&mut &vec[..]).is_err());

	// an empty headers batch round trips
	let headers = Headers { headers: vec![] };
	let mut vec = vec![];
	core::ser::serialize(&mut vec, &headers).unwrap();
	let headers2: Headers = core::ser::deserialize(&mut &vec[..]).unwrap();
	assert!(headers2.headers.is_empty());
}
