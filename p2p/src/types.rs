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

//! Types shared by the p2p layer: peer identity and state, configuration,
//! capabilities and the adapter traits bridging into the chain and pool.

use chrono::prelude::*;
use lepton_core::ser_multiwrite;
use std::convert::From;
use std::fmt;
use std::fs::File;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

use crate::core::core::hash::Hash;
use crate::core::core::{Block, BlockHeader, CompactBlock, Transaction};
use crate::core::pow::Difficulty;
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};
use crate::util::RwLock;

/// Maximum number of block headers a peer should ever send
pub const MAX_BLOCK_HEADERS: u32 = 512;

/// Maximum number of block bodies a peer should ever ask for and send
pub const MAX_BLOCK_BODIES: u32 = 16;

/// Maximum number of peer addresses a peer should ever send
pub const MAX_PEER_ADDRS: u32 = 256;

/// Maximum number of block header hashes to send as part of a locator
pub const MAX_LOCATORS: u32 = 20;

/// How long a banned peer should be banned for
const BAN_WINDOW: i64 = 10800;

/// The max peer count
const PEER_MAX_COUNT: u32 = 125;

/// min preferred peer count
const PEER_MIN_PREFERRED_COUNT: u32 = 8;

/// Possible errors in the p2p layer.
#[derive(Debug, Fail)]
pub enum Error {
	/// Serialization error.
	#[fail(display = "Serialization error: {}", _0)]
	Serialization(ser::Error),
	/// Connection error.
	#[fail(display = "Connection error: {:?}", _0)]
	Connection(io::ErrorKind),
	/// Header has a wrong magic number or is otherwise unrecognized.
	#[fail(display = "Bad message")]
	BadMessage,
	/// A message was larger than the per-type cap.
	#[fail(display = "Message too large")]
	MsgLen,
	/// Ban
	#[fail(display = "Peer banned")]
	Banned,
	/// Peer closed the connection.
	#[fail(display = "Connection closed")]
	ConnectionClose,
	/// Read or write timed out.
	#[fail(display = "Timeout")]
	Timeout,
	/// The underlying peer store failed.
	#[fail(display = "Peer store error: {}", _0)]
	Store(lepton_store::lmdb::Error),
	/// Chain-side failure while handling a message.
	#[fail(display = "Chain error")]
	Chain,
	/// We connected to ourselves (same handshake nonce).
	#[fail(display = "Connected to self")]
	PeerWithSelf,
	/// Protocol version mismatch.
	#[fail(display = "Protocol mismatch")]
	ProtocolMismatch {
		/// Our version
		us: u32,
		/// The peer's version
		peer: u32,
	},
	/// The peer is on a different chain (genesis mismatch).
	#[fail(display = "Genesis mismatch")]
	GenesisMismatch {
		/// Our genesis hash
		us: Hash,
		/// The peer's genesis hash
		peer: Hash,
	},
	/// Failed sending over the internal channel to the writer thread.
	#[fail(display = "Send error: {}", _0)]
	Send(String),
	/// The peer is not connected (anymore).
	#[fail(display = "Peer not connected")]
	PeerNotConnected,
	/// The peer is already known.
	#[fail(display = "Peer already connected")]
	PeerException,
	/// Internal error.
	#[fail(display = "Internal error: {}", _0)]
	Internal(String),
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::Serialization(e)
	}
}
impl From<lepton_store::lmdb::Error> for Error {
	fn from(e: lepton_store::lmdb::Error) -> Error {
		Error::Store(e)
	}
}
impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut {
			Error::Timeout
		} else if e.kind() == io::ErrorKind::UnexpectedEof {
			Error::ConnectionClose
		} else {
			Error::Connection(e.kind())
		}
	}
}

/// A peer's network address, with consistent serialization on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr(pub SocketAddr);

impl Writeable for PeerAddr {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		match self.0 {
			SocketAddr::V4(sav4) => {
				ser_multiwrite!(
					writer,
					[write_u8, 0],
					[write_fixed_bytes, &sav4.ip().octets().to_vec()],
					[write_u16, sav4.port()]
				);
			}
			SocketAddr::V6(sav6) => {
				writer.write_u8(1)?;
				for seg in &sav6.ip().segments() {
					writer.write_u16(*seg)?;
				}
				writer.write_u16(sav6.port())?;
			}
		}
		Ok(())
	}
}

impl Readable for PeerAddr {
	fn read(reader: &mut dyn Reader) -> Result<PeerAddr, ser::Error> {
		let v4_or_v6 = reader.read_u8()?;
		if v4_or_v6 == 0 {
			let ip = reader.read_fixed_bytes(4)?;
			let port = reader.read_u16()?;
			Ok(PeerAddr(SocketAddr::V4(SocketAddrV4::new(
				Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]),
				port,
			))))
		} else {
			let mut ip = [0u16; 8];
			for x in &mut ip {
				*x = reader.read_u16()?;
			}
			let port = reader.read_u16()?;
			Ok(PeerAddr(SocketAddr::V6(SocketAddrV6::new(
				ip.into(),
				port,
				0,
				0,
			))))
		}
	}
}

impl fmt::Display for PeerAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl PeerAddr {
	/// Convenient way of constructing a new peer_addr from an ip_addr
	/// defaults to port 3414 on mainnet.
	pub fn from_ip(addr: IpAddr) -> PeerAddr {
		PeerAddr(SocketAddr::new(addr, 3414))
	}

	/// If the ip is loopback then our key is "ip:port" (mainly for local
	/// usernet testing). Otherwise we only care about the ip (we disallow
	/// multiple peers on the same ip address).
	pub fn as_key(&self) -> String {
		if self.0.ip().is_loopback() {
			format!("{}:{}", self.0.ip(), self.0.port())
		} else {
			format!("{}", self.0.ip())
		}
	}
}

/// Configuration for the peer-to-peer server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2PConfig {
	/// IP address to bind to.
	pub host: IpAddr,
	/// Port to bind to.
	pub port: u16,

	/// Method used to get the list of seed nodes for initial bootstrap.
	#[serde(default)]
	pub seeds: Vec<String>,

	/// The list of seed nodes, if using Seeding as a seed type
	pub peers_allow: Option<Vec<String>>,

	/// The list of denied nodes
	pub peers_deny: Option<Vec<String>>,

	/// Maximum number of connected peers.
	pub peer_max_count: Option<u32>,

	/// Min number of connected peers to keep.
	pub peer_min_preferred_count: Option<u32>,

	/// How long a banned peer stays banned, in seconds.
	pub ban_window: Option<i64>,
}

impl Default for P2PConfig {
	fn default() -> P2PConfig {
		let ipaddr = "0.0.0.0".parse().unwrap();
		P2PConfig {
			host: ipaddr,
			port: 3414,
			seeds: vec![],
			peers_allow: None,
			peers_deny: None,
			peer_max_count: None,
			peer_min_preferred_count: None,
			ban_window: None,
		}
	}
}

impl P2PConfig {
	/// return ban window
	pub fn ban_window(&self) -> i64 {
		match self.ban_window {
			Some(n) => n,
			None => BAN_WINDOW,
		}
	}

	/// return maximum peer count
	pub fn peer_max_count(&self) -> u32 {
		match self.peer_max_count {
			Some(n) => n,
			None => PEER_MAX_COUNT,
		}
	}

	/// return minimum preferred peer count
	pub fn peer_min_preferred_count(&self) -> u32 {
		match self.peer_min_preferred_count {
			Some(n) => n,
			None => PEER_MIN_PREFERRED_COUNT,
		}
	}
}

bitflags! {
	/// Options for what type of interaction a peer supports
	#[derive(Serialize, Deserialize)]
	pub struct Capabilities: u32 {
		/// We don't know (yet) what the peer can do.
		const UNKNOWN = 0b0000_0000;
		/// Can provide full history of headers back to genesis.
		const HEADER_HIST = 0b0000_0001;
		/// Can provide recent txhashset archive for fast sync.
		const TXHASHSET_HIST = 0b0000_0010;
		/// Can provide a list of healthy peers
		const PEER_LIST = 0b0000_0100;
		/// Can broadcast and request txs by kernel hash.
		const TX_KERNEL_HASH = 0b0000_1000;

		/// All nodes right now are "full nodes".
		const FULL_NODE = Capabilities::HEADER_HIST.bits
			| Capabilities::TXHASHSET_HIST.bits
			| Capabilities::PEER_LIST.bits
			| Capabilities::TX_KERNEL_HASH.bits;
	}
}

/// Types of connection
enum_from_primitive! {
	#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
	pub enum Direction {
		/// Inbound connection.
		Inbound = 0,
		/// Outbound connection.
		Outbound = 1,
	}
}

/// Ban reason
enum_from_primitive! {
	#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
	pub enum ReasonForBan {
		/// No reason.
		None = 0,
		/// Sent us a bad block.
		BadBlock = 1,
		/// Sent us a bad compact block.
		BadCompactBlock = 2,
		/// Sent us a bad block header.
		BadBlockHeader = 3,
		/// Sent us a bad transaction.
		BadTx = 4,
		/// Manually banned by the node operator.
		ManualBan = 5,
		/// Too many fruitless block requests.
		FraudHeight = 6,
		/// Sent us a malformed or oversized message.
		BadHandshake = 7,
	}
}

impl Writeable for ReasonForBan {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(*self as u32)
	}
}

impl Readable for ReasonForBan {
	fn read(reader: &mut dyn Reader) -> Result<ReasonForBan, ser::Error> {
		use num::FromPrimitive;
		let b = reader.read_u32()?;
		ReasonForBan::from_u32(b).ok_or(ser::Error::CorruptedData)
	}
}

/// Whether the node should track and accept transactions for the relay.
#[derive(Clone)]
pub struct PeerLiveInfo {
	/// Total difficulty the peer has advertised.
	pub total_difficulty: Difficulty,
	/// Height the peer has advertised.
	pub height: u64,
	/// When we last heard from the peer.
	pub last_seen: DateTime<Utc>,
	/// First time we saw this peer.
	pub first_seen: DateTime<Utc>,
	/// Number of stuck detections.
	pub stuck_detector: DateTime<Utc>,
}

impl PeerLiveInfo {
	fn new(difficulty: Difficulty) -> PeerLiveInfo {
		PeerLiveInfo {
			total_difficulty: difficulty,
			height: 0,
			first_seen: Utc::now(),
			last_seen: Utc::now(),
			stuck_detector: Utc::now(),
		}
	}
}

/// General information about a connected peer that's useful to other modules.
#[derive(Clone)]
pub struct PeerInfo {
	/// Peer capabilities.
	pub capabilities: Capabilities,
	/// The peer's user agent string.
	pub user_agent: String,
	/// Protocol version negotiated on the handshake.
	pub version: u32,
	/// The peer's network address.
	pub addr: PeerAddr,
	/// Inbound or outbound.
	pub direction: Direction,
	/// Tracking of the live changing parts (height, difficulty, last seen).
	pub live_info: Arc<RwLock<PeerLiveInfo>>,
}

impl PeerInfo {
	/// Build a new PeerInfo.
	pub fn new(
		capabilities: Capabilities,
		user_agent: String,
		version: u32,
		addr: PeerAddr,
		direction: Direction,
		total_difficulty: Difficulty,
	) -> PeerInfo {
		PeerInfo {
			capabilities,
			user_agent,
			version,
			addr,
			direction,
			live_info: Arc::new(RwLock::new(PeerLiveInfo::new(total_difficulty))),
		}
	}

	/// The current total_difficulty of the peer.
	pub fn total_difficulty(&self) -> Difficulty {
		self.live_info.read().total_difficulty
	}

	/// The current height of the peer.
	pub fn height(&self) -> u64 {
		self.live_info.read().height
	}

	/// Time of last_seen for this peer (via ping/pong).
	pub fn last_seen(&self) -> DateTime<Utc> {
		self.live_info.read().last_seen
	}

	/// Update the total_difficulty and height of the peer, notified via
	/// ping/pong.
	pub fn update(&self, height: u64, total_difficulty: Difficulty) {
		let mut live_info = self.live_info.write();
		if total_difficulty != live_info.total_difficulty {
			live_info.stuck_detector = Utc::now();
		}
		live_info.height = height;
		live_info.total_difficulty = total_difficulty;
		live_info.last_seen = Utc::now()
	}
}

/// The full txhashset data along with indexes required for a consumer to
/// rewind to a consistent requested state.
pub struct TxHashSetRead {
	/// Output tree size for a given block height
	pub output_index: u64,
	/// Kernel tree size for a given block height
	pub kernel_index: u64,
	/// The file compressing the txhashset state
	pub reader: File,
}

/// Bridge between the networking layer and the chain of blocks. Dispatches
/// incoming blocks, transactions and headers to the right components.
pub trait ChainAdapter: Sync + Send {
	/// Current total difficulty on our chain
	fn total_difficulty(&self) -> Result<Difficulty, Error>;

	/// Current total height
	fn total_height(&self) -> Result<u64, Error>;

	/// A valid transaction has been received from one of our peers
	fn transaction_received(&self, tx: Transaction, stem: bool) -> Result<bool, Error>;

	/// A tx kernel hash was broadcast to us, do we want the corresponding tx?
	fn tx_kernel_received(&self, kernel_hash: Hash, peer_info: &PeerInfo)
		-> Result<bool, Error>;

	/// Retrieve a tx by its kernel hash if we have it in our pool.
	fn get_transaction(&self, kernel_hash: Hash) -> Option<Transaction>;

	/// A block has been received from one of our peers. Returns true if the
	/// block could be handled properly and is not deemed defective by the
	/// chain. Returning false means the block will never be valid and may
	/// result in the peer being banned.
	fn block_received(&self, b: Block, peer_info: &PeerInfo, was_requested: bool)
		-> Result<bool, Error>;

	/// A compact block has been received.
	fn compact_block_received(&self, cb: CompactBlock, peer_info: &PeerInfo)
		-> Result<bool, Error>;

	/// A block header has been received.
	fn header_received(&self, bh: BlockHeader, peer_info: &PeerInfo) -> Result<bool, Error>;

	/// A set of block header has been received, typically in response to a
	/// block header request.
	fn headers_received(
		&self,
		bh: &[BlockHeader],
		peer_info: &PeerInfo,
	) -> Result<bool, Error>;

	/// Finds a list of block headers based on the provided locator. Tries to
	/// identify the common chain and gets the headers that follow it
	/// immediately.
	fn locate_headers(&self, locator: &[Hash]) -> Result<Vec<BlockHeader>, Error>;

	/// Gets a full block by its hash.
	fn get_block(&self, h: Hash) -> Option<Block>;

	/// Provides a reading view into the current txhashset state as well as
	/// the required indexes for a consumer to rewind to a consistent state
	/// at the provided block hash.
	fn txhashset_read(&self, h: Hash) -> Option<TxHashSetRead>;

	/// Whether we're ready to accept a new txhashset via fast sync.
	fn txhashset_receive_ready(&self) -> bool;

	/// Writes a reading view on a txhashset state that's been provided to us.
	/// If we're willing to accept that new state, the data stream will be
	/// read as a zip file, unzipped and the resulting state files should be
	/// rewound to the provided indexes.
	fn txhashset_write(&self, h: Hash, txhashset_data: File, peer_info: &PeerInfo)
		-> Result<bool, Error>;

	/// Update the total percentage progress of the txhashset download.
	fn txhashset_download_update(
		&self,
		start_time: DateTime<Utc>,
		downloaded_size: u64,
		total_size: u64,
	) -> bool;
}

/// Additional methods required by the protocol that don't need to be
/// externally implemented.
pub trait NetAdapter: ChainAdapter {
	/// Find good peers we know with the provided capability and return their
	/// addresses.
	fn find_peer_addrs(&self, capab: Capabilities) -> Vec<PeerAddr>;

	/// A list of peers has been received from one of our peers.
	fn peer_addrs_received(&self, addrs: Vec<PeerAddr>);

	/// Heard total_difficulty from a connected peer (via ping/pong).
	fn peer_difficulty(&self, addr: PeerAddr, diff: Difficulty, height: u64);

	/// Is this peer currently banned?
	fn is_banned(&self, addr: PeerAddr) -> bool;
}
