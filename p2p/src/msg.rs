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

//! Message types that transit over the network and related serialization code.

use lepton_core::{ser_multiread, ser_multiwrite};
use num::FromPrimitive;
use std::io::{Read, Write};

use crate::core::core::hash::Hash;
use crate::core::core::BlockHeader;
use crate::core::pow::Difficulty;
use crate::core::ser::{
	self, read_multi, FixedLength, Readable, Reader, StreamingReader, Writeable, Writer,
};
use crate::types::{
	Capabilities, Error, PeerAddr, ReasonForBan, MAX_BLOCK_HEADERS, MAX_LOCATORS, MAX_PEER_ADDRS,
};

/// Current latest version of the protocol
pub const PROTOCOL_VERSION: u32 = 1;

/// Lepton's user agent with current version
pub const USER_AGENT: &str = concat!("MW/Lepton ", env!("CARGO_PKG_VERSION"));

/// Magic numbers expected in the header of every message
const MAGIC: [u8; 2] = [0x4c, 0x6e];

/// Size in bytes of a message header: 2 magic bytes, 1 type byte and the
/// 8 byte big-endian payload length.
pub const HEADER_LEN: u64 = 11;

/// Max theoretical size of a block filled with outputs.
const MAX_BLOCK_SIZE: u64 =
	(crate::core::consensus::MAX_BLOCK_WEIGHT / crate::core::consensus::BLOCK_OUTPUT_WEIGHT
		* 708) as u64;

/// Types of messages.
/// Note: Values here are *important* so we should only add new values at the
/// end.
enum_from_primitive! {
	#[derive(Debug, Clone, Copy, PartialEq)]
	pub enum Type {
		Error = 0,
		Hand = 1,
		Shake = 2,
		Ping = 3,
		Pong = 4,
		GetPeerAddrs = 5,
		PeerAddrs = 6,
		GetHeaders = 7,
		Header = 8,
		Headers = 9,
		GetBlock = 10,
		Block = 11,
		GetCompactBlock = 12,
		CompactBlock = 13,
		StemTransaction = 14,
		Transaction = 15,
		TxHashSetRequest = 16,
		TxHashSetArchive = 17,
		BanReason = 18,
		GetTransaction = 19,
		TransactionKernel = 20,
	}
}

/// Max message size known for each message type. Every received message
/// whose length exceeds its type's cap is rejected, and the peer banned.
fn max_msg_size(msg_type: Type) -> u64 {
	match msg_type {
		Type::Error => 0,
		Type::Hand => 128,
		Type::Shake => 88,
		Type::Ping => 16,
		Type::Pong => 16,
		Type::GetPeerAddrs => 4,
		Type::PeerAddrs => 4 + (1 + 16 + 2) * MAX_PEER_ADDRS as u64,
		Type::GetHeaders => 1 + 32 * MAX_LOCATORS as u64,
		Type::Header => 512,
		Type::Headers => 2 + 512 * MAX_BLOCK_HEADERS as u64,
		Type::GetBlock => 32,
		Type::Block => MAX_BLOCK_SIZE,
		Type::GetCompactBlock => 32,
		Type::CompactBlock => MAX_BLOCK_SIZE / 10,
		Type::StemTransaction => MAX_BLOCK_SIZE,
		Type::Transaction => MAX_BLOCK_SIZE,
		Type::TxHashSetRequest => 40,
		Type::TxHashSetArchive => 64,
		Type::BanReason => 64,
		Type::GetTransaction => 32,
		Type::TransactionKernel => 32,
	}
}

/// The header of any protocol message, used to identify incoming messages.
pub struct MsgHeader {
	magic: [u8; 2],
	/// Type of the message.
	pub msg_type: Type,
	/// Total length of the message in bytes.
	pub msg_len: u64,
}

impl MsgHeader {
	/// Creates a new message header.
	pub fn new(msg_type: Type, len: u64) -> MsgHeader {
		MsgHeader {
			magic: MAGIC,
			msg_type,
			msg_len: len,
		}
	}
}

impl FixedLength for MsgHeader {
	const LEN: usize = 2 + 1 + 8;
}

impl Writeable for MsgHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		ser_multiwrite!(
			writer,
			[write_u8, self.magic[0]],
			[write_u8, self.magic[1]],
			[write_u8, self.msg_type as u8],
			[write_u64, self.msg_len]
		);
		Ok(())
	}
}

impl Readable for MsgHeader {
	fn read(reader: &mut dyn Reader) -> Result<MsgHeader, ser::Error> {
		reader.expect_u8(MAGIC[0])?;
		reader.expect_u8(MAGIC[1])?;
		let (t, len) = ser_multiread!(reader, read_u8, read_u64);
		match Type::from_u8(t) {
			Some(ty) => Ok(MsgHeader {
				magic: MAGIC,
				msg_type: ty,
				msg_len: len,
			}),
			None => Err(ser::Error::CorruptedData),
		}
	}
}

/// Read a header from the provided stream without blocking forever if the
/// peer sends nothing; validates the per-type length cap.
pub fn read_header(stream: &mut dyn Read) -> Result<MsgHeader, Error> {
	let mut head = vec![0u8; MsgHeader::LEN];
	stream.read_exact(&mut head)?;
	let header: MsgHeader = ser::deserialize(&mut &head[..]).map_err(|_| Error::BadMessage)?;
	let max_len = max_msg_size(header.msg_type);
	// Attachments (txhashset archive bytes) are streamed separately from the
	// message body, so the cap applies to every type.
	if header.msg_len > max_len {
		error!(
			"Too large read {:?}, had {}, wanted {}.",
			header.msg_type, max_len, header.msg_len
		);
		return Err(Error::MsgLen);
	}
	Ok(header)
}

/// Read a message body from the provided stream, deserializing it to the
/// provided type.
pub fn read_body<T: Readable>(h: &MsgHeader, stream: &mut dyn Read) -> Result<T, Error> {
	let mut body = vec![0u8; h.msg_len as usize];
	stream.read_exact(&mut body)?;
	ser::deserialize(&mut &body[..]).map_err(From::from)
}

/// Read (an expected) message from the provided stream.
pub fn read_message<T: Readable>(stream: &mut dyn Read, msg_type: Type) -> Result<T, Error> {
	let header = read_header(stream)?;
	if header.msg_type != msg_type {
		return Err(Error::BadMessage);
	}
	read_body(&header, stream)
}

/// Serialize a message with its header into a write stream.
pub fn write_message<T: Writeable>(
	stream: &mut dyn Write,
	msg: &T,
	msg_type: Type,
) -> Result<(), Error> {
	let mut body = vec![];
	ser::serialize(&mut body, msg)?;
	let mut msg_bytes = vec![];
	let header = MsgHeader::new(msg_type, body.len() as u64);
	ser::serialize(&mut msg_bytes, &header)?;
	msg_bytes.append(&mut body);
	stream.write_all(&msg_bytes[..])?;
	Ok(())
}

/// First part of a handshake, sender advertises its version and
/// characteristics.
pub struct Hand {
	/// protocol version of the sender
	pub version: u32,
	/// capabilities of the sender
	pub capabilities: Capabilities,
	/// randomly generated for each handshake, helps detect self
	pub nonce: u64,
	/// genesis block of our chain, only connect to peers on the same chain
	pub genesis: Hash,
	/// total difficulty accumulated by the sender, used to check whether sync
	/// may be needed
	pub total_difficulty: Difficulty,
	/// network address of the sender
	pub sender_addr: PeerAddr,
	/// network address of the receiver
	pub receiver_addr: PeerAddr,
	/// name of version of the software
	pub user_agent: String,
}

impl Writeable for Hand {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		ser_multiwrite!(
			writer,
			[write_u32, self.version],
			[write_u32, self.capabilities.bits()],
			[write_u64, self.nonce]
		);
		self.total_difficulty.write(writer)?;
		self.sender_addr.write(writer)?;
		self.receiver_addr.write(writer)?;
		writer.write_bytes(&self.user_agent)?;
		self.genesis.write(writer)?;
		Ok(())
	}
}

impl Readable for Hand {
	fn read(reader: &mut dyn Reader) -> Result<Hand, ser::Error> {
		let (version, capab, nonce) = ser_multiread!(reader, read_u32, read_u32, read_u64);
		let capabilities = Capabilities::from_bits_truncate(capab);
		let total_difficulty = Difficulty::read(reader)?;
		let sender_addr = PeerAddr::read(reader)?;
		let receiver_addr = PeerAddr::read(reader)?;
		let ua = reader.read_bytes_len_prefix()?;
		let user_agent = String::from_utf8(ua).map_err(|_| ser::Error::CorruptedData)?;
		let genesis = Hash::read(reader)?;
		Ok(Hand {
			version,
			capabilities,
			nonce,
			genesis,
			total_difficulty,
			sender_addr,
			receiver_addr,
			user_agent,
		})
	}
}

/// Second part of a handshake, receiver of the first part replies with its own
/// version and characteristics.
pub struct Shake {
	/// sender version
	pub version: u32,
	/// sender capabilities
	pub capabilities: Capabilities,
	/// genesis block of our chain, only connect to peers on the same chain
	pub genesis: Hash,
	/// total difficulty accumulated by the sender, used to check whether sync
	/// may be needed
	pub total_difficulty: Difficulty,
	/// name of version of the software
	pub user_agent: String,
}

impl Writeable for Shake {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		ser_multiwrite!(
			writer,
			[write_u32, self.version],
			[write_u32, self.capabilities.bits()]
		);
		self.total_difficulty.write(writer)?;
		writer.write_bytes(&self.user_agent)?;
		self.genesis.write(writer)?;
		Ok(())
	}
}

impl Readable for Shake {
	fn read(reader: &mut dyn Reader) -> Result<Shake, ser::Error> {
		let (version, capab) = ser_multiread!(reader, read_u32, read_u32);
		let capabilities = Capabilities::from_bits_truncate(capab);
		let total_difficulty = Difficulty::read(reader)?;
		let ua = reader.read_bytes_len_prefix()?;
		let user_agent = String::from_utf8(ua).map_err(|_| ser::Error::CorruptedData)?;
		let genesis = Hash::read(reader)?;
		Ok(Shake {
			version,
			capabilities,
			genesis,
			total_difficulty,
			user_agent,
		})
	}
}

/// Ask for other peers addresses, required for network discovery.
pub struct GetPeerAddrs {
	/// Filters on the capabilities we'd like the peers to have
	pub capabilities: Capabilities,
}

impl Writeable for GetPeerAddrs {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.capabilities.bits())
	}
}

impl Readable for GetPeerAddrs {
	fn read(reader: &mut dyn Reader) -> Result<GetPeerAddrs, ser::Error> {
		let capab = reader.read_u32()?;
		let capabilities = Capabilities::from_bits_truncate(capab);
		Ok(GetPeerAddrs { capabilities })
	}
}

/// Peer addresses we know of that are fresh enough, in response to
/// GetPeerAddrs.
#[derive(Debug)]
pub struct PeerAddrs {
	/// Peers addresses, put a limit on number of peers
	pub peers: Vec<PeerAddr>,
}

impl Writeable for PeerAddrs {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.peers.len() as u32)?;
		for p in &self.peers {
			p.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for PeerAddrs {
	fn read(reader: &mut dyn Reader) -> Result<PeerAddrs, ser::Error> {
		let peer_count = reader.read_u32()?;
		if peer_count > MAX_PEER_ADDRS {
			return Err(ser::Error::TooLargeReadErr);
		} else if peer_count == 0 {
			return Ok(PeerAddrs { peers: vec![] });
		}
		let mut peers = Vec::with_capacity(peer_count as usize);
		for _ in 0..peer_count {
			peers.push(PeerAddr::read(reader)?);
		}
		Ok(PeerAddrs { peers })
	}
}

/// A ping to keep the connection alive, with our total difficulty and
/// height so the peer can detect we have diverged.
pub struct Ping {
	/// total difficulty accumulated by the sender, used to check whether sync
	/// may be needed
	pub total_difficulty: Difficulty,
	/// total height
	pub height: u64,
}

impl Writeable for Ping {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.total_difficulty.write(writer)?;
		self.height.write(writer)?;
		Ok(())
	}
}

impl Readable for Ping {
	fn read(reader: &mut dyn Reader) -> Result<Ping, ser::Error> {
		let total_difficulty = Difficulty::read(reader)?;
		let height = reader.read_u64()?;
		Ok(Ping {
			total_difficulty,
			height,
		})
	}
}

/// The pong, in response to a ping.
pub struct Pong {
	/// total difficulty accumulated by the sender, used to check whether sync
	/// may be needed
	pub total_difficulty: Difficulty,
	/// height accumulated by sender
	pub height: u64,
}

impl Writeable for Pong {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.total_difficulty.write(writer)?;
		self.height.write(writer)?;
		Ok(())
	}
}

impl Readable for Pong {
	fn read(reader: &mut dyn Reader) -> Result<Pong, ser::Error> {
		let total_difficulty = Difficulty::read(reader)?;
		let height = reader.read_u64()?;
		Ok(Pong {
			total_difficulty,
			height,
		})
	}
}

/// Request to get a list of headers. A locator is used to identify what
/// blocks the sender knows about so the receiver can find a common chain.
#[derive(Debug)]
pub struct Locator {
	/// Hashes of the blocks we know about, most recent first.
	pub hashes: Vec<Hash>,
}

impl Writeable for Locator {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(self.hashes.len() as u8)?;
		for h in &self.hashes {
			h.write(writer)?
		}
		Ok(())
	}
}

impl Readable for Locator {
	fn read(reader: &mut dyn Reader) -> Result<Locator, ser::Error> {
		let len = reader.read_u8()?;
		if u32::from(len) > MAX_LOCATORS {
			return Err(ser::Error::TooLargeReadErr);
		}
		let mut hashes = Vec::with_capacity(len as usize);
		for _ in 0..len {
			hashes.push(Hash::read(reader)?);
		}
		Ok(Locator { hashes })
	}
}

/// A batch of headers, in response to a locator based GetHeaders request.
pub struct Headers {
	/// The headers, in ascending height order.
	pub headers: Vec<BlockHeader>,
}

impl Writeable for Headers {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u16(self.headers.len() as u16)?;
		for header in &self.headers {
			header.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Headers {
	fn read(reader: &mut dyn Reader) -> Result<Headers, ser::Error> {
		let len = reader.read_u16()?;
		if u32::from(len) > MAX_BLOCK_HEADERS {
			return Err(ser::Error::TooLargeReadErr);
		}
		let headers = read_multi(reader, len as u64)?;
		Ok(Headers { headers })
	}
}

/// Response to a banned peer, lets them know why.
pub struct BanReasonPayload {
	/// The ban reason.
	pub ban_reason: ReasonForBan,
}

impl Writeable for BanReasonPayload {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.ban_reason.write(writer)
	}
}

impl Readable for BanReasonPayload {
	fn read(reader: &mut dyn Reader) -> Result<BanReasonPayload, ser::Error> {
		let ban_reason = ReasonForBan::read(reader)?;
		Ok(BanReasonPayload { ban_reason })
	}
}

/// Request to get the txhashset archive at the provided block.
pub struct TxHashSetRequest {
	/// Hash of the block for which the txhashset should be provided
	pub hash: Hash,
	/// Height of the corresponding block
	pub height: u64,
}

impl Writeable for TxHashSetRequest {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)?;
		writer.write_u64(self.height)?;
		Ok(())
	}
}

impl Readable for TxHashSetRequest {
	fn read(reader: &mut dyn Reader) -> Result<TxHashSetRequest, ser::Error> {
		Ok(TxHashSetRequest {
			hash: Hash::read(reader)?,
			height: reader.read_u64()?,
		})
	}
}

/// Response to a txhashset archive request, must include a zip stream of the
/// archive after the message body.
pub struct TxHashSetArchive {
	/// Hash of the block for which the txhashset is provided
	pub hash: Hash,
	/// Height of the corresponding block
	pub height: u64,
	/// Size in bytes of the archive
	pub bytes: u64,
}

impl Writeable for TxHashSetArchive {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)?;
		ser_multiwrite!(writer, [write_u64, self.height], [write_u64, self.bytes]);
		Ok(())
	}
}

impl Readable for TxHashSetArchive {
	fn read(reader: &mut dyn Reader) -> Result<TxHashSetArchive, ser::Error> {
		let hash = Hash::read(reader)?;
		let (height, bytes) = ser_multiread!(reader, read_u64, read_u64);
		Ok(TxHashSetArchive {
			hash,
			height,
			bytes,
		})
	}
}

/// Read the variable-length bytes of a streamed attachment (e.g. the
/// txhashset zip) following an archive message, writing them through to the
/// provided writer in chunks.
pub fn copy_attachment(
	len: usize,
	stream: &mut dyn Read,
	writer: &mut dyn Write,
) -> Result<(), Error> {
	let mut written = 0;
	while written < len {
		let read_len = std::cmp::min(8000, len - written);
		let mut buf = vec![0u8; read_len];
		stream.read_exact(&mut buf[..])?;
		writer.write_all(&buf)?;
		written += read_len;
	}
	Ok(())
}

/// Placeholder to read the rest of a message we do not care about.
pub fn read_discard(len: u64, stream: &mut dyn Read) -> Result<(), Error> {
	let mut buf = vec![0u8; len as usize];
	stream.read_exact(&mut buf[..])?;
	Ok(())
}

/// Reads a full streamed message body via a StreamingReader (used for
/// headers streaming during sync).
pub fn read_streamed<T: Readable>(stream: &mut dyn Read) -> Result<T, Error> {
	let mut streaming_reader = StreamingReader::new(stream);
	T::read(&mut streaming_reader).map_err(From::from)
}
