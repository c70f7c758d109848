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

//! Provides a connection wrapper that handles the lower level tasks in
//! sending or receiving data from the TCP socket, as well as dealing with
//! timeouts.
//!
//! Because peers are able to send messages at any time and many messages
//! warrant responses, a reader thread waits on the socket and passes
//! incoming messages to a handler. All writes (queued sends and handler
//! responses alike) go through a single writer thread so message frames
//! never interleave on the wire.

use std::io::Read;
use std::io::Write as IoWrite;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::core::ser::{self, FixedLength, Writeable};
use crate::msg::{read_header, MsgHeader, Type};
use crate::types::Error;
use crate::util::{Mutex, RwLock};

/// Capacity of the queue to the writer thread. Slow peers eventually fill
/// it and sends to them fail rather than bloat our memory.
pub const SEND_CHANNEL_CAP: usize = 10;

const IO_TIMEOUT: Duration = Duration::from_millis(1000);

/// Write timeout: a peer that cannot take our bytes within this window is
/// dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// A message as received by the connection: the header plus a handle on the
/// underlying stream so the handler can consume the body (and stream any
/// attachment) directly.
pub struct Message<'a> {
	/// The message header.
	pub header: MsgHeader,
	stream: &'a mut dyn Read,
}

impl<'a> Message<'a> {
	fn from_header(header: MsgHeader, stream: &'a mut dyn Read) -> Message<'a> {
		Message { header, stream }
	}

	/// Read the message body from the underlying connection
	pub fn body<T: ser::Readable>(&mut self) -> Result<T, Error> {
		crate::msg::read_body(&self.header, self.stream)
	}

	/// Read a chunk of the (attachment) payload.
	pub fn copy_attachment(
		&mut self,
		len: usize,
		writer: &mut dyn IoWrite,
	) -> Result<(), Error> {
		crate::msg::copy_attachment(len, self.stream, writer)
	}

	/// Discard the message body.
	pub fn discard(&mut self) -> Result<(), Error> {
		crate::msg::read_discard(self.header.msg_len, self.stream)
	}
}

/// A response to a message. Carries the serialized body and an optional
/// attachment file streamed after the body.
pub struct Response {
	resp_type: Type,
	body: Vec<u8>,
	attachment: Option<std::fs::File>,
}

impl Response {
	/// Build a response from a Writeable body.
	pub fn new<T: Writeable>(resp_type: Type, body: &T) -> Result<Response, Error> {
		let body = ser::ser_vec(body)?;
		Ok(Response {
			resp_type,
			body,
			attachment: None,
		})
	}

	/// Attach a file to be streamed after the body (txhashset archive).
	pub fn add_attachment(&mut self, file: std::fs::File) {
		self.attachment = Some(file);
	}

	// Queue the response (header, body, then attachment in chunks) onto the
	// writer channel. Blocking sends: the writer provides backpressure.
	fn queue(mut self, send_channel: &mpsc::SyncSender<Vec<u8>>) -> Result<(), Error> {
		let mut msg = ser::ser_vec(&MsgHeader::new(self.resp_type, self.body.len() as u64))?;
		msg.append(&mut self.body);
		send_channel
			.send(msg)
			.map_err(|e| Error::Send(e.to_string()))?;

		if let Some(mut file) = self.attachment.take() {
			let mut buf = [0u8; 8000];
			loop {
				let n = file.read(&mut buf[..])?;
				if n == 0 {
					break;
				}
				send_channel
					.send(buf[..n].to_vec())
					.map_err(|e| Error::Send(e.to_string()))?;
			}
		}
		Ok(())
	}
}

/// Handler for incoming messages on a connection.
pub trait MessageHandler: Send + 'static {
	/// Consume a single message, optionally producing a response.
	fn consume(&self, msg: Message<'_>) -> Result<Option<Response>, Error>;
}

/// A connection tracker: handles to the writer queue and counters, shared
/// with the Peer owning the connection.
pub struct Tracker {
	/// Bytes we've sent.
	pub sent_bytes: Arc<AtomicU64>,
	/// Bytes we've received.
	pub received_bytes: Arc<AtomicU64>,
	/// Channel to the writer thread.
	send_channel: mpsc::SyncSender<Vec<u8>>,
	/// Set when either side of the connection errors out or closes.
	close: Arc<AtomicBool>,
	/// Join handles for the reader and writer threads.
	handles: Mutex<Vec<thread::JoinHandle<()>>>,
	/// Set while an error is pending for the owner to collect.
	error_channel: Arc<RwLock<Option<Error>>>,
}

impl Tracker {
	/// Serialize and queue up a message for the writer thread.
	pub fn send<T: Writeable>(&self, body: T, msg_type: Type) -> Result<(), Error> {
		let mut body_bytes = vec![];
		ser::serialize(&mut body_bytes, &body)?;
		let mut msg = ser::ser_vec(&MsgHeader::new(msg_type, body_bytes.len() as u64))?;
		msg.append(&mut body_bytes);
		self.send_channel
			.try_send(msg)
			.map_err(|e| Error::Send(e.to_string()))
	}

	/// Whether the connection has been closed (either deliberately or
	/// following an error).
	pub fn is_closed(&self) -> bool {
		self.close.load(Ordering::Relaxed)
	}

	/// Collect any terminal error hit by the reader/writer threads.
	pub fn take_error(&self) -> Option<Error> {
		self.error_channel.write().take()
	}

	/// Ask the reader and writer threads to stop and join them.
	pub fn close(&self) {
		self.close.store(true, Ordering::Relaxed);
		let mut handles = self.handles.lock();
		for handle in handles.drain(..) {
			let _ = handle.join();
		}
	}
}

/// Start the read and write loops on the provided TCP stream, dispatching
/// incoming messages to the handler.
pub fn listen<H>(stream: TcpStream, handler: H) -> Result<Tracker, Error>
where
	H: MessageHandler,
{
	let (send_tx, send_rx) = mpsc::sync_channel::<Vec<u8>>(SEND_CHANNEL_CAP);
	let close = Arc::new(AtomicBool::new(false));
	let sent_bytes = Arc::new(AtomicU64::new(0));
	let received_bytes = Arc::new(AtomicU64::new(0));
	let error_channel = Arc::new(RwLock::new(None));

	stream.set_nonblocking(false)?;
	stream.set_read_timeout(Some(IO_TIMEOUT))?;
	stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

	let mut read_stream = stream.try_clone()?;
	let mut write_stream = stream.try_clone()?;

	let read_close = close.clone();
	let read_received = received_bytes.clone();
	let read_error = error_channel.clone();
	let resp_send_tx = send_tx.clone();
	let reader = thread::Builder::new()
		.name("peer_read".to_string())
		.spawn(move || {
			loop {
				if read_close.load(Ordering::Relaxed) {
					break;
				}
				// A short read timeout lets us re-check the close flag
				// between messages.
				match read_header(&mut read_stream) {
					Ok(header) => {
						read_received
							.fetch_add(MsgHeader::LEN as u64 + header.msg_len, Ordering::Relaxed);
						let msg = Message::from_header(header, &mut read_stream);
						match handler.consume(msg) {
							Ok(Some(resp)) => {
								if let Err(e) = resp.queue(&resp_send_tx) {
									debug!("error queuing response: {:?}", e);
									*read_error.write() = Some(e);
									read_close.store(true, Ordering::Relaxed);
									break;
								}
							}
							Ok(None) => {}
							Err(e) => {
								debug!("error handling message: {:?}", e);
								*read_error.write() = Some(e);
								read_close.store(true, Ordering::Relaxed);
								break;
							}
						}
					}
					Err(Error::Timeout) => {
						// nothing to read yet, check close flag and go again
					}
					Err(e) => {
						trace!("read error on connection: {:?}", e);
						*read_error.write() = Some(e);
						read_close.store(true, Ordering::Relaxed);
						break;
					}
				}
			}
			let _ = read_stream.shutdown(Shutdown::Both);
		})
		.map_err(|e| Error::Internal(format!("failed to spawn reader: {}", e)))?;

	let write_close = close.clone();
	let write_sent = sent_bytes.clone();
	let write_error = error_channel.clone();
	let writer = thread::Builder::new()
		.name("peer_write".to_string())
		.spawn(move || {
			loop {
				if write_close.load(Ordering::Relaxed) {
					break;
				}
				match send_rx.recv_timeout(IO_TIMEOUT) {
					Ok(data) => {
						if let Err(e) = write_stream.write_all(&data[..]) {
							debug!("error writing to peer: {:?}", e);
							*write_error.write() = Some(From::from(e));
							write_close.store(true, Ordering::Relaxed);
							break;
						}
						write_sent.fetch_add(data.len() as u64, Ordering::Relaxed);
					}
					Err(mpsc::RecvTimeoutError::Timeout) => {}
					Err(mpsc::RecvTimeoutError::Disconnected) => {
						break;
					}
				}
			}
		})
		.map_err(|e| Error::Internal(format!("failed to spawn writer: {}", e)))?;

	Ok(Tracker {
		sent_bytes,
		received_bytes,
		send_channel: send_tx,
		close,
		handles: Mutex::new(vec![reader, writer]),
		error_channel,
	})
}
