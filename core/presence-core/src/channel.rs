//! Length-prefixed message channel over one opened transport endpoint.
//!
//! The channel is owned by exactly one thread (the session worker), so none of
//! these methods synchronize. Sending on a closed channel is a no-op; a failed
//! write closes the channel and returns `Transmit` so the owner can reconnect.

use serde::Serialize;
use std::io::{self, Read, Write};
use std::time::Duration;

use presence_protocol::{encode_frame, parse_header, Frame, Opcode, HEADER_BYTES, MAX_FRAME_BYTES};

use crate::error::{PresenceError, Result};
use crate::transport::{Duplex, Endpoint, Transport};

const READ_CHUNK_SIZE: usize = 4096;
const MAX_PENDING_BYTES: usize = 2 * (HEADER_BYTES + MAX_FRAME_BYTES);

pub struct FramedChannel {
    endpoint: Endpoint,
    stream: Option<Box<dyn Duplex>>,
    pending: Vec<u8>,
}

impl FramedChannel {
    pub fn new(endpoint: Endpoint, stream: Box<dyn Duplex>) -> Self {
        Self {
            endpoint,
            stream: Some(stream),
            pending: Vec::new(),
        }
    }

    /// Opens one endpoint; `None` when the transport could not reach it.
    pub fn open(transport: &dyn Transport, endpoint: &Endpoint) -> Option<Self> {
        transport
            .open(endpoint)
            .map(|stream| Self::new(endpoint.clone(), stream))
    }

    /// Tries every candidate in order and keeps the first that opens.
    pub fn connect_first(transport: &dyn Transport) -> Result<Self> {
        let candidates = transport.candidates();
        if candidates.is_empty() {
            return Err(PresenceError::TransportUnavailable {
                reason: format!("{} transport has no candidate endpoints", transport.name()),
            });
        }

        candidates
            .iter()
            .find_map(|endpoint| Self::open(transport, endpoint))
            .ok_or_else(|| PresenceError::TransportUnavailable {
                reason: format!(
                    "none of {} {} endpoints accepted a connection",
                    candidates.len(),
                    transport.name()
                ),
            })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match &self.stream {
            Some(stream) => stream.set_read_timeout(timeout),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match &self.stream {
            Some(stream) => stream.set_write_timeout(timeout),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    pub fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_BYTES {
            return Err(PresenceError::Protocol(format!(
                "outbound payload of {} bytes exceeds frame limit",
                payload.len()
            )));
        }
        let Some(stream) = self.stream.as_mut() else {
            tracing::trace!(endpoint = %self.endpoint, "Dropping frame for closed channel");
            return Ok(());
        };

        let buffer = encode_frame(opcode, payload);
        let written = stream.write_all(&buffer).and_then(|_| stream.flush());
        if let Err(source) = written {
            self.close();
            return Err(PresenceError::Transmit { source });
        }
        Ok(())
    }

    pub fn send_json<T: Serialize>(&mut self, opcode: Opcode, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)
            .map_err(|err| PresenceError::json("encoding frame payload", err))?;
        self.send(opcode, &payload)
    }

    /// Blocks until exactly `n` bytes arrive, the read deadline passes, or the
    /// stream ends.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let buffered = n.min(self.pending.len());
        let mut bytes: Vec<u8> = self.pending.drain(..buffered).collect();
        if bytes.len() == n {
            return Ok(bytes);
        }

        let stream = self.stream.as_mut().ok_or_else(|| PresenceError::Transmit {
            source: io::Error::from(io::ErrorKind::NotConnected),
        })?;
        let mut rest = vec![0u8; n - bytes.len()];
        stream
            .read_exact(&mut rest)
            .map_err(|source| PresenceError::Transmit { source })?;
        bytes.extend_from_slice(&rest);
        Ok(bytes)
    }

    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_BYTES];
        header.copy_from_slice(&self.read_exact(HEADER_BYTES)?);
        let (opcode, length) = parse_header(header)?;
        let payload = self.read_exact(length)?;
        Ok(Frame::new(opcode, payload))
    }

    /// Collects whatever complete frames have already arrived without blocking.
    ///
    /// An orderly end of stream is reported as `Transmit(UnexpectedEof)`.
    /// Transports that cannot switch to non-blocking mode yield no frames.
    pub fn drain(&mut self) -> Result<Vec<Frame>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Vec::new());
        };
        if stream.set_nonblocking(true).is_err() {
            return Ok(Vec::new());
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let outcome = loop {
            if self.pending.len() >= MAX_PENDING_BYTES {
                break Ok(());
            }
            match stream.read(&mut chunk) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            }
        };
        let _ = stream.set_nonblocking(false);
        outcome.map_err(|source| PresenceError::Transmit { source })?;

        let mut frames = Vec::new();
        while let Some((frame, consumed)) = Frame::decode(&self.pending)? {
            self.pending.drain(..consumed);
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Idempotent; errors from the underlying shutdown are ignored.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown();
            tracing::debug!(endpoint = %self.endpoint, "IPC channel closed");
        }
        self.pending.clear();
    }
}

impl Drop for FramedChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    //! In-memory transport shared by the channel, handshake, and session tests.

    use super::*;
    use presence_protocol::EventFrame;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Both directions of one mock connection.
    #[derive(Clone, Default)]
    pub struct Wire {
        pub inbound: Arc<Mutex<VecDeque<u8>>>,
        pub outbound: Arc<Mutex<Vec<u8>>>,
        pub closed: Arc<AtomicBool>,
        pub write_timeout: Arc<Mutex<Option<Duration>>>,
    }

    impl Wire {
        pub fn push_inbound(&self, opcode: Opcode, payload: &[u8]) {
            self.inbound
                .lock()
                .unwrap()
                .extend(encode_frame(opcode, payload));
        }

        pub fn sent_frames(&self) -> Vec<Frame> {
            let bytes = self.outbound.lock().unwrap().clone();
            let mut frames = Vec::new();
            let mut offset = 0;
            while let Some((frame, consumed)) = Frame::decode(&bytes[offset..]).unwrap() {
                offset += consumed;
                frames.push(frame);
            }
            frames
        }

        pub fn sent_commands(&self) -> Vec<serde_json::Value> {
            self.sent_frames()
                .into_iter()
                .filter(|frame| frame.opcode == Opcode::Frame)
                .map(|frame| frame.parse().unwrap())
                .collect()
        }

        pub fn hang_up(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        pub fn write_timeout(&self) -> Option<Duration> {
            *self.write_timeout.lock().unwrap()
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Reads {
        /// Serve queued inbound bytes; `WouldBlock` when there are none.
        Queued,
        /// Every read fails as if its deadline passed.
        TimedOut,
        /// Every read blocks until the wire is hung up, ignoring deadlines.
        Blocked,
    }

    pub struct MockDuplex {
        pub wire: Wire,
        pub reads: Reads,
    }

    impl MockDuplex {
        pub fn new(wire: &Wire, reads: Reads) -> Self {
            Self {
                wire: wire.clone(),
                reads,
            }
        }
    }

    impl Read for MockDuplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads {
                Reads::Queued => {}
                Reads::TimedOut => return Err(io::Error::from(io::ErrorKind::TimedOut)),
                Reads::Blocked => {
                    while !self.wire.closed.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(2));
                    }
                    return Ok(0);
                }
            }
            let mut inbound = self.wire.inbound.lock().unwrap();
            if inbound.is_empty() {
                if self.wire.closed.load(Ordering::SeqCst) {
                    return Ok(0);
                }
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf.len().min(inbound.len());
            for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for MockDuplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.wire.closed.load(Ordering::SeqCst) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.wire.outbound.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Duplex for MockDuplex {
        fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
            *self.wire.write_timeout.lock().unwrap() = timeout;
            Ok(())
        }

        fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Behavior {
        /// Every open fails.
        Refuse,
        /// Opens and answers the handshake with READY.
        Ready,
        /// Opens but never answers; reads hit their deadline.
        Stall,
        /// Opens, then blocks the handshake read with no deadline at all.
        Hang,
    }

    pub struct MockTransport {
        pub behavior: Mutex<Behavior>,
        pub attempts: AtomicUsize,
        pub wires: Mutex<Vec<Wire>>,
    }

    impl MockTransport {
        pub fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior: Mutex::new(behavior),
                attempts: AtomicUsize::new(0),
                wires: Mutex::new(Vec::new()),
            })
        }

        pub fn set_behavior(&self, behavior: Behavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        pub fn last_wire(&self) -> Wire {
            self.wires.lock().unwrap().last().cloned().expect("a wire")
        }
    }

    impl Transport for MockTransport {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn candidates(&self) -> Vec<Endpoint> {
            vec![Endpoint::new("/mock/discord-ipc-0")]
        }

        fn open(&self, _endpoint: &Endpoint) -> Option<Box<dyn Duplex>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let behavior = *self.behavior.lock().unwrap();
            let wire = Wire::default();
            let duplex = match behavior {
                Behavior::Refuse => return None,
                Behavior::Ready => {
                    let ready = EventFrame::ready(serde_json::json!({"v": 1}));
                    wire.push_inbound(Opcode::Frame, &serde_json::to_vec(&ready).unwrap());
                    MockDuplex::new(&wire, Reads::Queued)
                }
                Behavior::Stall => MockDuplex::new(&wire, Reads::TimedOut),
                Behavior::Hang => MockDuplex::new(&wire, Reads::Blocked),
            };
            self.wires.lock().unwrap().push(wire);
            Some(Box::new(duplex))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use presence_protocol::CommandFrame;

    fn channel_on(wire: &Wire) -> FramedChannel {
        FramedChannel::new(
            Endpoint::new("/mock/discord-ipc-0"),
            Box::new(MockDuplex::new(wire, Reads::Queued)),
        )
    }

    #[test]
    fn send_writes_header_then_payload() {
        let wire = Wire::default();
        let mut channel = channel_on(&wire);
        channel.send(Opcode::Frame, b"{}").unwrap();
        assert_eq!(
            wire.outbound.lock().unwrap().as_slice(),
            &[1, 0, 0, 0, 2, 0, 0, 0, b'{', b'}']
        );
    }

    #[test]
    fn send_on_closed_channel_is_a_no_op() {
        let wire = Wire::default();
        let mut channel = channel_on(&wire);
        channel.close();
        channel.close();
        assert!(channel.send(Opcode::Frame, b"{}").is_ok());
        assert!(wire.outbound.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_write_closes_channel() {
        let wire = Wire::default();
        let mut channel = channel_on(&wire);
        wire.hang_up();
        let err = channel.send_json(Opcode::Frame, &CommandFrame::ping()).unwrap_err();
        assert!(matches!(err, PresenceError::Transmit { .. }));
        assert!(!channel.is_open());
    }

    #[test]
    fn read_frame_returns_queued_frame() {
        let wire = Wire::default();
        wire.push_inbound(Opcode::Frame, br#"{"cmd":"PING"}"#);
        let mut channel = channel_on(&wire);
        let frame = channel.read_frame().unwrap();
        assert_eq!(frame.opcode, Opcode::Frame);
        assert_eq!(frame.payload, br#"{"cmd":"PING"}"#);
    }

    #[test]
    fn read_frame_rejects_oversized_declared_length() {
        let wire = Wire::default();
        wire.inbound
            .lock()
            .unwrap()
            .extend(presence_protocol::encode_header(1, (MAX_FRAME_BYTES + 1) as u32));
        let mut channel = channel_on(&wire);
        assert!(matches!(
            channel.read_frame(),
            Err(PresenceError::Protocol(message)) if message.contains("exceeds")
        ));
    }

    #[test]
    fn write_timeout_reaches_the_stream() {
        let wire = Wire::default();
        let mut channel = channel_on(&wire);
        channel
            .set_write_timeout(Some(Duration::from_millis(250)))
            .unwrap();
        assert_eq!(wire.write_timeout(), Some(Duration::from_millis(250)));

        channel.close();
        assert!(channel.set_write_timeout(None).is_err());
    }

    #[test]
    fn drain_keeps_partial_frames_for_later() {
        let wire = Wire::default();
        let mut channel = channel_on(&wire);
        let raw = encode_frame(Opcode::Frame, br#"{"evt":null}"#);
        wire.inbound.lock().unwrap().extend(&raw[..5]);
        assert!(channel.drain().unwrap().is_empty());

        wire.inbound.lock().unwrap().extend(&raw[5..]);
        let frames = channel.drain().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, br#"{"evt":null}"#);
    }

    #[test]
    fn drain_reports_end_of_stream() {
        let wire = Wire::default();
        let mut channel = channel_on(&wire);
        wire.hang_up();
        assert!(matches!(
            channel.drain(),
            Err(PresenceError::Transmit { .. })
        ));
    }

    #[test]
    fn connect_first_without_candidates_is_unavailable() {
        let err = FramedChannel::connect_first(&crate::transport::NullTransport)
            .err()
            .expect("no channel");
        assert!(matches!(err, PresenceError::TransportUnavailable { .. }));
    }

    #[test]
    fn connect_first_reports_refusals() {
        let transport = MockTransport::new(Behavior::Refuse);
        assert!(FramedChannel::connect_first(transport.as_ref()).is_err());
        assert_eq!(transport.attempts(), 1);
    }
}
