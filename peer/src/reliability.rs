//! Sequence numbers, ACKs and bounded resends over [`UdpTransport`].
//!
//! Every datagram carrying a `sequence_number` is acknowledged as soon as it
//! is read, before it is typed or handed on. Sequence numbers already seen
//! from the same address are acknowledged again but not delivered twice.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use pokelink_protocol::{Frame, Message, MessageKind, ParseError, SEQUENCE_NUMBER, decode};
use tokio::time::Instant;

use crate::PeerError;
use crate::config::RetryPolicy;
use crate::transport::UdpTransport;

/// Most messages held back for a later protocol step
const MAX_DEFERRED: usize = 64;

/// A datagram that made it through ACK and duplicate handling
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Message {
        from: SocketAddr,
        message: Message,
    },
    /// Known `message_type` whose fields failed to parse
    Malformed {
        from: SocketAddr,
        kind: MessageKind,
        error: ParseError,
    },
}

impl Received {
    pub fn from(&self) -> SocketAddr {
        match self {
            Received::Message { from, .. } | Received::Malformed { from, .. } => *from,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Received::Message { message, .. } => message.kind(),
            Received::Malformed { kind, .. } => *kind,
        }
    }
}

/// Remembers recent sequence numbers per sender
#[derive(Debug)]
pub struct ReceiveTracker {
    recent: HashMap<SocketAddr, VecDeque<u32>>,
    max_recent: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ReceiveTracker {
    pub fn new(max_recent: usize) -> Self {
        Self {
            recent: HashMap::new(),
            max_recent,
        }
    }

    /// Returns false if `sequence` was already seen from `from`
    pub fn record_received(&mut self, from: SocketAddr, sequence: u32) -> bool {
        let recent = self.recent.entry(from).or_default();
        if recent.contains(&sequence) {
            return false;
        }

        if recent.len() >= self.max_recent {
            recent.pop_front();
        }
        recent.push_back(sequence);
        true
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

#[derive(Debug, Clone)]
struct Pending {
    bytes: Vec<u8>,
    addr: SocketAddr,
    kind: MessageKind,
}

enum Inbound {
    Ack { from: SocketAddr, ack_number: u32 },
    Received(Received),
}

#[derive(Debug)]
pub struct ReliableChannel {
    transport: UdpTransport,
    next_sequence: u32,
    pending: HashMap<u32, Pending>,
    received: ReceiveTracker,
    /// Messages read while waiting for an ACK, delivered before new reads
    inbox: VecDeque<Received>,
    /// Already acknowledged messages the current step could not use
    deferred: VecDeque<Received>,
}

impl ReliableChannel {
    pub fn new(transport: UdpTransport) -> Self {
        Self {
            transport,
            next_sequence: 1,
            pending: HashMap::new(),
            received: ReceiveTracker::default(),
            inbox: VecDeque::new(),
            deferred: VecDeque::new(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Next local sequence number: 1, 2, 3, ... never reused
    pub fn next_sequence_number(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Sequenced messages sent but not yet acknowledged
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub async fn send_unreliable(&self, message: Message, addr: SocketAddr) -> Result<(), PeerError> {
        let frame = Frame::unsequenced(message);
        self.transport.send_to(&frame.to_bytes(), addr).await?;
        tracing::debug!(kind = %frame.kind(), to = %addr, "Sent message");
        Ok(())
    }

    /// Attach the next sequence number and send once. Pair with [`Self::await_ack`].
    pub async fn send_sequenced(&mut self, message: Message, addr: SocketAddr) -> Result<u32, PeerError> {
        let sequence_number = self.next_sequence_number();
        let frame = Frame::sequenced(sequence_number, message);
        let bytes = frame.to_bytes();
        self.transport.send_to(&bytes, addr).await?;
        tracing::debug!(
            sequence_number,
            kind = %frame.kind(),
            to = %addr,
            "Sent sequenced message"
        );

        self.pending.insert(
            sequence_number,
            Pending {
                bytes,
                addr,
                kind: frame.kind(),
            },
        );
        Ok(sequence_number)
    }

    /// Wait for the ACK of `sequence_number`, resending the identical
    /// datagram after each timeout. Other messages read meanwhile are
    /// buffered for [`Self::recv`].
    pub async fn await_ack(&mut self, sequence_number: u32, policy: &RetryPolicy) -> Result<(), PeerError> {
        let Some(pending) = self.pending.get(&sequence_number).cloned() else {
            return Ok(());
        };

        let acked = self.wait_for_ack(sequence_number, &pending, policy).await;
        self.pending.remove(&sequence_number);
        match acked {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(
                    sequence_number,
                    kind = %pending.kind,
                    attempts = policy.attempts(),
                    "Gave up waiting for ACK"
                );
                Err(PeerError::AckTimeout {
                    sequence_number,
                    attempts: policy.attempts(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_for_ack(
        &mut self,
        sequence_number: u32,
        pending: &Pending,
        policy: &RetryPolicy,
    ) -> Result<bool, PeerError> {
        for attempt in 1..=policy.attempts() {
            if attempt > 1 {
                tracing::warn!(
                    sequence_number,
                    kind = %pending.kind,
                    attempt,
                    "ACK timeout, resending"
                );
                self.transport.send_to(&pending.bytes, pending.addr).await?;
            }

            let deadline = Instant::now() + policy.timeout;
            while let Some(inbound) = self.poll_until(deadline).await? {
                match inbound {
                    Inbound::Ack { from, ack_number }
                        if ack_number == sequence_number && from == pending.addr =>
                    {
                        tracing::debug!(sequence_number, kind = %pending.kind, "ACK received");
                        return Ok(true);
                    }
                    Inbound::Ack { from, ack_number } => {
                        tracing::debug!(from = %from, ack_number, "Ignoring stale ACK");
                    }
                    Inbound::Received(received) => self.inbox.push_back(received),
                }
            }
        }
        Ok(false)
    }

    /// Send with a sequence number and wait for its ACK
    pub async fn send_reliable(
        &mut self,
        message: Message,
        addr: SocketAddr,
        policy: &RetryPolicy,
    ) -> Result<u32, PeerError> {
        let sequence_number = self.send_sequenced(message, addr).await?;
        self.await_ack(sequence_number, policy).await?;
        Ok(sequence_number)
    }

    /// Next delivered message, or `None` on timeout
    pub async fn recv(&mut self, timeout: Duration) -> Result<Option<Received>, PeerError> {
        self.recv_until(Instant::now() + timeout).await
    }

    pub async fn recv_until(&mut self, deadline: Instant) -> Result<Option<Received>, PeerError> {
        if let Some(received) = self.inbox.pop_front() {
            return Ok(Some(received));
        }

        while let Some(inbound) = self.poll_until(deadline).await? {
            match inbound {
                Inbound::Received(received) => return Ok(Some(received)),
                Inbound::Ack { from, ack_number } => {
                    tracing::debug!(from = %from, ack_number, "Ignoring unexpected ACK");
                }
            }
        }
        Ok(None)
    }

    /// Hold an acknowledged message for a later step. Its sender will not
    /// resend it, so dropping it would lose it for good.
    pub fn defer(&mut self, received: Received) {
        if self.deferred.len() >= MAX_DEFERRED {
            if let Some(dropped) = self.deferred.pop_front() {
                tracing::warn!(from = %dropped.from(), kind = %dropped.kind(), "Deferred queue full, dropping oldest");
            }
        }
        self.deferred.push_back(received);
    }

    /// Put deferred messages back in front of everything else, in arrival order
    pub fn redeliver_deferred(&mut self) {
        while let Some(received) = self.deferred.pop_back() {
            self.inbox.push_front(received);
        }
    }

    async fn poll_until(&mut self, deadline: Instant) -> Result<Option<Inbound>, PeerError> {
        loop {
            let Some((bytes, from)) = self.transport.recv_until(deadline).await? else {
                return Ok(None);
            };
            if let Some(inbound) = self.accept(&bytes, from).await? {
                return Ok(Some(inbound));
            }
        }
    }

    /// ACK, deduplicate and type one datagram. `None` means it was dropped.
    async fn accept(&mut self, bytes: &[u8], from: SocketAddr) -> Result<Option<Inbound>, PeerError> {
        let raw = decode(bytes);
        let Some(kind) = raw.message_type().and_then(MessageKind::parse) else {
            tracing::warn!(
                from = %from,
                message_type = ?raw.message_type(),
                "Dropping datagram without a known message_type"
            );
            return Ok(None);
        };

        let sequence_number = match raw.parse_optional::<u32>(SEQUENCE_NUMBER) {
            Ok(sequence_number) => sequence_number,
            Err(e) => {
                tracing::warn!(from = %from, kind = %kind, error = %e, "Dropping datagram");
                return Ok(None);
            }
        };

        if let Some(sequence_number) = sequence_number {
            // The sender resends if this ACK is lost, so a failed send is not fatal
            if let Err(e) = self
                .transport
                .send_to(&Frame::ack(sequence_number).to_bytes(), from)
                .await
            {
                tracing::warn!(from = %from, sequence_number, error = %e, "Failed to send ACK");
            }
            if !self.received.record_received(from, sequence_number) {
                tracing::debug!(
                    from = %from,
                    sequence_number,
                    kind = %kind,
                    "Re-acknowledged duplicate, not delivering"
                );
                return Ok(None);
            }
        }

        match Message::from_raw(&raw) {
            Ok(Message::Ack { ack_number }) => Ok(Some(Inbound::Ack { from, ack_number })),
            Ok(message) => {
                tracing::debug!(from = %from, kind = %kind, ?sequence_number, "Received message");
                Ok(Some(Inbound::Received(Received::Message { from, message })))
            }
            Err(error) => {
                tracing::warn!(from = %from, kind = %kind, error = %error, "Malformed message");
                Ok(Some(Inbound::Received(Received::Malformed { from, kind, error })))
            }
        }
    }
}
