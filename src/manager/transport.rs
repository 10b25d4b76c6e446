//! Transport abstraction.
//!
//! The engine never talks to a socket directly: it hands envelopes to a
//! [`Transport`] and polls [`ResponseFuture`]s inside cron ticks. The
//! in-process implementation backs tests and single-process deployments;
//! a networked implementation lives outside the engine.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::coordinator::messages::Message;

/// Routable endpoint: a node's ip and port plus the uuid of the target
/// component (a shard, a shard manager, the coordinator).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    pub ip: IpAddr,
    pub port: u16,
    pub uuid: Uuid,
}

impl Address {
    pub fn new(ip: IpAddr, port: u16, uuid: Uuid) -> Self {
        Address { ip, port, uuid }
    }

    pub fn local(uuid: Uuid) -> Self {
        Address {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 7687,
            uuid,
        }
    }

    /// Same node, different component.
    pub fn with_uuid(&self, uuid: Uuid) -> Address {
        Address {
            ip: self.ip,
            port: self.port,
            uuid,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.ip, self.port, self.uuid)
    }
}

pub type RequestId = u64;

/// One routed message. `shard_map_version` is the sender's view of the
/// shard map; receivers reject envelopes built against an older map than
/// they have already seen.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub message: Message,
    pub request_id: RequestId,
    pub to: Address,
    pub from: Address,
    pub shard_map_version: u64,
}

/// Outcome of polling a [`ResponseFuture`].
#[derive(Debug)]
pub enum PollResponse {
    Ready(Message),
    Pending,
    TimedOut,
}

/// A response slot polled from cron; never blocks.
pub struct ResponseFuture {
    receiver: Receiver<Message>,
    deadline: Instant,
}

impl ResponseFuture {
    pub fn poll(&self) -> PollResponse {
        match self.receiver.try_recv() {
            Ok(message) => PollResponse::Ready(message),
            Err(mpsc::TryRecvError::Empty) => {
                if Instant::now() >= self.deadline {
                    PollResponse::TimedOut
                } else {
                    PollResponse::Pending
                }
            }
            Err(mpsc::TryRecvError::Disconnected) => PollResponse::TimedOut,
        }
    }
}

/// Request/response transport with addresses and futures.
pub trait Transport: Send + Sync {
    /// Fire-and-forget delivery.
    fn send(&self, envelope: Envelope);

    /// Sends a request and returns a pollable response slot.
    fn request(
        &self,
        to: Address,
        from: Address,
        message: Message,
        shard_map_version: u64,
    ) -> ResponseFuture;

    /// Answers a previously received request.
    fn respond(&self, request_id: RequestId, message: Message);
}

/// In-process transport: a registry of inboxes keyed by endpoint uuid.
pub struct InProcessTransport {
    inboxes: DashMap<Uuid, Sender<Envelope>>,
    pending: DashMap<RequestId, Sender<Message>>,
    next_request_id: AtomicU64,
    request_timeout: Mutex<Duration>,
}

impl Default for InProcessTransport {
    fn default() -> Self {
        InProcessTransport {
            inboxes: DashMap::new(),
            pending: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            request_timeout: Mutex::new(Duration::from_millis(200)),
        }
    }
}

impl InProcessTransport {
    pub fn new() -> Self {
        InProcessTransport::default()
    }

    pub fn set_request_timeout(&self, timeout: Duration) {
        *self.request_timeout.lock() = timeout;
    }

    /// Registers an endpoint and returns the receiving end of its inbox.
    pub fn register(&self, uuid: Uuid) -> Receiver<Envelope> {
        let (sender, receiver) = mpsc::channel();
        self.inboxes.insert(uuid, sender);
        receiver
    }

    pub fn deregister(&self, uuid: Uuid) {
        self.inboxes.remove(&uuid);
    }
}

impl Transport for InProcessTransport {
    fn send(&self, envelope: Envelope) {
        let Some(inbox) = self.inboxes.get(&envelope.to.uuid) else {
            warn!(to = %envelope.to, "dropping envelope for unknown endpoint");
            return;
        };
        if inbox.send(envelope).is_err() {
            warn!("dropping envelope for closed endpoint");
        }
    }

    fn request(
        &self,
        to: Address,
        from: Address,
        message: Message,
        shard_map_version: u64,
    ) -> ResponseFuture {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel();
        self.pending.insert(request_id, sender);
        let deadline = Instant::now() + *self.request_timeout.lock();
        self.send(Envelope {
            message,
            request_id,
            to,
            from,
            shard_map_version,
        });
        ResponseFuture { receiver, deadline }
    }

    fn respond(&self, request_id: RequestId, message: Message) {
        if let Some((_, sender)) = self.pending.remove(&request_id) {
            let _ = sender.send(message);
        }
    }
}
