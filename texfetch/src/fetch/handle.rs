//! Shared side of a worker.
//!
//! The worker task owns its byte buffer outright. Everything the facade may
//! read or change while the task runs lives in [`WorkerControl`] behind a
//! short-held lock, and everything the facade wants the task to react to is
//! posted as a [`WorkerEvent`] into the task's mailbox.
//!
//! Lock order: request table shard, then `control`, then the queue lock.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::decode::ImageCodec;
use crate::fetch::{FetchOutcome, FetchRequest, FetchState, TransportKind};
use crate::http::{HttpError, HttpResponse};
use crate::id::{Host, ImageId};

/// Bits of the fetch priority carrying the caller's priority.
pub const FETCH_PRIORITY_MASK: u32 = 0x0fff_ffff;
/// Set while the worker holds data it is about to use.
pub const FETCH_PRIORITY_ACTIVE: u32 = 0x2000_0000;
/// Set while the worker is waiting on a transport.
pub const FETCH_PRIORITY_WAITING: u32 = 0x1000_0000;

/// Message into a worker's mailbox.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    HttpComplete {
        attempt: u32,
        result: Result<HttpResponse, HttpError>,
    },
    Header {
        host: Host,
        codec: ImageCodec,
        packet_count: u16,
        total_bytes: usize,
        data: Bytes,
    },
    Packet {
        host: Host,
        packet: u16,
        data: Bytes,
    },
    /// The request now asks for more detail.
    Refine,
}

/// Notification from a worker to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StateChanged {
    pub id: ImageId,
    pub state: FetchState,
}

/// Datagram request bookkeeping, maintained by `update` and the worker.
#[derive(Debug, Clone, Default)]
pub(crate) struct DatagramBinding {
    /// Host with an outstanding request for this image.
    pub host: Option<Host>,
    pub sent_at: Option<Instant>,
    pub sent_priority: f32,
    pub sent_discard: Option<u8>,
    /// First packet to ask for on the next (re)send.
    pub next_packet: u16,
}

/// Worker fields shared with the facade.
#[derive(Debug)]
pub(crate) struct WorkerControl {
    pub request: FetchRequest,
    pub state: FetchState,
    pub transport: Option<TransportKind>,
    pub bytes_held: usize,
    pub bytes_needed: Option<usize>,
    pub result: Option<FetchOutcome>,
    pub delivered_discard: Option<u8>,
    pub from_local_cache: bool,
    /// A merge asked for more detail and the worker has not picked it up.
    pub refine_pending: bool,
    pub created_at: Instant,
    pub fetch_started_at: Option<Instant>,
    pub request_sent_at: Option<Instant>,
    pub datagram: DatagramBinding,
}

impl WorkerControl {
    fn new(request: FetchRequest) -> Self {
        Self {
            request,
            state: FetchState::Init,
            transport: None,
            bytes_held: 0,
            bytes_needed: None,
            result: None,
            delivered_discard: None,
            from_local_cache: false,
            refine_pending: false,
            created_at: Instant::now(),
            fetch_started_at: None,
            request_sent_at: None,
            datagram: DatagramBinding::default(),
        }
    }

    /// Fraction of the needed bytes already held.
    pub fn decode_progress(&self) -> f32 {
        match self.bytes_needed {
            Some(0) => 1.0,
            Some(needed) => (self.bytes_held as f32 / needed as f32).min(1.0),
            None => 0.0,
        }
    }

    /// Integer scheduling priority: caller priority in the low bits,
    /// state flags above it.
    pub fn fetch_priority(&self) -> u32 {
        let base = (self.request.priority.max(0.0) as u32).min(FETCH_PRIORITY_MASK);
        let flags = match self.state {
            FetchState::Decode | FetchState::WriteCache => FETCH_PRIORITY_ACTIVE,
            FetchState::WaitingOnNetwork => FETCH_PRIORITY_WAITING,
            _ => 0,
        };
        base | flags
    }
}

/// Facade-side handle to one worker.
pub(crate) struct WorkerHandle {
    pub id: ImageId,
    pub control: Mutex<WorkerControl>,
    pub cancel: CancellationToken,
    mailbox: mpsc::UnboundedSender<WorkerEvent>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<WorkerEvent>>>,
}

impl WorkerHandle {
    pub fn new(request: FetchRequest, cancel: CancellationToken) -> Arc<Self> {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: request.id,
            control: Mutex::new(WorkerControl::new(request)),
            cancel,
            mailbox,
            inbox: Mutex::new(Some(inbox)),
        })
    }

    /// Queue an event for the worker. False once the worker has stopped.
    pub fn post(&self, event: WorkerEvent) -> bool {
        !self.cancel.is_cancelled() && self.mailbox.send(event).is_ok()
    }

    /// Hand the receiving end to the task that will run this worker.
    pub fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<WorkerEvent>> {
        self.inbox.lock().take()
    }
}
