//! Read-only per-worker snapshots for debug overlays.

use std::time::{Duration, Instant};

use crate::fetch::handle::WorkerControl;
use crate::fetch::{FetchState, TransportKind};
use crate::id::ImageId;

/// Snapshot of one worker, as shown by a texture debug overlay.
///
/// Nothing here should drive control flow; values can be stale by the time
/// the caller reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchStateInfo {
    pub id: ImageId,
    pub state: FetchState,
    /// Transport in use while waiting on the network.
    pub transport: Option<TransportKind>,
    /// Bytes held over bytes needed, `0.0..=1.0`.
    pub decode_progress: f32,
    pub requested_priority: f32,
    pub fetch_priority: u32,
    /// Time since the request was created.
    pub age: Duration,
    /// Time since the worker left `Init`.
    pub fetch_elapsed: Option<Duration>,
    /// Time since the last network request went out.
    pub request_elapsed: Option<Duration>,
    pub can_use_http: bool,
    pub from_local_cache: bool,
    pub desired_discard: u8,
    pub delivered_discard: Option<u8>,
    pub bytes_held: usize,
    pub bytes_needed: Option<usize>,
}

impl FetchStateInfo {
    pub(crate) fn capture(id: ImageId, control: &WorkerControl, now: Instant) -> Self {
        let since = |at: Option<Instant>| at.map(|at| now.saturating_duration_since(at));
        let request_sent = control.request_sent_at.or(control.datagram.sent_at);

        Self {
            id,
            state: control.state,
            transport: control.transport,
            decode_progress: control.decode_progress(),
            requested_priority: control.request.priority,
            fetch_priority: control.fetch_priority(),
            age: now.saturating_duration_since(control.created_at),
            fetch_elapsed: since(control.fetch_started_at),
            request_elapsed: since(request_sent),
            can_use_http: control.request.http_url().is_some(),
            from_local_cache: control.from_local_cache,
            desired_discard: control.request.discard,
            delivered_discard: control.delivered_discard,
            bytes_held: control.bytes_held,
            bytes_needed: control.bytes_needed,
        }
    }

    /// One overlay line: `id state progress% prio discard`.
    pub fn summary(&self) -> String {
        format!(
            "{} {:<18} {:>5.1}% p={:<8} d={}/{} {}",
            self.id,
            self.state.as_str(),
            self.decode_progress * 100.0,
            self.fetch_priority,
            self.desired_discard,
            self.delivered_discard
                .map_or_else(|| "-".to_string(), |d| d.to_string()),
            self.transport
                .map_or_else(|| "-".to_string(), |t| t.to_string()),
        )
    }
}
