//! Worker states, transport choice and the outcome handed to the caller.

use std::fmt;

use thiserror::Error;

use crate::decode::{DecodeError, DecodedImage};
use crate::id::Host;

/// Position of a worker in its state machine.
///
/// ```text
///  Init ─► CacheLookup ─┬─────────────────────────────► Decode ─► WriteCache ─► Done
///                       └─► NetworkRequest ─► WaitingOnNetwork ─┘    │
///                                 ▲                │                 │
///                                 └──── retry ─────┴──── retry ──────┘
///                                                  └─► Failed
///  (any state) ─► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchState {
    Init,
    CacheLookup,
    NetworkRequest,
    WaitingOnNetwork,
    Decode,
    WriteCache,
    Done,
    Failed,
    Cancelled,
}

impl FetchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::CacheLookup => "cache_lookup",
            Self::NetworkRequest => "network_request",
            Self::WaitingOnNetwork => "waiting_on_network",
            Self::Decode => "decode",
            Self::WriteCache => "write_cache",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network source picked on entry to `NetworkRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Http { url: String },
    Datagram { host: Host },
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Http { .. } => TransportKind::Http,
            Self::Datagram { .. } => TransportKind::Datagram,
        }
    }
}

/// Where a worker's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Cache,
    Http,
    Datagram,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Http => write!(f, "http"),
            Self::Datagram => write!(f, "datagram"),
        }
    }
}

/// Why a worker ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("cache missed and the request names no network source")]
    NoSource,

    #[error("all sources exhausted after {http_attempts} HTTP and {datagram_attempts} datagram attempts")]
    SourcesExhausted {
        http_attempts: u32,
        datagram_attempts: u32,
    },

    #[error("decode failed: {0}")]
    DecodeFailed(DecodeError),
}

/// Result handed over by `get_request_finished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Decoded(DecodedImage),
    Failed(FetchFailure),
}

impl FetchOutcome {
    pub fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded(_))
    }

    /// Discard level of a decoded result.
    pub fn discard(&self) -> Option<u8> {
        match self {
            Self::Decoded(image) => Some(image.discard),
            Self::Failed(_) => None,
        }
    }

    pub fn into_image(self) -> Option<DecodedImage> {
        match self {
            Self::Decoded(image) => Some(image),
            Self::Failed(_) => None,
        }
    }
}
