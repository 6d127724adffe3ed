//! Datagram transport to the simulator.
//!
//! The simulator streams images as one header datagram followed by numbered
//! packets. Outbound, the fetch manager asks a host to start (or re-prioritize)
//! images and to stop sending images nobody wants anymore.
//!
//! ```text
//!   header  ─► [codec | packet_count | total_bytes | first ≤600 bytes]
//!   packet1 ─► [1000 bytes]
//!   ...
//!   packetN ─► [remaining bytes]
//! ```

mod assembler;

use tracing::debug;

use crate::id::{Host, ImageId};

pub use assembler::{packet_count_for, AssemblyError, PacketAssembler};

/// Payload bytes carried by the header datagram.
pub const FIRST_PACKET_SIZE: usize = 600;

/// Payload bytes carried by every later packet except the last.
pub const MAX_IMG_PACKET_SIZE: usize = 1000;

/// Images per outbound request message.
pub const IMAGES_PER_REQUEST: usize = 50;

/// One entry of an outbound image request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub id: ImageId,
    pub discard: u8,
    pub priority: f32,
    /// First packet the host should (re)send.
    pub packet: u16,
}

/// Outbound half of the datagram transport.
///
/// Both calls are fire-and-forget; inbound data arrives through the fetch
/// manager's `receive_image_header` / `receive_image_packet`.
pub trait DatagramTransport: Send + Sync + 'static {
    /// Ask `host` to stream the listed images.
    fn request_images(&self, host: Host, requests: &[ImageRequest]);

    /// Tell `host` to stop streaming the listed images.
    fn cancel_images(&self, host: Host, ids: &[ImageId]);
}

/// Transport for deployments without a simulator connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl DatagramTransport for NullTransport {
    fn request_images(&self, host: Host, requests: &[ImageRequest]) {
        debug!(%host, count = requests.len(), "dropping image requests (no datagram transport)");
    }

    fn cancel_images(&self, host: Host, ids: &[ImageId]) {
        debug!(%host, count = ids.len(), "dropping image cancels (no datagram transport)");
    }
}
