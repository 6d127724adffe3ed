//! Identity types shared by every stage of the pipeline.
//!
//! [`ImageId`] keys the request table, both transport queues, the cache and
//! every log line. [`Host`] names the simulator endpoint that streams image
//! packets over the datagram transport.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use uuid::Uuid;

/// 128-bit identity of an image asset.
///
/// The nil UUID is reserved as the "no image" value and is never accepted
/// by the fetch manager.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ImageId(Uuid);

impl ImageId {
    /// The null identity.
    pub const NIL: ImageId = ImageId(Uuid::nil());

    /// Wrap an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Build an identity from its 128-bit integer form.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Generate a random identity.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns true for the null identity.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Lowercase hex without hyphens, used for cache file names.
    pub fn to_simple_string(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageId({})", self.0.hyphenated())
    }
}

impl FromStr for ImageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for ImageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Simulator endpoint that streams image data over the datagram transport.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Host(SocketAddr);

impl Host {
    pub const fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Host({})", self.0)
    }
}

impl From<SocketAddr> for Host {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl FromStr for Host {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_identity() {
        assert!(ImageId::NIL.is_nil());
        assert!(ImageId::default().is_nil());
        assert!(!ImageId::from_u128(1).is_nil());
    }

    #[test]
    fn test_parse_and_display() {
        let text = "6f1c0b3a-52d7-4c3e-9a4b-0c8d2e1f7a90";
        let id: ImageId = text.parse().unwrap();
        assert_eq!(id.to_string(), text);
        assert_eq!(id.to_simple_string(), text.replace('-', ""));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<ImageId>().is_err());
    }

    #[test]
    fn test_host_parse() {
        let host: Host = "10.0.0.2:13005".parse().unwrap();
        assert_eq!(host.addr().port(), 13005);
        assert_eq!(host.to_string(), "10.0.0.2:13005");
    }
}
