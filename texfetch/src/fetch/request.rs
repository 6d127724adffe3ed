//! Caller-supplied request parameters.

use crate::decode::MAX_DISCARD_LEVEL;
use crate::fetch::FetchError;
use crate::id::{Host, ImageId};

/// Everything the caller says about an image it wants.
///
/// # Example
///
/// ```
/// use texfetch::fetch::FetchRequest;
/// use texfetch::id::ImageId;
///
/// let request = FetchRequest::new(ImageId::from_u128(42))
///     .with_url("https://assets.example.net/textures/42")
///     .with_priority(2.5)
///     .with_dimensions(512, 512, 4)
///     .with_discard(1);
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub id: ImageId,
    pub url: Option<String>,
    pub host: Option<Host>,
    /// Higher is more urgent.
    pub priority: f32,
    pub width: u32,
    pub height: u32,
    pub components: u8,
    /// Desired discard level; lower is finer.
    pub discard: u8,
    pub needs_aux: bool,
    pub allow_http: bool,
}

impl FetchRequest {
    /// Request for `id` at full detail with HTTP allowed.
    pub fn new(id: ImageId) -> Self {
        Self {
            id,
            url: None,
            host: None,
            priority: 0.0,
            width: 0,
            height: 0,
            components: 0,
            discard: 0,
            needs_aux: false,
            allow_http: true,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_host(mut self, host: Host) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32, components: u8) -> Self {
        self.width = width;
        self.height = height;
        self.components = components;
        self
    }

    pub fn with_discard(mut self, discard: u8) -> Self {
        self.discard = discard;
        self
    }

    pub fn with_aux(mut self, needs_aux: bool) -> Self {
        self.needs_aux = needs_aux;
        self
    }

    pub fn with_http(mut self, allow_http: bool) -> Self {
        self.allow_http = allow_http;
        self
    }

    /// Reject structurally invalid requests.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.id.is_nil() {
            return Err(FetchError::InvalidRequest("null image identity".into()));
        }
        if self.discard > MAX_DISCARD_LEVEL {
            return Err(FetchError::InvalidRequest(format!(
                "discard level {} exceeds {}",
                self.discard, MAX_DISCARD_LEVEL
            )));
        }
        if !self.priority.is_finite() {
            return Err(FetchError::InvalidRequest(format!(
                "priority {} is not finite",
                self.priority
            )));
        }
        Ok(())
    }

    /// URL usable for HTTP, if HTTP is allowed.
    pub(crate) fn http_url(&self) -> Option<&str> {
        if self.allow_http {
            self.url.as_deref().filter(|url| !url.is_empty())
        } else {
            None
        }
    }

    /// Fold a repeated request for the same identity into this one.
    ///
    /// Priority follows the newest request; the desired discard only ever
    /// gets finer. Returns true if more detail (or a newly wanted auxiliary
    /// channel) is now asked for.
    pub(crate) fn merge(&mut self, newer: &FetchRequest) -> bool {
        let wants_aux = newer.needs_aux && !self.needs_aux;
        self.priority = newer.priority;
        self.needs_aux |= newer.needs_aux;
        self.allow_http = newer.allow_http;
        if newer.url.is_some() {
            self.url = newer.url.clone();
        }
        if newer.host.is_some() {
            self.host = newer.host;
        }
        if newer.width > 0 && newer.height > 0 {
            self.width = newer.width;
            self.height = newer.height;
            self.components = newer.components;
        }
        let finer = newer.discard < self.discard;
        if finer {
            self.discard = newer.discard;
        }
        finer || wants_aux
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_identity_rejected() {
        assert!(FetchRequest::new(ImageId::NIL).validate().is_err());
    }

    #[test]
    fn test_discard_bound() {
        let id = ImageId::from_u128(1);
        assert!(FetchRequest::new(id).with_discard(5).validate().is_ok());
        assert!(FetchRequest::new(id).with_discard(6).validate().is_err());
    }

    #[test]
    fn test_nan_priority_rejected() {
        let request = FetchRequest::new(ImageId::from_u128(1)).with_priority(f32::NAN);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_sourceless_request_is_valid() {
        assert!(FetchRequest::new(ImageId::from_u128(1)).validate().is_ok());
    }

    #[test]
    fn test_http_url_respects_flag() {
        let request = FetchRequest::new(ImageId::from_u128(1)).with_url("http://a/b");
        assert_eq!(request.http_url(), Some("http://a/b"));
        assert_eq!(request.with_http(false).http_url(), None);
    }

    #[test]
    fn test_merge_only_refines() {
        let id = ImageId::from_u128(1);
        let mut current = FetchRequest::new(id).with_discard(2).with_priority(1.0);

        assert!(!current.merge(&FetchRequest::new(id).with_discard(3).with_priority(4.0)));
        assert_eq!(current.discard, 2);
        assert_eq!(current.priority, 4.0);

        assert!(current.merge(&FetchRequest::new(id).with_discard(0).with_aux(true)));
        assert_eq!(current.discard, 0);
        assert!(current.needs_aux);
    }
}
