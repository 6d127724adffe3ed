//! Mock collaborators and polling helpers shared by the pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use texfetch::cache::{CachedImage, ImageCache, MemoryImageCache};
use texfetch::decode::{
    estimate_data_size, DecodeError, DecodedImage, ImageCodec, ImageDecoder, RawImage,
};
use texfetch::fetch::{FetchConfig, FetchManager, FetchOutcome};
use texfetch::http::{HttpClient, HttpError, HttpRequest, HttpResponse};
use texfetch::transport::{DatagramTransport, ImageRequest, FIRST_PACKET_SIZE, MAX_IMG_PACKET_SIZE};
use texfetch::{BoxFuture, Host, ImageId};

/// Upper bound on any single wait in these tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const HOST: &str = "127.0.0.1:13000";

pub fn host() -> Host {
    HOST.parse().unwrap()
}

/// Deterministic compressed stream of `len` bytes. Never starts with `BAD`.
pub fn stream(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

// =============================================================================
// HTTP
// =============================================================================

/// In-memory HTTP origin that honors byte ranges.
///
/// Unknown URLs answer 404. Statuses queued with [`MockHttp::fail_next`] are
/// returned (with an empty body) before the real content.
#[derive(Default)]
pub struct MockHttp {
    files: Mutex<HashMap<String, Bytes>>,
    scripted: Mutex<HashMap<String, VecDeque<u16>>>,
    log: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: Bytes) {
        self.files.lock().insert(url.to_string(), body);
    }

    pub fn fail_next(&self, url: &str, status: u16) {
        self.scripted
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(status);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().clone()
    }

    pub fn requests_for(&self, url: &str) -> usize {
        self.log.lock().iter().filter(|r| r.url == url).count()
    }
}

impl HttpClient for MockHttp {
    fn get(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>> {
        self.log.lock().push(request.clone());
        let scripted = self
            .scripted
            .lock()
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front);
        let body = self.files.lock().get(&request.url).cloned();
        let delay = *self.delay.lock();

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(status) = scripted {
                return Ok(HttpResponse::new(status, Bytes::new()));
            }
            let Some(body) = body else {
                return Ok(HttpResponse::new(404, Bytes::new()));
            };
            let Some(range) = request.range else {
                return Ok(HttpResponse::new(HttpResponse::OK, body));
            };

            let offset = range.offset as usize;
            if offset >= body.len() {
                return Ok(HttpResponse::new(
                    HttpResponse::RANGE_NOT_SATISFIABLE,
                    Bytes::new(),
                ));
            }
            let end = match range.length {
                Some(length) if length > 0 => (offset + length as usize).min(body.len()),
                _ => body.len(),
            };
            Ok(HttpResponse::new(
                HttpResponse::PARTIAL_CONTENT,
                body.slice(offset..end),
            ))
        })
    }
}

// =============================================================================
// Datagram transport
// =============================================================================

/// Records every outbound message instead of sending it.
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<(Host, Vec<ImageRequest>)>>,
    cancels: Mutex<Vec<(Host, Vec<ImageId>)>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every image request sent for `id`, in order.
    pub fn requests_for(&self, id: ImageId) -> Vec<ImageRequest> {
        self.requests
            .lock()
            .iter()
            .flat_map(|(_, batch)| batch.iter().filter(|r| r.id == id).cloned())
            .collect()
    }

    pub fn request_messages(&self) -> Vec<(Host, Vec<ImageRequest>)> {
        self.requests.lock().clone()
    }

    pub fn cancelled(&self, host: Host, id: ImageId) -> bool {
        self.cancels
            .lock()
            .iter()
            .any(|(h, ids)| *h == host && ids.contains(&id))
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.lock().iter().map(|(_, ids)| ids.len()).sum()
    }
}

impl DatagramTransport for RecordingTransport {
    fn request_images(&self, host: Host, requests: &[ImageRequest]) {
        self.requests.lock().push((host, requests.to_vec()));
    }

    fn cancel_images(&self, host: Host, ids: &[ImageId]) {
        self.cancels.lock().push((host, ids.to_vec()));
    }
}

/// Split a stream into its header chunk and numbered packets.
pub fn packetize(data: &Bytes) -> (Bytes, Vec<(u16, Bytes)>) {
    let first = data.slice(..FIRST_PACKET_SIZE.min(data.len()));
    let packets = data[first.len()..]
        .chunks(MAX_IMG_PACKET_SIZE)
        .enumerate()
        .map(|(i, chunk)| ((i + 1) as u16, Bytes::copy_from_slice(chunk)))
        .collect();
    (first, packets)
}

// =============================================================================
// Decoder
// =============================================================================

/// Decoder that "decodes" to a 1-pixel-high strip as wide as the input.
///
/// Input starting with `BAD` fails. Progressive mode uses the default
/// progressive size estimate; whole-stream mode needs every byte.
pub struct TestDecoder {
    progressive: bool,
    decodes: AtomicUsize,
}

impl TestDecoder {
    pub fn progressive() -> Arc<Self> {
        Arc::new(Self {
            progressive: true,
            decodes: AtomicUsize::new(0),
        })
    }

    pub fn whole_stream() -> Arc<Self> {
        Arc::new(Self {
            progressive: false,
            decodes: AtomicUsize::new(0),
        })
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl ImageDecoder for TestDecoder {
    fn decode(
        &self,
        _id: ImageId,
        _codec: ImageCodec,
        data: Bytes,
        discard: u8,
        needs_aux: bool,
    ) -> BoxFuture<'_, Result<DecodedImage, DecodeError>> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if data.starts_with(b"BAD") {
                return Err(DecodeError::InvalidData("bad magic".into()));
            }
            Ok(DecodedImage {
                discard,
                raw: RawImage::new(data.len() as u32, 1, 1, data.to_vec()),
                aux: needs_aux.then(|| RawImage::new(1, 1, 1, vec![255])),
            })
        })
    }

    fn data_size(&self, width: u32, height: u32, components: u8, discard: u8) -> Option<usize> {
        if self.progressive {
            estimate_data_size(width, height, components, discard)
        } else {
            None
        }
    }

    fn name(&self) -> &str {
        "test"
    }
}

// =============================================================================
// Manager and polling
// =============================================================================

pub struct Harness {
    pub manager: FetchManager,
    pub http: Arc<MockHttp>,
    pub transport: Arc<RecordingTransport>,
    pub cache: Arc<MemoryImageCache>,
    pub decoder: Arc<TestDecoder>,
}

pub fn test_config() -> FetchConfig {
    FetchConfig::default()
        .with_worker_threads(2)
        .with_http_timeout(Duration::from_secs(2))
        .with_datagram_timeout(Duration::from_millis(150))
}

pub fn harness(decoder: Arc<TestDecoder>) -> Harness {
    harness_with(test_config(), decoder)
}

pub fn harness_with(config: FetchConfig, decoder: Arc<TestDecoder>) -> Harness {
    let http = MockHttp::new();
    let transport = RecordingTransport::new();
    let cache = Arc::new(MemoryImageCache::new(16 * 1024 * 1024));
    let manager = FetchManager::builder(config)
        .with_cache(Arc::clone(&cache) as Arc<dyn ImageCache>)
        .with_decoder(Arc::clone(&decoder) as Arc<dyn ImageDecoder>)
        .with_http_client(Arc::clone(&http) as Arc<dyn HttpClient>)
        .with_transport(Arc::clone(&transport) as Arc<dyn DatagramTransport>)
        .build()
        .unwrap();

    Harness {
        manager,
        http,
        transport,
        cache,
        decoder,
    }
}

/// Seed the cache before any worker runs.
pub fn seed_cache(cache: &MemoryImageCache, id: ImageId, image: CachedImage) {
    futures::executor::block_on(cache.store(id, image)).unwrap();
}

/// Run `update` passes until `probe` yields a value.
pub fn pump_until<T>(manager: &FetchManager, mut probe: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + TEST_TIMEOUT;
    loop {
        manager.update(Duration::from_millis(5));
        if let Some(value) = probe() {
            return value;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting on the fetch pipeline"
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Run `update` passes for roughly `duration`.
pub fn pump_for(manager: &FetchManager, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        manager.update(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub fn wait_finished(manager: &FetchManager, id: ImageId) -> FetchOutcome {
    pump_until(manager, || manager.get_request_finished(id))
}
