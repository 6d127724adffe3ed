//! End-to-end tests of the fetch manager over the cache and HTTP paths.
//!
//! These tests drive the public facade the way a render loop does: create
//! requests, call `update` every few milliseconds and poll for results.

mod common;

use std::time::{Duration, Instant};

use bytes::Bytes;
use texfetch::cache::{CachedImage, ImageCache, VersionTag};
use texfetch::fetch::{FetchFailure, FetchOutcome, FetchRequest, FetchState, TransportKind};
use texfetch::ImageId;

use common::*;

const URL: &str = "http://origin.test/textures/a.j2c";

fn decoded(outcome: FetchOutcome) -> texfetch::decode::DecodedImage {
    match outcome {
        FetchOutcome::Decoded(image) => image,
        FetchOutcome::Failed(failure) => panic!("expected a decoded image, got {failure}"),
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_http_fetch_without_cache_entry() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0xA);
    h.http.serve(URL, stream(4000));

    assert!(h.manager.create_request(
        FetchRequest::new(id)
            .with_url(URL)
            .with_priority(1.0)
            .with_discard(0)
    ));
    let image = decoded(wait_finished(&h.manager, id));

    assert_eq!(image.discard, 0);
    assert_eq!(image.raw.width, 4000);
    let requests = h.http.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].range.is_none());

    let record = h.manager.download_record(id).unwrap();
    assert_eq!(record.source, TransportKind::Http);
    assert_eq!(record.bytes, 4000);

    // Fresh network bytes are written back.
    assert!(h.cache.contains(id));
    assert_eq!(h.manager.get_request_finished(id), None);
}

#[test]
fn test_coarse_cache_hit_fetches_finer_level() {
    let h = harness(TestDecoder::progressive());
    let id = ImageId::from_u128(0xD);
    let full = stream(32768);
    h.http.serve(URL, full.clone());
    // 600 bytes is enough for discard 4 of a 256x256x4 image, not for 1.
    seed_cache(&h.cache, id, CachedImage::new(full.slice(..600), Some(32768)));

    h.manager.create_request(
        FetchRequest::new(id)
            .with_url(URL)
            .with_dimensions(256, 256, 4)
            .with_discard(1),
    );
    let image = decoded(wait_finished(&h.manager, id));

    assert_eq!(image.discard, 1);
    assert_eq!(image.raw.width, 8192);
    let requests = h.http.requests();
    assert_eq!(requests.len(), 1);
    let range = requests[0].range.unwrap();
    assert_eq!(range.offset, 600);
    assert_eq!(range.length, Some(7592));
    assert_eq!(h.manager.stats().cache_hits, 1);
}

// =============================================================================
// Cache
// =============================================================================

#[test]
fn test_complete_cache_hit_skips_network() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x10);
    seed_cache(&h.cache, id, CachedImage::new(stream(800), Some(800)));

    h.manager.create_request(FetchRequest::new(id).with_url(URL));
    pump_until(&h.manager, || {
        h.manager
            .fetch_state(id)
            .filter(|info| info.state == FetchState::Done)
    });

    assert!(h.manager.is_from_local_cache(id));
    let image = decoded(h.manager.get_request_finished(id).unwrap());
    assert_eq!(image.raw.width, 800);
    assert!(h.http.requests().is_empty());
    assert!(h.manager.download_record(id).is_none());
}

#[test]
fn test_tampered_cache_entry_is_replaced_from_network() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x11);
    h.http.serve(URL, stream(1500));
    seed_cache(
        &h.cache,
        id,
        CachedImage {
            data: stream(1000),
            image_size: Some(1000),
            version: VersionTag(0),
        },
    );

    h.manager.create_request(FetchRequest::new(id).with_url(URL));
    let image = decoded(wait_finished(&h.manager, id));

    assert_eq!(image.raw.width, 1500);
    assert_eq!(h.manager.stats().corrupt_cache_entries, 1);
    let cached = futures::executor::block_on(h.cache.lookup(id))
        .unwrap()
        .unwrap();
    assert_eq!(cached.data.len(), 1500);
    assert!(cached.verify());
}

#[test]
fn test_undecodable_cache_entry_falls_back_to_http() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x12);
    h.http.serve(URL, stream(1200));
    seed_cache(
        &h.cache,
        id,
        CachedImage::new(Bytes::from_static(b"BAD cached bytes"), Some(16)),
    );

    h.manager.create_request(FetchRequest::new(id).with_url(URL));
    let image = decoded(wait_finished(&h.manager, id));

    assert_eq!(image.raw.width, 1200);
    let stats = h.manager.stats();
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.corrupt_cache_entries, 1);
    assert_eq!(h.http.requests_for(URL), 1);
}

// =============================================================================
// Failures and retries
// =============================================================================

#[test]
fn test_http_retry_after_server_error() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x20);
    h.http.serve(URL, stream(900));
    h.http.fail_next(URL, 503);

    h.manager.create_request(FetchRequest::new(id).with_url(URL));
    let image = decoded(wait_finished(&h.manager, id));

    assert_eq!(image.raw.width, 900);
    assert_eq!(h.http.requests_for(URL), 2);
    assert_eq!(h.manager.stats().http_failures, 1);
}

#[test]
fn test_http_attempts_are_bounded() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x21);
    let missing = "http://origin.test/missing.j2c";

    h.manager.create_request(FetchRequest::new(id).with_url(missing));
    let outcome = wait_finished(&h.manager, id);

    assert_eq!(
        outcome,
        FetchOutcome::Failed(FetchFailure::SourcesExhausted {
            http_attempts: 3,
            datagram_attempts: 0,
        })
    );
    assert_eq!(h.http.requests_for(missing), 3);
    assert_eq!(h.manager.stats().requests_failed, 1);
}

#[test]
fn test_request_without_source_fails_after_cache_miss() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x22);

    assert!(h.manager.create_request(FetchRequest::new(id)));
    assert_eq!(
        wait_finished(&h.manager, id),
        FetchOutcome::Failed(FetchFailure::NoSource)
    );
}

#[test]
fn test_network_decode_failure_is_retried_then_reported() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x23);
    h.http.serve(URL, Bytes::from_static(b"BAD stream from origin"));

    h.manager.create_request(FetchRequest::new(id).with_url(URL));
    let outcome = wait_finished(&h.manager, id);

    assert!(matches!(
        outcome,
        FetchOutcome::Failed(FetchFailure::DecodeFailed(_))
    ));
    assert_eq!(h.decoder.decodes(), 2);
    assert!(!h.cache.contains(id));
}

// =============================================================================
// Request table properties
// =============================================================================

#[test]
fn test_duplicate_create_shares_one_worker() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x30);
    h.http.serve(URL, stream(700));
    h.http.set_delay(Duration::from_millis(100));

    assert!(h.manager.create_request(FetchRequest::new(id).with_url(URL).with_priority(1.0)));
    h.manager.update(Duration::from_millis(5));
    assert!(h.manager.create_request(FetchRequest::new(id).with_url(URL).with_priority(5.0)));
    assert_eq!(h.manager.num_requests(), 1);

    decoded(wait_finished(&h.manager, id));
    pump_for(&h.manager, Duration::from_millis(50));

    assert_eq!(h.http.requests_for(URL), 1);
    let stats = h.manager.stats();
    assert_eq!(stats.requests_created, 1);
    assert_eq!(stats.requests_merged, 1);
    assert_eq!(h.manager.get_request_finished(id), None);
}

#[test]
fn test_every_request_yields_exactly_one_result() {
    let h = harness(TestDecoder::whole_stream());
    let ok = ImageId::from_u128(0x31);
    let missing = ImageId::from_u128(0x32);
    let sourceless = ImageId::from_u128(0x33);
    h.http.serve(URL, stream(1000));

    h.manager.create_request(FetchRequest::new(ok).with_url(URL));
    h.manager
        .create_request(FetchRequest::new(missing).with_url("http://origin.test/404"));
    h.manager.create_request(FetchRequest::new(sourceless));

    let mut results = Vec::new();
    pump_until(&h.manager, || {
        for id in [ok, missing, sourceless] {
            if let Some(outcome) = h.manager.get_request_finished(id) {
                results.push((id, outcome));
            }
        }
        (results.len() >= 3).then_some(())
    });
    pump_for(&h.manager, Duration::from_millis(50));

    assert_eq!(results.len(), 3);
    for id in [ok, missing, sourceless] {
        assert_eq!(results.iter().filter(|(r, _)| *r == id).count(), 1);
        assert_eq!(h.manager.get_request_finished(id), None);
    }
    assert_eq!(h.manager.num_requests(), 0);
}

#[test]
fn test_zero_budget_updates_still_finish_requests() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x34);
    h.http.serve(URL, stream(1500));
    assert!(h.manager.create_request(FetchRequest::new(id).with_url(URL)));

    let deadline = Instant::now() + TEST_TIMEOUT;
    let outcome = loop {
        h.manager.update(Duration::ZERO);
        if let Some(outcome) = h.manager.get_request_finished(id) {
            break outcome;
        }
        assert!(Instant::now() < deadline, "request never finished");
        std::thread::sleep(Duration::from_millis(2));
    };

    assert_eq!(decoded(outcome).raw.width, 1500);
    assert_eq!(h.http.requests_for(URL), 1);
    assert_eq!(h.manager.num_requests(), 0);
}

#[test]
fn test_delete_is_idempotent() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x34);
    h.http.serve(URL, stream(500));

    h.manager.delete_request(ImageId::from_u128(0x99), true);

    h.manager.create_request(FetchRequest::new(id).with_url(URL));
    decoded(wait_finished(&h.manager, id));
    h.manager.delete_request(id, true);
    h.manager.delete_request(id, false);

    let live = ImageId::from_u128(0x35);
    h.http.set_delay(Duration::from_millis(200));
    h.manager.create_request(FetchRequest::new(live).with_url(URL));
    h.manager.update(Duration::from_millis(5));
    h.manager.delete_request(live, true);
    h.manager.delete_request(live, true);

    pump_for(&h.manager, Duration::from_millis(300));
    assert_eq!(h.manager.stats().requests_deleted, 1);
    assert_eq!(h.manager.get_request_finished(live), None);
    assert_eq!(h.manager.num_requests(), 0);
    assert_eq!(h.manager.num_http_requests(), 0);
}

// =============================================================================
// Refinement
// =============================================================================

fn wait_done(h: &Harness, id: ImageId) {
    pump_until(&h.manager, || {
        h.manager
            .fetch_state(id)
            .filter(|info| info.state == FetchState::Done)
    });
}

#[test]
fn test_finer_request_refines_finished_worker() {
    let h = harness(TestDecoder::progressive());
    let id = ImageId::from_u128(0x40);
    h.http.serve(URL, stream(32768));

    let request = FetchRequest::new(id)
        .with_url(URL)
        .with_dimensions(256, 256, 4);
    h.manager.create_request(request.clone().with_discard(2));
    wait_done(&h, id);

    h.manager.create_request(request.with_discard(0));
    let coarse = decoded(h.manager.get_request_finished(id).unwrap());
    let fine = decoded(wait_finished(&h.manager, id));

    assert_eq!(coarse.discard, 2);
    assert_eq!(fine.discard, 0);
    assert!(fine.discard <= coarse.discard);
    assert_eq!(fine.raw.width, 32768);

    let ranges: Vec<_> = h
        .http
        .requests()
        .iter()
        .map(|r| r.range.map(|range| range.offset))
        .collect();
    assert_eq!(ranges, vec![Some(0), Some(2048)]);
}

#[test]
fn test_coarser_request_does_not_refetch() {
    let h = harness(TestDecoder::progressive());
    let id = ImageId::from_u128(0x41);
    h.http.serve(URL, stream(32768));

    let request = FetchRequest::new(id)
        .with_url(URL)
        .with_dimensions(256, 256, 4);
    h.manager.create_request(request.clone().with_discard(1));
    wait_done(&h, id);

    h.manager.create_request(request.with_discard(4));
    pump_for(&h.manager, Duration::from_millis(50));

    let image = decoded(h.manager.get_request_finished(id).unwrap());
    assert_eq!(image.discard, 1);
    assert_eq!(h.http.requests().len(), 1);
}

#[test]
fn test_aux_channel_is_delivered_when_requested() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x42);
    h.http.serve(URL, stream(640));

    h.manager
        .create_request(FetchRequest::new(id).with_url(URL).with_aux(true));
    let image = decoded(wait_finished(&h.manager, id));
    assert!(image.aux.is_some());
}

// =============================================================================
// Diagnostics and lifecycle
// =============================================================================

#[test]
fn test_diagnostics_while_waiting_on_http() {
    let h = harness(TestDecoder::whole_stream());
    let id = ImageId::from_u128(0x50);
    h.http.serve(URL, stream(512));
    h.http.set_delay(Duration::from_millis(300));

    h.manager
        .create_request(FetchRequest::new(id).with_url(URL).with_priority(3.0));
    let info = pump_until(&h.manager, || {
        h.manager
            .fetch_state(id)
            .filter(|info| info.state == FetchState::WaitingOnNetwork)
    });

    assert_eq!(info.transport, Some(TransportKind::Http));
    assert!(info.can_use_http);
    assert!(!info.from_local_cache);
    assert_eq!(info.requested_priority, 3.0);
    assert!(info.fetch_elapsed.is_some());
    assert!(info.request_elapsed.is_some());
    assert_eq!(h.manager.num_http_requests(), 1);

    assert!(h.manager.update_request_priority(id, 8.0));
    assert_eq!(h.manager.fetch_state(id).unwrap().requested_priority, 8.0);

    decoded(wait_finished(&h.manager, id));
    assert_eq!(h.manager.num_http_requests(), 0);
    assert!(h.manager.fetch_state(id).is_none());
}

#[test]
fn test_shutdown_stops_pending_work() {
    let h = harness(TestDecoder::whole_stream());
    h.http.serve(URL, stream(512));
    h.http.set_delay(Duration::from_secs(5));

    for n in 0..4u128 {
        h.manager
            .create_request(FetchRequest::new(ImageId::from_u128(0x60 + n)).with_url(URL));
    }
    pump_until(&h.manager, || {
        (h.manager.num_http_requests() > 0).then_some(())
    });

    h.manager.shutdown();

    assert!(h.manager.is_shut_down());
    assert_eq!(h.manager.num_requests(), 0);
    assert_eq!(h.manager.num_http_requests(), 0);
    assert!(!h
        .manager
        .create_request(FetchRequest::new(ImageId::from_u128(0x70)).with_url(URL)));
}
