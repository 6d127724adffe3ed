//! Fetch command - pull one image through the pipeline and save it as PNG.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::ColorType;
use tracing::info;

use texfetch::cache::{DiskImageCache, ImageCache, NullImageCache};
use texfetch::config::format_size;
use texfetch::decode::{ImageCrateDecoder, RawImage};
use texfetch::fetch::{FetchConfig, FetchError, FetchManager, FetchOutcome, FetchRequest};
use texfetch::http::ReqwestHttpClient;
use texfetch::ImageId;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Interval between `update` passes, roughly one 60 Hz frame.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Per-frame time budget handed to `update`.
const UPDATE_BUDGET: Duration = Duration::from_millis(2);

/// Arguments for the fetch command.
pub struct FetchArgs {
    pub id: ImageId,
    pub url: Option<String>,
    pub discard: u8,
    pub priority: f32,
    pub aux: bool,
    pub output: Option<PathBuf>,
    pub timeout: Duration,
    pub no_cache: bool,
}

/// Run the fetch command.
pub fn run(args: FetchArgs) -> Result<(), CliError> {
    let runner = CliRunner::new()?;
    runner.log_startup("fetch");
    let config = runner.config();

    let mut request = FetchRequest::new(args.id)
        .with_priority(args.priority)
        .with_discard(args.discard)
        .with_aux(args.aux);
    if let Some(url) = &args.url {
        request = request.with_url(url.clone());
    }
    request
        .validate()
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;

    let cache: Arc<dyn ImageCache> = if args.no_cache {
        Arc::new(NullImageCache)
    } else {
        Arc::new(DiskImageCache::open(&config.cache.directory)?)
    };
    let http = ReqwestHttpClient::new(&config.http_client_config())
        .map_err(FetchError::from)?;

    let manager = FetchManager::builder(FetchConfig::from(config))
        .with_cache(cache)
        .with_decoder(Arc::new(ImageCrateDecoder::new()))
        .with_http_client(Arc::new(http))
        .build()?;

    println!("Fetching {}", args.id);
    if let Some(url) = &args.url {
        println!("  URL:     {}", url);
    }
    println!("  Discard: {}", args.discard);

    let started = Instant::now();
    manager.create_request(request);
    let outcome = poll_until_finished(&manager, args.id, args.timeout)?;
    let elapsed = started.elapsed();

    let image = match outcome {
        FetchOutcome::Decoded(image) => image,
        FetchOutcome::Failed(failure) => return Err(CliError::FetchFailed(failure)),
    };

    println!();
    println!(
        "Decoded {}x{} ({} components) at discard {} in {:.2}s",
        image.raw.width,
        image.raw.height,
        image.raw.components,
        image.discard,
        elapsed.as_secs_f64()
    );
    if let Some(source) = source_summary(&manager, args.id) {
        println!("  Source:  {}", source);
    }
    if let Some(aux) = &image.aux {
        println!("  Aux:     {}x{}", aux.width, aux.height);
    }

    if let Some(path) = &args.output {
        save_png(path, &image.raw)?;
        println!("Saved {}", path.display());
    }

    let stats = manager.stats();
    info!(
        http_requests = stats.http_requests,
        http_bytes = stats.http_bytes,
        cache_hits = stats.cache_hits,
        "fetch command finished"
    );
    manager.shutdown();
    Ok(())
}

/// Drive `update` at frame rate until the result for `id` is available.
fn poll_until_finished(
    manager: &FetchManager,
    id: ImageId,
    timeout: Duration,
) -> Result<FetchOutcome, CliError> {
    let deadline = Instant::now() + timeout;
    loop {
        manager.update(UPDATE_BUDGET);
        if let Some(outcome) = manager.get_request_finished(id) {
            return Ok(outcome);
        }
        if Instant::now() >= deadline {
            manager.delete_request(id, true);
            return Err(CliError::Timeout(timeout));
        }
        std::thread::sleep(FRAME_INTERVAL);
    }
}

/// Where the finished image came from.
///
/// Works after the result has been taken: download records outlive the
/// worker, and this command only ever runs one request, so any cache hit
/// is this image's.
fn source_summary(manager: &FetchManager, id: ImageId) -> Option<String> {
    if let Some(record) = manager.download_record(id) {
        return Some(format!(
            "{} ({} in {:.2}s)",
            record.source,
            format_size(record.bytes),
            record.duration().as_secs_f64()
        ));
    }
    (manager.stats().cache_hits > 0).then(|| "local cache".to_string())
}

/// Write raw pixels as PNG.
pub fn save_png(path: &Path, raw: &RawImage) -> Result<(), CliError> {
    let color = match raw.components {
        1 => ColorType::L8,
        2 => ColorType::La8,
        3 => ColorType::Rgb8,
        4 => ColorType::Rgba8,
        n => {
            return Err(CliError::InvalidArgument(format!(
                "cannot save an image with {} components",
                n
            )))
        }
    };

    image::save_buffer(path, &raw.data, raw.width, raw.height, color).map_err(|e| {
        CliError::FileWrite {
            path: path.to_path_buf(),
            error: e.to_string(),
        }
    })
}
