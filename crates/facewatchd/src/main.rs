use anyhow::{Context, Result};
use facewatch_core::{FaceModel, MatcherSlot};
use facewatch_hw::{Camera, CameraSource};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod http;
mod references;
mod scheduler;
mod upload;

#[cfg(test)]
mod testing;

use config::Config;
use dbus_interface::FacewatchService;
use engine::RecognitionPipeline;
use references::ReferenceIndex;
use scheduler::CaptureScheduler;
use upload::{HttpUploadSink, UploadPolicy};

const BUS_NAME: &str = "org.facewatch.Daemon1";
const OBJECT_PATH: &str = "/org/facewatch/Daemon1";
/// How long shutdown waits for an in-flight attempt.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facewatchd starting");

    let config = Config::from_env();
    tracing::info!(
        device = %config.camera_device,
        mode = %config.schedule_mode,
        interval_ms = config.tick_interval.as_millis() as u64,
        threshold = config.match_threshold,
        model = %config.model_endpoint,
        upload = %config.upload_policy,
        "configuration loaded"
    );

    // Fail fast if the camera is missing; nothing else is useful without it.
    let camera = Camera::open(
        &config.camera_device,
        config.capture_width,
        config.capture_height,
    )
    .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    let warmup_frames = config.warmup_frames;
    let camera = tokio::task::spawn_blocking(move || {
        camera.warm_up(warmup_frames);
        camera
    })
    .await
    .context("camera warmup task failed")?;
    let source = Arc::new(CameraSource::new(camera));

    let client = http::build_client(config.http_timeout).context("failed to build HTTP client")?;
    let model: Arc<dyn FaceModel> =
        Arc::new(http::HttpFaceModel::new(client.clone(), &config.model_endpoint));
    let matchers = Arc::new(MatcherSlot::new());

    let mut pipeline = RecognitionPipeline::new(source, Arc::clone(&model), Arc::clone(&matchers));
    if let Some(endpoint) = &config.upload_endpoint {
        if config.upload_policy != UploadPolicy::Off {
            tracing::info!(endpoint = %endpoint, policy = %config.upload_policy, "uploads enabled");
            pipeline = pipeline.with_upload(
                Arc::new(HttpUploadSink::new(client.clone(), endpoint)),
                config.upload_policy,
                config.location,
            );
        }
    }
    let pipeline = Arc::new(pipeline);

    let index = config.reference_source.as_deref().map(|reference_source| {
        let fetcher = Arc::new(http::HttpFetcher::new(client.clone()));
        Arc::new(ReferenceIndex::new(
            Arc::new(http::HttpReferenceStore::new(
                Arc::clone(&fetcher),
                reference_source,
            )),
            fetcher,
            Arc::clone(&model),
            Arc::clone(&matchers),
            config.match_threshold,
        ))
    });

    match &index {
        Some(index) => {
            let index = Arc::clone(index);
            tokio::spawn(async move {
                if let Err(err) = index.rebuild().await {
                    tracing::warn!(error = %err, "initial reference build failed");
                }
            });
        }
        None => tracing::warn!(
            "FACEWATCH_REFERENCE_SOURCE not set; recognition unavailable until configured"
        ),
    }

    let scheduler = Arc::new(CaptureScheduler::new(
        Arc::clone(&pipeline),
        config.tick_interval,
        config.schedule_mode,
    ));
    if config.autostart {
        scheduler.start();
    } else {
        tracing::info!("autostart disabled; waiting for Start()");
    }

    let service = FacewatchService::new(
        Arc::clone(&scheduler),
        Arc::clone(&pipeline),
        index,
        Arc::clone(&matchers),
        config.match_threshold,
    );
    let _connection = match serve_dbus(service).await {
        Ok(connection) => {
            tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");
            Some(connection)
        }
        Err(err) => {
            tracing::warn!(error = %err, "D-Bus unavailable; running without control interface");
            None
        }
    };

    tracing::info!("facewatchd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facewatchd shutting down");

    scheduler.stop();
    let drain = async {
        while pipeline.lock().is_held() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("recognition attempt still running at shutdown; abandoning it");
    }

    Ok(())
}

async fn serve_dbus(service: FacewatchService) -> zbus::Result<zbus::Connection> {
    zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
}
