//! Detection stream server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use cam_source::{replay::ImageDirSource, CaptureSource};
use clap::Parser;
use detect_server::{
    context::PipelineContext,
    detection::Thresholds,
    endpoints::router,
    meter::spawn_meter_logger,
    nn::{ModelSpec, YoloModel},
    pipeline::PipelineSettings,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the HTTP endpoints on
    #[clap(long, default_value = "127.0.0.1:5000")]
    server_address: String,

    /// ONNX weights of the detection model
    #[clap(long, default_value = "best.onnx")]
    model: PathBuf,

    /// Expected SHA-256 of the weights file, checked before loading
    #[clap(long)]
    model_sha256: Option<String>,

    /// Text file with one class name per line
    #[clap(long)]
    labels: Option<PathBuf>,

    /// Side length of the square model input
    #[clap(long, default_value_t = 640)]
    input_size: u32,

    /// Minimum confidence of a shown detection
    #[clap(long, default_value_t = 0.1)]
    confidence: f32,

    /// Maximum IoU between two shown detections
    #[clap(long, default_value_t = 0.5)]
    overlap: f32,

    /// Maximum number of detections per frame
    #[clap(long, default_value_t = 300)]
    max_detections: usize,

    /// JPEG quality of the streamed frames
    #[clap(long, default_value_t = 80)]
    jpeg_quality: u8,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Pixel format requested from the video device
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Replay the images of this directory instead of using the camera
    #[clap(long)]
    replay_dir: Option<PathBuf>,

    /// Restart the replay after the last image
    #[clap(long)]
    loop_replay: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let settings = PipelineSettings {
        thresholds: Thresholds {
            confidence: args.confidence,
            overlap: args.overlap,
            max_detections: args.max_detections,
        },
        jpeg_quality: args.jpeg_quality,
    };
    settings.thresholds.validate()?;

    // Load the model once, it is shared read-only from here on
    let model_spec = ModelSpec {
        path: args.model.clone(),
        sha256: args.model_sha256.clone(),
        labels: args.labels.clone(),
        input_size: args.input_size,
    };
    let model = Arc::new(
        YoloModel::load(&model_spec)
            .with_context(|| format!("failed to load model {}", args.model.display()))?,
    );
    if !model.labels().is_empty() {
        log::debug!("Class names: {:?}", model.labels());
    }

    let source = open_source(&args)?;

    let context = PipelineContext::start(source, model, settings);
    spawn_meter_logger();

    // Build HTTP server with endpoints
    let app = router(Arc::clone(&context));

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&context)))
        .await?;

    if let Some(reason) = context.shutdown().await {
        log::info!("Frame producer finished: {:?}", reason);
    }

    Ok(())
}

fn open_source(args: &Args) -> Result<Box<dyn CaptureSource + Send>> {
    if let Some(dir) = &args.replay_dir {
        let source = ImageDirSource::open(dir, args.loop_replay)
            .with_context(|| format!("failed to open replay directory {}", dir.display()))?;
        return Ok(Box::new(source));
    }

    open_camera(args)
}

#[cfg(feature = "v4l")]
fn open_camera(args: &Args) -> Result<Box<dyn CaptureSource + Send>> {
    let camera = cam_source::sensors::V4lCamera::open(&args.device, &args.format, None, None)
        .with_context(|| format!("could not start camera {}", args.device))?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "v4l"))]
fn open_camera(args: &Args) -> Result<Box<dyn CaptureSource + Send>> {
    anyhow::bail!(
        "could not start camera {} ({}): built without the `v4l` feature, use --replay-dir",
        args.device,
        args.format
    )
}

/// Wait for ctrl-c, then end all streams so the server can drain its connections.
async fn shutdown_signal(context: Arc<PipelineContext>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for ctrl-c: {e}");
        futures::future::pending::<()>().await;
    }
    log::info!("Shutting down");
    context.request_stop();
}
