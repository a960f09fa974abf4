//! Endpoints of HTTP server.
//!
use std::{convert::Infallible, sync::Arc};

use axum::{
    body::StreamBody,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    context::PipelineContext,
    emitter::{forward_chunks, StreamEmitter, MULTIPART_CONTENT_TYPE},
    meter::{MeterTotals, METER},
};

/// Parts buffered per viewer before emitting waits for the network.
const VIEWER_BUFFER: usize = 2;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Live Detection</title>
</head>
<body>
    <h3>Live Streaming</h3>
    <img src="/video_feed" width="100%">
</body>
</html>
"#;

/// Build the router with all endpoints.
pub fn router(context: Arc<PipelineContext>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/healthcheck", get(healthcheck))
        .route("/stats", get(stats))
        .layer(Extension(context))
}

/// Landing page embedding the stream.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Endpoint of the annotated camera stream.
pub async fn video_feed(Extension(context): Extension<Arc<PipelineContext>>) -> Response {
    let Some(subscription) = context.hub().subscribe() else {
        log::info!("Stream requested after the producer stopped");
        return (StatusCode::SERVICE_UNAVAILABLE, "stream has ended").into_response();
    };
    log::info!(
        "Viewer connected, {} watching",
        context.hub().viewer_count()
    );

    // The forwarding task ends together with the response body
    let (body_tx, body_rx) = mpsc::channel(VIEWER_BUFFER);
    tokio::spawn(forward_chunks(subscription, StreamEmitter::new(body_tx)));

    let stream = ReceiverStream::new(body_rx).map(Ok::<_, Infallible>);

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [
        (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
        (header::CACHE_CONTROL, "no-cache"),
    ];

    (headers, body).into_response()
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub frames: MeterTotals,
    pub viewers: usize,
    pub streaming: bool,
    pub confidence_threshold: f32,
    pub overlap_threshold: f32,
}

/// Frame counters and current viewers.
pub async fn stats(Extension(context): Extension<Arc<PipelineContext>>) -> Json<Stats> {
    let thresholds = context.settings().thresholds;
    Json(Stats {
        frames: METER.totals(),
        viewers: context.hub().viewer_count(),
        streaming: !context.is_stopped(),
        confidence_threshold: thresholds.confidence,
        overlap_threshold: thresholds.overlap,
    })
}
