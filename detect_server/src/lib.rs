//! Live camera stream with object detection overlays, served over HTTP.
pub mod annotate;
pub mod context;
pub mod detection;
pub mod emitter;
pub mod encoder;
pub mod endpoints;
pub mod error;
pub mod hub;
pub mod meter;
pub mod nn;
pub mod pipeline;
