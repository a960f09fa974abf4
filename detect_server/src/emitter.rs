//! Multipart framing and per-viewer emission.
//!
//! Each viewer of `/video_feed` gets its own [`StreamEmitter`]. The emitter writes complete
//! multipart parts into the channel backing the HTTP response body. Once the response is dropped
//! (the viewer went away), the next [`StreamEmitter::emit`] reports [`ConnectionClosed`].
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::{broadcast, mpsc};

use crate::{encoder::EncodedChunk, error::ConnectionClosed, meter::METER};

/// Token separating the parts of the stream.
pub const BOUNDARY: &str = "frame";

/// Content type of the whole streaming response.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Frame an encoded chunk as one part of a `multipart/x-mixed-replace` stream.
pub fn multipart_part(chunk: &EncodedChunk) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\n\r\n",
        BOUNDARY,
        chunk.content_type()
    );

    let mut part = BytesMut::with_capacity(header.len() + chunk.data().len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(chunk.data());
    part.put_slice(b"\r\n");

    part.freeze()
}

/// Writes parts into the body of one streaming response.
#[derive(Debug, Clone)]
pub struct StreamEmitter {
    body_tx: mpsc::Sender<Bytes>,
}

impl StreamEmitter {
    pub fn new(body_tx: mpsc::Sender<Bytes>) -> Self {
        Self { body_tx }
    }

    /// Send one chunk to the viewer.
    ///
    /// Waits while the viewer's body buffer is full.
    pub async fn emit(&self, chunk: &EncodedChunk) -> Result<(), ConnectionClosed> {
        self.body_tx
            .send(multipart_part(chunk))
            .await
            .map_err(|_| ConnectionClosed)
    }
}

/// Forward broadcast chunks to one viewer until the producer stops or the viewer leaves.
///
/// A viewer too slow to keep up skips the chunks it missed, the producer never waits for it.
/// Returns the number of emitted chunks.
pub async fn forward_chunks(
    mut subscription: broadcast::Receiver<Arc<EncodedChunk>>,
    emitter: StreamEmitter,
) -> u64 {
    let mut emitted = 0;

    loop {
        match subscription.recv().await {
            Ok(chunk) => {
                if emitter.emit(&chunk).await.is_err() {
                    log::info!("Viewer disconnected after {} frames", emitted);
                    break;
                }
                emitted += 1;
                METER.tick_emitted();
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log::debug!("Slow viewer skipped {} frames", missed);
            }
            Err(broadcast::error::RecvError::Closed) => {
                log::info!("Frame producer stopped, ending stream after {} frames", emitted);
                break;
            }
        }
    }

    emitted
}
