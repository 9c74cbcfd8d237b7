//! Line readers for captured llama-server output.
//!
//! llama-server occasionally emits non-UTF-8 bytes (model metadata, progress
//! bars), so lines are read as raw bytes and converted lossily rather than
//! trusting the stream to be valid UTF-8.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

use llamad_core::ServerLogSink;

/// Spawn a task that drains `reader` line by line until EOF, forwarding each
/// line to tracing and, when present, the log sink.
pub(crate) fn spawn_output_reader<R>(
    reader: R,
    port: u16,
    stream_type: &'static str,
    sink: Option<Arc<dyn ServerLogSink>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    while buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    debug!(port, stream = stream_type, "{line}");
                    if let Some(sink) = &sink {
                        sink.append(port, stream_type, line);
                    }
                }
                Err(err) => {
                    debug!(port, stream = stream_type, error = %err, "output stream read failed");
                    break;
                }
            }
        }
        debug!(port, stream = stream_type, "output stream closed");
    });
}
