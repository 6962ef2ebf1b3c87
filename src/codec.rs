//! Content-Length framing for JSON-RPC over child-process stdio.
//!
//! Every frame is `Content-Length: N\r\n\r\n` followed by exactly N bytes
//! of JSON. [`MessageReader`] and [`MessageWriter`] cover both directions
//! of the wire.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (8 MiB) to bound allocation.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Reads framed JSON-RPC messages from an async stream.
pub struct MessageReader<R> {
    input: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: BufReader::new(input),
        }
    }

    /// Read one frame. `Ok(None)` means the peer closed the stream between
    /// frames; EOF anywhere else is an error.
    pub async fn read_message(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(length) = self.read_content_length().await? else {
            return Ok(None);
        };

        if length > MAX_BODY_BYTES {
            bail!("frame body of {length} bytes exceeds the {MAX_BODY_BYTES} byte limit");
        }

        let mut body = vec![0u8; length];
        self.input
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        serde_json::from_slice(&body)
            .context("decoding frame body")
            .map(Some)
    }

    /// Parse header lines up to the blank separator and return the declared
    /// body length. `Ok(None)` only when EOF lands before the first header
    /// byte.
    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut length: Option<usize> = None;
        let mut line = String::new();
        let mut lines_seen = 0usize;

        loop {
            line.clear();
            let n = self
                .input
                .read_line(&mut line)
                .await
                .context("reading frame header")?;
            if n == 0 {
                if lines_seen == 0 {
                    return Ok(None);
                }
                bail!("stream closed inside a frame header");
            }
            lines_seen += 1;

            let header = line.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                break;
            }

            // Header names are case-insensitive in practice, even though the
            // protocol only ever spells "Content-Length".
            if let Some((name, value)) = header.split_once(':')
                && name.trim().eq_ignore_ascii_case("Content-Length")
            {
                length = Some(value.trim().parse().context("parsing Content-Length")?);
            }
            // Anything else (Content-Type) carries nothing we need.
        }

        match length {
            Some(len) => Ok(Some(len)),
            None => bail!("frame headers ended without Content-Length"),
        }
    }
}

/// Writes framed JSON-RPC messages to an async stream.
pub struct MessageWriter<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    /// Serialize and write one frame, header and body in a single write.
    pub async fn write_message(&mut self, message: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(message).context("encoding frame body")?;
        let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);

        self.output
            .write_all(&frame)
            .await
            .context("writing frame")?;
        self.output.flush().await.context("flushing frame")?;
        Ok(())
    }
}
