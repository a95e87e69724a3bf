//! JSON-lines framing.
//!
//! Every frame is one `serde_json` object followed by `\n`. Readers refuse
//! lines longer than [`MAX_FRAME_LEN`] so a misbehaving peer cannot make
//! the agent buffer without bound.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single encoded frame, newline excluded.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Errors raised while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame exceeds {MAX_FRAME_LEN} bytes")]
    TooLarge,
}

/// Serialize `frame` and write it as one line, flushing afterwards.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    if line.len() > MAX_FRAME_LEN {
        return Err(WireError::TooLarge);
    }
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame.
///
/// Returns `Ok(None)` on a clean EOF. Blank lines are skipped.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, WireError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    loop {
        let mut buf = Vec::new();
        let n = read_bounded_line(reader, &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }

        let line = trim_line(&buf);
        if line.is_empty() {
            continue;
        }

        tracing::trace!(bytes = line.len(), "frame received");
        return Ok(Some(serde_json::from_slice(line)?));
    }
}

/// `read_until(b'\n')` with a length cap.
async fn read_bounded_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<usize, WireError>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total);
        }

        let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (&available[..=pos], true),
            None => (available, false),
        };
        let used = chunk.len();
        if buf.len() + used > MAX_FRAME_LEN + 2 {
            return Err(WireError::TooLarge);
        }
        buf.extend_from_slice(chunk);
        reader.consume(used);
        total += used;

        if done {
            return Ok(total);
        }
    }
}

fn trim_line(buf: &[u8]) -> &[u8] {
    let mut end = buf.len();
    while end > 0 && matches!(buf[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    let mut start = 0;
    while start < end && matches!(buf[start], b' ' | b'\t') {
        start += 1;
    }
    &buf[start..end]
}
