//! Newline-delimited JSON framing shared by the broker and support TCP
//! servers.
//!
//! No codec crate in the example corpus frames a line-delimited JSON
//! protocol (no `tokio_util::codec::LinesCodec` precedent anywhere in the
//! pack), so this is a small hand-rolled reader/writer pair over
//! `tokio::io`, per spec.md §6.1's "one JSON object per line" framing.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Read one newline-delimited JSON value. Returns `Ok(None)` at EOF.
///
/// # Errors
/// Returns an I/O error on read failure, or a JSON error if the line isn't
/// valid JSON for `T`.
pub async fn read_frame<T, R>(reader: &mut R) -> anyhow::Result<Option<T>>
where
    T: DeserializeOwned,
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(trimmed)?))
}

/// Write one value as a single newline-delimited JSON line.
///
/// # Errors
/// Returns an I/O error on write failure or a JSON error if `value` fails
/// to serialize.
pub async fn write_frame<T, W>(writer: &mut W, value: &T) -> anyhow::Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
