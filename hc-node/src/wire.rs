//! Length-prefixed wire framing.
//!
//! This is deliberately a different encoding from the canonical bytes used
//! for fingerprint computation in [`crate::message`]: the wire frame carries
//! a 4-byte big-endian length prefix ahead of the CBOR body so a stream
//! reader knows how much to buffer before attempting to decode, while the
//! fingerprint is computed over bare CBOR bytes with no frame header.

use std::io;

use futures::{AsyncRead, AsyncWrite, AsyncWriteExt};
use serde::{de::DeserializeOwned, Serialize};

/// Maximum frame size accepted from a peer. Guards against a malformed or
/// hostile length prefix causing an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 8 * 1024 * 1024;

/// Encodes `value` as a length-prefixed CBOR frame and writes it to `io`.
pub async fn write_frame<T, S>(io: &mut S, value: &T) -> io::Result<()>
where
    T: Serialize,
    S: AsyncWrite + Unpin,
{
    let body = serde_cbor::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if body.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds maximum of {MAX_FRAME_LEN}", body.len()),
        ));
    }
    let len = (body.len() as u32).to_be_bytes();
    io.write_all(&len).await?;
    io.write_all(&body).await?;
    io.flush().await
}

/// Reads a length-prefixed CBOR frame from `io` and decodes it.
pub async fn read_frame<T, S>(io: &mut S) -> io::Result<T>
where
    T: DeserializeOwned,
    S: AsyncRead + Unpin,
{
    use futures::AsyncReadExt;

    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("peer announced frame of {len} bytes, exceeds maximum of {MAX_FRAME_LEN}"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    io.read_exact(&mut body).await?;
    serde_cbor::from_slice(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[tokio::test]
    async fn frame_round_trips() {
        let sample = Sample {
            a: 7,
            b: "hello".into(),
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &sample).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Sample = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded, sample);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let result: io::Result<Sample> = read_frame(&mut cursor).await;
        assert!(result.is_err());
    }
}
