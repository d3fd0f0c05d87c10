//! Frame codec.
//!
//! ```text
//! ┌───────────────┬──────────────────────────┐
//! │ len: u32 (BE) │ body: bincode, len bytes │
//! └───────────────┴──────────────────────────┘
//! ```

use crate::error::StreamingError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame body. Comfortably fits one 64 MB block plus its
/// chain metadata, several times over.
pub const MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), StreamingError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(StreamingError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream before a length prefix;
/// a stream that ends inside the prefix is an `Io` error.
///
/// A body that fails to decode is consumed in full, so the stream stays
/// aligned on the next frame. An oversized length is not consumed; the stream
/// is unusable afterwards.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, StreamingError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream ended {filled} bytes into a frame length"),
            )
            .into());
        }
        filled += n;
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(StreamingError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(bincode::deserialize(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::protocol::{Request, RequestBody};
    use corelib::OpenMode;

    #[tokio::test]
    async fn test_frames_back_to_back() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let first = Request::new(RequestBody::List);
        let second = Request::new(RequestBody::OpenFile {
            path: "dir/a.txt".into(),
            size: 1234,
            mode: OpenMode::Write,
        });

        write_frame(&mut client, &first).await.unwrap();
        write_frame(&mut client, &second).await.unwrap();
        drop(client);

        let got: Option<Request> = read_frame(&mut server).await.unwrap();
        assert_eq!(got, Some(first));
        let got: Option<Request> = read_frame(&mut server).await.unwrap();
        assert_eq!(got, Some(second));
        // Clean EOF.
        let got: Option<Request> = read_frame(&mut server).await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_eof_inside_length_prefix_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);

        let result: Result<Option<Request>, _> = read_frame(&mut server).await;
        match result {
            Err(StreamingError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected an Io error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(u32::MAX).await.unwrap();

        let result: Result<Option<Request>, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(StreamingError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_garbage_body_keeps_stream_aligned() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_u32(3).await.unwrap();
        client.write_all(&[0xff, 0xff, 0xff]).await.unwrap();
        let valid = Request::new(RequestBody::List);
        write_frame(&mut client, &valid).await.unwrap();

        let bad: Result<Option<Request>, _> = read_frame(&mut server).await;
        assert!(matches!(bad, Err(StreamingError::Codec(_))));
        let good: Option<Request> = read_frame(&mut server).await.unwrap();
        assert_eq!(good, Some(valid));
    }

    #[tokio::test]
    async fn test_truncated_body_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_u32(100).await.unwrap();
        client.write_all(&[1, 2, 3]).await.unwrap();
        drop(client);

        let result: Result<Option<Request>, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(StreamingError::Io(_))));
    }
}
