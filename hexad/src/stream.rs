//! Stream utilities.
//!
//! Every byte that moves through the system is covered by a SHA-256
//! digest somewhere: the spooled upload, each span in flight, each
//! chunk file on disk. The adapters here fold the digest while the
//! bytes flow, so no path needs a second pass over its data.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use crate::hash::Checksum;

/// Read adapter that folds SHA-256 over everything read through it.
///
/// The router digests a span with this before sending it, and a chunk
/// server re-verifies a stored file through it before serving a single
/// byte. The caller decides when the stream is exhausted and calls
/// [`DigestReader::finish`], which hands the inner reader back so a
/// verified file can be rewound instead of reopened.
pub struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> DigestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }

    /// Returns the inner reader, the digest and the byte count.
    pub fn finish(self) -> (R, Checksum, u64) {
        (
            self.inner,
            Checksum::from_digest(self.hasher.finalize()),
            self.bytes_read,
        )
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DigestReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);

        if let Poll::Ready(Ok(())) = &poll {
            let filled = buf.filled();
            let read = filled.len() - before;
            if read > 0 {
                self.hasher.update(&filled[before..]);
                self.bytes_read += read as u64;
            }
        }

        poll
    }
}

/// Write adapter that folds SHA-256 over everything written through it.
///
/// The upload coordinator spools the request body through this, so the
/// file-level digest is final the moment the spool is; a chunk server
/// hashes a store exchange the same way while the bytes land in the
/// temp file. Only bytes the inner writer accepted are counted.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    /// Bytes accepted by the inner writer so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Returns the inner writer, the digest and the byte count.
    pub fn finish(self) -> (W, Checksum, u64) {
        (
            self.inner,
            Checksum::from_digest(self.hasher.finalize()),
            self.bytes_written,
        )
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for DigestWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, data);

        if let Poll::Ready(Ok(written)) = &poll {
            // A short write digests only the accepted prefix.
            self.hasher.update(&data[..*written]);
            self.bytes_written += *written as u64;
        }

        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Reads until `limit` bytes are buffered or the stream ends.
///
/// The chunk-service client cuts a span into data frames with this; a
/// short result only ever means the span is done, never a partial
/// frame in the middle of one.
pub async fn read_up_to<R>(stream: &mut R, limit: usize) -> io::Result<Bytes>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = BytesMut::with_capacity(limit);

    while buf.len() < limit {
        if stream.read_buf(&mut buf).await? == 0 {
            break;
        }
    }

    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::AsyncWriteExt;
    use tokio_test::block_on;

    use crate::testing::get_fake_data;

    #[test]
    fn test_digest_reader() {
        let data = get_fake_data(100_003);
        let expected = Checksum::sha256_from_bytes(&data);

        block_on(async {
            let mut reader = DigestReader::new(data.as_slice());

            let mut sink = Vec::new();
            reader.read_to_end(&mut sink).await.unwrap();
            assert_eq!(sink, data);

            let (rest, checksum, count) = reader.finish();
            assert!(rest.is_empty());
            assert_eq!(checksum, expected);
            assert_eq!(count, data.len() as u64);
        });
    }

    #[test]
    fn test_digest_writer() {
        let data = get_fake_data(50_000);

        block_on(async {
            let mut writer = DigestWriter::new(Vec::new());
            for piece in data.chunks(7_919) {
                writer.write_all(piece).await.unwrap();
            }
            writer.flush().await.unwrap();

            let (inner, checksum, count) = writer.finish();
            assert_eq!(inner, data);
            assert_eq!(checksum, Checksum::sha256_from_bytes(&data));
            assert_eq!(count, data.len() as u64);
        });
    }

    #[test]
    fn test_empty_input_digests() {
        block_on(async {
            let reader = DigestReader::new(&b""[..]);
            let (_, checksum, count) = reader.finish();
            assert_eq!(checksum, Checksum::sha256_from_bytes(b""));
            assert_eq!(count, 0);
        });
    }

    #[test]
    fn test_read_up_to_frames() {
        let data = get_fake_data(150_000);
        let limit = 64 * 1024;

        block_on(async {
            let mut source = data.as_slice();
            let mut frames = Vec::new();

            loop {
                let frame = read_up_to(&mut source, limit).await.unwrap();
                if frame.is_empty() {
                    break;
                }
                assert!(frame.len() <= limit);
                frames.push(frame);
            }

            // Two full frames and the remainder.
            assert_eq!(frames.len(), 3);
            assert_eq!(frames[0].len(), limit);
            assert_eq!(frames[1].len(), limit);

            let mut joined = Vec::new();
            for frame in &frames {
                joined.extend_from_slice(frame);
            }
            assert_eq!(joined, data);
        });
    }
}
