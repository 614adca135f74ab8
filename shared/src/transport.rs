//! Framed transport over a bidirectional byte stream
//!
//! A connection is split into a [`FrameReader`] and a [`FrameWriter`] so that
//! one task can block on incoming frames while another writes. Closure and
//! read errors surface identically as [`TransportError::ConnectionClosed`];
//! the recovery is the same either way.

use crate::codec::FRAME_DELIMITER;
use log::debug;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Longest frame accepted from a peer, delimiter excluded
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

pub type TcpFrameReader = FrameReader<OwnedReadHalf>;
pub type TcpFrameWriter = FrameWriter<OwnedWriteHalf>;

/// Splits a TCP stream into its framed halves
pub fn split(stream: TcpStream) -> (TcpFrameReader, TcpFrameWriter) {
    let (read_half, write_half) = stream.into_split();
    (FrameReader::new(read_half), FrameWriter::new(write_half))
}

/// Reading half of a framed connection
pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_len(reader, MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(reader: R, max_frame_len: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            max_frame_len,
        }
    }

    /// Waits for the next complete frame and returns it without its delimiter
    ///
    /// Bytes left over at end-of-stream without a delimiter are an incomplete
    /// frame and are discarded.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut frame = Vec::new();
        let limit = self.max_frame_len as u64 + 1;

        let read = (&mut self.inner)
            .take(limit)
            .read_until(FRAME_DELIMITER, &mut frame)
            .await
            .map_err(|e| {
                debug!("Read error treated as closed connection: {}", e);
                TransportError::ConnectionClosed
            })?;

        if read == 0 {
            return Err(TransportError::ConnectionClosed);
        }

        if frame.last() != Some(&FRAME_DELIMITER) {
            if frame.len() > self.max_frame_len {
                return Err(TransportError::FrameTooLong {
                    limit: self.max_frame_len,
                });
            }
            debug!("Discarding {} bytes of incomplete frame", frame.len());
            return Err(TransportError::ConnectionClosed);
        }

        frame.pop();
        Ok(frame)
    }
}

/// Writing half of a framed connection
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Writes one already-encoded frame and flushes it
    ///
    /// Any failure means the peer is effectively gone.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.inner
            .write_all(frame)
            .await
            .map_err(TransportError::Write)?;
        self.inner.flush().await.map_err(TransportError::Write)
    }

    /// Closes the write direction so the peer's reader observes end-of-stream
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await.map_err(TransportError::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_frames_across_chunks() {
        let mock = Builder::new()
            .read(b"{\"a\":1}\n{\"b\"")
            .read(b":2}\n")
            .build();
        let mut reader = FrameReader::new(mock);

        assert_eq!(reader.read_frame().await.unwrap(), b"{\"a\":1}".to_vec());
        assert_eq!(reader.read_frame().await.unwrap(), b"{\"b\":2}".to_vec());
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_empty_line_is_a_frame() {
        let mock = Builder::new().read(b"\n").build();
        let mut reader = FrameReader::new(mock);

        assert!(reader.read_frame().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_frame_at_eof_is_closed() {
        let mock = Builder::new().read(b"{\"type\":\"chat\"").build();
        let mut reader = FrameReader::new(mock);

        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_error_is_closed() {
        let mock = Builder::new()
            .read_error(io::Error::new(ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut reader = FrameReader::new(mock);

        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_frame_too_long() {
        let mock = Builder::new().read(b"0123456789\n").build();
        let mut reader = FrameReader::with_max_frame_len(mock, 4);

        match reader.read_frame().await {
            Err(TransportError::FrameTooLong { limit }) => assert_eq!(limit, 4),
            other => panic!("expected FrameTooLong, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frame_at_exact_limit() {
        let mock = Builder::new().read(b"abcd\n").build();
        let mut reader = FrameReader::with_max_frame_len(mock, 4);

        assert_eq!(reader.read_frame().await.unwrap(), b"abcd".to_vec());
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mock = Builder::new().write(b"{\"a\":1}\n").build();
        let mut writer = FrameWriter::new(mock);

        writer.write_frame(b"{\"a\":1}\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_error() {
        let mock = Builder::new()
            .write_error(io::Error::new(ErrorKind::BrokenPipe, "broken pipe"))
            .build();
        let mut writer = FrameWriter::new(mock);

        assert!(matches!(
            writer.write_frame(b"x\n").await,
            Err(TransportError::Write(_))
        ));
    }

    #[tokio::test]
    async fn test_split_tcp_stream() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (accepted, _) = listener.accept().await.unwrap();
        let dialed = connect.await.unwrap();

        let (mut server_reader, _server_writer) = split(accepted);
        let (_client_reader, mut client_writer) = split(dialed);

        client_writer.write_frame(b"ping\n").await.unwrap();
        assert_eq!(server_reader.read_frame().await.unwrap(), b"ping".to_vec());

        client_writer.shutdown().await.unwrap();
        assert!(matches!(
            server_reader.read_frame().await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
