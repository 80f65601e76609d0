//! Outbound payloads

use crate::error::{Result, TransferError};
use crate::session::RemoteReader;
use async_trait::async_trait;
use bytes::Bytes;
use std::any::{type_name, Any};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Produces content by writing into the destination stream
#[async_trait]
pub trait OutputHandler: Send {
    /// Write the whole content into `out`
    async fn write(self: Box<Self>, out: &mut (dyn AsyncWrite + Send + Unpin)) -> io::Result<()>;
}

/// Content of an outbound transfer
pub enum Payload {
    /// Raw bytes
    Bytes(Bytes),
    /// UTF-8 text
    Text(String),
    /// A stream copied until EOF and then dropped
    Stream(RemoteReader),
    /// A callback writing into the remote file
    Writer(Box<dyn OutputHandler>),
    /// Anything else, rejected before any transfer starts
    Unsupported(&'static str),
}

impl Payload {
    /// Classify a dynamically typed value
    ///
    /// `Vec<u8>`, [`Bytes`], `String`, `&'static str`, [`RemoteReader`] and
    /// boxed [`OutputHandler`]s are supported.
    pub fn from_any<T: Any + Send>(value: T) -> Payload {
        let value: Box<dyn Any + Send> = Box::new(value);
        let value = match value.downcast::<Vec<u8>>() {
            Ok(v) => return Payload::Bytes(Bytes::from(*v)),
            Err(value) => value,
        };
        let value = match value.downcast::<Bytes>() {
            Ok(v) => return Payload::Bytes(*v),
            Err(value) => value,
        };
        let value = match value.downcast::<String>() {
            Ok(v) => return Payload::Text(*v),
            Err(value) => value,
        };
        let value = match value.downcast::<&'static str>() {
            Ok(v) => return Payload::Text(v.to_string()),
            Err(value) => value,
        };
        let value = match value.downcast::<RemoteReader>() {
            Ok(v) => return Payload::Stream(*v),
            Err(value) => value,
        };
        match value.downcast::<Box<dyn OutputHandler>>() {
            Ok(v) => Payload::Writer(*v),
            Err(_) => Payload::Unsupported(type_name::<T>()),
        }
    }

    /// Short name of the payload kind
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Bytes(_) => "bytes",
            Payload::Text(_) => "text",
            Payload::Stream(_) => "stream",
            Payload::Writer(_) => "writer",
            Payload::Unsupported(name) => *name,
        }
    }

    /// Fail on unsupported payloads
    pub fn validate(&self) -> Result<()> {
        match self {
            Payload::Unsupported(name) => Err(TransferError::Validation(format!(
                "Unsupported payload type: {name}"
            ))),
            _ => Ok(()),
        }
    }

    /// Write the payload into `out`, returning the number of bytes written
    pub async fn write_to(self, out: &mut (dyn AsyncWrite + Send + Unpin)) -> io::Result<u64> {
        match self {
            Payload::Bytes(data) => {
                out.write_all(&data).await?;
                Ok(data.len() as u64)
            }
            Payload::Text(text) => {
                out.write_all(text.as_bytes()).await?;
                Ok(text.len() as u64)
            }
            Payload::Stream(mut reader) => tokio::io::copy(&mut reader, out).await,
            Payload::Writer(handler) => {
                let mut counting = CountingWriter { inner: out, count: 0 };
                handler.write(&mut counting).await?;
                Ok(counting.count)
            }
            Payload::Unsupported(name) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported payload type: {name}"),
            )),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bytes(data) => write!(f, "Payload::Bytes({} bytes)", data.len()),
            Payload::Text(text) => write!(f, "Payload::Text({} bytes)", text.len()),
            other => write!(f, "Payload::{}", other.kind()),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Bytes(data)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<RemoteReader> for Payload {
    fn from(reader: RemoteReader) -> Self {
        Payload::Stream(reader)
    }
}

/// Counts bytes passing through to the inner writer
struct CountingWriter<'a> {
    inner: &'a mut (dyn AsyncWrite + Send + Unpin),
    count: u64,
}

impl AsyncWrite for CountingWriter<'_> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut *self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.count += *n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeting;

    #[async_trait]
    impl OutputHandler for Greeting {
        async fn write(
            self: Box<Self>,
            out: &mut (dyn AsyncWrite + Send + Unpin),
        ) -> io::Result<()> {
            out.write_all(b"hello ").await?;
            out.write_all(b"world").await
        }
    }

    #[test]
    fn test_from_any() {
        assert!(matches!(Payload::from_any(vec![1u8, 2]), Payload::Bytes(_)));
        assert!(matches!(Payload::from_any(String::from("x")), Payload::Text(_)));
        assert!(matches!(Payload::from_any("x"), Payload::Text(_)));
        let reader: RemoteReader = Box::new(io::Cursor::new(Vec::new()));
        assert!(matches!(Payload::from_any(reader), Payload::Stream(_)));
        let handler: Box<dyn OutputHandler> = Box::new(Greeting);
        assert!(matches!(Payload::from_any(handler), Payload::Writer(_)));

        let payload = Payload::from_any(42u32);
        assert_eq!(payload.kind(), "u32");
        assert!(matches!(payload.validate(), Err(TransferError::Validation(_))));
    }

    #[tokio::test]
    async fn test_write_to() {
        let mut out: Vec<u8> = Vec::new();
        assert_eq!(Payload::from("abc").write_to(&mut out).await.unwrap(), 3);

        let reader: RemoteReader = Box::new(io::Cursor::new(b"def".to_vec()));
        assert_eq!(Payload::from(reader).write_to(&mut out).await.unwrap(), 3);

        let handler: Box<dyn OutputHandler> = Box::new(Greeting);
        assert_eq!(Payload::Writer(handler).write_to(&mut out).await.unwrap(), 11);

        assert_eq!(out, b"abcdefhello world");
    }
}
