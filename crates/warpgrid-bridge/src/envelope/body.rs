//! Message bodies.

use std::any::Any;
use std::fmt;
use std::io::{self, Read};

use bytes::{Buf, Bytes};
use tracing::debug;
use warpgrid_host_api::{HostValue, ReadableStream};

use crate::error::{BridgeError, BridgeResult};
use crate::handle::BridgeHandle;
use crate::stream::{HostStreamReader, PipeReader, ReaderSource};

/// A request or response body: absent, fully buffered, or streamed.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    /// Any blocking reader; streamed to the host on demand.
    Reader(Box<dyn Read + Send>),
    /// The reading half of an in-process pipe. Kept apart from `Reader` so
    /// a host cancel can close it while a read is blocked.
    Pipe(PipeReader),
    /// A body that arrived from the host as a stream.
    Host(HostStreamReader),
}

impl Body {
    pub fn empty() -> Self {
        Body::Empty
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        let mut reader = Some(reader);
        let slot: &mut dyn Any = &mut reader;
        if let Some(pipe) = slot
            .downcast_mut::<Option<PipeReader>>()
            .and_then(Option::take)
        {
            return Body::Pipe(pipe);
        }
        reader.map_or(Body::Empty, |reader| Body::Reader(Box::new(reader)))
    }

    /// Whether the body is known to hold no data without reading it.
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Bytes(bytes) => bytes.is_empty(),
            Body::Reader(_) | Body::Pipe(_) | Body::Host(_) => false,
        }
    }

    /// Decode a host body: `null`/`undefined`, a readable stream, a
    /// `Uint8Array` or a string.
    pub fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Undefined | HostValue::Null => Ok(Body::Empty),
            HostValue::Stream(stream) => Ok(Body::Host(HostStreamReader::new(stream.clone()))),
            HostValue::Bytes(bytes) => Ok(Body::Bytes(bytes.clone())),
            HostValue::String(text) => Ok(Body::Bytes(Bytes::from(text.clone()))),
            other => Err(BridgeError::decode(format!(
                "body must be a ReadableStream, Uint8Array, string or null, got {}",
                other.type_name()
            ))),
        }
    }

    /// Encode for the host: `null` when empty, otherwise a readable stream.
    ///
    /// A host stream nothing has read from yet is handed back as is instead
    /// of being re-wrapped.
    pub fn into_host(self, bridge: &BridgeHandle) -> HostValue {
        let host = bridge.host();
        match self {
            Body::Empty => HostValue::Null,
            Body::Bytes(bytes) if bytes.is_empty() => HostValue::Null,
            Body::Bytes(bytes) => {
                ReadableStream::from_chunks(host, Chunks::new(bytes, bridge.chunk_size())).into()
            }
            Body::Reader(reader) => ReaderSource::new(reader, bridge).into_stream().into(),
            Body::Pipe(reader) => ReaderSource::new(reader, bridge).into_stream().into(),
            Body::Host(reader) => match reader.into_host_stream() {
                Ok(stream) => {
                    debug!("passing host stream through unchanged");
                    stream.into()
                }
                Err(reader) => ReaderSource::new(reader, bridge).into_stream().into(),
            },
        }
    }

    /// Release the body without reading it, cancelling a host stream.
    pub fn discard(self) {
        if let Body::Host(mut reader) = self {
            if let Err(err) = reader.close() {
                debug!(error = %err, "discarded host body failed to cancel");
            }
        }
    }

    /// Read the whole body into memory.
    pub fn into_bytes(self) -> BridgeResult<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Bytes(bytes) => Ok(bytes),
            mut other => {
                let mut out = Vec::new();
                other.read_to_end(&mut out)?;
                Ok(Bytes::from(out))
            }
        }
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Body::Empty => Ok(0),
            Body::Bytes(bytes) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                bytes.advance(n);
                Ok(n)
            }
            Body::Reader(reader) => reader.read(buf),
            Body::Pipe(reader) => reader.read(buf),
            Body::Host(reader) => reader.read(buf),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Bytes(bytes) => write!(f, "Body::Bytes({})", bytes.len()),
            Body::Reader(_) => f.write_str("Body::Reader"),
            Body::Pipe(_) => f.write_str("Body::Pipe"),
            Body::Host(reader) => f.debug_tuple("Body::Host").field(reader).finish(),
        }
    }
}

impl From<PipeReader> for Body {
    fn from(reader: PipeReader) -> Self {
        Body::Pipe(reader)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// Yields a `Bytes` buffer in fixed-size chunks without copying.
///
/// Each chunk is a `Bytes::slice()` of the original allocation.
pub(crate) struct Chunks {
    buf: Bytes,
    chunk_size: usize,
    offset: usize,
}

impl Chunks {
    pub(crate) fn new(buf: Bytes, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be > 0");
        Self {
            buf,
            chunk_size,
            offset: 0,
        }
    }
}

impl Iterator for Chunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.offset >= self.buf.len() {
            return None;
        }
        let end = std::cmp::min(self.offset + self.chunk_size, self.buf.len());
        let chunk = self.buf.slice(self.offset..end);
        self.offset = end;
        Some(chunk)
    }
}
