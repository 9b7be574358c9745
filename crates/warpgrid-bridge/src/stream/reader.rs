//! Host readable stream → blocking reader.

use std::fmt;
use std::io::{self, Read};

use bytes::{Buf, Bytes};
use tracing::{debug, warn};
use warpgrid_host_api::{HostValue, ReadableStream};

use crate::deferred;
use crate::error::{BridgeError, BridgeResult};

/// Reads a host [`ReadableStream`] through [`std::io::Read`].
///
/// Every host chunk lands in an internal buffer first; reads drain that
/// buffer before asking the host for more. One reader owns the stream: it
/// must not be read from two threads at once.
pub struct HostStreamReader {
    stream: Option<ReadableStream>,
    buffer: Bytes,
    done: bool,
    touched: bool,
}

impl HostStreamReader {
    pub fn new(stream: ReadableStream) -> Self {
        Self {
            stream: Some(stream),
            buffer: Bytes::new(),
            done: false,
            touched: false,
        }
    }

    /// The next chunk of data, or `None` at end of stream.
    ///
    /// Returns whatever is buffered first, so a partially consumed chunk is
    /// never lost.
    pub fn read_chunk(&mut self) -> BridgeResult<Option<Bytes>> {
        self.touched = true;
        loop {
            if !self.buffer.is_empty() {
                return Ok(Some(std::mem::take(&mut self.buffer)));
            }
            if self.done {
                return Ok(None);
            }
            let Some(stream) = &self.stream else {
                return Err(BridgeError::Closed);
            };
            let result = deferred::wait(&stream.read())?;
            if result.get("done").as_bool() == Some(true) {
                debug!("host stream finished");
                self.done = true;
                continue;
            }
            self.buffer = match result.get("value") {
                HostValue::Bytes(chunk) => chunk.clone(),
                HostValue::String(text) => Bytes::from(text.clone().into_bytes()),
                other => {
                    return Err(BridgeError::decode(format!(
                        "stream chunk must be a Uint8Array, got {}",
                        other.type_name()
                    )));
                }
            };
        }
    }

    /// Cancel the host stream.
    ///
    /// The host refuses to cancel a stream that already finished; that
    /// refusal is not an error here.
    pub fn close(&mut self) -> BridgeResult<()> {
        self.buffer = Bytes::new();
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        match deferred::wait(&stream.cancel()) {
            Ok(_) => Ok(()),
            Err(BridgeError::Host(err)) if err.is_invalid_state() => {
                if self.done {
                    debug!("host stream already finished before close");
                } else {
                    warn!(error = %err, "host stream finished while being closed");
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Whether nothing has been read yet.
    pub fn is_untouched(&self) -> bool {
        !self.touched && self.stream.is_some()
    }

    /// Hand back the host stream when nothing has been read from it, so it
    /// can be passed on without copying.
    pub fn into_host_stream(mut self) -> Result<ReadableStream, Self> {
        let pristine = self.is_untouched()
            && self.stream.as_ref().is_some_and(|s| !s.is_disturbed());
        if !pristine {
            return Err(self);
        }
        self.stream.take().ok_or(self)
    }
}

impl Read for HostStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffer.is_empty() {
            match self.read_chunk()? {
                Some(chunk) => self.buffer = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.buffer.len());
        buf[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer.advance(n);
        Ok(n)
    }
}

impl fmt::Debug for HostStreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostStreamReader")
            .field("buffered", &self.buffer.len())
            .field("done", &self.done)
            .field("closed", &self.stream.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warpgrid_host_api::testing::{chunk_stream, ChannelSource};
    use warpgrid_host_api::{EventLoop, HostError};

    #[test]
    fn small_reads_drain_the_buffer_first() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let mut reader = HostStreamReader::new(chunk_stream(&host, ["hello", "world"]));

        let mut buf = [0u8; 3];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");

        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "world");
    }

    #[test]
    fn host_stream_error_is_a_read_error() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let (stream, feeder) = ChannelSource::stream(&host);
        feeder.push("partial");
        feeder.error(HostError::new("connection reset"));

        let mut reader = HostStreamReader::new(stream);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn close_after_end_of_stream_is_not_an_error() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let mut reader = HostStreamReader::new(chunk_stream(&host, ["only"]));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        reader.close().unwrap();
        reader.close().unwrap();
    }

    #[test]
    fn close_cancels_an_unfinished_stream() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let (stream, feeder) = ChannelSource::stream(&host);

        let mut reader = HostStreamReader::new(stream);
        reader.close().unwrap();
        host.flush();
        assert!(feeder.is_cancelled());
    }

    #[test]
    fn untouched_reader_gives_back_its_stream() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let stream = chunk_stream(&host, ["x"]);

        let reader = HostStreamReader::new(stream.clone());
        let returned = reader.into_host_stream().unwrap();
        assert!(returned.same_stream(&stream));

        let mut touched = HostStreamReader::new(stream);
        touched.read_chunk().unwrap();
        assert!(touched.into_host_stream().is_err());
    }
}
