use bytes::Bytes;
use tracing::debug;
use warpgrid_host_api::{HostValue, Object};

use crate::envelope::body::Body;
use crate::envelope::header::HeaderMap;
use crate::envelope::status::{self, DEFAULT_STATUS};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::BridgeHandle;

/// An HTTP response crossing the bridge.
///
/// Use [`Response::new()`] for buffered bodies and
/// [`Response::streaming()`] for bodies produced by a blocking reader, such
/// as the reading half of a [`pipe`](crate::stream::pipe). Streamed bodies
/// are read one chunk per host pull, never buffered whole.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Body,
}

impl Response {
    /// Create a response with a pre-buffered body.
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Body>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Create a response with an empty body.
    pub fn empty(status: u16, headers: HeaderMap) -> Self {
        Self::new(status, headers, Body::Empty)
    }

    /// Create a response whose body is read from `reader` on demand.
    pub fn streaming(
        status: u16,
        headers: HeaderMap,
        reader: impl std::io::Read + Send + 'static,
    ) -> Self {
        Self::new(status, headers, Body::from_reader(reader))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// `"{code} {reason}"`, e.g. `"200 OK"`.
    pub fn status_line(&self) -> String {
        status::status_line(self.effective_status())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Consume the response and collect the body into a single buffer.
    pub fn into_bytes(self) -> BridgeResult<Bytes> {
        self.body.into_bytes()
    }

    /// Returns `true` if the body is streamed rather than buffered.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Reader(_) | Body::Pipe(_) | Body::Host(_))
    }

    fn effective_status(&self) -> u16 {
        if self.status == 0 {
            DEFAULT_STATUS
        } else {
            self.status
        }
    }

    /// Decode a host `Response` object.
    pub fn from_host(value: &HostValue) -> BridgeResult<Self> {
        if value.as_object().is_none() {
            return Err(BridgeError::decode(format!(
                "response must be an object, got {}",
                value.type_name()
            )));
        }
        let status = match value.get("status") {
            HostValue::Undefined => DEFAULT_STATUS,
            HostValue::Number(n) if n.fract() == 0.0 && (0.0..=999.0).contains(n) => *n as u16,
            other => {
                return Err(BridgeError::decode(format!(
                    "response.status must be an integer status code, got {other:?}"
                )));
            }
        };
        let headers = match value.get("headers") {
            HostValue::Headers(headers) => HeaderMap::from_host(headers),
            HostValue::Undefined | HostValue::Null => HeaderMap::new(),
            other => {
                return Err(BridgeError::decode(format!(
                    "response.headers must be Headers, got {}",
                    other.type_name()
                )));
            }
        };
        let body = Body::from_host(value.get("body"))?;
        Ok(Self::new(status, headers, body))
    }

    /// Encode as a host `Response` object.
    ///
    /// An unset status (0) becomes 200. Statuses that forbid a body are sent
    /// with a `null` body, and any supplied body is discarded unread.
    pub fn into_host(self, bridge: &BridgeHandle) -> BridgeResult<HostValue> {
        let status = self.effective_status();
        let headers = self.headers.to_host()?;
        let body = if status::forbids_body(status) {
            if !self.body.is_empty() {
                debug!(status, "dropping body of a bodyless response");
            }
            self.body.discard();
            HostValue::Null
        } else {
            self.body.into_host(bridge)
        };
        Ok(Object::new()
            .with("status", status)
            .with("statusText", status::reason_phrase(status))
            .with("headers", headers)
            .with("body", body)
            .into())
    }
}
