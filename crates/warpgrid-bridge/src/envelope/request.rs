use warpgrid_host_api::{HostValue, Object};

use crate::envelope::body::Body;
use crate::envelope::header::HeaderMap;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::BridgeHandle;

/// An HTTP request crossing the bridge.
///
/// The body is streamed when it came from the host as a stream; reading it
/// pulls chunks from the host on demand.
#[derive(Debug)]
pub struct Request {
    method: String,
    url: String,
    headers: HeaderMap,
    body: Body,
}

impl Request {
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        headers: HeaderMap,
        body: impl Into<Body>,
    ) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers,
            body: body.into(),
        }
    }

    /// Create a request with an empty body.
    pub fn empty(method: impl Into<String>, url: impl Into<String>, headers: HeaderMap) -> Self {
        Self::new(method, url, headers, Body::Empty)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
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

    /// `Content-Length`, when present and well formed.
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    /// The `Host` header, falling back to the URL's authority.
    pub fn host(&self) -> Option<String> {
        if let Some(host) = self.headers.get("host") {
            return Some(host.to_string());
        }
        let uri: http::Uri = self.url.parse().ok()?;
        uri.authority().map(|a| a.as_str().to_string())
    }

    /// Decode a host `Request` object.
    pub fn from_host(value: &HostValue) -> BridgeResult<Self> {
        if value.as_object().is_none() {
            return Err(BridgeError::decode(format!(
                "request must be an object, got {}",
                value.type_name()
            )));
        }
        let method = value
            .get("method")
            .as_str()
            .ok_or_else(|| BridgeError::decode("request.method must be a string"))?;
        http::Method::from_bytes(method.as_bytes())
            .map_err(|_| BridgeError::decode(format!("invalid request method {method:?}")))?;
        let url = value
            .get("url")
            .as_str()
            .ok_or_else(|| BridgeError::decode("request.url must be a string"))?;
        let headers = match value.get("headers") {
            HostValue::Headers(headers) => HeaderMap::from_host(headers),
            HostValue::Undefined | HostValue::Null => HeaderMap::new(),
            other => {
                return Err(BridgeError::decode(format!(
                    "request.headers must be Headers, got {}",
                    other.type_name()
                )));
            }
        };
        let body = Body::from_host(value.get("body"))?;
        Ok(Self::new(method, url, headers, body))
    }

    /// Encode as a host `Request` object.
    pub fn into_host(self, bridge: &BridgeHandle) -> BridgeResult<HostValue> {
        let headers = self.headers.to_host()?;
        Ok(Object::new()
            .with("method", self.method)
            .with("url", self.url)
            .with("headers", headers)
            .with("body", self.body.into_host(bridge))
            .into())
    }
}
