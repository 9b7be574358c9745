use warpgrid_host_api::Headers;

use crate::error::{BridgeError, BridgeResult};

/// Headers whose values legitimately contain commas and therefore are never
/// split into several values.
const UNSPLITTABLE: &[&str] = &[
    "set-cookie",
    "date",
    "expires",
    "last-modified",
    "if-modified-since",
    "if-unmodified-since",
    "retry-after",
];

/// An HTTP header as a name-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An ordered collection of HTTP headers.
///
/// Preserves insertion order and duplicate names. Lookups ignore case; the
/// spelling of a name is fixed by its first insertion, canonicalized
/// (`content-type` becomes `Content-Type`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<Header>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = self.spelling(&name.into());
        self.entries.push(Header::new(name, value));
    }

    /// Replace every value of `name`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let spelled = self.spelling(&name);
        self.remove(&name);
        self.entries.push(Header::new(spelled, value));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|h| !h.name.eq_ignore_ascii_case(name));
    }

    /// Get the first header value matching `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Get all header values matching `name` (case-insensitive).
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|h| h.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Header> {
        self.entries
    }

    /// Decode host headers, one entry per value.
    ///
    /// The host hands back repeated headers joined with `", "`, so joined
    /// values are split again. See [`split_values`] for which commas count.
    pub fn from_host(headers: &Headers) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in headers.entries() {
            for part in split_values(&name, &value) {
                map.insert(name.as_str(), part);
            }
        }
        map
    }

    /// Encode as host headers: one `append` per value, never a joined value.
    pub fn to_host(&self) -> BridgeResult<Headers> {
        let headers = Headers::new();
        for header in &self.entries {
            headers.append(&header.name, &header.value).map_err(|err| {
                BridgeError::decode(format!("header {:?}: {}", header.name, err.message()))
            })?;
        }
        Ok(headers)
    }

    fn spelling(&self, name: &str) -> String {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.name.clone())
            .unwrap_or_else(|| canonical_name(name))
    }
}

impl FromIterator<Header> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for header in iter {
            map.insert(header.name, header.value);
        }
        map
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        iter.into_iter().map(|(n, v)| Header::new(n, v)).collect()
    }
}

/// Canonical header capitalization: the first letter and every letter after
/// a `-` upper-cased, the rest lower-cased.
///
/// Names containing bytes outside the HTTP token set are returned as is.
pub fn canonical_name(name: &str) -> String {
    if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
        return name.to_string();
    }
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

/// Split a host header value into its individual values.
///
/// Commas inside double-quoted strings do not separate values, and headers
/// whose single values contain commas (cookies, HTTP dates) are never split.
/// Each value is trimmed of surrounding whitespace; empty values are
/// dropped unless the whole value was empty.
pub fn split_values(name: &str, value: &str) -> Vec<String> {
    if UNSPLITTABLE.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        return vec![value.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in value.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);

    let parts: Vec<String> = parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        vec![String::new()]
    } else {
        parts
    }
}
