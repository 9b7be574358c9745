//! Fetch-style header lists.
//!
//! Names are stored lower-cased. `get` and `entries` combine repeated names
//! into one `", "`-joined value, except `set-cookie`, which `entries` yields
//! once per value because cookie values may themselves contain commas.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::HostError;
use crate::lock;

const SET_COOKIE: &str = "set-cookie";

/// A host `Headers` object. Clones share the same list.
#[derive(Clone, Default)]
pub struct Headers {
    list: Arc<Mutex<Vec<(String, String)>>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value for `name`.
    ///
    /// Throws `TypeError` for names that are not HTTP tokens and for values
    /// containing CR, LF or NUL.
    pub fn append(&self, name: &str, value: &str) -> Result<(), HostError> {
        let name = normalize_name(name)?;
        let value = normalize_value(value)?;
        lock(&self.list).push((name, value));
        Ok(())
    }

    /// Replace every value of `name` with `value`.
    pub fn set(&self, name: &str, value: &str) -> Result<(), HostError> {
        let name = normalize_name(name)?;
        let value = normalize_value(value)?;
        let mut list = lock(&self.list);
        list.retain(|(n, _)| *n != name);
        list.push((name, value));
        Ok(())
    }

    pub fn delete(&self, name: &str) {
        let name = name.to_ascii_lowercase();
        lock(&self.list).retain(|(n, _)| *n != name);
    }

    pub fn has(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        lock(&self.list).iter().any(|(n, _)| *n == name)
    }

    /// All values of `name` joined with `", "`, or `None`.
    pub fn get(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        let list = lock(&self.list);
        let values: Vec<&str> = list
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    /// Every `set-cookie` value, one per entry.
    pub fn get_set_cookie(&self) -> Vec<String> {
        lock(&self.list)
            .iter()
            .filter(|(n, _)| n == SET_COOKIE)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Sorted `[name, value]` pairs as the host iterates them.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut names: Vec<String> = lock(&self.list).iter().map(|(n, _)| n.clone()).collect();
        names.sort();
        names.dedup();

        let mut entries = Vec::new();
        for name in names {
            if name == SET_COOKIE {
                for cookie in self.get_set_cookie() {
                    entries.push((name.clone(), cookie));
                }
            } else if let Some(value) = self.get(&name) {
                entries.push((name, value));
            }
        }
        entries
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.list).is_empty()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

fn normalize_name(name: &str) -> Result<String, HostError> {
    let valid = !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        });
    if !valid {
        return Err(HostError::type_error(format!("invalid header name: {name:?}")));
    }
    Ok(name.to_ascii_lowercase())
}

fn normalize_value(value: &str) -> Result<String, HostError> {
    if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
        return Err(HostError::type_error(format!("invalid header value: {value:?}")));
    }
    Ok(value.trim_matches(|c| c == ' ' || c == '\t').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        let headers = Headers::new();
        headers.append("Content-Type", "text/plain").unwrap();
        assert_eq!(headers.get("content-type").as_deref(), Some("text/plain"));
        assert!(headers.has("CONTENT-TYPE"));
    }

    #[test]
    fn repeated_names_join_on_get() {
        let headers = Headers::new();
        headers.append("Accept", "text/html").unwrap();
        headers.append("accept", "application/json").unwrap();
        assert_eq!(
            headers.get("accept").as_deref(),
            Some("text/html, application/json")
        );
    }

    #[test]
    fn entries_are_sorted_and_keep_cookies_apart() {
        let headers = Headers::new();
        headers.append("X-B", "2").unwrap();
        headers.append("Set-Cookie", "a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        headers.append("x-a", "1").unwrap();
        headers.append("set-cookie", "b=2").unwrap();

        let entries = headers.entries();
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["set-cookie", "set-cookie", "x-a", "x-b"]);
        assert_eq!(entries[0].1, "a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn invalid_names_and_values_throw() {
        let headers = Headers::new();
        assert_eq!(headers.append("bad name", "x").unwrap_err().name(), "TypeError");
        assert!(headers.append("x-ok", "line\r\nbreak").is_err());
        assert!(headers.is_empty());
    }

    #[test]
    fn set_replaces_and_delete_removes() {
        let headers = Headers::new();
        headers.append("x-v", "1").unwrap();
        headers.append("x-v", "2").unwrap();
        headers.set("X-V", "3").unwrap();
        assert_eq!(headers.get("x-v").as_deref(), Some("3"));
        headers.delete("x-v");
        assert_eq!(headers.get("x-v"), None);
    }
}
