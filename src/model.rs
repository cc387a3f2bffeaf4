//! The value model (C5): `Request`, `Response`, `Message`, `Body`, `Chunk`.
//!
//! These are plain, immutable-once-built value types with no dependency on
//! any HTTP client/server crate's own request/response types (see
//! DESIGN.md for the dependency list).

use std::fmt;

/// An HTTP version, as `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const HTTP_0_9: Version = Version { major: 0, minor: 9 };
    pub const HTTP_1_0: Version = Version { major: 1, minor: 0 };
    pub const HTTP_1_1: Version = Version { major: 1, minor: 1 };
    pub const HTTP_2_0: Version = Version { major: 2, minor: 0 };

    pub fn new(major: u16, minor: u16) -> Version {
        Version { major, minor }
    }

    /// Whether this is one of the four versions the automaton recognizes
    /// without the `version` lenient flag.
    pub fn is_well_known(&self) -> bool {
        matches!(
            *self,
            Version::HTTP_0_9 | Version::HTTP_1_0 | Version::HTTP_1_1 | Version::HTTP_2_0
        )
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// An ordered, multi-valued mapping from a textual key (header name or
/// chunk-extension name) to its sequence of values.
///
/// Insertion order is preserved per key; duplicate keys are grouped rather
/// than overwritten (headers are never de-duplicated or overwritten).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, Vec<String>)>,
}

impl FieldMap {
    pub fn new() -> FieldMap {
        FieldMap { entries: Vec::new() }
    }

    /// Append a value under `key`, creating the group if this is the first
    /// occurrence of `key`.
    pub fn push(&mut self, key: String, value: String) {
        if let Some((_, values)) =
            self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            values.push(value);
        } else {
            self.entries.push((key, vec![value]));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All values for `key`, in insertion order, or `None` if absent.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.as_slice())
    }

    /// The first value for `key`, case-insensitively.
    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|values| values.first()).map(|s| s.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// One chunk of a chunked-transfer-encoded body: the decoded data bytes plus
/// zero or more `;name=value` extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub data: Vec<u8>,
    pub extensions: FieldMap,
}

/// The reconstructed entity body of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Empty,
    Single(Vec<u8>),
    Chunked(Vec<Chunk>),
}

impl Default for Body {
    fn default() -> Body {
        Body::Empty
    }
}

impl Body {
    /// Concatenation of all the body's bytes in order.
    pub fn data(&self) -> Vec<u8> {
        match self {
            Body::Empty => Vec::new(),
            Body::Single(bytes) => bytes.clone(),
            Body::Chunked(chunks) => {
                let mut out = Vec::with_capacity(chunks.iter().map(|c| c.data.len()).sum());
                for chunk in chunks {
                    out.extend_from_slice(&chunk.data);
                }
                out
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// A fully reconstructed HTTP/1.x request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub protocol: String,
    pub version: Version,
    pub headers: FieldMap,
    pub body: Body,
}

/// A fully reconstructed HTTP/1.x response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub protocol: String,
    pub version: Version,
    /// The numeric status code. The distilled spec models `Response` with
    /// only the reason-phrase text; a usable crate needs the code itself to
    /// branch on, so it is carried here too (see SPEC_FULL.md §C) — the
    /// parser's observable state already tracks it, this just surfaces it on
    /// the built value as well.
    pub status_code: u16,
    /// The reason-phrase bytes, decoded as text.
    pub status: String,
    pub headers: FieldMap,
    pub body: Body,
}

/// Either a request or a response, as produced by a parser whose mode is
/// "either" until the first message resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(r) => Some(r),
        }
    }

    pub fn into_request(self) -> Option<Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(r) => Some(r),
        }
    }

    pub fn headers(&self) -> &FieldMap {
        match self {
            Message::Request(r) => &r.headers,
            Message::Response(r) => &r.headers,
        }
    }

    pub fn body(&self) -> &Body {
        match self {
            Message::Request(r) => &r.body,
            Message::Response(r) => &r.body,
        }
    }
}

/// Canonical reason phrase for well-known status codes.
pub fn canonical_reason(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        417 => "Expectation Failed",
        426 => "Upgrade Required",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn field_map_groups_duplicates_in_order() {
        let mut m = FieldMap::new();
        m.push("Set-Cookie".into(), "a=1".into());
        m.push("Host".into(), "example.com".into());
        m.push("Set-Cookie".into(), "b=2".into());
        assert_eq!(m.get("Set-Cookie"), Some(&["a=1".to_string(), "b=2".to_string()][..]));
        assert_eq!(m.get("host"), Some(&["example.com".to_string()][..]));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn body_data_round_trips() {
        assert_eq!(Body::Empty.data(), Vec::<u8>::new());
        assert_eq!(Body::Single(b"Hello".to_vec()).data(), b"Hello".to_vec());
        let chunked = Body::Chunked(vec![
            Chunk { data: b"Hel".to_vec(), extensions: FieldMap::new() },
            Chunk { data: b"lo".to_vec(), extensions: FieldMap::new() },
        ]);
        assert_eq!(chunked.data(), b"Hello".to_vec());
    }

    #[test]
    fn version_display() {
        assert_eq!(Version::HTTP_1_1.to_string(), "1.1");
        assert!(Version::HTTP_1_1.is_well_known());
        assert!(!Version::new(3, 7).is_well_known());
    }
}
