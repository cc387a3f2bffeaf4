//! The single error type surfaced by `Parser::parse` and `Parser::finish`.
//!
//! Every error carries a stable numeric `code`, a short symbolic `name`
//! (matching the historical `HPE_*` naming used by http_parser/llhttp, which
//! this crate's event vocabulary is modeled on) and an optional human
//! `reason`. Two errors compare equal iff `(code, name, reason)` match.

use std::fmt;

use quick_error::quick_error;

quick_error! {
    /// The taxonomy of things that can make the automaton latch an error:
    /// grammar errors, callback errors, pause/upgrade, and user errors.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ErrorKind {
        Internal {
            display("internal parser error")
        }
        Strict {
            display("strict mode assertion failed")
        }
        LfExpected {
            display("expected LF after CR")
        }
        UnexpectedContentLength {
            display("unexpected Content-Length in presence of Transfer-Encoding: chunked")
        }
        ClosedConnection {
            display("data received after a connection-close terminated message")
        }
        InvalidMethod {
            display("Invalid method encountered")
        }
        InvalidUrl {
            display("Invalid characters in url")
        }
        InvalidConstant {
            display("Invalid constant string")
        }
        InvalidVersion {
            display("Invalid HTTP version")
        }
        InvalidHeaderToken {
            display("Invalid character in header")
        }
        InvalidContentLength {
            display("Invalid character in Content-Length")
        }
        InvalidChunkSize {
            display("Invalid character in chunk size")
        }
        InvalidStatus {
            display("Invalid status code")
        }
        InvalidEofState {
            display("Stream ended at an unexpected time")
        }
        InvalidTransferEncoding {
            display("Request has invalid Transfer-Encoding")
        }
        CbMessageBegin {
            display("the message-begin callback failed")
        }
        CbHeadersComplete {
            display("the headers-complete callback failed")
        }
        CbMessageComplete {
            display("the message-complete callback failed")
        }
        CbChunkHeader {
            display("the chunk-header callback failed")
        }
        CbChunkComplete {
            display("the chunk-complete callback failed")
        }
        CbReset {
            display("the reset callback failed")
        }
        CbPayload(kind: &'static str) {
            display("the {} callback failed", kind)
        }
        CbSignal(name: &'static str) {
            display("the {} callback failed", name)
        }
        Paused {
            display("parser is paused")
        }
        PausedUpgrade {
            display("response is upgrading, parser paused")
        }
        User {
            display("user callback error")
        }
    }
}

impl ErrorKind {
    /// The stable numeric code, matching the historical `HPE_*` numbering.
    pub fn code(&self) -> u16 {
        use self::ErrorKind::*;
        match *self {
            Internal => 1,
            Strict => 2,
            LfExpected => 3,
            UnexpectedContentLength => 4,
            ClosedConnection => 5,
            InvalidMethod => 6,
            InvalidUrl => 7,
            InvalidConstant => 8,
            InvalidVersion => 9,
            InvalidHeaderToken => 10,
            InvalidContentLength => 11,
            InvalidChunkSize => 12,
            InvalidStatus => 13,
            InvalidEofState => 14,
            InvalidTransferEncoding => 15,
            CbMessageBegin => 16,
            CbHeadersComplete => 17,
            CbMessageComplete => 18,
            CbChunkHeader => 19,
            CbChunkComplete => 20,
            CbSignal(_) => 23,
            Paused => 21,
            PausedUpgrade => 22,
            User => 24,
            CbReset | CbPayload(_) => 25,
        }
    }

    /// The short symbolic name, e.g. `HPE_INVALID_METHOD`.
    pub fn name(&self) -> &'static str {
        use self::ErrorKind::*;
        match *self {
            Internal => "HPE_INTERNAL",
            Strict => "HPE_STRICT",
            LfExpected => "HPE_LF_EXPECTED",
            UnexpectedContentLength => "HPE_UNEXPECTED_CONTENT_LENGTH",
            ClosedConnection => "HPE_CLOSED_CONNECTION",
            InvalidMethod => "HPE_INVALID_METHOD",
            InvalidUrl => "HPE_INVALID_URL",
            InvalidConstant => "HPE_INVALID_CONSTANT",
            InvalidVersion => "HPE_INVALID_VERSION",
            InvalidHeaderToken => "HPE_INVALID_HEADER_TOKEN",
            InvalidContentLength => "HPE_INVALID_CONTENT_LENGTH",
            InvalidChunkSize => "HPE_INVALID_CHUNK_SIZE",
            InvalidStatus => "HPE_INVALID_STATUS",
            InvalidEofState => "HPE_INVALID_EOF_STATE",
            InvalidTransferEncoding => "HPE_INVALID_TRANSFER_ENCODING",
            CbMessageBegin => "HPE_CB_MESSAGE_BEGIN",
            CbHeadersComplete => "HPE_CB_HEADERS_COMPLETE",
            CbMessageComplete => "HPE_CB_MESSAGE_COMPLETE",
            CbChunkHeader => "HPE_CB_CHUNK_HEADER",
            CbChunkComplete => "HPE_CB_CHUNK_COMPLETE",
            CbReset => "HPE_CB_RESET",
            CbPayload(_) => "HPE_CB_DATA",
            CbSignal(_) => "HPE_CB_SIGNAL",
            Paused => "HPE_PAUSED",
            PausedUpgrade => "HPE_PAUSED_UPGRADE",
            User => "HPE_USER",
        }
    }
}

/// The error value returned from `parse`/`finish`.
///
/// Equality is by `(code, name, reason)`: two sticky errors compare equal
/// regardless of where they were constructed, as long as they describe the
/// same condition.
#[derive(Debug, Clone)]
pub struct ParseError {
    code: u16,
    name: &'static str,
    reason: Option<String>,
}

impl ParseError {
    pub fn new(kind: ErrorKind) -> ParseError {
        let reason = Some(kind.to_string());
        ParseError { code: kind.code(), name: kind.name(), reason }
    }

    pub fn with_reason<S: Into<String>>(kind: ErrorKind, reason: S) -> ParseError {
        ParseError { code: kind.code(), name: kind.name(), reason: Some(reason.into()) }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_paused(&self) -> bool {
        self.name == "HPE_PAUSED"
    }

    pub fn is_paused_upgrade(&self) -> bool {
        self.name == "HPE_PAUSED_UPGRADE"
    }
}

impl PartialEq for ParseError {
    fn eq(&self, other: &ParseError) -> bool {
        self.code == other.code && self.name == other.name && self.reason == other.reason
    }
}
impl Eq for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} ({}): {}", self.name, self.code, reason),
            None => write!(f, "{} ({})", self.name, self.code),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<httparse::Error> for ParseError {
    fn from(err: httparse::Error) -> ParseError {
        use httparse::Error::*;
        let kind = match err {
            HeaderName | HeaderValue | NewLine | Token => ErrorKind::InvalidHeaderToken,
            Status => ErrorKind::InvalidStatus,
            TooManyHeaders => ErrorKind::InvalidHeaderToken,
            Version => ErrorKind::InvalidVersion,
        };
        ParseError::with_reason(kind, format!("{:?}", err))
    }
}

#[cfg(test)]
mod test {
    use super::{ErrorKind, ParseError};

    #[test]
    fn equality_is_by_triple() {
        let a = ParseError::new(ErrorKind::InvalidMethod);
        let b = ParseError::new(ErrorKind::InvalidMethod);
        assert_eq!(a, b);
        assert_eq!(a.code(), 6);
        assert_eq!(a.name(), "HPE_INVALID_METHOD");
    }

    #[test]
    fn paused_codes() {
        assert_eq!(ParseError::new(ErrorKind::Paused).code(), 21);
        assert_eq!(ParseError::new(ErrorKind::PausedUpgrade).code(), 22);
        assert!(ParseError::new(ErrorKind::Paused).is_paused());
        assert!(ParseError::new(ErrorKind::PausedUpgrade).is_paused_upgrade());
    }

    #[test]
    fn user_error_code() {
        assert_eq!(ParseError::new(ErrorKind::User).code(), 24);
    }
}
