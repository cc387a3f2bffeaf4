//! The event layer's vocabulary: signals, payload fragment types, and the
//! per-callback-kind return actions (the "callback return discipline" of
//! the automaton).
//!
//! Callbacks here are free functions or closures rather than a
//! state-carrying trait; each callback kind returns one of the explicit
//! action enums below to tell the automaton whether to proceed, pause, or
//! abort with an error.

use std::fmt;

/// A zero-payload event marking a boundary in the HTTP/1.x grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    MessageBegin,
    MessageComplete,
    Reset,
    UrlComplete,
    MethodComplete,
    ProtocolComplete,
    VersionComplete,
    StatusComplete,
    HeaderFieldComplete,
    HeaderValueComplete,
    ChunkHeader,
    ChunkComplete,
    ChunkExtensionNameComplete,
    ChunkExtensionValueComplete,
}

/// The kind of a payload fragment. The same kind may be delivered across
/// several consecutive fragments; concatenation up to the matching
/// `*-complete` signal yields the full field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Url,
    Method,
    Protocol,
    Version,
    Status,
    HeaderField,
    HeaderValue,
    Body,
    ChunkExtensionName,
    ChunkExtensionValue,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PayloadKind::Url => "url",
            PayloadKind::Method => "method",
            PayloadKind::Protocol => "protocol",
            PayloadKind::Version => "version",
            PayloadKind::Status => "status",
            PayloadKind::HeaderField => "header-field",
            PayloadKind::HeaderValue => "header-value",
            PayloadKind::Body => "body",
            PayloadKind::ChunkExtensionName => "chunk-extension-name",
            PayloadKind::ChunkExtensionValue => "chunk-extension-value",
        };
        f.write_str(name)
    }
}

/// What a signal handler asks the automaton to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Proceed,
    Error,
    Pause,
}

/// What a payload handler asks the automaton to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadAction {
    Proceed,
    Error,
    UserError,
}

/// What the `headers-complete` handler asks the automaton to do next. This
/// handler is distinct from the general signal table (it is not itself one
/// of the `Signal` variants) because its return vocabulary is richer: it is
/// the only point at which a handler can short-circuit body framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersCompleteAction {
    Proceed,
    Error,
    Pause,
    /// Treat the body as zero-length without consuming body bytes, then
    /// proceed to the next message. Intended for pipelined bodyless
    /// requests (e.g. a HEAD response, or a handler that knows better than
    /// the framing headers).
    AssumeNoBodyAndContinue,
    /// As above, but latch `HPE_PAUSED_UPGRADE` after `message-complete` so
    /// the driver can hand the remainder of the stream to a higher-layer
    /// protocol.
    AssumeNoBodyAndPauseUpgrade,
}

/// Unset callback slots default to always returning `Proceed`.
pub struct Callbacks {
    signal: Option<Box<dyn FnMut(Signal) -> SignalAction>>,
    payload: Option<Box<dyn FnMut(PayloadKind, &[u8]) -> PayloadAction>>,
    headers_complete: Option<Box<dyn FnMut() -> HeadersCompleteAction>>,
}

impl Default for Callbacks {
    fn default() -> Callbacks {
        Callbacks { signal: None, payload: None, headers_complete: None }
    }
}

impl Callbacks {
    pub fn new() -> Callbacks {
        Callbacks::default()
    }

    pub fn on_signal<F>(&mut self, f: F)
    where
        F: FnMut(Signal) -> SignalAction + 'static,
    {
        self.signal = Some(Box::new(f));
    }

    pub fn on_payload<F>(&mut self, f: F)
    where
        F: FnMut(PayloadKind, &[u8]) -> PayloadAction + 'static,
    {
        self.payload = Some(Box::new(f));
    }

    pub fn on_headers_complete<F>(&mut self, f: F)
    where
        F: FnMut() -> HeadersCompleteAction + 'static,
    {
        self.headers_complete = Some(Box::new(f));
    }

    pub fn signal(&mut self, sig: Signal) -> SignalAction {
        match self.signal.as_mut() {
            Some(cb) => cb(sig),
            None => SignalAction::Proceed,
        }
    }

    pub fn payload(&mut self, kind: PayloadKind, bytes: &[u8]) -> PayloadAction {
        if bytes.is_empty() {
            return PayloadAction::Proceed;
        }
        match self.payload.as_mut() {
            Some(cb) => cb(kind, bytes),
            None => PayloadAction::Proceed,
        }
    }

    pub fn headers_complete(&mut self) -> HeadersCompleteAction {
        match self.headers_complete.as_mut() {
            Some(cb) => cb(),
            None => HeadersCompleteAction::Proceed,
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("signal", &self.signal.is_some())
            .field("payload", &self.payload.is_some())
            .field("headers_complete", &self.headers_complete.is_some())
            .finish()
    }
}
