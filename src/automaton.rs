//! The Protocol Automaton (C1): a byte-driven state machine that recognizes
//! HTTP/1.x request/response grammar and emits signals and payload fragments
//! through a [`Callbacks`] table.
//!
//! Bytes handed to [`Automaton::feed`] are appended to an internal scratch
//! buffer, and everything that buffer lets us finish gets turned into events
//! before `feed` returns. What cannot yet be finished (a half-received
//! header line, a half-received chunk) waits for the next call.
//!
//! One simplification from a byte-for-byte-incremental automaton: the
//! request/status line plus header block (and, symmetrically, chunk trailers)
//! are accumulated whole before being tokenized and replayed as events, rather
//! than being tokenized as each byte crosses a lexing boundary. Fixed-length
//! and chunked body bytes *are* streamed incrementally straight out of the
//! scratch buffer. This keeps the event-sequence invariant (same events
//! regardless of how input is fragmented) while avoiding a hand-written
//! byte-by-byte header lexer; header blocks are bounded by `MAX_HEADERS_SIZE`
//! below.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::callbacks::{Callbacks, HeadersCompleteAction, PayloadAction, PayloadKind, Signal, SignalAction};
use crate::errors::{ErrorKind, ParseError};
use crate::lenient::LenientFlags;
use crate::model::Version;

/// Preallocated header-slot count for the `httparse` fast path.
const MAX_HEADERS_NUM: usize = 256;
/// A head (or trailer) that grows past this without completing is a grammar
/// error rather than an unbounded buffer.
const MAX_HEADERS_SIZE: usize = 16384;
/// Bound on a chunk-size line (size plus extensions) before completing.
const MAX_CHUNK_HEAD: usize = 128;

/// Which grammar the automaton is configured to recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserMode {
    Request,
    Response,
    /// Defer classification until enough bytes arrive to disambiguate a
    /// method token from a `HTTP/` status-line prefix.
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolvedMode {
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BodyFraming {
    Empty,
    Fixed(u64),
    Chunked,
    UntilClose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Accumulating (and, once complete, tokenizing) the request/status line
    /// plus the header block.
    Head,
    BodyFixed(u64),
    BodyUntilClose,
    ChunkSize,
    ChunkData(u64),
    /// Waiting for the CRLF that follows a chunk's data.
    ChunkCrlf,
    /// Accumulating the trailer header block after the terminal zero-chunk.
    ChunkTrailer,
}

/// A read-only snapshot of the automaton's progress on the in-flight message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservableState {
    pub version: Version,
    /// Set once method-complete has fired, for requests.
    pub method: Option<String>,
    /// 0 until status-complete has fired, for responses.
    pub status_code: u16,
    pub status_name: &'static str,
    pub upgrade: bool,
    pub content_length: u64,
    pub should_keep_alive: bool,
    pub message_needs_eof: bool,
}

/// The C1 state machine. Has no knowledge of I/O; [`Automaton::feed`] is pure
/// function of `(self, bytes, callbacks) -> (self', events via callbacks)`.
#[derive(Debug)]
pub struct Automaton {
    mode: ParserMode,
    lenient: LenientFlags,
    state: State,
    carry: Vec<u8>,
    latched: Option<ParseError>,
    resolved: Option<ResolvedMode>,
    message_begun: bool,
    observable: ObservableState,
    connection_close_seen: bool,
    /// Mirrors `observable` for callers that need to read it from inside a
    /// callback (e.g. the message builder's driver, which must snapshot
    /// version/status at the instant `message-complete` fires but cannot
    /// borrow this `Automaton` from its own callback closures). See the
    /// crate's cyclic-ownership design note.
    state_sink: Option<Rc<RefCell<ObservableState>>>,
}

impl Automaton {
    pub fn new(mode: ParserMode) -> Automaton {
        Automaton {
            mode,
            lenient: LenientFlags::empty(),
            state: State::Head,
            carry: Vec::new(),
            latched: None,
            resolved: None,
            message_begun: false,
            observable: ObservableState::default(),
            connection_close_seen: false,
            state_sink: None,
        }
    }

    /// Attach a shared cell that mirrors this automaton's observable state
    /// whenever it is about to fire `message-complete`. Used by
    /// [`crate::messages::MessagesParser`] to read version/status from
    /// inside its own signal callback.
    pub fn attach_state_sink(&mut self, sink: Rc<RefCell<ObservableState>>) {
        self.state_sink = Some(sink);
    }

    pub fn mode(&self) -> ParserMode {
        self.mode
    }

    pub fn lenient_flags(&self) -> LenientFlags {
        self.lenient
    }

    pub fn set_lenient_flags(&mut self, flags: LenientFlags) {
        self.lenient = flags;
    }

    pub fn observable_state(&self) -> &ObservableState {
        &self.observable
    }

    pub fn is_latched(&self) -> bool {
        self.latched.is_some()
    }

    /// Bytes that arrived after a `paused-upgrade` latch: the remainder of
    /// the stream, handed back so the driver can pass it to whatever protocol
    /// the connection upgraded to.
    pub fn trailing_bytes(&self) -> &[u8] {
        &self.carry
    }

    /// Feed a (possibly empty) fragment of the byte stream. Returns the
    /// first error the automaton latches; once latched, every subsequent
    /// call returns the same error until [`Automaton::reset`].
    pub fn feed(&mut self, data: &[u8], cb: &mut Callbacks) -> Result<(), ParseError> {
        if let Some(err) = &self.latched {
            trace!("feed() on already-latched parser: returning sticky {}", err.name());
            return Err(err.clone());
        }
        trace!("feed(): {} bytes, state {:?}", data.len(), self.state);
        self.carry.extend_from_slice(data);
        let mut pos = 0usize;
        let result = self.run(cb, &mut pos);
        self.carry.drain(0..pos);
        if let Err(err) = &result {
            debug!("parser latched: {}", err);
            self.latched = Some(err.clone());
        }
        result
    }

    /// Declare end-of-stream. For a body terminated by connection close,
    /// this is what lets the in-flight message complete; for any other
    /// mid-message state, it is an error.
    pub fn finish(&mut self, cb: &mut Callbacks) -> Result<(), ParseError> {
        if let Some(err) = &self.latched {
            return Err(err.clone());
        }
        match &self.state {
            State::Head if !self.message_begun && self.carry.is_empty() => Ok(()),
            State::BodyUntilClose => {
                let remaining = std::mem::take(&mut self.carry);
                if !remaining.is_empty() {
                    match cb.payload(PayloadKind::Body, &remaining) {
                        PayloadAction::Proceed => {}
                        PayloadAction::Error => {
                            let err = ParseError::new(ErrorKind::CbPayload("body"));
                            self.latched = Some(err.clone());
                            return Err(err);
                        }
                        PayloadAction::UserError => {
                            let err = ParseError::new(ErrorKind::User);
                            self.latched = Some(err.clone());
                            return Err(err);
                        }
                    }
                }
                self.complete_message(cb)
            }
            _ => {
                let err = ParseError::new(ErrorKind::InvalidEofState);
                self.latched = Some(err.clone());
                Err(err)
            }
        }
    }

    pub fn pause(&mut self) {
        if self.latched.is_none() {
            trace!("pause()");
            self.latched = Some(ParseError::new(ErrorKind::Paused));
        }
    }

    pub fn resume(&mut self) {
        if matches!(&self.latched, Some(e) if e.is_paused()) {
            trace!("resume()");
            self.latched = None;
        }
    }

    pub fn resume_after_upgrade(&mut self) {
        if matches!(&self.latched, Some(e) if e.is_paused_upgrade()) {
            trace!("resume_after_upgrade()");
            self.latched = None;
        }
    }

    /// Return to the initial state, preserving `mode` and `lenient` flags.
    pub fn reset(&mut self) {
        trace!("reset()");
        self.state = State::Head;
        self.carry.clear();
        self.latched = None;
        self.resolved = None;
        self.message_begun = false;
        self.observable = ObservableState::default();
        self.connection_close_seen = false;
        self.sync_sink();
    }

    fn reset_message_state(&mut self) {
        self.state = State::Head;
        self.resolved = if self.mode == ParserMode::Either { None } else { self.resolved };
        self.message_begun = false;
        self.observable = ObservableState::default();
        self.sync_sink();
    }

    fn sync_sink(&self) {
        if let Some(sink) = &self.state_sink {
            *sink.borrow_mut() = self.observable.clone();
        }
    }

    fn run(&mut self, cb: &mut Callbacks, pos: &mut usize) -> Result<(), ParseError> {
        loop {
            match self.state.clone() {
                State::Head => match self.try_head(cb, *pos)? {
                    Some(consumed) => {
                        *pos += consumed;
                    }
                    None => return Ok(()),
                },
                State::BodyFixed(remaining) => {
                    let avail = self.carry.len() - *pos;
                    if avail == 0 {
                        return Ok(());
                    }
                    let take = avail.min(remaining as usize);
                    let action = {
                        let bytes = &self.carry[*pos..*pos + take];
                        cb.payload(PayloadKind::Body, bytes)
                    };
                    self.deny_payload_error(action, "body")?;
                    *pos += take;
                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        self.complete_message(cb)?;
                    } else {
                        self.state = State::BodyFixed(remaining);
                    }
                }
                State::BodyUntilClose => {
                    let avail = self.carry.len() - *pos;
                    if avail == 0 {
                        return Ok(());
                    }
                    let action = {
                        let bytes = &self.carry[*pos..];
                        cb.payload(PayloadKind::Body, bytes)
                    };
                    self.deny_payload_error(action, "body")?;
                    *pos = self.carry.len();
                    // Stays in BodyUntilClose: only `finish()` ends it.
                    return Ok(());
                }
                State::ChunkSize => match self.try_chunk_size(cb, *pos)? {
                    Some(consumed) => *pos += consumed,
                    None => return Ok(()),
                },
                State::ChunkData(remaining) => {
                    let avail = self.carry.len() - *pos;
                    if avail == 0 {
                        return Ok(());
                    }
                    let take = avail.min(remaining as usize);
                    let action = {
                        let bytes = &self.carry[*pos..*pos + take];
                        cb.payload(PayloadKind::Body, bytes)
                    };
                    self.deny_payload_error(action, "body")?;
                    *pos += take;
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 { State::ChunkCrlf } else { State::ChunkData(remaining) };
                }
                State::ChunkCrlf => match self.try_chunk_crlf(cb, *pos)? {
                    Some(consumed) => *pos += consumed,
                    None => return Ok(()),
                },
                State::ChunkTrailer => match self.try_trailer(cb, *pos)? {
                    Some(consumed) => *pos += consumed,
                    None => return Ok(()),
                },
            }
        }
    }

    fn deny_payload_error(&self, action: PayloadAction, kind: &'static str) -> Result<(), ParseError> {
        match action {
            PayloadAction::Proceed => Ok(()),
            PayloadAction::Error => Err(ParseError::new(ErrorKind::CbPayload(kind))),
            PayloadAction::UserError => Err(ParseError::new(ErrorKind::User)),
        }
    }

    fn fire_signal(&self, cb: &mut Callbacks, sig: Signal, on_error_code: &'static str) -> Result<(), ParseError> {
        match cb.signal(sig) {
            SignalAction::Proceed => Ok(()),
            SignalAction::Error => Err(ParseError::new(ErrorKind::CbSignal(on_error_code))),
            SignalAction::Pause => Err(ParseError::new(ErrorKind::Paused)),
        }
    }

    /// Tokenize the request/status line plus header block, once the whole
    /// thing is present in `self.carry[pos..]`; fires every event from
    /// `message-begin` through `headers-complete`, and leaves `self.state`
    /// pointing at whatever comes after (a body state, or back at `Head` if
    /// the message already completed via an `assumeNoBody*` action).
    fn try_head(&mut self, cb: &mut Callbacks, pos: usize) -> Result<Option<usize>, ParseError> {
        if !self.message_begun && self.connection_close_seen && pos < self.carry.len() {
            if self.lenient.contains(LenientFlags::KEEP_ALIVE) {
                // fall through and parse the next message normally
            } else if self.lenient.contains(LenientFlags::DATA_AFTER_CLOSE) {
                trace!("discarding {} bytes received after connection close", self.carry.len() - pos);
                return Ok(Some(self.carry.len() - pos));
            } else {
                return Err(ParseError::new(ErrorKind::ClosedConnection));
            }
        }
        if self.carry.len() - pos > MAX_HEADERS_SIZE {
            return Err(ParseError::new(ErrorKind::InvalidHeaderToken));
        }
        let resolved = match self.resolve_mode(pos) {
            Some(r) => r,
            None => return Ok(None),
        };

        let buf = &self.carry[pos..];
        let (line_content_end, after_line) = match find_line_end(buf, 0, self.lenient)
            .map_err(|_| ParseError::new(ErrorKind::LfExpected))?
        {
            Some(v) => v,
            None => return Ok(None),
        };
        let line: Vec<u8> = buf[..line_content_end].to_vec();

        let (headers_consumed, fields) =
            match parse_header_block(&buf[after_line..], self.lenient)? {
                Some(v) => v,
                None => return Ok(None),
            };

        if !self.message_begun {
            self.fire_signal(cb, Signal::MessageBegin, "HPE_CB_MESSAGE_BEGIN")?;
            self.message_begun = true;
        }

        match resolved {
            ResolvedMode::Request => self.emit_request_line(cb, &line)?,
            ResolvedMode::Response => self.emit_status_line(cb, &line)?,
        }

        for (name, value) in &fields {
            emit_payload_group(cb, PayloadKind::HeaderField, name, Signal::HeaderFieldComplete)?;
            emit_payload_group(cb, PayloadKind::HeaderValue, value, Signal::HeaderValueComplete)?;
        }

        let framing = self.classify_body(resolved, &fields)?;

        let action = cb.headers_complete();
        let total_consumed = after_line + headers_consumed;
        match action {
            HeadersCompleteAction::Error => Err(ParseError::new(ErrorKind::CbHeadersComplete)),
            HeadersCompleteAction::Pause => Err(ParseError::new(ErrorKind::Paused)),
            HeadersCompleteAction::Proceed => {
                match framing {
                    BodyFraming::Empty => self.complete_message(cb)?,
                    BodyFraming::Fixed(0) => self.complete_message(cb)?,
                    BodyFraming::Fixed(n) => self.state = State::BodyFixed(n),
                    BodyFraming::Chunked => self.state = State::ChunkSize,
                    BodyFraming::UntilClose => self.state = State::BodyUntilClose,
                }
                Ok(Some(total_consumed))
            }
            HeadersCompleteAction::AssumeNoBodyAndContinue => {
                self.complete_message(cb)?;
                Ok(Some(total_consumed))
            }
            HeadersCompleteAction::AssumeNoBodyAndPauseUpgrade => {
                self.observable.upgrade = true;
                self.complete_message(cb)?;
                // `complete_message` just fired `reset` and wiped `observable`
                // for the next message; an upgrade hands the rest of the
                // stream to a different protocol; there is no next HTTP
                // message, so restore the one bit of state callers are
                // contractually owed: `upgrade` stays readable until
                // `resume_after_upgrade`.
                self.observable.upgrade = true;
                self.sync_sink();
                let err = ParseError::new(ErrorKind::PausedUpgrade);
                self.latched = Some(err.clone());
                Err(err)
            }
        }
    }

    fn resolve_mode(&mut self, pos: usize) -> Option<ResolvedMode> {
        if let Some(r) = self.resolved {
            return Some(r);
        }
        match self.mode {
            ParserMode::Request => {
                self.resolved = Some(ResolvedMode::Request);
            }
            ParserMode::Response => {
                self.resolved = Some(ResolvedMode::Response);
            }
            ParserMode::Either => {
                let buf = &self.carry[pos..];
                if buf.len() < 5 {
                    return None;
                }
                let is_response = buf.starts_with(b"HTTP/");
                self.resolved = Some(if is_response { ResolvedMode::Response } else { ResolvedMode::Request });
            }
        }
        self.resolved
    }

    fn emit_request_line(&mut self, cb: &mut Callbacks, line: &[u8]) -> Result<(), ParseError> {
        let (method, target, version_bytes) = split_request_line(line)?;
        for b in method {
            if !is_token_char(*b) {
                return Err(ParseError::new(ErrorKind::InvalidMethod));
            }
        }
        if target.is_empty() {
            return Err(ParseError::new(ErrorKind::InvalidUrl));
        }
        let version = parse_version(version_bytes)?;
        self.check_version(version)?;

        emit_payload_group(cb, PayloadKind::Method, method, Signal::MethodComplete)?;
        self.observable.method = Some(String::from_utf8_lossy(method).into_owned());
        emit_payload_group(cb, PayloadKind::Url, target, Signal::UrlComplete)?;
        emit_payload_group(cb, PayloadKind::Protocol, b"HTTP", Signal::ProtocolComplete)?;
        emit_payload_group(cb, PayloadKind::Version, version_bytes, Signal::VersionComplete)?;
        self.observable.version = version;
        Ok(())
    }

    fn emit_status_line(&mut self, cb: &mut Callbacks, line: &[u8]) -> Result<(), ParseError> {
        let (version_bytes, code_bytes, reason) = split_status_line(line)?;
        let version = parse_version(version_bytes)?;
        self.check_version(version)?;
        let code: u16 = std::str::from_utf8(code_bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|c| (100..1000).contains(c))
            .ok_or_else(|| ParseError::new(ErrorKind::InvalidStatus))?;

        emit_payload_group(cb, PayloadKind::Protocol, b"HTTP", Signal::ProtocolComplete)?;
        emit_payload_group(cb, PayloadKind::Version, version_bytes, Signal::VersionComplete)?;
        self.observable.version = version;
        emit_payload_group(cb, PayloadKind::Status, reason, Signal::StatusComplete)?;
        self.observable.status_code = code;
        self.observable.status_name = crate::model::canonical_reason(code);
        Ok(())
    }

    fn check_version(&self, version: Version) -> Result<(), ParseError> {
        if !version.is_well_known() && !self.lenient.contains(LenientFlags::VERSION) {
            return Err(ParseError::new(ErrorKind::InvalidVersion));
        }
        Ok(())
    }

    /// Inspect the collected header fields and decide how the body (if any)
    /// is framed, across both request and response framing rules.
    fn classify_body(
        &mut self,
        resolved: ResolvedMode,
        fields: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<BodyFraming, ParseError> {
        let mut content_length: Option<u64> = None;
        let mut chunked = false;
        let mut connection_close = false;
        let mut connection_keep_alive = false;
        let mut upgrade = false;

        for (name, value) in fields {
            if is_header(name, "content-length") {
                let text = std::str::from_utf8(value)
                    .map_err(|_| ParseError::new(ErrorKind::InvalidContentLength))?
                    .trim();
                let n: u64 = text.parse().map_err(|_| ParseError::new(ErrorKind::InvalidContentLength))?;
                if let Some(prev) = content_length {
                    if prev != n {
                        return Err(ParseError::new(ErrorKind::InvalidContentLength));
                    }
                }
                content_length = Some(n);
            } else if is_header(name, "transfer-encoding") {
                let text = String::from_utf8_lossy(value).to_ascii_lowercase();
                let is_chunked = text.split(',').map(|s| s.trim()).last() == Some("chunked");
                if is_chunked {
                    chunked = true;
                } else if !self.lenient.contains(LenientFlags::TRANSFER_ENCODING) {
                    return Err(ParseError::new(ErrorKind::InvalidTransferEncoding));
                }
            } else if is_header(name, "connection") {
                let text = String::from_utf8_lossy(value).to_ascii_lowercase();
                for token in text.split(',').map(|s| s.trim()) {
                    match token {
                        "close" => connection_close = true,
                        "keep-alive" => connection_keep_alive = true,
                        "upgrade" => upgrade = true,
                        _ => {}
                    }
                }
            }
        }

        if chunked && content_length.is_some() && !self.lenient.contains(LenientFlags::CHUNKED_LENGTH) {
            return Err(ParseError::new(ErrorKind::UnexpectedContentLength));
        }
        if connection_close {
            self.connection_close_seen = true;
        }

        self.observable.upgrade = upgrade;
        self.observable.content_length = content_length.unwrap_or(0);
        self.observable.should_keep_alive = match self.observable.version {
            v if v == Version::HTTP_1_0 => connection_keep_alive && !connection_close,
            _ => !connection_close,
        };

        if chunked {
            self.observable.message_needs_eof = false;
            return Ok(BodyFraming::Chunked);
        }
        if let Some(n) = content_length {
            self.observable.message_needs_eof = false;
            return Ok(if n == 0 { BodyFraming::Empty } else { BodyFraming::Fixed(n) });
        }
        match resolved {
            ResolvedMode::Request => {
                self.observable.message_needs_eof = false;
                Ok(BodyFraming::Empty)
            }
            ResolvedMode::Response => {
                let status = self.observable.status_code;
                // 1xx, 204, and 304 never carry a body regardless of framing
                // headers. A response to HEAD/CONNECT is the other bodyless
                // case in llhttp, but this automaton parses a response in
                // isolation with no link to the request that produced it, so
                // there is no method to check here.
                let bodyless = (100..200).contains(&status) || status == 204 || status == 304;
                if bodyless {
                    self.observable.message_needs_eof = false;
                    Ok(BodyFraming::Empty)
                } else {
                    self.observable.message_needs_eof = true;
                    Ok(BodyFraming::UntilClose)
                }
            }
        }
    }

    fn try_chunk_size(&mut self, cb: &mut Callbacks, pos: usize) -> Result<Option<usize>, ParseError> {
        let buf = &self.carry[pos..];
        if buf.len() > MAX_CHUNK_HEAD {
            return Err(ParseError::new(ErrorKind::InvalidChunkSize));
        }
        let (content_end, after) = match find_line_end(buf, 0, self.lenient)
            .map_err(|_| ParseError::new(ErrorKind::InvalidChunkSize))?
        {
            Some(v) => v,
            None => return Ok(None),
        };
        let line = &buf[..content_end];
        let (size, ext) = parse_chunk_size_line(line, self.lenient)?;

        self.fire_signal(cb, Signal::ChunkHeader, "HPE_CB_CHUNK_HEADER")?;
        for (name, value) in &ext {
            emit_payload_group(cb, PayloadKind::ChunkExtensionName, name, Signal::ChunkExtensionNameComplete)?;
            emit_payload_group(cb, PayloadKind::ChunkExtensionValue, value, Signal::ChunkExtensionValueComplete)?;
        }

        if size == 0 {
            self.state = State::ChunkTrailer;
        } else {
            self.state = State::ChunkData(size);
        }
        Ok(Some(after))
    }

    fn try_chunk_crlf(&mut self, cb: &mut Callbacks, pos: usize) -> Result<Option<usize>, ParseError> {
        if self.lenient.contains(LenientFlags::OPTIONAL_CRLF_AFTER_CHUNK) {
            self.fire_signal(cb, Signal::ChunkComplete, "HPE_CB_CHUNK_COMPLETE")?;
            self.state = State::ChunkSize;
            return Ok(Some(0));
        }
        let buf = &self.carry[pos..];
        match find_line_end(buf, 0, self.lenient).map_err(|_| ParseError::new(ErrorKind::InvalidChunkSize))? {
            Some((0, after)) => {
                self.fire_signal(cb, Signal::ChunkComplete, "HPE_CB_CHUNK_COMPLETE")?;
                self.state = State::ChunkSize;
                Ok(Some(after))
            }
            Some(_) => Err(ParseError::new(ErrorKind::InvalidChunkSize)),
            None => Ok(None),
        }
    }

    fn try_trailer(&mut self, cb: &mut Callbacks, pos: usize) -> Result<Option<usize>, ParseError> {
        let buf = &self.carry[pos..];
        if buf.len() > MAX_HEADERS_SIZE {
            return Err(ParseError::new(ErrorKind::InvalidHeaderToken));
        }
        let (consumed, fields) = match parse_header_block(buf, self.lenient)? {
            Some(v) => v,
            None => return Ok(None),
        };
        for (name, value) in &fields {
            emit_payload_group(cb, PayloadKind::HeaderField, name, Signal::HeaderFieldComplete)?;
            emit_payload_group(cb, PayloadKind::HeaderValue, value, Signal::HeaderValueComplete)?;
        }
        self.fire_signal(cb, Signal::ChunkComplete, "HPE_CB_CHUNK_COMPLETE")?;
        self.complete_message(cb)?;
        Ok(Some(consumed))
    }

    fn complete_message(&mut self, cb: &mut Callbacks) -> Result<(), ParseError> {
        debug!(
            "message complete: version {} status {} content_length {}",
            self.observable.version, self.observable.status_code, self.observable.content_length
        );
        self.sync_sink();
        self.fire_signal(cb, Signal::MessageComplete, "HPE_CB_MESSAGE_COMPLETE")?;
        match cb.signal(Signal::Reset) {
            SignalAction::Proceed => {}
            SignalAction::Error => return Err(ParseError::new(ErrorKind::CbReset)),
            SignalAction::Pause => return Err(ParseError::new(ErrorKind::Paused)),
        }
        self.reset_message_state();
        Ok(())
    }
}

fn is_header(name: &[u8], expected: &str) -> bool {
    name.eq_ignore_ascii_case(expected.as_bytes())
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(b, b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~')
}

fn emit_payload_group(
    cb: &mut Callbacks,
    kind: PayloadKind,
    bytes: &[u8],
    complete: Signal,
) -> Result<(), ParseError> {
    match cb.payload(kind, bytes) {
        PayloadAction::Proceed => {}
        PayloadAction::Error => return Err(ParseError::new(ErrorKind::CbPayload(payload_kind_name(kind)))),
        PayloadAction::UserError => return Err(ParseError::new(ErrorKind::User)),
    }
    match cb.signal(complete) {
        SignalAction::Proceed => Ok(()),
        SignalAction::Error => Err(ParseError::new(ErrorKind::CbSignal(signal_error_name(complete)))),
        SignalAction::Pause => Err(ParseError::new(ErrorKind::Paused)),
    }
}

fn payload_kind_name(kind: PayloadKind) -> &'static str {
    match kind {
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
    }
}

fn signal_error_name(sig: Signal) -> &'static str {
    match sig {
        Signal::UrlComplete => "HPE_CB_URL",
        Signal::MethodComplete => "HPE_CB_METHOD",
        Signal::ProtocolComplete => "HPE_CB_PROTOCOL",
        Signal::VersionComplete => "HPE_CB_VERSION",
        Signal::StatusComplete => "HPE_CB_STATUS",
        Signal::HeaderFieldComplete => "HPE_CB_HEADER_FIELD",
        Signal::HeaderValueComplete => "HPE_CB_HEADER_VALUE",
        Signal::ChunkExtensionNameComplete => "HPE_CB_CHUNK_EXTENSION_NAME",
        Signal::ChunkExtensionValueComplete => "HPE_CB_CHUNK_EXTENSION_VALUE",
        _ => "HPE_CB_SIGNAL",
    }
}

/// Find the next line terminator in `buf[from..]`. Returns the content end
/// and the offset just past the terminator, both relative to the start of
/// `buf`. `Ok(None)` means "wait for more data"; `Err(())` means a bare CR or
/// LF was seen where the relevant lenient flag does not permit it.
fn find_line_end(buf: &[u8], from: usize, lenient: LenientFlags) -> Result<Option<(usize, usize)>, ()> {
    let mut i = from;
    while i < buf.len() {
        match buf[i] {
            b'\n' => {
                if i > from && buf[i - 1] == b'\r' {
                    return Ok(Some((i - 1, i + 1)));
                }
                if lenient.contains(LenientFlags::OPTIONAL_CR_BEFORE_LF) {
                    return Ok(Some((i, i + 1)));
                }
                return Err(());
            }
            b'\r' => {
                if i + 1 < buf.len() {
                    if buf[i + 1] == b'\n' {
                        return Ok(Some((i, i + 2)));
                    }
                    if lenient.contains(LenientFlags::OPTIONAL_LF_AFTER_CR) {
                        return Ok(Some((i, i + 1)));
                    }
                    return Err(());
                }
                return Ok(None);
            }
            _ => i += 1,
        }
    }
    Ok(None)
}

fn split_request_line(line: &[u8]) -> Result<(&[u8], &[u8], &[u8]), ParseError> {
    let sp1 = line.iter().position(|&b| b == b' ').ok_or_else(|| ParseError::new(ErrorKind::InvalidMethod))?;
    let rest = &line[sp1 + 1..];
    let sp2 = rest.iter().position(|&b| b == b' ').ok_or_else(|| ParseError::new(ErrorKind::InvalidUrl))?;
    Ok((&line[..sp1], &rest[..sp2], &rest[sp2 + 1..]))
}

fn split_status_line(line: &[u8]) -> Result<(&[u8], &[u8], &[u8]), ParseError> {
    let sp1 = line.iter().position(|&b| b == b' ').ok_or_else(|| ParseError::new(ErrorKind::InvalidVersion))?;
    let version = &line[..sp1];
    let rest = &line[sp1 + 1..];
    match rest.iter().position(|&b| b == b' ') {
        Some(sp2) => Ok((version, &rest[..sp2], &rest[sp2 + 1..])),
        None => {
            if rest.len() == 3 {
                Ok((version, rest, b""))
            } else {
                Err(ParseError::new(ErrorKind::InvalidStatus))
            }
        }
    }
}

fn parse_version(bytes: &[u8]) -> Result<Version, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::new(ErrorKind::InvalidVersion))?;
    let rest = text.strip_prefix("HTTP/").ok_or_else(|| ParseError::new(ErrorKind::InvalidConstant))?;
    let (major_s, minor_s) = rest.split_once('.').ok_or_else(|| ParseError::new(ErrorKind::InvalidVersion))?;
    let major: u16 = major_s.parse().map_err(|_| ParseError::new(ErrorKind::InvalidVersion))?;
    let minor: u16 = minor_s.parse().map_err(|_| ParseError::new(ErrorKind::InvalidVersion))?;
    Ok(Version::new(major, minor))
}

/// Parse a chunk-size line: `hex-size [";" ext]*`, tolerating trailing
/// spaces before the terminator when `spacesAfterChunkSize` is set.
fn parse_chunk_size_line(line: &[u8], lenient: LenientFlags) -> Result<(u64, Vec<(Vec<u8>, Vec<u8>)>), ParseError> {
    let digits_end = line.iter().position(|b| !b.is_ascii_hexdigit()).unwrap_or(line.len());
    if digits_end == 0 {
        return Err(ParseError::new(ErrorKind::InvalidChunkSize));
    }
    let size = u64::from_str_radix(std::str::from_utf8(&line[..digits_end]).unwrap(), 16)
        .map_err(|_| ParseError::new(ErrorKind::InvalidChunkSize))?;
    let mut rest = &line[digits_end..];
    if lenient.contains(LenientFlags::SPACES_AFTER_CHUNK_SIZE) {
        while rest.first() == Some(&b' ') {
            rest = &rest[1..];
        }
    }
    let mut extensions = Vec::new();
    if !rest.is_empty() {
        if rest[0] != b';' {
            return Err(ParseError::new(ErrorKind::InvalidChunkSize));
        }
        for part in rest[1..].split(|&b| b == b';') {
            let part = trim_ows(part);
            if part.is_empty() {
                continue;
            }
            match part.iter().position(|&b| b == b'=') {
                Some(eq) => extensions.push((part[..eq].to_vec(), trim_ows(&part[eq + 1..]).to_vec())),
                None => extensions.push((part.to_vec(), Vec::new())),
            }
        }
    }
    Ok((size, extensions))
}

fn trim_ows(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != b' ' && b != b'\t').unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| b != b' ' && b != b'\t').map(|i| i + 1).unwrap_or(start);
    &bytes[start..end]
}

/// Tokenize a header block (`(field-name ":" OWS field-value OWS CRLF)* CRLF`).
///
/// Delegates to `httparse::parse_headers` when the block can be validated
/// strictly; falls back to a hand-rolled, permissive line scanner when
/// `headers` leniency or either line-ending leniency flag is active, since
/// `httparse` has no lever for either of those.
fn parse_header_block(
    buf: &[u8],
    lenient: LenientFlags,
) -> Result<Option<(usize, Vec<(Vec<u8>, Vec<u8>)>)>, ParseError> {
    let needs_fallback = lenient.intersects(
        LenientFlags::HEADERS | LenientFlags::OPTIONAL_LF_AFTER_CR | LenientFlags::OPTIONAL_CR_BEFORE_LF,
    );
    if !needs_fallback {
        let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS_NUM];
        return match httparse::parse_headers(buf, &mut raw) {
            Ok(httparse::Status::Complete((consumed, headers))) => Ok(Some((
                consumed,
                headers.iter().map(|h| (h.name.as_bytes().to_vec(), h.value.to_vec())).collect(),
            ))),
            Ok(httparse::Status::Partial) => Ok(None),
            Err(e) => Err(ParseError::from(e)),
        };
    }

    let mut fields = Vec::new();
    let mut pos = 0usize;
    loop {
        let (content_end, after) = match find_line_end(buf, pos, lenient).map_err(|_| ParseError::new(ErrorKind::LfExpected))? {
            Some(v) => v,
            None => return Ok(None),
        };
        if content_end == pos {
            return Ok(Some((after, fields)));
        }
        let line = &buf[pos..content_end];
        let colon = line.iter().position(|&b| b == b':').ok_or_else(|| ParseError::new(ErrorKind::InvalidHeaderToken))?;
        let name = &line[..colon];
        if name.is_empty() {
            return Err(ParseError::new(ErrorKind::InvalidHeaderToken));
        }
        if !lenient.contains(LenientFlags::HEADERS) {
            for b in name {
                if !is_token_char(*b) {
                    return Err(ParseError::new(ErrorKind::InvalidHeaderToken));
                }
            }
        }
        let value = trim_ows(&line[colon + 1..]);
        fields.push((name.to_vec(), value.to_vec()));
        pos = after;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::callbacks::HeadersCompleteAction;

    fn collect(mode: ParserMode, input: &[u8]) -> (Vec<Signal>, Vec<(PayloadKind, Vec<u8>)>, Result<(), ParseError>) {
        let signals = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let payloads = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut cb = Callbacks::new();
        {
            let signals = signals.clone();
            cb.on_signal(move |s| {
                signals.borrow_mut().push(s);
                SignalAction::Proceed
            });
        }
        {
            let payloads = payloads.clone();
            cb.on_payload(move |k, b| {
                payloads.borrow_mut().push((k, b.to_vec()));
                PayloadAction::Proceed
            });
        }
        cb.on_headers_complete(|| HeadersCompleteAction::Proceed);
        let mut automaton = Automaton::new(mode);
        let result = automaton.feed(input, &mut cb);
        let signals = signals.borrow().clone();
        let payloads = payloads.borrow().clone();
        (signals, payloads, result)
    }

    #[test]
    fn minimal_request_single_call() {
        let (signals, payloads, result) = collect(ParserMode::Request, b"GET / HTTP/1.1\r\n\r\n");
        assert!(result.is_ok());
        assert_eq!(signals.first(), Some(&Signal::MessageBegin));
        assert_eq!(signals.last(), Some(&Signal::Reset));
        assert!(signals.contains(&Signal::MessageComplete));
        let method: Vec<u8> =
            payloads.iter().filter(|(k, _)| *k == PayloadKind::Method).flat_map(|(_, b)| b.clone()).collect();
        assert_eq!(method, b"GET");
    }

    #[test]
    fn pipelined_requests_fire_one_reset_between() {
        let input = b"GET / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n";
        let (signals, _, result) = collect(ParserMode::Request, input);
        assert!(result.is_ok());
        let complete_count = signals.iter().filter(|s| **s == Signal::MessageComplete).count();
        let reset_count = signals.iter().filter(|s| **s == Signal::Reset).count();
        assert_eq!(complete_count, 2);
        assert_eq!(reset_count, 2);
    }

    #[test]
    fn content_length_body_byte_by_byte() {
        let input = b"GET /p HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nHello";
        let signals = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let body = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut cb = Callbacks::new();
        {
            let signals = signals.clone();
            cb.on_signal(move |s| {
                signals.borrow_mut().push(s);
                SignalAction::Proceed
            });
        }
        {
            let body = body.clone();
            cb.on_payload(move |k, b| {
                if k == PayloadKind::Body {
                    body.borrow_mut().extend_from_slice(b);
                }
                PayloadAction::Proceed
            });
        }
        cb.on_headers_complete(|| HeadersCompleteAction::Proceed);
        let mut automaton = Automaton::new(ParserMode::Request);
        for byte in input {
            automaton.feed(&[*byte], &mut cb).unwrap();
        }
        assert_eq!(&body.borrow()[..], b"Hello");
        assert_eq!(signals.borrow().iter().filter(|s| **s == Signal::MessageComplete).count(), 1);
    }

    #[test]
    fn invalid_method_is_sticky_until_reset() {
        let mut cb = Callbacks::new();
        let mut automaton = Automaton::new(ParserMode::Request);
        let err1 = automaton.feed(b"INVALID METHOD / HTTP/1.1\r\n\r\n", &mut cb).unwrap_err();
        assert_eq!(err1.code(), 6);
        let err2 = automaton.feed(b"GET / HTTP/1.1\r\n\r\n", &mut cb).unwrap_err();
        assert_eq!(err1, err2);
        automaton.reset();
        assert!(automaton.feed(b"GET / HTTP/1.1\r\n\r\n", &mut cb).is_ok());
    }

    #[test]
    fn chunked_response_with_extension() {
        let input = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;charset=utf-8\r\nHello\r\n0\r\n\r\n";
        let (signals, payloads, result) = collect(ParserMode::Response, input);
        assert!(result.is_ok());
        assert!(signals.contains(&Signal::ChunkHeader));
        assert!(signals.contains(&Signal::ChunkComplete));
        let body: Vec<u8> =
            payloads.iter().filter(|(k, _)| *k == PayloadKind::Body).flat_map(|(_, b)| b.clone()).collect();
        assert_eq!(body, b"Hello");
        let ext_name: Vec<u8> = payloads
            .iter()
            .filter(|(k, _)| *k == PayloadKind::ChunkExtensionName)
            .flat_map(|(_, b)| b.clone())
            .collect();
        assert_eq!(ext_name, b"charset");
    }

    #[test]
    fn upgrade_pause_sets_observable_upgrade_flag() {
        let mut cb = Callbacks::new();
        cb.on_headers_complete(|| HeadersCompleteAction::AssumeNoBodyAndPauseUpgrade);
        let mut automaton = Automaton::new(ParserMode::Request);
        let input = b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        let err = automaton.feed(input, &mut cb).unwrap_err();
        assert!(err.is_paused_upgrade());
        assert!(automaton.observable_state().upgrade);
        automaton.resume_after_upgrade();
        assert!(!automaton.is_latched());
    }

    #[test]
    fn either_mode_resolves_from_first_bytes() {
        let (_, _, result) = collect(ParserMode::Either, b"HTTP/1.1 204 No Content\r\n\r\n");
        assert!(result.is_ok());
        let (_, _, result) = collect(ParserMode::Either, b"GET / HTTP/1.1\r\n\r\n");
        assert!(result.is_ok());
    }

    #[test]
    fn line_end_detects_lenient_bare_terminators() {
        let lenient = LenientFlags::OPTIONAL_CR_BEFORE_LF;
        assert_eq!(find_line_end(b"foo\nbar", 0, lenient), Ok(Some((3, 4))));
        assert_eq!(find_line_end(b"foo\nbar", 0, LenientFlags::empty()), Err(()));
    }

    #[test]
    fn response_with_204_completes_without_a_body() {
        let (signals, _, result) = collect(ParserMode::Response, b"HTTP/1.1 204 No Content\r\n\r\n");
        assert!(result.is_ok());
        assert!(signals.contains(&Signal::MessageComplete));
    }

    #[test]
    fn response_with_304_completes_without_a_body() {
        let (signals, _, result) = collect(ParserMode::Response, b"HTTP/1.1 304 Not Modified\r\n\r\n");
        assert!(result.is_ok());
        assert!(signals.contains(&Signal::MessageComplete));
    }

    #[test]
    fn response_with_100_continue_completes_without_a_body() {
        let (signals, _, result) = collect(ParserMode::Response, b"HTTP/1.1 100 Continue\r\n\r\n");
        assert!(result.is_ok());
        assert!(signals.contains(&Signal::MessageComplete));
    }

    #[test]
    fn bytes_after_close_are_a_closed_connection_error_by_default() {
        let mut cb = Callbacks::new();
        cb.on_headers_complete(|| HeadersCompleteAction::Proceed);
        let mut automaton = Automaton::new(ParserMode::Request);
        let first = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        automaton.feed(first, &mut cb).unwrap();
        let err = automaton.feed(b"GET / HTTP/1.1\r\n\r\n", &mut cb).unwrap_err();
        assert_eq!(err.name(), "HPE_CLOSED_CONNECTION");
    }

    #[test]
    fn keep_alive_flag_allows_messages_after_close() {
        let mut cb = Callbacks::new();
        cb.on_headers_complete(|| HeadersCompleteAction::Proceed);
        let mut automaton = Automaton::new(ParserMode::Request);
        automaton.set_lenient_flags(LenientFlags::KEEP_ALIVE);
        let first = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        automaton.feed(first, &mut cb).unwrap();
        automaton.feed(b"GET / HTTP/1.1\r\n\r\n", &mut cb).unwrap();
    }

    #[test]
    fn data_after_close_flag_silently_discards_trailing_bytes() {
        let mut cb = Callbacks::new();
        cb.on_headers_complete(|| HeadersCompleteAction::Proceed);
        let signals = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        {
            let signals = signals.clone();
            cb.on_signal(move |s| {
                signals.borrow_mut().push(s);
                SignalAction::Proceed
            });
        }
        let mut automaton = Automaton::new(ParserMode::Request);
        automaton.set_lenient_flags(LenientFlags::DATA_AFTER_CLOSE);
        let first = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        automaton.feed(first, &mut cb).unwrap();
        let result = automaton.feed(b"garbage that is not a request", &mut cb);
        assert!(result.is_ok());
        let begins = signals.borrow().iter().filter(|s| **s == Signal::MessageBegin).count();
        assert_eq!(begins, 1);
    }
}
