//! The Parser Facade (C2): owns parser state, lenient flags, pause/resume,
//! finish-on-EOF, and the callback table, wrapped around the [`Automaton`]
//! (C1).
//!
//! A single owned value driven by repeated `parse` calls, with no knowledge
//! of sockets or a reactor underneath it.

use std::cell::RefCell;
use std::rc::Rc;

use crate::automaton::{Automaton, ObservableState, ParserMode};
use crate::callbacks::{Callbacks, HeadersCompleteAction, PayloadAction, PayloadKind, Signal, SignalAction};
use crate::errors::ParseError;
use crate::lenient::LenientFlags;

/// Owns the automaton and its callback table across many messages on one
/// stream. Survives a message via the automaton's implicit per-message
/// reset; survives a sticky error only via an explicit [`Parser::reset`].
pub struct Parser {
    automaton: Automaton,
    callbacks: Callbacks,
}

impl Parser {
    pub fn new(mode: ParserMode) -> Parser {
        Parser { automaton: Automaton::new(mode), callbacks: Callbacks::new() }
    }

    pub fn mode(&self) -> ParserMode {
        self.automaton.mode()
    }

    /// Install the full handler table in one call. Unset slots in `callbacks`
    /// default to always returning `Proceed`, matching a freshly constructed
    /// [`Callbacks`].
    pub fn set_callbacks(&mut self, callbacks: Callbacks) {
        self.callbacks = callbacks;
    }

    /// Direct access to the callback table for incremental registration
    /// (`on_signal`/`on_payload`/`on_headers_complete`), used internally by
    /// [`crate::messages::MessagesParser`] and available to advanced callers
    /// of the raw event layer.
    pub fn callbacks_mut(&mut self) -> &mut Callbacks {
        &mut self.callbacks
    }

    pub fn set_lenient_flags(&mut self, flags: LenientFlags) {
        self.automaton.set_lenient_flags(flags);
    }

    pub fn lenient_flags(&self) -> LenientFlags {
        self.automaton.lenient_flags()
    }

    /// A read-only snapshot of the in-flight message's parsed state.
    pub fn state(&self) -> &ObservableState {
        self.automaton.observable_state()
    }

    /// Feed a (possibly empty) fragment of the byte stream. May invoke
    /// callbacks synchronously. Once this returns an error, every
    /// subsequent call returns the same error until [`Parser::reset`].
    pub fn parse(&mut self, data: &[u8]) -> Result<(), ParseError> {
        self.automaton.feed(data, &mut self.callbacks)
    }

    /// Declare end-of-stream. For a body terminated by connection close,
    /// this is what commits the last message; otherwise it errors if called
    /// mid-message.
    pub fn finish(&mut self) -> Result<(), ParseError> {
        self.automaton.finish(&mut self.callbacks)
    }

    pub fn pause(&mut self) {
        self.automaton.pause();
    }

    pub fn resume(&mut self) {
        self.automaton.resume();
    }

    pub fn resume_after_upgrade(&mut self) {
        self.automaton.resume_after_upgrade();
    }

    /// Return to the initial state. Preserves mode, callback table, and
    /// lenient flags.
    pub fn reset(&mut self) {
        self.automaton.reset();
    }

    pub(crate) fn attach_state_sink(&mut self, sink: Rc<RefCell<ObservableState>>) {
        self.automaton.attach_state_sink(sink);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn minimal_request_round_trip() {
        let mut p = Parser::new(ParserMode::Request);
        let seen_method = Rc::new(RefCell::new(Vec::new()));
        {
            let seen_method = seen_method.clone();
            p.callbacks_mut().on_payload(move |kind, bytes| {
                if kind == PayloadKind::Method {
                    seen_method.borrow_mut().extend_from_slice(bytes);
                }
                PayloadAction::Proceed
            });
        }
        p.parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(&seen_method.borrow()[..], b"GET");
        assert_eq!(p.state().version, crate::model::Version::HTTP_1_1);
    }

    #[test]
    fn sticky_error_until_reset() {
        let mut p = Parser::new(ParserMode::Request);
        let err1 = p.parse(b"BAD METHOD / HTTP/1.1\r\n\r\n").unwrap_err();
        let err2 = p.parse(b"GET / HTTP/1.1\r\n\r\n").unwrap_err();
        assert_eq!(err1, err2);
        p.reset();
        assert!(p.parse(b"GET / HTTP/1.1\r\n\r\n").is_ok());
    }

    #[test]
    fn pause_then_resume() {
        let mut p = Parser::new(ParserMode::Request);
        p.callbacks_mut().on_signal(|sig| {
            if sig == Signal::MessageBegin {
                SignalAction::Pause
            } else {
                SignalAction::Proceed
            }
        });
        let err = p.parse(b"GET / HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(err.is_paused());
        p.resume();
        p.callbacks_mut().on_signal(|_| SignalAction::Proceed);
        // The request line was buffered, not consumed, before the pause;
        // resuming with no new bytes replays it to completion.
        assert!(p.parse(b"").is_ok());
    }

    #[test]
    fn upgrade_pause_requires_resume_after_upgrade() {
        let mut p = Parser::new(ParserMode::Request);
        p.callbacks_mut().on_headers_complete(|| HeadersCompleteAction::AssumeNoBodyAndPauseUpgrade);
        let err = p.parse(b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n").unwrap_err();
        assert!(err.is_paused_upgrade());
        assert!(p.parse(b"anything").is_err());
        p.resume_after_upgrade();
        assert!(p.state().upgrade);
    }
}
