//! The Messages Parser (C4): a thin driver that feeds bytes into the
//! [`Parser`] facade (C2), collects messages assembled by the
//! [`MessageBuilder`] (C3), and surfaces them as a batch or a drainable
//! stream.
//!
//! The builder is owned here, not by the `Parser`, and the callback closures
//! registered on the `Parser` reach it through `Rc<RefCell<_>>` rather than a
//! direct borrow, which would require the `Parser` and its own callback
//! table to alias.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::automaton::{ObservableState, ParserMode};
use crate::builder::MessageBuilder;
use crate::callbacks::{PayloadAction, Signal, SignalAction};
use crate::errors::ParseError;
use crate::lenient::LenientFlags;
use crate::model::Message;
use crate::parser::Parser;

/// What a [`MessagesParser`]'s message handler asks the driver to do after
/// a message has been assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    Proceed,
    Pause,
}

type MessageHandler = dyn FnMut(&Message) -> HandlerAction;

/// Drives a [`Parser`] and a [`MessageBuilder`] together. The common way to
/// consume this crate: feed bytes in, get fully reconstructed `Request`/
/// `Response` values out, without touching the raw event callbacks at all.
pub struct MessagesParser {
    parser: Parser,
    builder: Rc<RefCell<MessageBuilder>>,
    queue: Rc<RefCell<VecDeque<Message>>>,
    handler: Rc<RefCell<Option<Box<MessageHandler>>>>,
    handler_paused: Rc<Cell<bool>>,
}

impl MessagesParser {
    pub fn new(mode: ParserMode) -> MessagesParser {
        let mut parser = Parser::new(mode);
        let builder = Rc::new(RefCell::new(MessageBuilder::new()));
        let queue: Rc<RefCell<VecDeque<Message>>> = Rc::new(RefCell::new(VecDeque::new()));
        let handler: Rc<RefCell<Option<Box<MessageHandler>>>> = Rc::new(RefCell::new(None));
        let handler_paused = Rc::new(Cell::new(false));
        let state_sink = Rc::new(RefCell::new(ObservableState::default()));
        parser.attach_state_sink(state_sink.clone());

        {
            let builder = builder.clone();
            parser.callbacks_mut().on_payload(move |kind, bytes| {
                builder.borrow_mut().handle_payload(kind, bytes);
                PayloadAction::Proceed
            });
        }
        {
            let builder = builder.clone();
            let queue = queue.clone();
            let handler = handler.clone();
            let handler_paused = handler_paused.clone();
            parser.callbacks_mut().on_signal(move |sig| {
                match sig {
                    Signal::MessageComplete => {
                        let snapshot = state_sink.borrow().clone();
                        if let Some(message) = builder.borrow().build(snapshot.version, snapshot.status_code) {
                            let action = match handler.borrow_mut().as_mut() {
                                Some(h) => h(&message),
                                None => HandlerAction::Proceed,
                            };
                            queue.borrow_mut().push_back(message);
                            if action == HandlerAction::Pause {
                                handler_paused.set(true);
                            }
                        }
                    }
                    Signal::Reset => builder.borrow_mut().reset(),
                    _ => {}
                }
                SignalAction::Proceed
            });
        }

        MessagesParser { parser, builder: builder.clone(), queue, handler, handler_paused }
    }

    /// Install a handler invoked synchronously, once per assembled message,
    /// before that message is returned to the caller of [`Self::parse`].
    /// Returning [`HandlerAction::Pause`] latches the paused error on the
    /// *next* `parse`/`finish` call (the message already built this call is
    /// still delivered).
    pub fn set_message_handler<F>(&mut self, f: F)
    where
        F: FnMut(&Message) -> HandlerAction + 'static,
    {
        *self.handler.borrow_mut() = Some(Box::new(f));
    }

    pub fn clear_message_handler(&mut self) {
        *self.handler.borrow_mut() = None;
    }

    /// Access to the underlying facade for advanced configuration (raw
    /// callback registration alongside the builder's own, pause/resume,
    /// the observable-state snapshot).
    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut Parser {
        &mut self.parser
    }

    pub fn set_lenient_flags(&mut self, flags: LenientFlags) {
        self.parser.set_lenient_flags(flags);
    }

    pub fn lenient_flags(&self) -> LenientFlags {
        self.parser.lenient_flags()
    }

    /// Feed a fragment and return every message completed during this call,
    /// in order. Messages completed before a mid-call error are retained in
    /// the internal queue rather than discarded, and are returned by the
    /// next call that succeeds.
    pub fn parse(&mut self, data: &[u8]) -> Result<Vec<Message>, ParseError> {
        let result = self.parser.parse(data);
        self.apply_handler_pause();
        result?;
        Ok(self.queue.borrow_mut().drain(..).collect())
    }

    pub fn finish(&mut self) -> Result<Vec<Message>, ParseError> {
        let result = self.parser.finish();
        self.apply_handler_pause();
        result?;
        Ok(self.queue.borrow_mut().drain(..).collect())
    }

    fn apply_handler_pause(&mut self) {
        if self.handler_paused.get() {
            self.handler_paused.set(false);
            self.parser.pause();
        }
    }

    /// Pop the oldest completed message not yet drained by [`Self::parse`]
    /// or [`Self::finish`], for callers that prefer pulling from an
    /// unbounded queue over collecting a batch per call.
    pub fn pop_message(&mut self) -> Option<Message> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn has_pending_messages(&self) -> bool {
        !self.queue.borrow().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn batch_parse_collects_pipelined_requests() {
        let mut mp = MessagesParser::new(ParserMode::Request);
        let input = b"GET / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n";
        let messages = mp.parse(input).unwrap();
        assert_eq!(messages.len(), 2);
        for m in &messages {
            assert_eq!(m.as_request().unwrap().method, "GET");
        }
    }

    #[test]
    fn content_length_body_reconstructed() {
        let mut mp = MessagesParser::new(ParserMode::Request);
        let input = b"GET /path HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nHello";
        let messages = mp.parse(input).unwrap();
        assert_eq!(messages.len(), 1);
        let req = messages[0].as_request().unwrap();
        assert_eq!(req.headers.get("Host"), Some(&["example.com".to_string()][..]));
        assert_eq!(req.body, crate::model::Body::Single(b"Hello".to_vec()));
    }

    #[test]
    fn streaming_queue_drains_independently_of_parse() {
        let mut mp = MessagesParser::new(ParserMode::Request);
        mp.parser_mut(); // advanced-config access compiles
        let input = b"GET / HTTP/1.1\r\n\r\n";
        let _ = mp.parse(input).unwrap();
        assert!(!mp.has_pending_messages());
    }

    #[test]
    fn message_handler_pause_latches_on_next_call() {
        let mut mp = MessagesParser::new(ParserMode::Request);
        mp.set_message_handler(|_| HandlerAction::Pause);
        let input = b"GET / HTTP/1.1\r\n\r\n";
        let messages = mp.parse(input).unwrap();
        assert_eq!(messages.len(), 1);
        let err = mp.parse(b"GET / HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(err.is_paused());
    }

    #[test]
    fn either_mode_resolves_response() {
        let mut mp = MessagesParser::new(ParserMode::Either);
        let input = b"HTTP/1.1 204 No Content\r\n\r\n";
        let messages = mp.parse(input).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].as_response().unwrap().status_code, 204);
    }
}
