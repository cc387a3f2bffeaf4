//! An incremental HTTP/1.x message parser: a byte-level event automaton
//! (C1) plus a message-assembly layer (C3) on top of it, with no I/O of its
//! own. Feed it arbitrarily fragmented bytes from a socket, a test harness,
//! or a file, and get back either a stream of fine-grained parse events or
//! fully reconstructed [`Request`](model::Request)/[`Response`](model::Response)
//! values.
//!
//! The event layer ([`parser::Parser`]) and the message layer
//! ([`messages::MessagesParser`]) are independently usable: reach for the
//! former if you want zero-copy access to payload fragments as they stream
//! past, the latter if you just want complete messages.

pub mod automaton;
pub mod builder;
pub mod callbacks;
pub mod errors;
pub mod lenient;
pub mod messages;
pub mod model;
pub mod parser;

pub use automaton::{ObservableState, ParserMode};
pub use builder::MessageBuilder;
pub use callbacks::{Callbacks, HeadersCompleteAction, PayloadAction, PayloadKind, Signal, SignalAction};
pub use errors::{ErrorKind, ParseError};
pub use lenient::LenientFlags;
pub use messages::{HandlerAction, MessagesParser};
pub use model::{Body, Chunk, FieldMap, Message, Request, Response, Version};
pub use parser::Parser;
