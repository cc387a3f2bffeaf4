//! Lenient-mode flags for interoperating with non-compliant HTTP peers.
//!
//! Each flag widens the grammar accepted by the automaton along exactly one
//! axis (see the table in the crate's design notes); none of them change
//! which events are emitted, only which input is accepted before an event
//! is emitted.

use bitflags::bitflags;

bitflags! {
    /// A set of lenient-parsing toggles, applied atomically via
    /// `Parser::set_lenient_flags`.
    pub struct LenientFlags: u16 {
        /// Skip header-value token validation.
        const HEADERS = 0b0000_0000_0001;
        /// Permit `Transfer-Encoding: chunked` together with `Content-Length`.
        const CHUNKED_LENGTH = 0b0000_0000_0010;
        /// After `Connection: close`, keep parsing further messages on the
        /// stream instead of latching a closed-connection error.
        const KEEP_ALIVE = 0b0000_0000_0100;
        /// Permit `Transfer-Encoding` values other than a bare `chunked`.
        const TRANSFER_ENCODING = 0b0000_0000_1000;
        /// Permit HTTP versions outside {0.9, 1.0, 1.1, 2.0}.
        const VERSION = 0b0000_0001_0000;
        /// Silently discard bytes arriving after a close-terminated message.
        const DATA_AFTER_CLOSE = 0b0000_0010_0000;
        /// Accept a bare CR as a line terminator.
        const OPTIONAL_LF_AFTER_CR = 0b0000_0100_0000;
        /// Accept a bare LF as a line terminator.
        const OPTIONAL_CR_BEFORE_LF = 0b0000_1000_0000;
        /// Allow the next chunk to begin immediately after prior chunk data,
        /// without a separating CRLF.
        const OPTIONAL_CRLF_AFTER_CHUNK = 0b0001_0000_0000;
        /// Tolerate spaces between the chunk-size and the CRLF/`;`.
        const SPACES_AFTER_CHUNK_SIZE = 0b0010_0000_0000;
    }
}

impl Default for LenientFlags {
    fn default() -> LenientFlags {
        LenientFlags::empty()
    }
}

#[cfg(test)]
mod test {
    use super::LenientFlags;

    #[test]
    fn empty_by_default() {
        assert_eq!(LenientFlags::default(), LenientFlags::empty());
    }

    #[test]
    fn union_is_atomic_replacement() {
        let a = LenientFlags::HEADERS | LenientFlags::VERSION;
        assert!(a.contains(LenientFlags::HEADERS));
        assert!(a.contains(LenientFlags::VERSION));
        assert!(!a.contains(LenientFlags::KEEP_ALIVE));
    }
}
