//! The Message Builder (C3): reassembles the event layer's signals and
//! payload fragments into [`Message`] values.
//!
//! Each payload group (method, url, headers, chunk data, ...) accumulates
//! independently as bytes arrive and is sealed on its matching `*Complete`
//! signal; [`MessageBuilder::build`] assembles the sealed groups into a
//! [`Request`] or [`Response`] once `message-complete` fires.

use crate::callbacks::{PayloadKind, Signal};
use crate::model::{Body, Chunk, FieldMap, Message, Request, Response, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectedMode {
    Unknown,
    Request,
    Response,
}

#[derive(Debug, Clone, Default)]
struct ChunkSlot {
    data: Vec<u8>,
    ext_names: Vec<Vec<u8>>,
    ext_values: Vec<Vec<u8>>,
    cur_ext_name: Vec<u8>,
    cur_ext_value: Vec<u8>,
}

impl ChunkSlot {
    fn is_empty(&self) -> bool {
        self.data.is_empty() && self.ext_names.is_empty()
    }

    fn extensions(&self) -> FieldMap {
        field_map_from_pairs(&self.ext_names, &self.ext_values)
    }

    fn into_chunk(self) -> Chunk {
        let extensions = self.extensions();
        Chunk { data: self.data, extensions }
    }
}

/// Accumulates events from one in-flight message. Owned by whoever drives
/// the event layer (typically [`crate::messages::MessagesParser`]); fed via
/// [`MessageBuilder::handle_signal`] / [`MessageBuilder::handle_payload`] and
/// materialized with [`MessageBuilder::build`] on `message-complete`.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    mode: DetectedMode,
    method: Vec<Vec<u8>>,
    url: Vec<Vec<u8>>,
    protocol: Vec<Vec<u8>>,
    status: Vec<Vec<u8>>,
    cur_method: Vec<u8>,
    cur_url: Vec<u8>,
    cur_protocol: Vec<u8>,
    cur_status: Vec<u8>,
    header_fields: Vec<Vec<u8>>,
    header_values: Vec<Vec<u8>>,
    cur_header_field: Vec<u8>,
    cur_header_value: Vec<u8>,
    chunks: Vec<ChunkSlot>,
    cur_chunk: ChunkSlot,
}

impl Default for DetectedMode {
    fn default() -> DetectedMode {
        DetectedMode::Unknown
    }
}

impl MessageBuilder {
    pub fn new() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Discard all accumulated state, as if no events had ever arrived.
    /// Driven by the `reset` signal.
    pub fn reset(&mut self) {
        *self = MessageBuilder::default();
    }

    pub fn handle_payload(&mut self, kind: PayloadKind, bytes: &[u8]) {
        match kind {
            PayloadKind::Method => self.cur_method.extend_from_slice(bytes),
            PayloadKind::Url => self.cur_url.extend_from_slice(bytes),
            PayloadKind::Protocol => self.cur_protocol.extend_from_slice(bytes),
            PayloadKind::Version => {} // version text isn't retained; callers supply the already-parsed `Version`.
            PayloadKind::Status => self.cur_status.extend_from_slice(bytes),
            PayloadKind::HeaderField => self.cur_header_field.extend_from_slice(bytes),
            PayloadKind::HeaderValue => self.cur_header_value.extend_from_slice(bytes),
            PayloadKind::Body => self.cur_chunk.data.extend_from_slice(bytes),
            PayloadKind::ChunkExtensionName => self.cur_chunk.cur_ext_name.extend_from_slice(bytes),
            PayloadKind::ChunkExtensionValue => self.cur_chunk.cur_ext_value.extend_from_slice(bytes),
        }
    }

    pub fn handle_signal(&mut self, sig: Signal) {
        match sig {
            Signal::MessageBegin => {}
            Signal::MethodComplete => {
                self.mode = DetectedMode::Request;
                self.method.push(std::mem::take(&mut self.cur_method));
            }
            Signal::UrlComplete => self.url.push(std::mem::take(&mut self.cur_url)),
            Signal::ProtocolComplete => self.protocol.push(std::mem::take(&mut self.cur_protocol)),
            Signal::VersionComplete => {}
            Signal::StatusComplete => {
                self.mode = DetectedMode::Response;
                self.status.push(std::mem::take(&mut self.cur_status));
            }
            Signal::HeaderFieldComplete => self.header_fields.push(std::mem::take(&mut self.cur_header_field)),
            Signal::HeaderValueComplete => self.header_values.push(std::mem::take(&mut self.cur_header_value)),
            Signal::ChunkHeader => {}
            Signal::ChunkComplete => {
                let sealed = std::mem::take(&mut self.cur_chunk);
                self.chunks.push(sealed);
            }
            Signal::ChunkExtensionNameComplete => {
                let name = std::mem::take(&mut self.cur_chunk.cur_ext_name);
                self.cur_chunk.ext_names.push(name);
            }
            Signal::ChunkExtensionValueComplete => {
                let value = std::mem::take(&mut self.cur_chunk.cur_ext_value);
                self.cur_chunk.ext_values.push(value);
            }
            // message-complete/reset are driven externally: the former calls
            // `build`, the latter calls `reset`, both at the driver's
            // discretion (it needs the parser's observable state at exactly
            // this point, which this builder does not have access to).
            Signal::MessageComplete | Signal::Reset => {}
        }
    }

    /// Attempt to construct a [`Message`] from the accumulated groups. `version`
    /// and `status_code` come from the parser's observable state, snapshotted
    /// by the driver at the moment `message-complete` fires.
    pub fn build(&self, version: Version, status_code: u16) -> Option<Message> {
        match self.mode {
            DetectedMode::Request => self.build_request(version).map(Message::Request),
            DetectedMode::Response => self.build_response(version, status_code).map(Message::Response),
            DetectedMode::Unknown => None,
        }
    }

    fn build_request(&self, version: Version) -> Option<Request> {
        let method = first_nonempty(&self.method)?;
        let url = first_nonempty(&self.url)?;
        let protocol = first_nonempty(&self.protocol)?;
        Some(Request {
            method: String::from_utf8_lossy(method).into_owned(),
            url: String::from_utf8_lossy(url).into_owned(),
            protocol: String::from_utf8_lossy(protocol).into_owned(),
            version,
            headers: self.build_headers(),
            body: self.build_body(),
        })
    }

    fn build_response(&self, version: Version, status_code: u16) -> Option<Response> {
        let protocol = first_nonempty(&self.protocol)?;
        let status = first_nonempty(&self.status)?;
        Some(Response {
            protocol: String::from_utf8_lossy(protocol).into_owned(),
            version,
            status_code,
            status: String::from_utf8_lossy(status).into_owned(),
            headers: self.build_headers(),
            body: self.build_body(),
        })
    }

    fn build_headers(&self) -> FieldMap {
        field_map_from_pairs(&self.header_fields, &self.header_values)
    }

    /// Classify the accumulated chunk slots per the construction rule:
    /// zero or only-empty slots -> empty; exactly one slot with data and no
    /// extensions anywhere -> single; otherwise -> chunked. The empty
    /// trailing slot left over after the last `chunk-complete` (or, for a
    /// non-chunked body, the never-sealed current slot if nothing arrived)
    /// is filtered out here.
    fn build_body(&self) -> Body {
        let mut slots: Vec<ChunkSlot> = self.chunks.clone();
        if !self.cur_chunk.is_empty() {
            slots.push(self.cur_chunk.clone());
        }
        slots.retain(|slot| !slot.is_empty());

        match slots.len() {
            0 => Body::Empty,
            1 if slots[0].ext_names.is_empty() => Body::Single(slots.remove(0).data),
            _ => Body::Chunked(slots.into_iter().map(ChunkSlot::into_chunk).collect()),
        }
    }
}

fn first_nonempty(groups: &[Vec<u8>]) -> Option<&[u8]> {
    groups.iter().find(|g| !g.is_empty()).map(|g| g.as_slice())
}

/// Pair up the n-th field with the n-th value (per invariant 6), decode both
/// as UTF-8 with replacement, and drop entries whose key and all values are
/// empty.
fn field_map_from_pairs(names: &[Vec<u8>], values: &[Vec<u8>]) -> FieldMap {
    let mut map = FieldMap::new();
    for (name, value) in names.iter().zip(values.iter()) {
        if name.is_empty() && value.is_empty() {
            continue;
        }
        let name = String::from_utf8_lossy(name).into_owned();
        let value = String::from_utf8_lossy(value).into_owned();
        map.push(name, value);
    }
    map
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::callbacks::PayloadKind::*;
    use crate::callbacks::Signal::*;

    fn feed(builder: &mut MessageBuilder, events: &[(Signal, Option<(PayloadKind, &[u8])>)]) {
        for (sig, payload) in events {
            if let Some((kind, bytes)) = payload {
                builder.handle_payload(*kind, bytes);
            }
            builder.handle_signal(*sig);
        }
    }

    #[test]
    fn builds_minimal_request() {
        let mut b = MessageBuilder::new();
        feed(
            &mut b,
            &[
                (MethodComplete, Some((Method, b"GET"))),
                (UrlComplete, Some((Url, b"/"))),
                (ProtocolComplete, Some((Protocol, b"HTTP"))),
                (VersionComplete, None),
            ],
        );
        let msg = b.build(Version::HTTP_1_1, 0).unwrap();
        let req = msg.as_request().unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.url, "/");
        assert_eq!(req.protocol, "HTTP");
        assert_eq!(req.version, Version::HTTP_1_1);
        assert!(req.body.is_empty());
    }

    #[test]
    fn no_groups_means_no_message() {
        let b = MessageBuilder::new();
        assert!(b.build(Version::HTTP_1_1, 0).is_none());
    }

    #[test]
    fn fixed_body_is_single_chunk() {
        let mut b = MessageBuilder::new();
        feed(
            &mut b,
            &[
                (MethodComplete, Some((Method, b"POST"))),
                (UrlComplete, Some((Url, b"/p"))),
                (ProtocolComplete, Some((Protocol, b"HTTP"))),
                (VersionComplete, None),
            ],
        );
        b.handle_payload(Body, b"Hello");
        let msg = b.build(Version::HTTP_1_1, 0).unwrap();
        assert_eq!(msg.as_request().unwrap().body, Body::Single(b"Hello".to_vec()));
    }

    #[test]
    fn chunked_body_with_extension_survives_trailing_empty_slot() {
        let mut b = MessageBuilder::new();
        feed(&mut b, &[(ProtocolComplete, Some((Protocol, b"HTTP"))), (VersionComplete, None), (StatusComplete, Some((Status, b"OK")))]);
        b.handle_payload(Body, b"Hello");
        b.handle_payload(ChunkExtensionName, b"charset");
        b.handle_signal(ChunkExtensionNameComplete);
        b.handle_payload(ChunkExtensionValue, b"utf-8");
        b.handle_signal(ChunkExtensionValueComplete);
        b.handle_signal(ChunkComplete); // real chunk sealed
        b.handle_signal(ChunkComplete); // terminal zero-chunk: empty trailing slot
        let msg = b.build(Version::HTTP_1_1, 200).unwrap();
        let resp = msg.as_response().unwrap();
        match &resp.body {
            Body::Chunked(chunks) => {
                assert_eq!(chunks.len(), 1);
                assert_eq!(chunks[0].data, b"Hello");
                assert_eq!(chunks[0].extensions.get_first("charset"), Some("utf-8"));
            }
            other => panic!("expected chunked body, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_headers_become_multi_valued() {
        let mut b = MessageBuilder::new();
        feed(&mut b, &[(MethodComplete, Some((Method, b"GET"))), (UrlComplete, Some((Url, b"/"))), (ProtocolComplete, Some((Protocol, b"HTTP"))), (VersionComplete, None)]);
        b.handle_payload(HeaderField, b"Set-Cookie");
        b.handle_signal(HeaderFieldComplete);
        b.handle_payload(HeaderValue, b"a=1");
        b.handle_signal(HeaderValueComplete);
        b.handle_payload(HeaderField, b"Set-Cookie");
        b.handle_signal(HeaderFieldComplete);
        b.handle_payload(HeaderValue, b"b=2");
        b.handle_signal(HeaderValueComplete);
        let msg = b.build(Version::HTTP_1_1, 0).unwrap();
        assert_eq!(msg.headers().get("Set-Cookie"), Some(&["a=1".to_string(), "b=2".to_string()][..]));
    }

    #[test]
    fn reset_clears_everything() {
        let mut b = MessageBuilder::new();
        feed(&mut b, &[(MethodComplete, Some((Method, b"GET"))), (UrlComplete, Some((Url, b"/"))), (ProtocolComplete, Some((Protocol, b"HTTP"))), (VersionComplete, None)]);
        b.reset();
        assert!(b.build(Version::HTTP_1_1, 0).is_none());
    }
}
