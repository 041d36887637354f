//! Typed message envelope with stack-ordered body encoding
//!
//! A message is a fixed 8-byte header (kind tag + body length) followed by a
//! body of raw bytes. Values are appended at the tail and extracted from the
//! tail, so a receiver must pop fields in the exact reverse order the sender
//! pushed them:
//!
//! ```rust
//! use shared::Message;
//!
//! let mut msg = Message::new(1u32);
//! msg.push(7u8).push(42u32).push_str("hello");
//!
//! assert_eq!(msg.pop_string(), "hello");
//! assert_eq!(msg.pop::<u32>(), 42);
//! assert_eq!(msg.pop::<u8>(), 7);
//! assert!(msg.is_empty());
//! ```
//!
//! Fields carry no per-field metadata. Popping in the wrong order does not
//! fail, it silently yields garbage, as long as enough bytes remain.
//! Variable-length fields (strings, slices, serde records) are stored as
//! `[bytes][u64 element count]` so they can be popped without a side channel.

use crate::connection::Connection;
use crate::error::{NetError, Result};
use crate::kind::MessageKind;
use crate::pod::Pod;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Encoded size of a message header: kind tag + body size
pub const HEADER_SIZE: usize = 8;

/// Encoded size of the trailing element count of variable-length fields
pub const COUNT_SIZE: usize = 8;

/// Message header as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<T> {
    pub kind: T,
    /// Body length in bytes
    pub size: u32,
}

impl<T: MessageKind> MessageHeader<T> {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.kind.to_raw().to_ne_bytes());
        out[4..].copy_from_slice(&self.size.to_ne_bytes());
        out
    }

    /// Parses a wire header, rejecting kind tags the application does not know
    pub fn from_bytes(bytes: [u8; HEADER_SIZE]) -> Result<Self> {
        let raw = u32::read_bytes(&bytes[..4]);
        let size = u32::read_bytes(&bytes[4..]);
        let kind = T::from_raw(raw).ok_or(NetError::UnknownKind(raw))?;
        Ok(Self { kind, size })
    }
}

/// A typed message: header plus body
///
/// The header's `size` always equals the body length; every mutating call
/// recomputes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    header: MessageHeader<T>,
    body: Vec<u8>,
}

impl<T: MessageKind> Message<T> {
    pub fn new(kind: T) -> Self {
        Self {
            header: MessageHeader { kind, size: 0 },
            body: Vec::new(),
        }
    }

    /// Wraps a body that was read off the wire
    pub fn with_body(kind: T, body: Vec<u8>) -> Self {
        let mut msg = Self {
            header: MessageHeader { kind, size: 0 },
            body,
        };
        msg.sync_size();
        msg
    }

    pub fn kind(&self) -> T {
        self.header.kind
    }

    pub fn set_kind(&mut self, kind: T) {
        self.header.kind = kind;
    }

    pub fn header(&self) -> &MessageHeader<T> {
        &self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body length in bytes, as recorded in the header
    pub fn size(&self) -> usize {
        self.header.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn clear(&mut self) {
        self.body.clear();
        self.sync_size();
    }

    /// Appends a fixed-size value to the tail of the body
    pub fn push<V: Pod>(&mut self, value: V) -> &mut Self {
        value.write_bytes(&mut self.body);
        self.sync_size();
        self
    }

    /// Removes a fixed-size value from the tail of the body
    ///
    /// # Panics
    ///
    /// Panics if the body holds fewer than `V::SIZE` bytes. Extracting more
    /// than was pushed is a programming error on one side of the exchange.
    pub fn pop<V: Pod>(&mut self) -> V {
        self.try_pop().unwrap_or_else(|e| panic!("{}", e))
    }

    /// Like [`pop`](Self::pop) but reports a short body as an error
    pub fn try_pop<V: Pod>(&mut self) -> Result<V> {
        let start = self.tail_start(V::SIZE)?;
        let value = V::read_bytes(&self.body[start..]);
        self.truncate(start);
        Ok(value)
    }

    /// Appends a string as `[utf-8 bytes][u64 byte count]`
    pub fn push_str(&mut self, value: &str) -> &mut Self {
        self.push_bytes(value.as_bytes())
    }

    /// # Panics
    ///
    /// Panics if the tail does not hold a complete string field or the bytes
    /// are not valid UTF-8.
    pub fn pop_string(&mut self) -> String {
        self.try_pop_string().unwrap_or_else(|e| panic!("{}", e))
    }

    pub fn try_pop_string(&mut self) -> Result<String> {
        let (start, end) = self.tail_sequence(1)?;
        let value = String::from_utf8(self.body[start..end].to_vec())?;
        self.truncate(start);
        Ok(value)
    }

    /// Appends a slice as `[element bytes][u64 element count]`
    pub fn push_slice<V: Pod>(&mut self, values: &[V]) -> &mut Self {
        self.body.reserve(values.len() * V::SIZE + COUNT_SIZE);
        for value in values {
            value.write_bytes(&mut self.body);
        }
        (values.len() as u64).write_bytes(&mut self.body);
        self.sync_size();
        self
    }

    /// # Panics
    ///
    /// Panics if the tail does not hold a complete sequence field.
    pub fn pop_vec<V: Pod>(&mut self) -> Vec<V> {
        self.try_pop_vec().unwrap_or_else(|e| panic!("{}", e))
    }

    /// Like [`pop_vec`](Self::pop_vec) but reports a malformed tail as an error
    ///
    /// A sequence of zero-sized elements pops back at most as many elements
    /// as there are body bytes in front of its count.
    pub fn try_pop_vec<V: Pod>(&mut self) -> Result<Vec<V>> {
        let (start, end) = self.tail_sequence(V::SIZE)?;
        let values = if V::SIZE == 0 {
            let count = u64::read_bytes(&self.body[end..]) as usize;
            (0..count).map(|_| V::read_bytes(&[])).collect()
        } else {
            self.body[start..end]
                .chunks_exact(V::SIZE)
                .map(V::read_bytes)
                .collect()
        };
        self.truncate(start);
        Ok(values)
    }

    /// Appends raw bytes as `[bytes][u64 byte count]`
    pub fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.reserve(bytes.len() + COUNT_SIZE);
        self.body.extend_from_slice(bytes);
        (bytes.len() as u64).write_bytes(&mut self.body);
        self.sync_size();
        self
    }

    pub fn try_pop_bytes(&mut self) -> Result<Vec<u8>> {
        let (start, end) = self.tail_sequence(1)?;
        let bytes = self.body[start..end].to_vec();
        self.truncate(start);
        Ok(bytes)
    }

    /// Appends any serde-serializable value as a single opaque field
    ///
    /// The value is encoded with bincode (fixed-width integers, host byte
    /// order) and stored like a byte sequence, so it follows the same stack
    /// discipline as every other field.
    pub fn push_record<S: Serialize>(&mut self, value: &S) -> Result<&mut Self> {
        let encoded = record_options().serialize(value)?;
        Ok(self.push_bytes(&encoded))
    }

    /// Pops a field written by [`push_record`](Self::push_record)
    ///
    /// The body is left untouched if decoding fails.
    pub fn pop_record<D: DeserializeOwned>(&mut self) -> Result<D> {
        let (start, end) = self.tail_sequence(1)?;
        let value = record_options().deserialize(&self.body[start..end])?;
        self.truncate(start);
        Ok(value)
    }

    pub fn into_parts(self) -> (MessageHeader<T>, Vec<u8>) {
        (self.header, self.body)
    }

    /// Offset where a trailing field of `len` bytes starts
    fn tail_start(&self, len: usize) -> Result<usize> {
        self.body
            .len()
            .checked_sub(len)
            .ok_or(NetError::Underflow {
                needed: len,
                remaining: self.body.len(),
            })
    }

    /// Locates a trailing `[elements][u64 count]` field without consuming it.
    ///
    /// Returns the byte range of the elements; the count sits at `end`. A
    /// count larger than the bytes in front of it is rejected before any
    /// allocation, which also bounds sequences of zero-sized elements.
    fn tail_sequence(&self, element_size: usize) -> Result<(usize, usize)> {
        let end = self.tail_start(COUNT_SIZE)?;
        let count = u64::read_bytes(&self.body[end..]);
        let bad_count = NetError::BadCount {
            count,
            remaining: end,
        };
        if count > end as u64 {
            return Err(bad_count);
        }
        let data_len = (count as usize)
            .checked_mul(element_size)
            .ok_or(bad_count)?;
        let start = end.checked_sub(data_len).ok_or(NetError::Underflow {
            needed: data_len.saturating_add(COUNT_SIZE),
            remaining: self.body.len(),
        })?;
        Ok((start, end))
    }

    fn truncate(&mut self, len: usize) {
        self.body.truncate(len);
        self.sync_size();
    }

    fn sync_size(&mut self) {
        let len = self.body.len();
        assert!(len <= u32::MAX as usize, "message body exceeds u32::MAX bytes");
        self.header.size = len as u32;
    }
}

impl<T: MessageKind> fmt::Display for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID:{} Size:{}", self.header.kind.to_raw(), self.header.size)
    }
}

/// A message paired with the connection it arrived on
///
/// `origin` is the producing connection for server-side messages and `None`
/// on the client, which only ever has one connection.
#[derive(Debug, Clone)]
pub struct OwnedMessage<T: MessageKind> {
    pub origin: Option<Arc<Connection<T>>>,
    pub message: Message<T>,
}

fn record_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_native_endian()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;
    use serde::Deserialize;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Move {
        x: u8,
        y: u8,
    }

    impl Pod for Move {
        const SIZE: usize = 2;

        fn write_bytes(&self, out: &mut Vec<u8>) {
            out.push(self.x);
            out.push(self.y);
        }

        fn read_bytes(bytes: &[u8]) -> Self {
            Move {
                x: bytes[0],
                y: bytes[1],
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct PlayerDescription {
        id: u32,
        name: String,
        pos: (f32, f32),
        trail: Vec<u16>,
    }

    fn assert_size_matches(msg: &Message<u32>) {
        assert_eq!(msg.header().size as usize, msg.body().len());
    }

    #[test]
    fn test_new_message_is_empty() {
        let msg = Message::new(3u32);
        assert_eq!(msg.kind(), 3);
        assert_eq!(msg.size(), 0);
        assert!(msg.is_empty());
        assert_eq!(msg.to_string(), "ID:3 Size:0");
    }

    #[test]
    fn test_fixed_values_pop_in_reverse() {
        let mut msg = Message::new(1u32);
        msg.push(1u8).push(-2i16).push(3u32).push(4.5f64).push(true);
        assert_eq!(msg.size(), 1 + 2 + 4 + 8 + 1);

        assert!(msg.pop::<bool>());
        assert_eq!(msg.pop::<f64>(), 4.5);
        assert_eq!(msg.pop::<u32>(), 3);
        assert_eq!(msg.pop::<i16>(), -2);
        assert_eq!(msg.pop::<u8>(), 1);
        assert!(msg.is_empty());
        assert_size_matches(&msg);
    }

    #[test]
    fn test_body_length_returns_to_previous_value() {
        let mut msg = Message::new(1u32);
        msg.push(99u64);
        let before = msg.size();

        msg.push(Move { x: 1, y: 2 }).push([7u16; 4]);
        assert_eq!(msg.pop::<[u16; 4]>(), [7; 4]);
        assert_eq!(msg.pop::<Move>(), Move { x: 1, y: 2 });
        assert_eq!(msg.size(), before);
    }

    #[test]
    fn test_wrong_order_silently_corrupts() {
        let mut msg = Message::new(1u32);
        msg.push(1u32).push(2u32);

        // Reading in write order returns the last value first.
        assert_eq!(msg.pop::<u32>(), 2);
        assert_eq!(msg.pop::<u32>(), 1);

        let mut msg = Message::new(1u32);
        msg.push(0x0102u16).push(0x03u8);
        let misread = msg.pop::<u16>();
        assert_ne!(misread, 0x0102);
        assert_eq!(msg.size(), 1);
    }

    #[test]
    fn test_string_round_trip() {
        let mut msg = Message::new(1u32);
        msg.push_str("hello, world");
        assert_eq!(msg.size(), 12 + COUNT_SIZE);
        assert_eq!(msg.pop_string(), "hello, world");
        assert!(msg.is_empty());

        msg.push_str("");
        assert_eq!(msg.pop_string(), "");
        assert!(msg.is_empty());
    }

    #[test]
    fn test_string_layout_has_trailing_count() {
        let mut msg = Message::new(1u32);
        msg.push_str("abc");
        let body = msg.body();
        assert_eq!(&body[..3], b"abc");
        assert_eq!(u64::read_bytes(&body[3..]), 3);
    }

    #[test]
    fn test_sequence_round_trip() {
        let mut msg = Message::new(1u32);
        let values = vec![10u32, 20, 30, 40];
        msg.push(5u8).push_slice(&values);

        assert_eq!(msg.size(), 1 + 4 * 4 + COUNT_SIZE);
        assert_eq!(msg.pop_vec::<u32>(), values);
        assert_eq!(msg.pop::<u8>(), 5);

        let moves = [Move { x: 0, y: 1 }, Move { x: 2, y: 2 }];
        msg.push_slice(&moves);
        assert_eq!(msg.pop_vec::<Move>(), moves.to_vec());
        assert!(msg.is_empty());
    }

    #[test]
    fn test_float_records() {
        let mut msg = Message::new(1u32);
        msg.push((1.25f32, -3.5f32)).push_slice(&[0.1f64, 0.2, 0.3]);

        let speeds = msg.pop_vec::<f64>();
        assert_eq!(speeds.len(), 3);
        assert_approx_eq!(speeds[0] + speeds[1], 0.3, 1e-9);

        let (x, y) = msg.pop::<(f32, f32)>();
        assert_approx_eq!(x, 1.25);
        assert_approx_eq!(y, -3.5);
    }

    #[test]
    fn test_mixed_fields() {
        let mut msg = Message::new(9u32);
        msg.push(1u32)
            .push_str("name")
            .push_slice(&[1i64, -1])
            .push('z');

        assert_eq!(msg.pop::<char>(), 'z');
        assert_eq!(msg.pop_vec::<i64>(), vec![1, -1]);
        assert_eq!(msg.pop_string(), "name");
        assert_eq!(msg.pop::<u32>(), 1);
        assert!(msg.is_empty());
    }

    #[test]
    #[should_panic(expected = "cannot extract 8 bytes")]
    fn test_pop_past_end_panics() {
        let mut msg = Message::new(1u32);
        msg.push(1u32);
        let _ = msg.pop::<u64>();
    }

    #[test]
    fn test_try_pop_reports_underflow_without_consuming() {
        let mut msg = Message::new(1u32);
        msg.push(1u16);

        match msg.try_pop::<u32>() {
            Err(NetError::Underflow { needed, remaining }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(msg.size(), 2);
        assert_eq!(msg.pop::<u16>(), 1);
    }

    #[test]
    fn test_corrupt_sequence_count_is_rejected() {
        let mut msg = Message::new(1u32);
        msg.push(1000u64);

        assert!(msg.try_pop_vec::<u32>().is_err());
        assert!(msg.try_pop_string().is_err());
        assert_eq!(msg.size(), 8);

        let mut msg = Message::new(1u32);
        msg.push(u64::MAX);
        match msg.try_pop_vec::<u64>() {
            Err(NetError::BadCount { count, remaining }) => {
                assert_eq!(count, u64::MAX);
                assert_eq!(remaining, 0);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_zero_sized_sequence_count_is_bounded() {
        let mut msg = Message::new(1u32);
        msg.push(7u32).push(u64::MAX);
        assert!(matches!(
            msg.try_pop_vec::<()>(),
            Err(NetError::BadCount { count: u64::MAX, remaining: 4 })
        ));
        assert_eq!(msg.size(), 12);

        let mut msg = Message::new(1u32);
        msg.push(7u32).push_slice(&[(), ()]);
        assert_eq!(msg.pop_vec::<()>(), vec![(), ()]);
        assert_eq!(msg.pop::<u32>(), 7);
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let mut msg = Message::new(1u32);
        msg.push_bytes(&[0xff, 0xfe]);
        assert!(matches!(msg.try_pop_string(), Err(NetError::InvalidUtf8(_))));
    }

    #[test]
    fn test_record_round_trip() {
        let desc = PlayerDescription {
            id: 10_001,
            name: "ferris".to_string(),
            pos: (12.5, -4.0),
            trail: vec![1, 2, 3],
        };

        let mut msg = Message::new(1u32);
        msg.push(77u8);
        msg.push_record(&desc).unwrap();
        msg.push(1u32);

        assert_eq!(msg.pop::<u32>(), 1);
        let decoded: PlayerDescription = msg.pop_record().unwrap();
        assert_eq!(decoded, desc);
        assert_eq!(msg.pop::<u8>(), 77);
        assert_size_matches(&msg);
    }

    #[test]
    fn test_failed_record_decode_leaves_body_intact() {
        let mut msg = Message::new(1u32);
        msg.push_bytes(&[1, 2]);
        let before = msg.size();

        let result: Result<PlayerDescription> = msg.pop_record();
        assert!(matches!(result, Err(NetError::Record(_))));
        assert_eq!(msg.size(), before);
    }

    #[test]
    fn test_header_bytes() {
        let header = MessageHeader {
            kind: 7u32,
            size: 300,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..4], &7u32.to_ne_bytes());
        assert_eq!(&bytes[4..], &300u32.to_ne_bytes());
        assert_eq!(MessageHeader::<u32>::from_bytes(bytes).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_unknown_kind() {
        crate::message_kind! {
            enum Narrow {
                Only = 0,
            }
        }

        let bytes = MessageHeader { kind: 5u32, size: 0 }.to_bytes();
        assert!(matches!(
            MessageHeader::<Narrow>::from_bytes(bytes),
            Err(NetError::UnknownKind(5))
        ));
    }

    #[test]
    fn test_with_body_sets_size() {
        let msg = Message::with_body(2u32, vec![0; 17]);
        assert_eq!(msg.size(), 17);
        let (header, body) = msg.into_parts();
        assert_eq!(header.size, 17);
        assert_eq!(body.len(), 17);
    }

    #[test]
    fn test_size_tracks_body_under_random_operations() {
        enum Field {
            Byte(u8),
            Wide(u64),
            Text(String),
            Seq(Vec<u16>),
        }

        let mut rng = rand::thread_rng();
        let mut msg = Message::new(0u32);
        let mut stack: Vec<Field> = Vec::new();

        for _ in 0..2000 {
            if stack.is_empty() || rng.gen_bool(0.6) {
                let field = match rng.gen_range(0..4) {
                    0 => Field::Byte(rng.gen()),
                    1 => Field::Wide(rng.gen()),
                    2 => Field::Text("x".repeat(rng.gen_range(0..16))),
                    _ => Field::Seq((0..rng.gen_range(0..8)).map(|_| rng.gen()).collect()),
                };
                match &field {
                    Field::Byte(v) => {
                        msg.push(*v);
                    }
                    Field::Wide(v) => {
                        msg.push(*v);
                    }
                    Field::Text(v) => {
                        msg.push_str(v);
                    }
                    Field::Seq(v) => {
                        msg.push_slice(v);
                    }
                }
                stack.push(field);
            } else {
                match stack.pop().unwrap() {
                    Field::Byte(v) => assert_eq!(msg.pop::<u8>(), v),
                    Field::Wide(v) => assert_eq!(msg.pop::<u64>(), v),
                    Field::Text(v) => assert_eq!(msg.pop_string(), v),
                    Field::Seq(v) => assert_eq!(msg.pop_vec::<u16>(), v),
                }
            }
            assert_size_matches(&msg);
        }
    }
}
