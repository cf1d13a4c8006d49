//! Codec trait and the line codec.
//!
//! A "codec" converts between [`Packet`]s and the text that travels on the
//! wire. The server only depends on the [`Codec`] trait, so a different
//! framing could be swapped in without touching the connection actor.
//!
//! ## Line format
//!
//! ```text
//! <version>|<type>|<origin>|<n>|<off_0>|...|<off_{n-1}>|<item_0 item_1 ... item_{n-1}>
//! ```
//!
//! Items are concatenated into one trailing blob and their boundaries are
//! stored as cumulative offsets, *not* by escaping. An item may therefore
//! contain `|` freely. The last item runs to the end of the line.
//!
//! Offsets count UTF-16 code units. That is what the reference clients
//! measure string length in; for text inside the Basic Multilingual Plane
//! it equals the character count.

use std::cell::RefCell;

use crate::packet::check_arity;
use crate::{PROTOCOL_VERSION, Packet, PacketType, ProtocolError};

/// Converts packets to lines and back.
///
/// `Send + Sync + 'static` so one codec instance can be shared by every
/// connection task.
pub trait Codec: Send + Sync + 'static {
    /// Encodes a packet as a single line, without the trailing newline.
    fn encode(&self, packet: &Packet) -> String;

    /// Decodes one line (no embedded newline).
    ///
    /// # Errors
    /// Any structural violation yields a [`ProtocolError`]. Decoding never
    /// panics and never returns a partially filled packet.
    fn decode(&self, line: &str) -> Result<Packet, ProtocolError>;
}

/// The offset-table line codec.
///
/// ## Example
///
/// ```rust
/// use trailhead_protocol::{Codec, LineCodec, Packet};
///
/// let codec = LineCodec;
/// let packet = Packet::chat(3, "a|b");
///
/// let line = codec.encode(&packet);
/// assert_eq!(line, "0.5|3|3|1|0|a|b");
/// assert_eq!(codec.decode(&line).unwrap(), packet);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec;

thread_local! {
    /// Scratch space for the offset table, reused across decodes on the
    /// same thread so the hot path does not allocate for it.
    static OFFSETS: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

impl Codec for LineCodec {
    fn encode(&self, packet: &Packet) -> String {
        let items = packet.items();
        let blob_len: usize = items.iter().map(String::len).sum();
        let mut line = String::with_capacity(16 + items.len() * 4 + blob_len);

        line.push_str(PROTOCOL_VERSION);
        line.push('|');
        line.push_str(&packet.packet_type().ordinal().to_string());
        line.push('|');
        line.push_str(&packet.origin().to_string());
        line.push('|');
        line.push_str(&items.len().to_string());
        line.push('|');

        let mut offset = 0usize;
        for item in items {
            line.push_str(&offset.to_string());
            line.push('|');
            offset += item.encode_utf16().count();
        }
        for item in items {
            line.push_str(item);
        }
        line
    }

    fn decode(&self, line: &str) -> Result<Packet, ProtocolError> {
        let mut fields = Fields { rest: line };

        let version = fields.next("version")?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: version.to_string(),
            });
        }

        let ordinal = parse_int(fields.next("packet type")?, "packet type")?;
        let packet_type = PacketType::from_ordinal(ordinal)
            .ok_or(ProtocolError::UnknownPacketType(ordinal))?;
        let origin = parse_int(fields.next("origin")?, "origin")?;
        let count = parse_count(fields.next("item count")?, "item count")?;
        check_arity(packet_type, count)?;

        let items = OFFSETS.with(|scratch| {
            let mut offsets = scratch.borrow_mut();
            offsets.clear();
            for _ in 0..count {
                offsets.push(parse_count(fields.next("offset")?, "offset")?);
            }
            split_items(fields.rest, &mut offsets)
        })?;

        // The line reader strips only a trailing `\r`; an embedded one
        // cannot be re-encoded byte for byte, so it is refused.
        Packet::new(packet_type, origin, items)
    }
}

/// Cursor over the `|`-separated header of a line.
struct Fields<'a> {
    rest: &'a str,
}

impl<'a> Fields<'a> {
    /// Returns the text up to the next `|` and advances past it.
    fn next(&mut self, name: &'static str) -> Result<&'a str, ProtocolError> {
        let end = self
            .rest
            .find('|')
            .ok_or(ProtocolError::MissingField(name))?;
        let field = &self.rest[..end];
        self.rest = &self.rest[end + 1..];
        Ok(field)
    }
}

/// Turns UTF-16 offsets into byte offsets in place, then slices the blob.
fn split_items(
    blob: &str,
    offsets: &mut [usize],
) -> Result<Vec<String>, ProtocolError> {
    if offsets.is_empty() {
        return if blob.is_empty() {
            Ok(Vec::new())
        } else {
            Err(ProtocolError::BadOffsets("data after an empty item list"))
        };
    }
    if offsets[0] != 0 {
        return Err(ProtocolError::BadOffsets("first offset must be 0"));
    }

    let mut chars = blob.char_indices();
    let mut units = 0usize;
    let mut byte = 0usize;
    let mut previous = 0usize;

    for offset in offsets.iter_mut() {
        if *offset < previous {
            return Err(ProtocolError::BadOffsets("offsets must not decrease"));
        }
        previous = *offset;
        while units < *offset {
            let (index, c) = chars
                .next()
                .ok_or(ProtocolError::BadOffsets("offset past end of data"))?;
            units += c.len_utf16();
            byte = index + c.len_utf8();
        }
        if units != *offset {
            return Err(ProtocolError::BadOffsets(
                "offset splits a surrogate pair",
            ));
        }
        *offset = byte;
    }

    let mut items = Vec::with_capacity(offsets.len());
    for (i, start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(blob.len());
        items.push(blob[*start..end].to_string());
    }
    Ok(items)
}

/// Parses a canonical signed decimal: optional `-`, no leading zeros,
/// and no `-0`.
fn parse_int(value: &str, field: &'static str) -> Result<i32, ProtocolError> {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if !is_canonical_digits(digits) || value == "-0" {
        return Err(invalid(field, value));
    }
    value.parse().map_err(|_| invalid(field, value))
}

/// Parses a canonical unsigned decimal.
fn parse_count(value: &str, field: &'static str) -> Result<usize, ProtocolError> {
    if !is_canonical_digits(value) {
        return Err(invalid(field, value));
    }
    value.parse().map_err(|_| invalid(field, value))
}

fn is_canonical_digits(digits: &str) -> bool {
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'))
}

fn invalid(field: &'static str, value: &str) -> ProtocolError {
    ProtocolError::InvalidNumber {
        field,
        value: value.to_string(),
    }
}
