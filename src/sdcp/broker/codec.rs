// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Wire codec for the subset of MQTT the printer firmware speaks.
//!
//! The codec is pure: it never performs I/O. Incoming bytes are pushed into a
//! [`FrameDecoder`], which reassembles frames split across reads and yields
//! complete [`RawFrame`]s. [`decode_packet`] turns a raw frame into a typed
//! [`Packet`], and the `encode_*` functions build the frames the broker sends.
//!
//! Only CONNECT, PUBLISH, SUBSCRIBE, UNSUBSCRIBE, PINGREQ and DISCONNECT are
//! decoded into typed packets. Every other packet type is surfaced as
//! [`Packet::Other`] so the caller can log and ignore it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::sdcp::broker::broker_error::CodecError;

/// Largest value a four byte remaining length can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// MQTT control packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    /// Maps the high nibble of a fixed header to a packet type.
    pub fn from_nibble(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Connect,
            2 => Self::Connack,
            3 => Self::Publish,
            4 => Self::Puback,
            5 => Self::Pubrec,
            6 => Self::Pubrel,
            7 => Self::Pubcomp,
            8 => Self::Subscribe,
            9 => Self::Suback,
            10 => Self::Unsubscribe,
            11 => Self::Unsuback,
            12 => Self::Pingreq,
            13 => Self::Pingresp,
            14 => Self::Disconnect,
            15 => Self::Auth,
            _ => return None,
        })
    }
}

/// Delivery guarantee of a PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for Qos {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(CodecError::ProtocolViolation(format!(
                "invalid QoS value {other}"
            ))),
        }
    }
}

/// A complete frame: fixed header byte plus the remaining-length body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    first_byte: u8,
    body: Bytes,
}

impl RawFrame {
    pub fn new(first_byte: u8, body: Bytes) -> Self {
        Self { first_byte, body }
    }

    /// Packet type nibble (bits 7-4 of the first byte).
    pub fn type_nibble(&self) -> u8 {
        self.first_byte >> 4
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_nibble(self.type_nibble())
    }

    /// Flag nibble: DUP (bit 3), QoS (bits 2-1), RETAIN (bit 0) for PUBLISH.
    pub fn flags(&self) -> u8 {
        self.first_byte & 0x0F
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Packet identifier at the head of the body, if there are at least two bytes.
    ///
    /// Used to address a negative acknowledgment at a SUBSCRIBE whose topic
    /// list could not be decoded.
    pub fn leading_packet_id(&self) -> Option<u16> {
        (self.body.len() >= 2).then(|| u16::from_be_bytes([self.body[0], self.body[1]]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub connect_flags: u8,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: Qos,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    /// Topic filters with their requested QoS, in request order.
    pub entries: Vec<(String, u8)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

/// A decoded control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Publish(Publish),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    Pingreq,
    Disconnect,
    /// Any packet type the broker does not handle.
    Other { type_nibble: u8 },
}

// ============================================================================
// Remaining length
// ============================================================================

/// Appends `len` as a variable-length integer.
///
/// # Errors
///
/// Returns [`CodecError::RemainingLengthTooLarge`] if `len` exceeds
/// [`MAX_REMAINING_LENGTH`].
pub fn encode_remaining_length(mut len: usize, out: &mut BytesMut) -> Result<(), CodecError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(CodecError::RemainingLengthTooLarge(len));
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

/// Decodes a variable-length integer from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` ends before the terminating byte, and
/// `Ok(Some((value, consumed)))` otherwise.
///
/// # Errors
///
/// Returns [`CodecError::MalformedRemainingLength`] when four bytes carry the
/// continuation bit.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (index, byte) in buf.iter().enumerate() {
        if index >= 4 {
            return Err(CodecError::MalformedRemainingLength);
        }
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        Err(CodecError::MalformedRemainingLength)
    } else {
        Ok(None)
    }
}

// ============================================================================
// Frame reassembly
// ============================================================================

/// Accumulates bytes from successive reads and splits them into frames.
///
/// An incomplete trailing frame stays buffered until the bytes that complete
/// it arrive.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pops the next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// A malformed remaining length is unrecoverable: the stream can no longer
    /// be split into frames and the connection should be closed.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, CodecError> {
        if self.buffer.len() < 2 {
            return Ok(None);
        }
        let Some((len, consumed)) = decode_remaining_length(&self.buffer[1..])? else {
            return Ok(None);
        };
        let total = 1 + consumed + len;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let mut frame = self.buffer.split_to(total);
        let first_byte = frame[0];
        frame.advance(1 + consumed);
        Ok(Some(RawFrame::new(first_byte, frame.freeze())))
    }

    /// Iterates over every complete frame currently buffered.
    ///
    /// The iterator stops at the first incomplete frame; it can be created
    /// again after the next [`extend`](Self::extend). After an error it yields
    /// nothing more.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            decoder: self,
            failed: false,
        }
    }
}

pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<RawFrame, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.decoder.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

struct Reader<'a> {
    body: &'a Bytes,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(body: &'a Bytes) -> Self {
        Self { body, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, CodecError> {
        if self.remaining() < 1 {
            return Err(CodecError::Truncated(what));
        }
        let value = self.body[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, CodecError> {
        if self.remaining() < 2 {
            return Err(CodecError::Truncated(what));
        }
        let value = u16::from_be_bytes([self.body[self.pos], self.body[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    fn binary(&mut self, what: &'static str) -> Result<Bytes, CodecError> {
        let len = self.u16(what)? as usize;
        if self.remaining() < len {
            return Err(CodecError::Truncated(what));
        }
        let value = self.body.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(value)
    }

    fn string(&mut self, what: &'static str) -> Result<String, CodecError> {
        let raw = self.binary(what)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Skips an MQTT v5 property block.
    fn properties(&mut self, what: &'static str) -> Result<(), CodecError> {
        let Some((len, consumed)) = decode_remaining_length(&self.body[self.pos..])? else {
            return Err(CodecError::Truncated(what));
        };
        self.pos += consumed;
        if self.remaining() < len {
            return Err(CodecError::Truncated(what));
        }
        self.pos += len;
        Ok(())
    }

    fn rest(&mut self) -> Bytes {
        let value = self.body.slice(self.pos..);
        self.pos = self.body.len();
        value
    }
}

/// Decodes a raw frame into a typed packet.
///
/// # Errors
///
/// Returns a [`CodecError`] when the body is shorter than its fields claim, a
/// string is not UTF-8, or a field value is out of range. These errors are
/// local to the frame; the stream itself stays in sync.
pub fn decode_packet(frame: &RawFrame) -> Result<Packet, CodecError> {
    match frame.packet_type() {
        Some(PacketType::Connect) => decode_connect(frame).map(Packet::Connect),
        Some(PacketType::Publish) => decode_publish(frame).map(Packet::Publish),
        Some(PacketType::Subscribe) => decode_subscribe(frame).map(Packet::Subscribe),
        Some(PacketType::Unsubscribe) => decode_unsubscribe(frame).map(Packet::Unsubscribe),
        Some(PacketType::Pingreq) => Ok(Packet::Pingreq),
        Some(PacketType::Disconnect) => Ok(Packet::Disconnect),
        _ => Ok(Packet::Other {
            type_nibble: frame.type_nibble(),
        }),
    }
}

fn decode_connect(frame: &RawFrame) -> Result<Connect, CodecError> {
    let mut reader = Reader::new(frame.body());
    let protocol_name = reader.string("protocol name")?;
    let protocol_level = reader.u8("protocol level")?;
    let connect_flags = reader.u8("connect flags")?;
    let keep_alive = reader.u16("keep alive")?;
    if protocol_level == 5 {
        reader.properties("connect properties")?;
    }
    let client_id = reader.string("client id")?;

    let will = if connect_flags & 0x04 != 0 {
        if protocol_level == 5 {
            reader.properties("will properties")?;
        }
        let topic = reader.string("will topic")?;
        let message = reader.binary("will message")?;
        Some(Will { topic, message })
    } else {
        None
    };
    let username = if connect_flags & 0x80 != 0 {
        Some(reader.string("username")?)
    } else {
        None
    };
    let password = if connect_flags & 0x40 != 0 {
        Some(reader.binary("password")?)
    } else {
        None
    };

    Ok(Connect {
        protocol_name,
        protocol_level,
        connect_flags,
        keep_alive,
        client_id,
        will,
        username,
        password,
    })
}

fn decode_publish(frame: &RawFrame) -> Result<Publish, CodecError> {
    let flags = frame.flags();
    let qos = Qos::try_from((flags >> 1) & 0x03)?;
    let mut reader = Reader::new(frame.body());
    let topic = reader.string("topic")?;
    let packet_id = if qos > Qos::AtMostOnce {
        Some(reader.u16("packet id")?)
    } else {
        None
    };
    Ok(Publish {
        dup: flags & 0x08 != 0,
        qos,
        retain: flags & 0x01 != 0,
        topic,
        packet_id,
        payload: reader.rest(),
    })
}

fn decode_subscribe(frame: &RawFrame) -> Result<Subscribe, CodecError> {
    let mut reader = Reader::new(frame.body());
    let packet_id = reader.u16("packet id")?;
    let mut entries = Vec::new();
    while reader.remaining() > 0 {
        let topic = reader.string("topic filter")?;
        let qos = reader.u8("requested QoS")? & 0x03;
        entries.push((topic, qos));
    }
    if entries.is_empty() {
        return Err(CodecError::ProtocolViolation(
            "SUBSCRIBE without topic filters".into(),
        ));
    }
    Ok(Subscribe { packet_id, entries })
}

fn decode_unsubscribe(frame: &RawFrame) -> Result<Unsubscribe, CodecError> {
    let mut reader = Reader::new(frame.body());
    let packet_id = reader.u16("packet id")?;
    let mut topics = Vec::new();
    while reader.remaining() > 0 {
        topics.push(reader.string("topic filter")?);
    }
    Ok(Unsubscribe { packet_id, topics })
}

// ============================================================================
// Encoding
// ============================================================================

fn put_string(out: &mut BytesMut, value: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(value.len()).map_err(|_| {
        CodecError::ProtocolViolation(format!("field of {} bytes exceeds 65535", value.len()))
    })?;
    out.put_u16(len);
    out.put_slice(value);
    Ok(())
}

fn frame(first_byte: u8, body: &[u8]) -> Result<Bytes, CodecError> {
    let mut out = BytesMut::with_capacity(body.len() + 5);
    out.put_u8(first_byte);
    encode_remaining_length(body.len(), &mut out)?;
    out.put_slice(body);
    Ok(out.freeze())
}

/// Encodes a PUBLISH frame.
///
/// QoS 0 frames start with `0x30` and carry no packet id; QoS 1 and 2 frames
/// require `packet_id`.
pub fn encode_publish(
    topic: &str,
    payload: &[u8],
    qos: Qos,
    packet_id: Option<u16>,
) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::with_capacity(topic.len() + payload.len() + 4);
    put_string(&mut body, topic.as_bytes())?;
    match (qos, packet_id) {
        (Qos::AtMostOnce, _) => {}
        (_, Some(id)) => body.put_u16(id),
        (_, None) => {
            return Err(CodecError::ProtocolViolation(
                "QoS > 0 PUBLISH requires a packet id".into(),
            ))
        }
    }
    body.put_slice(payload);
    frame(0x30 | ((qos as u8) << 1), &body)
}

/// SUBACK granting `granted` (one byte per requested filter).
pub fn encode_suback(packet_id: u16, granted: &[u8]) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::with_capacity(2 + granted.len());
    body.put_u16(packet_id);
    body.put_slice(granted);
    frame(0x90, &body)
}

/// SUBACK with the single failure code 0x80.
pub fn encode_suback_failure(packet_id: u16) -> Bytes {
    let [hi, lo] = packet_id.to_be_bytes();
    Bytes::copy_from_slice(&[0x90, 0x03, hi, lo, 0x80])
}

pub fn encode_unsuback(packet_id: u16) -> Bytes {
    let [hi, lo] = packet_id.to_be_bytes();
    Bytes::copy_from_slice(&[0xB0, 0x02, hi, lo])
}

/// UNSUBSCRIBE acknowledgment in SUBACK framing, as the firmware has been
/// observed to accept.
pub fn encode_unsubscribe_as_suback(packet_id: u16) -> Bytes {
    let [hi, lo] = packet_id.to_be_bytes();
    Bytes::copy_from_slice(&[0x90, 0x02, hi, lo])
}

pub fn encode_connack(return_code: u8) -> Bytes {
    Bytes::copy_from_slice(&[0x20, 0x02, 0x00, return_code])
}

pub fn encode_puback(packet_id: u16) -> Bytes {
    let [hi, lo] = packet_id.to_be_bytes();
    Bytes::copy_from_slice(&[0x40, 0x02, hi, lo])
}

pub fn encode_pingresp() -> Bytes {
    Bytes::from_static(&[0xD0, 0x00])
}

pub fn encode_pingreq() -> Bytes {
    Bytes::from_static(&[0xC0, 0x00])
}

pub fn encode_disconnect() -> Bytes {
    Bytes::from_static(&[0xE0, 0x00])
}

/// Client-side MQTT 3.1.1 CONNECT with a clean session and no will.
pub fn encode_connect(client_id: &str, keep_alive: u16) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::with_capacity(client_id.len() + 12);
    put_string(&mut body, b"MQTT")?;
    body.put_u8(4);
    body.put_u8(0x02);
    body.put_u16(keep_alive);
    put_string(&mut body, client_id.as_bytes())?;
    frame(0x10, &body)
}

/// Client-side SUBSCRIBE.
pub fn encode_subscribe(packet_id: u16, entries: &[(&str, Qos)]) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::new();
    body.put_u16(packet_id);
    for (topic, qos) in entries {
        put_string(&mut body, topic.as_bytes())?;
        body.put_u8(*qos as u8);
    }
    frame(0x82, &body)
}

/// Client-side UNSUBSCRIBE.
pub fn encode_unsubscribe(packet_id: u16, topics: &[&str]) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::new();
    body.put_u16(packet_id);
    for topic in topics {
        put_string(&mut body, topic.as_bytes())?;
    }
    frame(0xA2, &body)
}
