//! Length-prefixed stream framing.
//!
//! A framer turns the boundary-less byte stream of a transport into a
//! sequence of `[length header][payload]` records. The header's width,
//! endianness and whether it counts itself are fixed per framer instance;
//! the payload is an ordinary encoded value.
//!
//! [`FrameWriter`]/[`FrameReader`] are the synchronous feed-and-iterate
//! pair; [`FrameCodec`] exposes the same framing rules as a tokio codec
//! for async pipelines.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio_codec;

use decode::{decode_generic_with_mode, decode_record_with};
use encode::{encode, encode_record_with};
use error::Error;
use options::{BytesMode, Options};
use schema::{CompiledSchema, Context, Record};
use value::{TagDict, Value};

/// Default cap on a reader's ingest buffer.
pub const DEFAULT_MAX_BUFFER: usize = 10 * 1024 * 1024;

/// Width of the frame length header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LengthType {
    U8,
    U16,
    U32,
}

impl LengthType {
    pub fn size(self) -> usize {
        match self {
            LengthType::U8 => 1,
            LengthType::U16 => 2,
            LengthType::U32 => 4,
        }
    }

    fn max_value(self) -> u64 {
        match self {
            LengthType::U8 => 0xFF,
            LengthType::U16 => 0xFFFF,
            LengthType::U32 => 0xFFFF_FFFF,
        }
    }
}

/// Per-instance framing parameters.
///
/// The length field's endianness is independent of the payload's endian
/// option. Defaults follow the protocol's common deployment: a 4-byte
/// big-endian header whose value includes the header itself.
#[derive(Debug, Copy, Clone)]
pub struct FrameConfig {
    pub length_type: LengthType,
    pub inclusive_length: bool,
    pub little_endian_length: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        FrameConfig {
            length_type: LengthType::U32,
            inclusive_length: true,
            little_endian_length: false,
        }
    }
}

impl FrameConfig {
    /// The value to put in the header for a payload of `payload_len`
    /// bytes, or an encode error when the header cannot represent it.
    fn header_value(&self, payload_len: usize) -> Result<u64, Error> {
        let value = if self.inclusive_length {
            payload_len as u64 + self.length_type.size() as u64
        } else {
            payload_len as u64
        };
        if value > self.length_type.max_value() {
            return Err(Error::encode(format!(
                "packet too large: {} bytes does not fit a {}-byte length header",
                payload_len,
                self.length_type.size()
            )));
        }
        Ok(value)
    }

    fn write_header(&self, value: u64, out: &mut BytesMut) {
        match self.length_type {
            LengthType::U8 => out.extend_from_slice(&[value as u8]),
            LengthType::U16 => {
                let mut b = [0; 2];
                if self.little_endian_length {
                    LittleEndian::write_u16(&mut b, value as u16);
                } else {
                    BigEndian::write_u16(&mut b, value as u16);
                }
                out.extend_from_slice(&b);
            }
            LengthType::U32 => {
                let mut b = [0; 4];
                if self.little_endian_length {
                    LittleEndian::write_u32(&mut b, value as u32);
                } else {
                    BigEndian::write_u32(&mut b, value as u32);
                }
                out.extend_from_slice(&b);
            }
        }
    }

    fn read_header(&self, buf: &[u8]) -> u64 {
        match self.length_type {
            LengthType::U8 => u64::from(buf[0]),
            LengthType::U16 => u64::from(if self.little_endian_length {
                LittleEndian::read_u16(buf)
            } else {
                BigEndian::read_u16(buf)
            }),
            LengthType::U32 => u64::from(if self.little_endian_length {
                LittleEndian::read_u32(buf)
            } else {
                BigEndian::read_u32(buf)
            }),
        }
    }
}

/// Accumulates framed messages into an internal buffer.
#[derive(Debug)]
pub struct FrameWriter {
    config: FrameConfig,
    options: Options,
    context: Context,
    buf: BytesMut,
}

impl FrameWriter {
    pub fn new(config: FrameConfig, options: Options) -> Self {
        FrameWriter {
            config,
            options,
            context: Context::new(),
            buf: BytesMut::new(),
        }
    }

    /// Installs a context passed to serialize hooks of packed records.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Encodes a value and appends it as one frame.
    pub fn pack(&mut self, value: &Value) -> Result<(), Error> {
        let payload = encode(value, self.options)?;
        self.put_frame(&payload)
    }

    /// Encodes a record and appends it as one frame.
    pub fn pack_record(&mut self, record: &Record) -> Result<(), Error> {
        let payload = encode_record_with(record, self.options, &self.context)?;
        self.put_frame(&payload)
    }

    /// Appends pre-encoded payload bytes as one frame.
    pub fn pack_bytes(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.put_frame(payload)
    }

    fn put_frame(&mut self, payload: &[u8]) -> Result<(), Error> {
        let value = self.config.header_value(payload.len())?;
        self.config.write_header(value, &mut self.buf);
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn get_buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Hands out the accumulated frames and resets the buffer.
    pub fn take_buffer(&mut self) -> Bytes {
        self.buf.take().freeze()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// What a reader materializes each frame payload into.
#[derive(Debug, Clone)]
pub enum DecodeTarget {
    /// Schema-less decoding with the given byte-run policy.
    Generic(BytesMode),
    /// Schema-driven decoding against a compiled schema.
    Schema(Arc<CompiledSchema>),
}

/// One decoded message from a [`FrameReader`].
#[derive(Debug, PartialEq)]
pub enum FrameItem {
    Tree(TagDict<'static>),
    Record(Record),
}

/// Incremental frame parser: `feed` bytes in arbitrary chunks, iterate to
/// drain complete messages.
///
/// Messages come out in feed order. A frame whose payload fails to decode
/// is consumed before the error is returned, so later frames in the
/// buffer stay parsable.
#[derive(Debug)]
pub struct FrameReader {
    target: DecodeTarget,
    config: FrameConfig,
    options: Options,
    context: Context,
    buf: BytesMut,
    max_buffer: usize,
}

impl FrameReader {
    pub fn new(target: DecodeTarget, config: FrameConfig, options: Options) -> Self {
        FrameReader {
            target,
            config,
            options,
            context: Context::new(),
            buf: BytesMut::new(),
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }

    pub fn with_max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    /// Installs a context passed to deserialize hooks of decoded records.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Appends raw stream bytes to the ingest buffer.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), Error> {
        let size = self.buf.len() + data.len();
        if size > self.max_buffer {
            return Err(Error::BufferOverflow {
                size,
                max: self.max_buffer,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Bytes currently buffered (complete and partial frames).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn decode_payload(&self, payload: &[u8]) -> Result<FrameItem, Error> {
        match self.target {
            DecodeTarget::Generic(mode) => {
                let dict = decode_generic_with_mode(payload, mode, self.options)?;
                Ok(FrameItem::Tree(dict.into_owned()))
            }
            DecodeTarget::Schema(ref schema) => {
                let record = decode_record_with(payload, schema, self.options, &self.context)?;
                Ok(FrameItem::Record(record))
            }
        }
    }
}

impl Iterator for FrameReader {
    type Item = Result<FrameItem, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let header_len = self.config.length_type.size();
        if self.buf.len() < header_len {
            return None;
        }
        let frame_len = self.config.read_header(&self.buf[..header_len]) as usize;
        let body_len = if self.config.inclusive_length {
            if frame_len < header_len {
                // The frame can never be valid; drop its header so the
                // stream stays parsable.
                self.buf.split_to(header_len);
                return Some(Err(Error::decode(format!(
                    "frame length {} smaller than its {}-byte header",
                    frame_len, header_len
                ))));
            }
            frame_len - header_len
        } else {
            frame_len
        };
        if self.buf.len() < header_len + body_len {
            return None;
        }
        let frame = self.buf.split_to(header_len + body_len);
        Some(self.decode_payload(&frame[header_len..]))
    }
}

/// The framing rules as a tokio codec over raw payload bytes, for wiring
/// the protocol into async transports. Decoding yields whole payloads;
/// interpreting them stays the caller's choice.
#[derive(Debug, Default)]
pub struct FrameCodec {
    config: FrameConfig,
}

impl FrameCodec {
    pub fn new(config: FrameConfig) -> Self {
        FrameCodec { config }
    }
}

impl tokio_codec::Decoder for FrameCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Error> {
        let header_len = self.config.length_type.size();
        if src.len() < header_len {
            return Ok(None);
        }
        let frame_len = self.config.read_header(&src[..header_len]) as usize;
        let body_len = if self.config.inclusive_length {
            if frame_len < header_len {
                src.split_to(header_len);
                return Err(Error::decode(format!(
                    "frame length {} smaller than its {}-byte header",
                    frame_len, header_len
                )));
            }
            frame_len - header_len
        } else {
            frame_len
        };
        if src.len() < header_len + body_len {
            return Ok(None);
        }
        let frame = src.split_to(header_len + body_len).freeze();
        Ok(Some(frame.slice_from(header_len)))
    }
}

impl tokio_codec::Encoder for FrameCodec {
    type Item = Bytes;
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Error> {
        let value = self.config.header_value(item.len())?;
        self.config.write_header(value, dst);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
