//! The bit-level wire format: type ids, value heads, and the bounded
//! reader/writer pair everything else is built on.
//!
//! Every encoded value is preceded by a *head* carrying a 4-bit type id and
//! a tag. Tags below 15 share the head byte with the type id; larger tags
//! spill into a second byte:
//!
//! ```text
//! tag < 15:   [ tag:4 | type:4 ]
//! tag >= 15:  [ 0xF   | type:4 ] [ tag:8 ]
//! ```

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use num_traits::FromPrimitive;
use std::borrow::Cow;

use error::Error;
use options::Options;

/// The 4-bit code naming a value's physical encoding.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum TypeId {
    Int1 = 0,
    Int2 = 1,
    Int4 = 2,
    Int8 = 3,
    Float = 4,
    Double = 5,
    String1 = 6,
    String4 = 7,
    Map = 8,
    List = 9,
    StructBegin = 10,
    StructEnd = 11,
    /// The integer zero, carried entirely by the head.
    ZeroTag = 12,
    /// A raw byte array with a single length, more compact than a `List`
    /// of per-byte heads.
    SimpleList = 13,
}

/// The decoded prologue of a value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Head {
    pub tag: u8,
    pub ty: TypeId,
}

/// Streaming reader over untrusted input.
///
/// The cursor never reads past the end of its slice; every operation that
/// would returns [`Error::PartialData`] instead, which the framing layer
/// interprets as "wait for more bytes".
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    little_endian: bool,
    zero_copy: bool,
    float_rescue: bool,
}

impl<'a> Reader<'a> {
    /// Creates a reader over raw bytes (eg. a frame payload).
    ///
    /// Consumes `LITTLE_ENDIAN`, `ZERO_COPY` and `NO_FLOAT_HEURISTIC` from
    /// the option word; all other flags are ignored here.
    pub fn new(data: &'a [u8], options: Options) -> Self {
        let little_endian = options.contains(Options::LITTLE_ENDIAN);
        Reader {
            data,
            pos: 0,
            little_endian,
            zero_copy: options.contains(Options::ZERO_COPY),
            // The rescue only makes sense when the caller did not assert
            // an endianness explicitly.
            float_rescue: !little_endian && !options.contains(Options::NO_FLOAT_HEURISTIC),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Takes `n` bytes off the front of the stream.
    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if n > self.remaining() {
            return Err(Error::partial(format!(
                "need {} bytes, only {} left",
                n,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let b = self.take(1)?;
        Ok(b[0])
    }

    pub fn peek_u8(&self) -> Result<u8, Error> {
        if self.eof() {
            return Err(Error::partial("cannot peek past end of data"));
        }
        Ok(self.data[self.pos])
    }

    pub fn skip(&mut self, n: usize) -> Result<(), Error> {
        self.take(n).map(|_| ())
    }

    pub fn read_int1(&mut self) -> Result<i8, Error> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_int2(&mut self) -> Result<i16, Error> {
        let buf = self.take(2)?;
        Ok(if self.little_endian {
            LittleEndian::read_i16(buf)
        } else {
            BigEndian::read_i16(buf)
        })
    }

    pub fn read_int4(&mut self) -> Result<i32, Error> {
        let buf = self.take(4)?;
        Ok(if self.little_endian {
            LittleEndian::read_i32(buf)
        } else {
            BigEndian::read_i32(buf)
        })
    }

    pub fn read_int8(&mut self) -> Result<i64, Error> {
        let buf = self.take(8)?;
        Ok(if self.little_endian {
            LittleEndian::read_i64(buf)
        } else {
            BigEndian::read_i64(buf)
        })
    }

    /// Reads the 4-byte length prefix of a `String4`.
    ///
    /// This field is big-endian on the wire no matter what the option word
    /// says, so it must not go through `read_int4`.
    pub fn read_len4(&mut self) -> Result<i32, Error> {
        let buf = self.take(4)?;
        Ok(BigEndian::read_i32(buf))
    }

    /// Reads an IEEE-754 single.
    ///
    /// In big-endian mode a rescue heuristic covers senders that emit
    /// mis-endian floats in otherwise well-formed payloads: if the
    /// big-endian interpretation is non-finite or implausibly large while
    /// the little-endian one is reasonable, the little-endian value wins.
    /// Lossy on pathological-but-legal payloads; disable via
    /// `NO_FLOAT_HEURISTIC` when talking to strict producers.
    pub fn read_float(&mut self) -> Result<f32, Error> {
        let buf = self.take(4)?;
        if self.little_endian {
            return Ok(LittleEndian::read_f32(buf));
        }
        let primary = BigEndian::read_f32(buf);
        if !self.float_rescue {
            return Ok(primary);
        }
        let alt = LittleEndian::read_f32(buf);
        if !primary.is_finite() && alt.is_finite() {
            warn!("rescued non-finite big-endian float as {}", alt);
            return Ok(alt);
        }
        if alt.is_finite() && primary.abs() > 1e9 && alt.abs() <= 1e6 {
            warn!("rescued implausible float {} as {}", primary, alt);
            return Ok(alt);
        }
        Ok(primary)
    }

    /// Reads an IEEE-754 double; same rescue rules as `read_float`, with an
    /// extra clause for values squashed towards zero by byte reversal.
    pub fn read_double(&mut self) -> Result<f64, Error> {
        let buf = self.take(8)?;
        if self.little_endian {
            return Ok(LittleEndian::read_f64(buf));
        }
        let primary = BigEndian::read_f64(buf);
        if !self.float_rescue {
            return Ok(primary);
        }
        let alt = LittleEndian::read_f64(buf);
        if !primary.is_finite() && alt.is_finite() {
            warn!("rescued non-finite big-endian double as {}", alt);
            return Ok(alt);
        }
        if alt.is_finite() {
            if primary.abs() > 1e18 && alt.abs() <= 1e12 {
                warn!("rescued implausible double {} as {}", primary, alt);
                return Ok(alt);
            }
            if primary.abs() < 1e-30 && alt.abs() <= 1e6 {
                warn!("rescued denormal-range double {} as {}", primary, alt);
                return Ok(alt);
            }
        }
        Ok(primary)
    }

    /// Reads `n` raw bytes; borrowed from the input under `ZERO_COPY`,
    /// copied otherwise.
    pub fn read_bytes(&mut self, n: usize) -> Result<Cow<'a, [u8]>, Error> {
        let slice = self.take(n)?;
        Ok(if self.zero_copy {
            Cow::Borrowed(slice)
        } else {
            Cow::Owned(slice.to_vec())
        })
    }

    /// Reads the one- or two-byte head of the next value.
    pub fn read_head(&mut self) -> Result<Head, Error> {
        let b = self.read_u8()?;
        let ty = TypeId::from_u8(b & 0x0F)
            .ok_or_else(|| Error::decode(format!("unknown JCE type id {}", b & 0x0F)))?;
        let mut tag = b >> 4;
        if tag == 15 {
            tag = self.read_u8()?;
        }
        Ok(Head { tag, ty })
    }

    /// Type nibble of the next head, without advancing. Used to detect
    /// `StructEnd` while walking struct bodies.
    pub fn peek_type(&self) -> Result<u8, Error> {
        Ok(self.peek_u8()? & 0x0F)
    }
}

/// Emitter for the wire format, writing into a growable buffer.
///
/// The endian selection is fixed at construction; length prefixes that the
/// protocol pins to big-endian bypass it.
#[derive(Debug)]
pub struct Writer {
    buf: Vec<u8>,
    little_endian: bool,
}

impl Writer {
    pub fn new(options: Options) -> Self {
        Writer::with_capacity(options, 64)
    }

    pub fn with_capacity(options: Options, cap: usize) -> Self {
        Writer {
            buf: Vec::with_capacity(cap),
            little_endian: options.contains(Options::LITTLE_ENDIAN),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn put_i16(&mut self, v: i16) {
        let mut b = [0; 2];
        if self.little_endian {
            LittleEndian::write_i16(&mut b, v);
        } else {
            BigEndian::write_i16(&mut b, v);
        }
        self.buf.extend_from_slice(&b);
    }

    fn put_i32(&mut self, v: i32) {
        let mut b = [0; 4];
        if self.little_endian {
            LittleEndian::write_i32(&mut b, v);
        } else {
            BigEndian::write_i32(&mut b, v);
        }
        self.buf.extend_from_slice(&b);
    }

    fn put_i64(&mut self, v: i64) {
        let mut b = [0; 8];
        if self.little_endian {
            LittleEndian::write_i64(&mut b, v);
        } else {
            BigEndian::write_i64(&mut b, v);
        }
        self.buf.extend_from_slice(&b);
    }

    pub fn write_head(&mut self, tag: u8, ty: TypeId) {
        if tag < 15 {
            self.buf.push((tag << 4) | ty as u8);
        } else {
            self.buf.push(0xF0 | ty as u8);
            self.buf.push(tag);
        }
    }

    /// Writes an integer in its smallest form: `ZeroTag` for zero, then
    /// the narrowest of `Int1`/`Int2`/`Int4`/`Int8` that holds the value.
    pub fn write_int(&mut self, tag: u8, v: i64) {
        if v == 0 {
            self.write_head(tag, TypeId::ZeroTag);
        } else if v >= i64::from(i8::min_value()) && v <= i64::from(i8::max_value()) {
            self.write_head(tag, TypeId::Int1);
            self.buf.push(v as u8);
        } else if v >= i64::from(i16::min_value()) && v <= i64::from(i16::max_value()) {
            self.write_head(tag, TypeId::Int2);
            self.put_i16(v as i16);
        } else if v >= i64::from(i32::min_value()) && v <= i64::from(i32::max_value()) {
            self.write_head(tag, TypeId::Int4);
            self.put_i32(v as i32);
        } else {
            self.write_head(tag, TypeId::Int8);
            self.put_i64(v);
        }
    }

    /// Writes a one-byte integer without the `ZeroTag` compression. Map
    /// pairs use this so that a zero key/value keeps an explicit payload
    /// byte.
    pub fn write_int1(&mut self, tag: u8, v: i8) {
        self.write_head(tag, TypeId::Int1);
        self.buf.push(v as u8);
    }

    pub fn write_float(&mut self, tag: u8, v: f32) {
        self.write_head(tag, TypeId::Float);
        let mut b = [0; 4];
        if self.little_endian {
            LittleEndian::write_f32(&mut b, v);
        } else {
            BigEndian::write_f32(&mut b, v);
        }
        self.buf.extend_from_slice(&b);
    }

    pub fn write_double(&mut self, tag: u8, v: f64) {
        self.write_head(tag, TypeId::Double);
        let mut b = [0; 8];
        if self.little_endian {
            LittleEndian::write_f64(&mut b, v);
        } else {
            BigEndian::write_f64(&mut b, v);
        }
        self.buf.extend_from_slice(&b);
    }

    /// Writes a UTF-8 string: `String1` for payloads up to 255 bytes, else
    /// `String4` whose length prefix is big-endian regardless of the
    /// writer's endian selection.
    pub fn write_string(&mut self, tag: u8, s: &str) -> Result<(), Error> {
        let data = s.as_bytes();
        if data.len() <= 255 {
            self.write_head(tag, TypeId::String1);
            self.buf.push(data.len() as u8);
        } else if data.len() as u64 >= 1 << 32 {
            return Err(Error::encode(format!("string too long: {} bytes", data.len())));
        } else {
            self.write_head(tag, TypeId::String4);
            let mut b = [0; 4];
            BigEndian::write_u32(&mut b, data.len() as u32);
            self.buf.extend_from_slice(&b);
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Writes a byte blob as a `SimpleList`: the outer head, a nested
    /// `Int1`-typed head at tag 0 naming the element type, the length as
    /// an encoded integer, then the raw bytes.
    pub fn write_bytes(&mut self, tag: u8, data: &[u8]) {
        self.write_head(tag, TypeId::SimpleList);
        self.write_head(0, TypeId::Int1);
        self.write_int(0, data.len() as i64);
        self.buf.extend_from_slice(data);
    }

    /// Emits the head and encoded length of a `List`; the caller writes
    /// the elements, each headed at tag 0.
    pub fn write_list_head(&mut self, tag: u8, len: usize) {
        self.write_head(tag, TypeId::List);
        self.write_int(0, len as i64);
    }

    /// Emits the head and encoded length of a `Map`; the caller writes the
    /// pairs, keys at tag 0 and values at tag 1.
    pub fn write_map_head(&mut self, tag: u8, len: usize) {
        self.write_head(tag, TypeId::Map);
        self.write_int(0, len as i64);
    }

    pub fn write_struct_begin(&mut self, tag: u8) {
        self.write_head(tag, TypeId::StructBegin);
    }

    pub fn write_struct_end(&mut self) {
        self.write_head(0, TypeId::StructEnd);
    }
}
