//! Decoders for the two modes of the protocol: schema-less decoding into a
//! [`TagDict`] tree and schema-driven decoding into a [`Record`].
//!
//! Both share the wire reader, the hard safety bounds and the skip
//! routines that let the schema decoder walk past unknown tags without
//! materializing them.

use std::borrow::Cow;
use std::str;
use std::sync::Arc;

use error::Error;
use options::{BytesMode, Options};
use schema::{CompiledSchema, Context, FieldDescriptor, FieldKind, FieldValue, HookInfo, Record};
use value::{TagDict, Value};
use wire::{Head, Reader, TypeId};

/// Hard limit on a `String4` payload (bytes).
pub const MAX_STRING_LEN: usize = 100 * 1024 * 1024;
/// Hard limit on container element counts.
pub const MAX_CONTAINER_LEN: usize = 10_000_000;
/// Maximum container/struct nesting depth.
pub const MAX_DEPTH: usize = 100;

/// Decodes a payload schema-lessly, with `Auto` bytes handling.
pub fn decode_generic<'a>(data: &'a [u8], options: Options) -> Result<TagDict<'a>, Error> {
    decode_generic_with_mode(data, BytesMode::Auto, options)
}

/// Decodes a payload schema-lessly with an explicit byte-run policy.
pub fn decode_generic_with_mode<'a>(
    data: &'a [u8],
    mode: BytesMode,
    options: Options,
) -> Result<TagDict<'a>, Error> {
    let mut decoder = GenericDecoder::new(data, options);
    let dict = decoder.decode()?;
    Ok(postprocess(dict, mode, options))
}

/// Decodes a payload against a compiled schema.
pub fn decode_record(
    data: &[u8],
    schema: &Arc<CompiledSchema>,
    options: Options,
) -> Result<Record, Error> {
    let context = Context::new();
    decode_record_with(data, schema, options, &context)
}

/// Decodes a payload against a compiled schema, passing `context` through
/// to any per-field deserialize hooks.
pub fn decode_record_with(
    data: &[u8],
    schema: &Arc<CompiledSchema>,
    options: Options,
    context: &Context,
) -> Result<Record, Error> {
    SchemaDecoder::new(data, schema, options, context).decode()
}

/// Schema-less decoder: parses headed values into a tag-keyed tree.
#[derive(Debug)]
pub struct GenericDecoder<'a> {
    reader: Reader<'a>,
    options: Options,
}

impl<'a> GenericDecoder<'a> {
    pub fn new(data: &'a [u8], options: Options) -> Self {
        GenericDecoder {
            reader: Reader::new(data, options),
            options,
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.reader.position()
    }

    /// Decodes headed values until `StructEnd` or end of input. Byte runs
    /// come back raw; see [`decode_generic`] for the post-processed form.
    pub fn decode(&mut self) -> Result<TagDict<'a>, Error> {
        debug!("generic decode of {} bytes", self.reader.remaining());
        let mut result = TagDict::new();
        while !self.reader.eof() {
            let head = self.reader.read_head()?;
            if head.ty == TypeId::StructEnd {
                break;
            }
            let value = self.read_value(head.ty, 0)?;
            if result.insert(head.tag, value).is_some() {
                warn!("duplicate tag {} in payload, keeping the later value", head.tag);
            }
        }
        debug!("generic decode produced {} tags", result.len());
        Ok(result)
    }

    fn check_depth(&self, depth: usize) -> Result<(), Error> {
        if depth >= MAX_DEPTH {
            return Err(Error::decode("recursion limit exceeded"));
        }
        Ok(())
    }

    fn eof(&self) -> bool {
        self.reader.eof()
    }

    fn read_head(&mut self) -> Result<Head, Error> {
        self.reader.read_head()
    }

    /// Reads the payload of a value whose head named `ty`. `depth` counts
    /// the containers already entered.
    fn read_value(&mut self, ty: TypeId, depth: usize) -> Result<Value<'a>, Error> {
        Ok(match ty {
            TypeId::ZeroTag => Value::Int(0),
            TypeId::Int1 => Value::Int(i64::from(self.reader.read_int1()?)),
            TypeId::Int2 => Value::Int(i64::from(self.reader.read_int2()?)),
            TypeId::Int4 => Value::Int(i64::from(self.reader.read_int4()?)),
            TypeId::Int8 => Value::Int(self.reader.read_int8()?),
            TypeId::Float => Value::Double(f64::from(self.reader.read_float()?)),
            TypeId::Double => Value::Double(self.reader.read_double()?),
            TypeId::String1 => {
                let len = self.reader.read_u8()? as usize;
                Value::Bytes(self.reader.read_bytes(len)?)
            }
            TypeId::String4 => {
                let len = self.read_string4_len()?;
                Value::Bytes(self.reader.read_bytes(len)?)
            }
            TypeId::List => self.read_list(depth)?,
            TypeId::Map => self.read_map(depth)?,
            TypeId::StructBegin => self.read_struct(depth)?,
            TypeId::StructEnd => {
                return Err(Error::decode("unexpected StructEnd head in value position"));
            }
            TypeId::SimpleList => Value::Bytes(self.read_simple_list()?),
        })
    }

    fn read_string4_len(&mut self) -> Result<usize, Error> {
        let len = self.reader.read_len4()?;
        if len < 0 {
            return Err(Error::decode(format!("String4 length is negative: {}", len)));
        }
        let len = len as usize;
        if len > MAX_STRING_LEN {
            return Err(Error::decode(format!(
                "String4 length {} exceeds limit {}",
                len, MAX_STRING_LEN
            )));
        }
        Ok(len)
    }

    /// Reads an integer of any width, as used by container length fields.
    fn read_int_any(&mut self, ty: TypeId) -> Result<i64, Error> {
        Ok(match ty {
            TypeId::ZeroTag => 0,
            TypeId::Int1 => i64::from(self.reader.read_int1()?),
            TypeId::Int2 => i64::from(self.reader.read_int2()?),
            TypeId::Int4 => i64::from(self.reader.read_int4()?),
            TypeId::Int8 => self.reader.read_int8()?,
            other => {
                return Err(Error::decode(format!(
                    "expected integer length, got {:?}",
                    other
                )));
            }
        })
    }

    fn read_container_len(&mut self) -> Result<usize, Error> {
        let head = self.reader.read_head()?;
        let len = self.read_int_any(head.ty)?;
        if len < 0 {
            return Err(Error::decode(format!("container length is negative: {}", len)));
        }
        if len as usize > MAX_CONTAINER_LEN {
            return Err(Error::decode(format!(
                "container length {} exceeds limit {}",
                len, MAX_CONTAINER_LEN
            )));
        }
        Ok(len as usize)
    }

    fn read_list(&mut self, depth: usize) -> Result<Value<'a>, Error> {
        self.check_depth(depth)?;
        let len = self.read_container_len()?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            // Element tags carry no information and are ignored.
            let head = self.reader.read_head()?;
            items.push(self.read_value(head.ty, depth + 1)?);
        }
        Ok(Value::List(items))
    }

    fn read_map(&mut self, depth: usize) -> Result<Value<'a>, Error> {
        self.check_depth(depth)?;
        let strict = self.options.contains(Options::STRICT_MAP);
        let len = self.read_container_len()?;
        let mut pairs = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let khead = self.reader.read_head()?;
            if strict && khead.tag != 0 {
                return Err(Error::decode(format!(
                    "expected map key tag 0, got {}",
                    khead.tag
                )));
            }
            let key = self.read_value(khead.ty, depth + 1)?;
            let vhead = self.reader.read_head()?;
            if strict && vhead.tag != 1 {
                return Err(Error::decode(format!(
                    "expected map value tag 1, got {}",
                    vhead.tag
                )));
            }
            let value = self.read_value(vhead.ty, depth + 1)?;
            pairs.push((key, value));
        }
        Ok(Value::Map(pairs))
    }

    fn read_struct(&mut self, depth: usize) -> Result<Value<'a>, Error> {
        self.check_depth(depth)?;
        let mut dict = TagDict::new();
        loop {
            if self.reader.peek_type()? == TypeId::StructEnd as u8 {
                self.reader.read_u8()?;
                break;
            }
            let head = self.reader.read_head()?;
            let value = self.read_value(head.ty, depth + 1)?;
            if dict.insert(head.tag, value).is_some() {
                warn!("duplicate tag {} in struct, keeping the later value", head.tag);
            }
        }
        Ok(Value::Struct(dict))
    }

    fn read_simple_list(&mut self) -> Result<Cow<'a, [u8]>, Error> {
        // Head already consumed: element-type head, encoded length, bytes.
        let inner = self.reader.read_head()?;
        if inner.ty != TypeId::Int1 {
            return Err(Error::decode(format!(
                "SimpleList expected byte element type, got {:?}",
                inner.ty
            )));
        }
        let len = self.read_container_len()?;
        self.reader.read_bytes(len)
    }

    /// Consumes a value without materializing it. Used for unknown tags.
    fn skip_value(&mut self, ty: TypeId, depth: usize) -> Result<(), Error> {
        match ty {
            TypeId::ZeroTag | TypeId::StructEnd => {}
            TypeId::Int1 => self.reader.skip(1)?,
            TypeId::Int2 => self.reader.skip(2)?,
            TypeId::Int4 | TypeId::Float => self.reader.skip(4)?,
            TypeId::Int8 | TypeId::Double => self.reader.skip(8)?,
            TypeId::String1 => {
                let len = self.reader.read_u8()? as usize;
                self.reader.skip(len)?;
            }
            TypeId::String4 => {
                let len = self.read_string4_len()?;
                self.reader.skip(len)?;
            }
            TypeId::List => self.skip_list(depth)?,
            TypeId::Map => self.skip_map(depth)?,
            TypeId::StructBegin => self.skip_struct(depth)?,
            TypeId::SimpleList => self.skip_simple_list()?,
        }
        Ok(())
    }

    fn skip_list(&mut self, depth: usize) -> Result<(), Error> {
        self.check_depth(depth)?;
        let len = self.read_container_len()?;
        for _ in 0..len {
            let head = self.reader.read_head()?;
            self.skip_value(head.ty, depth + 1)?;
        }
        Ok(())
    }

    fn skip_map(&mut self, depth: usize) -> Result<(), Error> {
        self.check_depth(depth)?;
        let len = self.read_container_len()?;
        for _ in 0..len {
            let khead = self.reader.read_head()?;
            self.skip_value(khead.ty, depth + 1)?;
            let vhead = self.reader.read_head()?;
            self.skip_value(vhead.ty, depth + 1)?;
        }
        Ok(())
    }

    fn skip_struct(&mut self, depth: usize) -> Result<(), Error> {
        self.check_depth(depth)?;
        loop {
            if self.reader.peek_type()? == TypeId::StructEnd as u8 {
                self.reader.read_u8()?;
                return Ok(());
            }
            let head = self.reader.read_head()?;
            self.skip_value(head.ty, depth + 1)?;
        }
    }

    fn skip_simple_list(&mut self) -> Result<(), Error> {
        self.reader.read_head()?;
        let len = self.read_container_len()?;
        self.reader.skip(len)
    }
}

/// Schema-driven decoder: decodes known tags per their declared type and
/// skips the rest.
#[derive(Debug)]
pub struct SchemaDecoder<'a, 'c> {
    inner: GenericDecoder<'a>,
    schema: Arc<CompiledSchema>,
    options: Options,
    context: &'c Context,
}

impl<'a, 'c> SchemaDecoder<'a, 'c> {
    pub fn new(
        data: &'a [u8],
        schema: &Arc<CompiledSchema>,
        options: Options,
        context: &'c Context,
    ) -> Self {
        SchemaDecoder {
            inner: GenericDecoder::new(data, options),
            schema: schema.clone(),
            options,
            context,
        }
    }

    pub fn decode(&mut self) -> Result<Record, Error> {
        let schema = self.schema.clone();
        self.decode_fields(&schema, 0)
    }

    fn decode_fields(&mut self, schema: &Arc<CompiledSchema>, depth: usize) -> Result<Record, Error> {
        debug!("schema decode of `{}`", schema.name());
        let mut record = Record::new(schema);
        loop {
            if self.inner.eof() {
                break;
            }
            let head = self.inner.read_head()?;
            if head.ty == TypeId::StructEnd {
                break;
            }
            match schema.field_index_by_tag(head.tag) {
                Some(index) => {
                    let desc = &schema.fields()[index];
                    let value = self
                        .decode_field(desc, head.ty, depth)
                        .map_err(|e| e.in_field(desc.name))?;
                    record.fill_slot(index, value);
                }
                None => {
                    debug!("skipping unknown tag {} (type {:?})", head.tag, head.ty);
                    self.inner.skip_value(head.ty, depth)?;
                }
            }
        }

        for (index, desc) in schema.fields().iter().enumerate() {
            if record.slot(index).is_none() && !desc.optional {
                return Err(Error::decode("missing required field").in_field(desc.name));
            }
        }
        Ok(record)
    }

    fn decode_field(
        &mut self,
        desc: &FieldDescriptor,
        ty: TypeId,
        depth: usize,
    ) -> Result<FieldValue, Error> {
        let field = match desc.kind {
            FieldKind::Struct(ref nested) => {
                FieldValue::Struct(self.decode_struct_field(nested, ty, depth)?)
            }
            FieldKind::List(ref elem) => {
                if let FieldKind::Struct(ref nested) = **elem {
                    if ty != TypeId::List {
                        return Err(Error::decode(format!(
                            "expected list of structs, got {:?}",
                            ty
                        )));
                    }
                    FieldValue::StructList(self.decode_struct_list(nested, depth)?)
                } else {
                    let value = self.inner.read_value(ty, depth)?;
                    FieldValue::Value(coerce_value(&desc.kind, value)?)
                }
            }
            _ => {
                let value = self.inner.read_value(ty, depth)?;
                FieldValue::Value(coerce_value(&desc.kind, value)?)
            }
        };

        match field {
            FieldValue::Value(value) => {
                let value = match desc.deserialize_with {
                    Some(hook) => {
                        let info = HookInfo {
                            options: self.options,
                            context: self.context,
                            field: desc.name,
                            tag: desc.tag,
                        };
                        hook(value, &info)?
                    }
                    None => value,
                };
                if let Some(ref validator) = desc.validator {
                    validator.check(desc.name, &value)?;
                }
                Ok(FieldValue::Value(value))
            }
            other => Ok(other),
        }
    }

    /// A declared struct is accepted either inline (`StructBegin`) or
    /// opaque-boxed as a `SimpleList` blob holding a complete payload,
    /// which is unpacked recursively.
    fn decode_struct_field(
        &mut self,
        schema: &Arc<CompiledSchema>,
        ty: TypeId,
        depth: usize,
    ) -> Result<Record, Error> {
        match ty {
            TypeId::StructBegin => {
                self.inner.check_depth(depth)?;
                self.decode_fields(schema, depth + 1)
            }
            TypeId::SimpleList => {
                let blob = self.inner.read_simple_list()?;
                let data: &[u8] = &blob;
                let mut sub = SchemaDecoder::new(data, schema, self.options, self.context);
                sub.decode()
            }
            other => Err(Error::decode(format!("expected struct, got {:?}", other))),
        }
    }

    fn decode_struct_list(
        &mut self,
        schema: &Arc<CompiledSchema>,
        depth: usize,
    ) -> Result<Vec<Record>, Error> {
        self.inner.check_depth(depth)?;
        let len = self.inner.read_container_len()?;
        let mut records = Vec::with_capacity(len.min(1024));
        for index in 0..len {
            let head = self.inner.read_head()?;
            let record = self
                .decode_struct_field(schema, head.ty, depth + 1)
                .map_err(|e| e.at_index(index))?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Materializes a generically-read value as its declared kind.
fn coerce_value(kind: &FieldKind, value: Value) -> Result<Value<'static>, Error> {
    match *kind {
        FieldKind::Any => Ok(value.into_owned()),
        FieldKind::Int => match value {
            Value::Int(v) => Ok(Value::Int(v)),
            // A byte blob of machine-word size reads as a big-endian
            // integer, for senders that pack counters into SimpleLists.
            Value::Bytes(ref b) if b.len() <= 8 => {
                let mut acc: u64 = 0;
                for &byte in b.iter() {
                    acc = (acc << 8) | u64::from(byte);
                }
                Ok(Value::Int(acc as i64))
            }
            other => Err(mismatch(kind, &other)),
        },
        FieldKind::Float | FieldKind::Double => match value {
            Value::Double(v) => Ok(Value::Double(v)),
            Value::Int(v) => Ok(Value::Double(v as f64)),
            other => Err(mismatch(kind, &other)),
        },
        FieldKind::Str => match value {
            Value::String(s) => Ok(Value::String(Cow::Owned(s.into_owned()))),
            Value::Bytes(b) => match String::from_utf8(b.into_owned()) {
                Ok(s) => Ok(Value::String(Cow::Owned(s))),
                Err(_) => Err(Error::decode("invalid UTF-8 in field declared as string")),
            },
            other => Err(mismatch(kind, &other)),
        },
        FieldKind::Bytes => match value {
            Value::Bytes(b) => Ok(Value::Bytes(Cow::Owned(b.into_owned()))),
            Value::String(s) => Ok(Value::Bytes(Cow::Owned(s.into_owned().into_bytes()))),
            other => Err(mismatch(kind, &other)),
        },
        FieldKind::List(ref elem) => match value {
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    out.push(coerce_value(elem, item).map_err(|e| e.at_index(index))?);
                }
                Ok(Value::List(out))
            }
            other => Err(mismatch(kind, &other)),
        },
        FieldKind::Map(ref ktype, ref vtype) => match value {
            Value::Map(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (key, val) in pairs {
                    out.push((coerce_value(ktype, key)?, coerce_value(vtype, val)?));
                }
                Ok(Value::Map(out))
            }
            other => Err(mismatch(kind, &other)),
        },
        // Deeply nested declared structs (below field or list-element
        // level) stay in their generic tree form.
        FieldKind::Struct(_) => match value {
            Value::Struct(dict) => Ok(Value::Struct(dict.into_owned())),
            other => Err(mismatch(kind, &other)),
        },
    }
}

fn mismatch(kind: &FieldKind, value: &Value) -> Error {
    Error::decode(format!(
        "expected {} value, got {}",
        kind.kind_name(),
        value.kind_name()
    ))
}

/// Applies the byte-run policy to a freshly decoded tree, once, at the top
/// level.
pub(crate) fn postprocess<'a>(dict: TagDict<'a>, mode: BytesMode, options: Options) -> TagDict<'a> {
    if mode == BytesMode::Raw {
        return dict;
    }
    dict.into_iter()
        .map(|(tag, value)| (tag, convert_value(value, mode, options)))
        .collect()
}

fn convert_value<'a>(value: Value<'a>, mode: BytesMode, options: Options) -> Value<'a> {
    match value {
        Value::Bytes(bytes) => convert_bytes(bytes, mode, options),
        Value::List(items) => Value::List(
            items
                .into_iter()
                .map(|item| convert_value(item, mode, options))
                .collect(),
        ),
        Value::Map(pairs) => Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| {
                    (
                        convert_value(k, mode, options),
                        convert_value(v, mode, options),
                    )
                })
                .collect(),
        ),
        Value::Struct(dict) => Value::Struct(postprocess(dict, mode, options)),
        other => other,
    }
}

fn convert_bytes<'a>(bytes: Cow<'a, [u8]>, mode: BytesMode, options: Options) -> Value<'a> {
    match mode {
        BytesMode::Raw => Value::Bytes(bytes),
        BytesMode::String => match cow_utf8(bytes) {
            Ok(text) => Value::String(text),
            Err(bytes) => Value::Bytes(bytes),
        },
        BytesMode::Auto => {
            let bytes = match cow_utf8(bytes) {
                Ok(text) => {
                    if is_safe_text(&text) {
                        return Value::String(text);
                    }
                    cow_str_bytes(text)
                }
                Err(bytes) => bytes,
            };
            if let Some(nested) = probe_nested(&bytes, mode, options) {
                return nested;
            }
            Value::Bytes(bytes)
        }
    }
}

/// UTF-8 conversion that keeps a borrow borrowed.
fn cow_utf8<'a>(bytes: Cow<'a, [u8]>) -> Result<Cow<'a, str>, Cow<'a, [u8]>> {
    match bytes {
        Cow::Borrowed(slice) => match str::from_utf8(slice) {
            Ok(s) => Ok(Cow::Borrowed(s)),
            Err(_) => Err(Cow::Borrowed(slice)),
        },
        Cow::Owned(vec) => match String::from_utf8(vec) {
            Ok(s) => Ok(Cow::Owned(s)),
            Err(e) => Err(Cow::Owned(e.into_bytes())),
        },
    }
}

fn cow_str_bytes<'a>(text: Cow<'a, str>) -> Cow<'a, [u8]> {
    match text {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

/// Text qualifies for auto mode when it contains no control characters
/// other than newline, carriage return and tab.
fn is_safe_text(text: &str) -> bool {
    text.chars().all(|c| {
        let code = c as u32;
        code >= 32 && code != 127 || c == '\n' || c == '\r' || c == '\t'
    })
}

/// Tries to read a byte run as an embedded payload; a non-empty tree wins.
fn probe_nested<'a>(bytes: &Cow<'a, [u8]>, mode: BytesMode, options: Options) -> Option<Value<'a>> {
    if bytes.is_empty() {
        return None;
    }
    match *bytes {
        Cow::Borrowed(slice) => {
            let mut decoder = GenericDecoder::new(slice, options);
            match decoder.decode() {
                Ok(ref dict) if dict.is_empty() => None,
                Ok(dict) => Some(Value::Struct(postprocess(dict, mode, options))),
                Err(_) => None,
            }
        }
        Cow::Owned(ref vec) => {
            let mut decoder = GenericDecoder::new(vec, options);
            match decoder.decode() {
                Ok(ref dict) if dict.is_empty() => None,
                Ok(dict) => {
                    let owned: TagDict<'static> = postprocess(dict, mode, options).into_owned();
                    Some(Value::Struct(owned))
                }
                Err(_) => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{FieldDef, Validator};

    fn generic(data: &[u8]) -> TagDict {
        decode_generic(data, Options::empty()).unwrap()
    }

    #[test]
    fn zero_tag_decodes_to_integer_zero() {
        let dict = generic(&[0x0C]);
        assert_eq!(dict.get(0).unwrap().as_int(), Some(0));
    }

    #[test]
    fn width_polymorphic_integers() {
        // 100 as Int1, 256 as Int2, under tags 0 and 1.
        let dict = generic(&[0x00, 0x64, 0x11, 0x01, 0x00]);
        assert_eq!(dict.get(0).unwrap().as_int(), Some(100));
        assert_eq!(dict.get(1).unwrap().as_int(), Some(256));
    }

    #[test]
    fn utf8_string_decodes_as_text_in_auto_mode() {
        let dict = generic(&[0x06, 0x03, 0xE4, 0xBD, 0xA0]);
        assert_eq!(dict.get(0).unwrap().as_str(), Some("你"));
    }

    #[test]
    fn binary_string_stays_bytes_in_auto_mode() {
        let dict = generic(&[0x06, 0x02, 0xFF, 0xFE]);
        assert_eq!(dict.get(0).unwrap().as_bytes(), Some(&[0xFF, 0xFE][..]));
    }

    #[test]
    fn raw_mode_keeps_text_as_bytes() {
        let dict =
            decode_generic_with_mode(&[0x06, 0x02, 0x68, 0x69], BytesMode::Raw, Options::empty())
                .unwrap();
        assert_eq!(dict.get(0).unwrap().as_bytes(), Some(&b"hi"[..]));
    }

    #[test]
    fn auto_mode_probes_nested_payloads() {
        // Tag 0 carries a SimpleList whose payload is itself `00 64`
        // (tag 0 = 100), so auto mode unpacks it into a struct.
        let dict = generic(&[0x0D, 0x00, 0x00, 0x02, 0x00, 0x64]);
        let nested = dict.get(0).unwrap().as_struct().expect("nested struct");
        assert_eq!(nested.get(0).unwrap().as_int(), Some(100));
    }

    #[test]
    fn simple_list_decodes_to_bytes() {
        let dict = generic(&[0x0D, 0x00, 0x00, 0x02, 0xCA, 0xFE]);
        assert_eq!(dict.get(0).unwrap().as_bytes(), Some(&[0xCA, 0xFE][..]));
    }

    #[test]
    fn simple_list_rejects_non_byte_element_type() {
        // Inner head names Int2 instead of Int1.
        let err = decode_generic(&[0x0D, 0x01, 0x00, 0x02, 0xCA, 0xFE], Options::empty())
            .unwrap_err();
        assert!(err.to_string().contains("SimpleList"));
    }

    #[test]
    fn map_pairs_decode_in_order() {
        // {0: 100} as a wire map: head, len 1, key int1 0, value int1 100.
        let dict = generic(&[0x08, 0x00, 0x01, 0x00, 0x00, 0x10, 0x64]);
        match dict.get(0).unwrap() {
            &Value::Map(ref pairs) => {
                assert_eq!(pairs.len(), 1);
                assert_eq!(pairs[0].0.as_int(), Some(0));
                assert_eq!(pairs[0].1.as_int(), Some(100));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn tolerant_map_tags_by_default_strict_on_request() {
        // Key tagged 5 instead of 0.
        let payload = [0x08, 0x00, 0x01, 0x50, 0x00, 0x10, 0x64];
        assert!(decode_generic(&payload, Options::empty()).is_ok());
        let err = decode_generic(&payload, Options::STRICT_MAP).unwrap_err();
        assert!(err.to_string().contains("map key tag"));
    }

    #[test]
    fn nested_struct_round_trip_shape() {
        // Tag 1 holds a struct {0: 7}.
        let dict = generic(&[0x1A, 0x00, 0x07, 0x0B]);
        let nested = dict.get(1).unwrap().as_struct().unwrap();
        assert_eq!(nested.get(0).unwrap().as_int(), Some(7));
    }

    #[test]
    fn unterminated_struct_is_partial_data() {
        let err = decode_generic(&[0x1A, 0x00, 0x07], Options::empty()).unwrap_err();
        assert!(err.is_partial());
    }

    #[test]
    fn recursion_limit_enforced() {
        // 101 nested struct-begins under tag 0.
        let mut payload = vec![0x0A; MAX_DEPTH + 1];
        payload.extend(vec![0x0B; MAX_DEPTH + 1]);
        let err = decode_generic(&payload, Options::empty()).unwrap_err();
        assert!(err.to_string().contains("recursion"));

        // Exactly at the limit it still parses.
        let mut payload = vec![0x0A; MAX_DEPTH];
        payload.extend(vec![0x0B; MAX_DEPTH]);
        assert!(decode_generic(&payload, Options::empty()).is_ok());
    }

    #[test]
    fn negative_string4_length_rejected() {
        let err = decode_generic(&[0x07, 0xFF, 0xFF, 0xFF, 0xFF], Options::empty()).unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn oversized_container_length_rejected() {
        // List claiming 50 million elements.
        let err = decode_generic(
            &[0x09, 0x02, 0x02, 0xFA, 0xF0, 0x80],
            Options::empty(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[test]
    fn duplicate_tags_keep_the_later_value() {
        let dict = generic(&[0x00, 0x01, 0x00, 0x02]);
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(0).unwrap().as_int(), Some(2));
    }

    fn user_schema() -> Arc<CompiledSchema> {
        CompiledSchema::builder("User")
            .field(FieldDef::new("uid", FieldKind::Int).tag(0))
            .field(FieldDef::new("level", FieldKind::Int).tag(2).default_value(1i64))
            .build()
            .unwrap()
    }

    #[test]
    fn schema_decode_skips_unknown_tags() {
        // Tags {0, 2} known; tag 1 is a list of two int1s and is skipped.
        let payload = [
            0x00, 0x0A, // uid = 10
            0x19, 0x00, 0x02, 0x00, 0x01, 0x00, 0x02, // tag 1: [1, 2]
            0x20, 0x14, // level = 20
        ];
        let rec = decode_record(&payload, &user_schema(), Options::empty()).unwrap();
        assert_eq!(rec.value("uid").unwrap().as_int(), Some(10));
        assert_eq!(rec.value("level").unwrap().as_int(), Some(20));
    }

    #[test]
    fn schema_decode_applies_defaults() {
        let rec = decode_record(&[0x00, 0x0A], &user_schema(), Options::empty()).unwrap();
        assert_eq!(rec.value("level").unwrap().as_int(), Some(1));
        assert!(!rec.is_set("level"));
        assert!(rec.is_set("uid"));
    }

    #[test]
    fn schema_decode_missing_required_field() {
        let err = decode_record(&[0x20, 0x14], &user_schema(), Options::empty()).unwrap_err();
        assert_eq!(err.to_string(), "decode error: missing required field (at uid)");
    }

    #[test]
    fn schema_decode_string_field_requires_utf8() {
        let schema = CompiledSchema::builder("S")
            .field(FieldDef::new("name", FieldKind::Str).tag(0))
            .build()
            .unwrap();
        let rec = decode_record(&[0x06, 0x02, 0x68, 0x69], &schema, Options::empty()).unwrap();
        assert_eq!(rec.value("name").unwrap().as_str(), Some("hi"));

        let err = decode_record(&[0x06, 0x02, 0xFF, 0xFE], &schema, Options::empty()).unwrap_err();
        assert!(err.to_string().contains("invalid UTF-8"));
        assert!(err.to_string().contains("at name"));
    }

    #[test]
    fn schema_decode_nested_struct_inline_and_boxed() {
        let inner = CompiledSchema::builder("Inner")
            .field(FieldDef::new("n", FieldKind::Int).tag(0))
            .build()
            .unwrap();
        let outer = CompiledSchema::builder("Outer")
            .field(FieldDef::new("inner", FieldKind::Struct(inner.clone())).tag(0))
            .build()
            .unwrap();

        // Inline: StructBegin {0: 7} StructEnd.
        let rec = decode_record(&[0x0A, 0x00, 0x07, 0x0B], &outer, Options::empty()).unwrap();
        assert_eq!(rec.record("inner").unwrap().value("n").unwrap().as_int(), Some(7));

        // Opaque-boxed: the same fields packed into a SimpleList blob.
        let rec = decode_record(
            &[0x0D, 0x00, 0x00, 0x02, 0x00, 0x07],
            &outer,
            Options::empty(),
        )
        .unwrap();
        assert_eq!(rec.record("inner").unwrap().value("n").unwrap().as_int(), Some(7));
    }

    #[test]
    fn schema_decode_list_of_structs() {
        let item = CompiledSchema::builder("Item")
            .field(FieldDef::new("id", FieldKind::Int).tag(0))
            .build()
            .unwrap();
        let schema = CompiledSchema::builder("Cart")
            .field(
                FieldDef::new("items", FieldKind::List(Box::new(FieldKind::Struct(item))))
                    .tag(0),
            )
            .build()
            .unwrap();

        // List of two inline structs {0: 1} and {0: 2}.
        let payload = [
            0x09, 0x00, 0x02, // list head, len 2
            0x0A, 0x00, 0x01, 0x0B, // {id: 1}
            0x0A, 0x00, 0x02, 0x0B, // {id: 2}
        ];
        let rec = decode_record(&payload, &schema, Options::empty()).unwrap();
        match rec.get("items").unwrap() {
            &FieldValue::StructList(ref items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1].value("id").unwrap().as_int(), Some(2));
            }
            other => panic!("expected struct list, got {:?}", other),
        }
    }

    #[test]
    fn schema_decode_typed_list_elements() {
        let schema = CompiledSchema::builder("Names")
            .field(
                FieldDef::new("names", FieldKind::List(Box::new(FieldKind::Str))).tag(0),
            )
            .build()
            .unwrap();
        // ["hi", <invalid utf8>] — the second element fails with a trail.
        let payload = [
            0x09, 0x00, 0x02, // list head, len 2
            0x06, 0x02, 0x68, 0x69, // "hi"
            0x06, 0x01, 0xFF, // invalid
        ];
        let err = decode_record(&payload, &schema, Options::empty()).unwrap_err();
        assert!(err.to_string().contains("at names.1"));
    }

    #[test]
    fn schema_decode_runs_validators() {
        let schema = CompiledSchema::builder("Bounded")
            .field(
                FieldDef::new("n", FieldKind::Int)
                    .tag(0)
                    .validator(Validator::new().le(100.0)),
            )
            .build()
            .unwrap();
        assert!(decode_record(&[0x00, 0x64], &schema, Options::empty()).is_ok());
        let err = decode_record(&[0x00, 0x65], &schema, Options::empty()).unwrap_err();
        match err {
            Error::Validation { ref field, .. } => assert_eq!(field, "n"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn schema_decode_applies_deserialize_hook() {
        fn double_it(v: Value<'static>, _info: &HookInfo) -> Result<Value<'static>, Error> {
            Ok(Value::Int(v.as_int().unwrap_or(0) * 2))
        }
        let schema = CompiledSchema::builder("Hooked")
            .field(FieldDef::new("n", FieldKind::Int).tag(0).deserialize_with(double_it))
            .build()
            .unwrap();
        let rec = decode_record(&[0x00, 0x15], &schema, Options::empty()).unwrap();
        assert_eq!(rec.value("n").unwrap().as_int(), Some(42));
    }

    #[test]
    fn unknown_tag_result_matches_absent_tag() {
        let schema = user_schema();
        let with_unknown = decode_record(
            &[0x00, 0x0A, 0x19, 0x00, 0x02, 0x00, 0x01, 0x00, 0x02, 0x20, 0x14],
            &schema,
            Options::empty(),
        )
        .unwrap();
        let without = decode_record(&[0x00, 0x0A, 0x20, 0x14], &schema, Options::empty()).unwrap();
        assert_eq!(with_unknown, without);
    }
}
