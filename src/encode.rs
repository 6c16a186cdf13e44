//! Encoders: the mode-selecting dispatcher over [`Value`] trees and the
//! schema-driven record encoder.
//!
//! A top-level [`TagDict`] encodes as bare tag fields (struct-inline, no
//! `StructBegin`/`StructEnd` bracket); nested dicts are bracketed. Plain
//! mappings become wire Maps, sequences become Lists, scalars encode at
//! tag 0.

use error::Error;
use options::Options;
use schema::{Context, FieldDescriptor, FieldKind, FieldValue, HookInfo, Record};
use value::{TagDict, Value};
use wire::Writer;

use decode::MAX_DEPTH;

/// Encodes a value tree. The top-level dispatch is by variant: a `Struct`
/// emits its fields inline, anything else becomes a single headed value
/// at tag 0.
pub fn encode(value: &Value, options: Options) -> Result<Vec<u8>, Error> {
    let context = Context::new();
    Encoder::new(options, &context).encode(value)
}

/// Encodes a record against its compiled schema, fields in tag order.
pub fn encode_record(record: &Record, options: Options) -> Result<Vec<u8>, Error> {
    let context = Context::new();
    Encoder::new(options, &context).encode_record(record)
}

/// Like [`encode_record`], passing `context` through to serialize hooks.
pub fn encode_record_with(
    record: &Record,
    options: Options,
    context: &Context,
) -> Result<Vec<u8>, Error> {
    Encoder::new(options, context).encode_record(record)
}

/// Single-use encoder; owns the output buffer for one encode call.
#[derive(Debug)]
pub struct Encoder<'c> {
    writer: Writer,
    options: Options,
    context: &'c Context,
}

impl<'c> Encoder<'c> {
    pub fn new(options: Options, context: &'c Context) -> Self {
        Encoder {
            writer: Writer::new(options),
            options,
            context,
        }
    }

    pub fn encode(mut self, value: &Value) -> Result<Vec<u8>, Error> {
        match *value {
            Value::Struct(ref dict) => self.write_tagdict_fields(dict, 0)?,
            ref other => self.write_value(0, other, 0)?,
        }
        Ok(self.writer.into_bytes())
    }

    pub fn encode_record(mut self, record: &Record) -> Result<Vec<u8>, Error> {
        self.write_record_fields(record, 0)?;
        Ok(self.writer.into_bytes())
    }

    fn check_depth(&self, depth: usize) -> Result<(), Error> {
        if depth >= MAX_DEPTH {
            return Err(Error::encode("recursion limit exceeded"));
        }
        Ok(())
    }

    fn write_tagdict_fields(&mut self, dict: &TagDict, depth: usize) -> Result<(), Error> {
        for &(tag, ref value) in dict.iter() {
            self.write_value(tag, value, depth)?;
        }
        Ok(())
    }

    fn write_value(&mut self, tag: u8, value: &Value, depth: usize) -> Result<(), Error> {
        match *value {
            Value::Int(v) => self.writer.write_int(tag, v),
            Value::Double(v) => self.writer.write_double(tag, v),
            Value::String(ref s) => self.writer.write_string(tag, s)?,
            Value::Bytes(ref b) => self.writer.write_bytes(tag, b),
            Value::List(ref items) => {
                self.check_depth(depth)?;
                self.writer.write_list_head(tag, items.len());
                for item in items {
                    self.write_value(0, item, depth + 1)?;
                }
            }
            Value::Map(ref pairs) => {
                self.check_depth(depth)?;
                self.writer.write_map_head(tag, pairs.len());
                for &(ref key, ref val) in pairs {
                    self.write_pair_item(0, key, depth + 1)?;
                    self.write_pair_item(1, val, depth + 1)?;
                }
            }
            Value::Struct(ref dict) => {
                self.check_depth(depth)?;
                self.writer.write_struct_begin(tag);
                self.write_tagdict_fields(dict, depth + 1)?;
                self.writer.write_struct_end();
            }
        }
        Ok(())
    }

    /// Map pairs keep an explicit payload byte for the integer zero, so a
    /// zero key stays a `(head, 0x00)` pair on the wire.
    fn write_pair_item(&mut self, tag: u8, value: &Value, depth: usize) -> Result<(), Error> {
        match *value {
            Value::Int(0) => {
                self.writer.write_int1(tag, 0);
                Ok(())
            }
            ref other => self.write_value(tag, other, depth),
        }
    }

    fn write_record_fields(&mut self, record: &Record, depth: usize) -> Result<(), Error> {
        let schema = record.schema().clone();
        for (index, desc) in schema.fields().iter().enumerate() {
            if self.options.contains(Options::EXCLUDE_UNSET) && !record.slot_is_set(index) {
                continue;
            }
            match record.slot(index) {
                None => {
                    if self.options.contains(Options::SERIALIZE_NONE) {
                        self.write_zero_value(desc.tag, &desc.kind)?;
                    }
                }
                Some(field) => {
                    if self.options.contains(Options::OMIT_DEFAULT) {
                        if let Some(ref default) = desc.default {
                            if let FieldValue::Value(ref v) = *field {
                                if v == default {
                                    continue;
                                }
                            }
                        }
                    }
                    self.write_field(desc, field, depth)?;
                }
            }
        }
        Ok(())
    }

    fn write_field(
        &mut self,
        desc: &FieldDescriptor,
        field: &FieldValue,
        depth: usize,
    ) -> Result<(), Error> {
        match *field {
            FieldValue::Value(ref value) => {
                if let Some(hook) = desc.serialize_with {
                    let info = HookInfo {
                        options: self.options,
                        context: self.context,
                        field: desc.name,
                        tag: desc.tag,
                    };
                    let value = hook(value.clone(), &info)?;
                    self.write_value_as_kind(desc, &value, depth)
                } else {
                    self.write_value_as_kind(desc, value, depth)
                }
            }
            FieldValue::Struct(ref record) => match desc.kind {
                FieldKind::Struct(_) | FieldKind::Any => {
                    self.check_depth(depth)?;
                    self.writer.write_struct_begin(desc.tag);
                    self.write_record_fields(record, depth + 1)?;
                    self.writer.write_struct_end();
                    Ok(())
                }
                // Declared-bytes fields opaque-box nested structures.
                FieldKind::Bytes => {
                    let blob = encode_record_with(record, self.options, self.context)?;
                    self.writer.write_bytes(desc.tag, &blob);
                    Ok(())
                }
                ref other => Err(Error::encode(format!(
                    "cannot encode struct record as {} for field `{}`",
                    other.kind_name(),
                    desc.name
                ))),
            },
            FieldValue::StructList(ref records) => match desc.kind {
                FieldKind::List(_) | FieldKind::Any => {
                    self.check_depth(depth)?;
                    self.writer.write_list_head(desc.tag, records.len());
                    for record in records {
                        self.check_depth(depth + 1)?;
                        self.writer.write_struct_begin(0);
                        self.write_record_fields(record, depth + 2)?;
                        self.writer.write_struct_end();
                    }
                    Ok(())
                }
                ref other => Err(Error::encode(format!(
                    "cannot encode struct list as {} for field `{}`",
                    other.kind_name(),
                    desc.name
                ))),
            },
        }
    }

    /// Emits a plain value under the field's declared kind, applying the
    /// documented coercions.
    fn write_value_as_kind(
        &mut self,
        desc: &FieldDescriptor,
        value: &Value,
        depth: usize,
    ) -> Result<(), Error> {
        match desc.kind {
            FieldKind::Any => self.write_value(desc.tag, value, depth),
            FieldKind::Int => match *value {
                Value::Int(v) => {
                    self.writer.write_int(desc.tag, v);
                    Ok(())
                }
                Value::Bytes(ref b) if b.len() == 1 => {
                    self.writer.write_int(desc.tag, i64::from(b[0]));
                    Ok(())
                }
                ref other => Err(self.mismatch(desc, other)),
            },
            FieldKind::Float => match *value {
                Value::Double(v) => {
                    self.writer.write_float(desc.tag, v as f32);
                    Ok(())
                }
                Value::Int(v) => {
                    self.writer.write_float(desc.tag, v as f32);
                    Ok(())
                }
                ref other => Err(self.mismatch(desc, other)),
            },
            FieldKind::Double => match *value {
                Value::Double(v) => {
                    self.writer.write_double(desc.tag, v);
                    Ok(())
                }
                Value::Int(v) => {
                    self.writer.write_double(desc.tag, v as f64);
                    Ok(())
                }
                ref other => Err(self.mismatch(desc, other)),
            },
            FieldKind::Str => match *value {
                Value::String(ref s) => self.writer.write_string(desc.tag, s),
                Value::Bytes(ref b) => match ::std::str::from_utf8(b) {
                    Ok(s) => self.writer.write_string(desc.tag, s),
                    Err(_) => Err(Error::encode(format!(
                        "field `{}` declared as string holds non-UTF-8 bytes",
                        desc.name
                    ))),
                },
                ref other => Err(self.mismatch(desc, other)),
            },
            FieldKind::Bytes => match *value {
                Value::Bytes(ref b) => {
                    self.writer.write_bytes(desc.tag, b);
                    Ok(())
                }
                Value::String(ref s) => {
                    self.writer.write_bytes(desc.tag, s.as_bytes());
                    Ok(())
                }
                Value::Int(v) if v >= 0 && v <= 255 => {
                    self.writer.write_bytes(desc.tag, &[v as u8]);
                    Ok(())
                }
                Value::Struct(_) | Value::List(_) | Value::Map(_) => {
                    // Opaque-box: serialize the composite into a blob.
                    let blob = encode(value, self.options)?;
                    self.writer.write_bytes(desc.tag, &blob);
                    Ok(())
                }
                ref other => Err(self.mismatch(desc, other)),
            },
            FieldKind::List(_) => match *value {
                Value::List(_) => self.write_value(desc.tag, value, depth),
                ref other => Err(self.mismatch(desc, other)),
            },
            FieldKind::Map(..) => match *value {
                Value::Map(_) => self.write_value(desc.tag, value, depth),
                ref other => Err(self.mismatch(desc, other)),
            },
            FieldKind::Struct(_) => match *value {
                Value::Struct(_) => self.write_value(desc.tag, value, depth),
                ref other => Err(self.mismatch(desc, other)),
            },
        }
    }

    /// An unset optional field under `SERIALIZE_NONE` writes its kind's
    /// zero/empty value.
    fn write_zero_value(&mut self, tag: u8, kind: &FieldKind) -> Result<(), Error> {
        match *kind {
            FieldKind::Int | FieldKind::Any => self.writer.write_int(tag, 0),
            FieldKind::Float => self.writer.write_float(tag, 0.0),
            FieldKind::Double => self.writer.write_double(tag, 0.0),
            FieldKind::Str => self.writer.write_string(tag, "")?,
            FieldKind::Bytes => self.writer.write_bytes(tag, &[]),
            FieldKind::List(_) => self.writer.write_list_head(tag, 0),
            FieldKind::Map(..) => self.writer.write_map_head(tag, 0),
            FieldKind::Struct(_) => {
                self.writer.write_struct_begin(tag);
                self.writer.write_struct_end();
            }
        }
        Ok(())
    }

    fn mismatch(&self, desc: &FieldDescriptor, value: &Value) -> Error {
        Error::encode(format!(
            "cannot encode {} as {} for field `{}`",
            value.kind_name(),
            desc.kind.kind_name(),
            desc.name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decode::{decode_generic, decode_generic_with_mode, decode_record};
    use options::BytesMode;
    use schema::{CompiledSchema, FieldDef};
    use std::sync::Arc;

    fn dict(entries: Vec<(u8, Value<'static>)>) -> Value<'static> {
        Value::Struct(entries.into_iter().collect())
    }

    #[test]
    fn zero_tag_optimization() {
        let bytes = encode(&dict(vec![(0, Value::Int(0))]), Options::empty()).unwrap();
        assert_eq!(bytes, vec![0x0C]);
    }

    #[test]
    fn width_selection() {
        let bytes = encode(&dict(vec![(0, Value::Int(100))]), Options::empty()).unwrap();
        assert_eq!(bytes, vec![0x00, 0x64]);
        let bytes = encode(&dict(vec![(0, Value::Int(256))]), Options::empty()).unwrap();
        assert_eq!(bytes, vec![0x01, 0x01, 0x00]);
    }

    #[test]
    fn string_boundaries() {
        let bytes = encode(&dict(vec![(0, Value::from("你"))]), Options::empty()).unwrap();
        assert_eq!(bytes, vec![0x06, 0x03, 0xE4, 0xBD, 0xA0]);

        let long: String = ::std::iter::repeat('a').take(256).collect();
        let bytes = encode(
            &dict(vec![(0, Value::from(long))]),
            Options::LITTLE_ENDIAN,
        )
        .unwrap();
        assert_eq!(&bytes[..5], &[0x07, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(bytes.len(), 5 + 256);
    }

    #[test]
    fn struct_vs_map() {
        // A TagDict is struct-inline at the top level.
        let bytes = encode(&dict(vec![(0, Value::Int(100))]), Options::empty()).unwrap();
        assert_eq!(bytes, vec![0x00, 0x64]);

        // A generic map with the same content has the Map wire shape, and
        // its zero key keeps an explicit payload byte.
        let map = Value::Map(vec![(Value::Int(0), Value::Int(100))]);
        let bytes = encode(&map, Options::empty()).unwrap();
        assert_eq!(bytes, vec![0x08, 0x00, 0x01, 0x00, 0x00, 0x10, 0x64]);
    }

    #[test]
    fn bytes_as_simple_list() {
        let bytes = encode(
            &dict(vec![(0, Value::from(vec![0xCA, 0xFE]))]),
            Options::empty(),
        )
        .unwrap();
        assert_eq!(bytes, vec![0x0D, 0x00, 0x00, 0x02, 0xCA, 0xFE]);
    }

    #[test]
    fn nested_dict_is_bracketed() {
        let inner: TagDict<'static> = vec![(0, Value::Int(7))].into_iter().collect();
        let bytes = encode(&dict(vec![(1, Value::Struct(inner))]), Options::empty()).unwrap();
        assert_eq!(bytes, vec![0x1A, 0x00, 0x07, 0x0B]);
    }

    #[test]
    fn scalar_encodes_at_tag_zero() {
        let bytes = encode(&Value::Int(100), Options::empty()).unwrap();
        assert_eq!(bytes, vec![0x00, 0x64]);
    }

    #[test]
    fn deep_nesting_fails_with_encode_error() {
        let mut value = Value::List(Vec::new());
        for _ in 0..(MAX_DEPTH + 1) {
            value = Value::List(vec![value]);
        }
        let err = encode(&value, Options::empty()).unwrap_err();
        assert!(err.to_string().contains("recursion"));
    }

    #[test]
    fn generic_round_trip_preserves_tree() {
        let tree = dict(vec![
            (0, Value::Int(-77)),
            (1, Value::from("text")),
            (2, Value::from(vec![0x00, 0x01, 0xFF])),
            (
                3,
                Value::List(vec![Value::Int(1), Value::from("two"), Value::Double(3.0)]),
            ),
            (
                4,
                Value::Map(vec![(Value::from("k"), Value::Int(0))]),
            ),
            (
                5,
                dict(vec![(0, Value::Int(1)), (9, Value::from("nested"))]),
            ),
        ]);
        let bytes = encode(&tree, Options::empty()).unwrap();
        let decoded = decode_generic(&bytes, Options::empty()).unwrap();
        let raw = decode_generic_with_mode(&bytes, BytesMode::Raw, Options::empty()).unwrap();
        assert_eq!(raw.get(0).unwrap().as_int(), Some(-77));
        assert_eq!(decoded.get(1).unwrap().as_str(), Some("text"));
        match decoded.get(5).unwrap() {
            &Value::Struct(ref d) => assert_eq!(d.get(9).unwrap().as_str(), Some("nested")),
            other => panic!("expected struct, got {:?}", other),
        }

        // Re-encoding the decoded tree yields a payload with the same
        // logical content.
        let again = encode(&Value::Struct(raw.clone()), Options::empty()).unwrap();
        let reparsed = decode_generic_with_mode(&again, BytesMode::Raw, Options::empty()).unwrap();
        assert_eq!(reparsed, raw);
    }

    fn user_schema() -> Arc<CompiledSchema> {
        CompiledSchema::builder("User")
            .field(FieldDef::new("uid", FieldKind::Int).tag(0))
            .field(
                FieldDef::new("name", FieldKind::Str)
                    .tag(1)
                    .optional()
                    .default_value("anon".to_string()),
            )
            .field(FieldDef::new("blob", FieldKind::Bytes).tag(2).optional())
            .build()
            .unwrap()
    }

    #[test]
    fn schema_round_trip() {
        let schema = user_schema();
        let mut rec = Record::new(&schema);
        rec.set("uid", 42i64).unwrap();
        rec.set("name", "alice".to_string()).unwrap();
        rec.set("blob", vec![1u8, 2, 3]).unwrap();

        let bytes = encode_record(&rec, Options::empty()).unwrap();
        let back = decode_record(&bytes, &schema, Options::empty()).unwrap();
        assert_eq!(back.value("uid").unwrap().as_int(), Some(42));
        assert_eq!(back.value("name").unwrap().as_str(), Some("alice"));
        assert_eq!(back.value("blob").unwrap().as_bytes(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn omit_default_skips_matching_fields() {
        let schema = user_schema();
        let mut rec = Record::new(&schema);
        rec.set("uid", 1i64).unwrap();
        rec.set("name", "anon".to_string()).unwrap();

        let bytes = encode_record(&rec, Options::OMIT_DEFAULT).unwrap();
        // Only uid makes it out.
        assert_eq!(bytes, vec![0x00, 0x01]);

        let bytes = encode_record(&rec, Options::empty()).unwrap();
        assert!(bytes.len() > 2);
    }

    #[test]
    fn exclude_unset_skips_untouched_fields() {
        let schema = user_schema();
        let mut rec = Record::new(&schema);
        rec.set("uid", 1i64).unwrap();
        // `name` holds its default but was never assigned.
        let bytes = encode_record(&rec, Options::EXCLUDE_UNSET).unwrap();
        assert_eq!(bytes, vec![0x00, 0x01]);
    }

    #[test]
    fn serialize_none_writes_empty_values() {
        let schema = user_schema();
        let mut rec = Record::new(&schema);
        rec.set("uid", 1i64).unwrap();
        // `blob` has no default and no value: with SERIALIZE_NONE it is
        // written as an empty SimpleList after uid and the name default.
        let bytes = encode_record(&rec, Options::SERIALIZE_NONE).unwrap();
        assert_eq!(
            bytes,
            vec![0x00, 0x01, 0x16, 0x04, 0x61, 0x6E, 0x6F, 0x6E, 0x2D, 0x00, 0x0C]
        );
    }

    #[test]
    fn bytes_field_coercions() {
        let schema = user_schema();
        let mut rec = Record::new(&schema);
        rec.set("uid", 1i64).unwrap();
        rec.set("blob", "hi".to_string()).unwrap();
        // A string value in a declared-bytes field encodes as its UTF-8
        // bytes.
        let bytes = encode_record(&rec, Options::EXCLUDE_UNSET).unwrap();
        let back = decode_record(&bytes, &schema, Options::empty()).unwrap();
        assert_eq!(back.value("blob").unwrap().as_bytes(), Some(&b"hi"[..]));
    }

    #[test]
    fn bytes_field_boxes_nested_struct() {
        let inner = CompiledSchema::builder("Inner")
            .field(FieldDef::new("n", FieldKind::Int).tag(0))
            .build()
            .unwrap();
        let outer = CompiledSchema::builder("Outer")
            .field(FieldDef::new("payload", FieldKind::Bytes).tag(0))
            .build()
            .unwrap();

        let mut nested = Record::new(&inner);
        nested.set("n", 7i64).unwrap();
        let mut rec = Record::new(&outer);
        rec.set_record("payload", nested).unwrap();

        let bytes = encode_record(&rec, Options::empty()).unwrap();
        // SimpleList wrapping the encoded `{0: 7}` payload.
        assert_eq!(bytes, vec![0x0D, 0x00, 0x00, 0x02, 0x00, 0x07]);
    }

    #[test]
    fn type_mismatch_names_the_offender() {
        let schema = CompiledSchema::builder("S")
            .field(FieldDef::new("n", FieldKind::Int).tag(0))
            .build()
            .unwrap();
        let mut rec = Record::new(&schema);
        rec.set("n", "not a number".to_string()).unwrap();
        let err = encode_record(&rec, Options::empty()).unwrap_err();
        assert!(err.to_string().contains("string"));
        assert!(err.to_string().contains("`n`"));
    }

    #[test]
    fn serialize_hook_applies() {
        fn negate(v: Value<'static>, _info: &HookInfo) -> Result<Value<'static>, Error> {
            Ok(Value::Int(-v.as_int().unwrap_or(0)))
        }
        let schema = CompiledSchema::builder("Hooked")
            .field(FieldDef::new("n", FieldKind::Int).tag(0).serialize_with(negate))
            .build()
            .unwrap();
        let mut rec = Record::new(&schema);
        rec.set("n", 5i64).unwrap();
        let bytes = encode_record(&rec, Options::empty()).unwrap();
        assert_eq!(bytes, vec![0x00, 0xFB]); // -5 as Int1
    }

    #[test]
    fn struct_list_round_trip() {
        let item = CompiledSchema::builder("Item")
            .field(FieldDef::new("id", FieldKind::Int).tag(0))
            .build()
            .unwrap();
        let schema = CompiledSchema::builder("Cart")
            .field(
                FieldDef::new("items", FieldKind::List(Box::new(FieldKind::Struct(item.clone()))))
                    .tag(0),
            )
            .build()
            .unwrap();

        let mut a = Record::new(&item);
        a.set("id", 1i64).unwrap();
        let mut b = Record::new(&item);
        b.set("id", 2i64).unwrap();
        let mut rec = Record::new(&schema);
        rec.set_records("items", vec![a, b]).unwrap();

        let bytes = encode_record(&rec, Options::empty()).unwrap();
        let back = decode_record(&bytes, &schema, Options::empty()).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn float_field_narrows_and_widens() {
        let schema = CompiledSchema::builder("F")
            .field(FieldDef::new("ratio", FieldKind::Float).tag(0))
            .build()
            .unwrap();
        let mut rec = Record::new(&schema);
        rec.set("ratio", 2i64).unwrap(); // integral widening
        let bytes = encode_record(&rec, Options::empty()).unwrap();
        assert_eq!(bytes[0], 0x04); // Float head at tag 0
        let back = decode_record(&bytes, &schema, Options::empty()).unwrap();
        assert_eq!(back.value("ratio").unwrap().as_double(), Some(2.0));
    }
}
