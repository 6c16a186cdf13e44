//! Schema compilation: turning field declarations into the frozen,
//! tag-sorted descriptor tables the schema codec paths dispatch on.
//!
//! A [`CompiledSchema`] is built once per user type and shared (it is
//! immutable behind an `Arc`) by every encode and decode of that type.
//! [`Record`] is the materialized form of one schema instance: the output
//! of a schema decode and the input of a schema encode.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use error::Error;
use options::Options;
use value::Value;

/// User-supplied key/value state passed through to field hooks.
pub type Context = HashMap<String, Value<'static>>;

/// Per-field call information handed to serialize/deserialize hooks.
#[derive(Debug)]
pub struct HookInfo<'a> {
    pub options: Options,
    pub context: &'a Context,
    pub field: &'a str,
    pub tag: u8,
}

/// Rewrites a field value just before it is written to the wire.
pub type SerializeHook = fn(Value<'static>, &HookInfo) -> Result<Value<'static>, Error>;

/// Rewrites a field value just after it was read from the wire, before
/// validators run.
pub type DeserializeHook = fn(Value<'static>, &HookInfo) -> Result<Value<'static>, Error>;

/// Produces a fresh default value per record, for defaults that should not
/// be shared (eg. growable containers).
pub type DefaultFactory = fn() -> Value<'static>;

/// The declared logical type of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Any integer width; booleans are declared as `Int` too.
    Int,
    /// 4-byte IEEE-754 on the wire; materialized as `f64`.
    Float,
    /// 8-byte IEEE-754.
    Double,
    /// UTF-8 text (`String1`/`String4` on the wire).
    Str,
    /// A raw byte blob (`SimpleList` on the wire).
    Bytes,
    /// A list with a declared element type.
    List(Box<FieldKind>),
    /// A map with declared key and value types.
    Map(Box<FieldKind>, Box<FieldKind>),
    /// A nested user type with its own schema.
    Struct(Arc<CompiledSchema>),
    /// No declared shape; the field decodes generically.
    Any,
}

impl FieldKind {
    pub fn kind_name(&self) -> &'static str {
        match *self {
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Double => "double",
            FieldKind::Str => "string",
            FieldKind::Bytes => "bytes",
            FieldKind::List(_) => "list",
            FieldKind::Map(..) => "map",
            FieldKind::Struct(_) => "struct",
            FieldKind::Any => "any",
        }
    }
}

/// Constraints checked after a field value is materialized.
///
/// Numeric bounds apply to `Int` and `Float`/`Double` values, length
/// bounds to strings (in characters), bytes and lists, and the pattern to
/// strings. Patterns are compiled once, at schema build time.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    gt: Option<f64>,
    ge: Option<f64>,
    lt: Option<f64>,
    le: Option<f64>,
    min_len: Option<usize>,
    max_len: Option<usize>,
    pattern: Option<Regex>,
}

impl Validator {
    pub fn new() -> Self {
        Validator::default()
    }

    pub fn gt(mut self, bound: f64) -> Self {
        self.gt = Some(bound);
        self
    }

    pub fn ge(mut self, bound: f64) -> Self {
        self.ge = Some(bound);
        self
    }

    pub fn lt(mut self, bound: f64) -> Self {
        self.lt = Some(bound);
        self
    }

    pub fn le(mut self, bound: f64) -> Self {
        self.le = Some(bound);
        self
    }

    pub fn min_len(mut self, len: usize) -> Self {
        self.min_len = Some(len);
        self
    }

    pub fn max_len(mut self, len: usize) -> Self {
        self.max_len = Some(len);
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Result<Self, Error> {
        let re = Regex::new(pattern)
            .map_err(|e| Error::encode(format!("invalid field pattern: {}", e)))?;
        self.pattern = Some(re);
        Ok(self)
    }

    fn check_number(&self, field: &str, n: f64) -> Result<(), Error> {
        if let Some(bound) = self.gt {
            if !(n > bound) {
                return Err(Error::validation(field, format!("{} is not > {}", n, bound)));
            }
        }
        if let Some(bound) = self.ge {
            if !(n >= bound) {
                return Err(Error::validation(field, format!("{} is not >= {}", n, bound)));
            }
        }
        if let Some(bound) = self.lt {
            if !(n < bound) {
                return Err(Error::validation(field, format!("{} is not < {}", n, bound)));
            }
        }
        if let Some(bound) = self.le {
            if !(n <= bound) {
                return Err(Error::validation(field, format!("{} is not <= {}", n, bound)));
            }
        }
        Ok(())
    }

    fn check_len(&self, field: &str, len: usize) -> Result<(), Error> {
        if let Some(min) = self.min_len {
            if len < min {
                return Err(Error::validation(
                    field,
                    format!("length {} is below minimum {}", len, min),
                ));
            }
        }
        if let Some(max) = self.max_len {
            if len > max {
                return Err(Error::validation(
                    field,
                    format!("length {} exceeds maximum {}", len, max),
                ));
            }
        }
        Ok(())
    }

    /// Checks `value` against every declared constraint.
    pub fn check(&self, field: &str, value: &Value) -> Result<(), Error> {
        match *value {
            Value::Int(v) => self.check_number(field, v as f64)?,
            Value::Double(v) => self.check_number(field, v)?,
            Value::String(ref s) => {
                self.check_len(field, s.chars().count())?;
                if let Some(ref re) = self.pattern {
                    if !re.is_match(s) {
                        return Err(Error::validation(
                            field,
                            format!("value does not match pattern `{}`", re.as_str()),
                        ));
                    }
                }
            }
            Value::Bytes(ref b) => self.check_len(field, b.len())?,
            Value::List(ref items) => self.check_len(field, items.len())?,
            _ => {}
        }
        Ok(())
    }
}

/// A single field declaration, consumed by [`SchemaBuilder`].
#[derive(Debug, Clone)]
pub struct FieldDef {
    name: &'static str,
    tag: Option<u8>,
    kind: FieldKind,
    optional: bool,
    default: Option<Value<'static>>,
    default_factory: Option<DefaultFactory>,
    validator: Option<Validator>,
    serialize_with: Option<SerializeHook>,
    deserialize_with: Option<DeserializeHook>,
}

impl FieldDef {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        FieldDef {
            name,
            tag: None,
            kind,
            optional: false,
            default: None,
            default_factory: None,
            validator: None,
            serialize_with: None,
            deserialize_with: None,
        }
    }

    /// Declares the wire tag explicitly. Fields without an explicit tag
    /// are numbered sequentially from 0; mixing both styles in one schema
    /// is rejected by the builder.
    pub fn tag(mut self, tag: u8) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Marks the field as optional: it may be absent on decode and unset
    /// on encode.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Declares a static default, used when the field is absent on decode.
    pub fn default_value<V: Into<Value<'static>>>(mut self, v: V) -> Self {
        self.default = Some(v.into());
        self
    }

    /// Declares a default produced afresh per record.
    pub fn default_factory(mut self, factory: DefaultFactory) -> Self {
        self.default_factory = Some(factory);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn serialize_with(mut self, hook: SerializeHook) -> Self {
        self.serialize_with = Some(hook);
        self
    }

    pub fn deserialize_with(mut self, hook: DeserializeHook) -> Self {
        self.deserialize_with = Some(hook);
        self
    }
}

/// A compiled field: what the codec paths actually dispatch on.
#[derive(Debug)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub tag: u8,
    pub kind: FieldKind,
    pub optional: bool,
    pub default: Option<Value<'static>>,
    pub default_factory: Option<DefaultFactory>,
    pub validator: Option<Validator>,
    pub serialize_with: Option<SerializeHook>,
    pub deserialize_with: Option<DeserializeHook>,
}

impl FieldDescriptor {
    /// Whether a decode may leave this field without a value.
    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.default_factory.is_some()
    }

    pub(crate) fn make_default(&self) -> Option<Value<'static>> {
        if let Some(factory) = self.default_factory {
            Some(factory())
        } else {
            self.default.clone()
        }
    }
}

/// Tag lookup strategy, chosen at build time.
#[derive(Debug)]
enum Lookup {
    /// Tags are dense: direct index from tag to field position.
    Dense(Vec<Option<u16>>),
    /// Binary search over the tag-sorted descriptor array.
    Sparse,
}

/// A frozen, tag-sorted descriptor table for one user type.
#[derive(Debug)]
pub struct CompiledSchema {
    name: &'static str,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<&'static str, usize>,
    lookup: Lookup,
}

impl CompiledSchema {
    pub fn builder(name: &'static str) -> SchemaBuilder {
        SchemaBuilder {
            name,
            defs: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Descriptors in ascending tag order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_index_by_tag(&self, tag: u8) -> Option<usize> {
        match self.lookup {
            Lookup::Dense(ref table) => table
                .get(tag as usize)
                .and_then(|slot| slot.map(|i| i as usize)),
            Lookup::Sparse => self
                .fields
                .binary_search_by_key(&tag, |f| f.tag)
                .ok(),
        }
    }

    pub fn field_by_tag(&self, tag: u8) -> Option<&FieldDescriptor> {
        self.field_index_by_tag(tag).map(|i| &self.fields[i])
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).cloned()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_index(name).map(|i| &self.fields[i])
    }
}

/// Collects field declarations and compiles them into a [`CompiledSchema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    name: &'static str,
    defs: Vec<FieldDef>,
}

impl SchemaBuilder {
    pub fn field(mut self, def: FieldDef) -> Self {
        self.defs.push(def);
        self
    }

    /// Validates the declarations, assigns tags, sorts by tag and freezes.
    pub fn build(self) -> Result<Arc<CompiledSchema>, Error> {
        let name = self.name;
        if self.defs.is_empty() {
            return Err(Error::encode(format!("schema `{}` declares no fields", name)));
        }

        let explicit = self.defs.iter().filter(|d| d.tag.is_some()).count();
        if explicit != 0 && explicit != self.defs.len() {
            return Err(Error::encode(format!(
                "schema `{}` mixes explicit and auto-assigned tags",
                name
            )));
        }
        if explicit == 0 && self.defs.len() > 256 {
            return Err(Error::encode(format!(
                "schema `{}` has too many fields for auto-assigned tags",
                name
            )));
        }

        let mut fields = Vec::with_capacity(self.defs.len());
        for (i, def) in self.defs.into_iter().enumerate() {
            if def.default.is_some() && def.default_factory.is_some() {
                return Err(Error::encode(format!(
                    "field `{}.{}` declares both a default and a default factory",
                    name, def.name
                )));
            }
            let tag = match def.tag {
                Some(tag) => tag,
                None => i as u8,
            };
            fields.push(FieldDescriptor {
                name: def.name,
                tag,
                kind: def.kind,
                optional: def.optional,
                default: def.default,
                default_factory: def.default_factory,
                validator: def.validator,
                serialize_with: def.serialize_with,
                deserialize_with: def.deserialize_with,
            });
        }

        fields.sort_by_key(|f| f.tag);
        for pair in fields.windows(2) {
            if pair[0].tag == pair[1].tag {
                return Err(Error::encode(format!(
                    "schema `{}` declares tag {} twice (`{}` and `{}`)",
                    name, pair[0].tag, pair[0].name, pair[1].name
                )));
            }
        }

        let mut by_name = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if by_name.insert(field.name, i).is_some() {
                return Err(Error::encode(format!(
                    "schema `{}` declares field `{}` twice",
                    name, field.name
                )));
            }
        }

        let max_tag = fields.last().map(|f| f.tag).unwrap_or(0) as usize;
        let lookup = if max_tag < fields.len() * 4 || max_tag <= 16 {
            let mut table = vec![None; max_tag + 1];
            for (i, field) in fields.iter().enumerate() {
                table[field.tag as usize] = Some(i as u16);
            }
            Lookup::Dense(table)
        } else {
            Lookup::Sparse
        };

        Ok(Arc::new(CompiledSchema {
            name,
            fields,
            by_name,
            lookup,
        }))
    }
}

/// One materialized field of a [`Record`].
///
/// Nested structs (and lists of them) keep their own records so that
/// their fields stay addressable by name; everything else is a plain
/// [`Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value<'static>),
    Struct(Record),
    StructList(Vec<Record>),
}

impl FieldValue {
    pub fn as_value(&self) -> Option<&Value<'static>> {
        match *self {
            FieldValue::Value(ref v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match *self {
            FieldValue::Struct(ref r) => Some(r),
            _ => None,
        }
    }
}

impl From<Value<'static>> for FieldValue {
    fn from(v: Value<'static>) -> FieldValue {
        FieldValue::Value(v)
    }
}

impl From<Record> for FieldValue {
    fn from(r: Record) -> FieldValue {
        FieldValue::Struct(r)
    }
}

impl From<Vec<Record>> for FieldValue {
    fn from(rs: Vec<Record>) -> FieldValue {
        FieldValue::StructList(rs)
    }
}

/// One instance of a schema: field slots aligned with descriptor order.
///
/// A fresh record starts with declared defaults filled in (factories are
/// invoked per record) and every slot marked unset; `set` assigns a value
/// and marks the slot, which is what `EXCLUDE_UNSET` encoding looks at.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<CompiledSchema>,
    values: Vec<Option<FieldValue>>,
    set: Vec<bool>,
}

impl Record {
    pub fn new(schema: &Arc<CompiledSchema>) -> Record {
        let values = schema
            .fields()
            .iter()
            .map(|f| f.make_default().map(FieldValue::Value))
            .collect();
        Record {
            schema: schema.clone(),
            values,
            set: vec![false; schema.fields().len()],
        }
    }

    pub fn schema(&self) -> &Arc<CompiledSchema> {
        &self.schema
    }

    /// Assigns a plain value to a field by name. Unknown names are an
    /// encode error.
    pub fn set<V: Into<Value<'static>>>(&mut self, name: &str, value: V) -> Result<(), Error> {
        self.set_field(name, FieldValue::Value(value.into()))
    }

    /// Assigns a nested record to a struct field.
    pub fn set_record(&mut self, name: &str, record: Record) -> Result<(), Error> {
        self.set_field(name, FieldValue::Struct(record))
    }

    /// Assigns nested records to a list-of-struct field.
    pub fn set_records(&mut self, name: &str, records: Vec<Record>) -> Result<(), Error> {
        self.set_field(name, FieldValue::StructList(records))
    }

    /// Assigns any field slot form by name.
    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), Error> {
        let index = self.schema.field_index(name).ok_or_else(|| {
            Error::encode(format!(
                "schema `{}` has no field named `{}`",
                self.schema.name(),
                name
            ))
        })?;
        self.values[index] = Some(value);
        self.set[index] = true;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        let index = self.schema.field_index(name)?;
        self.values[index].as_ref()
    }

    /// The plain value of a field, if it holds one.
    pub fn value(&self, name: &str) -> Option<&Value<'static>> {
        self.get(name).and_then(FieldValue::as_value)
    }

    /// The nested record of a struct field, if it holds one.
    pub fn record(&self, name: &str) -> Option<&Record> {
        self.get(name).and_then(FieldValue::as_record)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.schema
            .field_index(name)
            .map_or(false, |i| self.set[i])
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&FieldValue> {
        self.values[index].as_ref()
    }

    pub(crate) fn slot_is_set(&self, index: usize) -> bool {
        self.set[index]
    }

    pub(crate) fn fill_slot(&mut self, index: usize, value: FieldValue) {
        self.values[index] = Some(value);
        self.set[index] = true;
    }
}

/// Record equality compares field values of the same compiled schema;
/// set-markers are bookkeeping and do not participate.
impl PartialEq for Record {
    fn eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema) && self.values == other.values
    }
}
