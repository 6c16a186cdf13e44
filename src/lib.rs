//! Implementation of the JCE/Tars tag-typed binary serialization protocol.
//!
//! The protocol encodes every value behind a small *head* (a 4-bit type id
//! plus a field tag), which makes payloads self-describing: they can be
//! decoded without a schema into a [`TagDict`] tree, or against a
//! [`CompiledSchema`] directly into a typed [`Record`]. A length-prefixed
//! framer ([`stream`]) carries encoded messages over boundary-less byte
//! streams.
//!
//! Quick tour:
//!
//! ```
//! use jce_proto::{decode_generic, encode, Options, TagDict, Value};
//!
//! let mut dict = TagDict::new();
//! dict.insert(0, Value::Int(100));
//! let bytes = encode(&Value::Struct(dict), Options::empty()).unwrap();
//! assert_eq!(bytes, [0x00, 0x64]);
//!
//! let back = decode_generic(&bytes, Options::empty()).unwrap();
//! assert_eq!(back.get(0).unwrap().as_int(), Some(100));
//! ```

#![warn(missing_debug_implementations)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate num_derive;
#[macro_use]
extern crate bitflags;
extern crate byteorder;
extern crate bytes;
extern crate failure;
extern crate num_traits;
extern crate regex;
extern crate tokio_codec;

pub mod decode;
pub mod encode;
pub mod error;
pub mod options;
pub mod schema;
pub mod stream;
pub mod value;
pub mod wire;

pub use decode::{decode_generic, decode_generic_with_mode, decode_record, decode_record_with};
pub use decode::{GenericDecoder, SchemaDecoder};
pub use encode::{encode, encode_record, encode_record_with, Encoder};
pub use error::{Error, Locus};
pub use options::{BytesMode, Options};
pub use schema::{
    CompiledSchema, Context, FieldDef, FieldKind, FieldValue, HookInfo, Record, SchemaBuilder,
    Validator,
};
pub use stream::{
    DecodeTarget, FrameCodec, FrameConfig, FrameItem, FrameReader, FrameWriter, LengthType,
};
pub use value::{TagDict, Value};
