//! Error types raised by the codec and the framing layer.

use failure::Fail;
use std::fmt;
use std::io;

/// One step in the location trail of a decode failure.
///
/// The schema decoder prepends the field name (and, inside containers, the
/// element index) as an error bubbles out, so the caller sees where in a
/// nested structure the input went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locus {
    /// A named schema field.
    Field(String),
    /// An index into a list value.
    Index(usize),
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Locus::Field(ref name) => f.write_str(name),
            Locus::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Generic error used by the library.
#[derive(Debug)]
pub enum Error {
    /// A value cannot be serialized: type mismatch against a schema, a
    /// string too long for its length field, or a packet too large for the
    /// configured frame header.
    Encode(String),
    /// Malformed input: unknown type id, invalid head, negative or
    /// oversized length, recursion limit, or a field that failed to
    /// materialize as its declared type.
    Decode {
        /// What went wrong.
        msg: String,
        /// Path to the offending field, outermost first.
        loc: Vec<Locus>,
    },
    /// The buffer ended in the middle of a value. A kind of decode error,
    /// but distinguished so that stream consumers can treat it as "feed me
    /// more bytes" rather than as corruption.
    PartialData(String),
    /// A schema-declared constraint failed after the wire value was
    /// materialized.
    Validation {
        /// Field whose constraint failed.
        field: String,
        /// Constraint description.
        msg: String,
    },
    /// The framer's ingest buffer would exceed its configured maximum.
    BufferOverflow {
        /// Size the buffer would have grown to.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

impl Error {
    pub(crate) fn encode<S: Into<String>>(msg: S) -> Self {
        Error::Encode(msg.into())
    }

    pub(crate) fn decode<S: Into<String>>(msg: S) -> Self {
        Error::Decode {
            msg: msg.into(),
            loc: Vec::new(),
        }
    }

    pub(crate) fn partial<S: Into<String>>(msg: S) -> Self {
        Error::PartialData(msg.into())
    }

    pub(crate) fn validation<S: Into<String>>(field: &str, msg: S) -> Self {
        Error::Validation {
            field: field.to_string(),
            msg: msg.into(),
        }
    }

    /// Returns `true` for malformed-input errors, including `PartialData`.
    pub fn is_decode(&self) -> bool {
        match *self {
            Error::Decode { .. } | Error::PartialData(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if the input merely ended too early.
    pub fn is_partial(&self) -> bool {
        match *self {
            Error::PartialData(_) => true,
            _ => false,
        }
    }

    /// The location trail of a decode error, outermost field first.
    pub fn location(&self) -> &[Locus] {
        match *self {
            Error::Decode { ref loc, .. } => loc,
            _ => &[],
        }
    }

    /// Prepends a field name to the location trail of a decode error.
    /// Other error kinds pass through unchanged.
    pub(crate) fn in_field(self, name: &str) -> Self {
        self.at(Locus::Field(name.to_string()))
    }

    /// Prepends an element index to the location trail of a decode error.
    pub(crate) fn at_index(self, index: usize) -> Self {
        self.at(Locus::Index(index))
    }

    fn at(self, locus: Locus) -> Self {
        match self {
            Error::Decode { msg, mut loc } => {
                loc.insert(0, locus);
                Error::Decode { msg, loc }
            }
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Encode(ref msg) => write!(f, "encode error: {}", msg),
            Error::Decode { ref msg, ref loc } => {
                write!(f, "decode error: {}", msg)?;
                if !loc.is_empty() {
                    let path = loc
                        .iter()
                        .map(|l| l.to_string())
                        .collect::<Vec<_>>()
                        .join(".");
                    write!(f, " (at {})", path)?;
                }
                Ok(())
            }
            Error::PartialData(ref msg) => write!(f, "partial data: {}", msg),
            Error::Validation { ref field, ref msg } => {
                write!(f, "validation failed for field `{}`: {}", field, msg)
            }
            Error::BufferOverflow { size, max } => write!(
                f,
                "stream buffer overflow: {} bytes exceeds maximum of {}",
                size, max
            ),
        }
    }
}

impl Fail for Error {}

/// Required by the codec traits of `tokio-codec`; also maps unexpected EOF
/// onto `PartialData` so stream adapters see the same taxonomy.
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::partial(err.to_string())
        } else {
            Error::decode(err.to_string())
        }
    }
}
