//! Option flags shared by the encoder, the decoders and the framer.

bitflags! {
    /// Bit-flag word controlling encode and decode behavior.
    ///
    /// Flags compose with `|`; components ignore the flags that do not
    /// concern them (the wire reader, for example, only looks at
    /// `LITTLE_ENDIAN`, `ZERO_COPY` and `NO_FLOAT_HEURISTIC`).
    pub struct Options: u32 {
        /// Read/write integers and floats little-endian. The `String4`
        /// length field and frame length headers have their own fixed
        /// endian rules and are unaffected.
        const LITTLE_ENDIAN      = 0x0001;
        /// Enforce key-tag 0 / value-tag 1 inside Map pairs; without it,
        /// pairs from tolerant senders are accepted whatever their tags.
        const STRICT_MAP         = 0x0002;
        /// Schema encode: write unset optional fields as their kind's
        /// zero/empty value instead of omitting them.
        const SERIALIZE_NONE     = 0x0004;
        /// Generic decode: return byte and string runs borrowed from the
        /// input buffer where possible.
        const ZERO_COPY          = 0x0010;
        /// Schema encode: skip fields whose value equals the declared
        /// default.
        const OMIT_DEFAULT       = 0x0020;
        /// Schema encode: skip fields that were never assigned on the
        /// record.
        const EXCLUDE_UNSET      = 0x0040;
        /// Disable the float endian-rescue heuristic for interop with
        /// strict big-endian producers.
        const NO_FLOAT_HEURISTIC = 0x0080;
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::empty()
    }
}

/// How the generic decoder post-processes byte runs before returning the
/// tree to the caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BytesMode {
    /// Leave byte runs untouched.
    Raw,
    /// Attempt UTF-8 decoding; keep the bytes on failure.
    String,
    /// Attempt UTF-8 decoding of printable text, then probe the bytes as
    /// a nested JCE payload, then fall back to raw bytes.
    Auto,
}

impl Default for BytesMode {
    fn default() -> Self {
        BytesMode::Auto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose() {
        let opts = Options::LITTLE_ENDIAN | Options::ZERO_COPY;
        assert!(opts.contains(Options::LITTLE_ENDIAN));
        assert!(!opts.contains(Options::STRICT_MAP));
        assert_eq!(Options::default(), Options::empty());
    }
}
