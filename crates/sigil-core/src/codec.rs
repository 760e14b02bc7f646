//! Canonical claim-set encoding and decoding.
//!
//! Signatures are computed over the bytes this module produces, so the
//! encoding must be deterministic: equal claim sets always encode to
//! identical bytes. This is a small closed grammar, not a general JSON
//! parser — the ambiguity sources general parsers tolerate (flexible
//! whitespace, duplicate keys, alternative escapes, number formats) are
//! hard errors here, in both directions.
//!
//! # Canonical form
//!
//! - Top level is an object; keys in byte-lexicographic order, no
//!   whitespace anywhere.
//! - Strings escape `"` and `\` with a backslash and control bytes below
//!   0x20 as `\u00xx` (lowercase hex). Nothing else is ever escaped.
//! - Integers are minimal signed decimal: no leading zeros, no `-0`, no
//!   fractions, no exponents.
//! - Booleans are `true`/`false`. There is no null and no float.
//!
//! The decoder rejects anything outside this form, so
//! `decode(encode(c)) == c` and `encode(decode(b)) == b` for all valid
//! inputs.
//!
//! # Resource bounds
//!
//! Decoding untrusted bytes is bounded by [`CodecLimits`]: maximum input
//! size and maximum nesting depth. Exceeding either is a decode error,
//! not an allocation.

use crate::claims::{ClaimSet, ClaimValue};

/// Default maximum nesting depth for decoded claim sets.
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Default maximum input size in bytes for decoded claim sets.
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024;

/// Resource bounds applied when decoding untrusted bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLimits {
    /// Maximum nesting depth (objects and arrays combined).
    pub max_depth: usize,
    /// Maximum input length in bytes.
    pub max_bytes: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Errors produced when decoding canonical claim bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The input exceeds the configured size bound.
    #[error("input exceeds {limit} bytes")]
    InputTooLarge {
        /// The configured maximum input size.
        limit: usize,
    },

    /// Nesting exceeds the configured depth bound.
    #[error("nesting exceeds depth {limit}")]
    DepthExceeded {
        /// The configured maximum depth.
        limit: usize,
    },

    /// The input ended before the value was complete.
    #[error("unexpected end of input")]
    UnexpectedEnd,

    /// A byte that the canonical grammar does not allow at this position.
    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    UnexpectedByte {
        /// The offending byte.
        byte: u8,
        /// Byte offset into the input.
        offset: usize,
    },

    /// An object contains the same key twice.
    #[error("duplicate key '{key}'")]
    DuplicateKey {
        /// The duplicated key.
        key: String,
    },

    /// Object keys are not in canonical byte order.
    #[error("key '{key}' out of canonical order")]
    UnsortedKeys {
        /// The key that broke the ordering.
        key: String,
    },

    /// A number is not in minimal canonical form (leading zero or `-0`).
    #[error("non-canonical integer at offset {offset}")]
    NonCanonicalInteger {
        /// Byte offset into the input.
        offset: usize,
    },

    /// An integer does not fit in 64 bits.
    #[error("integer out of range at offset {offset}")]
    IntegerOverflow {
        /// Byte offset into the input.
        offset: usize,
    },

    /// A string escape outside the canonical set.
    #[error("invalid escape at offset {offset}")]
    InvalidEscape {
        /// Byte offset into the input.
        offset: usize,
    },

    /// A string is not valid UTF-8.
    #[error("invalid utf-8 at offset {offset}")]
    InvalidUtf8 {
        /// Byte offset into the input.
        offset: usize,
    },

    /// Bytes remain after the top-level object closed.
    #[error("trailing data at offset {offset}")]
    TrailingData {
        /// Byte offset of the first trailing byte.
        offset: usize,
    },
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a claim set to its canonical byte form.
///
/// Equal claim sets always produce identical bytes; this is the byte
/// sequence signatures are computed over.
#[must_use]
pub fn encode(claims: &ClaimSet) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_object(&mut out, claims);
    out
}

fn write_object(out: &mut Vec<u8>, claims: &ClaimSet) {
    out.push(b'{');
    let mut first = true;
    for (name, value) in claims.iter() {
        if !first {
            out.push(b',');
        }
        first = false;
        write_string(out, name);
        out.push(b':');
        write_value(out, value);
    }
    out.push(b'}');
}

fn write_value(out: &mut Vec<u8>, value: &ClaimValue) {
    match value {
        ClaimValue::String(s) => write_string(out, s),
        ClaimValue::Integer(n) => out.extend_from_slice(n.to_string().as_bytes()),
        ClaimValue::Boolean(true) => out.extend_from_slice(b"true"),
        ClaimValue::Boolean(false) => out.extend_from_slice(b"false"),
        ClaimValue::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item);
            }
            out.push(b']');
        }
        ClaimValue::Object(set) => write_object(out, set),
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for byte in s.bytes() {
        match byte {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            0x00..=0x1f => {
                out.extend_from_slice(format!("\\u{byte:04x}").as_bytes());
            }
            _ => out.push(byte),
        }
    }
    out.push(b'"');
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes canonical claim bytes with the default [`CodecLimits`].
///
/// # Errors
///
/// Returns a [`CodecError`] on any deviation from canonical form.
pub fn decode(bytes: &[u8]) -> Result<ClaimSet, CodecError> {
    decode_with_limits(bytes, &CodecLimits::default())
}

/// Decodes canonical claim bytes under explicit resource bounds.
///
/// # Errors
///
/// Returns a [`CodecError`] on any deviation from canonical form or when
/// a bound is exceeded.
pub fn decode_with_limits(bytes: &[u8], limits: &CodecLimits) -> Result<ClaimSet, CodecError> {
    if bytes.len() > limits.max_bytes {
        return Err(CodecError::InputTooLarge {
            limit: limits.max_bytes,
        });
    }
    let mut decoder = Decoder {
        bytes,
        pos: 0,
        limits,
    };
    let claims = decoder.parse_object(0)?;
    if decoder.pos != bytes.len() {
        return Err(CodecError::TrailingData { offset: decoder.pos });
    }
    Ok(claims)
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    limits: &'a CodecLimits,
}

impl Decoder<'_> {
    fn peek(&self) -> Result<u8, CodecError> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or(CodecError::UnexpectedEnd)
    }

    fn bump(&mut self) -> Result<u8, CodecError> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn expect(&mut self, expected: u8) -> Result<(), CodecError> {
        let offset = self.pos;
        let byte = self.bump()?;
        if byte == expected {
            Ok(())
        } else {
            Err(CodecError::UnexpectedByte { byte, offset })
        }
    }

    fn parse_object(&mut self, depth: usize) -> Result<ClaimSet, CodecError> {
        if depth >= self.limits.max_depth {
            return Err(CodecError::DepthExceeded {
                limit: self.limits.max_depth,
            });
        }
        self.expect(b'{')?;

        let mut claims = ClaimSet::new();
        if self.peek()? == b'}' {
            self.pos += 1;
            return Ok(claims);
        }

        let mut last_key: Option<String> = None;
        loop {
            let key = self.parse_string()?;
            if let Some(previous) = &last_key {
                // Strictly ascending keys: equal is a duplicate, smaller
                // breaks canonical order.
                if key == *previous {
                    return Err(CodecError::DuplicateKey { key });
                }
                if key.as_bytes() < previous.as_bytes() {
                    return Err(CodecError::UnsortedKeys { key });
                }
            }
            self.expect(b':')?;
            let value = self.parse_value(depth)?;
            claims.insert(key.clone(), value);
            last_key = Some(key);

            match self.bump()? {
                b',' => {}
                b'}' => return Ok(claims),
                byte => {
                    return Err(CodecError::UnexpectedByte {
                        byte,
                        offset: self.pos - 1,
                    });
                }
            }
        }
    }

    /// `depth` is the nesting depth of the container this value sits in;
    /// a value opening a new container parses it at `depth + 1`.
    fn parse_value(&mut self, depth: usize) -> Result<ClaimValue, CodecError> {
        match self.peek()? {
            b'"' => Ok(ClaimValue::String(self.parse_string()?)),
            b'{' => Ok(ClaimValue::Object(self.parse_object(depth + 1)?)),
            b'[' => self.parse_array(depth + 1),
            b't' | b'f' => self.parse_boolean(),
            b'-' | b'0'..=b'9' => self.parse_integer(),
            byte => Err(CodecError::UnexpectedByte {
                byte,
                offset: self.pos,
            }),
        }
    }

    fn parse_array(&mut self, depth: usize) -> Result<ClaimValue, CodecError> {
        if depth >= self.limits.max_depth {
            return Err(CodecError::DepthExceeded {
                limit: self.limits.max_depth,
            });
        }
        self.expect(b'[')?;

        let mut items = Vec::new();
        if self.peek()? == b']' {
            self.pos += 1;
            return Ok(ClaimValue::Array(items));
        }
        loop {
            items.push(self.parse_value(depth)?);
            match self.bump()? {
                b',' => {}
                b']' => return Ok(ClaimValue::Array(items)),
                byte => {
                    return Err(CodecError::UnexpectedByte {
                        byte,
                        offset: self.pos - 1,
                    });
                }
            }
        }
    }

    fn parse_boolean(&mut self) -> Result<ClaimValue, CodecError> {
        let literal: (&[u8], bool) = if self.peek()? == b't' {
            (b"true", true)
        } else {
            (b"false", false)
        };
        for &expected in literal.0 {
            self.expect(expected)?;
        }
        Ok(ClaimValue::Boolean(literal.1))
    }

    fn parse_integer(&mut self) -> Result<ClaimValue, CodecError> {
        let start = self.pos;
        let negative = self.peek()? == b'-';
        if negative {
            self.pos += 1;
        }

        let digits_start = self.pos;
        while matches!(self.bytes.get(self.pos), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        let digits = &self.bytes[digits_start..self.pos];
        if digits.is_empty() {
            return match self.bytes.get(self.pos) {
                Some(&byte) => Err(CodecError::UnexpectedByte {
                    byte,
                    offset: self.pos,
                }),
                None => Err(CodecError::UnexpectedEnd),
            };
        }
        // Minimal form: no leading zeros, and zero is never signed.
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(CodecError::NonCanonicalInteger { offset: start });
        }
        if negative && digits == b"0" {
            return Err(CodecError::NonCanonicalInteger { offset: start });
        }

        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .expect("digit bytes are always valid utf-8");
        let value: i64 = text
            .parse()
            .map_err(|_| CodecError::IntegerOverflow { offset: start })?;
        Ok(ClaimValue::Integer(value))
    }

    fn parse_string(&mut self) -> Result<String, CodecError> {
        let start = self.pos;
        self.expect(b'"')?;
        let mut raw = Vec::new();
        loop {
            let offset = self.pos;
            match self.bump()? {
                b'"' => break,
                b'\\' => match self.bump()? {
                    b'"' => raw.push(b'"'),
                    b'\\' => raw.push(b'\\'),
                    b'u' => raw.push(self.parse_control_escape(offset)?),
                    _ => return Err(CodecError::InvalidEscape { offset }),
                },
                // Control bytes must always travel escaped.
                byte @ 0x00..=0x1f => {
                    return Err(CodecError::UnexpectedByte { byte, offset });
                }
                byte => raw.push(byte),
            }
        }
        String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8 { offset: start })
    }

    /// Parses the `00xx` tail of a `\u00xx` escape. Only control bytes
    /// below 0x20 in lowercase hex are canonical; everything else travels
    /// unescaped.
    fn parse_control_escape(&mut self, escape_offset: usize) -> Result<u8, CodecError> {
        let mut value: u32 = 0;
        for _ in 0..4 {
            let byte = self.bump()?;
            let digit = match byte {
                b'0'..=b'9' => u32::from(byte - b'0'),
                b'a'..=b'f' => u32::from(byte - b'a') + 10,
                // Uppercase hex is valid JSON but not canonical.
                _ => {
                    return Err(CodecError::InvalidEscape {
                        offset: escape_offset,
                    });
                }
            };
            value = value * 16 + digit;
        }
        if value >= 0x20 {
            return Err(CodecError::InvalidEscape {
                offset: escape_offset,
            });
        }
        Ok(value as u8)
    }
}

// ============================================================================
// Tests
// ============================================================================
