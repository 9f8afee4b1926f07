//! UBJSON decoding for `.ubj` model members.
//!
//! Implements the UBJSON draft-12 value grammar, including the optimized
//! container forms (`$` type marker, `#` count marker) that xgboost uses
//! for its numeric node arrays. Output is a `serde_json::Value` so the
//! same document parser handles both serializations.

use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UbjsonError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    #[error("unknown type marker 0x{marker:02x} at byte {at}")]
    UnknownMarker { marker: u8, at: usize },

    #[error("invalid length at byte {0}")]
    InvalidLength(usize),

    #[error("invalid UTF-8 in string at byte {0}")]
    InvalidUtf8(usize),

    #[error("container nesting exceeds limit")]
    TooDeep,

    #[error("trailing bytes after document at byte {0}")]
    TrailingBytes(usize),
}

const MAX_DEPTH: usize = 128;

/// Decode a complete UBJSON document.
pub fn decode(bytes: &[u8]) -> Result<Value, UbjsonError> {
    let mut decoder = Decoder { bytes, pos: 0 };
    let marker = decoder.marker()?;
    let value = decoder.value(marker, 0)?;
    if decoder.pos != bytes.len() {
        return Err(UbjsonError::TrailingBytes(decoder.pos));
    }
    Ok(value)
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn byte(&mut self) -> Result<u8, UbjsonError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(UbjsonError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], UbjsonError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(UbjsonError::UnexpectedEof(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Next type marker, skipping no-ops.
    fn marker(&mut self) -> Result<u8, UbjsonError> {
        loop {
            let b = self.byte()?;
            if b != b'N' {
                return Ok(b);
            }
        }
    }

    fn value(&mut self, marker: u8, depth: usize) -> Result<Value, UbjsonError> {
        if depth > MAX_DEPTH {
            return Err(UbjsonError::TooDeep);
        }
        match marker {
            b'Z' => Ok(Value::Null),
            b'T' => Ok(Value::Bool(true)),
            b'F' => Ok(Value::Bool(false)),
            b'i' => Ok(Value::from(self.byte()? as i8)),
            b'U' => Ok(Value::from(self.byte()?)),
            b'I' => Ok(Value::from(i16::from_be_bytes(
                self.take(2)?.try_into().unwrap(),
            ))),
            b'l' => Ok(Value::from(i32::from_be_bytes(
                self.take(4)?.try_into().unwrap(),
            ))),
            b'L' => Ok(Value::from(i64::from_be_bytes(
                self.take(8)?.try_into().unwrap(),
            ))),
            b'd' => Ok(float_value(
                f32::from_be_bytes(self.take(4)?.try_into().unwrap()) as f64,
            )),
            b'D' => Ok(float_value(f64::from_be_bytes(
                self.take(8)?.try_into().unwrap(),
            ))),
            b'C' => Ok(Value::String((self.byte()? as char).to_string())),
            b'S' | b'H' => self.string().map(Value::String),
            b'[' => self.array(depth),
            b'{' => self.object(depth),
            other => Err(UbjsonError::UnknownMarker {
                marker: other,
                at: self.pos.saturating_sub(1),
            }),
        }
    }

    /// Integer value used for lengths and counts.
    fn length(&mut self) -> Result<usize, UbjsonError> {
        let at = self.pos;
        let marker = self.marker()?;
        let n: i64 = match marker {
            b'i' => self.byte()? as i8 as i64,
            b'U' => self.byte()? as i64,
            b'I' => i16::from_be_bytes(self.take(2)?.try_into().unwrap()) as i64,
            b'l' => i32::from_be_bytes(self.take(4)?.try_into().unwrap()) as i64,
            b'L' => i64::from_be_bytes(self.take(8)?.try_into().unwrap()),
            _ => return Err(UbjsonError::InvalidLength(at)),
        };
        usize::try_from(n).map_err(|_| UbjsonError::InvalidLength(at))
    }

    fn string(&mut self) -> Result<String, UbjsonError> {
        let at = self.pos;
        let len = self.length()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| UbjsonError::InvalidUtf8(at))
    }

    /// Optional `$`/`#` container header: (element type, count).
    fn container_header(&mut self) -> Result<(Option<u8>, Option<usize>), UbjsonError> {
        let mut element_type = None;
        if self.peek() == Some(b'$') {
            self.byte()?;
            element_type = Some(self.byte()?);
        }
        let mut count = None;
        if self.peek() == Some(b'#') {
            self.byte()?;
            count = Some(self.length()?);
        } else if element_type.is_some() {
            // A typed container without a count is not representable.
            return Err(UbjsonError::InvalidLength(self.pos));
        }
        Ok((element_type, count))
    }

    fn array(&mut self, depth: usize) -> Result<Value, UbjsonError> {
        let (element_type, count) = self.container_header()?;
        let mut items = Vec::with_capacity(count.unwrap_or(0).min(1 << 16));

        match (element_type, count) {
            (Some(t), Some(n)) => {
                for _ in 0..n {
                    items.push(self.value(t, depth + 1)?);
                }
            }
            (None, Some(n)) => {
                for _ in 0..n {
                    let marker = self.marker()?;
                    items.push(self.value(marker, depth + 1)?);
                }
            }
            (None, None) => loop {
                let marker = self.marker()?;
                if marker == b']' {
                    break;
                }
                items.push(self.value(marker, depth + 1)?);
            },
            (Some(_), None) => unreachable!("header rejects type without count"),
        }
        Ok(Value::Array(items))
    }

    fn object(&mut self, depth: usize) -> Result<Value, UbjsonError> {
        let (element_type, count) = self.container_header()?;
        let mut map = Map::new();

        match count {
            Some(n) => {
                for _ in 0..n {
                    let key = self.string()?;
                    let marker = match element_type {
                        Some(t) => t,
                        None => self.marker()?,
                    };
                    map.insert(key, self.value(marker, depth + 1)?);
                }
            }
            None => loop {
                let marker = self.marker()?;
                if marker == b'}' {
                    break;
                }
                // The marker we just read is the first byte of the key length.
                self.pos -= 1;
                let key = self.string()?;
                let value_marker = self.marker()?;
                map.insert(key, self.value(value_marker, depth + 1)?);
            },
        }
        Ok(Value::Object(map))
    }
}

/// JSON numbers cannot carry NaN/Inf; those decode as null and surface as
/// a document-shape error downstream.
fn float_value(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None => Value::Null,
    }
}
