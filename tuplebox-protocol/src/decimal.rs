//! Arbitrary-precision decimal carried in the MP_DECIMAL ext type.
//!
//! Ext payload layout: a MessagePack integer scale, followed by the digits
//! in packed BCD. The final nibble is the sign (0x0c/0x0d in the packed
//! decimal convention; 0x0b and 0x0d mean negative).

use crate::error::MapperError;
use std::fmt;
use std::io::Cursor;

/// Ext type tag for decimals.
pub const EXT_DECIMAL: i8 = 1;

/// Ext type tag for UUIDs (16-byte binary payload).
pub const EXT_UUID: i8 = 2;

const SIGN_PLUS: u8 = 0x0c;
const SIGN_MINUS: u8 = 0x0d;

/// A decimal number: digits, a sign, and a scale counting fractional digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    negative: bool,
    scale: i64,
    /// Decimal digits, most significant first; never empty, no redundant
    /// leading zeros.
    digits: Vec<u8>,
}

impl Decimal {
    pub fn new(negative: bool, scale: i64, digits: Vec<u8>) -> Result<Self, MapperError> {
        if digits.is_empty() || digits.iter().any(|d| *d > 9) {
            return Err(MapperError::InvalidExt {
                kind: "decimal",
                reason: "digits must be non-empty decimal digits",
            });
        }
        Ok(Self {
            negative,
            scale,
            digits: trim_leading_zeros(digits),
        })
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn scale(&self) -> i64 {
        self.scale
    }

    pub fn digits(&self) -> &[u8] {
        &self.digits
    }

    /// Parses the payload of an MP_DECIMAL ext value.
    pub fn from_ext_bytes(data: &[u8]) -> Result<Self, MapperError> {
        let mut cursor = Cursor::new(data);
        let scale: i64 =
            rmp::decode::read_int(&mut cursor).map_err(|_| MapperError::InvalidExt {
                kind: "decimal",
                reason: "missing or malformed scale",
            })?;

        let bcd = &data[cursor.position() as usize..];
        if bcd.is_empty() {
            return Err(MapperError::InvalidExt {
                kind: "decimal",
                reason: "missing BCD digits",
            });
        }

        let mut nibbles = Vec::with_capacity(bcd.len() * 2);
        for byte in bcd {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0f);
        }
        let sign = match nibbles.pop() {
            Some(nibble) if nibble > 9 => nibble,
            _ => {
                return Err(MapperError::InvalidExt {
                    kind: "decimal",
                    reason: "missing sign nibble",
                })
            }
        };
        if nibbles.iter().any(|d| *d > 9) {
            return Err(MapperError::InvalidExt {
                kind: "decimal",
                reason: "invalid BCD digit",
            });
        }
        let negative = sign == SIGN_MINUS || sign == 0x0b;
        if nibbles.is_empty() {
            nibbles.push(0);
        }

        Ok(Self {
            negative,
            scale,
            digits: trim_leading_zeros(nibbles),
        })
    }

    /// Serializes into an MP_DECIMAL ext payload.
    pub fn to_ext_bytes(&self) -> Result<Vec<u8>, MapperError> {
        let mut out = Vec::with_capacity(2 + self.digits.len() / 2 + 1);
        rmp::encode::write_sint(&mut out, self.scale).map_err(|_| MapperError::InvalidExt {
            kind: "decimal",
            reason: "failed to encode scale",
        })?;

        let sign = if self.negative { SIGN_MINUS } else { SIGN_PLUS };
        let mut nibbles: Vec<u8> = Vec::with_capacity(self.digits.len() + 2);
        // Pad to an even nibble count, sign included.
        if self.digits.len() % 2 == 0 {
            nibbles.push(0);
        }
        nibbles.extend_from_slice(&self.digits);
        nibbles.push(sign);
        for pair in nibbles.chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
        Ok(out)
    }
}

fn trim_leading_zeros(mut digits: Vec<u8>) -> Vec<u8> {
    let keep = digits.iter().take_while(|d| **d == 0).count();
    let keep = keep.min(digits.len() - 1);
    digits.drain(..keep);
    digits
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        if self.scale <= 0 {
            for d in &self.digits {
                write!(f, "{d}")?;
            }
            for _ in 0..-self.scale {
                write!(f, "0")?;
            }
            return Ok(());
        }

        let scale = self.scale as usize;
        if scale >= self.digits.len() {
            write!(f, "0.")?;
            for _ in 0..scale - self.digits.len() {
                write!(f, "0")?;
            }
            for d in &self.digits {
                write!(f, "{d}")?;
            }
        } else {
            let split = self.digits.len() - scale;
            for d in &self.digits[..split] {
                write!(f, "{d}")?;
            }
            write!(f, ".")?;
            for d in &self.digits[split..] {
                write!(f, "{d}")?;
            }
        }
        Ok(())
    }
}
