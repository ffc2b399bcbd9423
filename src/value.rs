//! Wire codec for scalar property values.
//!
//! Every property payload on the wire is a fixed little-endian encoding
//! selected by the datapoint's declared format tag:
//!
//! | format | bytes | encoding |
//! |--------|-------|----------|
//! | BOOL | 1 | 0/1 |
//! | FORMAT / SHORT_ENUM / ERROR | 2 | unsigned short |
//! | INT32 | 4 | signed int |
//! | LONG_ENUM | 4 | unsigned int |
//! | FLOAT | 4 | IEEE754 single |
//! | GUID | 16 | little-endian UUID |
//! | STRING | n | ISO-8859-15 text |

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::error::{XcomError, XcomResult};

/// Format tag of a datapoint, as declared in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XcomFormat {
    Bool,
    Format,
    ShortEnum,
    Error,
    Int32,
    Float,
    LongEnum,
    Guid,
    String,
    Dynamic,
    Bytes,
    /// Menu entry, not a value-carrying datapoint
    Menu,
    /// Catalog entries marked "not supported"
    Invalid,
}

impl FromStr for XcomFormat {
    type Err = XcomError;

    fn from_str(s: &str) -> XcomResult<Self> {
        match s.to_uppercase().as_str() {
            "BOOL" => Ok(XcomFormat::Bool),
            "FORMAT" => Ok(XcomFormat::Format),
            "SHORT_ENUM" | "SHORT ENUM" => Ok(XcomFormat::ShortEnum),
            "ERROR" => Ok(XcomFormat::Error),
            "INT32" => Ok(XcomFormat::Int32),
            "FLOAT" => Ok(XcomFormat::Float),
            "LONG_ENUM" | "LONG ENUM" => Ok(XcomFormat::LongEnum),
            "GUID" => Ok(XcomFormat::Guid),
            "STRING" => Ok(XcomFormat::String),
            "DYNAMIC" => Ok(XcomFormat::Dynamic),
            "BYTES" => Ok(XcomFormat::Bytes),
            "MENU" | "ONLY_LEVEL" | "ONLY LEVEL" => Ok(XcomFormat::Menu),
            "NOT SUPPORTED" => Ok(XcomFormat::Invalid),
            other => Err(XcomError::configuration(format!("Unknown format: '{other}'"))),
        }
    }
}

impl fmt::Display for XcomFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            XcomFormat::Bool => "BOOL",
            XcomFormat::Format => "FORMAT",
            XcomFormat::ShortEnum => "SHORT_ENUM",
            XcomFormat::Error => "ERROR",
            XcomFormat::Int32 => "INT32",
            XcomFormat::Float => "FLOAT",
            XcomFormat::LongEnum => "LONG_ENUM",
            XcomFormat::Guid => "GUID",
            XcomFormat::String => "STRING",
            XcomFormat::Dynamic => "DYNAMIC",
            XcomFormat::Bytes => "BYTES",
            XcomFormat::Menu => "MENU",
            XcomFormat::Invalid => "INVALID",
        };
        f.write_str(name)
    }
}

/// A decoded property value
#[derive(Debug, Clone, PartialEq)]
pub enum XcomValue {
    Bool(bool),
    /// FORMAT, SHORT_ENUM and ERROR payloads
    UInt16(u16),
    Int32(i32),
    /// LONG_ENUM payloads
    UInt32(u32),
    Float(f32),
    Guid(Uuid),
    String(String),
}

impl XcomValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            XcomValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            XcomValue::UInt16(v) => Some(f64::from(*v)),
            XcomValue::Int32(v) => Some(f64::from(*v)),
            XcomValue::UInt32(v) => Some(f64::from(*v)),
            XcomValue::Float(v) => Some(f64::from(*v)),
            XcomValue::Guid(_) | XcomValue::String(_) => None,
        }
    }

    /// Integer view of the value; floats are truncated
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|v| v as i64)
    }

    fn as_bool(&self) -> Option<bool> {
        self.as_f64().map(|v| v != 0.0)
    }
}

impl fmt::Display for XcomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XcomValue::Bool(v) => write!(f, "{v}"),
            XcomValue::UInt16(v) => write!(f, "{v}"),
            XcomValue::Int32(v) => write!(f, "{v}"),
            XcomValue::UInt32(v) => write!(f, "{v}"),
            XcomValue::Float(v) => write!(f, "{v}"),
            XcomValue::Guid(v) => write!(f, "{v}"),
            XcomValue::String(v) => f.write_str(v),
        }
    }
}

impl From<bool> for XcomValue {
    fn from(v: bool) -> Self {
        XcomValue::Bool(v)
    }
}

impl From<i32> for XcomValue {
    fn from(v: i32) -> Self {
        XcomValue::Int32(v)
    }
}

impl From<f32> for XcomValue {
    fn from(v: f32) -> Self {
        XcomValue::Float(v)
    }
}

impl From<&str> for XcomValue {
    fn from(v: &str) -> Self {
        XcomValue::String(v.to_string())
    }
}

/// Encode a value into its little-endian wire form for the given format.
///
/// Numeric values are coerced across variants (a `Float(4.0)` packs fine as
/// INT32), matching how catalog defaults are written.
pub fn pack(value: &XcomValue, format: XcomFormat) -> XcomResult<Vec<u8>> {
    let type_error = || {
        XcomError::unpack(format!("Cannot pack {value:?} as format {format}"))
    };

    match format {
        XcomFormat::Bool => {
            let b = value.as_bool().ok_or_else(&type_error)?;
            Ok(vec![u8::from(b)])
        }
        XcomFormat::Format | XcomFormat::ShortEnum | XcomFormat::Error => {
            let v = value.as_i64().ok_or_else(&type_error)?;
            let v = u16::try_from(v).map_err(|_| type_error())?;
            let mut buf = Vec::with_capacity(2);
            buf.write_u16::<LittleEndian>(v)?;
            Ok(buf)
        }
        XcomFormat::Int32 => {
            let v = value.as_i64().ok_or_else(&type_error)?;
            let v = i32::try_from(v).map_err(|_| type_error())?;
            let mut buf = Vec::with_capacity(4);
            buf.write_i32::<LittleEndian>(v)?;
            Ok(buf)
        }
        XcomFormat::LongEnum => {
            let v = value.as_i64().ok_or_else(&type_error)?;
            let v = u32::try_from(v).map_err(|_| type_error())?;
            let mut buf = Vec::with_capacity(4);
            buf.write_u32::<LittleEndian>(v)?;
            Ok(buf)
        }
        XcomFormat::Float => {
            let v = value.as_f64().ok_or_else(&type_error)?;
            let mut buf = Vec::with_capacity(4);
            buf.write_f32::<LittleEndian>(v as f32)?;
            Ok(buf)
        }
        XcomFormat::Guid => {
            let guid = match value {
                XcomValue::Guid(g) => *g,
                XcomValue::String(s) => Uuid::parse_str(s)
                    .map_err(|e| XcomError::unpack(format!("Invalid GUID '{s}': {e}")))?,
                _ => return Err(type_error()),
            };
            Ok(guid.as_u128().to_le_bytes().to_vec())
        }
        XcomFormat::String => {
            let s = match value {
                XcomValue::String(s) => s,
                _ => return Err(type_error()),
            };
            encode_iso_8859_15(s)
        }
        _ => Err(XcomError::unpack(format!("Unknown data format '{format}'"))),
    }
}

/// Decode a little-endian wire payload per the given format.
///
/// A payload whose byte length does not match the format is an unpack
/// failure; the vendor documents occasional transient byte-length glitches,
/// so the request engine retries these.
pub fn unpack(buf: &[u8], format: XcomFormat) -> XcomResult<XcomValue> {
    let length_error = |expected: usize| {
        XcomError::unpack(format!(
            "Expected {expected} bytes for format {format}, got {} ({})",
            buf.len(),
            hex::encode(buf)
        ))
    };

    match format {
        XcomFormat::Bool => {
            if buf.len() != 1 {
                return Err(length_error(1));
            }
            Ok(XcomValue::Bool(buf[0] != 0))
        }
        XcomFormat::Format | XcomFormat::ShortEnum | XcomFormat::Error => {
            if buf.len() != 2 {
                return Err(length_error(2));
            }
            Ok(XcomValue::UInt16(Cursor::new(buf).read_u16::<LittleEndian>()?))
        }
        XcomFormat::Int32 => {
            if buf.len() != 4 {
                return Err(length_error(4));
            }
            Ok(XcomValue::Int32(Cursor::new(buf).read_i32::<LittleEndian>()?))
        }
        XcomFormat::LongEnum => {
            if buf.len() != 4 {
                return Err(length_error(4));
            }
            Ok(XcomValue::UInt32(Cursor::new(buf).read_u32::<LittleEndian>()?))
        }
        XcomFormat::Float => {
            if buf.len() != 4 {
                return Err(length_error(4));
            }
            Ok(XcomValue::Float(Cursor::new(buf).read_f32::<LittleEndian>()?))
        }
        XcomFormat::Guid => {
            let bytes: [u8; 16] = buf.try_into().map_err(|_| length_error(16))?;
            Ok(XcomValue::Guid(Uuid::from_u128(u128::from_le_bytes(bytes))))
        }
        XcomFormat::String => Ok(XcomValue::String(decode_iso_8859_15(buf))),
        _ => Err(XcomError::unpack(format!("Unknown data format '{format}'"))),
    }
}

/// Coerce a raw float into a datapoint's declared logical type.
///
/// Multi-info responses always transmit their payload as a 4-byte float,
/// even for enum/bool/int32 datapoints; this restores the logical type.
pub fn cast(value: f32, format: XcomFormat) -> XcomResult<XcomValue> {
    match format {
        XcomFormat::Bool => Ok(XcomValue::Bool(value != 0.0)),
        XcomFormat::Format | XcomFormat::ShortEnum | XcomFormat::Error => {
            Ok(XcomValue::UInt16(value as u16))
        }
        XcomFormat::Int32 => Ok(XcomValue::Int32(value as i32)),
        XcomFormat::LongEnum => Ok(XcomValue::UInt32(value as u32)),
        XcomFormat::Float => Ok(XcomValue::Float(value)),
        _ => Err(XcomError::unpack(format!("Cannot cast float to format '{format}'"))),
    }
}

// ISO-8859-15 differs from Latin-1 in exactly eight code points.
const ISO_8859_15_OVERRIDES: [(u8, char); 8] = [
    (0xA4, '\u{20AC}'), // €
    (0xA6, '\u{0160}'), // Š
    (0xA8, '\u{0161}'), // š
    (0xB4, '\u{017D}'), // Ž
    (0xB8, '\u{017E}'), // ž
    (0xBC, '\u{0152}'), // Œ
    (0xBD, '\u{0153}'), // œ
    (0xBE, '\u{0178}'), // Ÿ
];

fn decode_iso_8859_15(buf: &[u8]) -> String {
    buf.iter()
        .map(|&b| {
            ISO_8859_15_OVERRIDES
                .iter()
                .find(|(byte, _)| *byte == b)
                .map(|(_, ch)| *ch)
                .unwrap_or(b as char)
        })
        .collect()
}

fn encode_iso_8859_15(s: &str) -> XcomResult<Vec<u8>> {
    s.chars()
        .map(|ch| {
            if let Some((byte, _)) = ISO_8859_15_OVERRIDES.iter().find(|(_, c)| *c == ch) {
                return Ok(*byte);
            }
            let cp = ch as u32;
            // The eight override positions no longer mean their Latin-1 glyphs
            if cp <= 0xFF && !ISO_8859_15_OVERRIDES.iter().any(|(b, _)| u32::from(*b) == cp) {
                Ok(cp as u8)
            } else {
                Err(XcomError::unpack(format!(
                    "Character '{ch}' is not representable in ISO-8859-15"
                )))
            }
        })
        .collect()
}
