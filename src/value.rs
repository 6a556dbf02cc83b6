//! The typed value model bridging PostgreSQL's wire types to Rust.
//!
//! A [`Value`] is a closed union over every scalar the client can send or
//! receive. Values are constructed either by the caller (query parameters)
//! or by the row decoder, and live only for the duration of one query.
//!
//! Wire layouts follow PostgreSQL's `send`/`recv` and `in`/`out` functions:
//! integers and floats are big-endian fixed-width, strings are raw UTF-8,
//! timestamps count microseconds from 2000-01-01, points are two IEEE754
//! doubles back to back.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Error, Result};
use crate::protocol::types::{DataType, FormatCode};

/// PostgreSQL epoch: 2000-01-01.
const PG_EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2000, 1, 1) {
    Some(date) => date,
    None => panic!("invalid date"),
};

const USECS_PER_SEC: i64 = 1_000_000;

// NUMERIC sign words.
const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// A single PostgreSQL value. Exactly one variant is active; `Null`
/// carries no payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    Float32(f32),
    Float64(f64),
    Point { x: f64, y: f64 },
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Variant name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Timestamp(_) => "Timestamp",
            Value::Int8(_) => "Int8",
            Value::Int16(_) => "Int16",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::UInt8(_) => "UInt8",
            Value::UInt16(_) => "UInt16",
            Value::UInt32(_) => "UInt32",
            Value::Float32(_) => "Float32",
            Value::Float64(_) => "Float64",
            Value::Point { .. } => "Point",
        }
    }

    /// The wire type this value is declared as when sent to the server.
    ///
    /// `UInt8` and `UInt16` have no same-width unsigned type in `pg_type`,
    /// so they widen to the next signed type that holds their full range.
    /// `UInt32` maps to `oid`, which is unsigned on the wire.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::VOID,
            Value::String(_) => DataType::VARCHAR,
            Value::Bytes(_) => DataType::BYTEA,
            Value::Timestamp(_) => DataType::TIMESTAMP,
            Value::Int8(_) => DataType::CHAR,
            Value::Int16(_) => DataType::INT2,
            Value::Int32(_) => DataType::INT4,
            Value::Int64(_) => DataType::INT8,
            Value::UInt8(_) => DataType::INT2,
            Value::UInt16(_) => DataType::INT4,
            Value::UInt32(_) => DataType::OID,
            Value::Float32(_) => DataType::FLOAT4,
            Value::Float64(_) => DataType::FLOAT8,
            Value::Point { .. } => DataType::POINT,
        }
    }

    /// Decode raw column bytes into a `Value` given the column's declared
    /// type and format. Types the value model does not represent natively
    /// decode to `String` (text format) or `Bytes` (binary format).
    pub fn parse(bytes: &[u8], data_type: DataType, format: FormatCode) -> Result<Value> {
        match format {
            FormatCode::Text => Self::parse_text(bytes, data_type),
            FormatCode::Binary => Self::parse_binary(bytes, data_type),
        }
    }

    fn parse_text(bytes: &[u8], data_type: DataType) -> Result<Value> {
        let value = match data_type {
            DataType::BOOL => match bytes {
                b"t" => Value::UInt8(1),
                b"f" => Value::UInt8(0),
                other => {
                    return Err(Error::Decode(format!(
                        "invalid bool literal: {:?}",
                        String::from_utf8_lossy(other)
                    )));
                }
            },
            DataType::CHAR => match bytes {
                [] => Value::Int8(0),
                &[byte] => Value::Int8(byte as i8),
                other => {
                    return Err(Error::Decode(format!(
                        "invalid \"char\" length: {}",
                        other.len()
                    )));
                }
            },
            DataType::INT2 => Value::Int16(parse_number(data_type, bytes)?),
            DataType::INT4 => Value::Int32(parse_number(data_type, bytes)?),
            DataType::INT8 => Value::Int64(parse_number(data_type, bytes)?),
            DataType::OID => Value::UInt32(parse_number(data_type, bytes)?),
            DataType::FLOAT4 => Value::Float32(parse_number(data_type, bytes)?),
            DataType::FLOAT8 => Value::Float64(parse_number(data_type, bytes)?),
            DataType::BYTEA => Value::Bytes(decode_hex(text(bytes)?)?),
            DataType::POINT => parse_point_text(text(bytes)?)?,
            DataType::TIMESTAMP | DataType::TIMESTAMPTZ => {
                Value::Timestamp(parse_timestamp_text(text(bytes)?)?)
            }
            DataType::DATE => {
                let date = NaiveDate::parse_from_str(text(bytes)?, "%Y-%m-%d")
                    .map_err(|e| Error::Decode(format!("invalid date: {e}")))?;
                Value::Timestamp(date.and_time(NaiveTime::MIN))
            }
            DataType::TIME => {
                let s = text(bytes)?;
                let time = NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                    .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
                    .map_err(|e| Error::Decode(format!("invalid time: {e}")))?;
                Value::Timestamp(PG_EPOCH.and_time(time))
            }
            DataType::VOID => Value::Null,
            // NUMERIC, uuid, json and everything else already arrive as
            // their canonical text form.
            _ => Value::String(text(bytes)?.to_string()),
        };
        Ok(value)
    }

    fn parse_binary(bytes: &[u8], data_type: DataType) -> Result<Value> {
        let value = match data_type {
            DataType::BOOL => {
                let [byte] = fixed::<1>(data_type, bytes)?;
                Value::UInt8(u8::from(byte != 0))
            }
            DataType::CHAR => {
                let [byte] = fixed::<1>(data_type, bytes)?;
                Value::Int8(byte as i8)
            }
            DataType::INT2 => Value::Int16(i16::from_be_bytes(fixed(data_type, bytes)?)),
            DataType::INT4 => Value::Int32(i32::from_be_bytes(fixed(data_type, bytes)?)),
            DataType::INT8 => Value::Int64(i64::from_be_bytes(fixed(data_type, bytes)?)),
            DataType::OID => Value::UInt32(u32::from_be_bytes(fixed(data_type, bytes)?)),
            DataType::FLOAT4 => Value::Float32(f32::from_be_bytes(fixed(data_type, bytes)?)),
            DataType::FLOAT8 => Value::Float64(f64::from_be_bytes(fixed(data_type, bytes)?)),
            DataType::BYTEA => Value::Bytes(bytes.to_vec()),
            DataType::POINT => {
                let raw = fixed::<16>(data_type, bytes)?;
                let mut x = [0u8; 8];
                let mut y = [0u8; 8];
                x.copy_from_slice(&raw[..8]);
                y.copy_from_slice(&raw[8..]);
                Value::Point {
                    x: f64::from_be_bytes(x),
                    y: f64::from_be_bytes(y),
                }
            }
            DataType::TIMESTAMP | DataType::TIMESTAMPTZ => {
                let usecs = i64::from_be_bytes(fixed(data_type, bytes)?);
                let ts = PG_EPOCH
                    .and_time(NaiveTime::MIN)
                    .checked_add_signed(Duration::microseconds(usecs))
                    .ok_or_else(|| Error::Decode("timestamp out of range".into()))?;
                Value::Timestamp(ts)
            }
            DataType::DATE => {
                let days = i32::from_be_bytes(fixed(data_type, bytes)?);
                let date = PG_EPOCH
                    .checked_add_signed(Duration::days(days as i64))
                    .ok_or_else(|| Error::Decode("date out of range".into()))?;
                Value::Timestamp(date.and_time(NaiveTime::MIN))
            }
            DataType::TIME => {
                let usecs = i64::from_be_bytes(fixed(data_type, bytes)?);
                if usecs < 0 {
                    return Err(Error::Decode(format!("negative time: {usecs}")));
                }
                let secs = (usecs / USECS_PER_SEC) as u32;
                let nano = ((usecs % USECS_PER_SEC) * 1000) as u32;
                let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nano)
                    .ok_or_else(|| Error::Decode("time out of range".into()))?;
                Value::Timestamp(PG_EPOCH.and_time(time))
            }
            DataType::NUMERIC => Value::String(numeric_to_string(bytes)?),
            DataType::UUID => Value::String(uuid_to_string(&fixed::<16>(data_type, bytes)?)),
            DataType::JSONB => {
                // One version byte, then the JSON text.
                let (version, rest) = bytes
                    .split_first()
                    .ok_or_else(|| Error::Decode("empty jsonb".into()))?;
                if *version != 1 {
                    return Err(Error::Decode(format!("unknown jsonb version: {version}")));
                }
                Value::String(text(rest)?.to_string())
            }
            DataType::TEXT
            | DataType::VARCHAR
            | DataType::BPCHAR
            | DataType::NAME
            | DataType::JSON
            | DataType::UNKNOWN => Value::String(text(bytes)?.to_string()),
            DataType::VOID => Value::Null,
            // Binary forms this model does not understand stay raw.
            _ => Value::Bytes(bytes.to_vec()),
        };
        Ok(value)
    }

    /// Encode this value for the wire. Returns `None` for `Null`; the
    /// caller writes the `-1` length word in that case.
    ///
    /// Not every variant supports both formats: `Timestamp` serializes
    /// only as text and `Bytes` only as binary.
    pub fn serialize(&self, format: FormatCode) -> Result<Option<Vec<u8>>> {
        let bytes = match (self, format) {
            (Value::Null, _) => return Ok(None),
            (Value::String(s), _) => s.as_bytes().to_vec(),

            (Value::Bytes(b), FormatCode::Binary) => b.clone(),
            (Value::Bytes(_), FormatCode::Text) => {
                return Err(Error::Encode("Bytes has no text serializer".into()));
            }

            (Value::Timestamp(ts), FormatCode::Text) => ts
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string()
                .into_bytes(),
            (Value::Timestamp(_), FormatCode::Binary) => {
                return Err(Error::Encode("Timestamp has no binary serializer".into()));
            }

            (Value::Int8(v), FormatCode::Binary) => vec![*v as u8],
            (Value::Int16(v), FormatCode::Binary) => v.to_be_bytes().to_vec(),
            (Value::Int32(v), FormatCode::Binary) => v.to_be_bytes().to_vec(),
            (Value::Int64(v), FormatCode::Binary) => v.to_be_bytes().to_vec(),
            // Widened to the declared type's width, zero-extended.
            (Value::UInt8(v), FormatCode::Binary) => (*v as i16).to_be_bytes().to_vec(),
            (Value::UInt16(v), FormatCode::Binary) => (*v as i32).to_be_bytes().to_vec(),
            (Value::UInt32(v), FormatCode::Binary) => v.to_be_bytes().to_vec(),
            (Value::Float32(v), FormatCode::Binary) => v.to_be_bytes().to_vec(),
            (Value::Float64(v), FormatCode::Binary) => v.to_be_bytes().to_vec(),

            (Value::Int8(v), FormatCode::Text) => v.to_string().into_bytes(),
            (Value::Int16(v), FormatCode::Text) => v.to_string().into_bytes(),
            (Value::Int32(v), FormatCode::Text) => v.to_string().into_bytes(),
            (Value::Int64(v), FormatCode::Text) => v.to_string().into_bytes(),
            (Value::UInt8(v), FormatCode::Text) => v.to_string().into_bytes(),
            (Value::UInt16(v), FormatCode::Text) => v.to_string().into_bytes(),
            (Value::UInt32(v), FormatCode::Text) => v.to_string().into_bytes(),
            (Value::Float32(v), FormatCode::Text) => float_to_text(*v as f64).into_bytes(),
            (Value::Float64(v), FormatCode::Text) => float_to_text(*v).into_bytes(),

            (Value::Point { x, y }, FormatCode::Binary) => {
                let mut out = Vec::with_capacity(16);
                out.extend_from_slice(&x.to_be_bytes());
                out.extend_from_slice(&y.to_be_bytes());
                out
            }
            (Value::Point { x, y }, FormatCode::Text) => format!("({x},{y})").into_bytes(),
        };
        Ok(Some(bytes))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::UInt8(u8::from(v))
    }
}

macro_rules! impl_from_numeric {
    ($($native:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$native> for Value {
                fn from(v: $native) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_numeric! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    f32 => Float32,
    f64 => Float64,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

fn text(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

fn fixed<const N: usize>(data_type: DataType, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Error::Decode(format!(
            "invalid {data_type} length: {} (expected {N})",
            bytes.len()
        ))
    })
}

fn parse_number<T: std::str::FromStr>(data_type: DataType, bytes: &[u8]) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    text(bytes)?
        .parse()
        .map_err(|e| Error::Decode(format!("invalid {data_type} literal: {e}")))
}

/// PostgreSQL spells float specials `NaN`, `Infinity` and `-Infinity`.
fn float_to_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        let sign = if v.is_sign_negative() { "-" } else { "" };
        format!("{sign}Infinity")
    } else {
        v.to_string()
    }
}

fn parse_point_text(s: &str) -> Result<Value> {
    let invalid = || Error::Decode(format!("invalid point literal: {s:?}"));
    let inner = s
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(invalid)?;
    let (x, y) = inner.split_once(',').ok_or_else(invalid)?;
    Ok(Value::Point {
        x: x.trim().parse().map_err(|_| invalid())?,
        y: y.trim().parse().map_err(|_| invalid())?,
    })
}

/// Parse `yyyy-MM-dd HH:mm:ss[.ffffff]`, tolerating a trailing timezone
/// offset on timestamptz output.
fn parse_timestamp_text(s: &str) -> Result<NaiveDateTime> {
    // rfind: the date part contains '-' too, only a late hit is an offset.
    let s = s
        .rfind(|c| c == '+' || c == '-')
        .filter(|&pos| pos > 10)
        .map_or(s, |pos| s.split_at(pos).0);
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| Error::Decode(format!("invalid timestamp: {e}")))
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let hex = s
        .strip_prefix("\\x")
        .ok_or_else(|| Error::Decode("bytea text must start with \\x".into()))?;
    let hex = hex.as_bytes();
    if hex.len() % 2 != 0 {
        return Err(Error::Decode(format!("odd hex length: {}", hex.len())));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks_exact(2) {
        out.push(hex_nibble(pair[0])? << 4 | hex_nibble(pair[1])?);
    }
    Ok(out)
}

fn hex_nibble(byte: u8) -> Result<u8> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        other => Err(Error::Decode(format!(
            "invalid hex digit: {:?}",
            other as char
        ))),
    }
}

fn uuid_to_string(bytes: &[u8; 16]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(36);
    for (i, byte) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Render PostgreSQL's NUMERIC binary form as its canonical decimal
/// string, after `get_str_from_var()` in the server's `numeric.c`.
///
/// Layout: Int16 ndigits, Int16 weight, UInt16 sign, UInt16 dscale, then
/// `ndigits` base-10000 digit words. `weight` is the power of 10000 of
/// the first digit word; `dscale` is the number of decimal places to
/// display.
fn numeric_to_string(bytes: &[u8]) -> Result<String> {
    if bytes.len() < 8 {
        return Err(Error::Decode(format!(
            "invalid numeric length: {}",
            bytes.len()
        )));
    }
    let ndigits = i16::from_be_bytes([bytes[0], bytes[1]]);
    let weight = i16::from_be_bytes([bytes[2], bytes[3]]) as i64;
    let sign = u16::from_be_bytes([bytes[4], bytes[5]]);
    let dscale = u16::from_be_bytes([bytes[6], bytes[7]]) as i64;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(Error::Decode(format!("invalid numeric sign: {other:#06x}"))),
    }

    if ndigits < 0 {
        return Err(Error::Decode(format!("negative numeric ndigits: {ndigits}")));
    }
    let ndigits = ndigits as usize;
    if bytes.len() < 8 + ndigits * 2 {
        return Err(Error::Decode(format!(
            "numeric truncated: {} digit words, {} bytes",
            ndigits,
            bytes.len()
        )));
    }
    let digits: Vec<u16> = (0..ndigits)
        .map(|i| u16::from_be_bytes([bytes[8 + 2 * i], bytes[9 + 2 * i]]))
        .collect();
    // Digit words past the end are zero; PostgreSQL strips trailing zero
    // words before sending.
    let word = |idx: i64| -> u16 {
        if idx < 0 {
            return 0;
        }
        digits.get(idx as usize).copied().unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for idx in 0..=weight {
            if idx == 0 {
                out.push_str(&word(idx).to_string());
            } else {
                out.push_str(&format!("{:04}", word(idx)));
            }
        }
    }

    if dscale > 0 {
        out.push('.');
        let mut written = 0;
        let mut idx = weight + 1;
        while written < dscale {
            let group = format!("{:04}", word(idx));
            for c in group.chars() {
                if written == dscale {
                    break;
                }
                out.push(c);
                written += 1;
            }
            idx += 1;
        }
    }

    Ok(out)
}
