//! Decoded result rows and conversions into Rust types.

use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::protocol::message::{DataRow, FieldDescription};
use crate::value::Value;

/// One result row: the column metadata shared by every row of the result
/// set, plus this row's decoded values.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[FieldDescription]>,
    values: Vec<Value>,
}

impl Row {
    /// Decode a DataRow against the result set's column metadata.
    pub(crate) fn decode_from(columns: &Arc<[FieldDescription]>, data_row: DataRow) -> Result<Row> {
        if data_row.columns.len() != columns.len() {
            return Err(Error::Protocol(format!(
                "row has {} columns but description has {}",
                data_row.columns.len(),
                columns.len()
            )));
        }
        let mut values = Vec::with_capacity(columns.len());
        for (field, column) in columns.iter().zip(data_row.columns) {
            let value = match column {
                None => Value::Null,
                Some(bytes) => Value::parse(&bytes, field.data_type, field.format)?,
            };
            values.push(value);
        }
        Ok(Row {
            columns: Arc::clone(columns),
            values,
        })
    }

    pub fn columns(&self) -> &[FieldDescription] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c.name == name)?;
        self.values.get(index)
    }

    /// Decode the value at `index` into a concrete Rust type.
    pub fn decode<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| Error::Decode(format!("no column at index {index}")))?;
        T::from_value(value.clone())
    }

    /// Decode the value in the column named `name`.
    pub fn decode_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get_by_name(name)
            .ok_or_else(|| Error::Decode(format!("no column named {name:?}")))?;
        T::from_value(value.clone())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Conversion from a single [`Value`] into a Rust type.
///
/// Integer impls accept any integer variant and fail with a decode error
/// when the value does not fit the target width. No silent truncation.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(Error::Decode(format!(
                "cannot decode {} as String",
                other.kind()
            ))),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(Error::Decode(format!(
                "cannot decode {} as Vec<u8>",
                other.kind()
            ))),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::UInt8(0) => Ok(false),
            Value::UInt8(1) => Ok(true),
            other => Err(Error::Decode(format!(
                "cannot decode {} as bool",
                other.kind()
            ))),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(ts),
            other => Err(Error::Decode(format!(
                "cannot decode {} as NaiveDateTime",
                other.kind()
            ))),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float32(v) => Ok(v),
            other => Err(Error::Decode(format!(
                "cannot decode {} as f32",
                other.kind()
            ))),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float64(v) => Ok(v),
            Value::Float32(v) => Ok(v as f64),
            other => Err(Error::Decode(format!(
                "cannot decode {} as f64",
                other.kind()
            ))),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

macro_rules! impl_from_value_int {
    ($($target:ty),* $(,)?) => {$(
        impl FromValue for $target {
            fn from_value(value: Value) -> Result<Self> {
                let kind = value.kind();
                let wide: i64 = match value {
                    Value::Int8(v) => v as i64,
                    Value::Int16(v) => v as i64,
                    Value::Int32(v) => v as i64,
                    Value::Int64(v) => v,
                    Value::UInt8(v) => v as i64,
                    Value::UInt16(v) => v as i64,
                    Value::UInt32(v) => v as i64,
                    _ => {
                        return Err(Error::Decode(format!(
                            "cannot decode {kind} as {}",
                            stringify!($target)
                        )));
                    }
                };
                wide.try_into()
                    .map_err(|_| Error::overflow(stringify!($target), kind))
            }
        }
    )*};
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32);

/// Conversion from a whole [`Row`]. Implemented for tuples of
/// [`FromValue`] types up to arity 8, decoding columns positionally.
pub trait FromRow: Sized {
    fn from_row(row: Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self> {
        Ok(row)
    }
}

fn row_exhausted() -> Error {
    Error::Decode("row exhausted".into())
}

macro_rules! impl_from_row_tuple {
    ($count:literal: $($name:ident)+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(row: Row) -> Result<Self> {
                if row.len() != $count {
                    return Err(Error::Decode(format!(
                        "row has {} columns, expected {}",
                        row.len(),
                        $count
                    )));
                }
                let mut values = row.into_values().into_iter();
                Ok(($(
                    $name::from_value(values.next().ok_or_else(row_exhausted)?)?,
                )+))
            }
        }
    };
}

impl_from_row_tuple!(1: T0);
impl_from_row_tuple!(2: T0 T1);
impl_from_row_tuple!(3: T0 T1 T2);
impl_from_row_tuple!(4: T0 T1 T2 T3);
impl_from_row_tuple!(5: T0 T1 T2 T3 T4);
impl_from_row_tuple!(6: T0 T1 T2 T3 T4 T5);
impl_from_row_tuple!(7: T0 T1 T2 T3 T4 T5 T6);
impl_from_row_tuple!(8: T0 T1 T2 T3 T4 T5 T6 T7);
