//! AMQP 0-9-1 primitive types and field tables.
//!
//! Integers are big-endian. Short strings carry a one-octet length, long
//! strings and tables a four-octet length. Decoding goes through
//! [`Decoder`], which never reads past the input and reports truncation as
//! [`CodecError::Truncated`].

use crate::error::CodecError;
use bytes::{BufMut, BytesMut};
use std::collections::BTreeMap;

/// A field table, ordered by key for deterministic encoding.
pub type FieldTable = BTreeMap<String, FieldValue>;

/// A typed field-table value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// `t`
    Bool(bool),
    /// `b`
    I8(i8),
    /// `B`
    U8(u8),
    /// `s`
    I16(i16),
    /// `u`
    U16(u16),
    /// `I`
    I32(i32),
    /// `i`
    U32(u32),
    /// `l`
    I64(i64),
    /// `f`
    F32(f32),
    /// `d`
    F64(f64),
    /// `D`: `value / 10^scale`
    Decimal {
        /// Decimal places
        scale: u8,
        /// Unscaled value
        value: u32,
    },
    /// `S`
    LongString(Vec<u8>),
    /// `A`
    Array(Vec<FieldValue>),
    /// `T`: seconds since the epoch
    Timestamp(u64),
    /// `F`
    Table(FieldTable),
    /// `V`
    Void,
    /// `x`
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Build a long-string value from text.
    #[must_use]
    pub fn text(value: &str) -> Self {
        Self::LongString(value.as_bytes().to_vec())
    }

    /// The value as UTF-8 text, if it is a long string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::LongString(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Self::Bool(_) => b't',
            Self::I8(_) => b'b',
            Self::U8(_) => b'B',
            Self::I16(_) => b's',
            Self::U16(_) => b'u',
            Self::I32(_) => b'I',
            Self::U32(_) => b'i',
            Self::I64(_) => b'l',
            Self::F32(_) => b'f',
            Self::F64(_) => b'd',
            Self::Decimal { .. } => b'D',
            Self::LongString(_) => b'S',
            Self::Array(_) => b'A',
            Self::Timestamp(_) => b'T',
            Self::Table(_) => b'F',
            Self::Void => b'V',
            Self::Bytes(_) => b'x',
        }
    }
}

/// Bounds-checked reader over an encoded payload.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Start decoding `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Consume exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns error if fewer than `n` bytes remain.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// # Errors
    ///
    /// Returns error on truncated input.
    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// # Errors
    ///
    /// Returns error on truncated input.
    pub fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    /// # Errors
    ///
    /// Returns error on truncated input.
    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    /// # Errors
    ///
    /// Returns error on truncated input.
    pub fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    /// Short string, decoded lossily as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns error on truncated input.
    pub fn shortstr(&mut self) -> Result<String, CodecError> {
        let len = usize::from(self.u8()?);
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// Long string as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns error on truncated input.
    pub fn longstr(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// # Errors
    ///
    /// Returns error on truncated input or an unknown value tag.
    pub fn table(&mut self) -> Result<FieldTable, CodecError> {
        let len = self.u32()? as usize;
        let mut inner = Decoder::new(self.take(len)?);
        let mut table = FieldTable::new();
        while inner.remaining() > 0 {
            let key = inner.shortstr()?;
            let value = inner.field_value()?;
            table.insert(key, value);
        }
        Ok(table)
    }

    fn field_array(&mut self) -> Result<Vec<FieldValue>, CodecError> {
        let len = self.u32()? as usize;
        let mut inner = Decoder::new(self.take(len)?);
        let mut values = Vec::new();
        while inner.remaining() > 0 {
            values.push(inner.field_value()?);
        }
        Ok(values)
    }

    fn field_value(&mut self) -> Result<FieldValue, CodecError> {
        let value = match self.u8()? {
            b't' => FieldValue::Bool(self.u8()? != 0),
            b'b' => FieldValue::I8(i8::from_be_bytes(self.array()?)),
            b'B' => FieldValue::U8(self.u8()?),
            b's' => FieldValue::I16(i16::from_be_bytes(self.array()?)),
            b'u' => FieldValue::U16(self.u16()?),
            b'I' => FieldValue::I32(i32::from_be_bytes(self.array()?)),
            b'i' => FieldValue::U32(self.u32()?),
            b'l' => FieldValue::I64(i64::from_be_bytes(self.array()?)),
            b'f' => FieldValue::F32(f32::from_be_bytes(self.array()?)),
            b'd' => FieldValue::F64(f64::from_be_bytes(self.array()?)),
            b'D' => FieldValue::Decimal {
                scale: self.u8()?,
                value: self.u32()?,
            },
            b'S' => FieldValue::LongString(self.longstr()?),
            b'A' => FieldValue::Array(self.field_array()?),
            b'T' => FieldValue::Timestamp(self.u64()?),
            b'F' => FieldValue::Table(self.table()?),
            b'V' => FieldValue::Void,
            b'x' => FieldValue::Bytes(self.longstr()?),
            other => return Err(CodecError::UnknownFieldType(other)),
        };
        Ok(value)
    }
}

/// Write a short string.
///
/// # Errors
///
/// Returns error if `value` is longer than 255 bytes.
pub fn put_shortstr(buf: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    let len = u8::try_from(value.len()).map_err(|_| CodecError::ShortStringTooLong(value.len()))?;
    buf.put_u8(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

/// Write a long string.
///
/// # Errors
///
/// Returns error if `value` does not fit a 32-bit length.
pub fn put_longstr(buf: &mut BytesMut, value: &[u8]) -> Result<(), CodecError> {
    put_len(buf, value.len())?;
    buf.put_slice(value);
    Ok(())
}

/// Write a field table.
///
/// # Errors
///
/// Returns error if a key exceeds 255 bytes or a value is too large.
pub fn put_table(buf: &mut BytesMut, table: &FieldTable) -> Result<(), CodecError> {
    let mut inner = BytesMut::new();
    for (key, value) in table {
        put_shortstr(&mut inner, key)?;
        put_field_value(&mut inner, value)?;
    }
    put_longstr(buf, &inner)
}

fn put_len(buf: &mut BytesMut, len: usize) -> Result<(), CodecError> {
    let len = u32::try_from(len).map_err(|_| CodecError::ValueTooLong(len))?;
    buf.put_u32(len);
    Ok(())
}

fn put_field_value(buf: &mut BytesMut, value: &FieldValue) -> Result<(), CodecError> {
    buf.put_u8(value.tag());
    match value {
        FieldValue::Bool(v) => buf.put_u8(u8::from(*v)),
        FieldValue::I8(v) => buf.put_i8(*v),
        FieldValue::U8(v) => buf.put_u8(*v),
        FieldValue::I16(v) => buf.put_i16(*v),
        FieldValue::U16(v) => buf.put_u16(*v),
        FieldValue::I32(v) => buf.put_i32(*v),
        FieldValue::U32(v) => buf.put_u32(*v),
        FieldValue::I64(v) => buf.put_i64(*v),
        FieldValue::F32(v) => buf.put_f32(*v),
        FieldValue::F64(v) => buf.put_f64(*v),
        FieldValue::Decimal { scale, value } => {
            buf.put_u8(*scale);
            buf.put_u32(*value);
        }
        FieldValue::LongString(v) | FieldValue::Bytes(v) => put_longstr(buf, v)?,
        FieldValue::Array(values) => {
            let mut inner = BytesMut::new();
            for value in values {
                put_field_value(&mut inner, value)?;
            }
            put_longstr(buf, &inner)?;
        }
        FieldValue::Timestamp(v) => buf.put_u64(*v),
        FieldValue::Table(table) => put_table(buf, table)?,
        FieldValue::Void => {}
    }
    Ok(())
}

/// Pack up to eight bit arguments into one octet, first flag in the low bit.
#[must_use]
pub fn pack_bits(flags: &[bool]) -> u8 {
    flags
        .iter()
        .take(8)
        .enumerate()
        .fold(0, |octet, (i, &set)| if set { octet | (1 << i) } else { octet })
}

/// Read bit `index` of a packed octet.
#[must_use]
pub fn bit(octet: u8, index: u8) -> bool {
    octet & (1 << index) != 0
}
