//! Blob and blobmsg attribute encoding.
//!
//! A blob attribute starts with a big-endian `u32` holding the extended flag
//! (bit 31), the attribute id (bits 24..31) and the length including the
//! header (low 24 bits). Payloads are padded to four bytes. Extended
//! attributes are blobmsg fields: a `u16` name length, the NUL-terminated name
//! padded to four bytes, then the typed value.

use serde_json::{Map, Number, Value};

use super::UbusError;

const EXTENDED: u32 = 0x8000_0000;
const ID_MASK: u32 = 0x7f00_0000;
const ID_SHIFT: u32 = 24;
const LEN_MASK: u32 = 0x00ff_ffff;
const HEADER_LEN: usize = 4;

pub(crate) const BLOBMSG_ARRAY: u8 = 1;
pub(crate) const BLOBMSG_TABLE: u8 = 2;
pub(crate) const BLOBMSG_STRING: u8 = 3;
pub(crate) const BLOBMSG_INT64: u8 = 4;
pub(crate) const BLOBMSG_INT32: u8 = 5;
pub(crate) const BLOBMSG_INT16: u8 = 6;
pub(crate) const BLOBMSG_BOOL: u8 = 7;
pub(crate) const BLOBMSG_DOUBLE: u8 = 8;

const fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// Appends blob attributes to a growing buffer.
#[derive(Debug, Default)]
pub(crate) struct BlobBuilder {
    buf: Vec<u8>,
}

impl BlobBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn open(&mut self, id: u8, extended: bool) -> usize {
        let offset = self.buf.len();
        let flag = if extended { EXTENDED } else { 0 };
        self.buf
            .extend_from_slice(&(flag | (u32::from(id) << ID_SHIFT)).to_be_bytes());
        offset
    }

    fn close(&mut self, offset: usize) {
        let len = self.buf.len() - offset;
        let masked = u32::try_from(len).unwrap_or(LEN_MASK) & LEN_MASK;
        if let Some(header) = self.buf.get_mut(offset..offset + HEADER_LEN) {
            let mut word = [0_u8; HEADER_LEN];
            word.copy_from_slice(header);
            let id_len = (u32::from_be_bytes(word) & !LEN_MASK) | masked;
            header.copy_from_slice(&id_len.to_be_bytes());
        }
        self.buf.resize(offset + padded(len), 0);
    }

    pub(crate) fn put_raw(&mut self, id: u8, payload: &[u8]) {
        let offset = self.open(id, false);
        self.buf.extend_from_slice(payload);
        self.close(offset);
    }

    pub(crate) fn put_u32(&mut self, id: u8, value: u32) {
        self.put_raw(id, &value.to_be_bytes());
    }

    pub(crate) fn put_string(&mut self, id: u8, value: &str) {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.put_raw(id, &payload);
    }

    /// Adds a plain nested attribute whose children are written by `fill`.
    pub(crate) fn put_nested(&mut self, id: u8, fill: impl FnOnce(&mut Self)) {
        let offset = self.open(id, false);
        fill(self);
        self.close(offset);
    }

    fn open_field(&mut self, kind: u8, name: &str) -> usize {
        let offset = self.open(kind, true);
        let name_len = u16::try_from(name.len()).unwrap_or(u16::MAX);
        self.buf.extend_from_slice(&name_len.to_be_bytes());
        self.buf
            .extend_from_slice(name.as_bytes().get(..usize::from(name_len)).unwrap_or_default());
        self.buf.push(0);
        let header_end = offset + HEADER_LEN + padded(2 + usize::from(name_len) + 1);
        self.buf.resize(header_end, 0);
        offset
    }

    /// Adds a blobmsg field holding `value`.
    pub(crate) fn put_field(&mut self, name: &str, value: &Value) {
        match value {
            Value::Object(map) => {
                let offset = self.open_field(BLOBMSG_TABLE, name);
                self.put_fields(map);
                self.close(offset);
            }
            Value::Array(items) => {
                let offset = self.open_field(BLOBMSG_ARRAY, name);
                for item in items {
                    self.put_field("", item);
                }
                self.close(offset);
            }
            Value::String(text) => {
                let offset = self.open_field(BLOBMSG_STRING, name);
                self.buf.extend_from_slice(text.as_bytes());
                self.buf.push(0);
                self.close(offset);
            }
            Value::Bool(flag) => {
                let offset = self.open_field(BLOBMSG_BOOL, name);
                self.buf.push(u8::from(*flag));
                self.close(offset);
            }
            Value::Number(number) => self.put_number(name, number),
            Value::Null => {
                let offset = self.open_field(0, name);
                self.close(offset);
            }
        }
    }

    /// Adds every entry of `map` as a blobmsg field.
    pub(crate) fn put_fields(&mut self, map: &Map<String, Value>) {
        for (name, value) in map {
            self.put_field(name, value);
        }
    }

    /// Adds a blobmsg field carrying a type code, as used in signatures.
    pub(crate) fn put_type_field(&mut self, name: &str, kind: u8) {
        let offset = self.open_field(BLOBMSG_INT32, name);
        self.buf.extend_from_slice(&u32::from(kind).to_be_bytes());
        self.close(offset);
    }

    /// Adds a blobmsg table whose fields are written by `fill`.
    pub(crate) fn put_table(&mut self, name: &str, fill: impl FnOnce(&mut Self)) {
        let offset = self.open_field(BLOBMSG_TABLE, name);
        fill(self);
        self.close(offset);
    }

    fn put_number(&mut self, name: &str, number: &Number) {
        if let Some(int) = number.as_i64() {
            if let Ok(small) = i32::try_from(int) {
                let offset = self.open_field(BLOBMSG_INT32, name);
                self.buf.extend_from_slice(&small.to_be_bytes());
                self.close(offset);
            } else {
                let offset = self.open_field(BLOBMSG_INT64, name);
                self.buf.extend_from_slice(&int.to_be_bytes());
                self.close(offset);
            }
        } else {
            let float = number.as_f64().unwrap_or_default();
            let offset = self.open_field(BLOBMSG_DOUBLE, name);
            self.buf.extend_from_slice(&float.to_bits().to_be_bytes());
            self.close(offset);
        }
    }
}

/// One attribute borrowed from a received buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawAttr<'a> {
    pub(crate) id: u8,
    pub(crate) extended: bool,
    pub(crate) payload: &'a [u8],
}

impl<'a> RawAttr<'a> {
    pub(crate) fn as_u32(&self) -> Result<u32, UbusError> {
        read_array(self.payload).map(u32::from_be_bytes)
    }

    pub(crate) fn as_str(&self) -> Result<&'a str, UbusError> {
        c_string(self.payload)
    }

    /// Splits a blobmsg field into its name and value bytes.
    fn field(&self) -> Result<(&'a str, &'a [u8]), UbusError> {
        if !self.extended {
            return Err(UbusError::Malformed("expected blobmsg field"));
        }
        let len_bytes: [u8; 2] = read_array(self.payload)?;
        let name_len = usize::from(u16::from_be_bytes(len_bytes));
        let name = self
            .payload
            .get(2..2 + name_len)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .ok_or(UbusError::Malformed("blobmsg name"))?;
        let value = self
            .payload
            .get(padded(2 + name_len + 1)..)
            .ok_or(UbusError::Malformed("blobmsg header"))?;
        Ok((name, value))
    }
}

/// Splits `bytes` into consecutive attributes.
pub(crate) fn parse_attrs(mut bytes: &[u8]) -> Result<Vec<RawAttr<'_>>, UbusError> {
    let mut attrs = Vec::new();
    while !bytes.is_empty() {
        let id_len = u32::from_be_bytes(read_array(bytes)?);
        let len = (id_len & LEN_MASK) as usize;
        let payload = bytes
            .get(HEADER_LEN..len)
            .filter(|_| len >= HEADER_LEN)
            .ok_or(UbusError::Malformed("attribute length"))?;
        attrs.push(RawAttr {
            id: u8::try_from((id_len & ID_MASK) >> ID_SHIFT).unwrap_or_default(),
            extended: id_len & EXTENDED != 0,
            payload,
        });
        bytes = bytes.get(padded(len)..).unwrap_or_default();
    }
    Ok(attrs)
}

/// Decodes a sequence of blobmsg fields into a JSON object.
pub(crate) fn decode_table(bytes: &[u8]) -> Result<Map<String, Value>, UbusError> {
    parse_attrs(bytes)?
        .into_iter()
        .map(|attr| {
            let (name, value) = attr.field()?;
            Ok((name.to_owned(), decode_value(attr.id, value)?))
        })
        .collect()
}

fn decode_array(bytes: &[u8]) -> Result<Vec<Value>, UbusError> {
    parse_attrs(bytes)?
        .into_iter()
        .map(|attr| {
            let (_, value) = attr.field()?;
            decode_value(attr.id, value)
        })
        .collect()
}

fn decode_value(kind: u8, bytes: &[u8]) -> Result<Value, UbusError> {
    let value = match kind {
        BLOBMSG_TABLE => Value::Object(decode_table(bytes)?),
        BLOBMSG_ARRAY => Value::Array(decode_array(bytes)?),
        BLOBMSG_STRING => Value::String(c_string(bytes)?.to_owned()),
        BLOBMSG_INT64 => Value::from(i64::from_be_bytes(read_array(bytes)?)),
        BLOBMSG_INT32 => Value::from(i32::from_be_bytes(read_array(bytes)?)),
        BLOBMSG_INT16 => Value::from(i16::from_be_bytes(read_array(bytes)?)),
        BLOBMSG_BOOL => Value::Bool(bytes.first().copied().unwrap_or_default() != 0),
        BLOBMSG_DOUBLE => {
            let float = f64::from_bits(u64::from_be_bytes(read_array(bytes)?));
            Number::from_f64(float).map_or(Value::Null, Value::Number)
        }
        _ => Value::Null,
    };
    Ok(value)
}

fn read_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], UbusError> {
    bytes
        .get(..N)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or(UbusError::Malformed("short attribute"))
}

fn c_string(bytes: &[u8]) -> Result<&str, UbusError> {
    let end = bytes.iter().position(|byte| *byte == 0).unwrap_or(bytes.len());
    bytes
        .get(..end)
        .and_then(|text| std::str::from_utf8(text).ok())
        .ok_or(UbusError::Malformed("string attribute"))
}
