//! ubus message framing.

use std::io::{self, Read, Write};

use serde_json::{Map, Value};

use super::UbusError;
use super::blob::{BlobBuilder, RawAttr, decode_table, parse_attrs};

const HEADER_LEN: usize = 8;
const BLOB_HEADER_LEN: usize = 4;
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Message types understood by ubusd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageType {
    Hello,
    Status,
    Data,
    Ping,
    Invoke,
    AddObject,
    Other(u8),
}

impl MessageType {
    const fn code(self) -> u8 {
        match self {
            Self::Hello => 0,
            Self::Status => 1,
            Self::Data => 2,
            Self::Ping => 3,
            Self::Invoke => 5,
            Self::AddObject => 6,
            Self::Other(code) => code,
        }
    }

    const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Hello,
            1 => Self::Status,
            2 => Self::Data,
            3 => Self::Ping,
            5 => Self::Invoke,
            6 => Self::AddObject,
            other => Self::Other(other),
        }
    }
}

/// Attribute ids of the outer message container.
pub(crate) mod attr {
    pub(crate) const STATUS: u8 = 1;
    pub(crate) const OBJPATH: u8 = 2;
    pub(crate) const OBJID: u8 = 3;
    pub(crate) const METHOD: u8 = 4;
    pub(crate) const SIGNATURE: u8 = 6;
    pub(crate) const DATA: u8 = 7;
}

/// One ubus message with its raw attribute container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Message {
    pub(crate) kind: MessageType,
    pub(crate) seq: u16,
    pub(crate) peer: u32,
    body: Vec<u8>,
}

impl Message {
    pub(crate) fn new(kind: MessageType, seq: u16, peer: u32, body: BlobBuilder) -> Self {
        Self {
            kind,
            seq,
            peer,
            body: body.into_bytes(),
        }
    }

    pub(crate) fn attrs(&self) -> Result<Attrs<'_>, UbusError> {
        parse_attrs(&self.body).map(Attrs)
    }

    pub(crate) fn write_to(&self, writer: &mut impl Write) -> Result<(), UbusError> {
        let container_len = u32::try_from(BLOB_HEADER_LEN + self.body.len())
            .map_err(|_| UbusError::Malformed("message too large"))?;
        let mut frame = Vec::with_capacity(HEADER_LEN + BLOB_HEADER_LEN + self.body.len());
        frame.push(0);
        frame.push(self.kind.code());
        frame.extend_from_slice(&self.seq.to_be_bytes());
        frame.extend_from_slice(&self.peer.to_be_bytes());
        frame.extend_from_slice(&container_len.to_be_bytes());
        frame.extend_from_slice(&self.body);
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads one message. Returns `Ok(None)` when the read timed out before
    /// any byte arrived; once a message has started it is read to the end.
    pub(crate) fn read_from(reader: &mut impl Read) -> Result<Option<Self>, UbusError> {
        let mut header = [0_u8; HEADER_LEN + BLOB_HEADER_LEN];
        if !fill(reader, &mut header, true)? {
            return Ok(None);
        }
        let [_version, kind, seq_hi, seq_lo, p0, p1, p2, p3, l0, l1, l2, l3] = header;
        let container_len = (u32::from_be_bytes([l0, l1, l2, l3]) & 0x00ff_ffff) as usize;
        if !(BLOB_HEADER_LEN..=MAX_MESSAGE_LEN).contains(&container_len) {
            return Err(UbusError::Malformed("message length"));
        }
        let mut body = vec![0_u8; container_len - BLOB_HEADER_LEN];
        fill(reader, &mut body, false)?;
        Ok(Some(Self {
            kind: MessageType::from_code(kind),
            seq: u16::from_be_bytes([seq_hi, seq_lo]),
            peer: u32::from_be_bytes([p0, p1, p2, p3]),
            body,
        }))
    }
}

/// Parsed attributes of a message.
#[derive(Debug)]
pub(crate) struct Attrs<'a>(Vec<RawAttr<'a>>);

impl<'a> Attrs<'a> {
    fn find(&self, id: u8) -> Option<&RawAttr<'a>> {
        self.0.iter().find(|attr| attr.id == id)
    }

    pub(crate) fn u32(&self, id: u8) -> Result<u32, UbusError> {
        self.find(id)
            .ok_or(UbusError::MissingAttribute(id))?
            .as_u32()
    }

    pub(crate) fn string(&self, id: u8) -> Result<&'a str, UbusError> {
        self.find(id)
            .ok_or(UbusError::MissingAttribute(id))?
            .as_str()
    }

    /// Decodes a nested blobmsg table; absent tables decode as empty.
    pub(crate) fn table(&self, id: u8) -> Result<Map<String, Value>, UbusError> {
        self.find(id)
            .map_or_else(|| Ok(Map::new()), |attr| decode_table(attr.payload))
    }
}

/// Fills `buf`, retrying timeouts once data has started to arrive. Returns
/// `false` when `idle_ok` is set and the first read timed out.
fn fill(reader: &mut impl Read, buf: &mut [u8], idle_ok: bool) -> Result<bool, UbusError> {
    let mut filled = 0;
    while filled < buf.len() {
        let Some(rest) = buf.get_mut(filled..) else {
            break;
        };
        match reader.read(rest) {
            Ok(0) => return Err(UbusError::Closed),
            Ok(read) => filled += read,
            Err(error) if is_timeout(&error) && filled == 0 && idle_ok => return Ok(false),
            Err(error) if is_timeout(&error) || error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error.into()),
        }
    }
    Ok(true)
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    #[test]
    fn header_fields_are_big_endian() {
        let mut body = BlobBuilder::new();
        body.put_u32(attr::OBJID, 9);
        let message = Message::new(MessageType::Status, 0x0102, 0x0a0b_0c0d, body);
        let mut bytes = Vec::new();
        message.write_to(&mut bytes).expect("write");
        assert_eq!(
            bytes.get(..12).expect("header"),
            [0, 1, 1, 2, 0x0a, 0x0b, 0x0c, 0x0d, 0, 0, 0, 12]
        );
    }

    #[test]
    fn reads_back_attributes() {
        let mut body = BlobBuilder::new();
        body.put_u32(attr::OBJID, 42);
        body.put_string(attr::METHOD, "get_settings");
        body.put_nested(attr::DATA, |data| {
            data.put_fields(json!({"final": true}).as_object().expect("object"));
        });
        let mut bytes = Vec::new();
        Message::new(MessageType::Invoke, 7, 3, body)
            .write_to(&mut bytes)
            .expect("write");

        let message = Message::read_from(&mut Cursor::new(bytes))
            .expect("read")
            .expect("message");
        assert_eq!(message.kind, MessageType::Invoke);
        assert_eq!(message.seq, 7);
        let attrs = message.attrs().expect("attrs");
        assert_eq!(attrs.u32(attr::OBJID).expect("objid"), 42);
        assert_eq!(attrs.string(attr::METHOD).expect("method"), "get_settings");
        assert_eq!(attrs.table(attr::DATA).expect("data")["final"], json!(true));
    }

    #[test]
    fn eof_mid_message_is_an_error() {
        let bytes = vec![0, 1, 0, 1, 0, 0, 0, 1, 0, 0];
        let result = Message::read_from(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(UbusError::Closed)));
    }

    #[test]
    fn missing_attribute_is_reported() {
        let message = Message::new(MessageType::Status, 1, 0, BlobBuilder::new());
        let attrs = message.attrs().expect("attrs");
        assert!(matches!(
            attrs.u32(attr::STATUS),
            Err(UbusError::MissingAttribute(attr::STATUS))
        ));
    }
}
