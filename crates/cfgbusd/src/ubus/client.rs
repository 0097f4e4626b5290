//! Minimal ubus client: object registration, call replies and events.

use std::collections::VecDeque;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use camino::Utf8Path;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::blob::{BLOBMSG_BOOL, BLOBMSG_STRING, BLOBMSG_TABLE, BlobBuilder};
use super::wire::{Message, MessageType, attr};
use super::{UBUS_TARGET, UbusError};

const EVENT_OBJECT: u32 = 1;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const STATUS_INVALID_ARGUMENT: u32 = 2;

/// Parameters every action method declares in its signature.
const METHOD_PARAMS: &[(&str, u8)] = &[
    ("data", BLOBMSG_TABLE),
    ("final", BLOBMSG_BOOL),
    ("multipart", BLOBMSG_BOOL),
    ("request_id", BLOBMSG_STRING),
    ("multipart_data", BLOBMSG_STRING),
];

/// A method call delivered by ubusd.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Invocation {
    pub(crate) seq: u16,
    pub(crate) peer: u32,
    pub(crate) object: u32,
    pub(crate) method: String,
    pub(crate) data: Map<String, Value>,
}

impl Invocation {
    fn from_message(message: &Message) -> Result<Self, UbusError> {
        let attrs = message.attrs()?;
        Ok(Self {
            seq: message.seq,
            peer: message.peer,
            object: attrs.u32(attr::OBJID)?,
            method: attrs.string(attr::METHOD)?.to_owned(),
            data: attrs.table(attr::DATA)?,
        })
    }
}

/// A connection to ubusd.
#[derive(Debug)]
pub struct UbusClient {
    stream: UnixStream,
    peer: u32,
    seq: u16,
    backlog: VecDeque<Message>,
}

impl UbusClient {
    /// Connects to ubusd and waits for its greeting.
    pub fn connect(path: &Utf8Path) -> Result<Self, UbusError> {
        let mut stream =
            UnixStream::connect(path.as_std_path()).map_err(|source| UbusError::Connect {
                path: path.to_string(),
                source,
            })?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        let hello = Message::read_from(&mut stream)?.ok_or(UbusError::Timeout)?;
        if hello.kind != MessageType::Hello {
            return Err(UbusError::Unexpected("expected hello"));
        }
        debug!(target: UBUS_TARGET, peer = hello.peer, "connected to ubusd");
        Ok(Self {
            stream,
            peer: hello.peer,
            seq: 0,
            backlog: VecDeque::new(),
        })
    }

    /// Peer id assigned by ubusd.
    #[must_use]
    pub const fn peer(&self) -> u32 {
        self.peer
    }

    /// Sets how long [`Self::poll`] blocks before returning `None`.
    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<(), UbusError> {
        self.stream.set_read_timeout(Some(interval))?;
        Ok(())
    }

    fn next_seq(&mut self) -> u16 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Sends a request and collects its DATA replies up to the final STATUS.
    fn request(
        &mut self,
        kind: MessageType,
        peer: u32,
        body: BlobBuilder,
    ) -> Result<Vec<Message>, UbusError> {
        let seq = self.next_seq();
        Message::new(kind, seq, peer, body).write_to(&mut self.stream)?;
        let mut replies = Vec::new();
        loop {
            let Some(message) = Message::read_from(&mut self.stream)? else {
                return Err(UbusError::Timeout);
            };
            if message.seq != seq || !matches!(message.kind, MessageType::Data | MessageType::Status)
            {
                self.backlog.push_back(message);
                continue;
            }
            if message.kind == MessageType::Status {
                let status = message.attrs()?.u32(attr::STATUS)?;
                if status != 0 {
                    return Err(UbusError::Status(status));
                }
                return Ok(replies);
            }
            replies.push(message);
        }
    }

    /// Registers `path` with one method per action and returns its object id.
    pub fn add_object(&mut self, path: &str, methods: &[&str]) -> Result<u32, UbusError> {
        let mut body = BlobBuilder::new();
        body.put_string(attr::OBJPATH, path);
        body.put_nested(attr::SIGNATURE, |signature| {
            for method in methods {
                signature.put_table(method, |params| {
                    for (name, kind) in METHOD_PARAMS {
                        params.put_type_field(name, *kind);
                    }
                });
            }
        });
        let replies = self.request(MessageType::AddObject, 0, body)?;
        let object = replies
            .iter()
            .find_map(|reply| reply.attrs().ok()?.u32(attr::OBJID).ok())
            .ok_or(UbusError::MissingAttribute(attr::OBJID))?;
        debug!(target: UBUS_TARGET, path, object, "object registered");
        Ok(object)
    }

    /// Broadcasts event `id` carrying `data`.
    pub fn send_event(&mut self, id: &str, data: &Value) -> Result<(), UbusError> {
        let mut body = BlobBuilder::new();
        body.put_u32(attr::OBJID, EVENT_OBJECT);
        body.put_string(attr::METHOD, "send");
        body.put_nested(attr::DATA, |fields| {
            fields.put_field("id", &json!(id));
            fields.put_field("data", data);
        });
        self.request(MessageType::Invoke, EVENT_OBJECT, body)?;
        Ok(())
    }

    /// Waits up to the poll interval for the next method call.
    pub(crate) fn poll(&mut self) -> Result<Option<Invocation>, UbusError> {
        loop {
            let message = match self.backlog.pop_front() {
                Some(message) => message,
                None => match Message::read_from(&mut self.stream)? {
                    Some(message) => message,
                    None => return Ok(None),
                },
            };
            match message.kind {
                MessageType::Invoke => match Invocation::from_message(&message) {
                    Ok(call) => return Ok(Some(call)),
                    Err(error) => self.reject(&message, &error)?,
                },
                MessageType::Ping => {
                    let reply = Message::new(
                        MessageType::Ping,
                        message.seq,
                        message.peer,
                        BlobBuilder::new(),
                    );
                    reply.write_to(&mut self.stream)?;
                }
                other => debug!(target: UBUS_TARGET, kind = ?other, "ignoring message"),
            }
        }
    }

    /// Answers an undecodable call with `INVALID_ARGUMENT` so the caller
    /// is not left waiting.
    fn reject(&mut self, message: &Message, error: &UbusError) -> Result<(), UbusError> {
        warn!(
            target: UBUS_TARGET,
            seq = message.seq,
            peer = message.peer,
            %error,
            "rejecting malformed call"
        );
        let object = message
            .attrs()
            .ok()
            .and_then(|attrs| attrs.u32(attr::OBJID).ok());
        let mut body = BlobBuilder::new();
        body.put_u32(attr::STATUS, STATUS_INVALID_ARGUMENT);
        if let Some(object) = object {
            body.put_u32(attr::OBJID, object);
        }
        Message::new(MessageType::Status, message.seq, message.peer, body).write_to(&mut self.stream)
    }

    /// Answers `call` with one DATA message per payload, then a status.
    pub(crate) fn reply(
        &mut self,
        call: &Invocation,
        payloads: &[Map<String, Value>],
        status: u32,
    ) -> Result<(), UbusError> {
        for payload in payloads {
            let mut body = BlobBuilder::new();
            body.put_u32(attr::OBJID, call.object);
            body.put_nested(attr::DATA, |data| data.put_fields(payload));
            Message::new(MessageType::Data, call.seq, call.peer, body).write_to(&mut self.stream)?;
        }
        let mut body = BlobBuilder::new();
        body.put_u32(attr::STATUS, status);
        body.put_u32(attr::OBJID, call.object);
        Message::new(MessageType::Status, call.seq, call.peer, body).write_to(&mut self.stream)
    }
}
