//! Wire types shared by the cfgbus daemon and its clients.
//!
//! Every exchange on every bus carries an [`Envelope`]: requests flow in,
//! replies and notifications flow out. The socket bus frames envelopes with a
//! 4-byte length prefix (see [`frame`]); the ubus bus additionally accepts
//! [`MultipartParams`] so payloads larger than a single bus message can be
//! delivered in chunks.

mod envelope;
pub mod frame;
mod multipart;

pub use envelope::{
    Envelope, ErrorRecord, INCORRECT_INPUT, MULTIPART_PARSE_FAILURE, MessageKind, WRONG_KIND,
};
pub use multipart::MultipartParams;
