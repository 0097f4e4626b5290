//! Length-prefixed framing for the unix-socket bus.
//!
//! Each frame is a 4-byte little-endian unsigned length followed by that many
//! bytes of UTF-8 JSON. Requests, replies and notifications share the format.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Largest payload accepted by [`read_frame`] unless a caller asks otherwise.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

const PREFIX_BYTES: usize = 4;

/// Errors raised while reading or writing a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The announced payload exceeds the accepted maximum.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Announced payload size.
        size: usize,
        /// Accepted maximum.
        max: usize,
    },
    /// The stream ended in the middle of a frame.
    #[error("stream closed after {read} of {expected} bytes")]
    Truncated {
        /// Bytes received before the stream closed.
        read: usize,
        /// Bytes the frame announced.
        expected: usize,
    },
    /// The underlying stream failed.
    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Writes `payload` as a single frame and flushes the writer.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] when the payload does not fit the 32-bit
/// prefix, or [`FrameError::Io`] when the writer fails.
#[expect(
    clippy::little_endian_bytes,
    reason = "the socket bus fixes the prefix byte order"
)]
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&length.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the stream closes cleanly before the first prefix
/// byte, which is how a peer signals that it has nothing to send.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] when the prefix announces more than `max`
/// bytes, [`FrameError::Truncated`] when the stream closes mid-frame, and
/// [`FrameError::Io`] for any other read failure.
#[expect(
    clippy::little_endian_bytes,
    reason = "the socket bus fixes the prefix byte order"
)]
pub fn read_frame<R: Read>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, FrameError> {
    let mut prefix = [0_u8; PREFIX_BYTES];
    let read = read_full(reader, &mut prefix)?;
    if read == 0 {
        return Ok(None);
    }
    if read < PREFIX_BYTES {
        return Err(FrameError::Truncated {
            read,
            expected: PREFIX_BYTES,
        });
    }

    let size = u32::from_le_bytes(prefix) as usize;
    if size > max {
        return Err(FrameError::TooLarge { size, max });
    }

    let mut payload = vec![0_u8; size];
    let received = read_full(reader, &mut payload)?;
    if received < size {
        return Err(FrameError::Truncated {
            read: received,
            expected: size,
        });
    }
    Ok(Some(payload))
}

/// Fills `buf` unless the stream ends first, returning the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while let Some(rest) = buf.get_mut(filled..) {
        if rest.is_empty() {
            break;
        }
        match reader.read(rest) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}
