//! Decoder Adapter (§4.2).
//!
//! Thin wrapper over the RESP state machine (`Frame::check` / `Frame`'s
//! `Cursor` parse) as a standalone type, so the read path's
//! queue-pop-on-decode logic can live in `handler.rs`.

use crate::frame::{Frame, FrameError};
use bytes::{Buf, BytesMut};
use std::io::Cursor;

/// Adapts the RESP parser to the "feed bytes, get zero-or-one completed
/// frame" contract the read path needs.
#[derive(Debug, Default)]
pub(crate) struct Decoder {
    _private: (),
}

impl Decoder {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }

    /// Discards any per-parse resumption state. For this protocol's
    /// reply types, parsing is always re-attempted from the start of the
    /// still-buffered bytes, so there is no state to discard today; this
    /// is a documented no-op kept so callers (and the invariant in §9 that
    /// no bytes carry across a reconnect) don't have to special-case it if
    /// a future RESP3 push-token decoder grows real resumption state.
    pub(crate) fn reset(&mut self) {}

    /// Attempts to decode one complete frame from `buffer`.
    ///
    /// Returns `Ok(Some(frame))` and advances `buffer` past the consumed
    /// bytes if a full frame was available, `Ok(None)` if more bytes are
    /// needed, or `Err` if the buffered bytes are not a valid frame (a
    /// protocol-level exception, §4.6).
    pub(crate) fn decode(&mut self, buffer: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let mut cursor = Cursor::new(&buffer[..]);

        match Frame::check(&mut cursor) {
            Ok(()) => {
                let len = cursor.position() as usize;
                cursor.set_position(0);
                let frame = Frame::from(&mut cursor);
                buffer.advance(len);
                Ok(Some(frame))
            }
            Err(FrameError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
