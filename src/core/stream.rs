//! # Stream Reader / Writer
//!
//! Sequential typed reads and writes over a blocking transport.
//!
//! The writer serializes into an in-memory staging buffer. [`StreamWriter::flush_frame`]
//! runs the staged bytes through a formatter, prefixes them with a 4-byte length and
//! writes the result to the transport. The reader mirrors it:
//! [`StreamReader::read_frame`] reads one frame, removes the formatter, and makes the
//! result the cursor for subsequent typed reads.
//!
//! ## Frame Format
//! ```text
//! [length: u32 LE] [formatter output (length bytes)]
//! ```
//!
//! Typed helpers never touch the transport; only the frame operations do.
//!
//! ## Transport ownership
//! A wrapper built with `owns_transport = true` drops (and so closes) the transport
//! when it is closed or dropped. Otherwise [`close`](StreamWriter::close) hands the
//! transport back. Closing twice is a no-op.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::mem;
use tracing::trace;

use crate::config::MAX_FRAME_SIZE;
use crate::core::formatter::{decode_with, encode_with, Formatter};
use crate::core::reducer::{check_layout, Fields, Layout, Reducer};
use crate::core::value::{self, put_length, take, take_length, Value, ValueKind};
use crate::error::{ProtocolError, Result};

pub struct StreamWriter<W: Write> {
    transport: Option<W>,
    staging: BytesMut,
    owns_transport: bool,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(transport: W, owns_transport: bool) -> Self {
        Self {
            transport: Some(transport),
            staging: BytesMut::new(),
            owns_transport,
        }
    }

    pub fn owns_transport(&self) -> bool {
        self.owns_transport
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Bytes staged since the last flush.
    pub fn staged(&self) -> &[u8] {
        &self.staging
    }

    /// Remove and return the staged bytes without framing them.
    pub fn take_staging(&mut self) -> Vec<u8> {
        self.staging.split().to_vec()
    }

    /// Drop everything staged after `mark` (a previous `staged().len()`).
    pub(crate) fn rollback(&mut self, mark: usize) {
        self.staging.truncate(mark);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.staging.put_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.staging.put_u8(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.staging.put_u32_le(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.staging.put_i32_le(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.staging.put_u8(if v { 0x80 } else { 0x00 });
    }

    /// Length-prefixed UTF-8.
    pub fn write_text(&mut self, v: &str) -> Result<()> {
        put_length(&mut self.staging, v.len())?;
        self.staging.put_slice(v.as_bytes());
        Ok(())
    }

    pub fn write_value(&mut self, v: &Value) -> Result<()> {
        value::write_value(v, &mut self.staging)
    }

    /// Write values in order after checking them against `layout`.
    ///
    /// Nothing is staged on error.
    pub fn write_fields(&mut self, layout: &[ValueKind], values: &[Value]) -> Result<()> {
        check_layout(layout, values)?;
        let mark = self.staging.len();
        for v in values {
            if let Err(e) = self.write_value(v) {
                self.rollback(mark);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Write every field of a reducer in layout order.
    pub fn write_reducer<R: Reducer>(&mut self, reducer: &R) -> Result<()> {
        self.write_fields(&R::format(), &reducer.to_fields())
    }

    /// Stage `[u32 len][formatter(inner)]`, where `inner` is whatever `body` writes.
    ///
    /// Nothing is staged if `body` or the formatter fails.
    pub fn encode_block<F>(&mut self, formatter: Option<&dyn Formatter>, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let outer = mem::take(&mut self.staging);
        let result = body(self);
        let inner = mem::replace(&mut self.staging, outer);
        result?;

        let encoded = encode_with(formatter, inner.to_vec())?;
        put_length(&mut self.staging, encoded.len())?;
        self.staging.put_slice(&encoded);
        Ok(())
    }

    /// Format the staged bytes, write them as one frame, flush, and clear the staging buffer.
    ///
    /// Returns the number of bytes written, length prefix included.
    ///
    /// The staged bytes are kept when this fails. After an I/O error part of the
    /// frame may already be on the transport; use [`take_staging`](Self::take_staging)
    /// to discard them.
    pub fn flush_frame(&mut self, formatter: Option<&dyn Formatter>) -> Result<usize> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::ConnectionClosed)?;

        let body = encode_with(formatter, self.staging.to_vec())?;
        let mut frame = BytesMut::with_capacity(value::LENGTH_PREFIX_SIZE + body.len());
        put_length(&mut frame, body.len())?;
        frame.put_slice(&body);

        transport.write_all(&frame)?;
        transport.flush()?;
        self.staging.clear();
        trace!(bytes = frame.len(), "Frame written");
        Ok(frame.len())
    }

    /// Release the transport. Owned transports are dropped; borrowed ones are returned.
    pub fn close(&mut self) -> Option<W> {
        let mut transport = self.transport.take()?;
        let _ = transport.flush();
        if self.owns_transport {
            None
        } else {
            Some(transport)
        }
    }
}

impl<W: Write> Drop for StreamWriter<W> {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct StreamReader<R: Read> {
    transport: Option<R>,
    cursor: Bytes,
    owns_transport: bool,
    max_frame_size: usize,
}

impl StreamReader<io::Empty> {
    /// A reader over bytes already in memory, as if they were one decoded frame.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            transport: Some(io::empty()),
            cursor: bytes.into(),
            owns_transport: true,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl<R: Read> StreamReader<R> {
    pub fn new(transport: R, owns_transport: bool) -> Self {
        Self {
            transport: Some(transport),
            cursor: Bytes::new(),
            owns_transport,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Largest frame body accepted by [`read_frame`](Self::read_frame).
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn owns_transport(&self) -> bool {
        self.owns_transport
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Unread bytes in the current cursor.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Read one frame from the transport and make its decoded body the cursor.
    ///
    /// Returns the frame body length as read from the wire.
    ///
    /// # Errors
    /// - `UnexpectedEof` when the transport ends before a full frame
    /// - `OversizedFrame` when the declared length exceeds the limit (nothing is allocated)
    /// - any error of the formatter's decode
    pub fn read_frame(&mut self, formatter: Option<&dyn Formatter>) -> Result<usize> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::ConnectionClosed)?;

        let mut prefix = [0u8; value::LENGTH_PREFIX_SIZE];
        read_exact(transport, &mut prefix)?;
        let len = u32::from_le_bytes(prefix) as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(len));
        }

        let mut body = vec![0u8; len];
        read_exact(transport, &mut body)?;
        trace!(bytes = len, "Frame read");

        self.cursor = Bytes::from(decode_with(formatter, body)?);
        Ok(len)
    }

    pub fn read_raw(&mut self, n: usize) -> Result<Bytes> {
        take(&mut self.cursor, n)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(take(&mut self.cursor, 1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(take(&mut self.cursor, 4)?.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(take(&mut self.cursor, 4)?.get_i32_le())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? & 0x80 != 0)
    }

    pub fn read_text(&mut self) -> Result<String> {
        let len = take_length(&mut self.cursor)?;
        let raw = take(&mut self.cursor, len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn read_value(&mut self, kind: &ValueKind) -> Result<Value> {
        value::read_value(kind, &mut self.cursor)
    }

    /// Read one value per descriptor, in order.
    pub fn read_fields(&mut self, layout: &Layout) -> Result<Vec<Value>> {
        layout.iter().map(|kind| self.read_value(kind)).collect()
    }

    pub fn read_reducer<T: Reducer>(&mut self) -> Result<T> {
        let values = self.read_fields(&T::format())?;
        T::from_fields(Fields::new(values))
    }

    /// Read a `[u32 len][formatter(inner)]` block and run `body` against the decoded inner bytes.
    ///
    /// # Errors
    /// `TrailingBytes` if `body` leaves part of the inner block unread.
    pub fn decode_block<T, F>(&mut self, formatter: Option<&dyn Formatter>, body: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let len = take_length(&mut self.cursor)?;
        let raw = take(&mut self.cursor, len)?;
        let decoded = decode_with(formatter, raw.to_vec())?;

        let outer = mem::replace(&mut self.cursor, Bytes::from(decoded));
        let result = body(self);
        let inner = mem::replace(&mut self.cursor, outer);
        let value = result?;

        if inner.has_remaining() {
            return Err(ProtocolError::TrailingBytes(inner.remaining()));
        }
        Ok(value)
    }

    /// Release the transport. Owned transports are dropped; borrowed ones are returned.
    pub fn close(&mut self) -> Option<R> {
        let transport = self.transport.take()?;
        self.cursor = Bytes::new();
        if self.owns_transport {
            None
        } else {
            Some(transport)
        }
    }
}

impl<R: Read> Drop for StreamReader<R> {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_exact<R: Read>(transport: &mut R, buf: &mut [u8]) -> Result<()> {
    transport.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ProtocolError::UnexpectedEof,
        _ => ProtocolError::Io(e),
    })
}
