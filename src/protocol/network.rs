//! # Network Framing
//!
//! Packets on the wire and the receive loop that drives them.
//!
//! ## Wire Format
//! One packet per frame. The frame body is run through the connection-wide
//! formatter, if any:
//! ```text
//! frame   = [length: u32 LE] [global_formatter(payload)]
//! payload = [packet id: u32 LE] [field 0] [field 1] ... [field N-1]
//! ```
//! When the packet type declares its own formatter, the identifier stays in the
//! clear and the fields become a nested block:
//! ```text
//! payload = [packet id: u32 LE] [length: u32 LE] [packet_formatter(fields)]
//! ```
//!
//! ## Receive loop
//! [`NetworkReader::run`] reads packets until the handler asks to stop, the
//! closed predicate turns true, or an error occurs. An error ends the session; it
//! counts as success only when the predicate is true by then, which is how an
//! expected shutdown racing a blocking read is told apart from a broken peer.

use bytes::BytesMut;
use futures::{Stream, StreamExt};
use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::core::formatter::{decode_with, encode_with, Formatter};
use crate::core::reducer::{check_layout, Fields};
use crate::core::stream::{StreamReader, StreamWriter};
use crate::core::value::{Value, LENGTH_PREFIX_SIZE};
use crate::error::{ProtocolError, Result};
use crate::protocol::packet::AnyPacket;
use crate::protocol::registry::PacketRegistry;
use crate::utils::metrics::WireMetrics;

/// Stage one packet payload (`[id][fields]`) in `stream`.
///
/// Nothing is staged on error.
///
/// # Errors
/// `Configuration` when the packet type is not registered or its fields do not
/// match the registered layout.
pub fn write_packet_payload<W: Write>(
    stream: &mut StreamWriter<W>,
    registry: &PacketRegistry,
    packet: &dyn AnyPacket,
) -> Result<u32> {
    let plan = registry.encode_plan(packet)?;
    packet.prepare_encode();
    let values = packet.packet_fields();
    check_layout(&plan.layout, &values)?;

    let mark = stream.staged().len();
    stream.write_u32(plan.id);
    let result = match plan.formatter.as_deref() {
        Some(formatter) => stream.encode_block(Some(formatter), |s| write_values(s, &values)),
        None => write_values(stream, &values),
    };
    if let Err(e) = result {
        stream.rollback(mark);
        return Err(e);
    }
    Ok(plan.id)
}

/// Read one packet payload from the reader's current cursor.
pub fn read_packet_payload<R: Read>(
    stream: &mut StreamReader<R>,
    registry: &PacketRegistry,
) -> Result<Box<dyn AnyPacket>> {
    let id = stream.read_u32()?;
    let plan = registry.decode_plan(id)?;
    let values = match plan.formatter.as_deref() {
        Some(formatter) => stream.decode_block(Some(formatter), |s| s.read_fields(&plan.layout))?,
        None => stream.read_fields(&plan.layout)?,
    };
    (plan.create)(Fields::new(values))
}

fn write_values<W: Write>(stream: &mut StreamWriter<W>, values: &[Value]) -> Result<()> {
    for value in values {
        stream.write_value(value)?;
    }
    Ok(())
}

fn ensure_consumed<R: Read>(stream: &StreamReader<R>) -> Result<()> {
    match stream.remaining() {
        0 => Ok(()),
        n => Err(ProtocolError::TrailingBytes(n)),
    }
}

/// Registry, connection-wide formatter and metrics shared by the writer and the
/// reader of a connection.
#[derive(Debug, Clone)]
pub struct Protocol {
    registry: Arc<PacketRegistry>,
    formatter: Option<Arc<dyn Formatter>>,
    metrics: Option<Arc<WireMetrics>>,
}

impl Protocol {
    pub fn new(registry: Arc<PacketRegistry>) -> Self {
        Self {
            registry,
            formatter: None,
            metrics: None,
        }
    }

    /// Formatter applied to every frame body.
    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<WireMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    pub fn formatter(&self) -> Option<&dyn Formatter> {
        self.formatter.as_deref()
    }

    pub fn metrics(&self) -> Option<&Arc<WireMetrics>> {
        self.metrics.as_ref()
    }

    /// Frame body for one packet: the formatted payload, without the length prefix.
    pub fn encode(&self, packet: &dyn AnyPacket) -> Result<Vec<u8>> {
        let mut stream = StreamWriter::new(io::sink(), true);
        write_packet_payload(&mut stream, &self.registry, packet)?;
        encode_with(self.formatter(), stream.take_staging())
    }

    /// Decode one frame body produced by [`encode`](Self::encode).
    pub fn decode(&self, body: &[u8]) -> Result<Box<dyn AnyPacket>> {
        let payload = decode_with(self.formatter(), body.to_vec())?;
        let mut stream = StreamReader::from_bytes(payload);
        let packet = read_packet_payload(&mut stream, &self.registry)?;
        ensure_consumed(&stream)?;
        Ok(packet)
    }

    /// Decide how a session that stopped on `error` ended, log it, and count it.
    pub(crate) fn finish_session(&self, error: ProtocolError, closed: bool) -> Result<()> {
        if closed {
            debug!(error = %error, "Receive loop ended by expected shutdown");
            if let Some(metrics) = &self.metrics {
                metrics.expected_close();
            }
            return Ok(());
        }
        if error.is_truncation() {
            error!(error = %error, "End of stream while receiving packets");
        } else {
            error!(error = %error, "Failed to receive packet");
        }
        if let Some(metrics) = &self.metrics {
            metrics.decode_failure();
        }
        Err(error)
    }

    fn record_received(&self, bytes: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.frame_received(bytes as u64);
            metrics.packet_received();
        }
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.frame_sent(bytes as u64);
            metrics.packet_sent();
        }
    }

    /// Receive packets from a stream of frame bodies until `shutdown` is cancelled,
    /// the handler breaks, or the session fails.
    ///
    /// Cancellation is observed between frames and while waiting for one.
    pub async fn receive<S, H>(
        &self,
        mut frames: S,
        shutdown: &CancellationToken,
        mut on_packet: H,
    ) -> Result<()>
    where
        S: Stream<Item = Result<BytesMut>> + Unpin,
        H: FnMut(Box<dyn AnyPacket>) -> Result<ControlFlow<()>>,
    {
        debug!("Receive loop started");
        loop {
            if shutdown.is_cancelled() {
                debug!("Receive loop stopped: closed");
                return Ok(());
            }

            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Receive loop cancelled while waiting for a frame");
                    return Ok(());
                }
                next = frames.next() => next,
            };

            let outcome = next
                .unwrap_or(Err(ProtocolError::UnexpectedEof))
                .and_then(|body| {
                    let packet = self.decode(&body)?;
                    self.record_received(body.len() + LENGTH_PREFIX_SIZE);
                    Ok(packet)
                })
                .and_then(&mut on_packet);

            match outcome {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    debug!("Receive loop stopped by handler");
                    return Ok(());
                }
                Err(e) => return self.finish_session(e, shutdown.is_cancelled()),
            }
        }
    }
}

/// Blocking packet writer over a `Write` transport.
pub struct NetworkWriter<W: Write> {
    stream: StreamWriter<W>,
    protocol: Protocol,
}

impl<W: Write> NetworkWriter<W> {
    pub fn new(transport: W, protocol: Protocol, owns_transport: bool) -> Self {
        Self {
            stream: StreamWriter::new(transport, owns_transport),
            protocol,
        }
    }

    /// Write one packet as one frame.
    ///
    /// # Errors
    /// `Configuration` for an unregistered packet or a layout mismatch; I/O
    /// errors of the transport.
    pub fn send(&mut self, packet: &dyn AnyPacket) -> Result<()> {
        let id = write_packet_payload(&mut self.stream, &self.protocol.registry, packet)?;
        let written = match self.stream.flush_frame(self.protocol.formatter()) {
            Ok(written) => written,
            Err(e) => {
                self.stream.take_staging();
                return Err(e);
            }
        };
        self.protocol.record_sent(written);
        debug!(packet_id = id, bytes = written, "Packet sent");
        Ok(())
    }

    pub fn close(&mut self) -> Option<W> {
        self.stream.close()
    }
}

/// Blocking packet reader over a `Read` transport.
pub struct NetworkReader<R: Read> {
    stream: StreamReader<R>,
    protocol: Protocol,
}

impl<R: Read> NetworkReader<R> {
    pub fn new(transport: R, protocol: Protocol, owns_transport: bool) -> Self {
        Self {
            stream: StreamReader::new(transport, owns_transport),
            protocol,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.stream = self.stream.with_max_frame_size(max_frame_size);
        self
    }

    /// Read exactly one packet (one frame).
    pub fn read_packet(&mut self) -> Result<Box<dyn AnyPacket>> {
        let len = self.stream.read_frame(self.protocol.formatter())?;
        let packet = read_packet_payload(&mut self.stream, &self.protocol.registry)?;
        ensure_consumed(&self.stream)?;
        self.protocol.record_received(len + LENGTH_PREFIX_SIZE);
        Ok(packet)
    }

    /// Receive loop. Returns `true` when the session ended normally: the closed
    /// predicate was true, the handler broke, or an error hit an already closed
    /// session. Returns `false` when the session failed.
    pub fn run<C, H>(&mut self, is_closed: C, on_packet: H) -> bool
    where
        C: FnMut() -> bool,
        H: FnMut(Box<dyn AnyPacket>) -> Result<ControlFlow<()>>,
    {
        self.run_session(is_closed, on_packet).is_ok()
    }

    /// Like [`run`](Self::run), but hands back the error that failed the session.
    pub fn run_session<C, H>(&mut self, mut is_closed: C, mut on_packet: H) -> Result<()>
    where
        C: FnMut() -> bool,
        H: FnMut(Box<dyn AnyPacket>) -> Result<ControlFlow<()>>,
    {
        debug!("Receive loop started");
        loop {
            if is_closed() {
                debug!("Receive loop stopped: closed");
                return Ok(());
            }

            match self.read_packet().and_then(&mut on_packet) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    debug!("Receive loop stopped by handler");
                    return Ok(());
                }
                Err(e) => return self.protocol.finish_session(e, is_closed()),
            }
        }
    }

    pub fn close(&mut self) -> Option<R> {
        self.stream.close()
    }
}
