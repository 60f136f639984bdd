//! Multi-frame message assembly.
//!
//! [`MessageAssembler`] turns a stream of writes into an ordered list of
//! frames that share one packet type.
//!
//! - **Ordered** writes may split anywhere: when the current frame fills up
//!   the rest of the write continues in the next one. Ordered frames carry
//!   message fields so the receiver can put the message back together.
//! - **Unordered** writes (reliable or not) are delivered frame by frame, so
//!   a *segment* (one atomic write, bracketed by
//!   [`start_segment`](MessageAssembler::start_segment) and
//!   [`end_segment`](MessageAssembler::end_segment)) must never straddle two
//!   frames. A segment that outgrows the current frame is moved whole into a
//!   fresh one; a segment that cannot fit even an empty frame is rejected.
//!
//! # Example
//!
//! ```
//! use tessera_core::{DeliveryMode, MessageAssembler, PacketType};
//!
//! let mut assembler = MessageAssembler::new(PacketType::EntityData, DeliveryMode::Ordered);
//! assembler.write(&vec![7u8; 3000]).unwrap();
//! assembler.close_current_packet(false);
//! let frames = assembler.prepare_packets(1);
//! assert_eq!(frames.len(), 3);
//! ```

use crate::error::FrameError;
use crate::frame::{Frame, PacketPosition};
use crate::payload::{Endian, WireValue, encode_utf16_string};
use crate::protocol::PacketType;

/// Delivery guarantees requested for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Fire and forget
    #[default]
    Unreliable,
    /// Reliable, each frame handled on its own
    Reliable,
    /// Reliable and reassembled in order
    Ordered,
}

impl DeliveryMode {
    /// Whether frames carry the reliable flag
    #[must_use]
    pub fn is_reliable(self) -> bool {
        !matches!(self, Self::Unreliable)
    }

    /// Whether frames carry message fields
    #[must_use]
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::Ordered)
    }
}

/// Builder for the frames of one logical message
#[derive(Debug)]
pub struct MessageAssembler {
    packet_type: PacketType,
    mode: DeliveryMode,
    extended_header: Vec<u8>,
    frames: Vec<Frame>,
    current: Option<Frame>,
    segment_start: Option<usize>,
}

impl MessageAssembler {
    /// Empty assembler for `packet_type`
    #[must_use]
    pub fn new(packet_type: PacketType, mode: DeliveryMode) -> Self {
        Self {
            packet_type,
            mode,
            extended_header: Vec::new(),
            frames: Vec::new(),
            current: None,
            segment_start: None,
        }
    }

    /// Bytes repeated at the start of every frame created from now on.
    ///
    /// # Errors
    /// Returns [`FrameError::ExtendedHeaderTooLarge`] if nothing else would fit
    pub fn set_extended_header(&mut self, header: Vec<u8>) -> Result<(), FrameError> {
        if header.len() >= self.frame_capacity() {
            return Err(FrameError::ExtendedHeaderTooLarge(header.len()));
        }
        self.extended_header = header;
        Ok(())
    }

    /// Packet type of every frame
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Delivery mode
    #[must_use]
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Payload capacity of an empty frame, extended header included
    #[must_use]
    pub fn frame_capacity(&self) -> usize {
        crate::frame::payload_capacity(self.packet_type, self.mode.is_ordered())
    }

    /// Room for message bytes in a fresh frame
    #[must_use]
    pub fn max_segment_size(&self) -> usize {
        self.frame_capacity() - self.extended_header.len()
    }

    /// Frames closed so far plus the open one
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len() + usize::from(self.current.is_some())
    }

    /// Message bytes written so far, extended headers excluded
    #[must_use]
    pub fn message_size(&self) -> usize {
        let header = self.extended_header.len();
        self.frames
            .iter()
            .chain(self.current.iter())
            .map(|f| f.payload().len().saturating_sub(header))
            .sum()
    }

    /// Frames closed so far
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Mark the start of an atomic write. Ignored in ordered mode.
    pub fn start_segment(&mut self) {
        if self.mode.is_ordered() {
            return;
        }
        self.segment_start = Some(
            self.current
                .as_ref()
                .map_or(self.extended_header.len(), |f| f.payload().len()),
        );
    }

    /// Mark the end of the atomic write
    pub fn end_segment(&mut self) {
        self.segment_start = None;
    }

    /// Append bytes to the message.
    ///
    /// In unordered mode a write made outside any segment is treated as a
    /// segment of its own: it is never split across frames.
    ///
    /// # Errors
    /// In unordered mode, returns [`FrameError::OversizedSegment`] when the
    /// open segment, or a write outside a segment, is larger than an empty
    /// frame. The open segment's bytes are removed and every frame closed
    /// before it is left as it was.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, FrameError> {
        if self.mode.is_ordered() {
            self.write_split(data);
        } else {
            self.write_atomic(data)?;
        }
        Ok(data.len())
    }

    /// Append one primitive.
    ///
    /// # Errors
    /// See [`write`](Self::write)
    pub fn write_value<T: WireValue>(&mut self, value: T, endian: Endian) -> Result<(), FrameError> {
        let mut buf = [0u8; 8];
        value.put(&mut buf[..T::WIDTH], endian);
        self.write(&buf[..T::WIDTH]).map(|_| ())
    }

    /// Append a length-prefixed UTF-16 string; `None` writes the null marker.
    ///
    /// # Errors
    /// See [`write`](Self::write)
    pub fn write_string(&mut self, value: Option<&str>) -> Result<(), FrameError> {
        self.write(&encode_utf16_string(value)).map(|_| ())
    }

    fn write_split(&mut self, data: &[u8]) {
        let mut rest = data;
        loop {
            let frame = self.current_frame();
            let room = frame.bytes_available_for_write();
            if rest.len() <= room {
                // cannot fail: length checked against the room left
                let _ = frame.write(rest);
                return;
            }
            let (head, tail) = rest.split_at(room);
            let _ = frame.write(head);
            rest = tail;
            self.close_current_packet(false);
        }
    }

    fn write_atomic(&mut self, data: &[u8]) -> Result<(), FrameError> {
        let capacity = self.max_segment_size();
        let open_segment = match (self.segment_start, self.current.as_ref()) {
            (Some(start), Some(frame)) => frame.payload().len() - start,
            _ => 0,
        };
        let atomic_len = open_segment + data.len();
        if atomic_len > capacity {
            if let (Some(start), Some(frame)) = (self.segment_start.take(), self.current.as_mut()) {
                frame.payload_mut().truncate(start);
            }
            tracing::debug!(
                "Rejecting {} byte segment for {:?}, frame capacity {}",
                atomic_len,
                self.packet_type,
                capacity
            );
            return Err(FrameError::OversizedSegment {
                len: atomic_len,
                capacity,
            });
        }

        let fits = self
            .current
            .as_ref()
            .is_none_or(|f| f.bytes_available_for_write() >= data.len());
        if !fits {
            let mut fresh = self.fresh_frame();
            if let (Some(start), Some(frame)) = (self.segment_start, self.current.as_mut()) {
                let moved = frame.payload_mut().split_off(start);
                let _ = fresh.write(&moved);
                self.segment_start = Some(self.extended_header.len());
            }
            if let Some(full) = self.current.replace(fresh) {
                self.frames.push(full);
            }
        }

        let _ = self.current_frame().write(data);
        Ok(())
    }

    fn current_frame(&mut self) -> &mut Frame {
        let (packet_type, mode, header) = (self.packet_type, self.mode, &self.extended_header);
        self.current
            .get_or_insert_with(|| new_frame(packet_type, mode, header))
    }

    fn fresh_frame(&self) -> Frame {
        new_frame(self.packet_type, self.mode, &self.extended_header)
    }

    /// Move the open frame to the output list.
    ///
    /// With `send_empty_if_none`, an empty message still produces one
    /// header-only frame.
    pub fn close_current_packet(&mut self, send_empty_if_none: bool) {
        self.segment_start = None;
        if let Some(frame) = self.current.take() {
            self.frames.push(frame);
        } else if send_empty_if_none && self.frames.is_empty() {
            let frame = self.fresh_frame();
            self.frames.push(frame);
        }
    }

    /// Stamp every frame with `message_number` and its position, then hand
    /// the frames over. Frames of unordered messages carry no message
    /// fields and come back unchanged.
    #[must_use]
    pub fn prepare_packets(&mut self, message_number: u32) -> Vec<Frame> {
        let mut frames = std::mem::take(&mut self.frames);
        let count = frames.len();
        for (index, frame) in frames.iter_mut().enumerate() {
            let position = match (count, index) {
                (1, _) => PacketPosition::Only,
                (_, 0) => PacketPosition::First,
                (n, i) if i == n - 1 => PacketPosition::Last,
                _ => PacketPosition::Middle,
            };
            frame.set_message(message_number, position, index as u32);
        }
        frames
    }

    /// Close the open frame and take every frame without message numbering
    #[must_use]
    pub fn finish(mut self) -> Vec<Frame> {
        self.close_current_packet(false);
        self.frames
    }
}

fn new_frame(packet_type: PacketType, mode: DeliveryMode, extended_header: &[u8]) -> Frame {
    let mut frame = Frame::new(packet_type, mode.is_reliable(), mode.is_ordered());
    // extended header length is checked against the frame capacity when set
    let _ = frame.write(extended_header);
    frame
}
