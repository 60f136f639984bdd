//! Received messages.
//!
//! A [`ReceivedMessage`] is what listeners get: one frame, or the
//! accumulated payload of every frame of a multi-frame message in arrival
//! order. It owns a [`Payload`] and exposes the same cursor reads.

use std::time::Instant;

use tessera_transport::SocketAddress;

use crate::error::FrameError;
use crate::frame::{Frame, LocalId};
use crate::payload::{Endian, Payload, WireValue};
use crate::protocol::PacketType;

/// Inbound message, possibly spanning several frames
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    packet_type: PacketType,
    version: u8,
    source_id: Option<LocalId>,
    sender: SocketAddress,
    message_number: Option<u32>,
    num_frames: usize,
    complete: bool,
    first_receive_time: Instant,
    payload: Payload,
}

impl ReceivedMessage {
    /// Start a message from its first frame.
    ///
    /// The message is complete at once when the frame is not part of a
    /// larger message or is tagged `Only`/`Last`.
    #[must_use]
    pub fn from_frame(frame: Frame, sender: SocketAddress, now: Instant) -> Self {
        let message = frame.message();
        let complete = message.is_none_or(|m| m.position.ends_message());
        Self {
            packet_type: frame.packet_type(),
            version: frame.version(),
            source_id: frame.source_id(),
            sender,
            message_number: message.map(|m| m.number),
            num_frames: 1,
            complete,
            first_receive_time: now,
            payload: frame.into_payload(),
        }
    }

    /// Append the payload of the next frame.
    ///
    /// # Errors
    /// Returns [`FrameError::MessageComplete`] once the last frame is in
    pub fn append(&mut self, frame: Frame) -> Result<(), FrameError> {
        if self.complete {
            return Err(FrameError::MessageComplete);
        }
        if frame.message().is_none_or(|m| m.position.ends_message()) {
            self.complete = true;
        }
        self.payload.extend(frame.payload().as_slice());
        self.num_frames += 1;
        Ok(())
    }

    /// Packet type
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Version byte of the first frame
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Embedded source id of the first frame
    #[must_use]
    pub fn source_id(&self) -> Option<LocalId> {
        self.source_id
    }

    /// Address the frames came from
    #[must_use]
    pub fn sender(&self) -> SocketAddress {
        self.sender
    }

    /// Message number, for multi-frame messages
    #[must_use]
    pub fn message_number(&self) -> Option<u32> {
        self.message_number
    }

    /// Frames accumulated so far
    #[must_use]
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Whether the final frame has been appended
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// When the first frame arrived
    #[must_use]
    pub fn first_receive_time(&self) -> Instant {
        self.first_receive_time
    }

    /// Accumulated payload
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Accumulated payload, for cursor reads
    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    /// Size of the accumulated payload
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Read one primitive at the cursor.
    ///
    /// # Errors
    /// Returns [`FrameError::ReadPastEnd`] if it is not fully present
    pub fn read_value<T: WireValue>(&mut self, endian: Endian) -> Result<T, FrameError> {
        self.payload.read_value(endian)
    }

    /// Read `len` bytes at the cursor.
    ///
    /// # Errors
    /// Returns [`FrameError::ReadPastEnd`] if fewer bytes remain
    pub fn read(&mut self, len: usize) -> Result<&[u8], FrameError> {
        self.payload.read(len)
    }
}
