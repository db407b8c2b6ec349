// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame encoding and the streaming frame reader

use super::{checksum, ProtocolError, MAX_PAYLOAD};

/// Two-byte frame header
pub const HEADER: [u8; 2] = [0xFF, 0xAA];

/// One decoded (or to-be-encoded) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination id, only on shared-medium transports
    pub dest: Option<u8>,

    /// Packet type
    pub packet_type: u8,

    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a point-to-point frame (no destination byte)
    pub fn new(packet_type: u8, payload: Vec<u8>) -> Self {
        Self {
            dest: None,
            packet_type,
            payload,
        }
    }

    /// Address this frame to a robot on a shared medium
    pub fn with_dest(mut self, dest: u8) -> Self {
        self.dest = Some(dest);
        self
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge(self.payload.len()));
        }

        let mut buf = Vec::with_capacity(self.payload.len() + 6);
        buf.extend_from_slice(&HEADER);
        if let Some(dest) = self.dest {
            buf.push(dest);
        }
        buf.push(self.packet_type);
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf.push(checksum(&self.payload));

        Ok(buf)
    }
}

/// Reader state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    /// Waiting for 0xFF
    Header1,
    /// Waiting for 0xAA
    Header2,
    /// Waiting for destination byte
    Dest,
    /// Waiting for packet type
    Type,
    /// Waiting for payload length
    Length,
    /// Receiving payload
    Payload,
    /// Waiting for checksum
    Checksum,
}

/// Byte-at-a-time frame reader.
///
/// Any byte that breaks the header resets the reader, so it resynchronizes
/// on its own after noise or a lost boundary. Frames with a bad checksum,
/// or addressed to another destination, are dropped silently.
#[derive(Debug)]
pub struct FrameReader {
    state: ReaderState,

    /// Expected destination id (None for point-to-point links)
    expected_dest: Option<u8>,

    packet_dest: u8,
    packet_type: u8,
    length: usize,
    payload: Vec<u8>,

    /// Count of frames dropped on checksum or destination mismatch
    dropped: u64,
}

impl FrameReader {
    /// Reader for a point-to-point link
    pub fn new() -> Self {
        Self::with_dest(None)
    }

    /// Reader that expects a destination byte equal to `dest`
    pub fn with_dest(dest: Option<u8>) -> Self {
        Self {
            state: ReaderState::Header1,
            expected_dest: dest,
            packet_dest: 0,
            packet_type: 0,
            length: 0,
            payload: Vec::with_capacity(MAX_PAYLOAD),
            dropped: 0,
        }
    }

    /// Reset to the initial state, discarding any partial frame
    pub fn reset(&mut self) {
        self.state = ReaderState::Header1;
        self.packet_dest = 0;
        self.packet_type = 0;
        self.length = 0;
        self.payload.clear();
    }

    /// Frames dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Push one byte, returning a frame when one completes
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            ReaderState::Header1 => {
                if byte == HEADER[0] {
                    self.state = ReaderState::Header2;
                }
                None
            }

            ReaderState::Header2 => {
                self.state = if byte == HEADER[1] {
                    if self.expected_dest.is_some() {
                        ReaderState::Dest
                    } else {
                        ReaderState::Type
                    }
                } else if byte == HEADER[0] {
                    // 0xFF 0xFF 0xAA still starts a frame
                    ReaderState::Header2
                } else {
                    ReaderState::Header1
                };
                None
            }

            ReaderState::Dest => {
                self.packet_dest = byte;
                self.state = ReaderState::Type;
                None
            }

            ReaderState::Type => {
                self.packet_type = byte;
                self.state = ReaderState::Length;
                None
            }

            ReaderState::Length => {
                self.length = byte as usize;
                self.payload.clear();
                self.state = if self.length == 0 {
                    ReaderState::Checksum
                } else {
                    ReaderState::Payload
                };
                None
            }

            ReaderState::Payload => {
                self.payload.push(byte);
                if self.payload.len() >= self.length {
                    self.state = ReaderState::Checksum;
                }
                None
            }

            ReaderState::Checksum => {
                let dest_ok = match self.expected_dest {
                    Some(dest) => dest == self.packet_dest,
                    None => true,
                };

                let frame = if dest_ok && checksum(&self.payload) == byte {
                    Some(Frame {
                        dest: self.expected_dest,
                        packet_type: self.packet_type,
                        payload: std::mem::take(&mut self.payload),
                    })
                } else {
                    self.dropped += 1;
                    None
                };

                self.reset();
                frame
            }
        }
    }

    /// Push a buffer, collecting every completed frame
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|b| self.push(*b)).collect()
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = Frame::new(80, vec![12, 100]);
        let raw = frame.encode().unwrap();
        assert_eq!(raw, vec![0xFF, 0xAA, 80, 2, 12, 100, 112]);

        let raw = frame.with_dest(42).encode().unwrap();
        assert_eq!(raw, vec![0xFF, 0xAA, 42, 80, 2, 12, 100, 112]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let frame = Frame::new(80, vec![0u8; 300]);
        assert_eq!(
            frame.encode(),
            Err(ProtocolError::PayloadTooLarge(300))
        );
    }

    #[test]
    fn test_decode_single_frame() {
        let raw = Frame::new(5, vec![2, 0, 0, 0, 1, 50]).encode().unwrap();
        let mut reader = FrameReader::new();

        let frames = reader.feed(&raw);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].packet_type, 5);
        assert_eq!(frames[0].payload, vec![2, 0, 0, 0, 1, 50]);
    }

    #[test]
    fn test_empty_payload_frame() {
        let raw = Frame::new(7, Vec::new()).encode().unwrap();
        let mut reader = FrameReader::new();

        let frames = reader.feed(&raw);
        assert_eq!(frames, vec![Frame::new(7, Vec::new())]);
    }

    #[test]
    fn test_corrupted_payload_is_dropped() {
        let mut raw = Frame::new(80, vec![2, 3, 232, 0, 0, 0, 0])
            .encode()
            .unwrap();
        raw[5] ^= 0x01;

        let mut reader = FrameReader::new();
        assert!(reader.feed(&raw).is_empty());
        assert_eq!(reader.dropped(), 1);

        // Reader recovers for the next frame
        let good = Frame::new(7, Vec::new()).encode().unwrap();
        assert_eq!(reader.feed(&good).len(), 1);
    }

    #[test]
    fn test_destination_filter() {
        let mine = Frame::new(5, vec![1]).with_dest(12).encode().unwrap();
        let other = Frame::new(5, vec![1]).with_dest(13).encode().unwrap();

        let mut reader = FrameReader::with_dest(Some(12));
        assert!(reader.feed(&other).is_empty());

        let frames = reader.feed(&mine);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dest, Some(12));
    }

    #[test]
    fn test_resync_after_garbage() {
        let raw = Frame::new(80, vec![3, 3, 112, 0, 250]).encode().unwrap();

        let mut stream = vec![0x00, 0xFF, 0x13, 0xAA, 0xFF, 0xFF];
        stream.extend_from_slice(&raw);

        let mut reader = FrameReader::new();
        let frames = reader.feed(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![3, 3, 112, 0, 250]);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut stream = Frame::new(7, Vec::new()).encode().unwrap();
        stream.extend(Frame::new(1, vec![0, 0, 0, 5]).encode().unwrap());

        let mut reader = FrameReader::new();
        let frames = reader.feed(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].packet_type, 1);
    }
}
