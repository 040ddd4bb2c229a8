//! Wired serial framing for the Meshtastic client API.
//!
//! Every `ToRadio`/`FromRadio` protobuf on the serial link is emitted as:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <protobuf bytes>`
//!
//! Anything outside a frame is the device's debug console output. The decoder below can be fed
//! arbitrary chunks, yields whole frames when available and keeps the console bytes aside so
//! they can be logged instead of silently dropped.
use bytes::{Buf, BytesMut};

use super::LinkError;

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
pub const HEADER_LEN: usize = 4;
/// Firmware limit for a single ToRadio/FromRadio payload.
pub const MAX_PAYLOAD: usize = 512;
/// Number of `START2` bytes written to wake the device's serial API before the first request.
pub const WAKE_LEN: usize = 32;

/// Prefix `payload` with the 4-byte wired serial header.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, LinkError> {
    let len = payload.len();
    if len > MAX_PAYLOAD {
        return Err(LinkError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD,
        });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + len);
    out.push(START1);
    out.push(START2);
    out.push(((len >> 8) & 0xFF) as u8);
    out.push((len & 0xFF) as u8);
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn wake_sequence() -> [u8; WAKE_LEN] {
    [START2; WAKE_LEN]
}

/// Incremental decoder for the wired serial framing.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    console: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            console: Vec::new(),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete frame payload, if one is buffered. Bytes that cannot start a
    /// frame are moved to the console buffer; a header declaring an impossible length is
    /// treated as noise and skipped one byte at a time.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.buf.iter().position(|&b| b == START1) {
                None => {
                    self.console.extend_from_slice(&self.buf);
                    self.buf.clear();
                    return None;
                }
                Some(pos) if pos > 0 => {
                    self.console.extend_from_slice(&self.buf[..pos]);
                    self.buf.advance(pos);
                }
                Some(_) => {}
            }
            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != START2 {
                self.console.push(self.buf[0]);
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let declared = ((self.buf[2] as usize) << 8) | (self.buf[3] as usize);
            if declared == 0 || declared > MAX_PAYLOAD {
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }
            self.buf.advance(HEADER_LEN);
            return Some(self.buf.split_to(declared).to_vec());
        }
    }

    /// Drain console text collected so far.
    pub fn take_console_text(&mut self) -> Option<String> {
        if self.console.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.console);
        Some(String::from_utf8_lossy(&raw).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_split_across_reads_is_reassembled() {
        let frame = encode_frame(&[0x38, 0x2a]).unwrap();
        let mut dec = FrameDecoder::new();
        dec.push(&frame[..3]);
        assert!(dec.next_frame().is_none());
        dec.push(&frame[3..]);
        assert_eq!(dec.next_frame(), Some(vec![0x38, 0x2a]));
        assert!(dec.next_frame().is_none());
    }

    #[test]
    fn console_text_is_kept_apart_from_frames() {
        let mut stream = b"INFO | boot ok\r\n".to_vec();
        stream.extend(encode_frame(&[0x01, 0x02, 0x03]).unwrap());
        stream.extend_from_slice(b"DEBUG | tail");
        let mut dec = FrameDecoder::new();
        dec.push(&stream);
        assert_eq!(dec.next_frame(), Some(vec![0x01, 0x02, 0x03]));
        assert!(dec.next_frame().is_none());
        assert_eq!(
            dec.take_console_text().as_deref(),
            Some("INFO | boot ok\r\nDEBUG | tail")
        );
        assert!(dec.take_console_text().is_none());
    }

    #[test]
    fn lone_start_byte_in_text_does_not_stall_decoder() {
        let mut stream = vec![b'a', START1, b'b'];
        stream.extend(encode_frame(&[0x07]).unwrap());
        let mut dec = FrameDecoder::new();
        dec.push(&stream);
        assert_eq!(dec.next_frame(), Some(vec![0x07]));
    }

    #[test]
    fn oversized_header_is_skipped() {
        let mut stream = vec![START1, START2, 0x7F, 0xFF];
        stream.extend(encode_frame(&[0x09]).unwrap());
        let mut dec = FrameDecoder::new();
        dec.push(&stream);
        assert_eq!(dec.next_frame(), Some(vec![0x09]));
    }

    #[test]
    fn encode_rejects_payload_over_firmware_limit() {
        let err = encode_frame(&vec![0u8; MAX_PAYLOAD + 1]).unwrap_err();
        assert!(matches!(
            err,
            LinkError::PayloadTooLarge { len, max } if len == MAX_PAYLOAD + 1 && max == MAX_PAYLOAD
        ));
        assert_eq!(encode_frame(&vec![0u8; MAX_PAYLOAD]).unwrap().len(), HEADER_LEN + MAX_PAYLOAD);
    }

    #[test]
    fn header_carries_big_endian_length() {
        let frame = encode_frame(&vec![0xAB; 300]).unwrap();
        assert_eq!(&frame[..4], &[START1, START2, 0x01, 0x2C]);
    }

    #[test]
    fn wake_sequence_is_start2_bytes() {
        assert!(wake_sequence().iter().all(|&b| b == START2));
        assert_eq!(wake_sequence().len(), 32);
    }
}
