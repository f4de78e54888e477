//! WebSocket frame codec.
//!
//! Only what the push channel needs: single, final text frames with 7-bit or
//! 16-bit payload lengths. Server frames are never masked; client frames are
//! unmasked on read. 64-bit lengths, continuation and ping/pong control
//! frames are not supported.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest payload a single frame may carry (16-bit extended length).
pub const MAX_PAYLOAD: usize = 65_535;

pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_CLOSE: u8 = 0x8;

const FIN: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("64-bit extended payload length is not supported")]
    Unsupported64BitLength,

    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD} byte frame limit")]
    PayloadTooLarge(usize),

    #[error("unsupported opcode {0:#x}")]
    UnsupportedOpcode(u8),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("socket read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Decoded fixed part of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: u8,
    pub mask: Option<[u8; 4]>,
    pub payload_len: usize,
    /// Bytes occupied by the header, including extended length and mask key.
    pub header_len: usize,
}

/// A frame read off the wire with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl InboundFrame {
    pub fn is_close(&self) -> bool {
        self.opcode == OPCODE_CLOSE
    }

    pub fn into_text(self) -> Result<String, FrameError> {
        if self.opcode != OPCODE_TEXT {
            return Err(FrameError::UnsupportedOpcode(self.opcode));
        }
        String::from_utf8(self.payload).map_err(|_| FrameError::InvalidUtf8)
    }
}

fn need(buf: &[u8], needed: usize) -> Result<(), FrameError> {
    if buf.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Parse the header at the start of `buf`.
pub fn parse_header(buf: &[u8]) -> Result<FrameHeader, FrameError> {
    need(buf, 2)?;
    let fin = buf[0] & FIN != 0;
    let opcode = buf[0] & 0x0F;
    let masked = buf[1] & MASK_BIT != 0;

    let (payload_len, mut offset) = match buf[1] & 0x7F {
        LEN_64 => return Err(FrameError::Unsupported64BitLength),
        LEN_16 => {
            need(buf, 4)?;
            (usize::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        short => (usize::from(short), 2),
    };

    let mask = if masked {
        need(buf, offset + 4)?;
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    Ok(FrameHeader {
        fin,
        opcode,
        mask,
        payload_len,
        header_len: offset,
    })
}

/// XOR `payload` in place with the 4-byte mask key. Applying it twice restores the input.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Decode a complete text frame, returning `None` for anything unsupported or malformed.
pub fn decode(frame: &[u8]) -> Option<String> {
    decode_frame(frame).ok()
}

/// Decode a complete text frame.
pub fn decode_frame(frame: &[u8]) -> Result<String, FrameError> {
    let header = parse_header(frame)?;
    let end = header.header_len + header.payload_len;
    need(frame, end)?;

    let mut payload = frame[header.header_len..end].to_vec();
    if let Some(mask) = header.mask {
        apply_mask(&mut payload, mask);
    }

    InboundFrame {
        opcode: header.opcode,
        payload,
    }
    .into_text()
}

fn write_header(frame: &mut Vec<u8>, len: usize, masked: bool) -> Result<(), FrameError> {
    if len > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(len));
    }
    let mask_bit = if masked { MASK_BIT } else { 0 };
    frame.push(FIN | OPCODE_TEXT);
    if len < usize::from(LEN_16) {
        frame.push(mask_bit | len as u8);
    } else {
        frame.push(mask_bit | LEN_16);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    }
    Ok(())
}

/// Encode an unmasked server→client text frame.
pub fn encode_text(text: &str) -> Result<Vec<u8>, FrameError> {
    let payload = text.as_bytes();
    let mut frame = Vec::with_capacity(payload.len() + 4);
    write_header(&mut frame, payload.len(), false)?;
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Encode a masked client→server text frame.
pub fn encode_masked_text(text: &str, mask: [u8; 4]) -> Result<Vec<u8>, FrameError> {
    let payload = text.as_bytes();
    let mut frame = Vec::with_capacity(payload.len() + 8);
    write_header(&mut frame, payload.len(), true)?;
    frame.extend_from_slice(&mask);
    let start = frame.len();
    frame.extend_from_slice(payload);
    apply_mask(&mut frame[start..], mask);
    Ok(frame)
}

/// Read one frame from a stream.
///
/// Returns `Ok(None)` on a clean end-of-stream before a new frame starts.
/// A 64-bit length is reported as an error since the stream cannot be
/// resynchronized after it.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<InboundFrame>, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 14];
    match reader.read_exact(&mut head[..2]).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut len = 2;
    let extra = match head[1] & 0x7F {
        LEN_64 => return Err(FrameError::Unsupported64BitLength.into()),
        LEN_16 => 2,
        _ => 0,
    } + if head[1] & MASK_BIT != 0 { 4 } else { 0 };
    if extra > 0 {
        reader.read_exact(&mut head[2..2 + extra]).await?;
        len += extra;
    }

    let header = parse_header(&head[..len])?;
    let mut payload = vec![0u8; header.payload_len];
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = header.mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Some(InboundFrame {
        opcode: header.opcode,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text_of(len: usize) -> String {
        "abcdefghij".chars().cycle().take(len).collect()
    }

    #[test]
    fn test_encode_hello() {
        assert_eq!(
            encode_text("hello").unwrap(),
            vec![0x81, 0x05, b'h', b'e', b'l', b'l', b'o']
        );
    }

    #[test]
    fn test_length_boundaries_round_trip() {
        for len in [0, 1, 125, 126, 127, 65_535] {
            let text = text_of(len);
            let frame = encode_text(&text).unwrap();
            let expected_header = if len < 126 { 2 } else { 4 };
            assert_eq!(frame.len(), expected_header + len, "len {len}");
            assert_eq!(decode(&frame).as_deref(), Some(text.as_str()), "len {len}");
        }
    }

    #[test]
    fn test_extended_length_is_big_endian() {
        let frame = encode_text(&text_of(300)).unwrap();
        assert_eq!(&frame[..4], &[0x81, 126, 0x01, 0x2C]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let err = encode_text(&text_of(65_536)).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLarge(65_536));
    }

    #[test]
    fn test_64_bit_length_is_unsupported() {
        let mut frame = vec![0x81, 127, 0, 0, 0, 0, 0, 0, 0, 5];
        frame.extend_from_slice(b"hello");
        assert_eq!(decode(&frame), None);
        assert_eq!(
            decode_frame(&frame).unwrap_err(),
            FrameError::Unsupported64BitLength
        );

        let masked = [0x81, 0x80 | 127, 0, 0, 0, 0, 0, 0, 0, 5, 1, 2, 3, 4];
        assert_eq!(
            parse_header(&masked).unwrap_err(),
            FrameError::Unsupported64BitLength
        );
    }

    #[test]
    fn test_masked_client_frame_decodes() {
        let frame = encode_masked_text("move cube", [0x37, 0xfa, 0x21, 0x3d]).unwrap();
        assert_eq!(frame[1] & 0x80, 0x80);
        assert_eq!(decode(&frame).as_deref(), Some("move cube"));
    }

    #[test]
    fn test_rfc_masked_hello() {
        // RFC 6455 §5.7 single-frame masked text message
        let frame = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        assert_eq!(decode(&frame).as_deref(), Some("Hello"));
    }

    #[test]
    fn test_non_text_and_garbage_yield_none() {
        assert_eq!(decode(&[0x82, 0x01, 0xff]), None);
        assert_eq!(decode(&[0x88, 0x00]), None);
        assert_eq!(decode(&[0x81]), None);
        assert_eq!(decode(&[0x81, 0x05, b'h']), None);
        assert_eq!(decode(&[0x81, 0x02, 0xc3, 0x28]), None);
        assert_eq!(decode(&[]), None);
    }

    #[tokio::test]
    async fn test_read_frame_from_stream() {
        let mut bytes = encode_masked_text("first", [1, 2, 3, 4]).unwrap();
        bytes.extend(encode_masked_text(&text_of(200), [9, 8, 7, 6]).unwrap());
        bytes.extend([0x88, 0x80, 0, 0, 0, 0]);
        let mut reader = std::io::Cursor::new(bytes);

        let first = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.into_text().unwrap(), "first");
        let second = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(second.into_text().unwrap(), text_of(200));
        let close = read_frame(&mut reader).await.unwrap().unwrap();
        assert!(close.is_close());
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_64_bit_length() {
        let mut reader = std::io::Cursor::new(vec![0x81, 0xFF, 0, 0, 0, 0, 0, 0, 0, 1]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            ReadError::Frame(FrameError::Unsupported64BitLength)
        ));
    }

    proptest! {
        #[test]
        fn prop_text_round_trip(text in "\\PC{0,300}") {
            let frame = encode_text(&text).unwrap();
            prop_assert_eq!(decode(&frame), Some(text));
        }

        #[test]
        fn prop_masked_round_trip(text in "\\PC{0,300}", mask in any::<[u8; 4]>()) {
            let frame = encode_masked_text(&text, mask).unwrap();
            prop_assert_eq!(decode(&frame), Some(text));
        }

        #[test]
        fn prop_mask_is_involution(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            mask in any::<[u8; 4]>(),
        ) {
            let mut masked = payload.clone();
            apply_mask(&mut masked, mask);
            apply_mask(&mut masked, mask);
            prop_assert_eq!(masked, payload);
        }
    }
}
