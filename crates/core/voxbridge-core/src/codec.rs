//! Length-prefixed frame codec
//!
//! Every message exchanged with the backend is a two-field envelope:
//!
//! ```text
//! offset  size  field
//! 0       4     frame_type_length (u32, big-endian)
//! 4       N     frame_type (UTF-8)
//! 4+N     4     payload_length (u32, big-endian)
//! 8+N     M     payload (UTF-8 JSON)
//! ```
//!
//! The envelope carries its own lengths, so frames can be sent as discrete
//! WebSocket messages or concatenated in a single buffer. There is no checksum,
//! compression or version field.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;

use crate::error::FrameError;
use crate::json;

/// Size of each length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Smallest possible encoded frame (two empty length prefixes)
pub const MIN_FRAME_LEN: usize = LENGTH_PREFIX_LEN * 2;

/// An undecoded-by-kind frame: the type identifier and its JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Frame type identifier
    pub frame_type: String,
    /// Arbitrary JSON payload
    pub payload: Value,
}

impl RawFrame {
    /// Create a new raw frame
    pub fn new(frame_type: impl Into<String>, payload: Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            payload,
        }
    }
}

/// Stateless encoder/decoder for the frame envelope
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame type and a serializable payload
    pub fn encode<T>(frame_type: &str, payload: &T) -> Result<Bytes, FrameError>
    where
        T: ?Sized + Serialize,
    {
        if frame_type.is_empty() {
            return Err(FrameError::encoding("frame type must not be empty"));
        }

        let payload_bytes = json::to_vec(payload)
            .map_err(|e| FrameError::encoding(format!("payload is not JSON-serializable: {}", e)))?;

        let type_len = field_len(frame_type.len(), "frame type")?;
        let payload_len = field_len(payload_bytes.len(), "payload")?;

        let mut buf = BytesMut::with_capacity(Self::encoded_len(frame_type, payload_bytes.len()));
        buf.put_u32(type_len);
        buf.put_slice(frame_type.as_bytes());
        buf.put_u32(payload_len);
        buf.put_slice(&payload_bytes);

        Ok(buf.freeze())
    }

    /// Encode an already assembled [`RawFrame`]
    pub fn encode_raw(frame: &RawFrame) -> Result<Bytes, FrameError> {
        Self::encode(&frame.frame_type, &frame.payload)
    }

    /// Decode one frame from the front of `buf`
    ///
    /// Returns the frame and the number of bytes it occupied. Bytes after the
    /// frame are left untouched for the caller.
    pub fn decode(buf: &[u8]) -> Result<(RawFrame, usize), FrameError> {
        let (type_bytes, offset) = read_field(buf, 0)?;
        let (payload_bytes, consumed) = read_field(buf, offset)?;

        let frame_type = std::str::from_utf8(type_bytes)
            .map_err(|e| FrameError::malformed(format!("frame type is not valid UTF-8: {}", e)))?;
        if frame_type.is_empty() {
            return Err(FrameError::malformed("frame type is empty"));
        }

        let payload_text = std::str::from_utf8(payload_bytes)
            .map_err(|e| FrameError::malformed(format!("payload is not valid UTF-8: {}", e)))?;
        let payload: Value = serde_json::from_str(payload_text)
            .map_err(|e| FrameError::malformed(format!("payload is not valid JSON: {}", e)))?;

        Ok((RawFrame::new(frame_type, payload), consumed))
    }

    /// Decode a buffer that must contain exactly one frame
    pub fn decode_exact(buf: &[u8]) -> Result<RawFrame, FrameError> {
        let (frame, consumed) = Self::decode(buf)?;
        if consumed != buf.len() {
            return Err(FrameError::malformed(format!(
                "trailing bytes: frame is {} bytes, buffer is {}",
                consumed,
                buf.len()
            )));
        }
        Ok(frame)
    }

    /// Iterate over a concatenation of frames
    pub fn frames(buf: &[u8]) -> Frames<'_> {
        Frames {
            buf,
            offset: 0,
            failed: false,
        }
    }

    /// Encoded size of a frame without building it
    pub fn encoded_len(frame_type: &str, payload_len: usize) -> usize {
        MIN_FRAME_LEN + frame_type.len() + payload_len
    }
}

/// Iterator returned by [`FrameCodec::frames`]
///
/// Stops after the first error.
#[derive(Debug)]
pub struct Frames<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Frames<'a> {
    /// Bytes consumed so far
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<RawFrame, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match FrameCodec::decode(&self.buf[self.offset..]) {
            Ok((frame, consumed)) => {
                self.offset += consumed;
                Some(Ok(frame))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn field_len(len: usize, what: &str) -> Result<u32, FrameError> {
    u32::try_from(len)
        .map_err(|_| FrameError::encoding(format!("{} is too long: {} bytes", what, len)))
}

/// Read a length-prefixed field starting at `offset`; returns the field bytes
/// and the offset just past them.
fn read_field(buf: &[u8], offset: usize) -> Result<(&[u8], usize), FrameError> {
    let prefix_end = offset + LENGTH_PREFIX_LEN;
    if buf.len() < prefix_end {
        return Err(FrameError::Truncated {
            needed: prefix_end,
            available: buf.len(),
        });
    }

    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    prefix.copy_from_slice(&buf[offset..prefix_end]);
    let declared = u32::from_be_bytes(prefix) as usize;

    let field_end = prefix_end
        .checked_add(declared)
        .ok_or_else(|| FrameError::malformed("declared field length overflows"))?;
    if buf.len() < field_end {
        return Err(FrameError::Truncated {
            needed: field_end,
            available: buf.len(),
        });
    }

    Ok((&buf[prefix_end..field_end], field_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_frame_layout() {
        let encoded = FrameCodec::encode("start", &json!({"sample_rate": 16000, "channels": 1})).unwrap();
        let text = br#"{"sample_rate": 16000, "channels": 1}"#;

        assert_eq!(&encoded[..4], &[0, 0, 0, 5]);
        assert_eq!(&encoded[4..9], b"start");
        assert_eq!(&encoded[9..13], &(text.len() as u32).to_be_bytes());
        assert_eq!(&encoded[13..], &text[..]);
        assert_eq!(encoded.len(), 8 + 5 + text.len());

        let (frame, consumed) = FrameCodec::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(frame.frame_type, "start");
        assert_eq!(frame.payload, json!({"sample_rate": 16000, "channels": 1}));
    }

    #[test]
    fn test_audio_list_survives_exactly() {
        let payload = json!({"data": [0, 0, 0, 0], "sample_rate": 16000, "channels": 1});
        let encoded = FrameCodec::encode("audio_input", &payload).unwrap();
        let frame = FrameCodec::decode_exact(&encoded).unwrap();
        assert_eq!(frame.payload["data"], json!([0, 0, 0, 0]));
        assert!(frame.payload["data"][0].is_u64());
    }

    #[test]
    fn test_empty_frame_type_rejected() {
        let err = FrameCodec::encode("", &json!({})).unwrap_err();
        assert!(matches!(err, FrameError::Encoding(_)));
    }

    #[test]
    fn test_unserializable_payload_rejected() {
        let mut map = std::collections::HashMap::new();
        map.insert((1, 2), "tuple keys are not JSON");
        let err = FrameCodec::encode("text", &map).unwrap_err();
        assert!(matches!(err, FrameError::Encoding(_)));
    }

    #[test]
    fn test_every_truncation_is_detected() {
        let encoded = FrameCodec::encode("text", &json!({"text": "hello"})).unwrap();
        for cut in 0..encoded.len() {
            match FrameCodec::decode(&encoded[..cut]) {
                Err(FrameError::Truncated { needed, available }) => {
                    assert_eq!(available, cut);
                    assert!(needed > cut);
                }
                other => panic!("cut at {} produced {:?}", cut, other),
            }
        }
    }

    #[test]
    fn test_corrupt_json_is_malformed() {
        let mut encoded = FrameCodec::encode("text", &json!({"text": "hello"})).unwrap().to_vec();
        let json_start = 8 + "text".len();
        encoded[json_start] = b'#';
        let err = FrameCodec::decode(&encoded).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn test_invalid_utf8_payload_is_malformed() {
        let mut encoded = FrameCodec::encode("text", &json!("ab")).unwrap().to_vec();
        let last = encoded.len() - 2;
        encoded[last] = 0xFF;
        let err = FrameCodec::decode(&encoded).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn test_decode_exact_rejects_trailing_bytes() {
        let mut encoded = FrameCodec::encode("end", &json!({})).unwrap().to_vec();
        encoded.push(0);
        let err = FrameCodec::decode_exact(&encoded).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn test_concatenated_frames_decode_in_order() {
        let first = FrameCodec::encode("start", &json!({"sample_rate": 48000})).unwrap();
        let second = FrameCodec::encode("end", &json!({})).unwrap();
        let mut joined = first.to_vec();
        joined.extend_from_slice(&second);

        let (a, used) = FrameCodec::decode(&joined).unwrap();
        assert_eq!(used, first.len());
        let (b, used_b) = FrameCodec::decode(&joined[used..]).unwrap();
        assert_eq!(used + used_b, joined.len());
        assert_eq!(a.frame_type, "start");
        assert_eq!(b.frame_type, "end");

        let all: Vec<_> = FrameCodec::frames(&joined).collect::<Result<_, _>>().unwrap();
        assert_eq!(all, vec![a, b]);
    }

    #[test]
    fn test_frames_iterator_stops_on_error() {
        let good = FrameCodec::encode("end", &json!({})).unwrap();
        let mut joined = good.to_vec();
        joined.extend_from_slice(&[0, 0, 0]);

        let mut iter = FrameCodec::frames(&joined);
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(iter.next(), Some(Err(FrameError::Truncated { .. }))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_encoded_len_matches() {
        let payload = json!({"text": "hi"});
        let encoded = FrameCodec::encode("text", &payload).unwrap();
        let json_len = crate::json::to_vec(&payload).unwrap().len();
        assert_eq!(FrameCodec::encoded_len("text", json_len), encoded.len());
    }
}
