//! Wire-level properties of the frame codec, checked through the public API

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use voxbridge_core::{AudioChunk, AudioEncoding, FrameCodec, FrameError, RawFrame, VoiceFrame};

fn sample_payloads() -> Vec<(&'static str, Value)> {
    vec![
        ("start", json!({"sample_rate": 16000, "channels": 1})),
        ("text", json!({"text": "hello \u{1F3A4} world"})),
        ("end", json!({})),
        ("custom", json!([1, "two", null, {"three": 3.5}])),
        ("x", json!(null)),
        ("nested", json!({"a": {"b": {"c": [true, false]}}})),
    ]
}

#[test]
fn round_trip_preserves_type_and_payload() {
    for (frame_type, payload) in sample_payloads() {
        let encoded = FrameCodec::encode(frame_type, &payload).unwrap();
        let (frame, consumed) = FrameCodec::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(frame, RawFrame::new(frame_type, payload));
    }
}

#[test]
fn concatenated_frames_decode_by_consumed_counts() {
    let mut buf = Vec::new();
    for (frame_type, payload) in sample_payloads() {
        buf.extend_from_slice(&FrameCodec::encode(frame_type, &payload).unwrap());
    }

    let mut offset = 0;
    let mut seen = Vec::new();
    while offset < buf.len() {
        let (frame, consumed) = FrameCodec::decode(&buf[offset..]).unwrap();
        offset += consumed;
        seen.push(frame.frame_type);
    }
    assert_eq!(offset, buf.len());
    assert_eq!(seen, vec!["start", "text", "end", "custom", "x", "nested"]);
}

#[test]
fn truncation_never_yields_a_frame() {
    for (frame_type, payload) in sample_payloads() {
        let encoded = FrameCodec::encode(frame_type, &payload).unwrap();
        for cut in 0..encoded.len() {
            assert!(
                matches!(
                    FrameCodec::decode(&encoded[..cut]),
                    Err(FrameError::Truncated { .. })
                ),
                "{} cut at {}",
                frame_type,
                cut
            );
        }
    }
}

#[test]
fn corrupted_json_is_malformed() {
    let encoded = FrameCodec::encode("text", &json!({"text": "hi"})).unwrap();
    let json_start = 8 + "text".len();
    let mut corrupted = encoded.to_vec();
    // Unbalance the object
    corrupted[encoded.len() - 1] = b',';
    assert!(matches!(
        FrameCodec::decode(&corrupted),
        Err(FrameError::Malformed(_))
    ));

    let mut corrupted = encoded.to_vec();
    corrupted[json_start + 1] = 0xC0;
    assert!(matches!(
        FrameCodec::decode(&corrupted),
        Err(FrameError::Malformed(_))
    ));
}

#[test]
fn start_frame_bytes_match_reference() {
    let encoded = FrameCodec::encode("start", &json!({"sample_rate": 16000, "channels": 1})).unwrap();
    let mut expected = vec![0x00, 0x00, 0x00, 0x05, 0x73, 0x74, 0x61, 0x72, 0x74];
    let text = br#"{"sample_rate": 16000, "channels": 1}"#;
    assert_eq!(text.len(), 37);
    expected.extend_from_slice(&37u32.to_be_bytes());
    expected.extend_from_slice(text);
    assert_eq!(encoded.as_ref(), expected.as_slice());
}

#[test]
fn audio_integer_list_survives_exactly() {
    let payload = json!({"data": [0, 0, 0, 0], "sample_rate": 16000, "channels": 1});
    let encoded = FrameCodec::encode("audio_input", &payload).unwrap();
    let frame = FrameCodec::decode_exact(&encoded).unwrap();
    assert_eq!(frame.payload, payload);

    let typed = VoiceFrame::from_raw(&frame).unwrap();
    assert_eq!(
        typed,
        VoiceFrame::AudioInput(AudioChunk::new(vec![0, 0, 0, 0], 16000, 1))
    );
    assert_eq!(typed.encode(AudioEncoding::IntArray).unwrap(), encoded);
}

#[test]
fn arbitrary_finite_floats_round_trip_bit_for_bit() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut checked = 0;
    while checked < 20_000 {
        let value = f64::from_bits(rng.gen::<u64>());
        if !value.is_finite() {
            continue;
        }
        let payload = json!({"v": value, "list": [value, value / 3.0]});
        let encoded = FrameCodec::encode("x", &payload).unwrap();
        let frame = FrameCodec::decode_exact(&encoded).unwrap();
        let decoded = frame.payload["v"].as_f64().unwrap();
        assert_eq!(decoded.to_bits(), value.to_bits(), "{:e}", value);
        assert_eq!(frame.payload, payload);
        checked += 1;
    }
}

#[test]
fn non_finite_floats_fail_to_encode() {
    for payload in [
        gain_payload(f64::NAN),
        gain_payload(f64::INFINITY),
        gain_payload(f64::NEG_INFINITY),
    ] {
        assert!(matches!(
            FrameCodec::encode("x", &payload),
            Err(FrameError::Encoding(_))
        ));
    }
    assert!(matches!(
        FrameCodec::encode("x", &f64::NAN),
        Err(FrameError::Encoding(_))
    ));
    assert!(matches!(
        FrameCodec::encode("x", &vec![1.0, f64::INFINITY]),
        Err(FrameError::Encoding(_))
    ));
}

// serde_json::Value cannot hold NaN, so build the payload as a typed struct
fn gain_payload(value: f64) -> Gain {
    Gain { gain: value }
}

#[derive(serde::Serialize)]
struct Gain {
    gain: f64,
}
