//! PCM helpers shared by the bridge and the backend
//!
//! Discord delivers decoded voice as 48kHz interleaved stereo i16; the backend
//! works on 16kHz mono i16.

/// Discord voice sample rate (Hz)
pub const DISCORD_SAMPLE_RATE: u32 = 48_000;

/// Discord voice channel count
pub const DISCORD_CHANNELS: u16 = 2;

/// i16 samples to little-endian bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Little-endian bytes to i16 samples; a trailing odd byte is ignored
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Average interleaved stereo down to mono
pub fn stereo_to_mono(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks(2)
        .map(|chunk| {
            if chunk.len() == 2 {
                ((chunk[0] as i32 + chunk[1] as i32) / 2) as i16
            } else {
                chunk[0]
            }
        })
        .collect()
}

/// Whether Discord audio can be converted to this format by [`discord_to`]
pub fn is_capture_format_supported(sample_rate: u32, channels: u16) -> bool {
    sample_rate != 0 && DISCORD_SAMPLE_RATE % sample_rate == 0 && matches!(channels, 1 | 2)
}

/// Convert Discord 48kHz stereo to `sample_rate`/`channels` by decimation
///
/// Returns `None` for formats rejected by [`is_capture_format_supported`].
pub fn discord_to(samples: &[i16], sample_rate: u32, channels: u16) -> Option<Vec<i16>> {
    if !is_capture_format_supported(sample_rate, channels) {
        return None;
    }
    let step = (DISCORD_SAMPLE_RATE / sample_rate) as usize;
    let out = match channels {
        1 => stereo_to_mono(samples).into_iter().step_by(step).collect(),
        _ => samples
            .chunks_exact(2)
            .step_by(step)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    };
    Some(out)
}

/// Add `samples` into `acc` with saturation, growing `acc` as needed
pub fn mix_into(acc: &mut Vec<i16>, samples: &[i16]) {
    if acc.len() < samples.len() {
        acc.resize(samples.len(), 0);
    }
    for (a, &s) in acc.iter_mut().zip(samples) {
        *a = a.saturating_add(s);
    }
}

/// Root mean square of a block of samples
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Number of mono samples covering `ms` milliseconds at `sample_rate`
pub fn samples_for_ms(sample_rate: u32, ms: u64) -> usize {
    (sample_rate as u64 * ms / 1000) as usize
}

/// Duration in milliseconds of `count` mono samples at `sample_rate`
pub fn ms_for_samples(sample_rate: u32, count: usize) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    count as u64 * 1000 / sample_rate as u64
}
