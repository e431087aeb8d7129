//! Media payloads and their encodings.

use crate::error::{Result, RunlogError};

/// A media sample attached to a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Media<'a> {
    /// Mono samples in `-1.0..=1.0`, stored as 16-bit PCM WAV.
    Audio { samples: &'a [f32], sample_rate: u32 },
    /// An already encoded image (PNG, JPEG, ...).
    Image {
        encoded: &'a [u8],
        height: u32,
        width: u32,
        /// 1 grayscale, 2 grayscale + alpha, 3 RGB, 4 RGBA.
        colorspace: u32,
    },
}

impl Media<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Media::Audio { .. } => "audio",
            Media::Image { .. } => "image",
        }
    }
}

/// Convert f32 samples (-1.0..1.0) to i16 samples.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            (clamped * i16::MAX as f32) as i16
        })
        .collect()
}

/// Encode mono samples as 16-bit PCM WAV bytes using hound.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    if sample_rate == 0 {
        return Err(RunlogError::invalid_argument("audio sample rate must be positive"));
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| RunlogError::writer(format!("WAV write error: {e}")))?;
        for sample in f32_to_i16(samples) {
            writer
                .write_sample(sample)
                .map_err(|e| RunlogError::writer(format!("WAV sample write error: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| RunlogError::writer(format!("WAV finalize error: {e}")))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(&[0.0, 1.0, -1.0, 2.0]), vec![0, 32767, -32767, 32767]);
    }

    #[test]
    fn test_encode_wav_header_and_length() {
        let samples = vec![0.5f32; 100];
        let bytes = encode_wav(&samples, 16_000).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 44-byte canonical header + 2 bytes per sample
        assert_eq!(bytes.len(), 44 + 200);

        let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 100);
    }

    #[test]
    fn test_encode_wav_rejects_zero_rate() {
        assert!(encode_wav(&[0.0], 0).is_err());
    }
}
