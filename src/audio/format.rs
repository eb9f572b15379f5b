//! Sample encodings and float <-> raw byte conversion.
//!
//! Frames carry both normalized floats and the raw little-endian bytes of
//! the stream's encoding. Conversions here are exact inverses for integer
//! PCM: decoding the bytes of an encoded frame yields the same floats.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw sample encoding, always little-endian and mono.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// 8-bit unsigned (offset binary), as stored in WAV files.
    Pcm8,
    /// 16-bit signed.
    Pcm16,
    /// 24-bit signed, packed in 3 bytes.
    Pcm24,
    /// 32-bit signed.
    Pcm32,
    /// 32-bit IEEE float.
    Float32,
}

impl SampleEncoding {
    /// Bytes used by one sample.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleEncoding::Pcm8 => 1,
            SampleEncoding::Pcm16 => 2,
            SampleEncoding::Pcm24 => 3,
            SampleEncoding::Pcm32 | SampleEncoding::Float32 => 4,
        }
    }

    /// Pick the integer encoding for a bit depth, if supported.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            8 => Some(SampleEncoding::Pcm8),
            16 => Some(SampleEncoding::Pcm16),
            24 => Some(SampleEncoding::Pcm24),
            32 => Some(SampleEncoding::Pcm32),
            _ => None,
        }
    }

    /// Full-scale value of the integer encodings.
    fn scale(self) -> f64 {
        match self {
            SampleEncoding::Pcm8 => 128.0,
            SampleEncoding::Pcm16 => 32_768.0,
            SampleEncoding::Pcm24 => 8_388_608.0,
            SampleEncoding::Pcm32 => 2_147_483_648.0,
            SampleEncoding::Float32 => 1.0,
        }
    }

    /// Normalize an integer sample of this encoding to [-1, 1).
    pub fn normalize(self, value: i32) -> f32 {
        (value as f64 / self.scale()) as f32
    }

    /// Quantize a normalized sample to an integer of this encoding.
    fn quantize(self, sample: f32) -> i64 {
        let scale = self.scale();
        ((sample as f64) * scale)
            .round()
            .clamp(-scale, scale - 1.0) as i64
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleEncoding::Pcm8 => "pcm8",
            SampleEncoding::Pcm16 => "pcm16",
            SampleEncoding::Pcm24 => "pcm24",
            SampleEncoding::Pcm32 => "pcm32",
            SampleEncoding::Float32 => "f32",
        };
        f.write_str(name)
    }
}

/// Format of the mono stream a source delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
}

impl AudioFormat {
    /// 16-bit signed mono, the live-capture format.
    pub fn pcm16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            encoding: SampleEncoding::Pcm16,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.encoding.bytes_per_sample()
    }

    /// Encode normalized samples, appending to `out`.
    pub fn encode_into(&self, samples: &[f32], out: &mut Vec<u8>) {
        out.reserve(samples.len() * self.bytes_per_sample());
        for &sample in samples {
            match self.encoding {
                SampleEncoding::Pcm8 => {
                    let v = self.encoding.quantize(sample) + 128;
                    out.push(v as u8);
                }
                SampleEncoding::Pcm16 => {
                    let v = self.encoding.quantize(sample) as i16;
                    out.extend_from_slice(&v.to_le_bytes());
                }
                SampleEncoding::Pcm24 => {
                    let v = self.encoding.quantize(sample) as i32;
                    out.extend_from_slice(&v.to_le_bytes()[..3]);
                }
                SampleEncoding::Pcm32 => {
                    let v = self.encoding.quantize(sample) as i32;
                    out.extend_from_slice(&v.to_le_bytes());
                }
                SampleEncoding::Float32 => {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
            }
        }
    }

    /// Decode raw bytes back to normalized samples. Trailing partial samples are ignored.
    pub fn decode(&self, bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(self.bytes_per_sample())
            .map(|b| match self.encoding {
                SampleEncoding::Pcm8 => self.encoding.normalize(b[0] as i32 - 128),
                SampleEncoding::Pcm16 => {
                    self.encoding
                        .normalize(i16::from_le_bytes([b[0], b[1]]) as i32)
                }
                SampleEncoding::Pcm24 => {
                    // Sign-extend by placing the 3 bytes in the top of an i32.
                    let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                    self.encoding.normalize(v)
                }
                SampleEncoding::Pcm32 => self
                    .encoding
                    .normalize(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                SampleEncoding::Float32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            })
            .collect()
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16(crate::defaults::SAMPLE_RATE)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}/mono", self.sample_rate, self.encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(encoding: SampleEncoding, samples: &[f32]) -> Vec<f32> {
        let format = AudioFormat {
            sample_rate: 8000,
            encoding,
        };
        let mut bytes = Vec::new();
        format.encode_into(samples, &mut bytes);
        assert_eq!(bytes.len(), samples.len() * encoding.bytes_per_sample());
        format.decode(&bytes)
    }

    #[test]
    fn pcm16_encoding_is_little_endian() {
        let format = AudioFormat::pcm16(44_100);
        let mut bytes = Vec::new();
        format.encode_into(&[0.5, -1.0], &mut bytes);
        assert_eq!(bytes, vec![0x00, 0x40, 0x00, 0x80]);
    }

    #[test]
    fn pcm16_values_from_integer_grid_survive_exactly() {
        let samples: Vec<f32> = [-32768i32, -1, 0, 1, 12345, 32767]
            .iter()
            .map(|&v| SampleEncoding::Pcm16.normalize(v))
            .collect();
        assert_eq!(roundtrip(SampleEncoding::Pcm16, &samples), samples);
    }

    #[test]
    fn full_scale_positive_is_clamped() {
        let decoded = roundtrip(SampleEncoding::Pcm16, &[1.0, 2.0, -3.0]);
        assert_eq!(decoded[0], 32767.0 / 32768.0);
        assert_eq!(decoded[1], 32767.0 / 32768.0);
        assert_eq!(decoded[2], -1.0);
    }

    #[test]
    fn pcm24_sign_extension() {
        let decoded = roundtrip(SampleEncoding::Pcm24, &[-0.5, 0.25]);
        assert_eq!(decoded, vec![-0.5, 0.25]);
    }

    #[test]
    fn pcm8_is_offset_binary() {
        let format = AudioFormat {
            sample_rate: 8000,
            encoding: SampleEncoding::Pcm8,
        };
        let mut bytes = Vec::new();
        format.encode_into(&[0.0, -1.0, 0.5], &mut bytes);
        assert_eq!(bytes, vec![128, 0, 192]);
        assert_eq!(format.decode(&bytes), vec![0.0, -1.0, 0.5]);
    }

    #[test]
    fn float32_passes_through() {
        let samples = [0.123_f32, -0.987, 1.5];
        assert_eq!(roundtrip(SampleEncoding::Float32, &samples), samples.to_vec());
    }

    #[test]
    fn from_bits_rejects_odd_depths() {
        assert_eq!(SampleEncoding::from_bits(16), Some(SampleEncoding::Pcm16));
        assert_eq!(SampleEncoding::from_bits(12), None);
    }

    #[test]
    fn display_format() {
        assert_eq!(AudioFormat::pcm16(44_100).to_string(), "44100Hz/pcm16/mono");
    }
}
