// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! RIFF/WAVE header sniffing

use asyncify_host::{ClassifyError, MediaInfo, MediaKind};

const RIFF: &[u8; 4] = b"RIFF";
const WAVE: &[u8; 4] = b"WAVE";

/// Whether `bytes` starts like a WAVE file
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == RIFF && &bytes[8..12] == WAVE
}

struct FmtChunk {
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    bits_per_sample: u16,
}

/// Classify a WAVE payload from its `fmt ` and `data` chunks.
///
/// The payload must already pass [`is_wav`]. Duration is only reported when
/// a `data` chunk is present and the byte rate is non-zero.
pub fn classify_wav(bytes: &[u8]) -> Result<MediaInfo, ClassifyError> {
    let mut fmt = None;
    let mut data_len = None;

    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = le_u32(bytes, offset + 4) as usize;
        let body = offset + 8;

        match id {
            b"fmt " => {
                if size < 16 || body + 16 > bytes.len() {
                    return Err(corrupt("fmt chunk is truncated"));
                }
                fmt = Some(FmtChunk {
                    channels: le_u16(bytes, body + 2),
                    sample_rate: le_u32(bytes, body + 4),
                    byte_rate: le_u32(bytes, body + 8),
                    bits_per_sample: le_u16(bytes, body + 14),
                });
            }
            // Streamed files may declare more data than they carry
            b"data" => data_len = Some(size.min(bytes.len().saturating_sub(body))),
            _ => {}
        }

        // Chunks are word aligned
        offset = body.saturating_add(size).saturating_add(size & 1);
    }

    let fmt = fmt.ok_or_else(|| corrupt("missing fmt chunk"))?;
    if fmt.channels == 0 || fmt.sample_rate == 0 {
        return Err(corrupt("fmt chunk declares no channels or no samples"));
    }

    let duration = match (data_len, fmt.byte_rate) {
        (Some(len), rate) if rate > 0 => Some(len as f64 / rate as f64),
        _ => None,
    };

    Ok(MediaInfo {
        mime: "audio/wav".to_string(),
        kind: MediaKind::Audio {
            format: "wav".to_string(),
            sample_rate: Some(fmt.sample_rate as f64),
            bit_depth: Some(fmt.bits_per_sample as u32),
            channels: Some(fmt.channels as u32),
            duration,
        },
        dpi: None,
        resolution: None,
    })
}

fn corrupt(reason: &str) -> ClassifyError {
    ClassifyError::Corrupt {
        format: "wav".to_string(),
        reason: reason.to_string(),
    }
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Build a PCM WAVE file; used by tests across the crate.
#[cfg(test)]
pub(crate) fn pcm_wav(sample_rate: u32, channels: u16, bits: u16, frames: u32) -> Vec<u8> {
    let block_align = channels * bits / 8;
    let data_len = frames * block_align as u32;
    let mut out = Vec::new();
    out.extend_from_slice(RIFF);
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(WAVE);
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(out.len() + data_len as usize, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_pcm() {
        let bytes = pcm_wav(8000, 2, 16, 16000);
        assert!(is_wav(&bytes));

        let info = classify_wav(&bytes).unwrap();
        assert_eq!(info.mime, "audio/wav");
        match info.kind {
            MediaKind::Audio {
                format,
                sample_rate,
                bit_depth,
                channels,
                duration,
            } => {
                assert_eq!(format, "wav");
                assert_eq!(sample_rate, Some(8000.0));
                assert_eq!(bit_depth, Some(16));
                assert_eq!(channels, Some(2));
                assert_eq!(duration, Some(2.0));
            }
            other => panic!("expected audio, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_fmt() {
        let mut bytes = pcm_wav(8000, 1, 8, 0);
        bytes.truncate(24);
        assert!(matches!(
            classify_wav(&bytes),
            Err(ClassifyError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_not_wav() {
        assert!(!is_wav(b"RIFF\0\0\0\0AVI "));
        assert!(!is_wav(b"RIFF"));
    }
}
