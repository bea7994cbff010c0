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

//! Container sniffing for ISO base media (MP4, QuickTime, M4A) and WebM

use asyncify_host::{ClassifyError, MediaInfo, MediaKind};

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Whether `bytes` starts with an ISO base media `ftyp` box
pub fn is_iso_media(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[4..8] == b"ftyp"
}

/// Whether `bytes` starts with an EBML header that declares a WebM doc type
pub fn is_webm(bytes: &[u8]) -> bool {
    if !bytes.starts_with(&EBML_MAGIC) {
        return false;
    }
    let header = &bytes[..bytes.len().min(64)];
    header.windows(4).any(|w| w == b"webm")
}

pub fn classify_webm(_bytes: &[u8]) -> Result<MediaInfo, ClassifyError> {
    Ok(MediaInfo {
        mime: "video/webm".to_string(),
        kind: MediaKind::Video { duration: None },
        dpi: None,
        resolution: None,
    })
}

/// Classify an ISO base media payload by its major brand.
///
/// Duration comes from the `mvhd` box inside `moov` when one is present.
pub fn classify_iso_media(bytes: &[u8]) -> Result<MediaInfo, ClassifyError> {
    let brand = bytes.get(8..12).ok_or_else(|| corrupt("ftyp box is truncated"))?;
    let duration = find_box(bytes, b"moov")
        .and_then(|moov| find_box(moov, b"mvhd"))
        .map(movie_duration)
        .transpose()?
        .flatten();

    let info = match brand {
        b"M4A " | b"M4B " => MediaInfo {
            mime: "audio/mp4".to_string(),
            kind: MediaKind::Audio {
                format: "m4a".to_string(),
                sample_rate: None,
                bit_depth: None,
                channels: None,
                duration,
            },
            dpi: None,
            resolution: None,
        },
        b"qt  " => video("video/quicktime", duration),
        _ => video("video/mp4", duration),
    };
    Ok(info)
}

fn video(mime: &str, duration: Option<f64>) -> MediaInfo {
    MediaInfo {
        mime: mime.to_string(),
        kind: MediaKind::Video { duration },
        dpi: None,
        resolution: None,
    }
}

/// Body of the first box of type `kind` among the boxes in `bytes`
fn find_box<'a>(bytes: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    let mut offset = 0usize;
    while offset + 8 <= bytes.len() {
        let size = be_u32(bytes, offset) as u64;
        let (header, size) = match size {
            // 64-bit size follows the type
            1 if offset + 16 <= bytes.len() => (16usize, be_u64(bytes, offset + 8)),
            1 => return None,
            // Box extends to the end of the enclosing container
            0 => (8usize, (bytes.len() - offset) as u64),
            n => (8usize, n),
        };
        if size < header as u64 {
            return None;
        }
        let end = offset.saturating_add(usize::try_from(size).ok()?).min(bytes.len());
        if &bytes[offset + 4..offset + 8] == kind {
            return Some(&bytes[offset + header..end]);
        }
        offset = end;
    }
    None
}

fn movie_duration(mvhd: &[u8]) -> Result<Option<f64>, ClassifyError> {
    let Some(&version) = mvhd.first() else {
        return Err(corrupt("empty mvhd box"));
    };
    // version/flags, creation and modification times precede the timescale
    let (timescale, duration) = match version {
        0 if mvhd.len() >= 20 => (be_u32(mvhd, 12) as u64, be_u32(mvhd, 16) as u64),
        1 if mvhd.len() >= 32 => (be_u32(mvhd, 20) as u64, be_u64(mvhd, 24)),
        0 | 1 => return Err(corrupt("mvhd box is truncated")),
        v => return Err(corrupt(&format!("unknown mvhd version {v}"))),
    };
    if timescale == 0 {
        return Ok(None);
    }
    Ok(Some(duration as f64 / timescale as f64))
}

fn corrupt(reason: &str) -> ClassifyError {
    ClassifyError::Corrupt {
        format: "mp4".to_string(),
        reason: reason.to_string(),
    }
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn be_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(raw)
}

/// Build a minimal `ftyp` + `moov/mvhd` file; used by tests across the crate.
#[cfg(test)]
pub(crate) fn iso_media(brand: &[u8; 4], timescale: u32, duration: u32) -> Vec<u8> {
    fn boxed(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    let mut ftyp = brand.to_vec();
    ftyp.extend_from_slice(&0u32.to_be_bytes());
    ftyp.extend_from_slice(b"isom");

    let mut mvhd = vec![0u8; 12];
    mvhd.extend_from_slice(&timescale.to_be_bytes());
    mvhd.extend_from_slice(&duration.to_be_bytes());
    mvhd.resize(100, 0);

    let mut out = boxed(b"ftyp", &ftyp);
    out.extend(boxed(b"free", &[0; 4]));
    out.extend(boxed(b"moov", &boxed(b"mvhd", &mvhd)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mp4_duration() {
        let bytes = iso_media(b"isom", 1000, 2500);
        assert!(is_iso_media(&bytes));
        let info = classify_iso_media(&bytes).unwrap();
        assert_eq!(info.mime, "video/mp4");
        assert_eq!(info.kind, MediaKind::Video { duration: Some(2.5) });
    }

    #[test]
    fn test_quicktime_brand() {
        let info = classify_iso_media(&iso_media(b"qt  ", 600, 600)).unwrap();
        assert_eq!(info.mime, "video/quicktime");
    }

    #[test]
    fn test_m4a_is_audio() {
        let info = classify_iso_media(&iso_media(b"M4A ", 44100, 44100)).unwrap();
        assert_eq!(info.kind.name(), "audio");
    }

    #[test]
    fn test_missing_moov_has_no_duration() {
        let mut bytes = iso_media(b"isom", 1000, 1000);
        bytes.truncate(20);
        let info = classify_iso_media(&bytes).unwrap();
        assert_eq!(info.kind, MediaKind::Video { duration: None });
    }

    #[test]
    fn test_webm_doc_type() {
        let mut bytes = EBML_MAGIC.to_vec();
        bytes.extend_from_slice(&[0x9F, 0x42, 0x82, 0x84]);
        bytes.extend_from_slice(b"webm");
        assert!(is_webm(&bytes));
        assert!(!is_webm(&EBML_MAGIC));
        assert_eq!(classify_webm(&bytes).unwrap().mime, "video/webm");
    }
}
