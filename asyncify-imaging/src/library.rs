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

//! Native media library backed by the `image` crate
//!
//! [`ImageLibrary`] classifies payloads for the validator (images, WAVE
//! audio, ISO media and WebM containers) and performs the decode, resize and
//! re-encode work behind the imaging capabilities.

use crate::audio;
use crate::error::{ImagingError, ImagingResult};
use crate::video;
use asyncify_host::{wire, ClassifyError, MediaClassifier, MediaInfo, MediaKind};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageOutputFormat};
use std::io::Cursor;

/// Formats the library decodes
const DECODABLE: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Ico,
    ImageFormat::Tiff,
    ImageFormat::Tga,
    ImageFormat::Pnm,
    ImageFormat::Qoi,
    ImageFormat::Farbfeld,
    ImageFormat::Hdr,
];

/// Formats the library encodes
const ENCODABLE: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::Bmp,
    ImageFormat::Ico,
    ImageFormat::Tiff,
    ImageFormat::Tga,
    ImageFormat::Qoi,
];

/// Properties of a decoded image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    pub format: String,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    /// Pixel layout, e.g. `Rgba8`
    pub color: String,
    /// Encoded size in bytes
    pub size: usize,
    pub dpi: Option<u32>,
}

impl ImageMetadata {
    pub fn to_fields(&self) -> wire::Fields {
        let mut fields = vec![
            field("format", &self.format),
            field("mime", &self.mime),
            field("width", self.width),
            field("height", self.height),
            field("color", &self.color),
            field("size", self.size),
        ];
        if let Some(dpi) = self.dpi {
            fields.push(field("dpi", dpi));
        }
        wire::Fields { fields }
    }
}

/// Parameters of [`ImageLibrary::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressOptions {
    /// Output format by extension, e.g. `png` or `jpg`
    pub format: String,
    /// Output size as a percentage of the input, 1..=100
    pub percent: u32,
    /// Encoder quality for lossy formats, 1..=100
    pub quality: u8,
}

impl CompressOptions {
    pub fn new(format: impl Into<String>, percent: i32, quality: i32) -> ImagingResult<Self> {
        if !(1..=100).contains(&percent) {
            return Err(ImagingError::InvalidPercent(percent));
        }
        if !(1..=100).contains(&quality) {
            return Err(ImagingError::InvalidQuality(quality));
        }
        Ok(Self {
            format: format.into(),
            percent: percent as u32,
            quality: quality as u8,
        })
    }
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            format: "png".to_string(),
            percent: 100,
            quality: 85,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageLibrary;

impl ImageLibrary {
    pub fn new() -> Self {
        Self
    }

    /// Extensions of every format the library can decode, sorted
    pub fn formats(&self) -> Vec<String> {
        let mut names: Vec<String> = DECODABLE.iter().map(|f| name_of(*f).to_string()).collect();
        names.sort();
        names
    }

    /// Decode `bytes` and report its properties.
    pub fn metadata(&self, bytes: &[u8]) -> ImagingResult<ImageMetadata> {
        let format = detect(bytes)?;
        let image = image::load_from_memory_with_format(bytes, format)?;
        Ok(ImageMetadata {
            format: name_of(format).to_string(),
            mime: mime_of(format).to_string(),
            width: image.width(),
            height: image.height(),
            color: format!("{:?}", image.color()),
            size: bytes.len(),
            dpi: dpi_of(format, bytes),
        })
    }

    /// Convert, resize and re-encode an image, returning the new file bytes.
    pub fn process(&self, bytes: &[u8], options: &CompressOptions) -> ImagingResult<Vec<u8>> {
        let target = ImageFormat::from_extension(&options.format)
            .filter(|f| ENCODABLE.contains(f))
            .ok_or_else(|| ImagingError::UnsupportedFormat(options.format.clone()))?;
        let source = detect(bytes)?;
        let mut image = image::load_from_memory_with_format(bytes, source)?;

        if options.percent != 100 {
            let width = scale(image.width(), options.percent);
            let height = scale(image.height(), options.percent);
            if width == 0 || height == 0 {
                return Err(ImagingError::EmptyResize);
            }
            image = image.resize_exact(width, height, FilterType::Triangle);
        }

        let mut out = Cursor::new(Vec::new());
        match target {
            // JPEG carries no alpha channel
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
                .write_to(&mut out, ImageOutputFormat::Jpeg(options.quality))?,
            other => image.write_to(&mut out, other)?,
        }
        let out = out.into_inner();

        tracing::debug!(
            from = name_of(source),
            to = name_of(target),
            percent = options.percent,
            input = bytes.len(),
            output = out.len(),
            "Image processed"
        );
        Ok(out)
    }
}

impl MediaClassifier for ImageLibrary {
    fn classify(&self, payload: &[u8]) -> Result<MediaInfo, ClassifyError> {
        if audio::is_wav(payload) {
            return audio::classify_wav(payload);
        }
        if video::is_iso_media(payload) {
            return video::classify_iso_media(payload);
        }
        if video::is_webm(payload) {
            return video::classify_webm(payload);
        }

        let format = detect(payload).map_err(|_| ClassifyError::Unrecognized)?;
        let (width, height) = image::io::Reader::with_format(Cursor::new(payload), format)
            .into_dimensions()
            .map_err(|e| ClassifyError::Corrupt {
                format: name_of(format).to_string(),
                reason: e.to_string(),
            })?;

        let mut info = MediaInfo::image(mime_of(format)).with_resolution(width as f64, height as f64);
        if let Some(dpi) = dpi_of(format, payload) {
            info = info.with_dpi(dpi);
        }
        Ok(info)
    }
}

/// Flatten a classification into name/value fields
pub fn info_fields(info: &MediaInfo) -> wire::Fields {
    let mut fields = vec![field("mime", &info.mime), field("kind", info.kind.name())];
    match &info.kind {
        MediaKind::Audio {
            format,
            sample_rate,
            bit_depth,
            channels,
            duration,
        } => {
            fields.push(field("format", format));
            push_opt(&mut fields, "sample_rate", *sample_rate);
            push_opt(&mut fields, "bit_depth", *bit_depth);
            push_opt(&mut fields, "channels", *channels);
            push_opt(&mut fields, "duration", *duration);
        }
        MediaKind::Video { duration } => push_opt(&mut fields, "duration", *duration),
        MediaKind::Image => {}
    }
    if let Some(size) = info.resolution {
        fields.push(field("width", size.width));
        fields.push(field("height", size.height));
    }
    push_opt(&mut fields, "dpi", info.dpi);
    wire::Fields { fields }
}

fn field(name: &str, value: impl ToString) -> wire::Field {
    wire::Field {
        r#type: name.to_string(),
        value: value.to_string(),
    }
}

fn push_opt<T: ToString>(fields: &mut Vec<wire::Field>, name: &str, value: Option<T>) {
    if let Some(value) = value {
        fields.push(field(name, value));
    }
}

fn detect(bytes: &[u8]) -> ImagingResult<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .filter(|f| DECODABLE.contains(f))
        .ok_or(ImagingError::Unrecognized)
}

fn scale(side: u32, percent: u32) -> u32 {
    ((side as u64 * percent as u64 + 50) / 100) as u32
}

fn name_of(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("unknown")
}

fn mime_of(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Ico => "image/x-icon",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::Tga => "image/x-tga",
        ImageFormat::Pnm => "image/x-portable-anymap",
        ImageFormat::Qoi => "image/x-qoi",
        ImageFormat::Farbfeld => "image/x-farbfeld",
        ImageFormat::Hdr => "image/vnd.radiance",
        _ => "application/octet-stream",
    }
}

/// Physical density recorded in the container, in dots per inch
fn dpi_of(format: ImageFormat, bytes: &[u8]) -> Option<u32> {
    match format {
        ImageFormat::Png => png_dpi(bytes),
        ImageFormat::Jpeg => jfif_dpi(bytes),
        _ => None,
    }
}

/// Density from the `pHYs` chunk; only the per-metre unit converts to inches
fn png_dpi(bytes: &[u8]) -> Option<u32> {
    let mut offset = 8;
    while offset + 8 <= bytes.len() {
        let len = u32::from_be_bytes(bytes[offset..offset + 4].try_into().ok()?) as usize;
        let kind = &bytes[offset + 4..offset + 8];
        let body = bytes.get(offset + 8..offset + 8 + len)?;
        match kind {
            b"pHYs" if len == 9 => {
                let x = u32::from_be_bytes(body[0..4].try_into().ok()?);
                return (body[8] == 1).then(|| (x as f64 * 0.0254).round() as u32);
            }
            b"IDAT" | b"IEND" => return None,
            _ => {}
        }
        // length, type, body, crc
        offset += 12 + len;
    }
    None
}

/// Density from a JFIF APP0 segment
fn jfif_dpi(bytes: &[u8]) -> Option<u32> {
    let app0 = bytes.get(2..18)?;
    if app0[0..2] != [0xFF, 0xE0] || &app0[4..9] != b"JFIF\0" {
        return None;
    }
    let x = u16::from_be_bytes([app0[12], app0[13]]) as f64;
    match app0[11] {
        1 => Some(x as u32),
        2 => Some((x * 2.54).round() as u32),
        _ => None,
    }
}

/// Encode a solid image; used by tests across the crate.
#[cfg(test)]
pub(crate) fn solid(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 10]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, format)
        .unwrap();
    out.into_inner()
}
