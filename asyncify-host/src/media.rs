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

//! Media library seam
//!
//! The validator never parses media itself. It hands the payload to a
//! [`MediaClassifier`] and matches the returned [`MediaInfo`] against the
//! declared `Media` rule.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

/// What a classifier found out about a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Detected MIME type, e.g. `image/png`
    pub mime: String,
    pub kind: MediaKind,
    /// Dots per inch, when the container records it
    pub dpi: Option<u32>,
    pub resolution: Option<Dimensions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaKind {
    Audio {
        /// Codec or container short name, e.g. `wav`
        format: String,
        sample_rate: Option<f64>,
        bit_depth: Option<u32>,
        channels: Option<u32>,
        /// Seconds
        duration: Option<f64>,
    },
    Video {
        duration: Option<f64>,
    },
    Image,
}

impl MediaKind {
    pub fn name(&self) -> &'static str {
        match self {
            MediaKind::Audio { .. } => "audio",
            MediaKind::Video { .. } => "video",
            MediaKind::Image => "image",
        }
    }
}

impl MediaInfo {
    pub fn image(mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            kind: MediaKind::Image,
            dpi: None,
            resolution: None,
        }
    }

    pub fn with_resolution(mut self, width: f64, height: f64) -> Self {
        self.resolution = Some(Dimensions { width, height });
        self
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = Some(dpi);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("unrecognized media payload")]
    Unrecognized,

    #[error("corrupt {format} payload: {reason}")]
    Corrupt { format: String, reason: String },
}

/// Identifies the kind and properties of a media payload.
///
/// Implementations must be pure with respect to the payload so validation
/// stays deterministic.
pub trait MediaClassifier: Send + Sync {
    fn classify(&self, payload: &[u8]) -> Result<MediaInfo, ClassifyError>;
}

/// Classifier that recognizes nothing; used when a host has no media library.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMedia;

impl MediaClassifier for NoMedia {
    fn classify(&self, _payload: &[u8]) -> Result<MediaInfo, ClassifyError> {
        Err(ClassifyError::Unrecognized)
    }
}

impl<F> MediaClassifier for F
where
    F: Fn(&[u8]) -> Result<MediaInfo, ClassifyError> + Send + Sync,
{
    fn classify(&self, payload: &[u8]) -> Result<MediaInfo, ClassifyError> {
        self(payload)
    }
}
