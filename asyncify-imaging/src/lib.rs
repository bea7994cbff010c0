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

//! Asyncify Imaging
//!
//! Native media library for the asyncify host: classification of images,
//! WAVE audio and video containers, plus the built-in `image.*` and
//! `media.inspect` capabilities.
//!
//! ```rust,ignore
//! let library = Arc::new(ImageLibrary::new());
//! let catalog = Arc::new(Catalog::new());
//! register_all(&catalog, Arc::clone(&library))?;
//! let context = HostContext { catalog, classifier: library, runtime: handle };
//! ```

pub mod audio;
pub mod capabilities;
pub mod error;
pub mod library;
pub mod video;

pub use capabilities::{
    register_all, CompressCapability, FormatsCapability, MetadataCapability, InspectCapability,
    IMAGE_COMPRESS, IMAGE_FORMATS, IMAGE_METADATA, MEDIA_INSPECT,
};
pub use error::{ImagingError, ImagingResult};
pub use library::{info_fields, CompressOptions, ImageLibrary, ImageMetadata};
