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

//! Built-in imaging capabilities
//!
//! | id | completes | result |
//! |----|-----------|--------|
//! | `image.metadata` | sync | `Fields` |
//! | `image.formats` | sync | `ListStrings` |
//! | `image.compress` | deferred | encoded image bytes |
//! | `media.inspect` | sync | `Fields` |

use crate::error::ImagingResult;
use crate::library::{info_fields, CompressOptions, ImageLibrary};
use asyncify_host::{
    wire, Argument, Capability, Catalog, Descriptor, Execution, ExecutionError, FormatRule,
    IntRule, MediaRule, Pattern, Schema, StringRule, ValidatedArgs, Validator,
};
use std::sync::Arc;

pub const IMAGE_METADATA: &str = "image.metadata";
pub const IMAGE_FORMATS: &str = "image.formats";
pub const IMAGE_COMPRESS: &str = "image.compress";
pub const MEDIA_INSPECT: &str = "media.inspect";

/// Register every imaging capability with `catalog`.
pub fn register_all(catalog: &Catalog, library: Arc<ImageLibrary>) -> ImagingResult<()> {
    catalog.register(MetadataCapability::new(Arc::clone(&library))?)?;
    catalog.register(FormatsCapability::new(Arc::clone(&library))?)?;
    catalog.register(CompressCapability::new(Arc::clone(&library))?)?;
    catalog.register(InspectCapability::new()?)?;
    tracing::debug!(count = 4, "Imaging capabilities registered");
    Ok(())
}

fn image_argument() -> Argument {
    Argument::new(
        "image",
        Validator::media(MediaRule {
            formats: vec![FormatRule::Image],
            ..Default::default()
        })
        .required(),
    )
    .describe("Encoded image file")
}

fn missing(name: &str) -> Execution {
    Execution::fail(format!("argument '{name}' was not provided"))
}

pub struct MetadataCapability {
    descriptor: Descriptor,
    library: Arc<ImageLibrary>,
}

impl MetadataCapability {
    pub fn new(library: Arc<ImageLibrary>) -> ImagingResult<Self> {
        let schema = Schema::new(vec![image_argument()])?;
        Ok(Self {
            descriptor: Descriptor::new(IMAGE_METADATA, "Image metadata", schema)
                .with_description("Format, dimensions, pixel layout and size of an image"),
            library,
        })
    }
}

impl Capability for MetadataCapability {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn invoke(&self, args: ValidatedArgs) -> Execution {
        let Some((bytes, _)) = args.media("image") else {
            return missing("image");
        };
        match self.library.metadata(bytes) {
            Ok(meta) => Execution::ready(wire::encode(&meta.to_fields())),
            Err(e) => Execution::Ready(Err(e.into())),
        }
    }
}

pub struct FormatsCapability {
    descriptor: Descriptor,
    library: Arc<ImageLibrary>,
}

impl FormatsCapability {
    pub fn new(library: Arc<ImageLibrary>) -> ImagingResult<Self> {
        Ok(Self {
            descriptor: Descriptor::new(IMAGE_FORMATS, "Image formats", Schema::empty())
                .with_description("Image formats the host can decode"),
            library,
        })
    }
}

impl Capability for FormatsCapability {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn invoke(&self, _args: ValidatedArgs) -> Execution {
        let list = wire::ListStrings {
            values: self.library.formats(),
        };
        Execution::ready(wire::encode(&list))
    }
}

/// Re-encodes an image on the blocking pool and answers through a future.
pub struct CompressCapability {
    descriptor: Descriptor,
    library: Arc<ImageLibrary>,
}

impl CompressCapability {
    pub fn new(library: Arc<ImageLibrary>) -> ImagingResult<Self> {
        let defaults = CompressOptions::default();
        let schema = Schema::new(vec![
            image_argument(),
            Argument::new(
                "format",
                Validator::string(StringRule {
                    min: Some(2),
                    max: Some(8),
                    default: Some(defaults.format),
                    regex: Some(Pattern::new("^[a-z0-9]+$")?),
                    ..Default::default()
                }),
            )
            .describe("Output format by file extension"),
            Argument::new(
                "percent",
                Validator::int(IntRule {
                    min: Some(1),
                    max: Some(100),
                    default: Some(defaults.percent as i32),
                }),
            )
            .describe("Output size relative to the input"),
            Argument::new(
                "quality",
                Validator::int(IntRule {
                    min: Some(1),
                    max: Some(100),
                    default: Some(defaults.quality as i32),
                }),
            )
            .describe("Encoder quality for lossy formats"),
        ])?;
        Ok(Self {
            descriptor: Descriptor::new(IMAGE_COMPRESS, "Compress image", schema)
                .with_description("Convert, resize and re-encode an image"),
            library,
        })
    }
}

impl Capability for CompressCapability {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn invoke(&self, args: ValidatedArgs) -> Execution {
        let Some((bytes, _)) = args.media("image") else {
            return missing("image");
        };
        let defaults = CompressOptions::default();
        let options = match CompressOptions::new(
            args.text("format").unwrap_or(defaults.format.as_str()),
            args.int("percent").unwrap_or(defaults.percent as i32),
            args.int("quality").unwrap_or(defaults.quality as i32),
        ) {
            Ok(options) => options,
            Err(e) => return Execution::Ready(Err(e.into())),
        };

        let bytes = bytes.to_vec();
        let library = Arc::clone(&self.library);
        Execution::deferred(async move {
            tokio::task::spawn_blocking(move || library.process(&bytes, &options))
                .await
                .map_err(|e| ExecutionError::new(format!("compression task failed: {e}")))?
                .map_err(ExecutionError::from)
        })
    }
}

/// Reports how the host classifies a payload.
pub struct InspectCapability {
    descriptor: Descriptor,
}

impl InspectCapability {
    pub fn new() -> ImagingResult<Self> {
        let schema = Schema::new(vec![Argument::new(
            "media",
            Validator::media(MediaRule::default()).required(),
        )
        .describe("Any media payload")])?;
        Ok(Self {
            descriptor: Descriptor::new(MEDIA_INSPECT, "Inspect media", schema)
                .with_description("Kind, MIME type and properties of a media payload"),
        })
    }
}

impl Capability for InspectCapability {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn invoke(&self, args: ValidatedArgs) -> Execution {
        match args.media("media") {
            Some((_, info)) => Execution::ready(wire::encode(&info_fields(info))),
            None => missing("media"),
        }
    }
}
