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

//! Imaging error types

use asyncify_host::{CatalogError, ExecutionError, SchemaError};
use thiserror::Error;

pub type ImagingResult<T> = std::result::Result<T, ImagingError>;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("error while decoding or encoding the image: {0}")]
    Image(#[from] image::ImageError),

    #[error("there was an i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("the payload is not a recognized image")]
    Unrecognized,

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("percent must be within 1..=100, got {0}")]
    InvalidPercent(i32),

    #[error("quality must be within 1..=100, got {0}")]
    InvalidQuality(i32),

    #[error("resized image would be empty")]
    EmptyResize,

    #[error("invalid capability schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("failed to register capability: {0}")]
    Catalog(#[from] CatalogError),
}

impl From<ImagingError> for ExecutionError {
    fn from(e: ImagingError) -> Self {
        ExecutionError::new(e.to_string())
    }
}
