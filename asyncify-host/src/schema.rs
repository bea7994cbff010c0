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

//! Capability argument schemas
//!
//! A [`Schema`] is the ordered argument list a capability declares. It is
//! checked once when built: names are unique, bounds are ordered, defaults
//! satisfy their own rule and regex patterns compile. Calls are then
//! validated against it by [`crate::validator::validate`].

use crate::error::ProtocolError;
use crate::media::Dimensions;
use crate::validator;
use crate::wire;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Errors raised while building or decoding a schema
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("argument name must not be empty")]
    EmptyName,

    #[error("duplicate argument: {0}")]
    DuplicateArgument(String),

    #[error("argument '{argument}': {reason}")]
    InvalidBounds { argument: String, reason: String },

    #[error("argument '{argument}': default rejected: {reason}")]
    InvalidDefault { argument: String, reason: String },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("argument '{argument}': {source}")]
    Wire {
        argument: String,
        source: ProtocolError,
    },
}

/// A compiled regular expression that remembers its source.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    compiled: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, SchemaError> {
        let compiled = Regex::new(source).map_err(|e| SchemaError::InvalidPattern {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            compiled,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntRule {
    pub min: Option<i32>,
    pub max: Option<i32>,
    pub default: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DoubleRule {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub default: Option<f64>,
}

/// String constraints; `min`/`max` count characters, not bytes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringRule {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub default: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub regex: Option<Pattern>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaRule {
    /// Matched against the classified MIME type. The wire field is always
    /// present, so an empty pattern there is read as `None` and accepts any
    pub mime: Option<Pattern>,
    /// Maximum payload size in bytes
    pub file_size: Option<u64>,
    /// Maximum dots per inch
    pub dpi: Option<u32>,
    /// Maximum width and height
    pub resolution: Option<Dimensions>,
    /// Accepted kinds; empty accepts any
    pub formats: Vec<FormatRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormatRule {
    Audio(AudioRule),
    Video(VideoRule),
    Image,
}

impl FormatRule {
    pub fn name(&self) -> &'static str {
        match self {
            FormatRule::Audio(_) => "audio",
            FormatRule::Video(_) => "video",
            FormatRule::Image => "image",
        }
    }
}

/// Audio format; declared properties must match exactly, except `duration`
/// which is a maximum in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioRule {
    pub format: String,
    pub sample_rate: Option<f64>,
    pub bit_depth: Option<u32>,
    pub channels: Option<u32>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VideoRule {
    /// Maximum duration in seconds
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidatorKind {
    Int(IntRule),
    Double(DoubleRule),
    String(StringRule),
    Media(MediaRule),
}

impl ValidatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ValidatorKind::Int(_) => "Int",
            ValidatorKind::Double(_) => "Double",
            ValidatorKind::String(_) => "String",
            ValidatorKind::Media(_) => "Media",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    pub required: bool,
    pub kind: ValidatorKind,
}

impl Validator {
    pub fn int(rule: IntRule) -> Self {
        Self {
            required: false,
            kind: ValidatorKind::Int(rule),
        }
    }

    pub fn double(rule: DoubleRule) -> Self {
        Self {
            required: false,
            kind: ValidatorKind::Double(rule),
        }
    }

    pub fn string(rule: StringRule) -> Self {
        Self {
            required: false,
            kind: ValidatorKind::String(rule),
        }
    }

    pub fn media(rule: MediaRule) -> Self {
        Self {
            required: false,
            kind: ValidatorKind::Media(rule),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub description: Option<String>,
    pub validator: Validator,
}

impl Argument {
    pub fn new(name: impl Into<String>, validator: Validator) -> Self {
        Self {
            name: name.into(),
            description: None,
            validator,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn check(&self) -> Result<(), SchemaError> {
        let name = &self.name;
        let bounds = |reason: String| SchemaError::InvalidBounds {
            argument: name.clone(),
            reason,
        };
        match &self.validator.kind {
            ValidatorKind::Int(rule) => {
                if let (Some(min), Some(max)) = (rule.min, rule.max) {
                    if min > max {
                        return Err(bounds(format!("min {} > max {}", min, max)));
                    }
                }
            }
            ValidatorKind::Double(rule) => {
                for bound in [rule.min, rule.max, rule.default].into_iter().flatten() {
                    if bound.is_nan() {
                        return Err(bounds("NaN is not a valid bound".into()));
                    }
                }
                if let (Some(min), Some(max)) = (rule.min, rule.max) {
                    if min > max {
                        return Err(bounds(format!("min {} > max {}", min, max)));
                    }
                }
            }
            ValidatorKind::String(rule) => {
                if let (Some(min), Some(max)) = (rule.min, rule.max) {
                    if min > max {
                        return Err(bounds(format!("min length {} > max length {}", min, max)));
                    }
                }
            }
            ValidatorKind::Media(rule) => {
                if let Some(res) = rule.resolution {
                    if res.width < 0.0 || res.height < 0.0 {
                        return Err(bounds("resolution must not be negative".into()));
                    }
                }
            }
        }

        validator::check_default(name, &self.validator.kind).map_err(|e| {
            SchemaError::InvalidDefault {
                argument: name.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// Ordered, duplicate-free argument list of a capability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    arguments: Vec<Argument>,
}

impl Schema {
    pub fn new(arguments: Vec<Argument>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for arg in &arguments {
            if arg.name.is_empty() {
                return Err(SchemaError::EmptyName);
            }
            if !seen.insert(arg.name.as_str()) {
                return Err(SchemaError::DuplicateArgument(arg.name.clone()));
            }
            arg.check()?;
        }
        Ok(Self { arguments })
    }

    /// Schema of a capability that takes no arguments
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// Decode and check a schema received over the wire
    pub fn from_wire(arguments: Vec<wire::Argument>) -> Result<Self, SchemaError> {
        let arguments = arguments
            .into_iter()
            .map(Argument::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(arguments)
    }

    pub fn to_wire(&self) -> Vec<wire::Argument> {
        self.arguments.iter().map(wire::Argument::from).collect()
    }
}

// Wire conversions

impl TryFrom<wire::Argument> for Argument {
    type Error = SchemaError;

    fn try_from(arg: wire::Argument) -> Result<Self, Self::Error> {
        let name = arg.name;
        let wire_err = |name: &str, message: &'static str, reason: &str| SchemaError::Wire {
            argument: name.to_string(),
            source: ProtocolError::Malformed {
                message,
                reason: reason.to_string(),
            },
        };

        let validator = arg
            .validator
            .ok_or_else(|| wire_err(&name, "Argument", "validator is missing"))?;
        let kind = match validator.data {
            Some(wire::validator::Data::Int(v)) => ValidatorKind::Int(IntRule {
                min: v.min,
                max: v.max,
                default: v.default,
            }),
            Some(wire::validator::Data::Double(v)) => ValidatorKind::Double(DoubleRule {
                min: v.min,
                max: v.max,
                default: v.default,
            }),
            Some(wire::validator::Data::String(v)) => ValidatorKind::String(StringRule {
                min: v.min,
                max: v.max,
                default: v.default,
                prefix: v.prefix,
                suffix: v.suffix,
                regex: v.regex.as_deref().map(Pattern::new).transpose()?,
            }),
            Some(wire::validator::Data::Media(v)) => {
                let formats = v
                    .formats
                    .into_iter()
                    .map(|f| FormatRule::try_from(f).map_err(|reason| wire_err(&name, "Format", reason)))
                    .collect::<Result<Vec<_>, _>>()?;
                ValidatorKind::Media(MediaRule {
                    mime: if v.mime.is_empty() {
                        None
                    } else {
                        Some(Pattern::new(&v.mime)?)
                    },
                    file_size: v.file_size,
                    dpi: v.dpi,
                    resolution: v.resolution.map(|s| Dimensions {
                        width: s.width,
                        height: s.height,
                    }),
                    formats,
                })
            }
            None => {
                return Err(SchemaError::Wire {
                    argument: name,
                    source: ProtocolError::UnsetValue,
                })
            }
        };

        Ok(Argument {
            name,
            description: arg.desc,
            validator: Validator {
                required: validator.required,
                kind,
            },
        })
    }
}

impl TryFrom<wire::Format> for FormatRule {
    type Error = &'static str;

    fn try_from(format: wire::Format) -> Result<Self, Self::Error> {
        match (format.audio, format.video, format.image) {
            (Some(a), None, None) => Ok(FormatRule::Audio(AudioRule {
                format: a.format,
                sample_rate: a.sample_rate,
                bit_depth: a.bit_depth,
                channels: a.channels,
                duration: a.duration,
            })),
            (None, Some(v), None) => Ok(FormatRule::Video(VideoRule {
                duration: v.duration,
            })),
            (None, None, Some(_)) => Ok(FormatRule::Image),
            (None, None, None) => Err("no format kind set"),
            _ => Err("more than one format kind set"),
        }
    }
}

impl From<&FormatRule> for wire::Format {
    fn from(rule: &FormatRule) -> Self {
        let mut format = wire::Format::default();
        match rule {
            FormatRule::Audio(a) => {
                format.audio = Some(wire::format::Audio {
                    format: a.format.clone(),
                    sample_rate: a.sample_rate,
                    bit_depth: a.bit_depth,
                    channels: a.channels,
                    duration: a.duration,
                })
            }
            FormatRule::Video(v) => {
                format.video = Some(wire::format::Video {
                    duration: v.duration,
                })
            }
            FormatRule::Image => format.image = Some(wire::format::Image {}),
        }
        format
    }
}

impl From<&Argument> for wire::Argument {
    fn from(arg: &Argument) -> Self {
        use wire::validator as wv;

        let data = match &arg.validator.kind {
            ValidatorKind::Int(r) => wv::Data::Int(wv::Int {
                min: r.min,
                max: r.max,
                default: r.default,
            }),
            ValidatorKind::Double(r) => wv::Data::Double(wv::Double {
                min: r.min,
                max: r.max,
                default: r.default,
            }),
            ValidatorKind::String(r) => wv::Data::String(wv::Text {
                min: r.min,
                max: r.max,
                default: r.default.clone(),
                prefix: r.prefix.clone(),
                suffix: r.suffix.clone(),
                regex: r.regex.as_ref().map(|p| p.as_str().to_string()),
            }),
            ValidatorKind::Media(r) => wv::Data::Media(wv::Media {
                mime: r
                    .mime
                    .as_ref()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default(),
                file_size: r.file_size,
                dpi: r.dpi,
                resolution: r.resolution.map(|d| wire::Size {
                    width: d.width,
                    height: d.height,
                }),
                formats: r.formats.iter().map(wire::Format::from).collect(),
            }),
        };

        wire::Argument {
            name: arg.name.clone(),
            desc: arg.description.clone(),
            validator: Some(wire::Validator {
                required: arg.validator.required,
                data: Some(data),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level() -> Argument {
        Argument::new(
            "level",
            Validator::int(IntRule {
                min: Some(0),
                max: Some(100),
                default: Some(50),
            }),
        )
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Schema::new(vec![level(), level()]).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateArgument("level".into()));
    }

    #[test]
    fn test_default_outside_bounds_rejected() {
        let arg = Argument::new(
            "level",
            Validator::int(IntRule {
                min: Some(0),
                max: Some(10),
                default: Some(11),
            }),
        );
        assert!(matches!(
            Schema::new(vec![arg]),
            Err(SchemaError::InvalidDefault { .. })
        ));
    }

    #[test]
    fn test_default_must_match_regex() {
        let arg = Argument::new(
            "name",
            Validator::string(StringRule {
                default: Some("ABC".into()),
                regex: Some(Pattern::new("^[a-z]+$").unwrap()),
                ..Default::default()
            }),
        );
        assert!(matches!(
            Schema::new(vec![arg]),
            Err(SchemaError::InvalidDefault { .. })
        ));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let arg = Argument::new(
            "ratio",
            Validator::double(DoubleRule {
                min: Some(1.0),
                max: Some(0.5),
                default: None,
            }),
        );
        assert!(matches!(
            Schema::new(vec![arg]),
            Err(SchemaError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn test_bad_regex_rejected() {
        assert!(matches!(
            Pattern::new("(unclosed"),
            Err(SchemaError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_wire_round_trip() {
        let schema = Schema::new(vec![
            level().describe("compression level"),
            Argument::new(
                "image",
                Validator::media(MediaRule {
                    mime: Some(Pattern::new("^image/").unwrap()),
                    formats: vec![FormatRule::Image],
                    ..Default::default()
                })
                .required(),
            ),
        ])
        .unwrap();

        let decoded = Schema::from_wire(schema.to_wire()).unwrap();
        assert_eq!(decoded, schema);
    }

    #[test]
    fn test_unset_validator_oneof_is_protocol_error() {
        let arg = wire::Argument {
            name: "x".into(),
            desc: None,
            validator: Some(wire::Validator {
                required: true,
                data: None,
            }),
        };
        let err = Argument::try_from(arg).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Wire {
                source: ProtocolError::UnsetValue,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_wire_mime_accepts_any() {
        let arg = wire::Argument {
            name: "image".into(),
            desc: None,
            validator: Some(wire::Validator {
                required: true,
                data: Some(wire::validator::Data::Media(wire::validator::Media {
                    mime: String::new(),
                    ..Default::default()
                })),
            }),
        };
        let parsed = Argument::try_from(arg).unwrap();
        match &parsed.validator.kind {
            ValidatorKind::Media(rule) => assert!(rule.mime.is_none()),
            other => panic!("expected media validator, got {other:?}"),
        }

        let back = wire::Argument::from(&parsed);
        match back.validator.and_then(|v| v.data) {
            Some(wire::validator::Data::Media(media)) => assert_eq!(media.mime, ""),
            other => panic!("expected media data, got {other:?}"),
        }
    }

    #[test]
    fn test_format_requires_exactly_one_kind() {
        let both = wire::Format {
            audio: Some(wire::format::Audio::default()),
            video: None,
            image: Some(wire::format::Image {}),
        };
        assert!(FormatRule::try_from(both).is_err());
        assert!(FormatRule::try_from(wire::Format::default()).is_err());
    }
}
