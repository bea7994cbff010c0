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

//! Argument validation
//!
//! [`validate`] checks already-decoded argument bytes against a [`Schema`].
//! It is pure: the same schema, arguments and classifier always give the same
//! answer, inputs are never mutated, and the first violation wins.

use crate::error::{Constraint, ValidationError};
use crate::media::{MediaClassifier, MediaInfo, MediaKind};
use crate::schema::{
    AudioRule, DoubleRule, FormatRule, IntRule, MediaRule, Schema, StringRule, ValidatorKind,
    VideoRule,
};
use serde::Serialize;

/// A validated, typed argument
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Int(i32),
    Double(f64),
    Text(String),
    Media {
        #[serde(skip)]
        bytes: Vec<u8>,
        info: MediaInfo,
    },
}

impl ArgValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ArgValue::Int(_) => "Int",
            ArgValue::Double(_) => "Double",
            ArgValue::Text(_) => "String",
            ArgValue::Media { .. } => "Media",
        }
    }
}

/// Normalized arguments in schema order.
///
/// Defaults are already applied; `None` marks an optional argument that was
/// absent and has no default. Media payloads are owned copies, so the value
/// may outlive the guest memory it was read from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs {
    values: Vec<(String, Option<ArgValue>)>,
}

impl ValidatedArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        match self.get(name) {
            Some(ArgValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn double(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(ArgValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ArgValue::Text(v)) => Some(v),
            _ => None,
        }
    }

    pub fn media(&self, name: &str) -> Option<(&[u8], &MediaInfo)> {
        match self.get(name) {
            Some(ArgValue::Media { bytes, info }) => Some((bytes, info)),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&ArgValue>)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Validate positional arguments against `schema`.
///
/// `args[i]` is `None` when the guest left argument `i` absent. Ref values
/// must already have passed the memory bounds gate.
pub fn validate(
    schema: &Schema,
    args: &[Option<&[u8]>],
    classifier: &dyn MediaClassifier,
) -> Result<ValidatedArgs, ValidationError> {
    if args.len() != schema.len() {
        return Err(ValidationError::Arity {
            expected: schema.len(),
            actual: args.len(),
        });
    }

    let mut values = Vec::with_capacity(args.len());
    for (arg, raw) in schema.arguments().iter().zip(args) {
        let name = arg.name.as_str();
        let value = match raw {
            Some(bytes) => Some(check_value(name, &arg.validator.kind, bytes, classifier)?),
            None if arg.validator.required => {
                return Err(ValidationError::MissingRequired {
                    argument: name.to_string(),
                })
            }
            None => default_of(&arg.validator.kind),
        };
        values.push((arg.name.clone(), value));
    }

    Ok(ValidatedArgs { values })
}

fn default_of(kind: &ValidatorKind) -> Option<ArgValue> {
    match kind {
        ValidatorKind::Int(r) => r.default.map(ArgValue::Int),
        ValidatorKind::Double(r) => r.default.map(ArgValue::Double),
        ValidatorKind::String(r) => r.default.clone().map(ArgValue::Text),
        ValidatorKind::Media(_) => None,
    }
}

/// Check a rule's declared default against the rule itself.
pub(crate) fn check_default(name: &str, kind: &ValidatorKind) -> Result<(), ValidationError> {
    match kind {
        ValidatorKind::Int(r) => r.default.map_or(Ok(()), |v| check_int(name, r, v)),
        ValidatorKind::Double(r) => r.default.map_or(Ok(()), |v| check_double(name, r, v)),
        ValidatorKind::String(r) => r
            .default
            .as_deref()
            .map_or(Ok(()), |v| check_string(name, r, v)),
        ValidatorKind::Media(_) => Ok(()),
    }
}

fn check_value(
    name: &str,
    kind: &ValidatorKind,
    bytes: &[u8],
    classifier: &dyn MediaClassifier,
) -> Result<ArgValue, ValidationError> {
    match kind {
        ValidatorKind::Int(rule) => {
            let raw: [u8; 4] = bytes
                .try_into()
                .map_err(|_| mismatch(name, "Int", format!("expected 4 bytes, got {}", bytes.len())))?;
            let v = i32::from_le_bytes(raw);
            check_int(name, rule, v)?;
            Ok(ArgValue::Int(v))
        }
        ValidatorKind::Double(rule) => {
            let raw: [u8; 8] = bytes.try_into().map_err(|_| {
                mismatch(name, "Double", format!("expected 8 bytes, got {}", bytes.len()))
            })?;
            let v = f64::from_le_bytes(raw);
            if v.is_nan() {
                return Err(mismatch(name, "Double", "NaN".into()));
            }
            check_double(name, rule, v)?;
            Ok(ArgValue::Double(v))
        }
        ValidatorKind::String(rule) => {
            let s = std::str::from_utf8(bytes).map_err(|e| mismatch(name, "String", e.to_string()))?;
            check_string(name, rule, s)?;
            Ok(ArgValue::Text(s.to_string()))
        }
        ValidatorKind::Media(rule) => {
            let info = check_media(name, rule, bytes, classifier)?;
            Ok(ArgValue::Media {
                bytes: bytes.to_vec(),
                info,
            })
        }
    }
}

fn mismatch(name: &str, expected: &'static str, reason: String) -> ValidationError {
    ValidationError::TypeMismatch {
        argument: name.to_string(),
        expected,
        reason,
    }
}

fn out_of_range(name: &str, constraint: Constraint, detail: String) -> ValidationError {
    ValidationError::OutOfRange {
        argument: name.to_string(),
        constraint,
        detail,
    }
}

fn pattern(name: &str, constraint: Constraint, detail: String) -> ValidationError {
    ValidationError::PatternMismatch {
        argument: name.to_string(),
        constraint,
        detail,
    }
}

fn unsupported(name: &str, detail: String) -> ValidationError {
    ValidationError::UnsupportedFormat {
        argument: name.to_string(),
        detail,
    }
}

fn check_int(name: &str, rule: &IntRule, v: i32) -> Result<(), ValidationError> {
    if let Some(min) = rule.min {
        if v < min {
            return Err(out_of_range(name, Constraint::IntMin, format!("{} < {}", v, min)));
        }
    }
    if let Some(max) = rule.max {
        if v > max {
            return Err(out_of_range(name, Constraint::IntMax, format!("{} > {}", v, max)));
        }
    }
    Ok(())
}

fn check_double(name: &str, rule: &DoubleRule, v: f64) -> Result<(), ValidationError> {
    if let Some(min) = rule.min {
        if v < min {
            return Err(out_of_range(name, Constraint::DoubleMin, format!("{} < {}", v, min)));
        }
    }
    if let Some(max) = rule.max {
        if v > max {
            return Err(out_of_range(name, Constraint::DoubleMax, format!("{} > {}", v, max)));
        }
    }
    Ok(())
}

fn check_string(name: &str, rule: &StringRule, s: &str) -> Result<(), ValidationError> {
    let len = s.chars().count();
    if let Some(min) = rule.min {
        if len < min as usize {
            return Err(out_of_range(
                name,
                Constraint::StringMin,
                format!("length {} < {}", len, min),
            ));
        }
    }
    if let Some(max) = rule.max {
        if len > max as usize {
            return Err(out_of_range(
                name,
                Constraint::StringMax,
                format!("length {} > {}", len, max),
            ));
        }
    }
    if let Some(prefix) = &rule.prefix {
        if !s.starts_with(prefix.as_str()) {
            return Err(pattern(
                name,
                Constraint::StringPrefix,
                format!("expected prefix {:?}", prefix),
            ));
        }
    }
    if let Some(suffix) = &rule.suffix {
        if !s.ends_with(suffix.as_str()) {
            return Err(pattern(
                name,
                Constraint::StringSuffix,
                format!("expected suffix {:?}", suffix),
            ));
        }
    }
    if let Some(regex) = &rule.regex {
        if !regex.is_match(s) {
            return Err(pattern(
                name,
                Constraint::StringRegex,
                format!("{:?} does not match /{}/", s, regex.as_str()),
            ));
        }
    }
    Ok(())
}

fn check_media(
    name: &str,
    rule: &MediaRule,
    bytes: &[u8],
    classifier: &dyn MediaClassifier,
) -> Result<MediaInfo, ValidationError> {
    if let Some(max) = rule.file_size {
        if bytes.len() as u64 > max {
            return Err(out_of_range(
                name,
                Constraint::MediaFileSize,
                format!("{} bytes > {}", bytes.len(), max),
            ));
        }
    }

    let info = classifier
        .classify(bytes)
        .map_err(|e| unsupported(name, e.to_string()))?;

    if let Some(mime) = &rule.mime {
        if !mime.is_match(&info.mime) {
            return Err(pattern(
                name,
                Constraint::MediaMime,
                format!("{} does not match /{}/", info.mime, mime.as_str()),
            ));
        }
    }

    if !rule.formats.is_empty() {
        let mut reasons = Vec::new();
        let accepted = rule.formats.iter().any(|format| match matches_format(format, &info.kind) {
            Ok(()) => true,
            Err(reason) => {
                reasons.push(reason);
                false
            }
        });
        if !accepted {
            return Err(unsupported(name, reasons.join("; ")));
        }
    }

    if let Some(max) = rule.dpi {
        let dpi = info
            .dpi
            .ok_or_else(|| unsupported(name, "dpi is not reported for this payload".into()))?;
        if dpi > max {
            return Err(out_of_range(
                name,
                Constraint::MediaDpi,
                format!("{} dpi > {}", dpi, max),
            ));
        }
    }

    if let Some(max) = rule.resolution {
        let res = info
            .resolution
            .ok_or_else(|| unsupported(name, "resolution is not reported for this payload".into()))?;
        if res.width > max.width || res.height > max.height {
            return Err(out_of_range(
                name,
                Constraint::MediaResolution,
                format!(
                    "{}x{} exceeds {}x{}",
                    res.width, res.height, max.width, max.height
                ),
            ));
        }
    }

    Ok(info)
}

fn matches_format(format: &FormatRule, kind: &MediaKind) -> Result<(), String> {
    match (format, kind) {
        (FormatRule::Image, MediaKind::Image) => Ok(()),
        (FormatRule::Video(rule), MediaKind::Video { duration }) => matches_video(rule, *duration),
        (
            FormatRule::Audio(rule),
            MediaKind::Audio {
                format,
                sample_rate,
                bit_depth,
                channels,
                duration,
            },
        ) => {
            if !rule.format.is_empty() && !rule.format.eq_ignore_ascii_case(format) {
                return Err(format!("audio format {} is not {}", format, rule.format));
            }
            exact(rule, "sample rate", rule.sample_rate, *sample_rate)?;
            exact(rule, "bit depth", rule.bit_depth, *bit_depth)?;
            exact(rule, "channels", rule.channels, *channels)?;
            at_most("audio duration", rule.duration, *duration)
        }
        (expected, actual) => Err(format!("{} is not {}", actual.name(), expected.name())),
    }
}

fn matches_video(rule: &VideoRule, duration: Option<f64>) -> Result<(), String> {
    at_most("video duration", rule.duration, duration)
}

fn exact<T: PartialEq + std::fmt::Display>(
    rule: &AudioRule,
    what: &str,
    expected: Option<T>,
    actual: Option<T>,
) -> Result<(), String> {
    match (expected, actual) {
        (None, _) => Ok(()),
        (Some(_), None) => Err(format!("{} of {} audio is not reported", what, rule.format)),
        (Some(e), Some(a)) if e == a => Ok(()),
        (Some(e), Some(a)) => Err(format!("{} {} is not {}", what, a, e)),
    }
}

fn at_most(what: &str, max: Option<f64>, actual: Option<f64>) -> Result<(), String> {
    match (max, actual) {
        (None, _) => Ok(()),
        (Some(_), None) => Err(format!("{} is not reported", what)),
        (Some(max), Some(a)) if a <= max => Ok(()),
        (Some(max), Some(a)) => Err(format!("{} {}s exceeds {}s", what, a, max)),
    }
}
