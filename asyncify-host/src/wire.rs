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

//! Boundary wire messages
//!
//! Protobuf shapes shared with guests. Field numbers are part of the guest
//! contract and must never change. Encoding and decoding is left to `prost`;
//! the typed host model lives in [`crate::value`], [`crate::schema`] and
//! [`crate::futures`], which convert from these messages and reject the
//! states the wire can express but the model cannot (unset oneofs).

use crate::error::{BoundaryError, HostResult};
use prost::Message;

/// Guest memory reference
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Pointer {
    #[prost(uint32, tag = "1")]
    pub ptr: u32,
    #[prost(uint32, tag = "2")]
    pub len: u32,
}

/// Byte payload, inline or by reference
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Bytes {
    #[prost(oneof = "bytes::Data", tags = "1, 2")]
    pub data: ::core::option::Option<bytes::Data>,
}

pub mod bytes {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(bytes = "vec", tag = "1")]
        Raw(::prost::alloc::vec::Vec<u8>),
        #[prost(message, tag = "2")]
        Ptr(super::Pointer),
    }
}

/// UTF-8 payload, inline or by reference (wire name `String`)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Text {
    #[prost(oneof = "text::Data", tags = "1, 2")]
    pub data: ::core::option::Option<text::Data>,
}

pub mod text {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(string, tag = "1")]
        Raw(::prost::alloc::string::String),
        #[prost(message, tag = "2")]
        Ptr(super::Pointer),
    }
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Error {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub reason: ::prost::alloc::string::String,
}

/// Correlation record for an asynchronous call (wire name `WAFuture`)
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Future {
    #[prost(uint32, tag = "1")]
    pub data: u32,
    #[prost(uint32, tag = "2")]
    pub len: u32,
    #[prost(uint32, tag = "3")]
    pub callback: u32,
    #[prost(uint32, tag = "4")]
    pub context: u32,
    #[prost(uint32, tag = "5")]
    pub context_len: u32,
    #[prost(uint32, tag = "6")]
    pub index: u32,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Field {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Entry {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub desc: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ListStrings {
    #[prost(string, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Size {
    #[prost(double, tag = "1")]
    pub width: f64,
    #[prost(double, tag = "2")]
    pub height: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Argument {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "2")]
    pub desc: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(message, optional, tag = "3")]
    pub validator: ::core::option::Option<Validator>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Validator {
    #[prost(bool, tag = "1")]
    pub required: bool,
    #[prost(oneof = "validator::Data", tags = "2, 3, 4, 5")]
    pub data: ::core::option::Option<validator::Data>,
}

pub mod validator {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(message, tag = "2")]
        Media(Media),
        #[prost(message, tag = "3")]
        Int(Int),
        #[prost(message, tag = "4")]
        Double(Double),
        #[prost(message, tag = "5")]
        String(Text),
    }

    #[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
    pub struct Int {
        #[prost(int32, optional, tag = "1")]
        pub min: ::core::option::Option<i32>,
        #[prost(int32, optional, tag = "2")]
        pub max: ::core::option::Option<i32>,
        #[prost(int32, optional, tag = "3")]
        pub default: ::core::option::Option<i32>,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Double {
        #[prost(double, optional, tag = "1")]
        pub min: ::core::option::Option<f64>,
        #[prost(double, optional, tag = "2")]
        pub max: ::core::option::Option<f64>,
        #[prost(double, optional, tag = "3")]
        pub default: ::core::option::Option<f64>,
    }

    /// Wire name `Validator.String`
    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct Text {
        #[prost(uint32, optional, tag = "1")]
        pub min: ::core::option::Option<u32>,
        #[prost(uint32, optional, tag = "2")]
        pub max: ::core::option::Option<u32>,
        #[prost(string, optional, tag = "3")]
        pub default: ::core::option::Option<::prost::alloc::string::String>,
        #[prost(string, optional, tag = "4")]
        pub prefix: ::core::option::Option<::prost::alloc::string::String>,
        #[prost(string, optional, tag = "5")]
        pub suffix: ::core::option::Option<::prost::alloc::string::String>,
        #[prost(string, optional, tag = "6")]
        pub regex: ::core::option::Option<::prost::alloc::string::String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Media {
        #[prost(string, tag = "1")]
        pub mime: ::prost::alloc::string::String,
        #[prost(uint64, optional, tag = "2")]
        pub file_size: ::core::option::Option<u64>,
        #[prost(uint32, optional, tag = "3")]
        pub dpi: ::core::option::Option<u32>,
        #[prost(message, optional, tag = "4")]
        pub resolution: ::core::option::Option<super::Size>,
        #[prost(message, repeated, tag = "6")]
        pub formats: ::prost::alloc::vec::Vec<super::Format>,
    }
}

/// Acceptable media kind; exactly one field is expected to be set
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Format {
    #[prost(message, optional, tag = "1")]
    pub audio: ::core::option::Option<format::Audio>,
    #[prost(message, optional, tag = "2")]
    pub video: ::core::option::Option<format::Video>,
    #[prost(message, optional, tag = "3")]
    pub image: ::core::option::Option<format::Image>,
}

pub mod format {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Audio {
        #[prost(string, tag = "1")]
        pub format: ::prost::alloc::string::String,
        #[prost(double, optional, tag = "2")]
        pub sample_rate: ::core::option::Option<f64>,
        #[prost(uint32, optional, tag = "3")]
        pub bit_depth: ::core::option::Option<u32>,
        #[prost(uint32, optional, tag = "4")]
        pub channels: ::core::option::Option<u32>,
        #[prost(double, optional, tag = "5")]
        pub duration: ::core::option::Option<f64>,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Video {
        #[prost(double, optional, tag = "5")]
        pub duration: ::core::option::Option<f64>,
    }

    #[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
    pub struct Image {}
}

/// One positional argument; `value: None` means the argument is absent
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Arg {
    #[prost(message, optional, tag = "1")]
    pub value: ::core::option::Option<Bytes>,
}

/// A guest's request to run a capability
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Call {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub args: ::prost::alloc::vec::Vec<Arg>,
    /// Callback template for capabilities that complete asynchronously
    #[prost(message, optional, tag = "3")]
    pub future: ::core::option::Option<Future>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reply {
    #[prost(oneof = "reply::Result", tags = "1, 2, 3")]
    pub result: ::core::option::Option<reply::Result>,
}

pub mod reply {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Value(super::Bytes),
        #[prost(message, tag = "2")]
        Error(super::Error),
        #[prost(message, tag = "3")]
        Future(super::Future),
    }
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Fields {
    #[prost(message, repeated, tag = "1")]
    pub fields: ::prost::alloc::vec::Vec<Field>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Catalog {
    #[prost(message, repeated, tag = "1")]
    pub entries: ::prost::alloc::vec::Vec<Entry>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Describe {
    #[prost(message, optional, tag = "1")]
    pub entry: ::core::option::Option<Entry>,
    #[prost(message, repeated, tag = "2")]
    pub arguments: ::prost::alloc::vec::Vec<Argument>,
}

impl From<BoundaryError> for Error {
    fn from(e: BoundaryError) -> Self {
        Self {
            code: e.code,
            reason: e.reason,
        }
    }
}

impl From<Error> for BoundaryError {
    fn from(e: Error) -> Self {
        Self {
            code: e.code,
            reason: e.reason,
        }
    }
}

impl Field {
    pub fn new(kind: impl Into<String>, value: impl ToString) -> Self {
        Self {
            r#type: kind.into(),
            value: value.to_string(),
        }
    }
}

impl Fields {
    /// Look up the first field of the given type
    pub fn get(&self, kind: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.r#type == kind)
            .map(|f| f.value.as_str())
    }
}

/// Decode a protobuf message received from the guest
pub fn decode<M: Message + Default>(buf: &[u8]) -> HostResult<M> {
    Ok(M::decode(buf)?)
}

/// Encode a protobuf message for the guest
pub fn encode<M: Message>(msg: &M) -> Vec<u8> {
    msg.encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_oneof_survives_the_wire() {
        let call = Call {
            id: "image.metadata".into(),
            args: vec![
                Arg { value: None },
                Arg {
                    value: Some(Bytes { data: None }),
                },
            ],
            future: None,
        };
        let decoded: Call = decode(&encode(&call)).unwrap();
        assert_eq!(decoded.args[0].value, None);
        // An empty Bytes message decodes as "present but unset"
        assert_eq!(decoded.args[1].value, Some(Bytes { data: None }));
    }

    #[test]
    fn test_error_conversion() {
        let wire: Error = BoundaryError {
            code: 3001,
            reason: "unknown capability: x".into(),
        }
        .into();
        assert_eq!(wire.code, 3001);
        let back: BoundaryError = wire.into();
        assert_eq!(back.reason, "unknown capability: x");
    }

    #[test]
    fn test_fields_lookup() {
        let fields = Fields {
            fields: vec![Field::new("width", 640), Field::new("height", 480)],
        };
        assert_eq!(fields.get("height"), Some("480"));
        assert_eq!(fields.get("depth"), None);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode::<Call>(&[0xff, 0xff, 0xff]).is_err());
    }
}
