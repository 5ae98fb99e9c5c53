//! # xmlrpc-serde
//!
//! An XML-RPC codec and client built on top of the `serde` framework.
//!
//! ## Overview
//!
//! XML-RPC carries a small set of value kinds inside `methodCall` and
//! `methodResponse` documents. This crate reads those documents with a
//! streaming [`walker`] that turns XML into a flat sequence of wire nodes,
//! rebuilds typed values with the [`decode`] module, writes them back with
//! the [`encode`] module and frames them with the [`envelope`] module. The
//! [`call`] module drives a request through an asynchronous transport and
//! [`client::XmlRpcClient`] ties everything to HTTP.
//!
//! ## Type mapping
//!
//! | XML-RPC element        | [`Value`] variant | serde (via [`to_value`] / [`from_value`]) |
//! |------------------------|-------------------|-------------------------------------------|
//! | `<i4>` / `<int>`       | `Int`             | `i8`, `i16`, `i32`, `u8`, `u16` |
//! | `<i8>`                 | `Int64`           | `i64`, `u32`, `u64` when it fits |
//! | `<boolean>`            | `Bool`            | `bool` |
//! | `<double>`             | `Double`          | `f32`, `f64` |
//! | `<string>` or bare text | `String`         | `char`, `&str`, `String`, unit variants |
//! | `<base64>`             | `Base64`          | `serde_bytes` buffers |
//! | `<dateTime.iso8601>`   | `DateTime`        | `NaiveDateTime` with [`datetime`] as `with` module |
//! | `<array>`              | `Array` / `MultiArray` | sequences and tuples |
//! | `<struct>`             | `Struct` / `Record` | structs, string-keyed maps, data variants |
//! | `<nil/>`               | `Nil`             | `None`, `()` |
//!
//! ## Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use xmlrpc_serde::settings::{Config, FormatSettings};
//! use xmlrpc_serde::{from_str, to_string};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct State {
//!     name: String,
//!     population: i32,
//! }
//!
//! let config = Config::default().with_format(FormatSettings::compact());
//! let state = State { name: "South Dakota".into(), population: 909_824 };
//!
//! let xml = to_string(&state, &config).unwrap();
//! assert!(xml.starts_with("<value><struct><member><name>name</name>"));
//!
//! let decoded: State = from_str(&xml, &config).unwrap();
//! assert_eq!(decoded, state);
//! ```

pub mod call;
pub mod client;
pub mod datetime;
pub mod de;
pub mod decode;
pub mod encode;
pub mod envelope;
pub mod error;
pub mod http;
pub mod parse_stack;
pub mod policy;
pub mod schema;
pub mod ser;
pub mod settings;
pub mod value;
pub mod walker;
pub mod writer;

pub use call::{CallHandle, CallState, begin_call, end_call};
pub use client::XmlRpcClient;
pub use de::{from_str, from_value};
pub use envelope::{Fault, MethodCall, MethodResponse, MethodSignature, ServiceRegistry};
pub use error::{Error, Result};
pub use policy::{EnumRepr, MappingPolicy, MissingMemberAction, NullMemberAction};
pub use schema::{EnumSchema, EnumWidth, MemberSchema, StructSchema, TypeHint};
pub use ser::{to_string, to_value};
pub use settings::Config;
pub use value::{EnumValue, MultiArray, Record, SharedValue, Struct, Value};

pub use serde::{Deserialize, Serialize};

/// Newtype-struct name under which [`datetime::serialize`] hands a
/// date-time to the serializer, so that it becomes a
/// [`Value::DateTime`] rather than a string.
pub const DATE_TIME_TOKEN: &str = "$xmlrpc_serde::private::DateTime";
