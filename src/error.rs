use crate::envelope::Fault;
use serde::{de, ser};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while walking, decoding, encoding or transporting XML-RPC
/// payloads.
///
/// Codec errors carry a message that ends with the parse-stack breadcrumb of
/// the location that failed, e.g. `[response : parameter 1 : member id]`.
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying markup is not well-formed XML.
    #[error("ill-formed XML: {0}")]
    IllFormedXml(String),

    /// Well-formed XML that violates the XML-RPC grammar.
    #[error("invalid XML-RPC document: {0}")]
    InvalidDocument(String),

    /// Wire value kind is incompatible with the expected native type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Numeric value has no named constant or overflows the enum width.
    #[error("invalid enum value: {0}")]
    InvalidEnumValue(String),

    /// Argument count or shape does not match the method signature.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The resolver does not know the requested method.
    #[error("unsupported method called: {0}")]
    UnsupportedMethod(String),

    /// A value has no XML-RPC mapping.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// A request argument has no XML-RPC mapping.
    #[error("invalid parameter type: {0}")]
    InvalidParameterType(String),

    /// A response value has no XML-RPC mapping.
    #[error("invalid return type: {0}")]
    InvalidReturnType(String),

    /// A null value hit a member or parameter that does not accept it.
    #[error("null value not allowed: {0}")]
    NullNotAllowed(String),

    /// The value graph refers back to a value that is still being encoded.
    #[error("recursive structure: {0}")]
    RecursiveStructure(String),

    /// Required struct members were absent from the wire struct.
    #[error("missing member: {0}")]
    MissingMember(String),

    /// A struct repeats a member name.
    #[error("duplicate member: {0}")]
    DuplicateMember(String),

    /// A wire member maps onto a member excluded from serialization.
    #[error("non-serialized member: {0}")]
    NonSerializedMember(String),

    /// Numeric text is out of range for the requested width.
    #[error("value overflow: {0}")]
    Overflow(String),

    /// Scalar text does not parse as the requested type.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A multi-dimensional array is not rectangular.
    #[error("jagged array: {0}")]
    JaggedArray(String),

    /// The server answered with an XML-RPC fault.
    #[error("server returned a fault exception: [{}] {}", .0.code, .0.message)]
    Fault(Fault),

    /// The HTTP exchange completed with a non-success status.
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// The transport failed before a response body was read.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A custom error message from serde.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// True when the error originates from the codec rather than the peer or
    /// the transport.
    pub fn is_codec_error(&self) -> bool {
        !matches!(
            self,
            Error::Fault(_) | Error::HttpStatus(_) | Error::Transport(_) | Error::Io(_)
        )
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(io) => Error::Io(
                Arc::try_unwrap(io).unwrap_or_else(|io| std::io::Error::new(io.kind(), io.to_string())),
            ),
            other => Error::IllFormedXml(other.to_string()),
        }
    }
}

impl ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}
