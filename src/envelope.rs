//! `methodCall` and `methodResponse` documents.
//!
//! The envelope layer frames values into requests and responses, checks
//! argument counts against a [`MethodSignature`] obtained from a
//! [`ServiceResolver`], and tells success responses apart from faults.
//!
//! ```rust
//! use xmlrpc_serde::envelope::{MethodCall, serialize_request};
//! use xmlrpc_serde::settings::{Config, FormatSettings};
//! use xmlrpc_serde::Value;
//!
//! let config = Config::default().with_format(FormatSettings {
//!     omit_xml_declaration: true,
//!     ..FormatSettings::compact()
//! });
//! let call = MethodCall::new("examples.getStateName", vec![Value::Int(1)]);
//! let xml = serialize_request(&call, None, &config).unwrap();
//! assert_eq!(
//!     String::from_utf8(xml).unwrap(),
//!     "<methodCall><methodName>examples.getStateName</methodName>\
//!      <params><param><value><i4>1</i4></value></param></params></methodCall>"
//! );
//! ```

use crate::decode::ValueDecoder;
use crate::encode::ValueEncoder;
use crate::error::{Error, Result};
use crate::parse_stack::ParseStack;
use crate::policy::MappingPolicy;
use crate::schema::{StructSchema, TypeHint};
use crate::settings::Config;
use crate::value::{Struct, Value};
use crate::walker::{Walker, WireNode};
use crate::writer::XmlWriter;
use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, Write};

// ── Messages ───────────────────────────────────────────────────────────────

/// Application-level error carried by a fault response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

impl Fault {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Fault {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<Value>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        MethodCall {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    /// `None` for a void method or an empty `params` element.
    Success(Option<Value>),
    Fault(Fault),
}

impl MethodResponse {
    /// Turn a fault into [`Error::Fault`].
    pub fn into_result(self) -> Result<Option<Value>> {
        match self {
            MethodResponse::Success(value) => Ok(value),
            MethodResponse::Fault(fault) => Err(Error::Fault(fault)),
        }
    }
}

// ── Method signatures ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub name: String,
    pub hint: TypeHint,
}

/// Parameter and return types of one method.
///
/// A variadic method declares its tail as the last parameter, typed as an
/// array; on the wire the tail's elements are sibling `param`s.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<ParamInfo>,
    pub variadic: bool,
    /// Pass the parameters as members of a single struct param.
    pub struct_params: bool,
    pub returns: TypeHint,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>) -> Self {
        MethodSignature {
            name: name.into(),
            params: Vec::new(),
            variadic: false,
            struct_params: false,
            returns: TypeHint::Void,
        }
    }

    pub fn param(mut self, name: impl Into<String>, hint: TypeHint) -> Self {
        self.params.push(ParamInfo {
            name: name.into(),
            hint,
        });
        self
    }

    /// Make the last parameter a variadic tail.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn struct_params(mut self) -> Self {
        self.struct_params = true;
        self
    }

    pub fn returns(mut self, hint: TypeHint) -> Self {
        self.returns = hint;
        self
    }

    /// Number of parameters a request must carry.
    pub fn required_params(&self) -> usize {
        if self.variadic {
            self.params.len().saturating_sub(1)
        } else {
            self.params.len()
        }
    }

    /// Element type of the variadic tail.
    fn variadic_element(&self) -> Option<TypeHint> {
        if !self.variadic {
            return None;
        }
        self.params.last().map(|p| match &p.hint {
            TypeHint::Array(element) => element.as_ref().clone(),
            _ => TypeHint::Any,
        })
    }
}

/// Looks up the signature of a method by its wire name.
pub trait ServiceResolver {
    fn resolve(&self, method: &str) -> Option<&MethodSignature>;
}

/// In-memory [`ServiceResolver`].
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    methods: HashMap<String, MethodSignature>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, signature: MethodSignature) {
        self.methods.insert(signature.name.clone(), signature);
    }

    pub fn with(mut self, signature: MethodSignature) -> Self {
        self.register(signature);
        self
    }
}

impl ServiceResolver for ServiceRegistry {
    fn resolve(&self, method: &str) -> Option<&MethodSignature> {
        self.methods.get(method)
    }
}

// ── Serialization ──────────────────────────────────────────────────────────

/// Serialize a request into a new buffer.
pub fn serialize_request(
    call: &MethodCall,
    signature: Option<&MethodSignature>,
    config: &Config,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    serialize_request_to(&mut buf, call, signature, config)?;
    Ok(buf)
}

/// Serialize a request into `writer`.
pub fn serialize_request_to<W: Write>(
    writer: W,
    call: &MethodCall,
    signature: Option<&MethodSignature>,
    config: &Config,
) -> Result<()> {
    if let Some(sig) = signature {
        check_arity(call, sig)?;
    }
    let mut xml = XmlWriter::new(writer, &config.format);
    xml.declaration()?;
    xml.start("methodCall")?;
    xml.element("methodName", &call.method)?;
    if !call.params.is_empty() || config.format.use_empty_params_tag {
        xml.start("params")?;
        let mut encoder = ValueEncoder::new(&mut xml, &config.non_standard, ParseStack::request());
        let written = match signature {
            Some(sig) if sig.struct_params => write_struct_params(&mut encoder, call, sig, &config.policy),
            _ => write_params(&mut encoder, call, signature, &config.policy),
        };
        written.map_err(|err| match err {
            Error::UnsupportedType(msg) => Error::InvalidParameterType(msg),
            other => other,
        })?;
        xml.end()?;
    }
    xml.finish()
}

fn check_arity(call: &MethodCall, signature: &MethodSignature) -> Result<()> {
    if call.params.len() > signature.params.len() {
        return Err(Error::InvalidParameters(
            "Number of request parameters greater than number of method parameters.".into(),
        ));
    }
    if signature.struct_params {
        if signature.variadic {
            return Err(Error::InvalidParameters(
                "variadic parameter cannot be used with struct params".into(),
            ));
        }
    } else if call.params.len() < signature.required_params() {
        return Err(Error::InvalidParameters(
            "Number of request parameters less than number of method parameters.".into(),
        ));
    }
    Ok(())
}

fn write_param<W: Write>(
    encoder: &mut ValueEncoder<'_, '_, W>,
    number: usize,
    value: &Value,
    policy: &MappingPolicy,
) -> Result<()> {
    encoder.writer().start("param")?;
    encoder.stack_mut().push(format!("parameter {}", number));
    encoder.encode_value(value, policy)?;
    encoder.stack_mut().pop();
    encoder.writer().end()
}

fn write_params<W: Write>(
    encoder: &mut ValueEncoder<'_, '_, W>,
    call: &MethodCall,
    signature: Option<&MethodSignature>,
    policy: &MappingPolicy,
) -> Result<()> {
    let tail = signature
        .filter(|sig| sig.variadic)
        .and_then(|sig| sig.params.len().checked_sub(1));
    let mut number = 1;
    for (i, arg) in call.params.iter().enumerate() {
        if Some(i) == tail {
            let Value::Array(items) = arg else {
                return Err(Error::InvalidParameters(format!(
                    "variadic parameter {} must be an array",
                    i + 1
                )));
            };
            for item in items {
                write_param(encoder, number, item, policy)?;
                number += 1;
            }
            break;
        }
        write_param(encoder, number, arg, policy)?;
        number += 1;
    }
    Ok(())
}

fn write_struct_params<W: Write>(
    encoder: &mut ValueEncoder<'_, '_, W>,
    call: &MethodCall,
    signature: &MethodSignature,
    policy: &MappingPolicy,
) -> Result<()> {
    let members: Struct = signature
        .params
        .iter()
        .zip(&call.params)
        .map(|(param, arg)| (param.name.clone(), arg.clone()))
        .collect();
    write_param(encoder, 1, &Value::Struct(members), policy)
}

/// Serialize a response into a new buffer.
pub fn serialize_response(response: &MethodResponse, config: &Config) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    serialize_response_to(&mut buf, response, config)?;
    Ok(buf)
}

/// Serialize a response into `writer`. A void success is written as an
/// empty string value.
pub fn serialize_response_to<W: Write>(
    writer: W,
    response: &MethodResponse,
    config: &Config,
) -> Result<()> {
    let mut xml = XmlWriter::new(writer, &config.format);
    xml.declaration()?;
    xml.start("methodResponse")?;
    match response {
        MethodResponse::Fault(fault) => {
            xml.start("fault")?;
            let mut members = Struct::with_capacity(2);
            members.insert("faultCode", fault.code);
            members.insert("faultString", fault.message.as_str());
            let mut encoder = ValueEncoder::new(&mut xml, &config.non_standard, ParseStack::response());
            encoder.encode_value(&Value::Struct(members), &config.policy)?;
            xml.end()?;
        }
        MethodResponse::Success(value) => {
            let empty = Value::String(String::new());
            let value = value.as_ref().unwrap_or(&empty);
            xml.start("params")?;
            xml.start("param")?;
            let mut encoder = ValueEncoder::new(&mut xml, &config.non_standard, ParseStack::response());
            encoder
                .encode_value(value, &config.policy)
                .map_err(|err| match err {
                    Error::UnsupportedType(msg) => Error::InvalidReturnType(msg),
                    other => other,
                })?;
            xml.end()?;
            xml.end()?;
        }
    }
    xml.finish()
}

// ── Deserialization ────────────────────────────────────────────────────────

/// Parse a request. With a resolver, the method must be known and the
/// parameters are decoded against its signature; without one every
/// parameter is decoded unconstrained.
pub fn deserialize_request<R: BufRead>(
    source: R,
    resolver: Option<&dyn ServiceResolver>,
    config: &Config,
) -> Result<MethodCall> {
    let mut decoder = ValueDecoder::new(Walker::request(source), &config.non_standard, ParseStack::request());
    let method = match decoder.next_node()? {
        Some(WireNode::MethodName(name)) => name,
        other => {
            return Err(Error::InvalidDocument(format!(
                "expected methodName, found {:?}",
                other
            )));
        }
    };
    let signature = match resolver {
        Some(resolver) => Some(
            resolver
                .resolve(&method)
                .ok_or_else(|| Error::UnsupportedMethod(method.clone()))?,
        ),
        None => None,
    };

    match decoder.next_node()? {
        Some(WireNode::ParamsMarker) => {}
        None => {
            return match signature {
                Some(sig) if sig.required_params() > 0 || sig.struct_params && !sig.params.is_empty() => {
                    Err(Error::InvalidParameters(
                        "Method takes parameters and params element is missing.".into(),
                    ))
                }
                Some(sig) if sig.variadic => Ok(MethodCall::new(method, vec![Value::Array(Vec::new())])),
                _ => Ok(MethodCall::new(method, Vec::new())),
            };
        }
        Some(other) => {
            return Err(Error::InvalidDocument(format!(
                "unexpected {:?} after methodName",
                other
            )));
        }
    }

    let params = match signature {
        Some(sig) if sig.struct_params => read_struct_params(&mut decoder, sig, &config.policy)?,
        _ => read_params(&mut decoder, signature, &config.policy)?,
    };
    decoder.expect_end()?;
    Ok(MethodCall::new(method, params))
}

fn read_params<I: Iterator<Item = Result<WireNode>>>(
    decoder: &mut ValueDecoder<'_, I>,
    signature: Option<&MethodSignature>,
    policy: &MappingPolicy,
) -> Result<Vec<Value>> {
    let min = signature.map_or(usize::MAX, MethodSignature::required_params);
    let tail_hint = signature.and_then(MethodSignature::variadic_element);
    let mut params = Vec::new();
    let mut tail = Vec::new();
    let mut count = 0;
    while decoder.peek_node()?.is_some() {
        count += 1;
        let hint = match signature {
            None => TypeHint::Any,
            Some(sig) if count <= min => sig.params[count - 1].hint.clone(),
            Some(_) => match &tail_hint {
                Some(hint) => hint.clone(),
                None => {
                    return Err(Error::InvalidParameters(
                        "Request contains too many param elements based on method signature."
                            .into(),
                    ));
                }
            },
        };
        decoder.stack_mut().push(format!("parameter {}", count));
        let value = decoder.decode_value(&hint, policy)?;
        decoder.stack_mut().pop();
        if count <= min {
            params.push(value);
        } else {
            tail.push(value);
        }
    }
    if signature.is_some() && count < min {
        return Err(Error::InvalidParameters(
            "Request contains too few param elements based on method signature.".into(),
        ));
    }
    if tail_hint.is_some() {
        params.push(Value::Array(tail));
    }
    Ok(params)
}

fn read_struct_params<I: Iterator<Item = Result<WireNode>>>(
    decoder: &mut ValueDecoder<'_, I>,
    signature: &MethodSignature,
    policy: &MappingPolicy,
) -> Result<Vec<Value>> {
    let schema = signature
        .params
        .iter()
        .fold(StructSchema::builder(signature.name.as_str()), |builder, param| {
            builder.member(param.name.as_str(), param.hint.clone())
        })
        .build();
    if decoder.peek_node()?.is_none() {
        return Err(Error::InvalidParameters(
            "Method takes parameters and params element is empty.".into(),
        ));
    }
    decoder.stack_mut().push("parameter 1");
    let value = decoder.decode_value(&TypeHint::Struct(schema), policy)?;
    decoder.stack_mut().pop();
    if decoder.peek_node()?.is_some() {
        return Err(Error::InvalidParameters(
            "Request with struct params contains more than one param element.".into(),
        ));
    }
    match value {
        Value::Record(record) => Ok(record.values().to_vec()),
        _ => Err(Error::InvalidParameters("struct params did not decode to a struct".into())),
    }
}

/// Parse a response, decoding its value against `returns`.
pub fn deserialize_response<R: BufRead>(
    mut source: R,
    returns: &TypeHint,
    config: &Config,
) -> Result<MethodResponse> {
    if config.non_standard.allow_invalid_http_content {
        skip_leading_whitespace(&mut source)?;
    }
    let mut decoder = ValueDecoder::new(Walker::response(source), &config.non_standard, ParseStack::response());
    let response = match decoder.next_node()? {
        Some(WireNode::FaultMarker) => MethodResponse::Fault(decoder.decode_fault()?),
        Some(WireNode::ParamsMarker) => {
            if decoder.peek_node()?.is_none() {
                MethodResponse::Success(None)
            } else if *returns == TypeHint::Void {
                decoder.skip_value()?;
                MethodResponse::Success(None)
            } else {
                MethodResponse::Success(Some(decoder.decode_value(returns, &config.policy)?))
            }
        }
        other => {
            return Err(Error::InvalidDocument(format!(
                "expected params or fault in response, found {:?}",
                other
            )));
        }
    };
    decoder.expect_end()?;
    Ok(response)
}

/// Drop CR, LF, tab and space bytes that precede the document.
fn skip_leading_whitespace<R: BufRead>(source: &mut R) -> Result<()> {
    loop {
        let buf = source.fill_buf()?;
        if buf.is_empty() {
            return Err(Error::IllFormedXml(
                "Response from server does not contain valid XML.".into(),
            ));
        }
        let skip = buf
            .iter()
            .take_while(|b| matches!(b, b'\r' | b'\n' | b' ' | b'\t'))
            .count();
        let done = skip < buf.len();
        source.consume(skip);
        if done {
            return Ok(());
        }
    }
}
