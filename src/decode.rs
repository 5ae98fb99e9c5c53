//! Value decoder: consumes [`WireNode`]s and a [`TypeHint`] and rebuilds a
//! native [`Value`].
//!
//! The decoder owns every typing rule: implicit-string legality, integer
//! widths and overflow, nil against non-nullable types, rectangular array
//! checks, struct member resolution and the missing/duplicate member
//! policies. It never sees XML, so it can be driven from synthetic node
//! sequences as easily as from a [`Walker`](crate::walker::Walker).

use crate::datetime;
use crate::envelope::Fault;
use crate::error::{Error, Result};
use crate::parse_stack::ParseStack;
use crate::policy::{MappingPolicy, MissingMemberAction};
use crate::schema::{EnumSchema, EnumWidth, StructSchema, TypeHint};
use crate::settings::NonStandard;
use crate::value::{EnumValue, MultiArray, Record, Struct, Value, common_kind};
use crate::walker::{ScalarKind, WireNode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashSet;
use std::iter::Peekable;
use std::num::IntErrorKind;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

/// Decode a single value from `nodes`.
pub fn decode_value<I>(
    nodes: I,
    hint: &TypeHint,
    policy: &MappingPolicy,
    compat: &NonStandard,
) -> Result<Value>
where
    I: IntoIterator<Item = Result<WireNode>>,
{
    let mut decoder = ValueDecoder::new(nodes.into_iter(), compat, ParseStack::new("value"));
    let value = decoder.decode_value(hint, policy)?;
    decoder.expect_end()?;
    Ok(value)
}

pub struct ValueDecoder<'a, I: Iterator<Item = Result<WireNode>>> {
    nodes: Peekable<I>,
    compat: &'a NonStandard,
    stack: ParseStack,
}

impl<'a, I: Iterator<Item = Result<WireNode>>> ValueDecoder<'a, I> {
    pub fn new(nodes: I, compat: &'a NonStandard, stack: ParseStack) -> Self {
        ValueDecoder {
            nodes: nodes.peekable(),
            compat,
            stack,
        }
    }

    pub fn stack(&self) -> &ParseStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut ParseStack {
        &mut self.stack
    }

    // ── Node access ────────────────────────────────────────────────────────

    /// Next node, or `None` at the end of the document.
    pub fn next_node(&mut self) -> Result<Option<WireNode>> {
        match self.nodes.next() {
            Some(Ok(node)) => Ok(Some(node)),
            Some(Err(err)) => Err(self.locate(err)),
            None => Ok(None),
        }
    }

    pub fn peek_node(&mut self) -> Result<Option<&WireNode>> {
        if matches!(self.nodes.peek(), Some(Err(_))) {
            if let Some(Err(err)) = self.nodes.next() {
                return Err(self.locate(err));
            }
        }
        Ok(self.nodes.peek().and_then(|r| r.as_ref().ok()))
    }

    fn expect_node(&mut self) -> Result<WireNode> {
        self.next_node()?.ok_or_else(|| {
            Error::InvalidDocument(self.stack.locate("document ends inside a value"))
        })
    }

    /// Fail unless every node has been consumed.
    pub fn expect_end(&mut self) -> Result<()> {
        match self.next_node()? {
            None => Ok(()),
            Some(node) => Err(Error::InvalidDocument(
                self.stack.locate(format!("unexpected {:?} after value", node)),
            )),
        }
    }

    fn locate(&self, err: Error) -> Error {
        match err {
            Error::InvalidDocument(msg) => Error::InvalidDocument(self.stack.locate(msg)),
            other => other,
        }
    }

    fn mismatch(&self, found: &str, hint: &TypeHint) -> Error {
        Error::TypeMismatch(self.stack.locate(format!(
            "{} contains {} value where {} expected",
            self.stack.root(),
            found,
            hint
        )))
    }

    // ── Values ─────────────────────────────────────────────────────────────

    /// Decode the next value against `hint`.
    pub fn decode_value(&mut self, hint: &TypeHint, policy: &MappingPolicy) -> Result<Value> {
        let node = self.expect_node()?;
        self.decode_node(node, hint, policy)
    }

    fn decode_node(
        &mut self,
        node: WireNode,
        hint: &TypeHint,
        policy: &MappingPolicy,
    ) -> Result<Value> {
        if let WireNode::Scalar(ScalarKind::Nil, _) = node {
            return self.decode_nil(hint);
        }
        let hint = strip_nullable(hint);
        match node {
            WireNode::Scalar(kind, text) => self.decode_scalar(kind, text, hint),
            WireNode::ImplicitString(text) => match hint {
                TypeHint::Any | TypeHint::Void | TypeHint::String => Ok(Value::String(text)),
                TypeHint::Enum(schema) => self.enum_from_name(schema, &text),
                _ => Err(self.mismatch("implicit string", hint)),
            },
            WireNode::ArrayBegin => self.decode_array(hint, policy),
            WireNode::StructBegin => self.decode_struct(hint, policy),
            other => Err(Error::InvalidDocument(
                self.stack.locate(format!("unexpected {:?} where a value was expected", other)),
            )),
        }
    }

    fn decode_nil(&mut self, hint: &TypeHint) -> Result<Value> {
        if !self.compat.allow_nil {
            return Err(Error::InvalidDocument(
                self.stack.locate("nil values are not enabled"),
            ));
        }
        if !hint.is_nullable() {
            return Err(self.mismatch("nil", hint));
        }
        Ok(Value::Nil)
    }

    fn decode_scalar(&mut self, kind: ScalarKind, text: String, hint: &TypeHint) -> Result<Value> {
        let any = matches!(hint, TypeHint::Any | TypeHint::Void);
        match kind {
            ScalarKind::String => match hint {
                _ if any => Ok(Value::String(text)),
                TypeHint::String => Ok(Value::String(text)),
                TypeHint::Enum(schema) => self.enum_from_name(schema, &text),
                _ => Err(self.mismatch("string", hint)),
            },
            ScalarKind::Int32 => match hint {
                _ if any => Ok(Value::Int(self.parse_int::<i32>(&text, "int")?)),
                TypeHint::Int32 => Ok(Value::Int(self.parse_int::<i32>(&text, "int")?)),
                TypeHint::Int64 => Ok(Value::Int64(self.parse_int::<i64>(&text, "int")?)),
                TypeHint::Enum(schema) => {
                    let v = self.parse_int::<i64>(&text, "int")?;
                    self.enum_from_number(schema, v)
                }
                _ => Err(self.mismatch("int", hint)),
            },
            ScalarKind::Int64 => match hint {
                _ if any => Ok(Value::Int64(self.parse_int::<i64>(&text, "i8")?)),
                TypeHint::Int64 => Ok(Value::Int64(self.parse_int::<i64>(&text, "i8")?)),
                TypeHint::Enum(schema) => {
                    let v = self.parse_int::<i64>(&text, "i8")?;
                    self.enum_from_number(schema, v)
                }
                _ => Err(self.mismatch("i8", hint)),
            },
            ScalarKind::Boolean => {
                if !any && *hint != TypeHint::Bool {
                    return Err(self.mismatch("boolean", hint));
                }
                match text.trim() {
                    "1" => Ok(Value::Bool(true)),
                    "0" => Ok(Value::Bool(false)),
                    _ => Err(Error::InvalidDocument(self.stack.locate(format!(
                        "{} contains invalid boolean value {:?}",
                        self.stack.root(),
                        text
                    )))),
                }
            }
            ScalarKind::Double => {
                if !any && *hint != TypeHint::Double {
                    return Err(self.mismatch("double", hint));
                }
                match text.trim().parse::<f64>() {
                    Ok(v) if v.is_finite() => Ok(Value::Double(v)),
                    _ => Err(Error::InvalidFormat(self.stack.locate(format!(
                        "{} contains invalid double value {:?}",
                        self.stack.root(),
                        text
                    )))),
                }
            }
            ScalarKind::DateTime => {
                if !any && *hint != TypeHint::DateTime {
                    return Err(self.mismatch("dateTime.iso8601", hint));
                }
                datetime::parse(&text, self.compat)
                    .map(Value::DateTime)
                    .ok_or_else(|| {
                        Error::InvalidFormat(self.stack.locate(format!(
                            "{} contains invalid dateTime value {:?}",
                            self.stack.root(),
                            text
                        )))
                    })
            }
            ScalarKind::Base64 => {
                if !any && *hint != TypeHint::Base64 {
                    return Err(self.mismatch("base64", hint));
                }
                let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                STANDARD.decode(compact.as_bytes()).map(Value::Base64).map_err(|_| {
                    Error::InvalidDocument(self.stack.locate(format!(
                        "{} contains invalid base64 value",
                        self.stack.root()
                    )))
                })
            }
            ScalarKind::Nil => self.decode_nil(hint),
        }
    }

    fn parse_int<T>(&self, text: &str, element: &str) -> Result<T>
    where
        T: std::str::FromStr<Err = std::num::ParseIntError>,
    {
        text.trim().parse::<T>().map_err(|err| {
            let message = format!(
                "{} contains {} value {:?} that is not a valid {}",
                self.stack.root(),
                element,
                text,
                std::any::type_name::<T>()
            );
            match err.kind() {
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                    Error::Overflow(self.stack.locate(message))
                }
                _ => Error::InvalidFormat(self.stack.locate(message)),
            }
        })
    }

    fn enum_from_number(&self, schema: &Arc<EnumSchema>, value: i64) -> Result<Value> {
        if schema.width == EnumWidth::U64 {
            return Err(Error::InvalidEnumValue(self.stack.locate(format!(
                "enum {} has an unsigned 64-bit underlying type with no XML-RPC mapping",
                schema.name
            ))));
        }
        if !schema.width.contains(value) {
            return Err(Error::InvalidEnumValue(self.stack.locate(format!(
                "value {} overflows the underlying type of enum {}",
                value, schema.name
            ))));
        }
        if !schema.is_defined(value) {
            return Err(Error::InvalidEnumValue(self.stack.locate(format!(
                "value {} is not defined in enum {}",
                value, schema.name
            ))));
        }
        Ok(Value::Enum(EnumValue::new(schema.clone(), value)))
    }

    fn enum_from_name(&self, schema: &Arc<EnumSchema>, name: &str) -> Result<Value> {
        EnumValue::named(schema.clone(), name.trim())
            .map(Value::Enum)
            .ok_or_else(|| {
                Error::InvalidEnumValue(self.stack.locate(format!(
                    "{:?} is not a constant of enum {}",
                    name, schema.name
                )))
            })
    }

    // ── Arrays ─────────────────────────────────────────────────────────────

    /// Decode the elements of an array whose `ArrayBegin` was consumed.
    fn decode_array(&mut self, hint: &TypeHint, policy: &MappingPolicy) -> Result<Value> {
        let element = match hint {
            TypeHint::Any | TypeHint::Void | TypeHint::AnyArray => TypeHint::Any,
            TypeHint::Array(element) => element.as_ref().clone(),
            TypeHint::MultiArray { element, rank } => {
                return self.decode_multi_array(element, *rank, policy);
            }
            _ => return Err(self.mismatch("array", hint)),
        };
        let items = self.decode_elements(&element, policy)?;
        if element == TypeHint::Any {
            trace!(kind = ?common_kind(&items), len = items.len(), "inferred array element kind");
        }
        Ok(Value::Array(items))
    }

    fn decode_elements(&mut self, element: &TypeHint, policy: &MappingPolicy) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        while !self.at_array_end()? {
            self.stack.push(format!("element {}", items.len()));
            let item = self.decode_value(element, policy)?;
            self.stack.pop();
            items.push(item);
        }
        Ok(items)
    }

    /// Consume `ArrayEnd` if it is next.
    fn at_array_end(&mut self) -> Result<bool> {
        let at_end = match self.peek_node()? {
            Some(WireNode::ArrayEnd) => true,
            Some(_) => false,
            None => return Err(self.unterminated("array")),
        };
        if at_end {
            self.next_node()?;
        }
        Ok(at_end)
    }

    fn decode_multi_array(
        &mut self,
        element: &TypeHint,
        rank: usize,
        policy: &MappingPolicy,
    ) -> Result<Value> {
        if rank == 0 {
            return Err(Error::Message("multi-dimensional array hint needs a rank".into()));
        }
        self.stack.push(format!("array mapped to type {}", TypeHint::multi_array(element.clone(), rank)));
        let mut dims = vec![None; rank];
        let mut items = Vec::new();
        self.decode_rank(0, element, policy, &mut dims, &mut items)?;
        self.stack.pop();
        let dims = dims.into_iter().map(|d| d.unwrap_or(0)).collect();
        MultiArray::new(dims, items).map(Value::MultiArray)
    }

    /// Decode one rank of a rectangular array. The first sub-array seen at
    /// each rank fixes that rank's length.
    fn decode_rank(
        &mut self,
        level: usize,
        element: &TypeHint,
        policy: &MappingPolicy,
        dims: &mut [Option<usize>],
        items: &mut Vec<Value>,
    ) -> Result<()> {
        let innermost = level + 1 == dims.len();
        let mut count = 0usize;
        while !self.at_array_end()? {
            self.stack.push(format!("element {}", count));
            if innermost {
                items.push(self.decode_value(element, policy)?);
            } else {
                match self.expect_node()? {
                    WireNode::ArrayBegin => {
                        self.decode_rank(level + 1, element, policy, dims, items)?
                    }
                    _ => {
                        return Err(Error::TypeMismatch(self.stack.locate(format!(
                            "expected a nested array for rank {} of {}-dimensional array",
                            level + 2,
                            dims.len()
                        ))));
                    }
                }
            }
            self.stack.pop();
            count += 1;
        }
        match dims[level] {
            None => dims[level] = Some(count),
            Some(expected) if expected != count => {
                return Err(Error::JaggedArray(
                    self.stack.locate("Multi-dimensional array must not be jagged"),
                ));
            }
            Some(_) => {}
        }
        Ok(())
    }

    // ── Structs ────────────────────────────────────────────────────────────

    fn decode_struct(&mut self, hint: &TypeHint, policy: &MappingPolicy) -> Result<Value> {
        match hint {
            TypeHint::Any | TypeHint::Void | TypeHint::Map => self.decode_map(policy),
            TypeHint::Struct(schema) => self.decode_record(schema, policy),
            _ => Err(self.mismatch("struct", hint)),
        }
    }

    /// Read the next member name, or `None` at `StructEnd`.
    fn next_member(&mut self) -> Result<Option<String>> {
        match self.expect_node()? {
            WireNode::StructEnd => Ok(None),
            WireNode::StructMember(name) => Ok(Some(name)),
            other => Err(Error::InvalidDocument(
                self.stack.locate(format!("unexpected {:?} inside struct", other)),
            )),
        }
    }

    fn duplicate(&mut self, name: &str) -> Result<()> {
        if !self.compat.ignore_duplicate_members {
            return Err(Error::DuplicateMember(self.stack.locate(format!(
                "struct contains duplicate member {}",
                name
            ))));
        }
        debug!(member = name, "ignoring duplicate struct member");
        self.skip_value()
    }

    fn decode_map(&mut self, policy: &MappingPolicy) -> Result<Value> {
        let mut map = Struct::new();
        while let Some(name) = self.next_member()? {
            if map.contains_key(&name) {
                self.duplicate(&name)?;
                continue;
            }
            self.stack.push(format!("member {}", name));
            let value = self.decode_value(&TypeHint::Any, policy)?;
            self.stack.pop();
            map.insert(name, value);
        }
        Ok(Value::Struct(map))
    }

    fn decode_record(&mut self, schema: &Arc<StructSchema>, inherited: &MappingPolicy) -> Result<Value> {
        let local = inherited.for_struct(schema);
        self.stack.push(format!("struct mapped to type {}", schema.name));
        let mut record = Record::new(schema.clone());
        let mut assigned = vec![false; schema.members().len()];
        let mut names = HashSet::new();

        while let Some(name) = self.next_member()? {
            if !names.insert(name.clone()) {
                self.duplicate(&name)?;
                continue;
            }
            let Some(index) = schema.member_by_wire_name(&name) else {
                debug!(member = %name, ty = %schema.name, "skipping unknown struct member");
                self.skip_value()?;
                continue;
            };
            let member = &schema.members()[index];
            if member.non_serialized {
                return Err(Error::NonSerializedMember(self.stack.locate(format!(
                    "member {} of type {} is marked non-serialized",
                    member.name, schema.name
                ))));
            }
            self.stack.push(format!("member {}", member.name));
            let value = self.decode_value(&member.hint, &inherited.for_member(member))?;
            self.stack.pop();
            record.set_index(index, value);
            assigned[index] = true;
        }

        let missing: Vec<&str> = schema
            .members()
            .iter()
            .zip(&assigned)
            .filter(|(m, done)| {
                !**done
                    && !m.non_serialized
                    && local.for_member(m).missing_member == MissingMemberAction::Error
            })
            .map(|(m, _)| m.wire())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingMember(self.stack.locate(format!(
                "struct mapped to type {} is missing non-optional member(s): {}",
                schema.name,
                missing.join(", ")
            ))));
        }
        self.stack.pop();
        Ok(Value::Record(record))
    }

    // ── Skipping and buffering ─────────────────────────────────────────────

    /// Consume the next value without decoding it.
    pub fn skip_value(&mut self) -> Result<()> {
        self.take_value(None)
    }

    /// Consume the next value and return its nodes.
    pub fn collect_value(&mut self) -> Result<Vec<WireNode>> {
        let mut nodes = Vec::new();
        self.take_value(Some(&mut nodes))?;
        Ok(nodes)
    }

    fn take_value(&mut self, mut sink: Option<&mut Vec<WireNode>>) -> Result<()> {
        let mut depth = 0usize;
        loop {
            let node = self.expect_node()?;
            match &node {
                WireNode::ArrayBegin | WireNode::StructBegin => depth += 1,
                WireNode::ArrayEnd | WireNode::StructEnd if depth > 0 => depth -= 1,
                WireNode::StructMember(_) if depth > 0 => {}
                WireNode::Scalar(..) | WireNode::ImplicitString(_) => {}
                other => {
                    return Err(Error::InvalidDocument(
                        self.stack.locate(format!("unexpected {:?} where a value was expected", other)),
                    ));
                }
            }
            if let Some(sink) = sink.as_deref_mut() {
                sink.push(node);
            }
            if depth == 0 {
                return Ok(());
            }
        }
    }

    fn unterminated(&self, what: &str) -> Error {
        Error::InvalidDocument(self.stack.locate(format!("document ends inside {}", what)))
    }

    // ── Faults ─────────────────────────────────────────────────────────────

    /// Decode the fault struct that follows a `FaultMarker`.
    ///
    /// A fault whose `faultCode` is not an integer is decoded again with both
    /// members as strings and the code parsed from text; if that fails too,
    /// the first error is returned.
    pub fn decode_fault(&mut self) -> Result<Fault> {
        self.stack.push("fault response");
        let nodes = self.collect_value()?;
        let first = self.decode_buffered(&nodes, int_fault_schema()).and_then(|value| {
            let record = fault_record(value)?;
            Ok(Fault {
                code: record.get("faultCode").and_then(Value::as_i32).unwrap_or_default(),
                message: fault_message(&record),
            })
        });
        let fault = match first {
            Ok(fault) => fault,
            Err(first_err) => {
                let fallback = self
                    .decode_buffered(&nodes, string_fault_schema())
                    .and_then(fault_record)
                    .ok()
                    .and_then(|record| {
                        let code = record.get("faultCode")?.as_str()?.trim().parse::<i32>().ok()?;
                        Some(Fault {
                            code,
                            message: fault_message(&record),
                        })
                    });
                match fallback {
                    Some(fault) => {
                        debug!(code = fault.code, "fault code decoded from string value");
                        fault
                    }
                    None => return Err(first_err),
                }
            }
        };
        self.stack.pop();
        Ok(fault)
    }

    fn decode_buffered(&self, nodes: &[WireNode], schema: &Arc<StructSchema>) -> Result<Value> {
        let mut decoder = ValueDecoder::new(
            nodes.iter().cloned().map(Ok),
            self.compat,
            self.stack.clone(),
        );
        decoder.decode_value(&TypeHint::Struct(schema.clone()), &MappingPolicy::default())
    }
}

fn strip_nullable(mut hint: &TypeHint) -> &TypeHint {
    while let TypeHint::Nullable(inner) = hint {
        hint = inner;
    }
    hint
}

fn fault_record(value: Value) -> Result<Record> {
    match value {
        Value::Record(record) => Ok(record),
        _ => Err(Error::InvalidDocument("fault value is not a struct".into())),
    }
}

fn fault_message(record: &Record) -> String {
    record
        .get("faultString")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn int_fault_schema() -> &'static Arc<StructSchema> {
    static SCHEMA: OnceLock<Arc<StructSchema>> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        StructSchema::builder("Fault")
            .member("faultCode", TypeHint::Int32)
            .member("faultString", TypeHint::String)
            .build()
    })
}

fn string_fault_schema() -> &'static Arc<StructSchema> {
    static SCHEMA: OnceLock<Arc<StructSchema>> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        StructSchema::builder("Fault")
            .member("faultCode", TypeHint::String)
            .member("faultString", TypeHint::String)
            .build()
    })
}
