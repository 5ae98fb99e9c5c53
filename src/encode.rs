//! Value encoder: writes a native [`Value`] as an XML-RPC `<value>` element.
//!
//! Cycles are only possible through [`SharedValue`] handles, so the encoder
//! keeps the identities of the handles it is currently inside and fails with
//! [`Error::RecursiveStructure`] before it would descend into one of them a
//! second time.

use crate::datetime;
use crate::error::{Error, Result};
use crate::parse_stack::ParseStack;
use crate::policy::{EnumRepr, MappingPolicy, NullMemberAction};
use crate::schema::EnumWidth;
use crate::settings::NonStandard;
use crate::value::{EnumValue, MultiArray, Record, SharedValue, Struct, Value};
use crate::writer::XmlWriter;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashSet;
use std::io::Write;

/// Encode `value` as a single `<value>` element.
pub fn encode_value<W: Write>(
    writer: &mut XmlWriter<'_, W>,
    value: &Value,
    policy: &MappingPolicy,
    compat: &NonStandard,
) -> Result<()> {
    let mut encoder = ValueEncoder::new(writer, compat, ParseStack::new("value"));
    encoder.encode_value(value, policy)
}

pub struct ValueEncoder<'w, 's, W: Write> {
    writer: &'w mut XmlWriter<'s, W>,
    compat: &'w NonStandard,
    in_progress: HashSet<usize>,
    stack: ParseStack,
}

impl<'w, 's, W: Write> ValueEncoder<'w, 's, W> {
    pub fn new(writer: &'w mut XmlWriter<'s, W>, compat: &'w NonStandard, stack: ParseStack) -> Self {
        ValueEncoder {
            writer,
            compat,
            in_progress: HashSet::new(),
            stack,
        }
    }

    pub fn stack_mut(&mut self) -> &mut ParseStack {
        &mut self.stack
    }

    pub fn writer(&mut self) -> &mut XmlWriter<'s, W> {
        &mut *self.writer
    }

    fn unsupported(&self, what: impl std::fmt::Display) -> Error {
        Error::UnsupportedType(self.stack.locate(what))
    }

    // ── Values ─────────────────────────────────────────────────────────────

    /// Write `<value>...</value>` for `value`.
    pub fn encode_value(&mut self, value: &Value, policy: &MappingPolicy) -> Result<()> {
        if let Value::Shared(shared) = value {
            return self.encode_shared(shared, policy);
        }
        self.writer.start("value")?;
        self.encode_content(value, policy)?;
        self.writer.end()
    }

    fn encode_shared(&mut self, shared: &SharedValue, policy: &MappingPolicy) -> Result<()> {
        let key = shared.identity();
        if !self.in_progress.insert(key) {
            return Err(Error::RecursiveStructure(
                self.stack.locate("Cannot serialize recursive data structure"),
            ));
        }
        let result = {
            let inner = shared.lock();
            self.encode_value(&inner, policy)
        };
        self.in_progress.remove(&key);
        result
    }

    fn encode_content(&mut self, value: &Value, policy: &MappingPolicy) -> Result<()> {
        match value {
            Value::Nil => self.encode_nil(),
            Value::Bool(b) => self.writer.element("boolean", if *b { "1" } else { "0" }),
            Value::Int(i) => {
                let tag = self.writer.settings().int_tag();
                self.writer.element(tag, &i.to_string())
            }
            Value::Int64(i) => self.writer.element("i8", &i.to_string()),
            Value::Double(d) => {
                if !d.is_finite() {
                    return Err(self.unsupported(format!("double value {} has no XML-RPC form", d)));
                }
                self.writer.element("double", &d.to_string())
            }
            Value::String(s) => {
                if self.writer.settings().use_string_tag {
                    self.writer.element("string", s)
                } else {
                    self.writer.text(s)
                }
            }
            Value::Base64(bytes) => self.writer.element("base64", &STANDARD.encode(bytes)),
            Value::DateTime(dt) => {
                let text = datetime::format(dt, &self.writer.settings().date_time_format);
                self.writer.element("dateTime.iso8601", &text)
            }
            Value::Array(items) => self.encode_array(items, policy),
            Value::MultiArray(arr) => self.encode_multi_array(arr, policy),
            Value::Struct(map) => self.encode_map(map, policy),
            Value::Record(record) => self.encode_record(record, policy),
            Value::Enum(e) => self.encode_enum(e, policy),
            // Reached only through a nested handle inside `encode_value`.
            Value::Shared(_) => Err(self.unsupported("shared handle outside a value position")),
        }
    }

    fn encode_nil(&mut self) -> Result<()> {
        if !self.compat.allow_nil {
            return Err(Error::NullNotAllowed(
                self.stack.locate("null value cannot be encoded without the nil extension"),
            ));
        }
        self.writer.start("nil")?;
        self.writer.end()
    }

    fn encode_enum(&mut self, value: &EnumValue, policy: &MappingPolicy) -> Result<()> {
        let schema = &value.schema;
        if schema.width == EnumWidth::U64 {
            return Err(self.unsupported(format!(
                "enum {} has an unsigned 64-bit underlying type",
                schema.name
            )));
        }
        match policy.enum_repr_for(schema) {
            EnumRepr::Numeric => {
                let text = value.value.to_string();
                if schema.width.is_wide() {
                    self.writer.element("i8", &text)
                } else {
                    let tag = self.writer.settings().int_tag();
                    self.writer.element(tag, &text)
                }
            }
            EnumRepr::String => {
                let name = value.name().ok_or_else(|| {
                    Error::InvalidEnumValue(self.stack.locate(format!(
                        "value {} is not defined in enum {}",
                        value.value, schema.name
                    )))
                })?;
                self.writer.element("string", name)
            }
        }
    }

    // ── Arrays ─────────────────────────────────────────────────────────────

    fn encode_array(&mut self, items: &[Value], policy: &MappingPolicy) -> Result<()> {
        self.writer.start("array")?;
        self.writer.start("data")?;
        for (i, item) in items.iter().enumerate() {
            self.stack.push(format!("element {}", i));
            self.encode_value(item, policy)?;
            self.stack.pop();
        }
        self.writer.end()?;
        self.writer.end()
    }

    fn encode_multi_array(&mut self, arr: &MultiArray, policy: &MappingPolicy) -> Result<()> {
        self.encode_rank(arr, 0, 0, policy)
    }

    /// Write one `<array>` for rank `level`, starting at row-major `offset`.
    fn encode_rank(
        &mut self,
        arr: &MultiArray,
        level: usize,
        offset: usize,
        policy: &MappingPolicy,
    ) -> Result<()> {
        let dims = arr.dims();
        let stride: usize = dims[level + 1..].iter().product();
        self.writer.start("array")?;
        self.writer.start("data")?;
        for i in 0..dims[level] {
            self.stack.push(format!("element {}", i));
            let at = offset + i * stride;
            if level + 1 == dims.len() {
                self.encode_value(&arr.items()[at], policy)?;
            } else {
                self.writer.start("value")?;
                self.encode_rank(arr, level + 1, at, policy)?;
                self.writer.end()?;
            }
            self.stack.pop();
        }
        self.writer.end()?;
        self.writer.end()
    }

    // ── Structs ────────────────────────────────────────────────────────────

    fn encode_member(&mut self, name: &str, value: &Value, policy: &MappingPolicy) -> Result<()> {
        self.writer.start("member")?;
        self.writer.element("name", name)?;
        self.stack.push(format!("member {}", name));
        self.encode_value(value, policy)?;
        self.stack.pop();
        self.writer.end()
    }

    fn encode_map(&mut self, map: &Struct, policy: &MappingPolicy) -> Result<()> {
        self.writer.start("struct")?;
        for (name, value) in map.iter() {
            self.encode_member(name, value, policy)?;
        }
        self.writer.end()
    }

    fn encode_record(&mut self, record: &Record, inherited: &MappingPolicy) -> Result<()> {
        let schema = record.schema();
        let local = inherited.for_struct(schema);
        self.stack.push(format!("struct mapped to type {}", schema.name));
        self.writer.start("struct")?;
        for (member, value) in record.iter() {
            if member.non_serialized {
                continue;
            }
            let member_policy = local.for_member(member);
            if self.is_null(value) {
                match member_policy.null_member {
                    NullMemberAction::Ignore => continue,
                    NullMemberAction::Error => {
                        return Err(Error::NullNotAllowed(self.stack.locate(format!(
                            "Member \"{}\" of struct \"{}\" cannot be null.",
                            member.wire(),
                            schema.name
                        ))));
                    }
                    NullMemberAction::Nil => {}
                }
            }
            // Nested structs start again from the policy this struct
            // received; only an enum representation chosen here carries over.
            let value_policy = if self.holds_enum(value) {
                member_policy
            } else {
                inherited.for_member(member)
            };
            self.encode_member(member.wire(), value, &value_policy)?;
        }
        self.writer.end()?;
        self.stack.pop();
        Ok(())
    }

    /// Handles already being encoded are not locked again, and a handle
    /// chain that loops back counts as not null; either cycle is reported
    /// when the value is written.
    fn is_null(&self, value: &Value) -> bool {
        value
            .resolve_with(&self.in_progress, |v| matches!(v, Value::Nil))
            .unwrap_or(false)
    }

    fn holds_enum(&self, value: &Value) -> bool {
        let is_enum = |v: &Value| matches!(v, Value::Enum(_));
        value
            .resolve_with(&self.in_progress, |v| match v {
                Value::Enum(_) => true,
                Value::Array(items) => items.iter().any(is_enum),
                Value::MultiArray(arr) => arr.items().iter().any(is_enum),
                _ => false,
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EnumSchema, MemberSchema, StructSchema, TypeHint};
    use crate::settings::FormatSettings;

    fn render(value: &Value, policy: &MappingPolicy) -> Result<String> {
        let settings = FormatSettings::compact();
        let mut out = Vec::new();
        let mut writer = XmlWriter::new(&mut out, &settings);
        encode_value(&mut writer, value, policy, &NonStandard::default())?;
        writer.finish()?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_scalars() {
        let policy = MappingPolicy::default();
        assert_eq!(render(&Value::Int(7), &policy).unwrap(), "<value><i4>7</i4></value>");
        assert_eq!(render(&Value::Int64(-7), &policy).unwrap(), "<value><i8>-7</i8></value>");
        assert_eq!(
            render(&Value::Bool(true), &policy).unwrap(),
            "<value><boolean>1</boolean></value>"
        );
        assert_eq!(
            render(&Value::Double(0.5), &policy).unwrap(),
            "<value><double>0.5</double></value>"
        );
        assert_eq!(
            render(&Value::Base64(b"hello".to_vec()), &policy).unwrap(),
            "<value><base64>aGVsbG8=</base64></value>"
        );
        assert_eq!(render(&Value::Nil, &policy).unwrap(), "<value><nil /></value>");
    }

    #[test]
    fn test_non_finite_double_unsupported() {
        let err = render(&Value::Double(f64::NAN), &MappingPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(_)), "{err}");
    }

    #[test]
    fn test_null_member_three_way_policy() {
        let schema = StructSchema::builder("Person")
            .member("name", TypeHint::String)
            .member("age", TypeHint::Int32)
            .build();
        let record = Record::new(schema)
            .with("name", Value::Nil)
            .unwrap()
            .with("age", 3)
            .unwrap();
        let value = Value::Record(record);

        let err = render(&value, &MappingPolicy::default()).unwrap_err();
        match err {
            Error::NullNotAllowed(msg) => assert!(msg.contains("Member \"name\""), "{msg}"),
            other => panic!("unexpected error {other}"),
        }

        let ignore = MappingPolicy::default().with_null_member(NullMemberAction::Ignore);
        assert_eq!(
            render(&value, &ignore).unwrap(),
            "<value><struct><member><name>age</name><value><i4>3</i4></value></member></struct></value>"
        );

        let nil = MappingPolicy::default().with_null_member(NullMemberAction::Nil);
        assert!(render(&value, &nil).unwrap().contains("<name>name</name><value><nil /></value>"));
    }

    #[test]
    fn test_wire_name_and_non_serialized() {
        let schema = StructSchema::builder("Item")
            .member_with(MemberSchema::new("item_id", TypeHint::Int32).wire_name("itemId"))
            .member_with(MemberSchema::new("cache", TypeHint::String).non_serialized())
            .build();
        let record = Record::new(schema).with("item_id", 5).unwrap();
        assert_eq!(
            render(&Value::Record(record), &MappingPolicy::default()).unwrap(),
            "<value><struct><member><name>itemId</name><value><i4>5</i4></value></member></struct></value>"
        );
    }

    #[test]
    fn test_enum_repr_and_width() {
        let small = EnumSchema::builder("Small", EnumWidth::U8).constant("Two", 2).build();
        let wide = EnumSchema::builder("Wide", EnumWidth::U32).constant("Two", 2).build();
        let huge = EnumSchema::builder("Huge", EnumWidth::U64).constant("Two", 2).build();
        let policy = MappingPolicy::default();

        let two = Value::Enum(EnumValue::new(small.clone(), 2));
        assert_eq!(render(&two, &policy).unwrap(), "<value><i4>2</i4></value>");
        assert_eq!(
            render(&two, &policy.with_enum_repr(EnumRepr::String)).unwrap(),
            "<value><string>Two</string></value>"
        );
        assert_eq!(
            render(&Value::Enum(EnumValue::new(wide, 2)), &policy).unwrap(),
            "<value><i8>2</i8></value>"
        );
        assert!(matches!(
            render(&Value::Enum(EnumValue::new(huge, 2)), &policy),
            Err(Error::UnsupportedType(_))
        ));
        assert!(matches!(
            render(
                &Value::Enum(EnumValue::new(small, 9)),
                &policy.with_enum_repr(EnumRepr::String)
            ),
            Err(Error::InvalidEnumValue(_))
        ));
    }

    #[test]
    fn test_cycle_detected_by_identity() {
        let shared = SharedValue::new(Value::Nil);
        shared.set(Value::Array(vec![Value::Int(1), Value::Shared(shared.clone())]));
        let err = render(&Value::Shared(shared.clone()), &MappingPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::RecursiveStructure(_)), "{err}");
        // break the cycle so the allocation is released
        shared.set(Value::Nil);
    }

    #[test]
    fn test_self_referencing_member_is_recursive() {
        let schema = StructSchema::builder("Node")
            .member("next", TypeHint::Any)
            .build();
        let node = SharedValue::new(Value::Nil);
        node.set(Value::Shared(node.clone()));
        let record = Record::new(schema).with("next", Value::Shared(node.clone())).unwrap();
        let err = render(&Value::Record(record), &MappingPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::RecursiveStructure(_)), "{err}");
        node.set(Value::Nil);
    }

    #[test]
    fn test_record_inside_its_own_handle_is_recursive() {
        let schema = StructSchema::builder("Node")
            .member("next", TypeHint::Any)
            .build();
        let node = SharedValue::new(Value::Nil);
        let record = Record::new(schema).with("next", Value::Shared(node.clone())).unwrap();
        node.set(record);
        let err = render(&Value::Shared(node.clone()), &MappingPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::RecursiveStructure(_)), "{err}");
        node.set(Value::Nil);
    }

    #[test]
    fn test_type_level_policy_does_not_leak_into_nested_struct() {
        let inner = StructSchema::builder("Inner")
            .member("name", TypeHint::String)
            .build();
        let outer = StructSchema::builder("Outer")
            .null_member(NullMemberAction::Ignore)
            .member("inner", TypeHint::Struct(inner.clone()))
            .member("note", TypeHint::String)
            .build();
        let nested = Record::new(inner).with("name", Value::Nil).unwrap();
        let record = Record::new(outer)
            .with("inner", nested)
            .unwrap()
            .with("note", Value::Nil)
            .unwrap();
        let err = render(&Value::Record(record), &MappingPolicy::default()).unwrap_err();
        match err {
            Error::NullNotAllowed(msg) => {
                assert!(msg.contains("Member \"name\" of struct \"Inner\""), "{msg}")
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_struct_enum_repr_reaches_enum_members_only() {
        let color = EnumSchema::builder("Color", EnumWidth::I32).constant("Red", 1).build();
        let inner = StructSchema::builder("Inner")
            .member("c", TypeHint::Enum(color.clone()))
            .build();
        let outer = StructSchema::builder("Outer")
            .enum_repr(EnumRepr::String)
            .member("c", TypeHint::Enum(color.clone()))
            .member("all", TypeHint::array(TypeHint::Enum(color.clone())))
            .member("inner", TypeHint::Struct(inner.clone()))
            .build();
        let red = || Value::Enum(EnumValue::new(color.clone(), 1));
        let record = Record::new(outer)
            .with("c", red())
            .unwrap()
            .with("all", Value::Array(vec![red()]))
            .unwrap()
            .with("inner", Record::new(inner).with("c", red()).unwrap())
            .unwrap();
        assert_eq!(
            render(&Value::Record(record), &MappingPolicy::default()).unwrap(),
            "<value><struct>\
             <member><name>c</name><value><string>Red</string></value></member>\
             <member><name>all</name><value><array><data><value><string>Red</string></value></data></array></value></member>\
             <member><name>inner</name><value><struct><member><name>c</name><value><i4>1</i4></value></member></struct></value></member>\
             </struct></value>"
        );
    }

    #[test]
    fn test_shared_value_repeated_is_not_a_cycle() {
        let shared = SharedValue::new(Value::Int(4));
        let value = Value::Array(vec![Value::Shared(shared.clone()), Value::Shared(shared)]);
        assert_eq!(
            render(&value, &MappingPolicy::default()).unwrap(),
            "<value><array><data><value><i4>4</i4></value><value><i4>4</i4></value></data></array></value>"
        );
    }
}
