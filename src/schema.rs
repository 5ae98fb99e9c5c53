//! Statically registered type information: what native type the codec
//! should expect, how typed struct members map to wire members, and which
//! constants an enum carries.

use crate::policy::{EnumRepr, MissingMemberAction, NullMemberAction};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

// ── TypeHint ───────────────────────────────────────────────────────────────

/// The native type expected at a position in the value tree.
///
/// [`TypeHint::Any`] accepts every wire kind and is resolved by dispatching
/// on the wire node.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeHint {
    Any,
    Bool,
    Int32,
    Int64,
    Double,
    String,
    Base64,
    DateTime,
    /// A value type that additionally accepts `<nil/>`.
    Nullable(Box<TypeHint>),
    /// One-dimensional array with the given element type.
    Array(Box<TypeHint>),
    /// Rectangular array of `rank` dimensions.
    MultiArray { element: Box<TypeHint>, rank: usize },
    /// Any array; the element type is inferred from the decoded elements.
    AnyArray,
    /// Struct decoded as an ordered key/value mapping.
    Map,
    /// Struct decoded into a typed record.
    Struct(Arc<StructSchema>),
    Enum(Arc<EnumSchema>),
    /// No value (void method return).
    Void,
}

impl TypeHint {
    pub fn nullable(inner: TypeHint) -> Self {
        TypeHint::Nullable(Box::new(inner))
    }

    pub fn array(element: TypeHint) -> Self {
        TypeHint::Array(Box::new(element))
    }

    pub fn multi_array(element: TypeHint, rank: usize) -> Self {
        TypeHint::MultiArray {
            element: Box::new(element),
            rank,
        }
    }

    /// Whether `<nil/>` is an acceptable value for this type.
    pub fn is_nullable(&self) -> bool {
        !matches!(
            self,
            TypeHint::Bool
                | TypeHint::Int32
                | TypeHint::Int64
                | TypeHint::Double
                | TypeHint::DateTime
                | TypeHint::Enum(_)
        )
    }

    /// Value given to a typed-struct member that had no wire counterpart.
    pub fn default_value(&self) -> Value {
        match self {
            TypeHint::Bool => Value::Bool(false),
            TypeHint::Int32 => Value::Int(0),
            TypeHint::Int64 => Value::Int64(0),
            TypeHint::Double => Value::Double(0.0),
            TypeHint::DateTime => Value::DateTime(crate::datetime::min_value()),
            TypeHint::Enum(schema) => Value::Enum(crate::value::EnumValue::new(schema.clone(), 0)),
            _ => Value::Nil,
        }
    }

    /// Short human-readable name used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TypeHint::Any => "any".into(),
            TypeHint::Bool => "bool".into(),
            TypeHint::Int32 => "int32".into(),
            TypeHint::Int64 => "int64".into(),
            TypeHint::Double => "double".into(),
            TypeHint::String => "string".into(),
            TypeHint::Base64 => "byte[]".into(),
            TypeHint::DateTime => "dateTime".into(),
            TypeHint::Nullable(inner) => format!("{}?", inner.describe()),
            TypeHint::Array(inner) => format!("{}[]", inner.describe()),
            TypeHint::MultiArray { element, rank } => {
                format!("{}[{}]", element.describe(), ",".repeat(rank.saturating_sub(1)))
            }
            TypeHint::AnyArray => "array".into(),
            TypeHint::Map => "struct".into(),
            TypeHint::Struct(schema) => schema.name.clone(),
            TypeHint::Enum(schema) => schema.name.clone(),
            TypeHint::Void => "void".into(),
        }
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// ── StructSchema ───────────────────────────────────────────────────────────

/// Member mapping for one field of a typed struct.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSchema {
    pub name: String,
    pub wire_name: Option<String>,
    pub hint: TypeHint,
    pub missing: Option<MissingMemberAction>,
    pub null: Option<NullMemberAction>,
    pub enum_repr: Option<EnumRepr>,
    pub non_serialized: bool,
}

impl MemberSchema {
    pub fn new(name: impl Into<String>, hint: TypeHint) -> Self {
        MemberSchema {
            name: name.into(),
            wire_name: None,
            hint,
            missing: None,
            null: None,
            enum_repr: None,
            non_serialized: false,
        }
    }

    pub fn wire_name(mut self, wire_name: impl Into<String>) -> Self {
        self.wire_name = Some(wire_name.into());
        self
    }

    pub fn missing(mut self, action: MissingMemberAction) -> Self {
        self.missing = Some(action);
        self
    }

    pub fn null(mut self, action: NullMemberAction) -> Self {
        self.null = Some(action);
        self
    }

    pub fn enum_repr(mut self, repr: EnumRepr) -> Self {
        self.enum_repr = Some(repr);
        self
    }

    pub fn non_serialized(mut self) -> Self {
        self.non_serialized = true;
        self
    }

    /// Name the member carries on the wire.
    pub fn wire(&self) -> &str {
        self.wire_name.as_deref().unwrap_or(&self.name)
    }
}

/// Mapping between a typed record and an XML-RPC struct.
#[derive(Debug, Clone, PartialEq)]
pub struct StructSchema {
    pub name: String,
    members: Vec<MemberSchema>,
    pub missing_member: Option<MissingMemberAction>,
    pub null_member: Option<NullMemberAction>,
    pub enum_repr: Option<EnumRepr>,
}

impl StructSchema {
    pub fn builder(name: impl Into<String>) -> StructSchemaBuilder {
        StructSchemaBuilder {
            schema: StructSchema {
                name: name.into(),
                members: Vec::new(),
                missing_member: None,
                null_member: None,
                enum_repr: None,
            },
        }
    }

    pub fn members(&self) -> &[MemberSchema] {
        &self.members
    }

    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    /// Resolve a wire member name to the member's position.
    pub fn member_by_wire_name(&self, wire_name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.wire() == wire_name)
    }
}

pub struct StructSchemaBuilder {
    schema: StructSchema,
}

impl StructSchemaBuilder {
    pub fn member(self, name: impl Into<String>, hint: TypeHint) -> Self {
        self.member_with(MemberSchema::new(name, hint))
    }

    pub fn member_with(mut self, member: MemberSchema) -> Self {
        self.schema.members.push(member);
        self
    }

    pub fn missing_member(mut self, action: MissingMemberAction) -> Self {
        self.schema.missing_member = Some(action);
        self
    }

    pub fn null_member(mut self, action: NullMemberAction) -> Self {
        self.schema.null_member = Some(action);
        self
    }

    pub fn enum_repr(mut self, repr: EnumRepr) -> Self {
        self.schema.enum_repr = Some(repr);
        self
    }

    pub fn build(self) -> Arc<StructSchema> {
        Arc::new(self.schema)
    }
}

// ── EnumSchema ─────────────────────────────────────────────────────────────

/// Underlying storage width of an enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumWidth {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    /// Has no XML-RPC integer kind; encoding fails.
    U64,
}

impl EnumWidth {
    /// Whether `value` fits the underlying storage.
    pub fn contains(self, value: i64) -> bool {
        match self {
            EnumWidth::I8 => i8::try_from(value).is_ok(),
            EnumWidth::U8 => u8::try_from(value).is_ok(),
            EnumWidth::I16 => i16::try_from(value).is_ok(),
            EnumWidth::U16 => u16::try_from(value).is_ok(),
            EnumWidth::I32 => i32::try_from(value).is_ok(),
            EnumWidth::U32 => u32::try_from(value).is_ok(),
            EnumWidth::I64 => true,
            EnumWidth::U64 => value >= 0,
        }
    }

    /// Widths encoded as `<i8>` rather than `<i4>`.
    pub fn is_wide(self) -> bool {
        matches!(self, EnumWidth::U32 | EnumWidth::I64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: String,
    pub width: EnumWidth,
    constants: Vec<(String, i64)>,
    pub repr: Option<EnumRepr>,
}

impl EnumSchema {
    pub fn builder(name: impl Into<String>, width: EnumWidth) -> EnumSchemaBuilder {
        EnumSchemaBuilder {
            schema: EnumSchema {
                name: name.into(),
                width,
                constants: Vec::new(),
                repr: None,
            },
        }
    }

    pub fn constants(&self) -> &[(String, i64)] {
        &self.constants
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.constants
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, _)| n.as_str())
    }

    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.constants
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn is_defined(&self, value: i64) -> bool {
        self.name_of(value).is_some()
    }
}

pub struct EnumSchemaBuilder {
    schema: EnumSchema,
}

impl EnumSchemaBuilder {
    pub fn constant(mut self, name: impl Into<String>, value: i64) -> Self {
        self.schema.constants.push((name.into(), value));
        self
    }

    pub fn repr(mut self, repr: EnumRepr) -> Self {
        self.schema.repr = Some(repr);
        self
    }

    pub fn build(self) -> Arc<EnumSchema> {
        Arc::new(self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_name_resolution() {
        let schema = StructSchema::builder("Person")
            .member_with(MemberSchema::new("full_name", TypeHint::String).wire_name("fullName"))
            .member("age", TypeHint::Int32)
            .build();
        assert_eq!(schema.member_by_wire_name("fullName"), Some(0));
        assert_eq!(schema.member_by_wire_name("full_name"), None);
        assert_eq!(schema.member_by_wire_name("age"), Some(1));
    }

    #[test]
    fn test_enum_width_ranges() {
        assert!(EnumWidth::U8.contains(255));
        assert!(!EnumWidth::U8.contains(256));
        assert!(!EnumWidth::U16.contains(-1));
        assert!(EnumWidth::I8.contains(-128));
        assert!(!EnumWidth::I32.contains(i64::from(i32::MAX) + 1));
        assert!(EnumWidth::U32.is_wide());
        assert!(!EnumWidth::U16.is_wide());
    }

    #[test]
    fn test_nullable_hints() {
        assert!(TypeHint::Any.is_nullable());
        assert!(TypeHint::String.is_nullable());
        assert!(TypeHint::nullable(TypeHint::Int32).is_nullable());
        assert!(!TypeHint::Int32.is_nullable());
        assert_eq!(TypeHint::multi_array(TypeHint::Int32, 2).describe(), "int32[,]");
    }
}
