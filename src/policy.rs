//! Mapping policy: missing-member, null-member and enum representation rules.
//!
//! A [`MappingPolicy`] is a plain value handed to every encode and decode
//! call. Struct schemas and member schemas may override each axis; the
//! override applies to that struct or member only, while nested structs start
//! again from the policy their parent received.

use crate::schema::{EnumSchema, MemberSchema, StructSchema};
use serde::{Deserialize, Serialize};

/// What to do when a typed struct has no wire counterpart for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingMemberAction {
    #[default]
    Error,
    Ignore,
}

/// What to do when a struct member holds a null value during encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullMemberAction {
    #[default]
    Error,
    /// Omit the member from the wire struct.
    Ignore,
    /// Emit the member with a `<nil/>` value.
    Nil,
}

/// Wire representation of enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumRepr {
    /// Integer kind matching the enum's underlying width.
    #[default]
    Numeric,
    /// The constant's name as a string.
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingPolicy {
    pub missing_member: MissingMemberAction,
    pub null_member: NullMemberAction,
    pub enum_repr: EnumRepr,
    /// Set once a struct or member override has chosen the enum
    /// representation, so the enum type's own preference no longer applies.
    #[serde(skip)]
    enum_repr_pinned: bool,
}

impl MappingPolicy {
    pub fn new(
        missing_member: MissingMemberAction,
        null_member: NullMemberAction,
        enum_repr: EnumRepr,
    ) -> Self {
        MappingPolicy {
            missing_member,
            null_member,
            enum_repr,
            enum_repr_pinned: false,
        }
    }

    pub fn with_missing_member(mut self, action: MissingMemberAction) -> Self {
        self.missing_member = action;
        self
    }

    pub fn with_null_member(mut self, action: NullMemberAction) -> Self {
        self.null_member = action;
        self
    }

    pub fn with_enum_repr(mut self, repr: EnumRepr) -> Self {
        self.enum_repr = repr;
        self
    }

    /// Apply the type-level overrides of `schema`.
    pub fn for_struct(&self, schema: &StructSchema) -> MappingPolicy {
        let mut policy = *self;
        if let Some(action) = schema.missing_member {
            policy.missing_member = action;
        }
        if let Some(action) = schema.null_member {
            policy.null_member = action;
        }
        if let Some(repr) = schema.enum_repr {
            policy.enum_repr = repr;
            policy.enum_repr_pinned = true;
        }
        policy
    }

    /// Apply the member-level overrides of `member`.
    pub fn for_member(&self, member: &MemberSchema) -> MappingPolicy {
        let mut policy = *self;
        if let Some(action) = member.missing {
            policy.missing_member = action;
        }
        if let Some(action) = member.null {
            policy.null_member = action;
        }
        if let Some(repr) = member.enum_repr {
            policy.enum_repr = repr;
            policy.enum_repr_pinned = true;
        }
        policy
    }

    /// Representation for a value of enum type `schema`: member and struct
    /// overrides win, then the enum type's own setting, then this policy.
    pub fn enum_repr_for(&self, schema: &EnumSchema) -> EnumRepr {
        if self.enum_repr_pinned {
            return self.enum_repr;
        }
        schema.repr.unwrap_or(self.enum_repr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EnumWidth, TypeHint};

    #[test]
    fn test_member_override_beats_struct_override() {
        let schema = StructSchema::builder("Point")
            .null_member(NullMemberAction::Ignore)
            .member_with(MemberSchema::new("x", TypeHint::Int32).null(NullMemberAction::Nil))
            .member("y", TypeHint::Int32)
            .build();
        let local = MappingPolicy::default().for_struct(&schema);
        assert_eq!(local.null_member, NullMemberAction::Ignore);
        assert_eq!(local.for_member(&schema.members()[0]).null_member, NullMemberAction::Nil);
        assert_eq!(local.for_member(&schema.members()[1]).null_member, NullMemberAction::Ignore);
    }

    #[test]
    fn test_enum_type_repr_applies_unless_pinned() {
        let colors = EnumSchema::builder("Color", EnumWidth::I32)
            .constant("Red", 1)
            .repr(EnumRepr::String)
            .build();
        let caller = MappingPolicy::default();
        assert_eq!(caller.enum_repr_for(&colors), EnumRepr::String);

        let member = MemberSchema::new("c", TypeHint::Enum(colors.clone()))
            .enum_repr(EnumRepr::Numeric);
        assert_eq!(caller.for_member(&member).enum_repr_for(&colors), EnumRepr::Numeric);
    }
}
