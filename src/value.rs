//! Native values exchanged with the codec.

use crate::error::{Error, Result};
use crate::schema::{EnumSchema, StructSchema};
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

// ── Value ──────────────────────────────────────────────────────────────────

/// A decoded or to-be-encoded XML-RPC value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Base64(Vec<u8>),
    DateTime(NaiveDateTime),
    Array(Vec<Value>),
    MultiArray(MultiArray),
    /// Struct as an ordered key/value mapping.
    Struct(Struct),
    /// Struct as a typed record described by a schema.
    Record(Record),
    Enum(EnumValue),
    /// A value reachable through more than one path. Encoding walks shared
    /// values by identity, so a handle that refers back to itself is
    /// reported as a recursive structure.
    Shared(SharedValue),
}

/// Coarse kind of a value, used for element-type inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Nil,
    Bool,
    Int,
    Int64,
    Double,
    String,
    Base64,
    DateTime,
    Array,
    Struct,
    Enum,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Int64(_) => ValueKind::Int64,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Base64(_) => ValueKind::Base64,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Array(_) | Value::MultiArray(_) => ValueKind::Array,
            Value::Struct(_) | Value::Record(_) => ValueKind::Struct,
            Value::Enum(_) => ValueKind::Enum,
            // a handle chain that loops back on itself holds no value
            Value::Shared(_) => self.resolve(Value::kind).unwrap_or(ValueKind::Nil),
        }
    }

    pub fn is_nil(&self) -> bool {
        self.resolve(|v| matches!(v, Value::Nil)).unwrap_or(false)
    }

    /// Apply `f` to the first value behind a chain of shared handles, or to
    /// `self` when it is not a handle. `None` when the chain loops back.
    pub fn resolve<R>(&self, f: impl FnOnce(&Value) -> R) -> Option<R> {
        self.resolve_with(&HashSet::new(), f)
    }

    /// Like [`resolve`](Self::resolve), but a handle whose identity is in
    /// `held` is never locked and ends the walk with `None`. Callers pass
    /// the handles they are currently holding locks on.
    pub fn resolve_with<R>(&self, held: &HashSet<usize>, f: impl FnOnce(&Value) -> R) -> Option<R> {
        let Value::Shared(first) = self else {
            return Some(f(self));
        };
        let mut seen = HashSet::new();
        let mut current = first.clone();
        loop {
            let key = current.identity();
            if held.contains(&key) || !seen.insert(key) {
                return None;
            }
            let next = match &*current.lock() {
                Value::Shared(inner) => inner.clone(),
                value => return Some(f(value)),
            };
            current = next;
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer value of an `Int`, `Int64` or `Enum`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::Enum(e) => Some(e.value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Base64(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Deep copy with every shared handle replaced by its contents.
    ///
    /// Fails with [`Error::RecursiveStructure`] when a handle refers back to
    /// one of its ancestors.
    pub fn detached(&self) -> Result<Value> {
        let mut in_progress = HashSet::new();
        self.detach_into(&mut in_progress)
    }

    fn detach_into(&self, in_progress: &mut HashSet<usize>) -> Result<Value> {
        Ok(match self {
            Value::Shared(shared) => {
                let key = shared.identity();
                if !in_progress.insert(key) {
                    return Err(Error::RecursiveStructure(
                        "shared value refers back to itself".into(),
                    ));
                }
                let inner = shared.lock().detach_into(in_progress);
                in_progress.remove(&key);
                inner?
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| v.detach_into(in_progress))
                    .collect::<Result<_>>()?,
            ),
            Value::MultiArray(arr) => Value::MultiArray(MultiArray {
                dims: arr.dims.clone(),
                items: arr
                    .items
                    .iter()
                    .map(|v| v.detach_into(in_progress))
                    .collect::<Result<_>>()?,
            }),
            Value::Struct(s) => {
                let mut out = Struct::with_capacity(s.len());
                for (k, v) in s.iter() {
                    out.insert(k.clone(), v.detach_into(in_progress)?);
                }
                Value::Struct(out)
            }
            Value::Record(r) => Value::Record(Record {
                schema: r.schema.clone(),
                values: r
                    .values
                    .iter()
                    .map(|v| v.detach_into(in_progress))
                    .collect::<Result<_>>()?,
            }),
            other => other.clone(),
        })
    }
}

/// Common kind across `items`, or `None` when they disagree or are empty.
/// Nil elements do not break the common kind.
pub fn common_kind(items: &[Value]) -> Option<ValueKind> {
    let mut kind = None;
    for item in items {
        let k = item.kind();
        if k == ValueKind::Nil {
            continue;
        }
        match kind {
            None => kind = Some(k),
            Some(existing) if existing == k => {}
            Some(_) => return None,
        }
    }
    kind
}

macro_rules! impl_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v.into())
            }
        }
    };
}

impl_from!(bool, Bool);
impl_from!(i32, Int);
impl_from!(i64, Int64);
impl_from!(f64, Double);
impl_from!(String, String);
impl_from!(&str, String);
impl_from!(Vec<u8>, Base64);
impl_from!(NaiveDateTime, DateTime);
impl_from!(Vec<Value>, Array);
impl_from!(Struct, Struct);
impl_from!(Record, Record);
impl_from!(MultiArray, MultiArray);
impl_from!(EnumValue, Enum);
impl_from!(SharedValue, Shared);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

// ── Struct ─────────────────────────────────────────────────────────────────

/// Ordered key/value mapping. Keys keep insertion order; inserting an
/// existing key replaces its value in place.
#[derive(Clone, Default)]
pub struct Struct {
    entries: Vec<(String, Value)>,
    /// Position of each key in `entries`.
    index: HashMap<String, usize>,
}

impl Struct {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Struct {
            entries: Vec::with_capacity(n),
            index: HashMap::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        let i = *self.index.get(key)?;
        Some(&mut self.entries[i].1)
    }

    /// Insert `value` under `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.index.remove(key)?;
        let (_, value) = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl fmt::Debug for Struct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl IntoIterator for Struct {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Struct {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut s = Struct::new();
        for (k, v) in iter {
            s.insert(k, v);
        }
        s
    }
}

// ── Record ─────────────────────────────────────────────────────────────────

/// Instance of a typed struct. Values are stored in schema member order;
/// a null member holds [`Value::Nil`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<StructSchema>,
    values: Vec<Value>,
}

impl Record {
    /// New record with every member at its type's default.
    pub fn new(schema: Arc<StructSchema>) -> Self {
        let values = schema.members().iter().map(|m| m.hint.default_value()).collect();
        Record { schema, values }
    }

    pub fn schema(&self) -> &Arc<StructSchema> {
        &self.schema
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.member_index(name).map(|i| &self.values[i])
    }

    /// Set member `name`. Fails when the schema has no such member.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.schema.member_index(name).ok_or_else(|| {
            Error::Message(format!("type {} has no member {}", self.schema.name, name))
        })?;
        self.values[index] = value.into();
        Ok(())
    }

    /// Builder-style [`Record::set`].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    pub(crate) fn set_index(&mut self, index: usize, value: Value) {
        self.values[index] = value;
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Members paired with their values, in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&crate::schema::MemberSchema, &Value)> {
        self.schema.members().iter().zip(self.values.iter())
    }
}

// ── MultiArray ─────────────────────────────────────────────────────────────

/// Rectangular multi-dimensional array stored in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiArray {
    dims: Vec<usize>,
    items: Vec<Value>,
}

impl MultiArray {
    /// Fails unless `dims` has at least one rank and its product equals
    /// the number of items.
    pub fn new(dims: Vec<usize>, items: Vec<Value>) -> Result<Self> {
        if dims.is_empty() {
            return Err(Error::Message("multi-dimensional array needs a rank".into()));
        }
        let expected: usize = dims.iter().product();
        if expected != items.len() {
            return Err(Error::JaggedArray(format!(
                "dimensions {:?} need {} elements, got {}",
                dims,
                expected,
                items.len()
            )));
        }
        Ok(MultiArray { dims, items })
    }

    /// Build a rank-2 array from rows, rejecting rows of unequal length.
    pub fn from_rows(rows: Vec<Vec<Value>>) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != width) {
            return Err(Error::JaggedArray(
                "Multi-dimensional array must not be jagged".into(),
            ));
        }
        let height = rows.len();
        MultiArray::new(vec![height, width], rows.into_iter().flatten().collect())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn get(&self, index: &[usize]) -> Option<&Value> {
        if index.len() != self.dims.len() {
            return None;
        }
        let mut offset = 0;
        for (i, (&idx, &dim)) in index.iter().zip(&self.dims).enumerate() {
            if idx >= dim {
                return None;
            }
            let stride: usize = self.dims[i + 1..].iter().product();
            offset += idx * stride;
        }
        self.items.get(offset)
    }
}

// ── EnumValue ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub schema: Arc<EnumSchema>,
    pub value: i64,
}

impl EnumValue {
    pub fn new(schema: Arc<EnumSchema>, value: i64) -> Self {
        EnumValue { schema, value }
    }

    /// Value of the constant called `name`.
    pub fn named(schema: Arc<EnumSchema>, name: &str) -> Option<Self> {
        let value = schema.value_of(name)?;
        Some(EnumValue { schema, value })
    }

    pub fn name(&self) -> Option<&str> {
        self.schema.name_of(self.value)
    }
}

// ── SharedValue ────────────────────────────────────────────────────────────

/// Reference-counted handle to a value. Equality is handle identity.
#[derive(Clone, Default)]
pub struct SharedValue(Arc<Mutex<Value>>);

impl SharedValue {
    pub fn new(value: impl Into<Value>) -> Self {
        SharedValue(Arc::new(Mutex::new(value.into())))
    }

    pub fn lock(&self) -> MutexGuard<'_, Value> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, value: impl Into<Value>) {
        *self.lock() = value.into();
    }

    /// Address of the shared allocation, used as the identity key.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for SharedValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:#x})", self.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_keeps_insertion_order() {
        let mut s = Struct::new();
        s.insert("b", 1);
        s.insert("a", 2);
        s.insert("b", 3);
        assert_eq!(s.keys().collect::<Vec<_>>(), ["b", "a"]);
        assert_eq!(s.get("b"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_struct_remove_keeps_lookup_consistent() {
        let mut s: Struct = [("a", 1), ("b", 2), ("c", 3)].into_iter().collect();
        assert_eq!(s.remove("a"), Some(Value::Int(1)));
        assert_eq!(s.get("c"), Some(&Value::Int(3)));
        assert!(!s.contains_key("a"));
        s.insert("a", 4);
        assert_eq!(s.keys().collect::<Vec<_>>(), ["b", "c", "a"]);
        assert_eq!(s.get("b"), Some(&Value::Int(2)));
        assert_eq!(s.get("a"), Some(&Value::Int(4)));
    }

    #[test]
    fn test_struct_with_many_members() {
        let s: Struct = (0..20_000).map(|i| (format!("m{}", i), i)).collect();
        assert_eq!(s.len(), 20_000);
        assert_eq!(s.get("m19999"), Some(&Value::Int(19_999)));
        assert_eq!(s.keys().next(), Some("m0"));
    }

    #[test]
    fn test_multi_array_indexing() {
        let arr = MultiArray::from_rows(vec![
            vec![1.into(), 2.into()],
            vec![3.into(), 4.into()],
            vec![5.into(), 6.into()],
        ])
        .unwrap();
        assert_eq!(arr.dims(), [3, 2]);
        assert_eq!(arr.get(&[2, 1]), Some(&Value::Int(6)));
        assert_eq!(arr.get(&[3, 0]), None);
    }

    #[test]
    fn test_from_rows_rejects_jagged() {
        let err = MultiArray::from_rows(vec![vec![1.into(), 2.into()], vec![3.into()]]);
        assert!(matches!(err, Err(Error::JaggedArray(_))));
    }

    #[test]
    fn test_common_kind() {
        assert_eq!(common_kind(&[1.into(), Value::Nil, 2.into()]), Some(ValueKind::Int));
        assert_eq!(common_kind(&[1.into(), "x".into()]), None);
        assert_eq!(common_kind(&[]), None);
    }

    #[test]
    fn test_detached_rejects_cycle() {
        let node = SharedValue::new(Struct::new());
        let mut s = Struct::new();
        s.insert("next", node.clone());
        node.set(s);
        let err = Value::Shared(node).detached();
        assert!(matches!(err, Err(Error::RecursiveStructure(_))));
    }

    #[test]
    fn test_self_referencing_handle_does_not_block() {
        let node = SharedValue::new(Value::Nil);
        node.set(Value::Shared(node.clone()));
        let value = Value::Shared(node.clone());
        assert!(!value.is_nil());
        assert_eq!(value.kind(), ValueKind::Nil);
        assert_eq!(value.resolve(|v| v.clone()), None);

        // two handles pointing at each other
        let a = SharedValue::new(Value::Nil);
        let b = SharedValue::new(Value::Shared(a.clone()));
        a.set(Value::Shared(b.clone()));
        assert!(!Value::Shared(a.clone()).is_nil());

        node.set(Value::Nil);
        a.set(Value::Nil);
    }

    #[test]
    fn test_resolve_follows_handle_chain() {
        let leaf = SharedValue::new(Value::Nil);
        let outer = SharedValue::new(Value::Shared(leaf.clone()));
        assert!(Value::Shared(outer.clone()).is_nil());
        leaf.set(5);
        assert_eq!(Value::Shared(outer.clone()).kind(), ValueKind::Int);

        let mut held = HashSet::new();
        held.insert(leaf.identity());
        assert_eq!(Value::Shared(outer).resolve_with(&held, |v| v.clone()), None);
    }

    #[test]
    fn test_detached_allows_shared_siblings() {
        let leaf = SharedValue::new(7);
        let arr = Value::Array(vec![leaf.clone().into(), leaf.into()]);
        assert_eq!(arr.detached().unwrap(), Value::Array(vec![7.into(), 7.into()]));
    }
}
