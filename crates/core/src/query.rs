//! Query vocabulary
//!
//! A [`QuerySpec`] is a lazy description of a result set: an object type,
//! a conjunction of [`Predicate`]s and a list of [`SortDescriptor`]s. Nothing
//! is evaluated until a store (or a frozen snapshot) applies it.
//!
//! Two ways to build predicates:
//! - untyped: `Predicate::compare("id", CompareOp::Gt, 1)`
//! - typed builder: `Query::<Company>::new().field("id").gt(1)`

use crate::error::{StoreError, StoreResult};
use crate::traits::Object;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{BitAnd, BitOr, Not};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn holds(&self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Boolean condition over an object's properties
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every object
    True,
    /// `path op value`
    Compare {
        /// Property key path
        path: String,
        /// Operator
        op: CompareOp,
        /// Right-hand operand
        value: Value,
    },
    /// String property contains `substring`
    Contains {
        /// Property key path
        path: String,
        /// Substring to look for
        substring: String,
    },
    /// Property is null
    IsNull(String),
    /// All sub-predicates hold
    And(Vec<Predicate>),
    /// At least one sub-predicate holds
    Or(Vec<Predicate>),
    /// Sub-predicate does not hold
    Not(Box<Predicate>),
}

impl Predicate {
    /// `path op value`
    pub fn compare(path: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            path: path.into(),
            op,
            value: value.into(),
        }
    }

    /// Conjunction of two predicates
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Disjunction of two predicates
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    /// Evaluate against one object
    ///
    /// A comparison between values of different types never holds, and
    /// neither does `==` against null (use [`Predicate::IsNull`]).
    pub fn evaluate<E: Object>(&self, object: &E) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Compare { path, op, value } => match object.field(path) {
                Some(field) if !field.is_null() && !value.is_null() => field
                    .compare_same_type(value)
                    .map(|ord| op.holds(ord))
                    .unwrap_or(false),
                Some(field) => match op {
                    CompareOp::Eq => field.is_null() && value.is_null(),
                    CompareOp::Ne => field.is_null() != value.is_null(),
                    _ => false,
                },
                None => false,
            },
            Predicate::Contains { path, substring } => object
                .field(path)
                .and_then(|v| v.as_str().map(|s| s.contains(substring.as_str())))
                .unwrap_or(false),
            Predicate::IsNull(path) => object.field(path).map(|v| v.is_null()).unwrap_or(false),
            Predicate::And(all) => all.iter().all(|p| p.evaluate(object)),
            Predicate::Or(any) => any.iter().any(|p| p.evaluate(object)),
            Predicate::Not(inner) => !inner.evaluate(object),
        }
    }

    /// Check that every key path names a property of `E`
    pub fn validate<E: Object>(&self) -> StoreResult<()> {
        match self {
            Predicate::True => Ok(()),
            Predicate::Compare { path, .. }
            | Predicate::Contains { path, .. }
            | Predicate::IsNull(path) => validate_path::<E>(path),
            Predicate::And(list) | Predicate::Or(list) => {
                list.iter().try_for_each(|p| p.validate::<E>())
            }
            Predicate::Not(inner) => inner.validate::<E>(),
        }
    }
}

impl BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Predicate) -> Predicate {
        self.and(rhs)
    }
}

impl BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Predicate) -> Predicate {
        self.or(rhs)
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => write!(f, "TRUEPREDICATE"),
            Predicate::Compare { path, op, value } => {
                write!(f, "{} {} {}", path, op.symbol(), value)
            }
            Predicate::Contains { path, substring } => {
                write!(f, "{} CONTAINS {:?}", path, substring)
            }
            Predicate::IsNull(path) => write!(f, "{} == null", path),
            Predicate::And(all) => write_joined(f, all, " AND "),
            Predicate::Or(any) => write_joined(f, any, " OR "),
            Predicate::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, list: &[Predicate], sep: &str) -> fmt::Result {
    for (i, p) in list.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "({})", p)?;
    }
    Ok(())
}

fn validate_path<E: Object>(path: &str) -> StoreResult<()> {
    if E::PROPERTIES.contains(&path) {
        Ok(())
    } else {
        Err(StoreError::InvalidKeyPath {
            type_name: E::TYPE_NAME,
            path: path.to_string(),
        })
    }
}

/// Ordering by one property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    /// Property key path
    pub key_path: String,
    /// Ascending when true
    pub ascending: bool,
}

impl SortDescriptor {
    /// Ascending order on `key_path`
    pub fn asc(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            ascending: true,
        }
    }

    /// Descending order on `key_path`
    pub fn desc(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            ascending: false,
        }
    }

    /// Order two objects by this descriptor's key path
    pub fn compare<E: Object>(&self, a: &E, b: &E) -> Ordering {
        let left = a.field(&self.key_path).unwrap_or(Value::Null);
        let right = b.field(&self.key_path).unwrap_or(Value::Null);
        let ord = left.cmp(&right);
        if self.ascending {
            ord
        } else {
            ord.reverse()
        }
    }
}

/// Lazy description of a result set
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    /// `Object::TYPE_NAME` of the queried type
    pub type_name: &'static str,
    /// Conjunction of filters, in application order
    pub predicates: Vec<Predicate>,
    /// Sort order; empty means native order
    pub sort: Vec<SortDescriptor>,
    /// Pinned membership: only objects with these primary keys, in this
    /// order, before predicates and sort apply
    pub keys: Option<Vec<Value>>,
}

impl QuerySpec {
    /// Unfiltered, unsorted query over every object of `E`
    pub fn of<E: Object>() -> Self {
        Self {
            type_name: E::TYPE_NAME,
            predicates: Vec::new(),
            sort: Vec::new(),
            keys: None,
        }
    }

    /// Query over the objects of `type_name` whose primary keys are in
    /// `keys`, listed in `keys` order
    pub fn of_keys(type_name: &'static str, keys: Vec<Value>) -> Self {
        Self {
            type_name,
            predicates: Vec::new(),
            sort: Vec::new(),
            keys: Some(keys),
        }
    }

    /// Narrow the query with one more predicate
    pub fn filtered(&self, predicate: Predicate) -> Self {
        let mut next = self.clone();
        next.predicates.push(predicate);
        next
    }

    /// Replace the sort order entirely; the last call wins
    pub fn sorted(&self, descriptors: Vec<SortDescriptor>) -> Self {
        let mut next = self.clone();
        next.sort = descriptors;
        next
    }

    /// Check the query against `E`'s declared properties
    pub fn validate<E: Object>(&self) -> StoreResult<()> {
        if self.type_name != E::TYPE_NAME {
            return Err(StoreError::TypeMismatch {
                expected: self.type_name.to_string(),
                found: E::TYPE_NAME.to_string(),
            });
        }
        for predicate in &self.predicates {
            predicate.validate::<E>()?;
        }
        for descriptor in &self.sort {
            validate_path::<E>(&descriptor.key_path)?;
        }
        Ok(())
    }

    /// Whether `object` satisfies every predicate
    pub fn matches<E: Object>(&self, object: &E) -> bool {
        self.predicates.iter().all(|p| p.evaluate(object))
    }

    /// Order two objects by the sort descriptors, first difference wins
    pub fn compare<E: Object>(&self, a: &E, b: &E) -> Ordering {
        self.sort
            .iter()
            .map(|d| d.compare(a, b))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    /// Filter and sort already-borrowed objects given in native order
    ///
    /// Sorting is stable, so ties keep native order.
    pub fn apply<'a, E: Object>(&self, objects: impl IntoIterator<Item = &'a E>) -> Vec<&'a E> {
        let candidates: Vec<&E> = match &self.keys {
            Some(keys) => {
                let by_key: BTreeMap<Value, &E> =
                    objects.into_iter().map(|o| (o.primary_key(), o)).collect();
                keys.iter().filter_map(|k| by_key.get(k).copied()).collect()
            }
            None => objects.into_iter().collect(),
        };
        let mut matched: Vec<&E> = candidates.into_iter().filter(|o| self.matches(*o)).collect();
        if !self.sort.is_empty() {
            matched.sort_by(|a, b| self.compare(*a, *b));
        }
        matched
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)?;
        if let Some(keys) = &self.keys {
            write!(f, " KEYS({})", keys.len())?;
        }
        if !self.predicates.is_empty() {
            write!(f, " WHERE ")?;
            write_joined(f, &self.predicates, " AND ")?;
        }
        if !self.sort.is_empty() {
            write!(f, " SORT(")?;
            for (i, d) in self.sort.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                let dir = if d.ascending { "ASC" } else { "DESC" };
                write!(f, "{} {}", d.key_path, dir)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Typed predicate builder for `E`
///
/// ```
/// use cordon_core::query::Query;
/// # use cordon_core::{Object, Value};
/// # struct Company { id: i64 }
/// # impl Object for Company {
/// #     const TYPE_NAME: &'static str = "Company";
/// #     const PRIMARY_KEY: &'static str = "id";
/// #     const PROPERTIES: &'static [&'static str] = &["id"];
/// #     fn primary_key(&self) -> Value { Value::Int(self.id) }
/// #     fn field(&self, _: &str) -> Option<Value> { Some(Value::Int(self.id)) }
/// # }
/// let predicate = Query::<Company>::new().field("id").gt(1);
/// assert!(predicate.evaluate(&Company { id: 2 }));
/// ```
pub struct Query<E> {
    _marker: PhantomData<fn() -> E>,
}

impl<E: Object> Query<E> {
    /// Start a builder for `E`
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Refer to one property of `E`
    pub fn field(&self, path: &str) -> Field<E> {
        Field {
            path: path.to_string(),
            _marker: PhantomData,
        }
    }
}

impl<E: Object> Default for Query<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// One property inside a [`Query`] builder
pub struct Field<E> {
    path: String,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Object> Field<E> {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::compare(self.path, op, value)
    }

    /// `field == value`
    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    /// `field != value`
    pub fn ne(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    /// `field < value`
    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    /// `field <= value`
    pub fn le(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Le, value)
    }

    /// `field > value`
    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    /// `field >= value`
    pub fn ge(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ge, value)
    }

    /// String field contains `substring`
    pub fn contains(self, substring: impl Into<String>) -> Predicate {
        Predicate::Contains {
            path: self.path,
            substring: substring.into(),
        }
    }

    /// Field is null
    pub fn is_null(self) -> Predicate {
        Predicate::IsNull(self.path)
    }
}
