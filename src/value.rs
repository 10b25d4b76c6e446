//! Property value carrier and the total order used by ordered containers.
//!
//! Equality is structural and type-strict (`Int(1) != Double(1.0)`), while
//! [`PropertyValue::total_cmp`] defines the fixed cross-type order used for
//! primary keys and index range scans:
//! null < bool < numbers (numeric order, NaN last) < string < list < map <
//! temporal.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Kind of a temporal value, stored alongside a microsecond payload.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum TemporalKind {
    Date,
    LocalTime,
    LocalDateTime,
    Duration,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct TemporalValue {
    pub kind: TemporalKind,
    pub microseconds: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
    Temporal(TemporalValue),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// Rank of the value's type in the cross-type order.
    fn type_rank(&self) -> u8 {
        match self {
            PropertyValue::Null => 0,
            PropertyValue::Bool(_) => 1,
            PropertyValue::Int(_) | PropertyValue::Double(_) => 2,
            PropertyValue::String(_) => 3,
            PropertyValue::List(_) => 4,
            PropertyValue::Map(_) => 5,
            PropertyValue::Temporal(_) => 6,
        }
    }

    /// Total order across all value types, suitable for ordered containers.
    ///
    /// Numeric comparison treats ints and doubles as one family; `NaN` sorts
    /// after every other number so range bounds stay well defined.
    pub fn total_cmp(&self, other: &PropertyValue) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (PropertyValue::Null, PropertyValue::Null) => Ordering::Equal,
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a.cmp(b),
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a.cmp(b),
            (PropertyValue::Int(a), PropertyValue::Double(b)) => cmp_f64(*a as f64, *b),
            (PropertyValue::Double(a), PropertyValue::Int(b)) => cmp_f64(*a, *b as f64),
            (PropertyValue::Double(a), PropertyValue::Double(b)) => cmp_f64(*a, *b),
            (PropertyValue::String(a), PropertyValue::String(b)) => {
                a.as_bytes().cmp(b.as_bytes())
            }
            (PropertyValue::List(a), PropertyValue::List(b)) => {
                for (lhs, rhs) in a.iter().zip(b.iter()) {
                    let ord = lhs.total_cmp(rhs);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (PropertyValue::Map(a), PropertyValue::Map(b)) => {
                // BTreeMap iterates in sorted key order already.
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    let ord = va.total_cmp(vb);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (PropertyValue::Temporal(a), PropertyValue::Temporal(b)) => a.cmp(b),
            _ => unreachable!("ranks matched but variants differ"),
        }
    }

    /// Converts an external wire value. Variants the engine does not store
    /// (for example unsigned integers above `i64::MAX`) degrade to `Null`
    /// instead of failing the whole request.
    pub fn from_wire(value: serde_json::Value) -> PropertyValue {
        match value {
            serde_json::Value::Null => PropertyValue::Null,
            serde_json::Value::Bool(b) => PropertyValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PropertyValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    PropertyValue::Double(f)
                } else {
                    PropertyValue::Null
                }
            }
            serde_json::Value::String(s) => PropertyValue::String(s),
            serde_json::Value::Array(items) => {
                PropertyValue::List(items.into_iter().map(PropertyValue::from_wire).collect())
            }
            serde_json::Value::Object(entries) => PropertyValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, PropertyValue::from_wire(v)))
                    .collect(),
            ),
        }
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        // NaN sorts last within the numeric family.
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => write!(f, "null"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::Double(d) => write!(f, "{d}"),
            PropertyValue::String(s) => write!(f, "{s:?}"),
            PropertyValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            PropertyValue::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            PropertyValue::Temporal(t) => write!(f, "{:?}({})", t.kind, t.microseconds),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

/// A vertex's primary key: the schema-declared property values, in schema
/// order. Ordered by [`PropertyValue::total_cmp`] element-wise, which is the
/// order shards and range scans rely on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrimaryKey(pub SmallVec<[PropertyValue; 2]>);

impl PrimaryKey {
    pub fn new(values: Vec<PropertyValue>) -> Self {
        PrimaryKey(values.into())
    }

    pub fn values(&self) -> &[PropertyValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<PropertyValue>> for PrimaryKey {
    fn from(values: Vec<PropertyValue>) -> Self {
        PrimaryKey(values.into())
    }
}

impl PartialEq for PrimaryKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PrimaryKey {}

impl Ord for PrimaryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (lhs, rhs) in self.0.iter().zip(other.0.iter()) {
            let ord = lhs.total_cmp(rhs);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for PrimaryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}

/// Wrapper giving `PropertyValue` the `Ord` implementation of
/// [`PropertyValue::total_cmp`], for use as part of ordered index keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderedValue(pub PropertyValue);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for OrderedValue {}

impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_type_order() {
        let ordered = [
            PropertyValue::Null,
            PropertyValue::Bool(false),
            PropertyValue::Bool(true),
            PropertyValue::Int(-3),
            PropertyValue::Double(2.5),
            PropertyValue::Int(7),
            PropertyValue::Double(f64::NAN),
            PropertyValue::String("a".into()),
            PropertyValue::String("b".into()),
            PropertyValue::List(vec![PropertyValue::Int(1)]),
            PropertyValue::Map(BTreeMap::new()),
            PropertyValue::Temporal(TemporalValue {
                kind: TemporalKind::Date,
                microseconds: 0,
            }),
        ];
        for window in ordered.windows(2) {
            assert_ne!(
                window[0].total_cmp(&window[1]),
                Ordering::Greater,
                "{} should not sort after {}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn numeric_family_compares_across_types() {
        assert_eq!(
            PropertyValue::Int(1).total_cmp(&PropertyValue::Double(1.0)),
            Ordering::Equal
        );
        assert_eq!(
            PropertyValue::Int(2).total_cmp(&PropertyValue::Double(1.5)),
            Ordering::Greater
        );
        // Structural equality stays type-strict.
        assert_ne!(PropertyValue::Int(1), PropertyValue::Double(1.0));
    }

    #[test]
    fn primary_key_order_is_elementwise() {
        let a = PrimaryKey::new(vec![PropertyValue::Int(1), PropertyValue::Int(2)]);
        let b = PrimaryKey::new(vec![PropertyValue::Int(1), PropertyValue::Int(3)]);
        let prefix = PrimaryKey::new(vec![PropertyValue::Int(1)]);
        assert!(a < b);
        assert!(prefix < a);
    }

    #[test]
    fn wire_values_degrade_to_null() {
        let huge = serde_json::json!(u64::MAX);
        assert!(matches!(
            PropertyValue::from_wire(huge),
            // u64::MAX has no i64 representation but does have an f64 one.
            PropertyValue::Double(_)
        ));
        let nested = serde_json::json!({"a": [1, "x", null]});
        let value = PropertyValue::from_wire(nested);
        match value {
            PropertyValue::Map(entries) => match entries.get("a") {
                Some(PropertyValue::List(items)) => {
                    assert_eq!(items[0], PropertyValue::Int(1));
                    assert_eq!(items[1], PropertyValue::String("x".into()));
                    assert_eq!(items[2], PropertyValue::Null);
                }
                other => panic!("unexpected list: {other:?}"),
            },
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn moves_do_not_clone_containers() {
        let list = PropertyValue::List(vec![PropertyValue::Int(1); 1024]);
        let ptr = match &list {
            PropertyValue::List(items) => items.as_ptr(),
            _ => unreachable!(),
        };
        let moved = list;
        match &moved {
            PropertyValue::List(items) => assert_eq!(items.as_ptr(), ptr),
            _ => unreachable!(),
        }
    }
}
