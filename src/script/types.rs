//! Values and type descriptors of the script domain.
//!
//! Every resolved expression produces a [`Value`]. Types are tracked with a
//! small bit set ([`TypeSet`]) so unions such as the output of `%if` can be
//! checked against a function's declared parameter types at parse time.

use std::cmp::Ordering;
use std::fmt;

use super::error::ScriptError;

/// A fully resolved script value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Array(Vec<Value>),
    Map(ScriptMap),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    pub fn type_set(&self) -> TypeSet {
        TypeSet::of(self)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Boolean(_) => "Boolean",
            Value::Array(_) => "Array",
            Value::Map(_) => "Map",
        }
    }

    /// Only scalars may be used as map keys.
    pub fn is_hashable(&self) -> bool {
        matches!(
            self,
            Value::Integer(_) | Value::Float(_) | Value::String(_) | Value::Boolean(_)
        )
    }

    /// Python-style truthiness: zero, empty strings and empty containers are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Integer(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::String(value) => !value.is_empty(),
            Value::Boolean(value) => *value,
            Value::Array(values) => !values.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// String conversion used when an expression is embedded in a larger string.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(value) => value.clone(),
            Value::Integer(value) => value.to_string(),
            Value::Float(value) => format_float(*value),
            Value::Boolean(true) => "True".to_string(),
            Value::Boolean(false) => "False".to_string(),
            Value::Array(_) | Value::Map(_) => self.to_json_string(),
        }
    }

    /// JSON text with `", "` / `": "` separators.
    pub fn to_json_string(&self) -> String {
        let mut out = String::new();
        write_json(self, &mut out);
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Integer(value) => serde_json::Value::from(*value),
            Value::Float(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(value) => serde_json::Value::String(value.clone()),
            Value::Boolean(value) => serde_json::Value::Bool(*value),
            Value::Array(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.to_display_string(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// Converts JSON into the script domain. `null` becomes the empty string.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::String(String::new()),
            serde_json::Value::Bool(value) => Value::Boolean(*value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Value::Integer(value),
                None => Value::Float(number.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(value) => Value::String(value.clone()),
            serde_json::Value::Array(values) => {
                Value::Array(values.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(object) => Value::Map(ScriptMap::from_pairs(
                object
                    .iter()
                    .map(|(key, value)| (Value::String(key.clone()), Value::from_json(value))),
            )),
        }
    }

    /// Equality used by `%eq`, `%array_contains` and map lookups: integers and
    /// floats compare numerically.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Value::Array(left), Value::Array(right)) => {
                left.len() == right.len() && left.iter().zip(right).all(|(l, r)| l.loose_eq(r))
            }
            (Value::Map(left), Value::Map(right)) => {
                left.len() == right.len()
                    && left
                        .iter()
                        .all(|(key, value)| right.get(key).is_some_and(|other| other.loose_eq(value)))
            }
            _ => self == other,
        }
    }

    /// Ordering used by `%lt`, `%gt` and friends.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(left), Value::Integer(right)) => Some(left.cmp(right)),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
            (Value::Boolean(left), Value::Boolean(right)) => Some(left.cmp(right)),
            (Value::Array(left), Value::Array(right)) => {
                for (l, r) in left.iter().zip(right) {
                    match l.compare(r)? {
                        Ordering::Equal => continue,
                        ordering => return Some(ordering),
                    }
                }
                Some(left.len().cmp(&right.len()))
            }
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn write_json(value: &Value, out: &mut String) {
    match value {
        Value::String(text) => out.push_str(&serde_json::Value::String(text.clone()).to_string()),
        Value::Integer(number) => out.push_str(&number.to_string()),
        Value::Float(number) => out.push_str(&format_float(*number)),
        Value::Boolean(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Array(values) => {
            out.push('[');
            for (index, item) in values.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                write_json(item, out);
            }
            out.push(']');
        }
        Value::Map(map) => {
            out.push('{');
            for (index, (key, item)) in map.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                let key = match key {
                    Value::String(_) => key.clone(),
                    other => Value::String(other.to_display_string()),
                };
                write_json(&key, out);
                out.push_str(": ");
                write_json(item, out);
            }
            out.push('}');
        }
    }
}

/// Insertion-ordered map keyed by hashable values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptMap {
    entries: Vec<(Value, Value)>,
}

impl ScriptMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from pairs whose keys are known to be hashable. Later
    /// duplicates replace earlier ones.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut map = Self::new();
        for (key, value) in pairs {
            map.insert_unchecked(key, value);
        }
        map
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), ScriptError> {
        if !key.is_hashable() {
            return Err(ScriptError::KeyNotHashable {
                key: key.to_display_string(),
            });
        }
        self.insert_unchecked(key, value);
        Ok(())
    }

    fn insert_unchecked(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(existing, _)| existing.loose_eq(&key)) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.loose_eq(key))
            .map(|(_, value)| value)
    }

    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.as_str() == Some(key))
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(key, value)| (key, value))
    }
}

/// Set of value types, used both for declared parameter types and for the
/// statically known output type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSet(u8);

impl TypeSet {
    pub const NONE: TypeSet = TypeSet(0);
    pub const INTEGER: TypeSet = TypeSet(1);
    pub const FLOAT: TypeSet = TypeSet(1 << 1);
    pub const STRING: TypeSet = TypeSet(1 << 2);
    pub const BOOLEAN: TypeSet = TypeSet(1 << 3);
    pub const ARRAY: TypeSet = TypeSet(1 << 4);
    pub const MAP: TypeSet = TypeSet(1 << 5);
    /// Unknown until run time (variables, `%map_get`, ...). Compatible with
    /// every declared type; checked again once the value exists.
    pub const ANY: TypeSet = TypeSet(1 << 6);
    pub const NUMERIC: TypeSet = TypeSet(Self::INTEGER.0 | Self::FLOAT.0);
    pub const HASHABLE: TypeSet =
        TypeSet(Self::INTEGER.0 | Self::FLOAT.0 | Self::STRING.0 | Self::BOOLEAN.0);

    pub const fn union(self, other: TypeSet) -> TypeSet {
        TypeSet(self.0 | other.0)
    }

    pub fn of(value: &Value) -> TypeSet {
        match value {
            Value::Integer(_) => Self::INTEGER,
            Value::Float(_) => Self::FLOAT,
            Value::String(_) => Self::STRING,
            Value::Boolean(_) => Self::BOOLEAN,
            Value::Array(_) => Self::ARRAY,
            Value::Map(_) => Self::MAP,
        }
    }

    pub fn is_any(self) -> bool {
        self.0 & Self::ANY.0 != 0
    }

    /// Whether a declared type accepts every member of `produced`.
    pub fn accepts(self, produced: TypeSet) -> bool {
        if self.is_any() || produced.is_any() {
            return true;
        }
        produced.0 & !self.0 == 0
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("AnyArgument");
        }
        if *self == Self::NUMERIC {
            return f.write_str("Numeric");
        }
        if *self == Self::HASHABLE {
            return f.write_str("Hashable");
        }
        let names: Vec<&str> = [
            (Self::INTEGER, "Integer"),
            (Self::FLOAT, "Float"),
            (Self::STRING, "String"),
            (Self::BOOLEAN, "Boolean"),
            (Self::ARRAY, "Array"),
            (Self::MAP, "Map"),
        ]
        .into_iter()
        .filter(|(set, _)| self.0 & set.0 != 0)
        .map(|(_, name)| name)
        .collect();
        match names.as_slice() {
            [] => f.write_str("None"),
            [single] => f.write_str(single),
            many => write!(f, "Union[{}]", many.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_string_matches_script_conventions() {
        assert_eq!(Value::Float(3.0).to_display_string(), "3.0");
        assert_eq!(Value::Float(0.25).to_display_string(), "0.25");
        assert_eq!(Value::Boolean(true).to_display_string(), "True");
        let array = Value::Array(vec![Value::from("a"), Value::Integer(1), Value::Boolean(false)]);
        assert_eq!(array.to_display_string(), r#"["a", 1, false]"#);
        let map = Value::Map(ScriptMap::from_pairs([(Value::Integer(1), Value::from("x"))]));
        assert_eq!(map.to_display_string(), r#"{"1": "x"}"#);
    }

    #[test]
    fn numeric_keys_compare_loosely() {
        let mut map = ScriptMap::new();
        map.insert(Value::Integer(1), Value::from("one")).unwrap();
        assert_eq!(map.get(&Value::Float(1.0)), Some(&Value::from("one")));
        let err = map
            .insert(Value::Array(Vec::new()), Value::from("nope"))
            .unwrap_err();
        assert!(matches!(err, ScriptError::KeyNotHashable { .. }));
    }

    #[test]
    fn union_acceptance() {
        let union = TypeSet::STRING.union(TypeSet::BOOLEAN);
        assert!(!TypeSet::STRING.accepts(union));
        assert!(TypeSet::HASHABLE.accepts(union));
        assert!(TypeSet::STRING.accepts(TypeSet::ANY));
        assert_eq!(union.to_string(), "Union[String, Boolean]");
    }

    #[test]
    fn json_null_becomes_empty_string() {
        let value = Value::from_json(&serde_json::json!({"a": null, "b": [1, 2.5]}));
        let Value::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map.get_str("a"), Some(&Value::from("")));
        assert_eq!(
            map.get_str("b"),
            Some(&Value::Array(vec![Value::Integer(1), Value::Float(2.5)]))
        );
    }
}
