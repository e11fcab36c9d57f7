// src/vm/table.rs

use rustc_hash::FxHashMap;

use crate::vm::value::{LStr, TableRef, Value};

/// Normalized hash-part key. Integer-valued numbers normalize to `Int` so
/// array and hash accesses agree on which slot a key names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Boolean(bool),
    Int(i64),
    /// Non-integer number, keyed by its bit pattern.
    NumberBits(u64),
    Str(LStr),
}

impl TableKey {
    /// Keys must not be nil; NaN keys are rejected like nil keys.
    pub fn from_value(value: &Value) -> Option<TableKey> {
        match value {
            Value::Nil => None,
            Value::Boolean(b) => Some(TableKey::Boolean(*b)),
            Value::Number(n) if n.is_nan() => None,
            Value::Number(n) => {
                if n.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(n) {
                    Some(TableKey::Int(*n as i64))
                } else {
                    Some(TableKey::NumberBits(n.to_bits()))
                }
            }
            Value::Str(s) => Some(TableKey::Str(s.clone())),
            Value::LightUserdata(p) => Some(TableKey::Int(*p as i64)),
            Value::Table(_) | Value::Closure(_) => None,
        }
    }
}

/// A runtime table: a dense array part for small positive integer keys
/// plus a hash part for everything else.
#[derive(Debug, Default)]
pub struct Table {
    pub array: Vec<Value>,
    pub hash: FxHashMap<TableKey, Value>,
    pub metatable: Option<TableRef>,
    /// Writes to a readonly table are runtime errors.
    pub readonly: bool,
    /// Set on environment tables that have not been mutated since they
    /// were recorded; enables deterministic import pre-resolution.
    pub safe_env: bool,
}

impl Table {
    pub fn new(narray: usize, nhash: usize) -> Self {
        Self {
            array: vec![Value::Nil; narray],
            hash: FxHashMap::with_capacity_and_hasher(nhash, Default::default()),
            metatable: None,
            readonly: false,
            safe_env: false,
        }
    }

    fn array_index(&self, key: &Value) -> Option<usize> {
        if let Value::Number(n) = key {
            if n.fract() == 0.0 && *n >= 1.0 && *n <= self.array.len() as f64 {
                return Some(*n as usize - 1);
            }
        }
        None
    }

    /// Raw get: no metamethods.
    pub fn get(&self, key: &Value) -> Value {
        if let Some(index) = self.array_index(key) {
            return self.array[index].clone();
        }
        let Some(key) = TableKey::from_value(key) else {
            return Value::Nil;
        };
        self.hash.get(&key).cloned().unwrap_or(Value::Nil)
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.hash
            .get(&TableKey::Str(key.into()))
            .cloned()
            .unwrap_or(Value::Nil)
    }

    /// Raw set: no metamethods, no readonly check (callers guard that).
    /// Setting index len+1 grows the array part.
    pub fn set(&mut self, key: &Value, value: Value) {
        if let Some(index) = self.array_index(key) {
            self.array[index] = value;
            return;
        }
        if let Value::Number(n) = key {
            if n.fract() == 0.0 && *n == self.array.len() as f64 + 1.0 {
                self.array.push(value);
                return;
            }
        }
        let Some(key) = TableKey::from_value(key) else {
            return;
        };
        if value.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, value);
        }
    }

    pub fn set_str(&mut self, key: &str, value: Value) {
        self.hash.insert(TableKey::Str(key.into()), value);
    }

    /// Length of the array prefix: the number of leading non-nil slots.
    pub fn length(&self) -> usize {
        self.array
            .iter()
            .position(Value::is_nil)
            .unwrap_or(self.array.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_keys_use_the_array_part() {
        let mut t = Table::new(2, 0);
        t.set(&Value::Number(1.0), Value::Number(10.0));
        t.set(&Value::Number(2.0), Value::Number(20.0));
        t.set(&Value::Number(3.0), Value::Number(30.0));
        assert_eq!(t.array.len(), 3);
        assert_eq!(t.get(&Value::Number(2.0)), Value::Number(20.0));
        assert_eq!(t.length(), 3);
    }

    #[test]
    fn fractional_keys_go_to_the_hash_part() {
        let mut t = Table::new(0, 0);
        t.set(&Value::Number(1.5), Value::Boolean(true));
        assert!(t.array.is_empty());
        assert_eq!(t.get(&Value::Number(1.5)), Value::Boolean(true));
    }

    #[test]
    fn string_keys_round_trip() {
        let mut t = Table::new(0, 0);
        t.set_str("answer", Value::Number(42.0));
        assert_eq!(t.get_str("answer"), Value::Number(42.0));
        assert_eq!(t.get(&Value::Str("answer".into())), Value::Number(42.0));
    }

    #[test]
    fn nil_assignment_erases_hash_entries() {
        let mut t = Table::new(0, 0);
        t.set_str("gone", Value::Number(1.0));
        t.set(&Value::Str("gone".into()), Value::Nil);
        assert!(t.get_str("gone").is_nil());
    }

    #[test]
    fn length_stops_at_the_first_hole() {
        let mut t = Table::new(3, 0);
        t.array[0] = Value::Number(1.0);
        t.array[2] = Value::Number(3.0);
        assert_eq!(t.length(), 1);
    }
}
