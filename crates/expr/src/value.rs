//! Runtime values and the coercion rules between them.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::ExprError;

/// A value produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Bound objects: the `envelope` binding and the `parsedTags` map.
    Object(HashMap<String, Value>),
}

impl Value {
    /// The string rendering used for concatenation and partition keys.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Object(_) => "[object]".to_string(),
        }
    }

    /// Boolean coercion for conditions: `null` is false, anything that is
    /// not a boolean is an error.
    pub fn as_bool(&self) -> Result<bool, ExprError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Null => Ok(false),
            other => Err(ExprError::eval(format!(
                "expected a boolean condition, got {}",
                other.type_name()
            ))),
        }
    }

    /// Coerce to a broker partition number. `None` when the value is not
    /// an integer (or an integral float).
    pub fn as_partition(&self) -> Option<i32> {
        match self {
            Value::Int(i) => i32::try_from(*i).ok(),
            Value::Float(f) if f.fract() == 0.0 => {
                let i = *f as i64;
                i32::try_from(i).ok()
            }
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "decimal",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// `+` — string concatenation when either side is a string, numeric
    /// addition otherwise.
    pub fn add(&self, other: &Value) -> Result<Value, ExprError> {
        if matches!(self, Value::Str(_)) || matches!(other, Value::Str(_)) {
            let mut out = self.display_string();
            out.push_str(&other.display_string());
            return Ok(Value::Str(out));
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| ExprError::eval("integer overflow in '+'")),
            _ => self.numeric_binop(other, "+", |a, b| a + b),
        }
    }

    pub fn sub(&self, other: &Value) -> Result<Value, ExprError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| ExprError::eval("integer overflow in '-'")),
            _ => self.numeric_binop(other, "-", |a, b| a - b),
        }
    }

    pub fn mul(&self, other: &Value) -> Result<Value, ExprError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| ExprError::eval("integer overflow in '*'")),
            _ => self.numeric_binop(other, "*", |a, b| a * b),
        }
    }

    pub fn div(&self, other: &Value) -> Result<Value, ExprError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    Err(ExprError::eval("division by zero"))
                } else {
                    Ok(Value::Int(a / b))
                }
            }
            _ => {
                if other.as_f64() == Some(0.0) {
                    Err(ExprError::eval("division by zero"))
                } else {
                    self.numeric_binop(other, "/", |a, b| a / b)
                }
            }
        }
    }

    pub fn rem(&self, other: &Value) -> Result<Value, ExprError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    Err(ExprError::eval("modulo by zero"))
                } else {
                    Ok(Value::Int(a % b))
                }
            }
            _ => self.numeric_binop(other, "%", |a, b| a % b),
        }
    }

    fn numeric_binop(
        &self,
        other: &Value,
        op: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, ExprError> {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
            _ => Err(ExprError::eval(format!(
                "cannot apply '{op}' to {} and {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// `==` — type-aware, with integer/decimal crossover.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    /// Ordering for `< <= > >=`. Strings compare lexicographically; a
    /// string against a number is parsed numerically (the dialect is
    /// permissive because FIX tag values are all strings).
    pub fn compare(&self, other: &Value) -> Result<Ordering, ExprError> {
        let incomparable = || {
            ExprError::eval(format!(
                "cannot compare {} and {}",
                self.type_name(),
                other.type_name()
            ))
        };
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Str(a), b) if b.as_f64().is_some() => {
                let a: f64 = a.trim().parse().map_err(|_| incomparable())?;
                a.partial_cmp(&b.as_f64().unwrap_or_default())
                    .ok_or_else(incomparable)
            }
            (a, Value::Str(b)) if a.as_f64().is_some() => {
                let b: f64 = b.trim().parse().map_err(|_| incomparable())?;
                a.as_f64()
                    .unwrap_or_default()
                    .partial_cmp(&b)
                    .ok_or_else(incomparable)
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(incomparable),
                _ => Err(incomparable()),
            },
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_concat_wins_over_arithmetic() {
        let v = Value::Str("EQUITY_".into()).add(&Value::Str("AAPL".into())).unwrap();
        assert_eq!(v, Value::Str("EQUITY_AAPL".into()));

        let v = Value::Str("part-".into()).add(&Value::Int(3)).unwrap();
        assert_eq!(v, Value::Str("part-3".into()));
    }

    #[test]
    fn integer_arithmetic_stays_integer() {
        assert_eq!(Value::Int(7).add(&Value::Int(3)).unwrap(), Value::Int(10));
        assert_eq!(Value::Int(7).div(&Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(Value::Int(7).rem(&Value::Int(3)).unwrap(), Value::Int(1));
    }

    #[test]
    fn float_promotion() {
        assert_eq!(
            Value::Int(1).add(&Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(Value::Int(1).div(&Value::Int(0)).is_err());
        assert!(Value::Int(1).rem(&Value::Int(0)).is_err());
    }

    #[test]
    fn equality_crossover() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(Value::Str("D".into()).loose_eq(&Value::Str("D".into())));
        assert!(!Value::Str("1".into()).loose_eq(&Value::Int(1)));
        assert!(Value::Null.loose_eq(&Value::Null));
    }

    #[test]
    fn string_number_comparison_parses() {
        assert_eq!(
            Value::Str("150".into()).compare(&Value::Int(100)).unwrap(),
            Ordering::Greater
        );
        assert!(Value::Str("AAPL".into()).compare(&Value::Int(1)).is_err());
    }

    #[test]
    fn partition_coercion() {
        assert_eq!(Value::Int(3).as_partition(), Some(3));
        assert_eq!(Value::Float(2.0).as_partition(), Some(2));
        assert_eq!(Value::Float(2.5).as_partition(), None);
        assert_eq!(Value::Str("1".into()).as_partition(), None);
        assert_eq!(Value::Null.as_partition(), None);
    }

    #[test]
    fn condition_coercion() {
        assert!(Value::Bool(true).as_bool().unwrap());
        assert!(!Value::Null.as_bool().unwrap());
        assert!(Value::Int(1).as_bool().is_err());
    }
}
