//! Numeric increment semantics for cached values.
//!
//! [`Incrementable`] is implemented by value types that support an in-cache
//! `old + delta` step. An absent value starts from [`Incrementable::zero`].

use crate::types::Value;

/// Failure of an increment step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IncrementError {
    /// The currently stored value is not a number.
    #[error("current value is not numeric (found {found})")]
    NonNumericValue { found: &'static str },
    /// The requested delta is not a number.
    #[error("increment is not numeric (found {found})")]
    NonNumericDelta { found: &'static str },
    /// Integer addition overflowed `i64`.
    #[error("integer overflow adding {delta} to {current}")]
    Overflow { current: i64, delta: i64 },
}

/// A value that can be incremented in place inside the cache.
pub trait Incrementable: Sized {
    /// Starting value used when the key holds nothing.
    fn zero() -> Self;

    /// Returns `self + delta`, or why the addition is not possible.
    ///
    /// # Errors
    ///
    /// Returns [`IncrementError`] when either operand is non-numeric or the
    /// addition overflows.
    fn checked_increment(&self, delta: &Self) -> Result<Self, IncrementError>;
}

impl Incrementable for i64 {
    fn zero() -> Self {
        0
    }

    fn checked_increment(&self, delta: &Self) -> Result<Self, IncrementError> {
        self.checked_add(*delta).ok_or(IncrementError::Overflow {
            current: *self,
            delta: *delta,
        })
    }
}

impl Incrementable for f64 {
    fn zero() -> Self {
        0.0
    }

    fn checked_increment(&self, delta: &Self) -> Result<Self, IncrementError> {
        Ok(self + delta)
    }
}

impl Incrementable for Value {
    fn zero() -> Self {
        Value::Int(0)
    }

    // Int + Int stays integral; any float operand promotes the result.
    #[allow(clippy::cast_precision_loss)]
    fn checked_increment(&self, delta: &Self) -> Result<Self, IncrementError> {
        if !delta.is_numeric() {
            return Err(IncrementError::NonNumericDelta {
                found: delta.type_name(),
            });
        }
        match (self, delta) {
            (Value::Int(a), Value::Int(b)) => a.checked_increment(b).map(Value::Int),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (other, _) => Err(IncrementError::NonNumericValue {
                found: other.type_name(),
            }),
        }
    }
}
