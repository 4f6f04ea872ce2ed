use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Runtime value: a number or a struct aggregate.
///
/// Struct members are keyed by their compiler-interned member id; the
/// compiler can map ids back to names for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Struct(BTreeMap<usize, Value>),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Struct(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Struct(members) => {
                write!(f, "{{ ")?;
                for (id, value) in members {
                    write!(f, "{} = {}; ", id, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}
