use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CalcError;

/// The fixed set of binary operations the service knows about.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[archive(check_bytes)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Modulo,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Add,
        Operation::Subtract,
        Operation::Multiply,
        Operation::Divide,
        Operation::Power,
        Operation::Modulo,
    ];

    /// Looks up an operation by its exact wire name.
    pub fn resolve(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
            Operation::Power => "power",
            Operation::Modulo => "modulo",
        }
    }

    /// Infix symbol used by the CLI.
    pub fn symbol(self) -> char {
        match self {
            Operation::Add => '+',
            Operation::Subtract => '-',
            Operation::Multiply => '*',
            Operation::Divide => '/',
            Operation::Power => '^',
            Operation::Modulo => '%',
        }
    }

    pub fn from_symbol(symbol: char) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    /// Applies the operation. Zero divisors and non-finite results are errors,
    /// never values.
    pub fn apply(self, a: f64, b: f64) -> Result<f64, CalcError> {
        let result = match self {
            Operation::Add => a + b,
            Operation::Subtract => a - b,
            Operation::Multiply => a * b,
            Operation::Divide => {
                if b == 0.0 {
                    return Err(CalcError::DivisionByZero);
                }
                a / b
            }
            Operation::Power => a.powf(b),
            Operation::Modulo => {
                if b == 0.0 {
                    return Err(CalcError::ModuloByZero);
                }
                a % b
            }
        };

        if !result.is_finite() {
            return Err(CalcError::NonFiniteResult { operation: self });
        }
        Ok(result)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s).ok_or_else(|| CalcError::UnknownOperation(s.to_string()))
    }
}

/// A computed value that has not been given an id yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calculation {
    pub operation: Operation,
    pub operand1: f64,
    pub operand2: f64,
    pub result: f64,
    /// Unix milliseconds
    pub timestamp: i64,
}

impl Calculation {
    /// Stamps an already evaluated calculation with the current time.
    pub fn now(operation: Operation, operand1: f64, operand2: f64, result: f64) -> Self {
        Self {
            operation,
            operand1,
            operand2,
            result,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// One entry of the calculation history.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct CalculationRecord {
    #[serde(with = "as_uuid")]
    pub id: u128,
    pub operation: Operation,
    pub operand1: f64,
    pub operand2: f64,
    pub result: f64,
    /// Creation or last update time, unix milliseconds on disk and RFC 3339 on the wire
    #[serde(with = "as_rfc3339")]
    pub timestamp: i64,
}

impl CalculationRecord {
    pub fn new(id: Uuid, calc: Calculation) -> Self {
        Self {
            id: id.as_u128(),
            operation: calc.operation,
            operand1: calc.operand1,
            operand2: calc.operand2,
            result: calc.result,
            timestamp: calc.timestamp,
        }
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::from_u128(self.id)
    }
}

/// Unit of the append-only log.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub enum LogEntry {
    Put(CalculationRecord),
    Delete { id: u128 },
}

mod as_uuid {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(id: &u128, s: S) -> Result<S::Ok, S::Error> {
        Uuid::from_u128(*id).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        Uuid::deserialize(d).map(|id| id.as_u128())
    }
}

mod as_rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, ser, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(millis: &i64, s: S) -> Result<S::Ok, S::Error> {
        let ts = DateTime::<Utc>::from_timestamp_millis(*millis)
            .ok_or_else(|| ser::Error::custom(format!("timestamp out of range: {}", millis)))?;
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.timestamp_millis())
            .map_err(de::Error::custom)
    }
}
