//! Raw probe results and their normalization into capacity values.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::any::AnyRow;
use sqlx::{Column, Row};

use crate::probe::error::ProbeError;

/// One column of a probe function's result row, as returned by the
/// database.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProbeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ProbeValue {
    /// Read column `index` of `row`.
    ///
    /// Booleans are tried first so that a driver which would happily
    /// widen them to integers never gets the chance to.
    pub fn from_column(row: &AnyRow, index: usize) -> Result<Self, sqlx::Error> {
        if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
            return Ok(value.map_or(ProbeValue::Null, ProbeValue::Bool));
        }
        if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
            return Ok(value.map_or(ProbeValue::Null, ProbeValue::Int));
        }
        if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
            return Ok(value.map_or(ProbeValue::Null, |v| ProbeValue::Int(i64::from(v))));
        }
        if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
            return Ok(value.map_or(ProbeValue::Null, ProbeValue::Float));
        }
        if let Ok(value) = row.try_get::<Option<f32>, _>(index) {
            return Ok(value.map_or(ProbeValue::Null, |v| ProbeValue::Float(f64::from(v))));
        }
        row.try_get::<Option<String>, _>(index)
            .map(|value| value.map_or(ProbeValue::Null, ProbeValue::Text))
    }

    fn from_json(value: Value) -> Self {
        match value {
            Value::Null => ProbeValue::Null,
            Value::Bool(flag) => ProbeValue::Bool(flag),
            Value::Number(number) => match (number.as_i64(), number.as_f64()) {
                (Some(int), _) => ProbeValue::Int(int),
                (None, Some(float)) => ProbeValue::Float(float),
                (None, None) => ProbeValue::Text(number.to_string()),
            },
            Value::String(text) => ProbeValue::Text(text),
            nested => ProbeValue::Text(nested.to_string()),
        }
    }
}

impl fmt::Display for ProbeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeValue::Null => write!(f, "NULL"),
            ProbeValue::Bool(value) => write!(f, "{}", value),
            ProbeValue::Int(value) => write!(f, "{}", value),
            ProbeValue::Float(value) => write!(f, "{}", value),
            ProbeValue::Text(value) => write!(f, "{}", value),
        }
    }
}

/// A whole result row: every column, by name, in result order.
///
/// Only the first column feeds the capacity; the rest is kept for debug
/// logging of multi-column (`OUT` parameter) functions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRow {
    columns: Vec<(String, ProbeValue)>,
}

impl ProbeRow {
    pub fn new(columns: Vec<(String, ProbeValue)>) -> Self {
        Self { columns }
    }

    /// Decode every column of a natively typed row.
    pub fn from_any_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        let columns = row
            .columns()
            .iter()
            .map(|column| {
                ProbeValue::from_column(row, column.ordinal())
                    .map(|value| (column.name().to_string(), value))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { columns })
    }

    /// Decode a row rendered by PostgreSQL's `row_to_json`.
    ///
    /// The JSON form keeps booleans and exact numerics intact where the
    /// Any driver cannot decode those column types.
    pub fn from_json(text: &str) -> Result<Self, sqlx::Error> {
        let object: Map<String, Value> =
            serde_json::from_str(text).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let columns = object
            .into_iter()
            .map(|(name, value)| (name, ProbeValue::from_json(value)))
            .collect();
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[(String, ProbeValue)] {
        &self.columns
    }

    pub fn first(&self) -> Option<&ProbeValue> {
        self.columns.first().map(|(_, value)| value)
    }

    pub fn into_first(self) -> Option<ProbeValue> {
        self.columns.into_iter().next().map(|(_, value)| value)
    }
}

impl fmt::Display for ProbeRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (index, (name, value)) in self.columns.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, ")")
    }
}

/// Turn a raw probe result into a non-negative capacity value.
///
/// A zero factor counts as `1`. With a negative factor a boolean result
/// is negated and the factor's magnitude is used, so `false` with factor
/// `-20` means 20 units of capacity. Integer 0/1 results are plain
/// numbers and never negated. Numeric text is parsed; any other result is
/// a [`ProbeError::Type`].
pub fn normalize(value: &ProbeValue, scale_factor: f64) -> Result<f64, ProbeError> {
    let mut factor = if scale_factor == 0.0 { 1.0 } else { scale_factor };

    let raw = match value {
        ProbeValue::Bool(flag) if factor < 0.0 => {
            factor = factor.abs();
            bool_to_f64(!flag)
        }
        ProbeValue::Bool(flag) => bool_to_f64(*flag),
        ProbeValue::Int(number) => *number as f64,
        ProbeValue::Float(number) => *number,
        ProbeValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| ProbeError::type_error(text.as_str()))?,
        ProbeValue::Null => return Err(ProbeError::type_error("NULL")),
    };

    // f64::max ignores a NaN operand, so NaN collapses to 0 as well.
    Ok((factor * raw).max(0.0))
}

fn bool_to_f64(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}
