//! Scalar codec
//!
//! Scalars are stored as JSON text, one value per key. The encoding is
//! reversible for every representable scalar: integers and floats stay
//! distinct (`1` vs `1.0`), and values JSON cannot express (NaN,
//! infinities) are rejected at write time.

use jotdb_core::{Error, Result, Scalar};

/// Encode a scalar to its stored JSON text
pub fn encode(value: &Scalar) -> Result<String> {
    let json = match value {
        Scalar::Null => serde_json::Value::Null,
        Scalar::Bool(b) => serde_json::Value::Bool(*b),
        Scalar::Int(n) => serde_json::Value::Number((*n).into()),
        Scalar::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                Error::value_rejected(format!("float {} has no JSON representation", x))
            })?,
        Scalar::Text(s) => serde_json::Value::String(s.clone()),
    };
    Ok(json.to_string())
}

/// Decode stored JSON text back into a scalar
pub fn decode(text: &str) -> Result<Scalar> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    match json {
        serde_json::Value::Null => Ok(Scalar::Null),
        serde_json::Value::Bool(b) => Ok(Scalar::Bool(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Scalar::Int(i))
            } else if let Some(x) = n.as_f64() {
                Ok(Scalar::Float(x))
            } else {
                Err(Error::codec(format!("unrepresentable number: {}", n)))
            }
        }
        serde_json::Value::String(s) => Ok(Scalar::Text(s)),
        other => Err(Error::codec(format!(
            "stored value is not a scalar: {}",
            other
        ))),
    }
}
