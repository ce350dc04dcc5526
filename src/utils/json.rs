use serde_json::Value;

/// A PATCH body field: left out, explicitly cleared, or set.
#[derive(Debug, PartialEq, Eq)]
pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

impl NullableValue {
    /// The stored form of the field, where `null` clears it to the empty string.
    pub fn into_blankable(self) -> Option<String> {
        match self {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(String::new()),
            NullableValue::String(value) => Some(value.trim().to_string()),
        }
    }
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

/// Like [`classify_nullable`], but reports which field was malformed.
pub fn field(body: &Value, name: &str) -> Result<NullableValue, String> {
    classify_nullable(body.get(name)).map_err(|err| format!("{name}: {err}"))
}
