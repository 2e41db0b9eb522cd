//! Payload value model. The wire payload encoding itself is an
//! out-of-scope collaborator (any self-describing encoding that
//! preserves binary blobs, integers, strings, booleans, and heterogeneous
//! maps); we pick `ciborium`'s `Value` as the concrete carrier since it
//! already models exactly that set of primitives and interoperates with
//! the CBOR data model by construction.

pub use ciborium::value::Value;

/// Encode any `Serialize` type into a CBOR byte string.
pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ciborium::ser::Error<std::io::Error>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)?;
    Ok(out)
}

/// Decode a CBOR byte string into any `Deserialize` type.
pub fn decode<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, ciborium::de::Error<std::io::Error>> {
    ciborium::de::from_reader(bytes)
}

/// Fetch a required string field from a CBOR map `Value`.
pub fn get_str<'a>(map: &'a Value, key: &str) -> Option<&'a str> {
    map.as_map()?
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .and_then(|(_, v)| v.as_text())
}

/// Fetch an optional integer field, applying a default when absent.
pub fn get_i64_or(map: &Value, key: &str, default: i64) -> i64 {
    map.as_map()
        .and_then(|entries| entries.iter().find(|(k, _)| k.as_text() == Some(key)))
        .and_then(|(_, v)| v.as_integer())
        .and_then(|i| i64::try_from(i).ok())
        .unwrap_or(default)
}

/// Fetch an optional field by key, without a default.
pub fn get<'a>(map: &'a Value, key: &str) -> Option<&'a Value> {
    map.as_map()?.iter().find(|(k, _)| k.as_text() == Some(key)).map(|(_, v)| v)
}

/// Build a CBOR map from `(&str, Value)` pairs - a small convenience used
/// throughout the dispatch handlers to compose result/error objects.
pub fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::Text(k.to_string()), v))
            .collect(),
    )
}
