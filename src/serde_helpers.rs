//! Serde helpers for lenient frame decoding.
//!
//! When the `tracing` feature is enabled, this module also logs warnings for any
//! fields a frame carries that the client does not model, which is how protocol
//! extensions on the server side show up.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A `serde_as` type that deserializes strings or integers as `String`.
///
/// DDP ids are strings, but some servers echo the numeric form back. Use with
/// `#[serde_as(as = "StringFromAny")]` or `#[serde_as(as = "Option<Vec<StringFromAny>>")]`.
pub struct StringFromAny;

impl<'de> serde_with::DeserializeAs<'de, String> for StringFromAny {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<String, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use std::fmt;

        use serde::de::{self, Visitor};

        struct StringOrNumberVisitor;

        impl Visitor<'_> for StringOrNumberVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("string or integer")
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_owned())
            }

            fn visit_string<E>(self, v: String) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v)
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_string())
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_string())
            }
        }

        deserializer.deserialize_any(StringOrNumberVisitor)
    }
}

/// Deserialize a frame with unknown field warnings.
///
/// Unknown fields are logged at `warn` with their values and never fail the
/// decode. A failing decode is logged with the path of the offending field.
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(
        type_name = %type_name::<T>(),
        json = %value,
        "deserializing frame"
    );

    // Clone the value so we can look up unknown field values later
    let original = value.clone();

    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        let path_result: Result<T, _> = serde_path_to_error::deserialize(original.clone());
        if let Err(path_err) = path_result {
            let path = path_err.path().to_string();
            tracing::error!(
                type_name = %type_name::<T>(),
                path = %path,
                value = %format_value(lookup_value(&original, &path)),
                error = %path_err.inner(),
                "frame deserialization failed"
            );
        }
    })?;

    for path in unknown_paths {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %format_value(lookup_value(&original, &path)),
            "unknown field in DDP frame"
        );
    }

    Ok(result)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Look up a value in a JSON structure by a dotted path such as `fields.name` or `subs.0`.
///
/// `?` segments emitted for `Option` wrappers are skipped.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    path.split(['.', '[', ']'])
        .filter(|segment| !segment.is_empty() && *segment != "?")
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "<unable to retrieve>".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;
    use serde_with::serde_as;

    use super::*;

    #[serde_as]
    #[derive(Debug, Deserialize, PartialEq)]
    struct Ids {
        #[serde_as(as = "StringFromAny")]
        id: String,
        #[serde_as(as = "Option<Vec<StringFromAny>>")]
        #[serde(default)]
        methods: Option<Vec<String>>,
    }

    #[test]
    fn string_from_any_accepts_strings_and_integers() {
        let ids: Ids = serde_json::from_value(json!({"id": 7, "methods": ["1", 2]})).unwrap();

        assert_eq!(ids.id, "7");
        assert_eq!(ids.methods, Some(vec!["1".to_owned(), "2".to_owned()]));
    }

    #[test]
    fn string_from_any_rejects_objects() {
        let result = serde_json::from_value::<Ids>(json!({"id": {"nested": true}}));
        assert!(result.is_err(), "objects are not ids");
    }

    #[test]
    fn unknown_fields_do_not_fail_the_decode() {
        let ids: Ids =
            deserialize_with_warnings(json!({"id": "1", "extension": {"a": 1}})).unwrap();

        assert_eq!(ids.id, "1");
        assert_eq!(ids.methods, None);
    }

    #[test]
    fn missing_required_field_fails() {
        let result: crate::Result<Ids> = deserialize_with_warnings(json!({"methods": []}));
        assert!(result.is_err(), "id is required");
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn lookup_value_follows_objects_and_arrays() {
        let value = json!({"fields": {"tags": ["a", "b"]}});

        assert_eq!(lookup_value(&value, "fields.tags.1"), Some(&json!("b")));
        assert_eq!(lookup_value(&value, "fields.?.tags[0]"), Some(&json!("a")));
        assert_eq!(lookup_value(&value, "fields.missing"), None);
        assert_eq!(format_value(None), "<unable to retrieve>");
    }
}
