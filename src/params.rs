use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::SqlStmtError;
use crate::types::RowValues;

/// Named parameter set bound to a statement's `:name` placeholders.
///
/// Names are stored without their sigil, so `:id`, `@id`, `$id` and `id` all refer
/// to the same entry. Values that no placeholder references are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParams {
    values: Vec<(String, RowValues)>,
}

/// Build a [`NamedParams`] from `"name" => value` pairs.
///
/// ```rust
/// use sql_stmt_cache::named_params;
///
/// let params = named_params! { "id" => 1, "x" => 2 };
/// assert_eq!(params.len(), 2);
/// ```
#[macro_export]
macro_rules! named_params {
    () => {
        $crate::NamedParams::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::NamedParams::new()$(.with($name, $value))+
    };
}

pub(crate) fn strip_sigil(name: &str) -> &str {
    name.strip_prefix([':', '@', '$']).unwrap_or(name)
}

impl NamedParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a parameter, returning the set for chaining.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<RowValues>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add or replace a parameter.
    pub fn insert(&mut self, name: &str, value: impl Into<RowValues>) {
        let key = strip_sigil(name);
        let value = value.into();
        match self.values.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((key.to_owned(), value)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RowValues> {
        let key = strip_sigil(name);
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up a placeholder's value, failing when the caller did not supply it.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::MissingParameter`] if no value is bound under `name`.
    pub fn require(&self, name: &str) -> Result<&RowValues, SqlStmtError> {
        self.get(name)
            .ok_or_else(|| SqlStmtError::MissingParameter(strip_sigil(name).to_owned()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValues)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Bind every field of a serializable struct (or map) by its serialized name.
    ///
    /// Rename fields with `#[serde(rename = "...")]` to match placeholder names.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::ParameterError`] if `value` does not serialize to a JSON
    /// object.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, SqlStmtError> {
        let json = serde_json::to_value(value)
            .map_err(|e| SqlStmtError::ParameterError(format!("serialize params: {e}")))?;
        match json {
            JsonValue::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, RowValues::from_json(v)))
                .collect()),
            JsonValue::Null => Ok(Self::new()),
            other => Err(SqlStmtError::ParameterError(format!(
                "named params must serialize to an object, got {other}"
            ))),
        }
    }
}

impl<K: AsRef<str>, V: Into<RowValues>> FromIterator<(K, V)> for NamedParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = NamedParams::new();
        for (k, v) in iter {
            params.insert(k.as_ref(), v);
        }
        params
    }
}
