//! Core types for CouchDB view results and database objects.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::{Error, Result};

/// A single row of a view or `_all_docs` result.
///
/// `value` and `doc` are kept as raw JSON and only decoded when asked for, so a row
/// costs no more than the bytes the server sent for it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Row {
    /// Id of the document that emitted this row. Empty for reduce rows.
    #[serde(default)]
    pub id: String,
    /// Key the row was emitted under.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    doc: Option<Box<RawValue>>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Row {
    /// Create a row with neither value nor doc.
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            value: None,
            doc: None,
        }
    }

    /// Attach a raw JSON value. Fails if `json` is not valid JSON.
    pub fn with_value(mut self, json: impl Into<String>) -> Result<Self> {
        self.value = Some(RawValue::from_string(json.into())?);
        Ok(self)
    }

    /// Attach a raw JSON document. Fails if `json` is not valid JSON.
    pub fn with_doc(mut self, json: impl Into<String>) -> Result<Self> {
        self.doc = Some(RawValue::from_string(json.into())?);
        Ok(self)
    }

    /// Whether the server sent a value for this row.
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Whether the server sent a document for this row (`include_docs=true`).
    pub fn has_doc(&self) -> bool {
        self.doc.is_some()
    }

    /// The undecoded value, if any.
    pub fn raw_value(&self) -> Option<&RawValue> {
        self.value.as_deref()
    }

    /// The undecoded document, if any.
    pub fn raw_doc(&self) -> Option<&RawValue> {
        self.doc.as_deref()
    }

    /// Decode the row's value.
    ///
    /// Returns [`Error::MissingField`] if the row carries no value and
    /// [`Error::Payload`] if the value does not fit `T`.
    pub fn value<T: DeserializeOwned>(&self) -> Result<T> {
        decode("value", self.value.as_deref())
    }

    /// Decode the row's document.
    ///
    /// Returns [`Error::MissingField`] if the row carries no document and
    /// [`Error::Payload`] if the document does not fit `T`.
    pub fn doc<T: DeserializeOwned>(&self) -> Result<T> {
        decode("doc", self.doc.as_deref())
    }
}

fn decode<T: DeserializeOwned>(field: &'static str, raw: Option<&RawValue>) -> Result<T> {
    let raw = raw.ok_or(Error::MissingField(field))?;
    serde_json::from_str(raw.get()).map_err(|source| Error::Payload { field, source })
}

/// Database security object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    /// Users and roles with admin rights on the database.
    #[serde(default)]
    pub admins: Members,
    /// Users and roles allowed to read the database.
    #[serde(default)]
    pub members: Members,
}

/// Member list of a [`Security`] object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Members {
    /// User names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    /// Role names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}
