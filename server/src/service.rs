//! The key-value service: authorization, validation and dispatch to the
//! record store.

use crate::auth::{Authenticator, Principal};
use crate::{Error, FieldErrors, Result};
use kvs::{KvsError, Record, RecordStore, Upsert, KEY_SEPARATOR, MAX_KEY_LEN};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Body of an upsert, parsed but not yet validated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertRequest {
    fields: Map<String, Value>,
}

impl UpsertRequest {
    /// Parse a JSON object body. An empty body counts as `{}`.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        match serde_json::from_slice(body) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(other) => Err(Error::invalid(
                "non_field_errors",
                format!(
                    "Invalid data. Expected a dictionary, but got {}.",
                    json_type(&other)
                ),
            )),
            Err(e) => Err(Error::MalformedBody(e.to_string())),
        }
    }

    /// The `value` field as text
    fn value(&self) -> std::result::Result<String, &'static str> {
        match self.fields.get("value") {
            None => Err("This field is required."),
            Some(Value::Null) => Err("This field may not be null."),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(_) => Err("Not a valid string."),
        }
    }
}

impl From<Map<String, Value>> for UpsertRequest {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Mediates between authenticated callers and the record store
///
/// Holds no records itself; every call goes to the store.
pub struct KeyValueService {
    store: Arc<dyn RecordStore>,
    gate: Arc<dyn Authenticator>,
}

impl KeyValueService {
    /// Serve records from `store`, admitting callers verified by `gate`
    pub fn new(store: Arc<dyn RecordStore>, gate: Arc<dyn Authenticator>) -> Self {
        Self { store, gate }
    }

    /// Resolve the raw `Authorization` header into a principal
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<Principal> {
        self.gate.authenticate(authorization)
    }

    /// Every record in the store
    pub fn list(&self, principal: &Principal) -> Result<Vec<Record>> {
        debug!("{} listing records", principal);
        Ok(self.store.list()?)
    }

    /// The record stored under exactly `key`
    pub fn retrieve(&self, principal: &Principal, key: &str) -> Result<Record> {
        debug!("{} retrieving {:?}", principal, key);
        if kvs::check_key(key).is_err() {
            return Err(Error::NotFound {
                key: key.to_owned(),
            });
        }

        self.store.get(key)?.ok_or_else(|| Error::NotFound {
            key: key.to_owned(),
        })
    }

    /// Set `key` to the request's `value`, creating the record when absent
    ///
    /// Nothing is written unless the key and body are both valid.
    pub fn upsert(
        &self,
        principal: &Principal,
        key: &str,
        request: UpsertRequest,
    ) -> Result<(Record, Upsert)> {
        let mut errors = FieldErrors::new();
        if key.is_empty() {
            errors.insert("key".to_owned(), vec!["This field may not be blank.".to_owned()]);
        } else if key.chars().count() > MAX_KEY_LEN {
            errors.insert(
                "key".to_owned(),
                vec![format!(
                    "Ensure this field has no more than {} characters.",
                    MAX_KEY_LEN
                )],
            );
        } else if key.contains(KEY_SEPARATOR) {
            errors.insert(
                "key".to_owned(),
                vec![format!("Ensure this field does not contain \"{}\".", KEY_SEPARATOR)],
            );
        }
        let value = match request.value() {
            Ok(value) => value,
            Err(message) => {
                errors.insert("value".to_owned(), vec![message.to_owned()]);
                String::new()
            }
        };
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        let (record, outcome) = match self.store.upsert(key.to_owned(), value.clone()) {
            Err(KvsError::Conflict { .. }) => {
                warn!("Conflict upserting {:?}, retrying once", key);
                self.store
                    .upsert(key.to_owned(), value)
                    .map_err(|e| match e {
                        KvsError::Conflict { key } => Error::StorageConflict { key },
                        other => Error::Storage(other),
                    })?
            }
            other => other?,
        };

        info!("{} upserted {:?} ({:?})", principal, key, outcome);
        Ok((record, outcome))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
