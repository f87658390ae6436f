//! The metadata bag: the flat, string-keyed transport encoding of all
//! metadata attached to an upload.
//!
//! Keys are lower-cased on write and read case-insensitively, so a key is
//! never duplicated under different casing. Structured values (subject
//! lists, form fields, the full canonical record) are JSON-encoded, then
//! base64-encoded, and stored under a single reserved key each.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{Error, Result};

/// Well-known bag keys. Scalar canonical fields each have a dedicated key;
/// composite fields are nested-encoded under the `*_NESTED` keys.
pub mod keys {
    /// The ID of the user the file belongs to.
    pub const USER_ID: &str = "userid";
    /// The name of the container the file belongs to.
    pub const PARENT_NAME: &str = "parentname";
    /// The ID of the container the file belongs to.
    pub const PARENT_ID: &str = "parentid";
    /// Description of the container the file belongs to.
    pub const PARENT_DESCRIPTION: &str = "parentdescription";
    /// RFC 3339 timestamp at which the file was created in the backend.
    pub const CREATED_AT: &str = "createdat";
    /// RFC 3339 timestamp at which the media was captured on the client.
    pub const CAPTURED_AT: &str = "capturedat";
    /// The mime type of the file.
    pub const FILE_TYPE: &str = "filetype";
    /// The name given to the file by the user.
    pub const DISPLAY_NAME: &str = "displayname";
    /// Longer free-form description of the file.
    pub const DESCRIPTION: &str = "description";
    /// The checksum of the file.
    pub const CHECKSUM: &str = "checksum";
    /// Algorithm of the stored checksum (SHA256, MD5, ...).
    pub const CHECKSUM_TYPE: &str = "checksumtype";
    /// The name of the file on the file system.
    pub const FILENAME: &str = "filename";
    /// File size in bytes.
    pub const FILE_SIZE: &str = "filesize";
    /// The backend-database ID of the file, once confirmed.
    pub const EXT_ID: &str = "extid";
    /// Case number supplied by the user.
    pub const CASE_NUMBER: &str = "casenumber";
    /// Media duration in milliseconds.
    pub const DURATION: &str = "duration";
    /// Comma-separated tag list.
    pub const TAGS: &str = "tags";
    /// Account name on the backend.
    pub const ACCOUNT_NAME: &str = "accountname";
    /// Identifier of the capturing equipment.
    pub const EQUIPMENT_ID: &str = "equipmentid";
    /// Kind of interview/recording session.
    pub const INTERVIEW_TYPE: &str = "interviewtype";
    /// Free-form notes.
    pub const NOTES: &str = "notes";
    /// Unique identifier of the file on the client.
    pub const CLIENT_MEDIA_ID: &str = "clientmediaid";
    /// Backend group ID.
    pub const GROUP_ID: &str = "groupid";
    /// Backend group name.
    pub const GROUP_NAME: &str = "groupname";
    /// Free-text location description.
    pub const LOCATION_TEXT: &str = "locationtext";
    /// Geo latitude of the captured media.
    pub const LATITUDE: &str = "latitude";
    /// Geo longitude of the captured media.
    pub const LONGITUDE: &str = "longitude";

    /// Nested-encoded subject person list.
    pub const SUBJECTS_NESTED: &str = "subjects";
    /// Nested-encoded bookmark list.
    pub const BOOKMARKS_NESTED: &str = "bookmarks";
    /// Nested-encoded annotation list.
    pub const ANNOTATIONS_NESTED: &str = "annotations";
    /// Nested-encoded form-field list.
    pub const FORM_FIELDS_NESTED: &str = "formfields";
    /// Nested-encoded creator record.
    pub const CREATOR_NESTED: &str = "creator";
    /// Reserved key holding the entire canonical record, nested-encoded.
    /// Guarantees lossless round-trips independent of per-field key drift.
    pub const FULL_RECORD: &str = "uploadrecord";

    /// Client identifier written during authentication enrichment.
    pub const CLIENT_ID: &str = "clientid";
    /// Authenticated user name.
    pub const AUTH_USER_NAME: &str = "authusername";
    /// Authenticated backend user ID.
    pub const AUTH_USER_ID: &str = "authuserid";
    /// Authenticated directory SID.
    pub const AUTH_USER_SID: &str = "authusersid";
    /// Correlation ID of the originating client request.
    pub const REQ_ID: &str = "reqid";
}

/// Flat, case-insensitive string-keyed metadata map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataBag(HashMap<String, String>);

impl MetadataBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value case-insensitively. Returns the empty string when the key
    /// is unset. An exact lowercase hit is preferred; the case-folded scan
    /// only matters for bags deserialized from foreign sources that did not
    /// go through [`set`](Self::set).
    pub fn get(&self, key: &str) -> &str {
        let lk = key.to_lowercase();
        if let Some(v) = self.0.get(&lk) {
            return v;
        }
        for (k, v) in &self.0 {
            if k.to_lowercase() == lk {
                return v;
            }
        }
        ""
    }

    /// True when the key holds a non-empty value.
    pub fn has(&self, key: &str) -> bool {
        !self.get(key).is_empty()
    }

    /// Set a value. The key is lower-cased before storing, so a key is never
    /// duplicated under different casing.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_lowercase(), value.into());
    }

    /// Copy the value stored under `from` to `to`.
    pub fn map_key(&mut self, from: &str, to: &str) {
        let v = self.get(from).to_string();
        self.set(to, v);
    }

    /// Decode a nested-encoded (base64 + JSON) structured value.
    ///
    /// Returns `Ok(None)` when the key is unset; an error is only returned
    /// for a malformed encoding, and callers must treat that as absent data
    /// rather than a fatal condition.
    pub fn get_nested<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = self.get(key);
        if raw.is_empty() {
            return Ok(None);
        }
        let bytes = BASE64.decode(raw).map_err(|e| Error::Encoding {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let value = serde_json::from_slice(&bytes).map_err(|e| Error::Encoding {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(value))
    }

    /// Store a structured value nested-encoded (JSON, then base64).
    ///
    /// A marshal failure is logged and the key left unset; the bag is never
    /// partially written.
    pub fn set_nested<T: Serialize>(&mut self, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(json) if !json.is_empty() => {
                self.set(key, BASE64.encode(&json));
            }
            Ok(_) => {}
            Err(e) => {
                error!(key, error = %e, "failed to encode nested metadata value");
            }
        }
    }

    /// Remove every key holding an empty string. A blank value is equivalent
    /// to absence on the wire.
    pub fn remove_blank(&mut self) {
        self.0.retain(|_, v| !v.is_empty());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    // Enrichment accessors used when applying authentication data.

    pub fn set_client_id(&mut self, id: &str) {
        self.set(keys::CLIENT_ID, id);
    }

    pub fn set_auth_user_name(&mut self, name: &str) {
        self.set(keys::AUTH_USER_NAME, name);
    }

    pub fn set_auth_user_id(&mut self, id: &str) {
        self.set(keys::AUTH_USER_ID, id);
    }

    pub fn set_auth_user_sid(&mut self, sid: &str) {
        self.set(keys::AUTH_USER_SID, sid);
    }

    pub fn req_id(&self) -> &str {
        self.get(keys::REQ_ID)
    }

    /// Decode a nested value, degrading to absent on a corrupt encoding.
    /// Logs the decode failure so operators can spot damaged bags.
    pub fn get_nested_or_absent<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get_nested(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "corrupt nested metadata treated as absent");
                None
            }
        }
    }
}

impl From<HashMap<String, String>> for MetadataBag {
    fn from(m: HashMap<String, String>) -> Self {
        let mut bag = MetadataBag::new();
        for (k, v) in m {
            bag.set(&k, v);
        }
        bag
    }
}

impl FromIterator<(String, String)> for MetadataBag {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut bag = MetadataBag::new();
        for (k, v) in iter {
            bag.set(&k, v);
        }
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_is_case_insensitive() {
        let mut bag = MetadataBag::new();
        bag.set("key1", "value1");
        assert_eq!(bag.get("key1"), "value1");
        assert_eq!(bag.get("KEY1"), "value1");
        assert_eq!(bag.get("Key1"), "value1");
    }

    #[test]
    fn test_set_lowercases_key() {
        let mut bag = MetadataBag::new();
        bag.set("CaseNumber", "C-1");
        bag.set("casenumber", "C-2");
        // Never duplicated under different casing.
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("CASENUMBER"), "C-2");
    }

    #[test]
    fn test_get_missing_returns_empty() {
        let bag = MetadataBag::new();
        assert_eq!(bag.get("nope"), "");
        assert!(!bag.has("nope"));
    }

    #[test]
    fn test_map_key_copies_value() {
        let mut bag = MetadataBag::new();
        bag.set("from", "abc");
        bag.map_key("FROM", "to");
        assert_eq!(bag.get("to"), "abc");
    }

    #[test]
    fn test_nested_round_trip() {
        let mut bag = MetadataBag::new();
        let value = vec!["Alice".to_string(), "Bob".to_string()];
        bag.set_nested("people", &value);
        let decoded: Option<Vec<String>> = bag.get_nested("people").unwrap();
        assert_eq!(decoded, Some(value));
    }

    #[test]
    fn test_nested_absent_is_none_not_error() {
        let bag = MetadataBag::new();
        let decoded: Option<Vec<String>> = bag.get_nested("people").unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_nested_malformed_base64_is_encoding_error() {
        let mut bag = MetadataBag::new();
        bag.set("people", "!!! not base64 !!!");
        let decoded: Result<Option<Vec<String>>> = bag.get_nested("people");
        assert!(matches!(decoded, Err(Error::Encoding { .. })));
    }

    #[test]
    fn test_nested_malformed_json_is_encoding_error() {
        let mut bag = MetadataBag::new();
        bag.set("people", BASE64.encode(b"{not json"));
        let decoded: Result<Option<Vec<String>>> = bag.get_nested("people");
        assert!(matches!(decoded, Err(Error::Encoding { .. })));
    }

    #[test]
    fn test_corrupt_nested_degrades_to_absent() {
        let mut bag = MetadataBag::new();
        bag.set("people", "%%%");
        let decoded: Option<Vec<String>> = bag.get_nested_or_absent("people");
        assert!(decoded.is_none());
    }

    #[test]
    fn test_remove_blank_prunes_empty_values() {
        let mut bag = MetadataBag::new();
        bag.set("a", "kept");
        bag.set("b", "");
        bag.remove_blank();
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("a"), "kept");
    }

    #[test]
    fn test_from_hashmap_normalizes_keys() {
        let mut m = HashMap::new();
        m.insert("MixedCase".to_string(), "v".to_string());
        let bag = MetadataBag::from(m);
        assert_eq!(bag.get("mixedcase"), "v");
        assert_eq!(bag.get("MIXEDCASE"), "v");
    }

    #[test]
    fn test_auth_enrichment_accessors() {
        let mut bag = MetadataBag::new();
        bag.set_client_id("client-7");
        bag.set_auth_user_name("jdoe");
        bag.set_auth_user_id("u-12");
        bag.set_auth_user_sid("S-1-5-21");
        assert_eq!(bag.get(keys::CLIENT_ID), "client-7");
        assert_eq!(bag.get(keys::AUTH_USER_NAME), "jdoe");
        assert_eq!(bag.get(keys::AUTH_USER_ID), "u-12");
        assert_eq!(bag.get(keys::AUTH_USER_SID), "S-1-5-21");
    }
}
