//! The canonical schema: the structured, connector-agnostic representation
//! of everything the runtime knows about an upload.
//!
//! All timestamps are ISO 8601 / RFC 3339 and carry the client's offset on
//! the wire. Converting a record to a [`MetadataBag`] and back is lossless
//! for every populated field; blank scalars and empty composites are pruned
//! rather than round-tripped as present-but-empty.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bag::{keys, MetadataBag};
use crate::error::{Error, Result};

/// Gender vocabulary. Recognized tokens map to a closed set of variants,
/// unrecognized non-empty input maps to `Other`, empty input to
/// `Unspecified`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Female,
    Male,
    Other,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl Gender {
    pub fn parse(s: &str) -> Gender {
        match s.to_lowercase().as_str() {
            "male" | "m" => Gender::Male,
            "female" | "f" => Gender::Female,
            "" => Gender::Unspecified,
            _ => {
                warn!(input = s, "unrecognized gender token mapped to Other");
                Gender::Other
            }
        }
    }
}

/// The parent container of an upload: a folder, album or case on the
/// backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Parent {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl Parent {
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.name.is_empty() && self.description.is_empty()
    }
}

/// A checksum already calculated by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Checksum {
    pub value: String,
    /// SHA256, MD5, BLAKE3, CRC, ...
    pub algorithm: String,
}

/// A location, either of the captured media or of a person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Location {
    /// Free text for the location, like an address or a description.
    pub text: String,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub latitude: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub longitude: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub altitude: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub accuracy: f64,
    pub address: String,
    pub address2: String,
    pub zip_code: String,
    pub post_area: String,
    pub country: String,
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
            && self.latitude == 0.0
            && self.longitude == 0.0
            && self.altitude == 0.0
            && self.accuracy == 0.0
            && self.address.is_empty()
            && self.address2.is_empty()
            && self.zip_code.is_empty()
            && self.post_area.is_empty()
            && self.country.is_empty()
    }
}

/// A person appearing in, or associated with, the captured media.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Person {
    pub first_name: String,
    pub last_name: String,
    pub id: String,
    /// Date of birth.
    pub dob: Option<DateTime<Utc>>,
    pub gender: Gender,
    pub nationality: String,
    pub workplace: String,
    pub status: String,
    pub work_phone: String,
    pub phone: String,
    pub mobile: String,
    #[serde(rename = "isPresent")]
    pub present: bool,
    #[serde(flatten)]
    pub location: Location,
}

impl Person {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_empty()
            && self.last_name.is_empty()
            && self.id.is_empty()
            && self.dob.is_none()
            && self.gender == Gender::Unspecified
            && self.nationality.is_empty()
            && self.workplace.is_empty()
            && self.status.is_empty()
            && self.work_phone.is_empty()
            && self.phone.is_empty()
            && self.mobile.is_empty()
            && !self.present
            && self.location.is_empty()
    }
}

/// The creator of the file: the current user, interviewer, operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Creator {
    /// An identifier in the creator's own system, like a badge ID.
    pub sys_id: String,
    #[serde(flatten)]
    pub person: Person,
}

impl Creator {
    pub fn is_empty(&self) -> bool {
        self.sys_id.is_empty() && self.person.is_empty()
    }
}

/// A time-ranged marker set by the user while recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Bookmark {
    pub id: String,
    pub label: String,
    pub created_at: Option<DateTime<Utc>>,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// A time-ranged free-text annotation on the media.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub text: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Validation bounds advertised for a form field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationRule {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub pattern: String,
}

/// A client-submitted form field. Order is preserved as submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormField {
    pub key: String,
    pub field_id: String,
    /// Namespaced translation key, e.g. `subject.firstname`.
    pub translation_key: String,
    /// Translated label shown to the user.
    pub visual_name: String,
    pub value: String,
    pub required: bool,
    pub data_type: String,
    pub validation: ValidationRule,
}

/// The canonical, connector-agnostic metadata record for one upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadRecord {
    /// A unique identifier for the user in the backend system.
    pub user_id: String,
    pub parent: Option<Parent>,
    /// When the record was created in the backend database.
    pub created_at: Option<DateTime<Utc>>,
    /// When the media was captured by the user, on the client.
    pub captured_at: Option<DateTime<Utc>>,
    /// When the upload was byte-complete on the transport.
    pub completed_at: Option<DateTime<Utc>>,
    /// Mime type, like `image/jpeg` or `video/mp4`.
    pub file_type: String,
    pub display_name: String,
    pub description: String,
    pub checksums: Vec<Checksum>,
    pub file_name: String,
    pub file_size: Option<i64>,
    pub tags: Vec<String>,
    /// The backend-database ID of the file, once confirmed.
    pub ext_id: String,
    pub case_number: String,
    /// Media duration in milliseconds, if audio or video.
    pub duration_ms: i64,
    pub creator: Option<Creator>,
    pub location: Option<Location>,
    /// Subject persons, scoped to the parent container. Absent when empty.
    #[serde(rename = "subjects")]
    pub subjects: Option<Vec<Person>>,
    pub account_name: String,
    pub equipment_id: String,
    pub interview_type: String,
    pub bookmarks: Vec<Bookmark>,
    pub annotations: Vec<Annotation>,
    pub notes: String,
    /// Unique identifier of the file on the client.
    pub client_media_id: String,
    pub group_id: String,
    pub group_name: String,
    pub form_fields: Vec<FormField>,
}

impl UploadRecord {
    /// First subject, if any. Mapping rules for `subject.*` paths operate on
    /// this person.
    pub fn first_subject(&self) -> Option<&Person> {
        self.subjects.as_deref().and_then(|s| s.first())
    }

    pub fn first_subject_mut(&mut self) -> Option<&mut Person> {
        self.subjects.as_deref_mut().and_then(|s| s.first_mut())
    }

    /// Collapse present-but-empty composites to absent. An all-empty
    /// sub-record must not survive a round trip.
    pub fn normalized(mut self) -> Self {
        if self.parent.as_ref().is_some_and(Parent::is_empty) {
            self.parent = None;
        }
        if self.creator.as_ref().is_some_and(Creator::is_empty) {
            self.creator = None;
        }
        if self.location.as_ref().is_some_and(Location::is_empty) {
            self.location = None;
        }
        if self.subjects.as_ref().is_some_and(Vec::is_empty) {
            self.subjects = None;
        }
        self
    }

    /// Write every populated field into a metadata bag.
    ///
    /// Scalars get dedicated keys, composites are nested-encoded under their
    /// own keys, and the whole record goes under the reserved full-record
    /// key so the round-trip does not depend on per-field key coverage.
    /// Blank scalars are pruned from the result.
    pub fn to_bag(&self) -> MetadataBag {
        let record = self.clone().normalized();
        let mut m = MetadataBag::new();

        m.set(keys::USER_ID, &record.user_id);
        m.set(keys::ACCOUNT_NAME, &record.account_name);
        m.set(keys::CASE_NUMBER, &record.case_number);
        m.set(keys::CLIENT_MEDIA_ID, &record.client_media_id);
        m.set(keys::GROUP_ID, &record.group_id);
        m.set(keys::GROUP_NAME, &record.group_name);
        m.set(keys::FILE_TYPE, &record.file_type);
        m.set(keys::DISPLAY_NAME, &record.display_name);
        m.set(keys::DESCRIPTION, &record.description);
        m.set(keys::FILENAME, &record.file_name);
        m.set(keys::EXT_ID, &record.ext_id);
        m.set(keys::EQUIPMENT_ID, &record.equipment_id);
        m.set(keys::INTERVIEW_TYPE, &record.interview_type);
        m.set(keys::NOTES, &record.notes);

        if record.duration_ms != 0 {
            m.set(keys::DURATION, record.duration_ms.to_string());
        }
        if let Some(size) = record.file_size {
            m.set(keys::FILE_SIZE, size.to_string());
        }
        if let Some(t) = record.created_at {
            m.set(keys::CREATED_AT, t.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        if let Some(t) = record.captured_at {
            m.set(
                keys::CAPTURED_AT,
                t.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }
        if !record.tags.is_empty() {
            m.set(keys::TAGS, record.tags.join(","));
        }
        // Only the first checksum is carried on dedicated keys; the full
        // list survives through the full-record key.
        if let Some(c) = record.checksums.first() {
            m.set(keys::CHECKSUM, &c.value);
            m.set(keys::CHECKSUM_TYPE, &c.algorithm);
        }
        if let Some(loc) = &record.location {
            m.set(keys::LOCATION_TEXT, &loc.text);
            if loc.latitude != 0.0 {
                m.set(keys::LATITUDE, loc.latitude.to_string());
            }
            if loc.longitude != 0.0 {
                m.set(keys::LONGITUDE, loc.longitude.to_string());
            }
        }
        if let Some(p) = &record.parent {
            m.set(keys::PARENT_ID, &p.id);
            m.set(keys::PARENT_NAME, &p.name);
            m.set(keys::PARENT_DESCRIPTION, &p.description);
        }

        if let Some(subjects) = &record.subjects {
            m.set_nested(keys::SUBJECTS_NESTED, subjects);
        }
        if !record.bookmarks.is_empty() {
            m.set_nested(keys::BOOKMARKS_NESTED, &record.bookmarks);
        }
        if !record.annotations.is_empty() {
            m.set_nested(keys::ANNOTATIONS_NESTED, &record.annotations);
        }
        if !record.form_fields.is_empty() {
            m.set_nested(keys::FORM_FIELDS_NESTED, &record.form_fields);
        }
        if let Some(creator) = &record.creator {
            m.set_nested(keys::CREATOR_NESTED, creator);
        }
        m.set_nested(keys::FULL_RECORD, &record);

        m.remove_blank();
        m
    }

    /// Reconstruct a record from a bag.
    ///
    /// Prefers the reserved full-record key; falls back to the individual
    /// dedicated keys for bags produced by older encodings. A bag with
    /// neither yields a zero-value record, which is not an error.
    pub fn from_bag(bag: &MetadataBag) -> UploadRecord {
        if let Some(record) = bag.get_nested_or_absent::<UploadRecord>(keys::FULL_RECORD) {
            return record.normalized();
        }

        let mut r = UploadRecord {
            user_id: bag.get(keys::USER_ID).to_string(),
            account_name: bag.get(keys::ACCOUNT_NAME).to_string(),
            case_number: bag.get(keys::CASE_NUMBER).to_string(),
            client_media_id: bag.get(keys::CLIENT_MEDIA_ID).to_string(),
            group_id: bag.get(keys::GROUP_ID).to_string(),
            group_name: bag.get(keys::GROUP_NAME).to_string(),
            file_type: bag.get(keys::FILE_TYPE).to_string(),
            display_name: bag.get(keys::DISPLAY_NAME).to_string(),
            description: bag.get(keys::DESCRIPTION).to_string(),
            file_name: bag.get(keys::FILENAME).to_string(),
            ext_id: bag.get(keys::EXT_ID).to_string(),
            equipment_id: bag.get(keys::EQUIPMENT_ID).to_string(),
            interview_type: bag.get(keys::INTERVIEW_TYPE).to_string(),
            notes: bag.get(keys::NOTES).to_string(),
            ..UploadRecord::default()
        };

        r.created_at = parse_rfc3339(bag.get(keys::CREATED_AT));
        r.captured_at = parse_rfc3339(bag.get(keys::CAPTURED_AT));
        r.duration_ms = bag.get(keys::DURATION).parse().unwrap_or(0);
        r.file_size = bag.get(keys::FILE_SIZE).parse().ok();

        let tags = bag.get(keys::TAGS);
        if !tags.is_empty() {
            r.tags = tags.split(',').map(str::to_string).collect();
        }

        let checksum = bag.get(keys::CHECKSUM);
        if !checksum.is_empty() {
            r.checksums.push(Checksum {
                value: checksum.to_string(),
                algorithm: bag.get(keys::CHECKSUM_TYPE).to_string(),
            });
        }

        let parent = Parent {
            id: bag.get(keys::PARENT_ID).to_string(),
            name: bag.get(keys::PARENT_NAME).to_string(),
            description: bag.get(keys::PARENT_DESCRIPTION).to_string(),
        };
        if !parent.is_empty() {
            r.parent = Some(parent);
        }

        let location = Location {
            text: bag.get(keys::LOCATION_TEXT).to_string(),
            latitude: bag.get(keys::LATITUDE).parse().unwrap_or(0.0),
            longitude: bag.get(keys::LONGITUDE).parse().unwrap_or(0.0),
            ..Location::default()
        };
        if !location.is_empty() {
            r.location = Some(location);
        }

        r.subjects = bag
            .get_nested_or_absent::<Vec<Person>>(keys::SUBJECTS_NESTED)
            .filter(|s| !s.is_empty());
        if let Some(bookmarks) = bag.get_nested_or_absent(keys::BOOKMARKS_NESTED) {
            r.bookmarks = bookmarks;
        }
        if let Some(annotations) = bag.get_nested_or_absent(keys::ANNOTATIONS_NESTED) {
            r.annotations = annotations;
        }
        if let Some(fields) = bag.get_nested_or_absent(keys::FORM_FIELDS_NESTED) {
            r.form_fields = fields;
        }
        r.creator = bag.get_nested_or_absent(keys::CREATOR_NESTED);

        r.normalized()
    }

    /// Check that each of the given bag keys holds a non-empty value in this
    /// record's bag encoding. Returns the full list of missing keys so the
    /// client sees every problem at once.
    pub fn ensure_required(&self, required: &[&str]) -> Result<()> {
        let bag = self.to_bag();
        let missing: Vec<String> = required
            .iter()
            .filter(|k| !bag.has(k))
            .map(|k| k.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingFields(missing))
        }
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(s) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            warn!(value = s, error = %e, "unparseable timestamp in metadata bag");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_parse_recognized_tokens() {
        assert_eq!(Gender::parse("male"), Gender::Male);
        assert_eq!(Gender::parse("M"), Gender::Male);
        assert_eq!(Gender::parse("Female"), Gender::Female);
        assert_eq!(Gender::parse("f"), Gender::Female);
    }

    #[test]
    fn test_gender_parse_empty_is_unspecified() {
        assert_eq!(Gender::parse(""), Gender::Unspecified);
    }

    #[test]
    fn test_gender_parse_unknown_is_other() {
        assert_eq!(Gender::parse("nonbinary"), Gender::Other);
    }

    #[test]
    fn test_empty_record_produces_empty_bag_scalars() {
        let bag = UploadRecord::default().to_bag();
        assert_eq!(bag.get(keys::USER_ID), "");
        assert_eq!(bag.get(keys::CASE_NUMBER), "");
        // Only the full-record key survives pruning.
        assert!(bag.has(keys::FULL_RECORD));
    }

    #[test]
    fn test_zero_bag_yields_zero_record() {
        let record = UploadRecord::from_bag(&MetadataBag::new());
        assert_eq!(record, UploadRecord::default());
    }

    #[test]
    fn test_scalars_land_on_dedicated_keys() {
        let record = UploadRecord {
            user_id: "1111".into(),
            case_number: "8888".into(),
            file_type: "image/jpeg".into(),
            file_name: "01.jpeg".into(),
            duration_ms: 30,
            ..UploadRecord::default()
        };
        let bag = record.to_bag();
        assert_eq!(bag.get("userid"), "1111");
        assert_eq!(bag.get("casenumber"), "8888");
        assert_eq!(bag.get("filetype"), "image/jpeg");
        assert_eq!(bag.get("filename"), "01.jpeg");
        assert_eq!(bag.get("duration"), "30");
    }

    #[test]
    fn test_created_at_is_rfc3339_on_the_wire() {
        let record = UploadRecord {
            created_at: Some(
                DateTime::parse_from_rfc3339("2019-12-24T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
            ..UploadRecord::default()
        };
        let bag = record.to_bag();
        assert_eq!(bag.get(keys::CREATED_AT), "2019-12-24T00:00:00Z");
    }

    #[test]
    fn test_first_checksum_on_dedicated_keys() {
        let record = UploadRecord {
            checksums: vec![
                Checksum {
                    value: "1234-ABC".into(),
                    algorithm: "SHA256".into(),
                },
                Checksum {
                    value: "5678-DEF".into(),
                    algorithm: "SHA3-256".into(),
                },
            ],
            ..UploadRecord::default()
        };
        let bag = record.to_bag();
        assert_eq!(bag.get(keys::CHECKSUM), "1234-ABC");
        assert_eq!(bag.get(keys::CHECKSUM_TYPE), "SHA256");
        // The second checksum still survives the round trip.
        let back = UploadRecord::from_bag(&bag);
        assert_eq!(back.checksums.len(), 2);
    }

    #[test]
    fn test_empty_subject_list_round_trips_to_absent() {
        let record = UploadRecord {
            subjects: Some(vec![]),
            ..UploadRecord::default()
        };
        let back = UploadRecord::from_bag(&record.to_bag());
        assert_eq!(back.subjects, None);
    }

    #[test]
    fn test_all_empty_parent_round_trips_to_absent() {
        let record = UploadRecord {
            parent: Some(Parent::default()),
            ..UploadRecord::default()
        };
        let back = UploadRecord::from_bag(&record.to_bag());
        assert_eq!(back.parent, None);
    }

    #[test]
    fn test_fallback_reconstruction_without_full_record_key() {
        let record = UploadRecord {
            user_id: "1111".into(),
            case_number: "8888".into(),
            parent: Some(Parent {
                id: "1234".into(),
                name: "Sigma".into(),
                description: "With his mavericks".into(),
            }),
            tags: vec!["robbery".into(), "masked".into()],
            ..UploadRecord::default()
        };
        let mut bag = record.to_bag();
        // Simulate an older encoding that never wrote the full record.
        bag.remove(keys::FULL_RECORD);
        let back = UploadRecord::from_bag(&bag);
        assert_eq!(back.user_id, "1111");
        assert_eq!(back.case_number, "8888");
        assert_eq!(back.parent, record.parent);
        assert_eq!(back.tags, record.tags);
    }

    #[test]
    fn test_ensure_required_lists_all_missing() {
        let record = UploadRecord {
            user_id: "u".into(),
            ..UploadRecord::default()
        };
        let err = record
            .ensure_required(&[keys::USER_ID, keys::PARENT_ID, keys::CASE_NUMBER])
            .unwrap_err();
        match err {
            Error::MissingFields(fields) => {
                assert_eq!(fields, vec!["parentid", "casenumber"]);
            }
            other => panic!("expected MissingFields, got {other:?}"),
        }
    }

    #[test]
    fn test_ensure_required_ok_when_populated() {
        let record = UploadRecord {
            user_id: "u".into(),
            case_number: "c".into(),
            ..UploadRecord::default()
        };
        assert!(record
            .ensure_required(&[keys::USER_ID, keys::CASE_NUMBER])
            .is_ok());
    }
}
