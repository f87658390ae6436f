//! Round-trip tests over a fully populated canonical record.

use chrono::{DateTime, Utc};
use portage_core::{
    keys, Annotation, Bookmark, Checksum, Creator, FormField, Gender, Location, MetadataBag,
    Parent, Person, UploadRecord, ValidationRule,
};

fn ts(s: &str) -> Option<DateTime<Utc>> {
    Some(
        DateTime::parse_from_rfc3339(s)
            .expect("test timestamp")
            .with_timezone(&Utc),
    )
}

/// A record with every field populated, including multi-element lists.
fn sample_record() -> UploadRecord {
    UploadRecord {
        user_id: "1111".into(),
        parent: Some(Parent {
            id: "1234".into(),
            name: "Sigma".into(),
            description: "With his mavericks".into(),
        }),
        created_at: ts("2019-12-24T00:00:00Z"),
        captured_at: ts("2019-12-23T18:30:00Z"),
        completed_at: ts("2019-12-24T01:00:00Z"),
        file_type: "image/jpeg".into(),
        display_name: "Scene overview".into(),
        description: "Crime scene photo".into(),
        checksums: vec![
            Checksum {
                value: "1234-ABC".into(),
                algorithm: "SHA256".into(),
            },
            Checksum {
                value: "5678-DEF".into(),
                algorithm: "MD5".into(),
            },
        ],
        file_name: "01.jpeg".into(),
        file_size: Some(204_800),
        tags: vec!["robbery".into(), "masked".into()],
        ext_id: "EXT-42".into(),
        case_number: "8888".into(),
        duration_ms: 30,
        creator: Some(Creator {
            sys_id: "BADGE-9".into(),
            person: Person {
                first_name: "Dana".into(),
                last_name: "Reyes".into(),
                ..Person::default()
            },
        }),
        location: Some(Location {
            text: "Back alley, 5th street".into(),
            latitude: 59.3293,
            longitude: 18.0686,
            ..Location::default()
        }),
        subjects: Some(vec![
            Person {
                first_name: "John".into(),
                last_name: "Doe".into(),
                id: "P-1".into(),
                dob: ts("1984-05-02T00:00:00Z"),
                gender: Gender::Male,
                nationality: "SE".into(),
                present: true,
                ..Person::default()
            },
            Person {
                first_name: "Jane".into(),
                last_name: "Doe".into(),
                gender: Gender::Female,
                ..Person::default()
            },
        ]),
        account_name: "precinct-12".into(),
        equipment_id: "CAM-7".into(),
        interview_type: "field".into(),
        bookmarks: vec![Bookmark {
            id: "b1".into(),
            label: "suspect enters".into(),
            created_at: ts("2019-12-23T18:31:00Z"),
            start_ms: 1_000,
            end_ms: 4_000,
        }],
        annotations: vec![Annotation {
            id: "a1".into(),
            text: "license plate visible".into(),
            start_ms: 2_000,
            end_ms: 2_500,
        }],
        notes: "handle with care".into(),
        client_media_id: "cm-001".into(),
        group_id: "g-5".into(),
        group_name: "Night shift".into(),
        form_fields: vec![FormField {
            key: "severity".into(),
            field_id: "f-1".into(),
            translation_key: "case.severity".into(),
            visual_name: "Severity".into(),
            value: "high".into(),
            required: true,
            data_type: "string".into(),
            validation: ValidationRule {
                min: Some(1),
                max: Some(5),
                pattern: String::new(),
            },
        }],
    }
}

#[test]
fn full_record_round_trips_losslessly() {
    let record = sample_record();
    let back = UploadRecord::from_bag(&record.to_bag());
    assert_eq!(back, record);
}

#[test]
fn round_trip_is_idempotent() {
    let once = UploadRecord::from_bag(&sample_record().to_bag());
    let twice = UploadRecord::from_bag(&once.to_bag());
    assert_eq!(twice, once);
}

#[test]
fn bag_keys_read_case_insensitively_after_encoding() {
    let bag = sample_record().to_bag();
    assert_eq!(bag.get("UserId"), "1111");
    assert_eq!(bag.get("CASENUMBER"), "8888");
    assert_eq!(bag.get("FileName"), "01.jpeg");
}

#[test]
fn all_checksums_survive_despite_single_dedicated_key() {
    let record = sample_record();
    let bag = record.to_bag();
    assert_eq!(bag.get(keys::CHECKSUM), "1234-ABC");
    let back = UploadRecord::from_bag(&bag);
    assert_eq!(back.checksums, record.checksums);
}

#[test]
fn second_subject_survives_round_trip() {
    let back = UploadRecord::from_bag(&sample_record().to_bag());
    let subjects = back.subjects.expect("subjects present");
    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[1].first_name, "Jane");
    assert_eq!(subjects[1].gender, Gender::Female);
}

#[test]
fn blank_scalars_never_appear_in_the_bag() {
    let record = UploadRecord {
        user_id: "1111".into(),
        ..UploadRecord::default()
    };
    let bag = record.to_bag();
    for (k, v) in bag.iter() {
        assert!(!v.is_empty(), "blank value stored under {k}");
    }
}

#[test]
fn foreign_mixed_case_bag_is_normalized() {
    let bag: MetadataBag = [
        ("UserID".to_string(), "1111".to_string()),
        ("CaseNumber".to_string(), "8888".to_string()),
    ]
    .into_iter()
    .collect();
    let record = UploadRecord::from_bag(&bag);
    assert_eq!(record.user_id, "1111");
    assert_eq!(record.case_number, "8888");
}
