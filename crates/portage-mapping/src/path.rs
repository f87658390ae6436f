//! Canonical target field paths.
//!
//! Mapping rules name their destination with a dotted path like
//! `subject.firstname`. The path vocabulary is closed: unknown paths are
//! rejected at configuration load, never discovered at apply time.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use portage_core::{Creator, Error, Gender, Parent, UploadRecord};
use tracing::{trace, warn};

use crate::config::OverwriteCondition;

/// A field on the first subject person.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectField {
    FirstName,
    LastName,
    Id,
    Dob,
    Gender,
    Nationality,
    Workplace,
    Status,
    WorkPhone,
    Phone,
    Mobile,
    Text,
    Address,
    Address2,
    ZipCode,
    PostArea,
    Country,
    Latitude,
    Longitude,
    Altitude,
    Accuracy,
}

/// A writable canonical schema field, addressed by its dotted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetField {
    UserId,
    CaseNumber,
    Description,
    DisplayName,
    Notes,
    Tags,
    ParentName,
    ParentDescription,
    CreatorFirstName,
    CreatorWorkplace,
    Subject(SubjectField),
}

impl TargetField {
    pub fn parse(path: &str) -> Result<TargetField, Error> {
        use SubjectField::*;
        let t = match path.to_lowercase().as_str() {
            "userid" => TargetField::UserId,
            "casenumber" => TargetField::CaseNumber,
            "description" => TargetField::Description,
            "displayname" => TargetField::DisplayName,
            "notes" => TargetField::Notes,
            "tags" => TargetField::Tags,
            "parent.name" => TargetField::ParentName,
            "parent.description" => TargetField::ParentDescription,
            "creator.firstname" => TargetField::CreatorFirstName,
            "creator.workplace" => TargetField::CreatorWorkplace,
            "subject.firstname" => TargetField::Subject(FirstName),
            "subject.lastname" => TargetField::Subject(LastName),
            "subject.id" => TargetField::Subject(Id),
            "subject.dob" => TargetField::Subject(Dob),
            "subject.gender" => TargetField::Subject(Gender),
            "subject.nationality" => TargetField::Subject(Nationality),
            "subject.workplace" => TargetField::Subject(Workplace),
            "subject.status" => TargetField::Subject(Status),
            "subject.workphone" => TargetField::Subject(WorkPhone),
            "subject.phone" => TargetField::Subject(Phone),
            "subject.mobile" => TargetField::Subject(Mobile),
            "subject.text" => TargetField::Subject(Text),
            "subject.address" => TargetField::Subject(Address),
            "subject.address2" => TargetField::Subject(Address2),
            "subject.zipcode" => TargetField::Subject(ZipCode),
            "subject.postarea" => TargetField::Subject(PostArea),
            "subject.country" => TargetField::Subject(Country),
            "subject.latitude" => TargetField::Subject(Latitude),
            "subject.longitude" => TargetField::Subject(Longitude),
            "subject.altitude" => TargetField::Subject(Altitude),
            "subject.accuracy" => TargetField::Subject(Accuracy),
            other => {
                return Err(Error::Config(format!(
                    "unknown mapping target field: {other}"
                )))
            }
        };
        Ok(t)
    }

    pub fn as_str(&self) -> &'static str {
        use SubjectField::*;
        match self {
            TargetField::UserId => "userid",
            TargetField::CaseNumber => "casenumber",
            TargetField::Description => "description",
            TargetField::DisplayName => "displayname",
            TargetField::Notes => "notes",
            TargetField::Tags => "tags",
            TargetField::ParentName => "parent.name",
            TargetField::ParentDescription => "parent.description",
            TargetField::CreatorFirstName => "creator.firstname",
            TargetField::CreatorWorkplace => "creator.workplace",
            TargetField::Subject(FirstName) => "subject.firstname",
            TargetField::Subject(LastName) => "subject.lastname",
            TargetField::Subject(Id) => "subject.id",
            TargetField::Subject(Dob) => "subject.dob",
            TargetField::Subject(Gender) => "subject.gender",
            TargetField::Subject(Nationality) => "subject.nationality",
            TargetField::Subject(Workplace) => "subject.workplace",
            TargetField::Subject(Status) => "subject.status",
            TargetField::Subject(WorkPhone) => "subject.workphone",
            TargetField::Subject(Phone) => "subject.phone",
            TargetField::Subject(Mobile) => "subject.mobile",
            TargetField::Subject(Text) => "subject.text",
            TargetField::Subject(Address) => "subject.address",
            TargetField::Subject(Address2) => "subject.address2",
            TargetField::Subject(ZipCode) => "subject.zipcode",
            TargetField::Subject(PostArea) => "subject.postarea",
            TargetField::Subject(Country) => "subject.country",
            TargetField::Subject(Latitude) => "subject.latitude",
            TargetField::Subject(Longitude) => "subject.longitude",
            TargetField::Subject(Altitude) => "subject.altitude",
            TargetField::Subject(Accuracy) => "subject.accuracy",
        }
    }

    /// Write a computed value into the record, honoring the rule's overwrite
    /// condition. Parse failures on typed fields are logged and leave the
    /// field unchanged.
    pub fn apply(
        &self,
        record: &mut UploadRecord,
        condition: OverwriteCondition,
        layout: &str,
        value: &str,
    ) {
        if let TargetField::Subject(sub) = self {
            // Subject rules only enrich an existing subject list.
            let Some(subject) = record.first_subject_mut() else {
                trace!(target_field = self.as_str(), "no subjects, rule skipped");
                return;
            };
            use SubjectField::*;
            match sub {
                FirstName => set_string(&mut subject.first_name, condition, value),
                LastName => set_string(&mut subject.last_name, condition, value),
                Id => set_string(&mut subject.id, condition, value),
                Nationality => set_string(&mut subject.nationality, condition, value),
                Workplace => set_string(&mut subject.workplace, condition, value),
                Status => set_string(&mut subject.status, condition, value),
                WorkPhone => set_string(&mut subject.work_phone, condition, value),
                Phone => set_string(&mut subject.phone, condition, value),
                Mobile => set_string(&mut subject.mobile, condition, value),
                Text => set_string(&mut subject.location.text, condition, value),
                Address => set_string(&mut subject.location.address, condition, value),
                Address2 => set_string(&mut subject.location.address2, condition, value),
                ZipCode => set_string(&mut subject.location.zip_code, condition, value),
                PostArea => set_string(&mut subject.location.post_area, condition, value),
                Country => set_string(&mut subject.location.country, condition, value),
                Latitude => set_f64(&mut subject.location.latitude, value, self.as_str()),
                Longitude => set_f64(&mut subject.location.longitude, value, self.as_str()),
                Altitude => set_f64(&mut subject.location.altitude, value, self.as_str()),
                Accuracy => set_f64(&mut subject.location.accuracy, value, self.as_str()),
                Gender => {
                    if subject.gender == portage_core::Gender::Unspecified {
                        subject.gender = portage_core::Gender::parse(value);
                    }
                }
                Dob => {
                    if condition == OverwriteCondition::IfNotSet && subject.dob.is_some() {
                        return;
                    }
                    if let Some(parsed) = parse_date(layout, value, self.as_str()) {
                        subject.dob = Some(parsed);
                    }
                }
            }
            return;
        }

        match self {
            TargetField::UserId => set_string(&mut record.user_id, condition, value),
            TargetField::CaseNumber => set_string(&mut record.case_number, condition, value),
            TargetField::Description => set_string(&mut record.description, condition, value),
            TargetField::DisplayName => set_string(&mut record.display_name, condition, value),
            TargetField::Notes => set_string(&mut record.notes, condition, value),
            TargetField::Tags => {
                // Tags accumulate; a value is only added once.
                if value.is_empty() || record.tags.iter().any(|t| t == value) {
                    return;
                }
                record.tags.push(value.to_string());
            }
            TargetField::ParentName => {
                let parent = record.parent.get_or_insert_with(Parent::default);
                set_string(&mut parent.name, condition, value);
            }
            TargetField::ParentDescription => {
                let parent = record.parent.get_or_insert_with(Parent::default);
                set_string(&mut parent.description, condition, value);
            }
            TargetField::CreatorFirstName => {
                let creator = record.creator.get_or_insert_with(Creator::default);
                set_string(&mut creator.person.first_name, condition, value);
            }
            TargetField::CreatorWorkplace => {
                let creator = record.creator.get_or_insert_with(Creator::default);
                set_string(&mut creator.person.workplace, condition, value);
            }
            TargetField::Subject(_) => unreachable!("handled above"),
        }
    }
}

impl TryFrom<String> for TargetField {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        TargetField::parse(&s)
    }
}

fn set_string(slot: &mut String, condition: OverwriteCondition, value: &str) {
    if condition.allows(slot, value) {
        *slot = value.to_string();
    }
}

/// Numeric fields are only written while still zero; a populated coordinate
/// is never overwritten by a mapping rule.
fn set_f64(slot: &mut f64, value: &str, target: &str) {
    if *slot != 0.0 {
        return;
    }
    match value.parse::<f64>() {
        Ok(v) => *slot = v,
        Err(_) => {
            warn!(target_field = target, value, "value does not parse as a number");
        }
    }
}

fn parse_date(layout: &str, value: &str, target: &str) -> Option<chrono::DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    if layout.is_empty() {
        warn!(target_field = target, "date rule has no layout, cannot parse");
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, layout) {
        return Some(dt.and_utc());
    }
    match NaiveDate::parse_from_str(value, layout) {
        Ok(d) => d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
        Err(e) => {
            warn!(target_field = target, value, layout, error = %e, "value does not parse as a date");
            None
        }
    }
}
