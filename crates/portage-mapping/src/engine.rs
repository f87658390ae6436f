//! The mapping engine: applies a loaded [`MappingConfig`] to a canonical
//! record's submitted form fields.

use std::collections::HashMap;

use portage_core::{FormField, UploadRecord};
use tracing::{debug, instrument, trace};

use crate::config::{MappingConfig, OverwriteCondition};
use crate::template::Scope;

/// Trimmed form-field values looked up by key, field ID, or translation
/// key.
#[derive(Debug, Clone, Default)]
pub struct FieldLookup(HashMap<String, String>);

impl FieldLookup {
    pub fn from_fields(fields: &[FormField]) -> FieldLookup {
        let mut m = HashMap::new();
        for f in fields {
            let val = f.value.trim().to_string();
            if !f.key.is_empty() {
                m.insert(f.key.clone(), val.clone());
            }
            if !f.field_id.is_empty() {
                m.insert(f.field_id.clone(), val.clone());
            }
            if !f.translation_key.is_empty() {
                m.insert(f.translation_key.clone(), val);
            }
        }
        FieldLookup(m)
    }

    /// Empty string when no field is known under the key.
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Applies mapping configuration to records. Stateless between calls; safe
/// to share.
#[derive(Debug, Clone, Default)]
pub struct MappingEngine {
    config: MappingConfig,
}

impl MappingEngine {
    pub fn new(config: MappingConfig) -> MappingEngine {
        MappingEngine { config }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Run the full pipeline over the record's form fields, in the client's
    /// submission order: per-field rules, then "any field" directives, then
    /// synthesized form fields.
    ///
    /// Applying the engine twice without new form-field input yields the
    /// same record as applying it once.
    #[instrument(skip_all, fields(form_fields = record.form_fields.len()))]
    pub fn apply(&self, record: &mut UploadRecord) {
        let lookup = FieldLookup::from_fields(&record.form_fields);

        let fields = record.form_fields.clone();
        for field in &fields {
            let Some(rule) = self.config.resolve(field) else {
                trace!(field_key = %field.key, "no mapping rule for field");
                continue;
            };
            let raw = field.value.trim();
            let value = match &rule.template {
                Some(t) => t.render(&Scope {
                    record,
                    fields: &lookup,
                    field: Some(field),
                    value: Some(raw),
                    locale: self.config.locale,
                }),
                None => raw.to_string(),
            };
            trace!(
                field_key = %field.key,
                target_field = rule.target.as_str(),
                "applying mapping rule"
            );
            rule.target
                .apply(record, rule.condition, &rule.layout, &value);
        }

        for directive in &self.config.any_fields {
            let value = directive.template.render(&Scope {
                record,
                fields: &lookup,
                field: None,
                value: None,
                locale: self.config.locale,
            });
            if value.is_empty() {
                continue;
            }
            directive
                .target
                .apply(record, OverwriteCondition::Always, "", &value);
        }

        for synth in &self.config.synthesized_fields {
            // Re-running the engine must not duplicate synthesized fields.
            if record.form_fields.iter().any(|f| f.key == synth.key) {
                continue;
            }
            let value = synth.template.render(&Scope {
                record,
                fields: &lookup,
                field: None,
                value: None,
                locale: self.config.locale,
            });
            if value.is_empty() {
                trace!(key = %synth.key, "synthesized field rendered empty, skipped");
                continue;
            }
            record.form_fields.push(FormField {
                key: synth.key.clone(),
                field_id: synth.key.clone(),
                translation_key: synth.key.clone(),
                visual_name: synth.visual_name.clone(),
                value,
                required: synth.required,
                data_type: "string".to_string(),
                ..FormField::default()
            });
        }

        debug!(
            form_fields = record.form_fields.len(),
            "field mapping applied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use portage_core::Person;

    const CONFIG: &str = r#"
locale: nb_NO
fields:
  casenr:
    target: casenumber
    condition: ifnotset
    aliases: ["saksnummer"]
  fornavn:
    target: subject.firstname
  dob:
    target: subject.dob
    layout: "%d.%m.%Y"
  operator:
    target: creator.firstname
    condition: ifnotblank
  keywords:
    target: tags
anyFields:
  - target: displayname
    template: "{form.casenr} - {record.filename}"
synthesizedFields:
  - key: captureday
    visualName: Capture day
    template: "{dateShort record.capturedat}"
"#;

    fn engine() -> MappingEngine {
        MappingEngine::new(MappingConfig::from_yaml_str(CONFIG).unwrap())
    }

    fn field(key: &str, value: &str) -> FormField {
        FormField {
            key: key.into(),
            field_id: format!("id-{key}"),
            value: value.into(),
            ..FormField::default()
        }
    }

    #[test]
    fn test_per_field_rule_writes_target() {
        let mut record = UploadRecord {
            form_fields: vec![field("casenr", " 8888 ")],
            ..UploadRecord::default()
        };
        engine().apply(&mut record);
        assert_eq!(record.case_number, "8888");
    }

    #[test]
    fn test_ifnotset_preserves_existing_value() {
        let mut record = UploadRecord {
            case_number: "1111".into(),
            form_fields: vec![field("casenr", "8888")],
            ..UploadRecord::default()
        };
        engine().apply(&mut record);
        assert_eq!(record.case_number, "1111");
    }

    #[test]
    fn test_first_field_wins_under_ifnotset() {
        let mut record = UploadRecord {
            form_fields: vec![field("casenr", "first"), field("saksnummer", "second")],
            ..UploadRecord::default()
        };
        engine().apply(&mut record);
        assert_eq!(record.case_number, "first");
    }

    #[test]
    fn test_ifnotblank_skips_blank_value() {
        let mut record = UploadRecord {
            creator: Some(portage_core::Creator {
                person: Person {
                    first_name: "Dana".into(),
                    ..Person::default()
                },
                ..Default::default()
            }),
            form_fields: vec![field("operator", "  ")],
            ..UploadRecord::default()
        };
        engine().apply(&mut record);
        assert_eq!(record.creator.unwrap().person.first_name, "Dana");
    }

    #[test]
    fn test_subject_field_enriches_existing_subject() {
        let mut record = UploadRecord {
            subjects: Some(vec![Person::default()]),
            form_fields: vec![field("fornavn", "John"), field("dob", "02.05.1984")],
            ..UploadRecord::default()
        };
        engine().apply(&mut record);
        let subject = record.first_subject().unwrap();
        assert_eq!(subject.first_name, "John");
        assert!(subject.dob.is_some());
    }

    #[test]
    fn test_any_field_directive_renders_from_lookup() {
        let mut record = UploadRecord {
            file_name: "01.jpeg".into(),
            form_fields: vec![field("casenr", "8888")],
            ..UploadRecord::default()
        };
        engine().apply(&mut record);
        assert_eq!(record.display_name, "8888 - 01.jpeg");
    }

    #[test]
    fn test_synthesized_field_appended() {
        let mut record = UploadRecord {
            captured_at: Some(Utc.with_ymd_and_hms(2019, 12, 24, 10, 0, 0).unwrap()),
            ..UploadRecord::default()
        };
        engine().apply(&mut record);
        let synth = record
            .form_fields
            .iter()
            .find(|f| f.key == "captureday")
            .unwrap();
        assert_eq!(synth.value, "24. des. 2019");
        assert_eq!(synth.visual_name, "Capture day");
    }

    #[test]
    fn test_synthesized_field_skipped_when_template_renders_empty() {
        let mut record = UploadRecord::default();
        engine().apply(&mut record);
        assert!(record.form_fields.is_empty());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut record = UploadRecord {
            file_name: "01.jpeg".into(),
            captured_at: Some(Utc.with_ymd_and_hms(2019, 12, 24, 10, 0, 0).unwrap()),
            subjects: Some(vec![Person::default()]),
            form_fields: vec![
                field("casenr", "8888"),
                field("fornavn", "John"),
                field("keywords", "robbery"),
            ],
            ..UploadRecord::default()
        };
        engine().apply(&mut record);
        let once = record.clone();
        engine().apply(&mut record);
        assert_eq!(record, once);
    }

    #[test]
    fn test_unmapped_fields_are_ignored() {
        let mut record = UploadRecord {
            form_fields: vec![field("completely-unknown", "v")],
            ..UploadRecord::default()
        };
        engine().apply(&mut record);
        assert_eq!(record.case_number, "");
        assert_eq!(record.notes, "");
        assert_eq!(record.tags, Vec::<String>::new());
        assert_eq!(record.form_fields.len(), 1);
    }

    #[test]
    fn test_lookup_covers_key_id_and_translation_key() {
        let f = FormField {
            key: "k".into(),
            field_id: "id".into(),
            translation_key: "ns.k".into(),
            value: " v ".into(),
            ..FormField::default()
        };
        let lookup = FieldLookup::from_fields(&[f]);
        assert_eq!(lookup.get("k"), "v");
        assert_eq!(lookup.get("id"), "v");
        assert_eq!(lookup.get("ns.k"), "v");
        assert_eq!(lookup.get("missing"), "");
    }
}
