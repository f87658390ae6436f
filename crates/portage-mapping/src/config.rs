//! Deployment-defined mapping configuration.
//!
//! A YAML document defines three tables: keyed per-field rules, "any field"
//! directives, and synthesized form fields. The configuration is validated
//! when loaded (target paths, conditions, templates) and read-only at
//! runtime.

use std::collections::HashMap;
use std::path::Path;

use portage_core::{Error, FormField, Result};
use serde::Deserialize;
use tracing::debug;

use crate::path::TargetField;
use crate::template::{Locale, Template};

/// When a per-field rule may overwrite the target field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverwriteCondition {
    #[default]
    Always,
    /// Skip when the target already holds a non-empty value.
    IfNotSet,
    /// Skip when the computed value is blank.
    IfNotBlank,
}

impl OverwriteCondition {
    pub fn parse(s: &str) -> Result<OverwriteCondition> {
        match s.to_lowercase().as_str() {
            "" => Ok(OverwriteCondition::Always),
            "ifnotset" => Ok(OverwriteCondition::IfNotSet),
            "ifnotblank" => Ok(OverwriteCondition::IfNotBlank),
            other => Err(Error::Config(format!(
                "unknown overwrite condition: {other}"
            ))),
        }
    }

    /// True when the write should proceed.
    pub fn allows(&self, existing: &str, new_value: &str) -> bool {
        match self {
            OverwriteCondition::Always => true,
            OverwriteCondition::IfNotSet => existing.is_empty(),
            OverwriteCondition::IfNotBlank => !new_value.is_empty(),
        }
    }
}

/// A validated per-field mapping rule.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub target: TargetField,
    pub condition: OverwriteCondition,
    /// Date-parsing layout for date targets.
    pub layout: String,
    pub template: Option<Template>,
}

/// A directive writing a rendered template into a canonical field.
#[derive(Debug, Clone)]
pub struct AnyFieldDirective {
    pub target: TargetField,
    pub template: Template,
}

/// A directive appending a rendered template as a new form field.
#[derive(Debug, Clone)]
pub struct SynthesizedField {
    pub key: String,
    pub visual_name: String,
    pub required: bool,
    pub template: Template,
}

// Raw serde shapes, turned into the validated model by `MappingConfig`.

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawRule {
    target: String,
    condition: String,
    aliases: Vec<String>,
    layout: String,
    template: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawAnyField {
    target: String,
    template: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawSynthesized {
    key: String,
    visual_name: String,
    required: bool,
    template: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawConfig {
    locale: String,
    fields: HashMap<String, RawRule>,
    any_fields: Vec<RawAnyField>,
    synthesized_fields: Vec<RawSynthesized>,
}

/// The complete, validated mapping configuration.
#[derive(Debug, Clone, Default)]
pub struct MappingConfig {
    pub locale: Locale,
    /// Rules keyed by lower-cased source key, with aliases expanded into
    /// their own entries.
    rules: HashMap<String, FieldRule>,
    pub any_fields: Vec<AnyFieldDirective>,
    pub synthesized_fields: Vec<SynthesizedField>,
}

impl MappingConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<MappingConfig> {
        let raw: RawConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("mapping config does not parse: {e}")))?;
        MappingConfig::from_raw(raw)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<MappingConfig> {
        let yaml = std::fs::read_to_string(path)?;
        MappingConfig::from_yaml_str(&yaml)
    }

    fn from_raw(raw: RawConfig) -> Result<MappingConfig> {
        let locale = Locale::parse(&raw.locale)?;
        let mut rules = HashMap::new();
        for (key, r) in raw.fields {
            let rule = FieldRule {
                target: TargetField::parse(&r.target)?,
                condition: OverwriteCondition::parse(&r.condition)?,
                layout: r.layout.clone(),
                template: parse_optional_template(&r.template)?,
            };
            // Aliases become first-class entries under their own keys.
            for alias in &r.aliases {
                rules.insert(alias.to_lowercase(), rule.clone());
            }
            rules.insert(key.to_lowercase(), rule);
        }
        let any_fields = raw
            .any_fields
            .into_iter()
            .map(|d| {
                Ok(AnyFieldDirective {
                    target: TargetField::parse(&d.target)?,
                    template: Template::parse(&d.template)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let synthesized_fields = raw
            .synthesized_fields
            .into_iter()
            .map(|d| {
                if d.key.is_empty() || d.visual_name.is_empty() {
                    return Err(Error::Config(
                        "synthesized field needs both a key and a visual name".to_string(),
                    ));
                }
                Ok(SynthesizedField {
                    key: d.key,
                    visual_name: d.visual_name,
                    required: d.required,
                    template: Template::parse(&d.template)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            rules = rules.len(),
            any_fields = any_fields.len(),
            synthesized_fields = synthesized_fields.len(),
            "mapping configuration loaded"
        );
        Ok(MappingConfig {
            locale,
            rules,
            any_fields,
            synthesized_fields,
        })
    }

    /// Resolve the rule for a submitted form field: exact key match first,
    /// then translation-key exact match, then the translation-key namespace
    /// prefix (before the first `.`), then visual name.
    pub fn resolve(&self, field: &FormField) -> Option<&FieldRule> {
        if let Some(rule) = self.rules.get(&field.key.to_lowercase()) {
            return Some(rule);
        }
        if !field.translation_key.is_empty() {
            let tk = field.translation_key.to_lowercase();
            if let Some(rule) = self.rules.get(&tk) {
                return Some(rule);
            }
            let prefix = tk.split('.').next().unwrap_or(&tk);
            if let Some(rule) = self.rules.get(prefix) {
                return Some(rule);
            }
        }
        self.rules.get(&field.visual_name.to_lowercase())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

fn parse_optional_template(source: &str) -> Result<Option<Template>> {
    if source.is_empty() {
        return Ok(None);
    }
    Template::parse(source).map(Some)
}
