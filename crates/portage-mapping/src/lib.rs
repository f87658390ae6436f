//! # portage-mapping
//!
//! Configuration-driven translation of client-supplied form fields into
//! canonical schema fields: alias resolution, overwrite conditions, type
//! coercion, date parsing, and sandboxed template-based value synthesis.

pub mod config;
pub mod engine;
pub mod path;
pub mod template;

pub use config::{
    AnyFieldDirective, FieldRule, MappingConfig, OverwriteCondition, SynthesizedField,
};
pub use engine::{FieldLookup, MappingEngine};
pub use path::{SubjectField, TargetField};
pub use template::{Locale, Scope, Template};
