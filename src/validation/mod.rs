//! Structural and semantic validation.
//!
//! `structure` checks a file's shape against the column contract of an entity
//! type before anything is imported. `fields` applies the per-entity pattern
//! rules to one row-shaped record.

pub mod fields;
pub mod structure;

use serde::Serialize;

pub use fields::FieldValidator;
pub use structure::{
    validate_table, validate_upload, StructureError, StructureReport, StructureStats,
    StructureWarning,
};

/// Result of validating one entity instance.
///
/// Built in one step from its messages; `valid` is derived and cannot
/// disagree with `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationOutcome {
    pub fn new(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Appends another outcome's messages after this one's.
    pub fn merge(self, other: ValidationOutcome) -> Self {
        let mut errors = self.errors;
        errors.extend(other.errors);
        let mut warnings = self.warnings;
        warnings.extend(other.warnings);
        Self::new(errors, warnings)
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<String>) {
        (self.errors, self.warnings)
    }
}
