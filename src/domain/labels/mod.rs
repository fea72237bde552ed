//! Labels domain - the ordered class names shown next to probabilities

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

pub const MIN_CLASSES: usize = 2;
pub const MAX_CLASSES: usize = 100;
pub const DEFAULT_CLASSES: usize = 5;

/// Name used for a class the user never renamed
pub fn default_label(index: usize) -> String {
    format!("Class {}", index)
}

/// Ordered class names; index `i` labels model output `i`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ClassLabels(Vec<String>);

impl ClassLabels {
    /// `count` default labels
    pub fn with_defaults(count: usize) -> Result<Self, DomainError> {
        validate_class_count(count)?;
        Ok(Self((0..count).map(default_label).collect()))
    }

    pub fn from_names(names: Vec<String>) -> Result<Self, DomainError> {
        validate_class_count(names.len())?;
        Ok(Self(names))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Apply the label editor: resize to `count`, then overwrite the given names.
    ///
    /// Indices without a submitted name keep their current text, or get the
    /// default label when they did not exist before. Blank names fall back
    /// the same way. Any other name is stored exactly as submitted.
    pub fn edit(&self, count: usize, names: &[Option<String>]) -> Result<Self, DomainError> {
        validate_class_count(count)?;

        if names.len() > count {
            return Err(DomainError::validation(format!(
                "{} class names submitted for {} classes",
                names.len(),
                count
            )));
        }

        let labels = (0..count)
            .map(|i| {
                names
                    .get(i)
                    .and_then(|n| n.as_deref())
                    .filter(|n| !n.trim().is_empty())
                    .map(str::to_string)
                    .or_else(|| self.0.get(i).cloned())
                    .unwrap_or_else(|| default_label(i))
            })
            .collect();

        Ok(Self(labels))
    }
}

impl Default for ClassLabels {
    fn default() -> Self {
        Self((0..DEFAULT_CLASSES).map(default_label).collect())
    }
}

impl TryFrom<Vec<String>> for ClassLabels {
    type Error = DomainError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_names(value)
    }
}

impl From<ClassLabels> for Vec<String> {
    fn from(labels: ClassLabels) -> Self {
        labels.0
    }
}

pub fn validate_class_count(count: usize) -> Result<(), DomainError> {
    if (MIN_CLASSES..=MAX_CLASSES).contains(&count) {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "Number of classes must be between {} and {}, got {}",
            MIN_CLASSES, MAX_CLASSES, count
        )))
    }
}
