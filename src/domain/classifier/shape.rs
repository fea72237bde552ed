//! Tensor shapes with an unknown (batch) dimension

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shape of a model input or output; `None` marks an unknown dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorShape(Vec<Option<usize>>);

impl TensorShape {
    pub fn new(dims: Vec<Option<usize>>) -> Self {
        Self(dims)
    }

    /// Shape with a leading unknown batch dimension
    pub fn batched(dims: &[usize]) -> Self {
        let mut all = Vec::with_capacity(dims.len() + 1);
        all.push(None);
        all.extend(dims.iter().copied().map(Some));
        Self(all)
    }

    pub fn dims(&self) -> &[Option<usize>] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn last(&self) -> Option<usize> {
        self.0.last().copied().flatten()
    }

    /// Whether a concrete shape fits, ignoring the batch axis and unknown dims
    pub fn accepts(&self, concrete: &[usize]) -> bool {
        if concrete.len() != self.0.len() {
            return false;
        }

        self.0
            .iter()
            .zip(concrete)
            .skip(1)
            .all(|(expected, actual)| expected.is_none_or(|e| e == *actual))
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;

        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match dim {
                Some(d) => write!(f, "{}", d)?,
                None => write!(f, "None")?,
            }
        }

        if self.0.len() == 1 {
            write!(f, ",")?;
        }

        write!(f, ")")
    }
}

/// Formats a concrete shape the same way, e.g. `(1, 128, 128, 1)`
pub fn format_dims(dims: &[usize]) -> String {
    TensorShape::new(dims.iter().copied().map(Some).collect()).to_string()
}
