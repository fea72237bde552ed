use thiserror::Error;

/// Errors raised while reading an HDF5 container
#[derive(Debug, Error)]
pub enum Hdf5Error {
    #[error("not an HDF5 file: superblock signature not found")]
    NotHdf5,

    #[error("unexpected end of data at offset {offset} (needed {needed} more bytes)")]
    Truncated { offset: u64, needed: usize },

    #[error("bad signature at offset {offset}: expected '{expected}'")]
    BadSignature { offset: u64, expected: String },

    #[error("unsupported HDF5 feature: {feature}")]
    Unsupported { feature: String },

    #[error("invalid {what}: {message}")]
    Malformed { what: &'static str, message: String },

    #[error("'{path}' not found")]
    NotFound { path: String },

    #[error("'{path}' is not a {expected}")]
    WrongKind { path: String, expected: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Hdf5Error {
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    pub fn malformed(what: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }
}
