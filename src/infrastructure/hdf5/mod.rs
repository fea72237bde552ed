//! Read-only access to the subset of HDF5 used by Keras model files.
//!
//! Supports superblock versions 0-3, version 1 and 2 object headers, both
//! symbol-table and compact link-message groups, string attributes (fixed and
//! variable length) and numeric datasets with compact or contiguous storage.
//! Chunked or filtered storage and dense (fractal heap) groups are reported as
//! [`Hdf5Error::Unsupported`].

mod cursor;
mod error;
mod file;
mod messages;
mod object_header;
mod superblock;

#[cfg(test)]
pub(crate) mod fixture;

pub use error::Hdf5Error;
pub use file::{Attribute, Dataset, Group, Hdf5File};
pub use messages::Datatype;
pub use superblock::Superblock;
