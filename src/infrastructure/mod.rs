//! Infrastructure layer - HDF5 and Keras model loading, sessions, observability

pub mod hdf5;
pub mod keras;
pub mod logging;
pub mod observability;
pub mod services;
pub mod session;
