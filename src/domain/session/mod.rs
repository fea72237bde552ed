//! Session domain - per-user state between requests

mod entity;
mod repository;

pub use entity::{SessionContext, SessionId, SessionSnapshot, SharedSession};
pub use repository::SessionRepository;
