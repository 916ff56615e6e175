//! Feature façades built on the namespace registry.

pub mod database;
pub mod messaging;

pub use database::DatabaseModule;
pub use messaging::MessagingModule;
