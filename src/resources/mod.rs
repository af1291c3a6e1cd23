pub mod certificate;
pub mod common;
pub mod restore;
pub mod secret;
pub mod service;
pub mod statefulset;

pub use common::{FIELD_MANAGER, KIND, database_labels, standard_labels};
