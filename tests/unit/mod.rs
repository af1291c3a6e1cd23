// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for the Elasticsearch operator
//!
//! Scenarios run the watch dispatcher and reconciler against in-memory fakes:
//! - create, initialize and run
//! - pause into a DormantDatabase, or recreate a locked instance
//! - dormant name conflicts
//! - secret provisioning and reference counting
//! - update handling per changed field

#[path = "../common/mod.rs"]
mod common;

mod pause;
mod resources;
mod secrets;
mod state_machine;
mod update;
