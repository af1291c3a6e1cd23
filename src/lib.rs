pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod watch;

pub use config::OperatorConfig;
pub use controller::{Context, Error, Reconciler, Result};
pub use crd::{DormantDatabase, Elasticsearch, Snapshot};
pub use health::{HealthState, Metrics};
pub use watch::{Dispatcher, OperatorEvent, ResourceEvent, Route, WatchAction, route, run_watchers};
