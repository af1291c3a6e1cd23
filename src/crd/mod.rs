mod dormant_database;
mod elasticsearch;
mod snapshot;

pub use dormant_database::*;
pub use elasticsearch::*;
pub use snapshot::*;
