pub mod api;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod intake;
pub mod limits;
pub mod model;
pub mod observability;
pub mod queue;
pub mod resolver;
pub mod wal;
