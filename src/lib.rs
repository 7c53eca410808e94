pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod profile;
pub mod sql;
pub mod wal;
pub mod wire;
