pub mod clock;
pub mod config;
pub mod engine;
pub mod inbox;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod protocol;
pub mod ratings;
pub mod server;
pub mod slot;
pub mod sweeper;
pub mod wal;
