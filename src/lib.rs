pub mod catalog;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod proto;
pub mod reaper;
pub mod wal;
pub mod wire;
