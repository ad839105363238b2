pub mod arbiter;
pub mod clock;
pub mod config;
pub mod id;
pub mod models;
pub mod renderer;
pub mod schedule;
pub mod store;
pub mod transport;

pub use id::Id;
