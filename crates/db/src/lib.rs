pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_ephemeral, DbPool};
pub use fixtures::{seed_demo, SeedSummary};
