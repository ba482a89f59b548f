pub mod bootstrap;
pub mod health;
pub mod notify;
pub mod scheduler;
pub mod services;

pub use bootstrap::{bootstrap, bootstrap_with_config, Application, BootstrapError};
pub use scheduler::{StageScheduler, TickSummary};
