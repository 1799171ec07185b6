pub mod archive;
pub mod config;
pub mod error;
pub mod events;
pub mod github;
pub mod lock;
pub mod log;
pub mod orchestrator;
pub mod reconcile;
pub mod shutdown;
pub mod store;
pub mod types;
pub mod watch;
