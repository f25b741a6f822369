#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod config;
pub mod directory;
pub mod host;
pub mod instances;
pub mod manager;
pub mod resolver;
pub mod session;
pub mod storage;
pub mod transfer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
pub use host::{Host, Notice};
pub use instances::{InstanceChoice, InstanceRegistry, Owner, OwnerWatch, PendingChoices};
pub use manager::Manager;
pub use resolver::{EndpointResolver, Event};
pub use session::{SessionState, SessionStore};
pub use storage::CustomInstance;
