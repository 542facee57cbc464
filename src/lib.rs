pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::ServerArgs;

pub use config::AppConfig;
pub use core::script_builder::{ScriptRenderer, UndefinedPolicy};
pub use server::{create_router, AppState};
pub use utils::error::{EtlError, Result};
