pub mod file_loader;
pub mod preview;
pub mod script_builder;

pub use crate::domain::model::{CellValue, EtlConfig, GeneratedScript, Preview, TabularData};
pub use crate::domain::ports::{ConfigProvider, ScriptStore};
pub use crate::utils::error::Result;
