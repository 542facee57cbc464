use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where rendered scripts are kept after a generate request.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Saves `code` and returns its location, or `None` when persistence is off.
    async fn persist(&self, code: &str) -> Result<Option<PathBuf>>;

    /// Removes saved scripts past their retention period and returns how many
    /// were deleted.
    async fn sweep(&self) -> Result<usize>;
}

pub trait ConfigProvider: Send + Sync {
    fn bind_address(&self) -> String;
    fn allowed_origins(&self) -> &[String];
    fn max_upload_bytes(&self) -> Option<usize>;
    fn templates_dir(&self) -> &Path;
    fn script_template(&self) -> &str;
    fn undefined_policy(&self) -> crate::core::script_builder::UndefinedPolicy;
    fn preview_rows(&self) -> usize;
    fn persist_scripts(&self) -> bool;
    fn script_output_dir(&self) -> PathBuf;
    fn script_retention(&self) -> Duration;
    fn sweep_interval(&self) -> Duration;
}
