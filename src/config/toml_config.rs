use crate::core::script_builder::{UndefinedPolicy, DEFAULT_TEMPLATE};
use crate::core::ConfigProvider;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "https://etl-script-generator-frontend.vercel.app",
];

/// Scripts land here, under the OS temp dir, unless `output.directory` is set.
pub const DEFAULT_OUTPUT_SUBDIR: &str = "etl-script-generator";

/// Server configuration. Every section and field is optional in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub cors: CorsSection,
    pub templates: TemplatesSection,
    pub preview: PreviewSection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Unset means uploads are not size limited.
    pub max_upload_mb: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSection {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesSection {
    pub directory: PathBuf,
    pub script_template: String,
    pub undefined: UndefinedPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSection {
    pub sample_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub persist_scripts: bool,
    /// Defaults to the system temp directory.
    pub directory: Option<PathBuf>,
    pub retention_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_upload_mb: None,
        }
    }
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for TemplatesSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("templates"),
            script_template: DEFAULT_TEMPLATE.to_string(),
            undefined: UndefinedPolicy::default(),
        }
    }
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            sample_rows: crate::core::preview::DEFAULT_SAMPLE_ROWS,
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            persist_scripts: true,
            directory: None,
            retention_seconds: 3600,
            sweep_interval_seconds: 300,
        }
    }
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${OUTPUT_DIR})；未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::Internal {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("server.host", &self.server.host)?;
        validation::validate_positive_number("server.port", u64::from(self.server.port), 1)?;
        if let Some(limit) = self.server.max_upload_mb {
            validation::validate_positive_number("server.max_upload_mb", limit as u64, 1)?;
        }

        for origin in &self.cors.allowed_origins {
            validation::validate_origin("cors.allowed_origins", origin)?;
        }

        let dir = self.templates.directory.to_string_lossy();
        validation::validate_path("templates.directory", &dir)?;
        validation::validate_template_name("templates.script_template", &self.templates.script_template)?;

        validation::validate_positive_number("preview.sample_rows", self.preview.sample_rows as u64, 1)?;

        if let Some(dir) = &self.output.directory {
            validation::validate_path("output.directory", &dir.to_string_lossy())?;
        }
        validation::validate_positive_number("output.retention_seconds", self.output.retention_seconds, 1)?;
        validation::validate_positive_number(
            "output.sweep_interval_seconds",
            self.output.sweep_interval_seconds,
            1,
        )?;

        Ok(())
    }
}

impl ConfigProvider for AppConfig {
    fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn allowed_origins(&self) -> &[String] {
        &self.cors.allowed_origins
    }

    fn max_upload_bytes(&self) -> Option<usize> {
        self.server.max_upload_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }

    fn templates_dir(&self) -> &Path {
        &self.templates.directory
    }

    fn script_template(&self) -> &str {
        &self.templates.script_template
    }

    fn undefined_policy(&self) -> UndefinedPolicy {
        self.templates.undefined
    }

    fn preview_rows(&self) -> usize {
        self.preview.sample_rows
    }

    fn persist_scripts(&self) -> bool {
        self.output.persist_scripts
    }

    fn script_output_dir(&self) -> PathBuf {
        self.output
            .directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_OUTPUT_SUBDIR))
    }

    fn script_retention(&self) -> Duration {
        Duration::from_secs(self.output.retention_seconds)
    }

    fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.output.sweep_interval_seconds)
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
