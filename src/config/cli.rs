use super::AppConfig;
use crate::utils::error::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "etl-script-generator")]
#[command(about = "HTTP API that previews tabular files and generates ETL scripts")]
pub struct ServerArgs {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding the script templates (overrides templates.directory)
    #[arg(long)]
    pub templates_dir: Option<PathBuf>,

    /// Template file rendered by /generate/script (overrides templates.script_template)
    #[arg(long)]
    pub template: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl ServerArgs {
    /// Loads the config file, if any, then applies command line overrides.
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = &self.templates_dir {
            config.templates.directory = dir.clone();
        }
        if let Some(template) = &self.template {
            config.templates.script_template = template.clone();
        }
    }
}
