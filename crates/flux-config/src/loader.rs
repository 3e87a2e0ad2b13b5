use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{AppConfig, Result};

/// 配置加载器：TOML 文件（可选）+ 环境变量覆盖
///
/// 环境变量形如 `FLUX__FILTER__TIME_WINDOW_SECONDS=30`。
pub struct ConfigLoader {
    path: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            env_prefix: "FLUX".to_string(),
        }
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// 加载并校验
    pub fn load(&self) -> Result<AppConfig> {
        if self.path.exists() {
            info!(target: "config", path = %self.path.display(), "Loading configuration file");
        } else {
            debug!(target: "config", path = %self.path.display(), "Configuration file not found, using defaults");
        }

        let config = Config::builder()
            .add_source(File::from(self.path.as_path()).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }
}
