use crate::config::{BrokerKind, Config, ConfigError, ConfigResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// 配置管理器
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    from_file: bool,
    config: Arc<RwLock<Config>>,
}

impl ConfigManager {
    /// 加载配置文件，文件不存在时使用默认配置
    ///
    /// 加载发生在日志初始化之前，来源由 [`ConfigManager::is_from_file`] 报告给调用方
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let from_file = path.exists();
        let config = if from_file {
            let content = tokio::fs::read_to_string(path).await?;
            let content = Self::expand_env_vars(&content)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            from_file,
            config: Arc::new(RwLock::new(config)),
        })
    }

    /// 获取默认配置路径 (~/.relay/config.json)
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))
    }

    /// 创建一个新的配置管理器（用于测试）
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path,
            from_file: false,
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// 当前配置的快照
    pub async fn snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    /// 在内存中更新配置（命令行参数覆盖），更新后重新验证
    pub async fn update<F>(&self, f: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.config.write().await;
        let mut candidate = config.clone();
        f(&mut candidate);
        Self::validate(&candidate)?;
        *config = candidate;
        Ok(())
    }

    /// 验证配置
    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        if config.gateway.max_connections == 0 {
            return Err(ConfigError::Validation(
                "Gateway max_connections must be greater than 0".to_string(),
            ));
        }

        if config.broker.channel.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Broker channel cannot be empty".to_string(),
            ));
        }

        if config.broker.ping_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Broker ping_interval_secs must be greater than 0".to_string(),
            ));
        }

        if config.broker.kind == BrokerKind::Redis && config.broker.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Broker url is required for the redis broker".to_string(),
            ));
        }

        Ok(())
    }

    /// 展开环境变量 ${VAR} 或 ${VAR:-default}
    pub fn expand_env_vars(content: &str) -> ConfigResult<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::Validation(format!("Invalid pattern: {}", e)))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_expr = &cap[1];

            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            let replacement = match std::env::var(var_name) {
                Ok(val) => val,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    None => return Err(ConfigError::EnvVarNotFound(var_name.to_string())),
                },
            };

            result = result.replace(full_match, &replacement);
        }

        Ok(result)
    }

    /// 获取配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 配置是否读取自文件（否则为默认值）
    pub fn is_from_file(&self) -> bool {
        self.from_file
    }
}
