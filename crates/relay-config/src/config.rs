use serde::{Deserialize, Serialize};

/// 主配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// 发送者身份策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SenderPolicy {
    /// 信任消息体中的 `from` 字段
    Trust,
    /// 使用连接时的身份覆盖 `from`
    #[default]
    Overwrite,
}

impl SenderPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderPolicy::Trust => "trust",
            SenderPolicy::Overwrite => "overwrite",
        }
    }
}

impl std::str::FromStr for SenderPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trust" => Ok(SenderPolicy::Trust),
            "overwrite" => Ok(SenderPolicy::Overwrite),
            _ => Err(ConfigError::Validation(format!("Invalid sender policy: {}", s))),
        }
    }
}

/// Gateway 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    pub max_connections: usize,
    /// 新用户加入时，广播是否也发给新连接自己
    #[serde(default)]
    pub include_self_in_join_broadcast: bool,
    #[serde(default)]
    pub sender_policy: SenderPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            include_self_in_join_broadcast: false,
            sender_policy: SenderPolicy::default(),
        }
    }
}

/// Broker 类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    #[default]
    Redis,
    Memory,
}

impl BrokerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerKind::Redis => "redis",
            BrokerKind::Memory => "memory",
        }
    }
}

impl std::str::FromStr for BrokerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(BrokerKind::Redis),
            "memory" => Ok(BrokerKind::Memory),
            _ => Err(ConfigError::Validation(format!("Invalid broker kind: {}", s))),
        }
    }
}

/// 外部发布/订阅 Broker 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    #[serde(default)]
    pub kind: BrokerKind,
    pub url: String,
    pub channel: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// 是否把外部事件转发给所有在线连接
    #[serde(default)]
    pub fan_out: bool,
    #[serde(default)]
    pub restart_on_failure: bool,
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,
}

fn default_ping_interval() -> u64 {
    5
}

fn default_restart_delay() -> u64 {
    5
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Redis,
            url: "redis://127.0.0.1:6379".to_string(),
            channel: "myChannel".to_string(),
            ping_interval_secs: default_ping_interval(),
            fan_out: false,
            restart_on_failure: false,
            restart_delay_secs: default_restart_delay(),
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    #[serde(default)]
    pub json_format: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
