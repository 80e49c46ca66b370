use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relay_bridge::{BridgeConfig, EventBridge, EventPublisher};
use relay_config::{BrokerKind, ConfigManager, SenderPolicy};
use relay_gateway::Gateway;
use relay_server::{
    connect_backend, gateway_config, init_logging, run_server, supervise_bridge, AppState,
    RestartPolicy,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "relay-server")]
#[command(about = "Relay WebSocket gateway with an external pub/sub bridge")]
#[command(version)]
struct Cli {
    /// Enable debug mode
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// Server port (overrides config)
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Listen address (overrides config)
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Bridge channel (overrides config)
    #[arg(long, env = "RELAY_CHANNEL")]
    channel: Option<String>,

    /// Broker kind: redis or memory (overrides config)
    #[arg(long, env = "RELAY_BROKER")]
    broker: Option<String>,

    /// Sender policy: trust or overwrite (overrides config)
    #[arg(long, env = "RELAY_SENDER_POLICY")]
    sender_policy: Option<String>,

    /// Log filter (overrides config)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, default_value = "false")]
    json_logs: bool,

    /// Config file path (default: ~/.relay/config.json)
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 展开配置文件路径
    let config_path = match &cli.config {
        Some(path) => relay_config::expand_tilde(path).unwrap_or_else(|| PathBuf::from(path)),
        None => ConfigManager::default_config_path()?,
    };

    // 加载配置
    let config_manager = ConfigManager::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // 命令行参数覆盖配置文件
    let broker_kind = cli
        .broker
        .as_deref()
        .map(str::parse::<BrokerKind>)
        .transpose()?;
    let sender_policy = cli
        .sender_policy
        .as_deref()
        .map(str::parse::<SenderPolicy>)
        .transpose()?;
    config_manager
        .update(|config| {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(host) = &cli.host {
                config.server.host = host.clone();
            }
            if let Some(url) = &cli.redis_url {
                config.broker.url = url.clone();
            }
            if let Some(channel) = &cli.channel {
                config.broker.channel = channel.clone();
            }
            if let Some(kind) = broker_kind {
                config.broker.kind = kind;
            }
            if let Some(policy) = sender_policy {
                config.gateway.sender_policy = policy;
            }
            if cli.json_logs {
                config.logging.json_format = true;
            }
        })
        .await
        .context("Invalid configuration")?;

    let config = config_manager.snapshot().await;

    // 初始化日志
    let filter = cli.log_level.clone().unwrap_or_else(|| {
        if cli.debug {
            "debug".to_string()
        } else {
            config.logging.level.as_str().to_string()
        }
    });
    init_logging(&filter, config.logging.json_format)?;

    if config_manager.is_from_file() {
        tracing::info!("Config loaded from {:?}", config_manager.path());
    } else {
        tracing::info!("Config file not found at {:?}, using defaults", config_manager.path());
    }
    tracing::info!(
        broker = config.broker.kind.as_str(),
        channel = %config.broker.channel,
        fan_out = config.broker.fan_out,
        sender_policy = config.gateway.sender_policy.as_str(),
        "Starting relay server"
    );

    let backend = connect_backend(&config.broker)
        .await
        .with_context(|| format!("Failed to connect to {} broker", config.broker.kind.as_str()))?;

    let gateway = Gateway::new(gateway_config(&config.gateway));
    let publisher = EventPublisher::new(backend.broker.clone(), config.broker.channel.clone());

    let mut bridge = EventBridge::new(
        backend.broker.clone(),
        BridgeConfig {
            channel: config.broker.channel.clone(),
            ping_interval: Duration::from_secs(config.broker.ping_interval_secs),
        },
    );
    if config.broker.fan_out {
        bridge = bridge.with_sink(Arc::new(gateway.clone()));
    }

    let state = AppState::new(gateway, publisher, backend.store, bridge.watch_state());
    let shutdown = bridge.shutdown_token();

    // Ctrl-C 触发优雅退出
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
        }
    });

    // 桥失败后网关继续服务，/health 中可见 bridge 状态
    let policy = RestartPolicy::from(&config.broker);
    tokio::spawn(async move {
        match supervise_bridge(Arc::new(bridge), policy).await {
            Ok(()) => {}
            Err(e) => tracing::error!(error = %e, "External event bridge stopped"),
        }
    });

    let result = run_server(state, &config.server.host, config.server.port, shutdown.clone()).await;
    shutdown.cancel();
    result
}
