//! 应用状态

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use relay_bridge::{
    BridgeState, Broker, BrokerError, EventPublisher, MemoryBroker, MemoryUserStore, RedisBroker,
    RedisUserStore, UserDataStore,
};
use relay_config::{BrokerConfig, BrokerKind};
use relay_gateway::{Gateway, GatewayConfig, SenderPolicy};

/// 应用状态 - 在 main.rs 中创建并共享给所有 handler
#[derive(Clone)]
pub struct AppState {
    /// 连接注册表与消息路由
    pub gateway: Gateway,
    /// 外部频道发布端
    pub publisher: EventPublisher,
    /// 用户数据存储
    pub store: Arc<dyn UserDataStore>,
    /// 外部事件桥当前状态
    pub bridge_state: watch::Receiver<BridgeState>,
}

impl AppState {
    pub fn new(
        gateway: Gateway,
        publisher: EventPublisher,
        store: Arc<dyn UserDataStore>,
        bridge_state: watch::Receiver<BridgeState>,
    ) -> Self {
        Self {
            gateway,
            publisher,
            store,
            bridge_state,
        }
    }

    pub fn bridge_state(&self) -> BridgeState {
        *self.bridge_state.borrow()
    }
}

/// Broker 与用户数据存储
pub struct Backend {
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn UserDataStore>,
}

/// 按配置连接 broker，redis 不可达时直接失败
pub async fn connect_backend(config: &BrokerConfig) -> Result<Backend, BrokerError> {
    match config.kind {
        BrokerKind::Redis => {
            let broker = RedisBroker::connect(&config.url).await?;
            let store = RedisUserStore::new(broker.connection());
            Ok(Backend {
                broker: Arc::new(broker),
                store: Arc::new(store),
            })
        }
        BrokerKind::Memory => {
            info!("Using in-process broker");
            Ok(Backend {
                broker: Arc::new(MemoryBroker::new()),
                store: Arc::new(MemoryUserStore::new()),
            })
        }
    }
}

/// 配置文件中的 gateway 段转换为运行时配置
pub fn gateway_config(config: &relay_config::GatewayConfig) -> GatewayConfig {
    GatewayConfig {
        max_connections: config.max_connections,
        include_self_in_join_broadcast: config.include_self_in_join_broadcast,
        sender_policy: match config.sender_policy {
            relay_config::SenderPolicy::Trust => SenderPolicy::Trust,
            relay_config::SenderPolicy::Overwrite => SenderPolicy::Overwrite,
        },
    }
}
