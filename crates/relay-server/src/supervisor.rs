//! 外部事件桥的监督任务

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use relay_bridge::{BridgeError, EventBridge};
use relay_config::BrokerConfig;

/// What to do when the bridge fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub restart_on_failure: bool,
    pub delay: Duration,
}

impl From<&BrokerConfig> for RestartPolicy {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            restart_on_failure: config.restart_on_failure,
            delay: Duration::from_secs(config.restart_delay_secs),
        }
    }
}

/// Run the bridge until it is shut down.
///
/// Without restarts the first failure is returned and the bridge stays down.
pub async fn supervise_bridge(
    bridge: Arc<EventBridge>,
    policy: RestartPolicy,
) -> Result<(), BridgeError> {
    let shutdown = bridge.shutdown_token();
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        let error = match bridge.run().await {
            Ok(()) => {
                info!("Bridge stopped");
                return Ok(());
            }
            Err(e) => e,
        };

        if !policy.restart_on_failure {
            error!(error = %error, "Bridge failed");
            return Err(error);
        }

        warn!(
            error = %error,
            attempt,
            delay_secs = policy.delay.as_secs(),
            "Bridge failed, restarting"
        );
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_bridge::{BridgeConfig, BridgeState, MemoryBroker};

    fn bridge_over(broker: &MemoryBroker) -> Arc<EventBridge> {
        Arc::new(EventBridge::new(
            Arc::new(broker.clone()),
            BridgeConfig {
                channel: "myChannel".to_string(),
                ping_interval: Duration::from_secs(60),
            },
        ))
    }

    #[tokio::test]
    async fn test_failure_without_restart_is_returned() {
        let broker = MemoryBroker::new();
        broker.set_accept_subscriptions(false);
        let policy = RestartPolicy {
            restart_on_failure: false,
            delay: Duration::from_millis(10),
        };

        let result = supervise_bridge(bridge_over(&broker), policy).await;
        assert!(matches!(result, Err(BridgeError::Subscribe(_))));
    }

    #[tokio::test]
    async fn test_restart_after_failure() {
        let broker = MemoryBroker::new();
        broker.set_accept_subscriptions(false);
        let bridge = bridge_over(&broker);
        let mut state = bridge.watch_state();
        let policy = RestartPolicy {
            restart_on_failure: true,
            delay: Duration::from_millis(20),
        };

        let supervisor = tokio::spawn(supervise_bridge(Arc::clone(&bridge), policy));
        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.set_accept_subscriptions(true);

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == BridgeState::Subscribed),
        )
        .await
        .unwrap()
        .unwrap();

        bridge.shutdown_token().cancel();
        assert!(supervisor.await.unwrap().is_ok());
    }
}
