//! 日志初始化
//!
//! `RUST_LOG` 风格的过滤表达式 + fmt 输出层，可切换为 JSON。

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化全局 tracing subscriber
///
/// `filter` 接受 `info`、`relay_gateway=debug,info` 这类表达式。
pub fn init_logging(filter: &str, json_format: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| anyhow::anyhow!("Invalid log filter '{}': {}", filter, e))?;

    let registry = tracing_subscriber::registry().with(filter);

    if json_format {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_line_number(true);
        registry.with(layer).try_init()?;
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true);
        registry.with(layer).try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        assert!(init_logging("relay=notalevel", false).is_err());
    }
}
