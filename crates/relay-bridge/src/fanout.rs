//! Redistribution of channel events into gateway connections

use relay_gateway::{Gateway, ServerFrame};
use serde_json::Value;
use tracing::{debug, warn};

use crate::bridge::EventSink;

impl EventSink for Gateway {
    fn deliver(&self, channel: &str, records: &[Value]) {
        let frame = ServerFrame::Event {
            channel: channel.to_string(),
            data: Value::Array(records.to_vec()),
        };
        match self.broadcast(&frame) {
            Ok(report) => debug!(
                channel = %channel,
                delivered = report.delivered,
                failed = report.failed,
                "External event fanned out"
            ),
            Err(e) => warn!(channel = %channel, error = %e, "External event fan-out failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_gateway::{ConnectionLifecycle, OutboundFrame};
    use serde_json::json;

    #[tokio::test]
    async fn test_event_reaches_every_connection() {
        let gateway = Gateway::default();
        let (a, mut ra) = gateway.accept("a").unwrap();
        let (b, mut rb) = gateway.accept("b").unwrap();
        a.on_connect();
        b.on_connect();
        // a: welcome + join(b); b: welcome
        ra.recv().await.unwrap();
        ra.recv().await.unwrap();
        rb.recv().await.unwrap();

        let records = vec![
            json!({"name": "Alice", "age": 1}),
            json!({"Name": "Bas", "Age": 18, "city": "Utrecht"}),
        ];
        gateway.deliver("myChannel", &records);

        for rx in [&mut ra, &mut rb] {
            let Some(OutboundFrame::Text(text)) = rx.recv().await else {
                panic!("expected event frame");
            };
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(
                value,
                json!({
                    "type": "event",
                    "channel": "myChannel",
                    "data": [
                        {"name": "Alice", "age": 1},
                        {"Name": "Bas", "Age": 18, "city": "Utrecht"}
                    ]
                })
            );
        }
    }
}
