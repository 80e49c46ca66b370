//! WebSocket transport adapter
//!
//! Upgrades `/ws/:id`, then drives the gateway lifecycle for the socket:
//! a writer task drains the connection's outbound queue while the reader
//! loop feeds inbound frames to the router.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relay_gateway::{ConnectionHandler, ConnectionLifecycle, OutboundFrame, CLOSE_TRY_AGAIN_LATER};

use crate::state::AppState;

/// Why the writer task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// The gateway asked for the socket to be closed
    ServerClose,
    /// Writing to the socket failed
    SocketClosed,
    /// Every sender for this connection is gone
    QueueClosed,
}

/// WebSocket 处理器
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(identity = %identity, reason = %rejection.body_text(), "Not a WebSocket upgrade");
            return (StatusCode::UPGRADE_REQUIRED, "Upgrade Required").into_response();
        }
    };

    match state.gateway.accept(identity.clone()) {
        Ok((handler, outbound)) => {
            ws.on_upgrade(move |socket| serve_connection(socket, handler, outbound))
        }
        Err(e) => {
            warn!(identity = %identity, error = %e, "Refusing connection");
            let reason = e.to_string();
            ws.on_upgrade(move |socket| refuse_connection(socket, reason))
        }
    }
}

async fn refuse_connection(mut socket: WebSocket, reason: String) {
    let frame = CloseFrame {
        code: CLOSE_TRY_AGAIN_LATER,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn serve_connection(
    socket: WebSocket,
    handler: ConnectionHandler,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        return WriterExit::SocketClosed;
                    }
                }
                OutboundFrame::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    return WriterExit::ServerClose;
                }
            }
        }
        WriterExit::QueueClosed
    });

    let report = handler.on_connect();
    debug!(
        identity = %handler.identity(),
        delivered = report.delivered,
        failed = report.failed,
        welcomed = report.welcomed,
        "Join announced"
    );

    // resolves to the peer's close code, if it sent one
    let reader = async {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    handler.on_message(text.as_bytes());
                }
                Ok(Message::Binary(bytes)) => {
                    handler.on_message(&bytes);
                }
                Ok(Message::Close(frame)) => return frame.map(|f| f.code),
                // ping/pong are answered by axum
                Ok(_) => {}
                Err(e) => {
                    handler.on_error(&e);
                    return None;
                }
            }
        }
        None
    };

    tokio::select! {
        biased;

        exit = &mut writer => match exit {
            Ok(WriterExit::ServerClose) => handler.on_close(),
            Ok(exit) => {
                debug!(identity = %handler.identity(), ?exit, "Writer stopped");
                handler.on_disconnect(None);
            }
            Err(e) => {
                warn!(identity = %handler.identity(), error = %e, "Writer task failed");
                handler.on_disconnect(None);
            }
        },
        close_code = reader => {
            writer.abort();
            handler.on_disconnect(close_code);
        }
    }

    info!(
        identity = %handler.identity(),
        connection = %handler.handle().id,
        "WebSocket finished"
    );
}
