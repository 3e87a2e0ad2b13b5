use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::hub::BroadcastHub;
use crate::transport::{serve_consumer, ConsumerTransport};

/// 读空闲容忍时间，超时只是继续等待
const READ_IDLE: Duration = Duration::from_secs(60);

/// WebSocket 写半部
pub struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl ConsumerTransport for WsTransport {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        // 信封是 JSON，按文本帧发送
        let message = match String::from_utf8(payload.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(target: "hub", error = %e, "WebSocket close failed");
        }
    }
}

/// 处理一个 WebSocket 连接直到任一方向结束
pub async fn serve_websocket(socket: WebSocket, hub: BroadcastHub) {
    let consumer = match hub.register_consumer().await {
        Ok(consumer) => consumer,
        Err(e) => {
            warn!(target: "hub", error = %e, "Rejecting WebSocket connection");
            return;
        }
    };
    let id = consumer.id();

    let (sink, stream) = socket.split();
    let cancel = CancellationToken::new();
    let mut delivery = tokio::spawn(serve_consumer(consumer, WsTransport::new(sink), hub, cancel.clone()));

    tokio::select! {
        _ = read_loop(stream) => {
            cancel.cancel();
            if let Err(e) = delivery.await {
                warn!(target: "hub", consumer = %id, error = %e, "Delivery task failed");
            }
        }
        result = &mut delivery => {
            if let Err(e) = result {
                warn!(target: "hub", consumer = %id, error = %e, "Delivery task failed");
            }
        }
    }

    debug!(target: "hub", consumer = %id, "WebSocket connection finished");
}

/// 读取客户端消息以保持连接；关闭或出错时返回
async fn read_loop(mut stream: SplitStream<WebSocket>) {
    loop {
        match tokio::time::timeout(READ_IDLE, stream.next()).await {
            Err(_) => continue,
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Err(e))) => {
                debug!(target: "hub", error = %e, "WebSocket read failed");
                break;
            }
            Ok(Some(Ok(_))) => {}
        }
    }
}
