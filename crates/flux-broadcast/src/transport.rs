use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::hub::{BroadcastHub, Consumer};

/// 消费者的下游传输
#[async_trait]
pub trait ConsumerTransport: Send {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError>;

    async fn close(&mut self) {}
}

/// 投递任务：把消费者队列写入传输层
///
/// 发送超时或失败即结束并移除该消费者；队列关闭（被驱逐或中心关闭）时同样结束。
pub async fn serve_consumer<T: ConsumerTransport>(
    mut consumer: Consumer,
    mut transport: T,
    hub: BroadcastHub,
    cancel: CancellationToken,
) {
    let id = consumer.id();
    let send_timeout: Duration = hub.settings().send_timeout;
    let mut delivered = 0u64;

    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            payload = consumer.recv() => match payload {
                Some(payload) => payload,
                None => {
                    debug!(target: "hub", consumer = %id, "Consumer queue closed");
                    break;
                }
            },
        };

        let result = match tokio::time::timeout(send_timeout, transport.send(payload)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(send_timeout)),
        };
        if let Err(e) = result {
            warn!(target: "hub", consumer = %id, delivered, error = %e, "Delivery failed, closing consumer");
            break;
        }
        delivered += 1;
    }

    hub.unregister_consumer(id).await;
    transport.close().await;
    debug!(target: "hub", consumer = %id, delivered, "Delivery task finished");
}
