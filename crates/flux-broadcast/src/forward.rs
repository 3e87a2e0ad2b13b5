use flux_types::{AlertMessage, DetectionResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::hub::BroadcastHub;
use crate::message::HubEvent;

/// 检测结果 -> "frame" 事件
pub async fn forward_results(
    mut results: mpsc::Receiver<DetectionResult>,
    hub: BroadcastHub,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = results.recv() => match result {
                Some(result) => result,
                None => break,
            },
        };

        match HubEvent::frame(&result) {
            Ok(event) => {
                hub.broadcast(event);
            }
            Err(e) => warn!(target: "hub", frame_id = result.frame_id, error = %e, "Failed to encode frame event"),
        }
    }
    debug!(target: "hub", "Frame forwarder stopped");
}

/// 报警 -> "alert" 事件
pub async fn forward_alerts(
    mut alerts: mpsc::Receiver<AlertMessage>,
    hub: BroadcastHub,
    cancel: CancellationToken,
) {
    loop {
        let alert = tokio::select! {
            _ = cancel.cancelled() => break,
            alert = alerts.recv() => match alert {
                Some(alert) => alert,
                None => break,
            },
        };

        match HubEvent::alert(&alert) {
            Ok(event) => {
                hub.broadcast(event);
            }
            Err(e) => warn!(target: "hub", alert_id = alert.id, error = %e, "Failed to encode alert event"),
        }
    }
    debug!(target: "hub", "Alert forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubSettings;
    use bytes::Bytes;
    use flux_types::{BBox, Frame};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_forwarders_tag_events() {
        let (hub, dispatcher) = BroadcastHub::new(HubSettings::default());
        let hub_task = tokio::spawn(dispatcher.run());
        let mut consumer = hub.register_consumer().await.unwrap();

        let cancel = CancellationToken::new();
        let (result_tx, result_rx) = mpsc::channel(4);
        let (alert_tx, alert_rx) = mpsc::channel(4);
        let frames = tokio::spawn(forward_results(result_rx, hub.clone(), cancel.clone()));
        let alerts = tokio::spawn(forward_alerts(alert_rx, hub.clone(), cancel.clone()));

        let frame = Arc::new(Frame::new(3, Bytes::from_static(b"jpeg"), 4, 4));
        result_tx.send(DetectionResult::new(frame, Vec::new(), 0)).await.unwrap();
        alert_tx
            .send(AlertMessage {
                id: 1,
                frame_id: 3,
                timestamp: 0,
                image_data: String::new(),
                x1: 0.0,
                y1: 0.0,
                x2: 1.0,
                y2: 1.0,
                class_name: "pig".to_string(),
                confidence: 0.5,
                entropy: 0.7,
                crop: BBox::default(),
            })
            .await
            .unwrap();

        let mut kinds = Vec::new();
        for _ in 0..2 {
            let payload = consumer.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
            kinds.push(value["type"].as_str().unwrap().to_string());
        }
        kinds.sort();
        assert_eq!(kinds, vec!["alert", "frame"]);

        cancel.cancel();
        frames.await.unwrap();
        alerts.await.unwrap();
        hub.shutdown();
        hub_task.await.unwrap();
    }
}
