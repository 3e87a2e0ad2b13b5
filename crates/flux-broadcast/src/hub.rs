use bytes::Bytes;
use flux_types::LogThrottle;
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HubError, Result};
use crate::message::HubEvent;

/// 广播中心参数
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// 广播入口队列容量
    pub event_capacity: usize,
    /// 每个消费者的出站队列容量
    pub consumer_capacity: usize,
    /// 单次发送超时
    pub send_timeout: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            consumer_capacity: 256,
            send_timeout: Duration::from_secs(10),
        }
    }
}

enum Command {
    Register {
        id: Uuid,
        tx: mpsc::Sender<Bytes>,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        id: Uuid,
        ack: oneshot::Sender<()>,
    },
}

#[derive(Debug, Default)]
struct HubShared {
    consumers: AtomicUsize,
    events_broadcast: AtomicU64,
    events_dropped: AtomicU64,
    evictions: AtomicU64,
    closed: AtomicBool,
}

/// 广播中心统计
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub consumers: usize,
    pub events_broadcast: u64,
    pub events_dropped: u64,
    pub evictions: u64,
}

/// 广播中心句柄，可克隆
#[derive(Clone)]
pub struct BroadcastHub {
    commands: mpsc::Sender<Command>,
    events: mpsc::Sender<HubEvent>,
    shared: Arc<HubShared>,
    settings: HubSettings,
    shutdown: CancellationToken,
    drop_log: Arc<LogThrottle>,
}

/// 已接入的消费者：出站队列的接收端
pub struct Consumer {
    id: Uuid,
    rx: mpsc::Receiver<Bytes>,
}

impl Consumer {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 队列关闭（被驱逐或中心关闭）后返回 `None`
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

/// 串行分发循环，独占消费者集合
pub struct HubDispatcher {
    commands: mpsc::Receiver<Command>,
    events: mpsc::Receiver<HubEvent>,
    consumers: HashMap<Uuid, mpsc::Sender<Bytes>>,
    shared: Arc<HubShared>,
    shutdown: CancellationToken,
}

impl BroadcastHub {
    pub fn new(settings: HubSettings) -> (Self, HubDispatcher) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(settings.event_capacity);
        let shared = Arc::new(HubShared::default());
        let shutdown = CancellationToken::new();

        let hub = Self {
            commands: command_tx,
            events: event_tx,
            shared: shared.clone(),
            settings,
            shutdown: shutdown.clone(),
            drop_log: Arc::new(LogThrottle::new(Duration::from_secs(5))),
        };
        let dispatcher = HubDispatcher {
            commands: command_rx,
            events: event_rx,
            consumers: HashMap::new(),
            shared,
            shutdown,
        };
        (hub, dispatcher)
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// 接入新消费者；返回时分发循环已登记
    pub async fn register_consumer(&self) -> Result<Consumer> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.settings.consumer_capacity);
        let (ack_tx, ack_rx) = oneshot::channel();

        self.commands
            .send(Command::Register { id, tx, ack: ack_tx })
            .await
            .map_err(|_| HubError::Closed)?;
        ack_rx.await.map_err(|_| HubError::Closed)?;

        Ok(Consumer { id, rx })
    }

    /// 移除消费者；已被驱逐或中心已关闭时无副作用
    pub async fn unregister_consumer(&self, id: Uuid) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Unregister { id, ack: ack_tx }).await.is_err() {
            debug!(target: "hub", consumer = %id, "Hub gone, unregister skipped");
            return;
        }
        let _ = ack_rx.await;
    }

    /// 非阻塞投递；入口队列满或中心已关闭时返回 false
    pub fn broadcast(&self, event: HubEvent) -> bool {
        if self.is_closed() {
            return false;
        }

        match self.events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let dropped = self.shared.events_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(suppressed) = self.drop_log.hit() {
                    warn!(target: "hub", kind = ?event.kind, dropped, suppressed, "Broadcast queue full, dropping event");
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.shared.consumers.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// 关闭所有消费者队列并停止分发循环，此后不再接受事件
    pub fn shutdown(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            info!(target: "hub", consumers = self.consumer_count(), "Shutting down broadcast hub");
        }
        self.shutdown.cancel();
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            consumers: self.consumer_count(),
            events_broadcast: self.shared.events_broadcast.load(Ordering::Relaxed),
            events_dropped: self.shared.events_dropped.load(Ordering::Relaxed),
            evictions: self.shared.evictions.load(Ordering::Relaxed),
        }
    }
}

impl HubDispatcher {
    pub async fn run(mut self) {
        info!(target: "hub", "Broadcast hub running");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(command) = self.commands.recv() => self.handle(command),
                event = self.events.recv() => match event {
                    Some(event) => self.fan_out(event),
                    None => break,
                },
            }
        }

        self.shared.closed.store(true, Ordering::Release);
        let closed = self.consumers.len();
        // 丢弃发送端即关闭每个消费者队列
        self.consumers.clear();
        self.update_count();
        info!(target: "hub", closed, "Broadcast hub stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { id, tx, ack } => {
                self.consumers.insert(id, tx);
                self.update_count();
                let _ = ack.send(());
                info!(target: "hub", consumer = %id, consumers = self.consumers.len(), "Consumer connected");
            }
            Command::Unregister { id, ack } => {
                if self.consumers.remove(&id).is_some() {
                    self.update_count();
                    info!(target: "hub", consumer = %id, consumers = self.consumers.len(), "Consumer disconnected");
                }
                let _ = ack.send(());
            }
        }
    }

    fn fan_out(&mut self, event: HubEvent) {
        self.shared.events_broadcast.fetch_add(1, Ordering::Relaxed);

        let mut evicted = 0usize;
        self.consumers.retain(|id, tx| match tx.try_send(event.payload.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(target: "hub", consumer = %id, "Consumer queue full, evicting");
                evicted += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(target: "hub", consumer = %id, "Consumer queue closed, removing");
                false
            }
        });

        if evicted > 0 {
            self.shared.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            counter!("flux_hub_evictions_total", evicted as u64);
        }
        self.update_count();
    }

    fn update_count(&self) {
        self.shared.consumers.store(self.consumers.len(), Ordering::Release);
        gauge!("flux_hub_consumers", self.consumers.len() as f64);
    }
}
