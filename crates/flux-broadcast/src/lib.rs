// flux-broadcast: 多消费者广播中心
//
// 单个串行循环拥有消费者集合，只做三件事：接入、移除、扇出。
// 每个消费者有独立的有界队列和投递任务，队列满即视为无响应并被驱逐。

pub mod error;
pub mod forward;
pub mod hub;
pub mod message;
pub mod transport;
pub mod ws;

pub use error::{HubError, Result, TransportError};
pub use forward::{forward_alerts, forward_results};
pub use hub::{BroadcastHub, Consumer, HubDispatcher, HubSettings, HubStats};
pub use message::{DetectionData, EventKind, FrameMessage, HubEvent};
pub use transport::{serve_consumer, ConsumerTransport};
pub use ws::{serve_websocket, WsTransport};
