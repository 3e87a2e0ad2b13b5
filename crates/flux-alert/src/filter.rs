use base64::{engine::general_purpose::STANDARD, Engine as _};
use flux_config::ConfigStore;
use flux_types::{AlertMessage, BBox, Detection, DetectionResult};
use metrics::counter;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crop::{crop_jpeg, crop_region};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(10);
const CROP_JPEG_QUALITY: u8 = 85;

/// 时间窗口内仍然有效的报警
#[derive(Debug, Clone)]
pub struct ActiveAlert {
    pub detection_id: i32,
    pub center: (f32, f32),
    pub bbox: BBox,
    pub created_at: Instant,
}

impl ActiveAlert {
    fn is_live(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.created_at) < window
    }
}

#[derive(Debug, Default)]
struct FilterState {
    active: Vec<ActiveAlert>,
    admitted: u64,
    suppressed: u64,
    purged: u64,
}

impl FilterState {
    fn purge(&mut self, now: Instant, window: Duration) -> usize {
        let before = self.active.len();
        self.active.retain(|a| a.is_live(now, window));
        let purged = before - self.active.len();
        self.purged += purged as u64;
        purged
    }
}

/// 报警过滤器统计
#[derive(Debug, Clone, Serialize)]
pub struct AlertFilterStats {
    pub active_alerts_count: usize,
    pub admitted: u64,
    pub suppressed: u64,
    pub purged: u64,
    pub spatial_iou_threshold: f32,
    pub time_window_seconds: u64,
    pub enable_alert_push: bool,
}

/// 报警过滤器（空间 + 时间抑制）
///
/// 所有状态修改都在同一把写锁下完成；阈值每次从配置中读取，修改立即生效。
pub struct AlertFilter {
    config: Arc<ConfigStore>,
    state: RwLock<FilterState>,
}

impl AlertFilter {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            state: RwLock::new(FilterState::default()),
        }
    }

    /// 判断检测是否应当报警；返回 true 时已登记为活跃报警
    pub fn should_alert(&self, detection: &Detection) -> bool {
        let filter = self.config.filter();
        if !filter.enable_alert_push || !detection.is_uncertain {
            return false;
        }

        let now = Instant::now();
        let window = filter.time_window();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.purge(now, window);

        let overlap = state
            .active
            .iter()
            .map(|a| detection.bbox.iou(&a.bbox))
            .find(|iou| *iou > filter.spatial_iou_threshold);
        if let Some(iou) = overlap {
            state.suppressed += 1;
            counter!("flux_alerts_suppressed_total", 1);
            debug!(
                target: "alert_filter",
                detection_id = detection.id,
                iou,
                threshold = filter.spatial_iou_threshold,
                "Alert suppressed"
            );
            return false;
        }

        let center = detection.bbox.center();
        state.active.push(ActiveAlert {
            detection_id: detection.id,
            center,
            bbox: detection.bbox,
            created_at: now,
        });
        state.admitted += 1;
        counter!("flux_alerts_admitted_total", 1);
        info!(
            target: "alert_filter",
            detection_id = detection.id,
            center_x = center.0,
            center_y = center.1,
            active = state.active.len(),
            "Alert admitted"
        );
        true
    }

    /// 对一帧结果做抑制，返回新报警（含截图）
    ///
    /// JPEG 解码与重编码在锁外进行。
    pub fn process_results(&self, result: &DetectionResult) -> Vec<AlertMessage> {
        let admitted: Vec<&Detection> = result.uncertain().filter(|d| self.should_alert(d)).collect();
        if admitted.is_empty() {
            return Vec::new();
        }

        let frame = &result.frame;
        let timestamp = chrono::Utc::now().timestamp_millis();

        admitted
            .into_iter()
            .map(|detection| {
                let crop = crop_region(&detection.bbox, frame.width, frame.height);
                let image_data = match crop_jpeg(&frame.data, &crop, CROP_JPEG_QUALITY) {
                    Ok(jpeg) => STANDARD.encode(jpeg),
                    Err(e) => {
                        warn!(target: "alert_filter", frame_id = result.frame_id, error = %e, "Failed to crop alert image");
                        String::new()
                    }
                };

                AlertMessage {
                    id: detection.id,
                    frame_id: result.frame_id,
                    timestamp,
                    image_data,
                    x1: detection.bbox.x1,
                    y1: detection.bbox.y1,
                    x2: detection.bbox.x2,
                    y2: detection.bbox.y2,
                    class_name: detection.class_name.clone(),
                    confidence: detection.confidence,
                    entropy: detection.entropy,
                    crop,
                }
            })
            .collect()
    }

    /// 清理过期报警，返回清理数量
    pub fn cleanup_expired(&self) -> usize {
        let window = self.config.filter().time_window();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let before = state.active.len();
        let purged = state.purge(Instant::now(), window);
        if purged > 0 {
            debug!(target: "alert_filter", before, after = state.active.len(), "Expired alerts purged");
        }
        purged
    }

    /// 后台定期清理（空闲时也能回收内存）
    pub fn spawn_cleanup(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let filter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + CLEANUP_INTERVAL, CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        filter.cleanup_expired();
                    }
                }
            }
            debug!(target: "alert_filter", "Cleanup task stopped");
        })
    }

    pub fn active_count(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).active.len()
    }

    pub fn stats(&self) -> AlertFilterStats {
        let filter = self.config.filter();
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        AlertFilterStats {
            active_alerts_count: state.active.len(),
            admitted: state.admitted,
            suppressed: state.suppressed,
            purged: state.purged,
            spatial_iou_threshold: filter.spatial_iou_threshold,
            time_window_seconds: filter.time_window_seconds,
            enable_alert_push: filter.enable_alert_push,
        }
    }
}
