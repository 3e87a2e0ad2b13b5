use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{check_range_u64, ConfigError, Result};
use crate::runtime::{DetectionConfig, FilterConfig, RuntimeConfig, TrainingConfig, VideoConfig};

/// 进程配置（启动时加载，运行期不可变部分 + 运行时分区的初始值）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub pipeline: PipelineConfig,
    pub decoder: DecoderConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,

    pub video: VideoConfig,
    pub detection: DetectionConfig,
    pub filter: FilterConfig,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// 外部推理服务
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// 服务地址，例如 `http://localhost:50051`；为空表示未连接
    pub endpoint: Option<String>,
    pub workers: usize,
    pub detect_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub params_timeout_ms: u64,
    pub reload_timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            workers: 4,
            detect_timeout_ms: 5_000,
            max_attempts: 3,
            retry_backoff_ms: 100,
            params_timeout_ms: 5_000,
            reload_timeout_ms: 60_000,
        }
    }
}

impl InferenceConfig {
    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn params_timeout(&self) -> Duration {
        Duration::from_millis(self.params_timeout_ms)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_timeout_ms)
    }
}

/// 队列容量
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub frame_queue_capacity: usize,
    pub result_queue_capacity: usize,
    pub alert_queue_capacity: usize,
    pub hub_event_capacity: usize,
    pub consumer_queue_capacity: usize,
    pub send_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: 30,
            result_queue_capacity: 30,
            alert_queue_capacity: 100,
            hub_event_capacity: 256,
            consumer_queue_capacity: 256,
            send_timeout_ms: 10_000,
        }
    }
}

/// 解码子进程参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub program: String,
    pub width: u32,
    pub height: u32,
    /// mjpeg `-q:v`，2（最好）到 31（最差）
    pub jpeg_quality: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            width: 1280,
            height: 720,
            jpeg_quality: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 监听地址，例如 `0.0.0.0:9100`
    pub listen: Option<String>,
}

impl AppConfig {
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            video: self.video.clone(),
            detection: self.detection.clone(),
            filter: self.filter.clone(),
            training: self.training.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.runtime().validate()?;

        check_range_u64("inference.workers", self.inference.workers as u64, 1, 64, "1..=64")?;
        check_range_u64("inference.max_attempts", self.inference.max_attempts as u64, 1, 10, "1..=10")?;
        if self.inference.detect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "inference.detect_timeout_ms",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let capacities = [
            ("pipeline.frame_queue_capacity", self.pipeline.frame_queue_capacity),
            ("pipeline.result_queue_capacity", self.pipeline.result_queue_capacity),
            ("pipeline.alert_queue_capacity", self.pipeline.alert_queue_capacity),
            ("pipeline.hub_event_capacity", self.pipeline.hub_event_capacity),
            ("pipeline.consumer_queue_capacity", self.pipeline.consumer_queue_capacity),
        ];
        for (field, value) in capacities {
            check_range_u64(field, value as u64, 1, 65_536, "1..=65536")?;
        }

        check_range_u64("decoder.jpeg_quality", self.decoder.jpeg_quality as u64, 2, 31, "2..=31")?;
        check_range_u64("decoder.width", self.decoder.width as u64, 16, 7680, "16..=7680")?;
        check_range_u64("decoder.height", self.decoder.height as u64, 16, 4320, "16..=4320")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_app_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.frame_queue_capacity, 30);
        assert_eq!(config.inference.workers, 4);
        assert!(config.inference.endpoint.is_none());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.alert_queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
