use flux_config::{ConfigStore, TrainingConfig};
use flux_inference::InferenceDispatcher;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ControlError, Result};
use crate::samples::{SampleStore, TrainingState};

/// 保留的 stderr 尾部长度
const ERROR_TAIL_BYTES: usize = 2048;

/// 训练结束事件
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    Completed { log_id: u64, model_output_path: String },
    Failed { log_id: u64, error: String },
}

/// 已启动的训练
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRun {
    pub training_id: u64,
    pub sample_count: u64,
}

/// 训练脚本启动器
///
/// 同一时间只允许一次训练，脚本在后台任务中运行，结束后通过事件通道通知。
pub struct TrainingLauncher {
    config: Arc<ConfigStore>,
    samples: Arc<dyn SampleStore>,
    events: mpsc::Sender<TrainingEvent>,
    current: Mutex<Option<u64>>,
    cancel: CancellationToken,
}

impl TrainingLauncher {
    pub fn new(
        config: Arc<ConfigStore>,
        samples: Arc<dyn SampleStore>,
        events: mpsc::Sender<TrainingEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            samples,
            events,
            current: Mutex::new(None),
            cancel,
        }
    }

    /// 正在运行的训练记录 ID
    pub async fn current_run(&self) -> Option<u64> {
        *self.current.lock().await
    }

    pub async fn trigger(self: &Arc<Self>) -> Result<TrainingRun> {
        let mut current = self.current.lock().await;
        if let Some(log_id) = *current {
            return Err(ControlError::TrainingInProgress(log_id));
        }

        let training = self.config.training();
        let sample_ids = self.samples.untrained_labeled().await?;
        let log = self
            .samples
            .create_training_log(sample_ids.len() as u64, &training.model_output_path)
            .await?;
        *current = Some(log.id);
        drop(current);

        info!(
            target: "training",
            log_id = log.id,
            samples = sample_ids.len(),
            script = %training.training_script_path,
            "Starting training run"
        );

        let launcher = self.clone();
        let log_id = log.id;
        tokio::spawn(async move { launcher.run(log_id, training, sample_ids).await });

        Ok(TrainingRun {
            training_id: log.id,
            sample_count: log.sample_count,
        })
    }

    async fn run(self: Arc<Self>, log_id: u64, training: TrainingConfig, sample_ids: Vec<u64>) {
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err("training cancelled by shutdown".to_string()),
            outcome = run_script(&training) => outcome,
        };

        let event = match outcome {
            Ok(()) => {
                info!(target: "training", log_id, "Training completed");
                if let Err(e) = self
                    .samples
                    .finish_training_log(log_id, TrainingState::Completed, &training.model_output_path, "")
                    .await
                {
                    warn!(target: "training", log_id, error = %e, "Failed to update training log");
                }
                if let Err(e) = self.samples.mark_trained(&sample_ids).await {
                    warn!(target: "training", log_id, error = %e, "Failed to mark samples as trained");
                }
                TrainingEvent::Completed {
                    log_id,
                    model_output_path: training.model_output_path.clone(),
                }
            }
            Err(error) => {
                error!(target: "training", log_id, error = %error, "Training failed");
                if let Err(e) = self
                    .samples
                    .finish_training_log(log_id, TrainingState::Failed, "", &error)
                    .await
                {
                    warn!(target: "training", log_id, error = %e, "Failed to update training log");
                }
                TrainingEvent::Failed { log_id, error }
            }
        };

        *self.current.lock().await = None;
        if self.events.send(event).await.is_err() {
            debug!(target: "training", log_id, "No listener for training events");
        }
    }
}

async fn run_script(training: &TrainingConfig) -> std::result::Result<(), String> {
    let output = Command::new(&training.interpreter)
        .arg(&training.training_script_path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("failed to spawn {}: {}", training.interpreter, e))?;

    debug!(target: "training", stdout_bytes = output.stdout.len(), "Training script exited");
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let start = stderr
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| stderr.len() - i <= ERROR_TAIL_BYTES)
        .unwrap_or(stderr.len());
    Err(format!("{}: {}", output.status, &stderr[start..]))
}

/// 训练完成后通知推理服务重载模型
pub async fn model_reload_loop(
    mut events: mpsc::Receiver<TrainingEvent>,
    dispatcher: Arc<InferenceDispatcher>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            TrainingEvent::Completed { log_id, .. } => match dispatcher.reload_remote_model("").await {
                Ok(resp) if resp.success => {
                    info!(target: "training", log_id, message = %resp.message, "Model reloaded")
                }
                Ok(resp) => {
                    warn!(target: "training", log_id, message = %resp.message, local_only = resp.local_only, "Model reload not applied")
                }
                Err(e) => warn!(target: "training", log_id, error = %e, "Model reload failed"),
            },
            TrainingEvent::Failed { log_id, .. } => {
                debug!(target: "training", log_id, "Training failed, keeping current model");
            }
        }
    }
    debug!(target: "training", "Model reload loop stopped");
}
