#![cfg(unix)]

use async_trait::async_trait;
use flux_analytics::{ControlPlane, Feedback, MemorySampleStore, NewSample, PipelineBuilder, SampleStore, TrainingState};
use flux_broadcast::Consumer;
use flux_capture::{DecoderLauncher, SourceSpec};
use flux_config::{AppConfig, DetectionPatch, SourceType, VideoConfig};
use flux_inference::{AdminResponse, DetectRequest, DetectResponse, InferenceService};
use flux_types::{BBox, Detection};
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

const THREE_FRAMES_THEN_HANG: &str =
    r"printf '\377\330one\377\331\377\330two\377\331\377\330three\377\331'; exec sleep 30";

struct ShellLauncher {
    script: String,
}

impl DecoderLauncher for ShellLauncher {
    fn program(&self) -> &str {
        "sh"
    }

    fn command(&self, _spec: &SourceSpec) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// 每帧返回同一位置的不确定目标
#[derive(Default)]
struct FixedService {
    reloads: AtomicU32,
    params: AtomicU32,
}

#[async_trait]
impl InferenceService for FixedService {
    async fn detect(&self, request: &DetectRequest) -> flux_inference::Result<DetectResponse> {
        Ok(DetectResponse {
            frame_id: request.frame_id,
            results: vec![Detection {
                id: 1,
                bbox: BBox::new(100.0, 100.0, 200.0, 200.0),
                class_id: 0,
                class_name: "pig".to_string(),
                confidence: 0.41,
                entropy: 0.92,
                is_uncertain: true,
            }],
            inference_time_ms: 3,
            error: String::new(),
        })
    }

    async fn update_params(&self, _params: &DetectionPatch) -> flux_inference::Result<AdminResponse> {
        self.params.fetch_add(1, Ordering::SeqCst);
        Ok(AdminResponse {
            success: true,
            message: "params updated".to_string(),
            local_only: false,
        })
    }

    async fn reload_model(&self, _model_path: &str) -> flux_inference::Result<AdminResponse> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(AdminResponse {
            success: true,
            message: "model reloaded".to_string(),
            local_only: false,
        })
    }
}

fn local_source() -> VideoConfig {
    VideoConfig {
        source_type: SourceType::Local,
        local_path: "/data/videos/pen-3.mp4".to_string(),
        fps: 5,
        ..Default::default()
    }
}

async fn next_event(consumer: &mut Consumer) -> Value {
    let payload = tokio::time::timeout(Duration::from_secs(10), consumer.recv())
        .await
        .expect("timed out waiting for event")
        .expect("consumer closed");
    serde_json::from_slice(&payload).unwrap()
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_frames_and_deduplicated_alert_reach_consumer() {
    let service = Arc::new(FixedService::default());
    let samples = Arc::new(MemorySampleStore::new());
    let pipeline = PipelineBuilder::new(AppConfig::default())
        .with_service(service.clone())
        .with_launcher(Arc::new(ShellLauncher {
            script: THREE_FRAMES_THEN_HANG.to_string(),
        }))
        .with_sample_store(samples.clone())
        .start()
        .await
        .unwrap();
    let control = ControlPlane::new(Arc::new(pipeline));
    assert!(!control.pipeline().source().is_open());

    let mut consumer = control.pipeline().hub().register_consumer().await.unwrap();

    // 配置视频源后帧开始流动
    let outcome = control.update_video(local_source()).await.unwrap();
    assert!(outcome.restarted);

    let mut frames = Vec::new();
    let mut alerts = Vec::new();
    while frames.len() < 3 || alerts.is_empty() {
        let event = next_event(&mut consumer).await;
        match event["type"].as_str() {
            Some("frame") => frames.push(event["data"]["frame_id"].as_i64().unwrap()),
            Some("alert") => alerts.push(event["data"].clone()),
            other => panic!("unexpected event type {:?}", other),
        }
    }

    frames.sort_unstable();
    assert_eq!(frames, vec![1, 2, 3]);
    // 同一位置的三次检测只报警一次
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["class_name"], "pig");
    assert_eq!(alerts[0]["x1"], 100.0);

    // 报警过滤与帧广播并行，等待其处理完剩余结果
    wait_until(|| {
        let suppressed = control.pipeline().filter().stats().suppressed;
        async move { suppressed == 2 }
    })
    .await;

    let status = control.system_status();
    assert_eq!(status.capture.total_read, 3);
    assert_eq!(status.filter.admitted, 1);
    assert_eq!(status.pipeline.samples_saved, 1);
    assert_eq!(status.hub.consumers, 1);

    let pending = control.pending_samples(None).await.unwrap();
    assert_eq!(pending.len(), 1);

    let outcome = control
        .submit_feedback(Feedback {
            sample_id: pending[0].id,
            label_status: "abnormal".to_string(),
            labeled_by: "tester".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(outcome.labeled_samples_count, 1);
    assert!(outcome.training.is_none());
    assert!(control.pending_samples(None).await.unwrap().is_empty());

    let update = control
        .update_detection(DetectionPatch {
            confidence_threshold: Some(0.6),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!update.remote.local_only);
    assert_eq!(service.params.load(Ordering::SeqCst), 1);

    control.pipeline().shutdown().await;
    assert!(!control.pipeline().source().is_open());
    // 关闭后消费者队列在排空后结束
    while consumer.recv().await.is_some() {}
}

#[tokio::test]
async fn test_passthrough_broadcasts_frames_without_alerts() {
    let mut app = AppConfig::default();
    app.video = local_source();
    let pipeline = PipelineBuilder::new(app)
        .with_launcher(Arc::new(ShellLauncher {
            script: THREE_FRAMES_THEN_HANG.to_string(),
        }))
        .start()
        .await
        .unwrap();
    let control = ControlPlane::new(Arc::new(pipeline));
    assert!(!control.pipeline().dispatcher().is_connected());

    let mut consumer = control.pipeline().hub().register_consumer().await.unwrap();
    // 注册前可能已有帧被广播，这里只按帧数等待直到读满
    wait_until(|| {
        let total = control.pipeline().source().stats().total_read;
        async move { total == 3 }
    })
    .await;
    wait_until(|| {
        let routed = control.pipeline().stats().results_routed;
        async move { routed == 3 }
    })
    .await;

    while let Ok(Some(payload)) = tokio::time::timeout(Duration::from_millis(300), consumer.recv()).await {
        let event: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(event["type"], "frame");
        assert!(event["data"]["detections"].as_array().unwrap().is_empty());
    }

    let status = control.system_status();
    assert_eq!(status.pipeline.alerts_generated, 0);
    assert_eq!(status.filter.active_alerts_count, 0);

    // 无推理服务时参数只在本地生效
    let update = control
        .update_detection(DetectionPatch {
            entropy_threshold: Some(0.3),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(update.remote.local_only);
    assert_eq!(control.detection().entropy_threshold, 0.3);

    control.pipeline().shutdown().await;
}

#[tokio::test]
async fn test_feedback_at_threshold_triggers_training_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("train.sh");
    std::fs::write(&script, "exit 0\n").unwrap();

    let mut app = AppConfig::default();
    app.training.trigger_threshold = 50;
    app.training.interpreter = "sh".to_string();
    app.training.training_script_path = script.to_string_lossy().into_owned();

    let service = Arc::new(FixedService::default());
    let samples = Arc::new(MemorySampleStore::new());
    let mut ids = Vec::new();
    for frame_id in 0..50 {
        let sample = samples
            .create_sample(NewSample {
                frame_id,
                image_data: String::new(),
                bbox_x1: 0.0,
                bbox_y1: 0.0,
                bbox_x2: 10.0,
                bbox_y2: 10.0,
                class_name: "pig".to_string(),
                confidence: 0.4,
                entropy: 0.9,
            })
            .await
            .unwrap();
        ids.push(sample.id);
    }
    for id in &ids[..49] {
        samples
            .label_sample(*id, flux_analytics::LabelStatus::Normal, "tester")
            .await
            .unwrap();
    }

    let pipeline = PipelineBuilder::new(app)
        .with_service(service.clone())
        .with_sample_store(samples.clone())
        .start()
        .await
        .unwrap();
    let control = ControlPlane::new(Arc::new(pipeline));

    let status = control.training_status().await.unwrap();
    assert_eq!(status.labeled_samples_count, 49);
    assert!(!status.can_train);

    let outcome = control
        .submit_feedback(Feedback {
            sample_id: ids[49],
            label_status: "normal".to_string(),
            labeled_by: "tester".to_string(),
        })
        .await
        .unwrap();
    let run = outcome.training.expect("training should start at threshold");
    assert_eq!(run.sample_count, 50);

    wait_until(|| {
        let service = service.clone();
        async move { service.reloads.load(Ordering::SeqCst) == 1 }
    })
    .await;

    let status = control.training_status().await.unwrap();
    assert_eq!(status.running, None);
    assert_eq!(status.labeled_samples_count, 0);
    let latest = status.latest_training.unwrap();
    assert_eq!(latest.id, run.training_id);
    assert_eq!(latest.status, TrainingState::Completed);

    control.pipeline().shutdown().await;
}

#[tokio::test]
async fn test_resubmitting_config_restarts_ended_stream() {
    let pipeline = PipelineBuilder::new(AppConfig::default())
        .with_launcher(Arc::new(ShellLauncher {
            script: r"printf '\377\330one\377\331'".to_string(),
        }))
        .start()
        .await
        .unwrap();
    let control = ControlPlane::new(Arc::new(pipeline));

    assert!(control.update_video(local_source()).await.unwrap().restarted);
    wait_until(|| {
        let ended = control.pipeline().source().stream_ended();
        async move { ended }
    })
    .await;
    assert_eq!(control.pipeline().source().stats().total_read, 1);

    // 配置不变，但流已结束，重新提交即重启
    let outcome = control.update_video(local_source()).await.unwrap();
    assert!(outcome.restarted);
    assert_eq!(control.pipeline().source().stats().restarts, 2);
    wait_until(|| {
        let total = control.pipeline().source().stats().total_read;
        async move { total == 2 }
    })
    .await;

    control.pipeline().shutdown().await;
}
