use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flux_config::DetectionPatch;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{InferenceError, Result};
use crate::service::{AdminResponse, DetectRequest, DetectResponse, InferenceService};

#[derive(Serialize)]
struct DetectBody<'a> {
    frame_id: i64,
    image_format: &'a str,
    image_data: String,
}

#[derive(Serialize)]
struct ReloadBody<'a> {
    model_path: &'a str,
}

/// 基于 HTTP/JSON 的推理服务客户端
///
/// - `POST {endpoint}/v1/detect`
/// - `POST {endpoint}/v1/params`
/// - `POST {endpoint}/v1/model/reload`
pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInferenceClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.endpoint, path);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl InferenceService for HttpInferenceClient {
    async fn detect(&self, request: &DetectRequest) -> Result<DetectResponse> {
        let body = DetectBody {
            frame_id: request.frame_id,
            image_format: request.image_format,
            image_data: STANDARD.encode(&request.image_data),
        };
        self.post("/v1/detect", &body).await
    }

    async fn update_params(&self, params: &DetectionPatch) -> Result<AdminResponse> {
        debug!(target: "dispatch", ?params, "Forwarding params to inference service");
        self.post("/v1/params", params).await
    }

    async fn reload_model(&self, model_path: &str) -> Result<AdminResponse> {
        self.post("/v1/model/reload", &ReloadBody { model_path }).await
    }

    fn name(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use bytes::Bytes;
    use serde_json::{json, Value};

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_detect_round_trip() {
        let app = Router::new().route(
            "/v1/detect",
            post(|Json(body): Json<Value>| async move {
                // 图像以 Base64 传输
                assert_eq!(body["image_data"], "/9j/2Q==");
                assert_eq!(body["image_format"], "jpeg");
                Json(json!({
                    "frame_id": body["frame_id"],
                    "inference_time_ms": 12,
                    "results": [{
                        "id": 1,
                        "bbox": {"x1": 10.0, "y1": 20.0, "x2": 30.0, "y2": 40.0},
                        "class_id": 0,
                        "class_name": "pig",
                        "confidence": 0.42,
                        "entropy": 0.8,
                        "is_uncertain": true
                    }]
                }))
            }),
        );
        let client = HttpInferenceClient::new(spawn_server(app).await).unwrap();

        let request = DetectRequest {
            frame_id: 7,
            image_data: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
            image_format: "jpeg",
        };
        let response = client.detect(&request).await.unwrap();

        assert_eq!(response.frame_id, 7);
        assert_eq!(response.inference_time_ms, 12);
        assert!(response.error.is_empty());
        assert_eq!(response.results.len(), 1);
        assert!(response.results[0].is_uncertain);
        assert_eq!(response.results[0].bbox.x2, 30.0);
    }

    #[tokio::test]
    async fn test_http_error_status_is_surfaced() {
        let app = Router::new().route(
            "/v1/model/reload",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "loading") }),
        );
        let client = HttpInferenceClient::new(spawn_server(app).await).unwrap();

        let err = client.reload_model("/models/best.pt").await.unwrap_err();
        assert!(matches!(err, InferenceError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_params_sends_only_present_fields() {
        let app = Router::new().route(
            "/v1/params",
            post(|Json(body): Json<Value>| async move {
                let fields = body.as_object().map(|o| o.len()).unwrap_or_default();
                Json(json!({"success": fields == 1, "message": "ok"}))
            }),
        );
        let client = HttpInferenceClient::new(spawn_server(app).await).unwrap();

        let patch = DetectionPatch {
            confidence_threshold: Some(0.6),
            ..Default::default()
        };
        let response = client.update_params(&patch).await.unwrap();
        assert!(response.success);
        assert!(!response.local_only);
    }
}
