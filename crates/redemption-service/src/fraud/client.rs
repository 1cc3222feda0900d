//! 反欺诈服务 HTTP 客户端
//!
//! 单次请求有超时；非 2xx、响应体无法解析、网络错误都按可重试处理，重试次数由配置决定。

use std::time::Instant;

use async_trait::async_trait;
use promo_shared::config::FraudServiceConfig;
use promo_shared::error::InfraError;
use promo_shared::observability::metrics;
use promo_shared::retry::{RetryPolicy, retry_with_policy};
use reqwest::Client;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::dto::{FraudCheckRequest, FraudCheckResponse, FraudVerdict, parse_cache_until};

const SERVICE_NAME: &str = "antifraud";

/// 反欺诈查询接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FraudCheckClient: Send + Sync {
    /// 重试用尽仍无确定结果时返回错误，由调用方决定拒绝
    async fn check(&self, identity: &str, campaign_id: Uuid) -> Result<FraudVerdict, InfraError>;
}

/// 基于 reqwest 的实现
#[derive(Debug, Clone)]
pub struct HttpFraudClient {
    client: Client,
    base_url: String,
    retry_policy: RetryPolicy,
    utc_offset_hours: i32,
}

impl HttpFraudClient {
    pub fn new(config: &FraudServiceConfig) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| InfraError::Internal(format!("构建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry_policy: RetryPolicy::fixed(config.max_retries, config.retry_delay()),
            utc_offset_hours: config.cache_until_utc_offset_hours,
        })
    }

    async fn call_once(&self, request: &FraudCheckRequest) -> Result<FraudVerdict, InfraError> {
        let url = format!("{}/validate", self.base_url);
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let elapsed = start.elapsed().as_secs_f64();
                metrics::record_fraud_call_duration("transport_error", elapsed);
                map_transport_error(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            metrics::record_fraud_call_duration("http_error", start.elapsed().as_secs_f64());
            return Err(InfraError::external(SERVICE_NAME, format!("HTTP {}", status)));
        }

        let body: FraudCheckResponse = response.json().await.map_err(|e| {
            metrics::record_fraud_call_duration("malformed", start.elapsed().as_secs_f64());
            if e.is_timeout() {
                map_transport_error(e)
            } else {
                InfraError::external(SERVICE_NAME, format!("响应体无法解析: {}", e))
            }
        })?;
        metrics::record_fraud_call_duration("ok", start.elapsed().as_secs_f64());

        if !body.ok {
            return Ok(FraudVerdict::deny());
        }

        let cleared_until = match body.cache_until.as_deref() {
            Some(raw) => {
                let parsed = parse_cache_until(raw, self.utc_offset_hours);
                if parsed.is_none() {
                    warn!(cache_until = raw, "cache_until 无法解析，不缓存放行结果");
                }
                parsed
            }
            None => None,
        };

        Ok(FraudVerdict::allow(cleared_until))
    }
}

#[async_trait]
impl FraudCheckClient for HttpFraudClient {
    #[instrument(skip(self, identity), fields(campaign_id = %campaign_id))]
    async fn check(&self, identity: &str, campaign_id: Uuid) -> Result<FraudVerdict, InfraError> {
        let request = FraudCheckRequest {
            user_email: identity.to_string(),
            promo_id: campaign_id,
        };

        retry_with_policy(
            &self.retry_policy,
            "fraud_check",
            InfraError::is_retryable,
            || self.call_once(&request),
        )
        .await
    }
}

fn map_transport_error(e: reqwest::Error) -> InfraError {
    if e.is_timeout() {
        InfraError::ExternalServiceTimeout {
            service: SERVICE_NAME.to_string(),
        }
    } else {
        InfraError::external(SERVICE_NAME, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> FraudServiceConfig {
        FraudServiceConfig {
            base_url: server.uri(),
            timeout_seconds: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_allowed_with_cache_until() {
        let server = MockServer::start().await;
        let campaign_id = Uuid::now_v7();

        Mock::given(method("POST"))
            .and(path("/validate"))
            .and(body_json(json!({
                "user_email": "user@example.com",
                "promo_id": campaign_id,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "cache_until": "2030-01-01T03:00:00.000"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpFraudClient::new(&config_for(&server)).unwrap();
        let verdict = client.check("user@example.com", campaign_id).await.unwrap();

        assert!(verdict.allowed);
        // 默认按 UTC+3 解释
        assert_eq!(
            verdict.cleared_until.unwrap().to_rfc3339(),
            "2030-01-01T00:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_denied_is_definitive() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": false })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpFraudClient::new(&config_for(&server)).unwrap();
        let verdict = client.check("user@example.com", Uuid::nil()).await.unwrap();

        assert_eq!(verdict, FraudVerdict::deny());
    }

    #[tokio::test]
    async fn test_retries_once_after_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpFraudClient::new(&config_for(&server)).unwrap();
        let verdict = client.check("user@example.com", Uuid::nil()).await.unwrap();

        assert!(verdict.allowed);
        assert!(verdict.cleared_until.is_none());
    }

    #[tokio::test]
    async fn test_gives_up_after_second_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let client = HttpFraudClient::new(&config_for(&server)).unwrap();
        let err = client.check("user@example.com", Uuid::nil()).await.unwrap_err();

        assert_eq!(err.code(), "EXTERNAL_SERVICE_ERROR");
    }

    #[tokio::test]
    async fn test_malformed_body_is_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(2)
            .mount(&server)
            .await;

        let client = HttpFraudClient::new(&config_for(&server)).unwrap();
        assert!(client.check("user@example.com", Uuid::nil()).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": true }))
                    .set_delay(Duration::from_millis(1500)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let client = HttpFraudClient::new(&config_for(&server)).unwrap();
        let err = client.check("user@example.com", Uuid::nil()).await.unwrap_err();

        assert_eq!(err.code(), "EXTERNAL_SERVICE_TIMEOUT");
    }

    #[tokio::test]
    async fn test_unparseable_cache_until_still_allows() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "cache_until": "soon"
            })))
            .mount(&server)
            .await;

        let client = HttpFraudClient::new(&config_for(&server)).unwrap();
        let verdict = client.check("user@example.com", Uuid::nil()).await.unwrap();

        assert_eq!(verdict, FraudVerdict::allow(None));
    }
}
