//! 反欺诈服务请求与响应

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `POST /validate` 请求体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudCheckRequest {
    pub user_email: String,
    pub promo_id: Uuid,
}

/// `POST /validate` 成功响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudCheckResponse {
    pub ok: bool,
    #[serde(default)]
    pub cache_until: Option<String>,
}

/// 反欺诈判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FraudVerdict {
    pub allowed: bool,
    /// 放行结果可缓存到该时刻
    pub cleared_until: Option<DateTime<Utc>>,
}

impl FraudVerdict {
    pub fn allow(cleared_until: Option<DateTime<Utc>>) -> Self {
        Self {
            allowed: true,
            cleared_until,
        }
    }

    pub fn deny() -> Self {
        Self {
            allowed: false,
            cleared_until: None,
        }
    }
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// 解析 `cache_until`
///
/// 带时区的 RFC 3339 直接使用；不带时区的按 `utc_offset_hours` 解释。无法解析返回 None。
pub fn parse_cache_until(raw: &str, utc_offset_hours: i32) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    let offset = FixedOffset::east_opt(utc_offset_hours.checked_mul(3600)?)?;
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|local| local.with_timezone(&Utc))
}
