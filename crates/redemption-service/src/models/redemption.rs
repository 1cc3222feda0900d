//! 兑换记录与分配请求

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::campaign::CampaignMode;

/// 兑换事件
///
/// 只追加，分配成功时在同一原子单元内写入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub campaign_id: Uuid,
    /// 发放的码（冗余存储，不可变）
    pub code: String,
    /// 兑换时用户所在国家（大写），用于活动统计
    #[sqlx(default)]
    pub country: Option<String>,
    pub redeemed_at: DateTime<Utc>,
}

impl RedemptionEvent {
    /// 为一次成功的分配生成事件
    pub fn issue(request: &AllocationRequest, code: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            campaign_id: request.campaign_id,
            code,
            country: request.normalized_country(),
            redeemed_at: request.now,
        }
    }
}

/// 分配请求
///
/// 分配器在原子单元内重新校验全部条件，now 由调用方给出
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    pub age: i32,
    pub country: Option<String>,
    pub now: DateTime<Utc>,
}

impl AllocationRequest {
    /// 去空白并转大写，空串视为未知
    pub fn normalized_country(&self) -> Option<String> {
        self.country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_ascii_uppercase)
    }
}

/// 分配结果
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub mode: CampaignMode,
    pub event: RedemptionEvent,
}

impl Allocation {
    pub fn code(&self) -> &str {
        &self.event.code
    }

    pub fn into_code(self) -> String {
        self.event.code
    }
}

/// 某个国家的兑换次数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CountryActivations {
    /// 未知国家为 None
    pub country: Option<String>,
    pub count: i64,
}

/// 活动兑换统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    pub campaign_id: Uuid,
    pub activations_count: i64,
    /// 按次数降序，次数相同按国家升序，未知国家排最后
    pub by_country: Vec<CountryActivations>,
}

impl CampaignStats {
    /// 由分国家计数汇总，并统一排序
    pub fn from_country_counts(
        campaign_id: Uuid,
        mut by_country: Vec<CountryActivations>,
    ) -> Self {
        by_country.sort_by(|a, b| {
            b.count.cmp(&a.count).then_with(|| match (&a.country, &b.country) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
        });

        Self {
            campaign_id,
            activations_count: by_country.iter().map(|c| c.count).sum(),
            by_country,
        }
    }
}
