//! 促销活动实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 活动发码模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignMode {
    /// 公共码 - 所有用户共享同一个码，受 max_redemptions 限制
    Common,
    /// 唯一码 - 每次兑换消耗码池中的一个码，容量即码池大小
    Unique,
}

impl CampaignMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Common => "COMMON",
            Self::Unique => "UNIQUE",
        }
    }
}

/// 促销活动
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: Uuid,
    /// 所属商家
    pub business_id: Uuid,
    #[sqlx(default)]
    pub description: Option<String>,
    #[sqlx(default)]
    pub image_url: Option<String>,
    pub mode: CampaignMode,
    /// COMMON 模式的兑换上限，UNIQUE 模式忽略
    pub max_redemptions: i32,
    /// 已兑换次数，只增不减
    pub used_count: i32,
    /// 是否可兑换，由分配器维护
    pub active: bool,
    /// 生效窗口 [active_from, active_until)
    pub active_from: DateTime<Utc>,
    pub active_until: DateTime<Utc>,
    /// 年龄范围（闭区间）
    pub age_from: i32,
    pub age_until: i32,
    /// 目标国家，空表示不限
    #[sqlx(default)]
    pub target_country: Option<String>,
    /// COMMON 模式的公共码
    #[sqlx(default)]
    pub common_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// 构造 COMMON 活动，默认不限年龄与国家
    pub fn new_common(
        business_id: Uuid,
        common_code: impl Into<String>,
        max_redemptions: i32,
        active_from: DateTime<Utc>,
        active_until: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            business_id,
            description: None,
            image_url: None,
            mode: CampaignMode::Common,
            max_redemptions,
            used_count: 0,
            active: true,
            active_from,
            active_until,
            age_from: 0,
            age_until: 150,
            target_country: None,
            common_code: Some(common_code.into()),
            created_at: Utc::now(),
        }
    }

    /// 构造 UNIQUE 活动，码池随活动一起写入
    pub fn new_unique(
        business_id: Uuid,
        active_from: DateTime<Utc>,
        active_until: DateTime<Utc>,
    ) -> Self {
        Self {
            mode: CampaignMode::Unique,
            max_redemptions: 0,
            common_code: None,
            ..Self::new_common(business_id, "", 0, active_from, active_until)
        }
    }

    pub fn with_age_range(mut self, age_from: i32, age_until: i32) -> Self {
        self.age_from = age_from;
        self.age_until = age_until;
        self
    }

    pub fn with_target_country(mut self, country: impl Into<String>) -> Self {
        self.target_country = Some(country.into());
        self
    }

    /// 提取定向信息
    pub fn targeting(&self) -> CampaignTargeting {
        CampaignTargeting {
            id: self.id,
            mode: self.mode,
            active: self.active,
            active_from: self.active_from,
            active_until: self.active_until,
            age_from: self.age_from,
            age_until: self.age_until,
            target_country: self.target_country.clone(),
        }
    }
}

/// 活动定向信息
///
/// 编排层在分配前读取，用于提前拒绝不符合条件的用户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CampaignTargeting {
    pub id: Uuid,
    pub mode: CampaignMode,
    pub active: bool,
    pub active_from: DateTime<Utc>,
    pub active_until: DateTime<Utc>,
    pub age_from: i32,
    pub age_until: i32,
    #[sqlx(default)]
    pub target_country: Option<String>,
}

impl CampaignTargeting {
    /// now 是否落在 [active_from, active_until) 内
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.active_from <= now && now < self.active_until
    }
}

/// UNIQUE 码池中的一个码
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UniqueCode {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub body: String,
    /// 只会从 false 变为 true 一次
    pub activated: bool,
    #[sqlx(default)]
    pub activated_at: Option<DateTime<Utc>>,
}
