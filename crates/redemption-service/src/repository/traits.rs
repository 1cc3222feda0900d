//! 仓储 Trait 定义

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Allocation, AllocationRequest, CampaignStats, CampaignTargeting, RedemptionEvent,
};

/// 活动仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignRepositoryTrait: Send + Sync {
    /// 读取定向信息，活动不存在返回 None
    async fn get_targeting(&self, campaign_id: Uuid) -> Result<Option<CampaignTargeting>>;

    /// 原子分配一个码并写入兑换事件
    ///
    /// 活动不存在返回 `CampaignNotFound`；任一条件不满足返回 `Forbidden`，不产生任何修改。
    async fn allocate(&self, request: &AllocationRequest) -> Result<Allocation>;

    /// 用户兑换历史，按时间倒序
    async fn list_user_redemptions(&self, user_id: Uuid, limit: i64)
    -> Result<Vec<RedemptionEvent>>;

    /// 活动兑换统计（总数及分国家计数）
    ///
    /// 活动不存在返回 `CampaignNotFound`；没有兑换时计数为 0
    async fn campaign_stats(&self, campaign_id: Uuid) -> Result<CampaignStats>;
}
