//! 活动仓储（内存实现）
//!
//! 与 PostgreSQL 实现保持相同语义，用于测试和本地运行：
//! - COMMON：每个活动一把互斥锁，条件校验与计数在同一临界区内完成
//! - UNIQUE：每个码一个原子标记，`compare_exchange` 领取，被抢占的码直接跳过

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::traits::CampaignRepositoryTrait;
use crate::eligibility;
use crate::error::{ForbiddenReason, RedemptionError, Result};
use crate::models::{
    Allocation, AllocationRequest, Campaign, CampaignMode, CampaignStats, CampaignTargeting,
    CountryActivations, RedemptionEvent, UniqueCode,
};

struct PooledCode {
    id: Uuid,
    body: String,
    activated: AtomicBool,
    activated_at: Mutex<Option<DateTime<Utc>>>,
}

struct CampaignEntry {
    header: Mutex<Campaign>,
    pool: Vec<PooledCode>,
    /// 未领取的码数量
    remaining: AtomicUsize,
}

/// 内存活动仓储
#[derive(Default)]
pub struct InMemoryCampaignRepository {
    campaigns: DashMap<Uuid, Arc<CampaignEntry>>,
    events: RwLock<Vec<RedemptionEvent>>,
}

impl InMemoryCampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入活动及其码池
    ///
    /// COMMON 必须有公共码且码池为空；UNIQUE 必须码池非空且没有公共码
    pub fn insert_campaign(&self, campaign: Campaign, unique_codes: Vec<String>) -> Result<()> {
        match campaign.mode {
            CampaignMode::Common if campaign.common_code.is_none() || !unique_codes.is_empty() => {
                return Err(RedemptionError::InvalidCampaign(format!(
                    "COMMON 活动必须只配置公共码: {}",
                    campaign.id
                )));
            }
            CampaignMode::Unique if campaign.common_code.is_some() || unique_codes.is_empty() => {
                return Err(RedemptionError::InvalidCampaign(format!(
                    "UNIQUE 活动必须只配置码池: {}",
                    campaign.id
                )));
            }
            _ => {}
        }

        let pool: Vec<PooledCode> = unique_codes
            .into_iter()
            .map(|body| PooledCode {
                id: Uuid::now_v7(),
                body,
                activated: AtomicBool::new(false),
                activated_at: Mutex::new(None),
            })
            .collect();

        let id = campaign.id;
        let entry = CampaignEntry {
            remaining: AtomicUsize::new(pool.len()),
            header: Mutex::new(campaign),
            pool,
        };
        self.campaigns.insert(id, Arc::new(entry));

        Ok(())
    }

    /// 活动当前状态快照
    pub fn snapshot(&self, campaign_id: Uuid) -> Option<Campaign> {
        self.entry(campaign_id).map(|entry| entry.header.lock().clone())
    }

    /// 码池当前状态
    pub fn unique_codes(&self, campaign_id: Uuid) -> Vec<UniqueCode> {
        let Some(entry) = self.entry(campaign_id) else {
            return Vec::new();
        };

        entry
            .pool
            .iter()
            .map(|code| UniqueCode {
                id: code.id,
                campaign_id,
                body: code.body.clone(),
                activated: code.activated.load(Ordering::Acquire),
                activated_at: *code.activated_at.lock(),
            })
            .collect()
    }

    /// 全部兑换事件
    pub fn events(&self) -> Vec<RedemptionEvent> {
        self.events.read().clone()
    }

    fn entry(&self, campaign_id: Uuid) -> Option<Arc<CampaignEntry>> {
        self.campaigns.get(&campaign_id).map(|e| Arc::clone(e.value()))
    }

    // ==================== 私有方法 ====================

    fn claim_common_code(
        entry: &CampaignEntry,
        request: &AllocationRequest,
    ) -> Result<Option<String>> {
        let mut campaign = entry.header.lock();

        if !eligibility::is_allocatable(
            request.age,
            request.country.as_deref(),
            &campaign.targeting(),
            request.now,
        ) || campaign.used_count >= campaign.max_redemptions
        {
            return Ok(None);
        }

        let code = campaign.common_code.clone().ok_or_else(|| {
            RedemptionError::InvalidCampaign(format!(
                "COMMON 活动缺少公共码: {}",
                campaign.id
            ))
        })?;

        campaign.used_count += 1;
        if campaign.used_count >= campaign.max_redemptions {
            campaign.active = false;
        }

        Ok(Some(code))
    }

    fn claim_unique_code(entry: &CampaignEntry, request: &AllocationRequest) -> Option<String> {
        let targeting = entry.header.lock().targeting();
        if !eligibility::is_allocatable(
            request.age,
            request.country.as_deref(),
            &targeting,
            request.now,
        ) {
            return None;
        }

        let claimed = entry.pool.iter().find(|code| {
            !code.activated.load(Ordering::Acquire)
                && code
                    .activated
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
        })?;
        *claimed.activated_at.lock() = Some(request.now);

        let remaining = entry.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
        let mut campaign = entry.header.lock();
        campaign.used_count += 1;
        if remaining == 0 {
            campaign.active = false;
        }

        Some(claimed.body.clone())
    }
}

#[async_trait]
impl CampaignRepositoryTrait for InMemoryCampaignRepository {
    async fn get_targeting(&self, campaign_id: Uuid) -> Result<Option<CampaignTargeting>> {
        Ok(self.snapshot(campaign_id).map(|c| c.targeting()))
    }

    #[instrument(
        skip(self, request),
        fields(campaign_id = %request.campaign_id, user_id = %request.user_id)
    )]
    async fn allocate(&self, request: &AllocationRequest) -> Result<Allocation> {
        let entry = self
            .entry(request.campaign_id)
            .ok_or(RedemptionError::CampaignNotFound(request.campaign_id))?;
        let mode = entry.header.lock().mode;

        let code = match mode {
            CampaignMode::Common => Self::claim_common_code(&entry, request)?,
            CampaignMode::Unique => Self::claim_unique_code(&entry, request),
        };

        let Some(code) = code else {
            debug!(mode = mode.as_str(), "分配条件不满足");
            return Err(RedemptionError::Forbidden(ForbiddenReason::Unavailable));
        };

        let event = RedemptionEvent::issue(request, code);
        self.events.write().push(event.clone());

        info!(mode = mode.as_str(), event_id = %event.id, "码分配成功");

        Ok(Allocation { mode, event })
    }

    async fn list_user_redemptions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RedemptionEvent>> {
        let mut events: Vec<RedemptionEvent> = self
            .events
            .read()
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();

        events.sort_by(|a, b| b.redeemed_at.cmp(&a.redeemed_at).then(b.id.cmp(&a.id)));
        events.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(events)
    }

    async fn campaign_stats(&self, campaign_id: Uuid) -> Result<CampaignStats> {
        if self.entry(campaign_id).is_none() {
            return Err(RedemptionError::CampaignNotFound(campaign_id));
        }

        let mut counts: HashMap<Option<String>, i64> = HashMap::new();
        for event in self.events.read().iter().filter(|e| e.campaign_id == campaign_id) {
            *counts.entry(event.country.clone()).or_default() += 1;
        }

        let by_country = counts
            .into_iter()
            .map(|(country, count)| CountryActivations { country, count })
            .collect();

        Ok(CampaignStats::from_country_counts(campaign_id, by_country))
    }
}
