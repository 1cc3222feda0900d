//! 活动仓储（PostgreSQL）
//!
//! 分配在单个事务内完成：
//! - COMMON：带条件的 `UPDATE ... RETURNING`，计数与 active 同一语句更新
//! - UNIQUE：`FOR UPDATE OF u SKIP LOCKED` 领取一行，并发领取者互不等待
//!
//! 任一步失败事务回滚，活动计数、码池和 active 保持原状。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::traits::CampaignRepositoryTrait;
use crate::error::{ForbiddenReason, RedemptionError, Result};
use crate::models::{
    Allocation, AllocationRequest, CampaignMode, CampaignStats, CampaignTargeting,
    CountryActivations, RedemptionEvent,
};

/// 国家匹配条件：目标国家为空视为不限，比较忽略大小写
const COUNTRY_MATCH: &str = "(NULLIF(btrim(c.target_country), '') IS NULL \
     OR upper(btrim(c.target_country)) = upper(btrim($4)))";

/// 活动仓储
pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 事务内操作 ====================

    /// 在事务中查询活动模式
    pub async fn get_mode_in_tx(
        tx: &mut PgConnection,
        campaign_id: Uuid,
    ) -> Result<Option<CampaignMode>> {
        let mode = sqlx::query_scalar::<_, CampaignMode>(
            r#"
            SELECT mode FROM campaigns WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(tx)
        .await?;

        Ok(mode)
    }

    /// 在事务中领取 COMMON 码
    ///
    /// 条件全部满足时计数 +1，达到上限同时置 active = false；否则返回 None
    pub async fn claim_common_code_in_tx(
        tx: &mut PgConnection,
        request: &AllocationRequest,
    ) -> Result<Option<String>> {
        let sql = format!(
            r#"
            UPDATE campaigns c
            SET used_count = c.used_count + 1,
                active = CASE
                    WHEN c.used_count + 1 >= c.max_redemptions THEN false
                    ELSE c.active
                END,
                updated_at = $2
            WHERE c.id = $1
              AND c.mode = 'COMMON'
              AND c.active
              AND c.active_from <= $2
              AND c.active_until > $2
              AND c.age_from <= $3
              AND c.age_until >= $3
              AND {COUNTRY_MATCH}
              AND c.used_count < c.max_redemptions
            RETURNING c.common_code
            "#
        );

        let code = sqlx::query_scalar::<_, Option<String>>(&sql)
            .bind(request.campaign_id)
            .bind(request.now)
            .bind(request.age)
            .bind(request.country.as_deref())
            .fetch_optional(tx)
            .await?;

        match code {
            Some(Some(code)) => Ok(Some(code)),
            Some(None) => Err(RedemptionError::InvalidCampaign(format!(
                "COMMON 活动缺少公共码: {}",
                request.campaign_id
            ))),
            None => Ok(None),
        }
    }

    /// 在事务中领取一个 UNIQUE 码
    ///
    /// 被其他事务锁定的行直接跳过；领取成功后更新活动计数，码池耗尽时置 active = false
    pub async fn claim_unique_code_in_tx(
        tx: &mut PgConnection,
        request: &AllocationRequest,
    ) -> Result<Option<String>> {
        let sql = format!(
            r#"
            SELECT u.id, u.body
            FROM campaign_unique_codes u
            JOIN campaigns c ON c.id = u.campaign_id
            WHERE u.campaign_id = $1
              AND NOT u.activated
              AND c.mode = 'UNIQUE'
              AND c.active
              AND c.active_from <= $2
              AND c.active_until > $2
              AND c.age_from <= $3
              AND c.age_until >= $3
              AND {COUNTRY_MATCH}
            LIMIT 1
            FOR UPDATE OF u SKIP LOCKED
            "#
        );

        let claimed = sqlx::query_as::<_, (Uuid, String)>(&sql)
            .bind(request.campaign_id)
            .bind(request.now)
            .bind(request.age)
            .bind(request.country.as_deref())
            .fetch_optional(&mut *tx)
            .await?;

        let Some((code_id, body)) = claimed else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE campaign_unique_codes
            SET activated = true, activated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(code_id)
        .bind(request.now)
        .execute(&mut *tx)
        .await?;

        // used_count 只统计 UNIQUE 领取次数，与码池大小比较即可得知是否耗尽
        sqlx::query(
            r#"
            UPDATE campaigns c
            SET used_count = c.used_count + 1,
                active = CASE
                    WHEN c.used_count + 1 >= (
                        SELECT count(*) FROM campaign_unique_codes WHERE campaign_id = c.id
                    ) THEN false
                    ELSE c.active
                END,
                updated_at = $2
            WHERE c.id = $1
            "#,
        )
        .bind(request.campaign_id)
        .bind(request.now)
        .execute(&mut *tx)
        .await?;

        Ok(Some(body))
    }

    /// 在事务中写入兑换事件
    pub async fn insert_event_in_tx(tx: &mut PgConnection, event: &RedemptionEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO redemption_events (id, user_id, campaign_id, code, country, redeemed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.campaign_id)
        .bind(&event.code)
        .bind(&event.country)
        .bind(event.redeemed_at)
        .execute(tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CampaignRepositoryTrait for CampaignRepository {
    async fn get_targeting(&self, campaign_id: Uuid) -> Result<Option<CampaignTargeting>> {
        let targeting = sqlx::query_as::<_, CampaignTargeting>(
            r#"
            SELECT id, mode, active, active_from, active_until,
                   age_from, age_until, target_country
            FROM campaigns
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(targeting)
    }

    #[instrument(
        skip(self, request),
        fields(campaign_id = %request.campaign_id, user_id = %request.user_id)
    )]
    async fn allocate(&self, request: &AllocationRequest) -> Result<Allocation> {
        let mut tx = self.pool.begin().await?;

        let mode = Self::get_mode_in_tx(&mut tx, request.campaign_id)
            .await?
            .ok_or(RedemptionError::CampaignNotFound(request.campaign_id))?;

        let code = match mode {
            CampaignMode::Common => Self::claim_common_code_in_tx(&mut tx, request).await?,
            CampaignMode::Unique => Self::claim_unique_code_in_tx(&mut tx, request).await?,
        };

        // 未领取到码时事务随 tx drop 回滚
        let Some(code) = code else {
            debug!(mode = mode.as_str(), "分配条件不满足");
            return Err(RedemptionError::Forbidden(ForbiddenReason::Unavailable));
        };

        let event = RedemptionEvent::issue(request, code);
        Self::insert_event_in_tx(&mut tx, &event).await?;

        tx.commit().await?;

        info!(mode = mode.as_str(), event_id = %event.id, "码分配成功");

        Ok(Allocation { mode, event })
    }

    async fn list_user_redemptions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RedemptionEvent>> {
        let events = sqlx::query_as::<_, RedemptionEvent>(
            r#"
            SELECT id, user_id, campaign_id, code, country, redeemed_at
            FROM redemption_events
            WHERE user_id = $1
            ORDER BY redeemed_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    #[instrument(skip(self), fields(campaign_id = %campaign_id))]
    async fn campaign_stats(&self, campaign_id: Uuid) -> Result<CampaignStats> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (SELECT 1 FROM campaigns WHERE id = $1)
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            return Err(RedemptionError::CampaignNotFound(campaign_id));
        }

        let by_country = sqlx::query_as::<_, CountryActivations>(
            r#"
            SELECT country, count(*) AS count
            FROM redemption_events
            WHERE campaign_id = $1
            GROUP BY country
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(CampaignStats::from_country_counts(campaign_id, by_country))
    }
}
