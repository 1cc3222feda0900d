//! 兑换并发与场景集成测试
//!
//! 使用内存仓储和内存放行缓存，无需外部依赖；反欺诈服务用计数桩或 wiremock 代替

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use promo_redemption::fraud::{
    ClearanceCache, FraudCheckClient, FraudGate, FraudVerdict, HttpFraudClient,
    MemoryClearanceCache,
};
use promo_redemption::repository::InMemoryCampaignRepository;
use promo_redemption::{
    Campaign, ErrorKind, ForbiddenReason, RedemptionError, RedemptionService, UserContext,
};
use promo_shared::config::FraudServiceConfig;
use promo_shared::error::InfraError;
use uuid::Uuid;

// ==================== 测试桩 ====================

/// 总是放行并记录调用次数
#[derive(Default)]
struct CountingFraudClient {
    calls: AtomicUsize,
}

#[async_trait]
impl FraudCheckClient for CountingFraudClient {
    async fn check(&self, _identity: &str, _campaign_id: Uuid) -> Result<FraudVerdict, InfraError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FraudVerdict::allow(None))
    }
}

struct Harness {
    repo: Arc<InMemoryCampaignRepository>,
    clearances: Arc<MemoryClearanceCache>,
    fraud: Arc<CountingFraudClient>,
    service: Arc<RedemptionService>,
}

impl Harness {
    fn new() -> Self {
        promo_shared::observability::tracing::try_init_for_tests();

        let repo = Arc::new(InMemoryCampaignRepository::new());
        let clearances = Arc::new(MemoryClearanceCache::new());
        let fraud = Arc::new(CountingFraudClient::default());
        let service = Arc::new(RedemptionService::new(
            repo.clone(),
            FraudGate::new(clearances.clone(), fraud.clone()),
        ));
        Self {
            repo,
            clearances,
            fraud,
            service,
        }
    }

    /// 并发兑换，每个请求使用不同用户
    async fn redeem_concurrently(
        &self,
        campaign_id: Uuid,
        count: usize,
    ) -> Vec<Result<String, RedemptionError>> {
        let handles = (0..count).map(|i| {
            let service = self.service.clone();
            tokio::spawn(async move {
                let user = eligible_user(&format!("user{}@example.com", i));
                service.redeem(&user, campaign_id).await
            })
        });

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.expect("task panicked"))
            .collect()
    }
}

fn eligible_user(email: &str) -> UserContext {
    UserContext::new(Uuid::now_v7(), 30, Some("ru".to_string()), email)
}

fn window() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (now - Duration::hours(1), now + Duration::hours(1))
}

fn common_campaign(max: i32) -> Campaign {
    let (from, until) = window();
    Campaign::new_common(Uuid::now_v7(), "WELCOME", max, from, until).with_age_range(18, 99)
}

fn unique_campaign() -> Campaign {
    let (from, until) = window();
    Campaign::new_unique(Uuid::now_v7(), from, until).with_age_range(18, 99)
}

fn split(results: &[Result<String, RedemptionError>]) -> (Vec<String>, usize) {
    let codes: Vec<String> = results.iter().filter_map(|r| r.as_ref().ok().cloned()).collect();
    let forbidden = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.kind() == ErrorKind::Forbidden))
        .count();
    (codes, forbidden)
}

// ==================== 并发属性 ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_common_ceiling_holds_under_contention() {
    let harness = Harness::new();
    let campaign = common_campaign(5);
    let id = campaign.id;
    harness.repo.insert_campaign(campaign, vec![]).unwrap();

    let results = harness.redeem_concurrently(id, 50).await;
    let (codes, forbidden) = split(&results);

    assert_eq!(codes.len(), 5);
    assert!(codes.iter().all(|c| c == "WELCOME"));
    assert_eq!(forbidden, 45);

    let snapshot = harness.repo.snapshot(id).unwrap();
    assert_eq!(snapshot.used_count, 5);
    assert!(!snapshot.active);
    assert_eq!(harness.repo.events().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_unique_codes_are_never_issued_twice() {
    let harness = Harness::new();
    let campaign = unique_campaign();
    let id = campaign.id;
    let pool: Vec<String> = (0..10).map(|i| format!("CODE-{:03}", i)).collect();
    harness.repo.insert_campaign(campaign, pool.clone()).unwrap();

    let results = harness.redeem_concurrently(id, 40).await;
    let (codes, forbidden) = split(&results);

    let distinct: HashSet<&String> = codes.iter().collect();
    assert_eq!(codes.len(), 10);
    assert_eq!(distinct.len(), 10);
    assert_eq!(forbidden, 30);
    assert!(codes.iter().all(|c| pool.contains(c)));

    assert!(harness.repo.unique_codes(id).iter().all(|c| c.activated));
    assert!(!harness.repo.snapshot(id).unwrap().active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_campaigns_are_independent() {
    let harness = Harness::new();
    let a = common_campaign(3);
    let b = common_campaign(3);
    let (a_id, b_id) = (a.id, b.id);
    harness.repo.insert_campaign(a, vec![]).unwrap();
    harness.repo.insert_campaign(b, vec![]).unwrap();

    let (ra, rb) = tokio::join!(
        harness.redeem_concurrently(a_id, 10),
        harness.redeem_concurrently(b_id, 10)
    );

    assert_eq!(split(&ra).0.len(), 3);
    assert_eq!(split(&rb).0.len(), 3);
}

// ==================== 场景 ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_slot_common_campaign_two_concurrent_users() {
    let harness = Harness::new();
    let campaign = common_campaign(1);
    let id = campaign.id;
    harness.repo.insert_campaign(campaign, vec![]).unwrap();

    let results = harness.redeem_concurrently(id, 2).await;
    let (codes, forbidden) = split(&results);

    assert_eq!(codes, vec!["WELCOME".to_string()]);
    assert_eq!(forbidden, 1);

    let snapshot = harness.repo.snapshot(id).unwrap();
    assert_eq!(snapshot.used_count, 1);
    assert!(!snapshot.active);
}

#[tokio::test]
async fn test_ineligible_users_leave_campaign_untouched() {
    let harness = Harness::new();
    let campaign = common_campaign(5).with_target_country("RU");
    let id = campaign.id;
    harness.repo.insert_campaign(campaign, vec![]).unwrap();

    let too_young = UserContext::new(Uuid::now_v7(), 17, Some("ru".into()), "a@example.com");
    let wrong_country = UserContext::new(Uuid::now_v7(), 30, Some("de".into()), "b@example.com");

    for user in [too_young, wrong_country] {
        let err = harness.service.redeem(&user, id).await.unwrap_err();
        assert!(matches!(
            err,
            RedemptionError::Forbidden(ForbiddenReason::Ineligible)
        ));
    }

    let snapshot = harness.repo.snapshot(id).unwrap();
    assert_eq!(snapshot.used_count, 0);
    assert!(snapshot.active);
    assert_eq!(harness.fraud.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_campaign_expiring_exactly_now_yields_no_code() {
    let harness = Harness::new();
    let now = Utc::now();
    let campaign = Campaign::new_common(Uuid::now_v7(), "LATE", 10, now - Duration::days(1), now);
    let id = campaign.id;
    harness.repo.insert_campaign(campaign, vec![]).unwrap();

    let err = harness
        .service
        .redeem_at(&eligible_user("late@example.com"), id, now)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RedemptionError::Forbidden(ForbiddenReason::Unavailable)
    ));
    assert_eq!(harness.repo.snapshot(id).unwrap().used_count, 0);
    assert!(harness.repo.events().is_empty());
}

#[tokio::test]
async fn test_valid_clearance_skips_fraud_service() {
    let harness = Harness::new();
    let campaign = common_campaign(10);
    let id = campaign.id;
    harness.repo.insert_campaign(campaign, vec![]).unwrap();

    let now = Utc::now();
    harness
        .clearances
        .put("cached@example.com", now + Duration::hours(1), now)
        .await
        .unwrap();

    let code = harness
        .service
        .redeem_at(&eligible_user("cached@example.com"), id, now)
        .await
        .unwrap();

    assert_eq!(code, "WELCOME");
    assert_eq!(harness.fraud.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unique_code_redemption_is_recorded_in_history() {
    let harness = Harness::new();
    let campaign = unique_campaign();
    let id = campaign.id;
    harness
        .repo
        .insert_campaign(campaign, vec!["ONLY-ONE".to_string()])
        .unwrap();

    let user = eligible_user("history@example.com");
    let code = harness.service.redeem(&user, id).await.unwrap();
    assert_eq!(code, "ONLY-ONE");

    let history = harness.service.list_user_redemptions(user.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].code, "ONLY-ONE");
    assert_eq!(history[0].campaign_id, id);
}

#[tokio::test]
async fn test_fraud_service_timing_out_twice_denies_without_allocation() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/validate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "ok": true }))
                .set_delay(std::time::Duration::from_millis(1500)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let fraud_client = HttpFraudClient::new(&FraudServiceConfig {
        base_url: server.uri(),
        timeout_seconds: 1,
        ..Default::default()
    })
    .unwrap();

    let repo = Arc::new(InMemoryCampaignRepository::new());
    let campaign = common_campaign(10);
    let id = campaign.id;
    repo.insert_campaign(campaign, vec![]).unwrap();

    let service = RedemptionService::new(
        repo.clone(),
        FraudGate::new(Arc::new(MemoryClearanceCache::new()), Arc::new(fraud_client)),
    );

    let err = service
        .redeem(&eligible_user("slow@example.com"), id)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RedemptionError::Forbidden(ForbiddenReason::FraudDenied)
    ));
    assert_eq!(repo.snapshot(id).unwrap().used_count, 0);
    assert!(repo.events().is_empty());
}
