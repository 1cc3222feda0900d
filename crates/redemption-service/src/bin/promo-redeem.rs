//! 促销码兑换运维工具
//!
//! 加载配置，连接 PostgreSQL 与 Redis，执行一次兑换、查询兑换历史或活动统计、运行迁移或健康检查。

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use promo_shared::{cache::Cache, config::AppConfig, database::Database, observability};
use tracing::{info, warn};
use uuid::Uuid;

use promo_redemption::{
    MIGRATOR, RedemptionService, UserContext,
    fraud::{FraudGate, HttpFraudClient, RedisClearanceCache},
    repository::CampaignRepository,
};

const SERVICE_NAME: &str = "promo-redemption-service";

#[derive(Parser, Debug)]
#[command(name = "promo-redeem", version, about = "促销码兑换运维工具")]
struct Cli {
    /// 启动前先运行数据库迁移
    #[arg(long, global = true)]
    migrate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 为指定用户兑换一次
    Redeem {
        #[arg(long)]
        campaign_id: Uuid,
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        age: i32,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        email: String,
    },
    /// 查询用户兑换历史
    History {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// 查询活动兑换统计
    Stats {
        #[arg(long)]
        campaign_id: Uuid,
    },
    /// 运行数据库迁移
    Migrate,
    /// 检查数据库与 Redis 连接
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Configuration loaded");

    let db = Database::connect(&config.database)
        .await
        .context("连接数据库失败")?;

    if cli.migrate || matches!(cli.command, Commands::Migrate) {
        db.run_migrations(&MIGRATOR).await?;
    }

    match cli.command {
        Commands::Migrate => {}
        Commands::Health => {
            db.health_check().await.context("数据库不可用")?;
            let cache = Cache::new(&config.redis)?;
            cache.health_check().await.context("Redis 不可用")?;
            println!("OK");
        }
        Commands::History { user_id, limit } => {
            let service = build_service(&config, &db)?;
            let events = service.list_user_redemptions(user_id, limit).await?;
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        Commands::Stats { campaign_id } => {
            let service = build_service(&config, &db)?;
            let stats = service.campaign_stats(campaign_id).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Redeem {
            campaign_id,
            user_id,
            age,
            country,
            email,
        } => {
            let service = build_service(&config, &db)?;
            let user = UserContext::new(user_id, age, country, email);

            match service.redeem(&user, campaign_id).await {
                Ok(code) => println!("{}", code),
                Err(e) => {
                    warn!(error_code = e.error_code(), "兑换未成功");
                    anyhow::bail!("{} ({:?})", e, e.kind());
                }
            }
        }
    }

    db.close().await;
    Ok(())
}

fn build_service(config: &AppConfig, db: &Database) -> Result<RedemptionService> {
    let cache = Arc::new(Cache::new(&config.redis)?);
    let clearance_cache = Arc::new(RedisClearanceCache::new(
        cache,
        config.fraud.clearance_max_ttl(),
    ));
    let fraud_client = Arc::new(HttpFraudClient::new(&config.fraud)?);
    let repo = Arc::new(CampaignRepository::new(db.pool().clone()));

    Ok(RedemptionService::new(
        repo,
        FraudGate::new(clearance_cache, fraud_client),
    ))
}
