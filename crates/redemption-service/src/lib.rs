//! 促销码兑换引擎
//!
//! 在并发请求下判定用户资格、调用反欺诈服务（带缓存），并原子地发放 COMMON 或 UNIQUE 码。
//!
//! ## 模块结构
//!
//! - `eligibility`: 年龄、国家、活动状态判定
//! - `fraud`: 放行缓存、反欺诈 HTTP 客户端及组合判定
//! - `repository`: 活动仓储与码分配（PostgreSQL / 内存）
//! - `service`: 兑换编排

pub mod eligibility;
pub mod error;
pub mod fraud;
pub mod models;
pub mod repository;
pub mod service;

pub use error::{ErrorKind, ForbiddenReason, RedemptionError, Result};
pub use models::{
    Campaign, CampaignMode, CampaignStats, CampaignTargeting, RedemptionEvent, UserContext,
};
pub use service::RedemptionService;

/// 数据库迁移
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
