//! 活动仓储
//!
//! `CampaignRepositoryTrait` 同时承担定向信息读取和码分配；PostgreSQL 与内存两种实现语义一致。

mod campaign_repo;
mod memory_repo;
mod traits;

pub use campaign_repo::CampaignRepository;
pub use memory_repo::InMemoryCampaignRepository;
pub use traits::CampaignRepositoryTrait;

#[cfg(test)]
pub use traits::MockCampaignRepositoryTrait;
