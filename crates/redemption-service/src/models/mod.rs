//! 兑换服务领域模型

pub mod campaign;
pub mod redemption;
pub mod user;

pub use campaign::{Campaign, CampaignMode, CampaignTargeting, UniqueCode};
pub use redemption::{
    Allocation, AllocationRequest, CampaignStats, CountryActivations, RedemptionEvent,
};
pub use user::UserContext;
