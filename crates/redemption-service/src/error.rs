//! 兑换服务错误类型
//!
//! 调用方只依赖三类结果：不存在、禁止、内部错误。`ForbiddenReason` 仅用于日志与指标。

use std::fmt;

use promo_shared::error::InfraError;
use thiserror::Error;
use uuid::Uuid;

/// 对外暴露的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Internal,
}

/// 拒绝兑换的内部原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// 年龄、国家或活动状态不满足
    Ineligible,
    /// 反欺诈服务拒绝或不可用
    FraudDenied,
    /// 分配时条件不满足：未生效、已过期、库存耗尽
    Unavailable,
}

impl ForbiddenReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ineligible => "ineligible",
            Self::FraudDenied => "fraud_denied",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 兑换服务错误类型
#[derive(Debug, Error)]
pub enum RedemptionError {
    // === 业务错误 ===
    #[error("活动不存在: {0}")]
    CampaignNotFound(Uuid),

    #[error("禁止兑换: {0}")]
    Forbidden(ForbiddenReason),

    #[error("活动数据不合法: {0}")]
    InvalidCampaign(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("基础设施错误: {0}")]
    Infra(#[from] InfraError),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 兑换服务 Result 类型别名
pub type Result<T> = std::result::Result<T, RedemptionError>;

impl RedemptionError {
    /// 映射为对外错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CampaignNotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::InvalidCampaign(_) | Self::Database(_) | Self::Infra(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CampaignNotFound(_) => "CAMPAIGN_NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidCampaign(_) => "INVALID_CAMPAIGN",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Infra(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 指标中的 outcome 标签
    pub(crate) fn outcome(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Internal => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(
            RedemptionError::CampaignNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            RedemptionError::Forbidden(ForbiddenReason::FraudDenied).kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            RedemptionError::Database(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            RedemptionError::InvalidCampaign("both pools".to_string()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_error_code() {
        assert_eq!(
            RedemptionError::Forbidden(ForbiddenReason::Unavailable).error_code(),
            "FORBIDDEN"
        );
        assert_eq!(
            RedemptionError::Infra(InfraError::Internal("x".to_string())).error_code(),
            "INTERNAL_ERROR"
        );
        assert!(RedemptionError::CampaignNotFound(Uuid::nil()).is_business_error());
        assert!(!RedemptionError::Internal("x".to_string()).is_business_error());
    }

    #[test]
    fn test_error_display() {
        let id = Uuid::now_v7();
        assert!(
            RedemptionError::CampaignNotFound(id)
                .to_string()
                .contains(&id.to_string())
        );
        assert!(
            RedemptionError::Forbidden(ForbiddenReason::Ineligible)
                .to_string()
                .contains("ineligible")
        );
    }
}
