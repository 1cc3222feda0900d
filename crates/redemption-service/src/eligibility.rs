//! 资格判定
//!
//! 纯函数，无状态无 I/O。编排层用 `evaluate` 提前拒绝；分配器在原子单元内用
//! `is_allocatable` 重新校验同一组条件（外加时间窗口）。

use chrono::{DateTime, Utc};

use crate::error::ForbiddenReason;
use crate::models::CampaignTargeting;

/// 用户是否满足活动定向
///
/// 条件：年龄在闭区间内、国家匹配、活动当前为 active
pub fn evaluate(age: i32, country: Option<&str>, targeting: &CampaignTargeting) -> bool {
    check(age, country, targeting).is_ok()
}

/// 同 `evaluate`，失败时返回原因
pub fn check(
    age: i32,
    country: Option<&str>,
    targeting: &CampaignTargeting,
) -> Result<(), ForbiddenReason> {
    if !targeting.active {
        return Err(ForbiddenReason::Unavailable);
    }
    if !age_matches(age, targeting.age_from, targeting.age_until) {
        return Err(ForbiddenReason::Ineligible);
    }
    if !country_matches(targeting.target_country.as_deref(), country) {
        return Err(ForbiddenReason::Ineligible);
    }
    Ok(())
}

/// 分配时的完整条件，多了时间窗口 [active_from, active_until)
pub fn is_allocatable(
    age: i32,
    country: Option<&str>,
    targeting: &CampaignTargeting,
    now: DateTime<Utc>,
) -> bool {
    targeting.is_within_window(now) && evaluate(age, country, targeting)
}

pub fn age_matches(age: i32, age_from: i32, age_until: i32) -> bool {
    age_from <= age && age <= age_until
}

/// 目标国家为空视为不限；比较忽略大小写
pub fn country_matches(target: Option<&str>, country: Option<&str>) -> bool {
    match target.map(str::trim).filter(|t| !t.is_empty()) {
        None => true,
        Some(target) => country.is_some_and(|c| c.trim().eq_ignore_ascii_case(target)),
    }
}
