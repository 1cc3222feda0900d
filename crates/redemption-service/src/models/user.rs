//! 已认证用户上下文

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 由外部认证层提供的用户信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub id: Uuid,
    pub age: i32,
    /// ISO 国家码，未知时为空
    #[serde(default)]
    pub country: Option<String>,
    /// 反欺诈服务使用的身份标识
    pub email: String,
}

impl UserContext {
    pub fn new(id: Uuid, age: i32, country: Option<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            age,
            country,
            email: email.into(),
        }
    }
}
