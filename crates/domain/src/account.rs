use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{AccountId, Email, Handle, Timestamp};

/// 在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    #[default]
    Offline,
    Away,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Online => "online",
            Presence::Offline => "offline",
            Presence::Away => "away",
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Presence {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(Presence::Online),
            "offline" => Ok(Presence::Offline),
            "away" => Ok(Presence::Away),
            other => Err(DomainError::invalid_argument(
                "presence",
                format!("unknown state '{other}', expected online, offline or away"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub handle: Handle,
    pub email: Email,
    pub presence: Presence,
    pub avatar: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Account {
    /// 注册新账号，初始状态为离线
    pub fn register(
        id: AccountId,
        handle: Handle,
        email: Email,
        avatar: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            handle,
            email,
            presence: Presence::Offline,
            avatar,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_presence(&mut self, presence: Presence, now: Timestamp) {
        self.presence = presence;
        self.updated_at = now;
    }

    pub fn update_profile(&mut self, email: Option<Email>, avatar: Option<String>, now: Timestamp) {
        if let Some(email) = email {
            self.email = email;
        }
        if let Some(avatar) = avatar {
            self.avatar = Some(avatar);
        }
        self.updated_at = now;
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary::from(self)
    }
}

/// 对外展示的账号身份（事件与消息视图中使用，不含邮箱）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: AccountId,
    pub handle: Handle,
    pub presence: Presence,
    pub avatar: Option<String>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            handle: account.handle.clone(),
            presence: account.presence,
            avatar: account.avatar.clone(),
        }
    }
}
