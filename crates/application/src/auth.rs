//! 会话建立前的身份校验端口
//!
//! 校验是同步的：要么得到凭证所属的账号标识，要么得到分类明确的失败原因。

use domain::AccountId;
use thiserror::Error;

/// 已通过校验的调用者身份。
///
/// 只在本 crate 内由会话服务在 `Authenticator::verify` 成功后构造，
/// 外部代码拿不到未经校验的身份去订阅事件。
///
/// ```compile_fail
/// let _ = application::AuthenticatedAccount::new(domain::AccountId::generate());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthenticatedAccount {
    account_id: AccountId,
}

impl AuthenticatedAccount {
    pub(crate) fn new(account_id: AccountId) -> Self {
        Self { account_id }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("credential expired")]
    Expired,
    #[error("invalid credential: {0}")]
    Invalid(String),
    #[error("account does not exist")]
    UnknownAccount,
}

pub trait Authenticator: Send + Sync {
    /// 校验凭证，返回凭证所属的账号标识
    fn verify(&self, credential: &str) -> Result<AccountId, AuthError>;
}
