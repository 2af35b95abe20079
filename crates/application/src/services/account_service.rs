use std::sync::Arc;

use domain::{Account, AccountId, DomainError, Email, Handle, RepositoryError};

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{constraints, AccountRepository},
};

#[derive(Debug, Clone)]
pub struct RegisterAccountRequest {
    pub handle: String,
    pub email: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateProfileRequest {
    pub account_id: AccountId,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

pub struct AccountServiceDependencies {
    pub account_repository: Arc<dyn AccountRepository>,
    pub clock: Arc<dyn Clock>,
    /// 搜索结果上限
    pub search_limit: u32,
}

pub struct AccountService {
    deps: AccountServiceDependencies,
}

impl AccountService {
    pub fn new(deps: AccountServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(
        &self,
        request: RegisterAccountRequest,
    ) -> Result<Account, ApplicationError> {
        let handle = Handle::parse(request.handle)?;
        let email = Email::parse(request.email)?;
        let now = self.deps.clock.now();
        let account = Account::register(
            AccountId::generate(),
            handle.clone(),
            email.clone(),
            normalise_avatar(request.avatar),
            now,
        );

        // 唯一性由存储约束保证，并发注册同名账号只会有一个成功
        let stored = self
            .deps
            .account_repository
            .create(account)
            .await
            .map_err(|err| unique_violation(err, &handle, &email))?;

        tracing::info!(account_id = %stored.id, handle = %stored.handle, "账号已注册");
        Ok(stored)
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, ApplicationError> {
        self.deps
            .account_repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(id.to_string()).into())
    }

    /// 修改邮箱或头像。只写资料字段，不会覆盖同时发生的在线状态变化。
    pub async fn update_profile(
        &self,
        request: UpdateProfileRequest,
    ) -> Result<Account, ApplicationError> {
        let email = request.email.map(Email::parse).transpose()?;
        let account_id = request.account_id;
        let updated = self
            .deps
            .account_repository
            .update_profile(
                account_id,
                email.clone(),
                normalise_avatar(request.avatar),
                self.deps.clock.now(),
            )
            .await
            .map_err(|err| match (err, &email) {
                (RepositoryError::NotFound, _) => {
                    ApplicationError::from(DomainError::AccountNotFound(account_id.to_string()))
                }
                (err, Some(email)) if err.is_conflict_on(constraints::ACCOUNTS_EMAIL) => {
                    DomainError::EmailTaken(email.to_string()).into()
                }
                (err, _) => err.into(),
            })?;

        tracing::info!(account_id = %account_id, "账号资料已更新");
        Ok(updated)
    }

    /// 按用户名子串搜索（不区分大小写）；空查询返回空列表
    pub async fn search_accounts(&self, query: &str) -> Result<Vec<Account>, ApplicationError> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let accounts = self
            .deps
            .account_repository
            .search(&query, self.deps.search_limit)
            .await?;
        Ok(accounts)
    }

    /// 除调用者之外的全部账号，按用户名排序
    pub async fn list_directory(
        &self,
        caller: AccountId,
    ) -> Result<Vec<Account>, ApplicationError> {
        Ok(self.deps.account_repository.list_except(caller).await?)
    }
}

fn normalise_avatar(avatar: Option<String>) -> Option<String> {
    avatar
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn unique_violation(err: RepositoryError, handle: &Handle, email: &Email) -> ApplicationError {
    if err.is_conflict_on(constraints::ACCOUNTS_HANDLE) {
        DomainError::HandleTaken(handle.to_string()).into()
    } else if err.is_conflict_on(constraints::ACCOUNTS_EMAIL) {
        DomainError::EmailTaken(email.to_string()).into()
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::ErrorKind;
    use crate::repository::MockAccountRepository;

    fn service(repository: MockAccountRepository) -> AccountService {
        AccountService::new(AccountServiceDependencies {
            account_repository: Arc::new(repository),
            clock: Arc::new(SystemClock),
            search_limit: 10,
        })
    }

    #[tokio::test]
    async fn handle_conflict_maps_to_handle_taken() {
        let mut repository = MockAccountRepository::new();
        repository
            .expect_create()
            .returning(|_| Err(RepositoryError::conflict(constraints::ACCOUNTS_HANDLE)));

        let err = service(repository)
            .register(RegisterAccountRequest {
                handle: "Alice".into(),
                email: "alice@example.com".into(),
                avatar: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::HandleTaken(ref h)) if h == "alice"
        ));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn invalid_email_never_reaches_storage() {
        let mut repository = MockAccountRepository::new();
        repository.expect_create().never();

        let err = service(repository)
            .register(RegisterAccountRequest {
                handle: "bob".into(),
                email: "not-an-email".into(),
                avatar: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn blank_search_returns_nothing() {
        let mut repository = MockAccountRepository::new();
        repository.expect_search().never();
        let accounts = service(repository).search_accounts("   ").await.unwrap();
        assert!(accounts.is_empty());
    }

    #[tokio::test]
    async fn profile_update_only_touches_profile_fields() {
        let mut repository = MockAccountRepository::new();
        repository.expect_find_by_id().never();
        repository
            .expect_update_profile()
            .withf(|_, email, avatar, _| email.is_none() && avatar.as_deref() == Some("a.png"))
            .returning(|id, _, avatar, at| {
                let mut account = Account::register(
                    id,
                    Handle::parse("alice").unwrap(),
                    Email::parse("alice@example.com").unwrap(),
                    avatar,
                    at,
                );
                account.set_presence(domain::Presence::Online, at);
                Ok(account)
            });

        let updated = service(repository)
            .update_profile(UpdateProfileRequest {
                account_id: AccountId::generate(),
                email: None,
                avatar: Some("  a.png ".into()),
            })
            .await
            .unwrap();
        assert_eq!(updated.presence, domain::Presence::Online);
    }

    #[tokio::test]
    async fn taken_email_on_update_maps_to_email_taken() {
        let mut repository = MockAccountRepository::new();
        repository
            .expect_update_profile()
            .returning(|_, _, _, _| Err(RepositoryError::conflict(constraints::ACCOUNTS_EMAIL)));

        let err = service(repository)
            .update_profile(UpdateProfileRequest {
                account_id: AccountId::generate(),
                email: Some("bob@example.com".into()),
                avatar: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::EmailTaken(_))));
    }

    #[tokio::test]
    async fn storage_failure_is_transient() {
        let mut repository = MockAccountRepository::new();
        repository
            .expect_find_by_id()
            .returning(|_| Err(RepositoryError::storage("pool timed out")));
        let err = service(repository)
            .get_account(AccountId::generate())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
