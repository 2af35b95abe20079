#![allow(dead_code)]

use application::{DomainEvent, EventSubscription, RegisterAccountRequest, ServiceContainer};
use chrono::Duration;
use config::AppConfig;
use domain::{Account, AccountId};
use infrastructure::Infrastructure;

/// 内存存储上装配好的完整服务栈
pub struct TestApp {
    pub config: AppConfig,
    pub infra: Infrastructure,
    pub services: ServiceContainer,
}

impl TestApp {
    pub async fn start() -> Self {
        Self::with_config(AppConfig::default()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let infra = Infrastructure::build(&config)
            .await
            .expect("build infrastructure");
        let services = infra.services(&config);
        Self {
            config,
            infra,
            services,
        }
    }

    pub async fn register(&self, handle: &str) -> Account {
        self.services
            .accounts
            .register(RegisterAccountRequest {
                handle: handle.to_string(),
                email: format!("{handle}@example.com"),
                avatar: None,
            })
            .await
            .expect("register account")
    }

    pub fn token(&self, account_id: AccountId) -> String {
        self.infra
            .authenticator
            .issue(account_id, Duration::hours(1))
            .expect("issue token")
    }
}

/// 取出当前已投递的全部事件
pub fn drain(events: &mut EventSubscription) -> Vec<DomainEvent> {
    let mut drained = Vec::new();
    while let Some(event) = events.try_recv() {
        drained.push(event.as_ref().clone());
    }
    drained
}

pub fn event_types(events: &[DomainEvent]) -> Vec<&'static str> {
    events.iter().map(DomainEvent::event_type).collect()
}
