use std::sync::Arc;

use application::{AccountService, CredentialService, Dispatcher, HubHandle, TokenMaker};
use config::ConfigHandle;

#[derive(Clone)]
pub struct AppState {
    pub credential_service: Arc<CredentialService>,
    pub account_service: Arc<AccountService>,
    /// 实时通道令牌签发
    pub token_maker: Arc<dyn TokenMaker>,
    pub hub: HubHandle,
    pub dispatcher: Arc<Dispatcher>,
    pub config: ConfigHandle,
}

impl AppState {
    pub fn new(
        credential_service: Arc<CredentialService>,
        account_service: Arc<AccountService>,
        token_maker: Arc<dyn TokenMaker>,
        hub: HubHandle,
        dispatcher: Arc<Dispatcher>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            credential_service,
            account_service,
            token_maker,
            hub,
            dispatcher,
            config,
        }
    }
}
