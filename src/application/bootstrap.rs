use crate::application::account_session::AccountSession;
use crate::application::auth_flow::AuthFlow;
use crate::application::scheduler::SchedulerContext;
use crate::infrastructure::config::{
    BridgeConfig, DEFAULT_ACCOUNT_ID, TokenBackend, ensure_default_config, load_config,
    normalize_account_id,
};
use crate::infrastructure::credential_store::{InMemoryTokenStore, KeyringTokenStore, TokenStore};
use crate::infrastructure::ecobee_client::{EcobeeHttpClient, ReqwestEcobeeClient};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use crate::infrastructure::token_repository::SqliteTokenStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
    pub config: BridgeConfig,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("ecobee-bridge.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_config(&config_dir)?;
    let config = load_config(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        logs_dir,
        database_path,
        config,
    })
}

pub fn build_token_store(backend: TokenBackend, database_path: &Path) -> Arc<dyn TokenStore> {
    match backend {
        TokenBackend::Sqlite => Arc::new(SqliteTokenStore::new(database_path)),
        TokenBackend::Keyring => Arc::new(KeyringTokenStore::default()),
        TokenBackend::Memory => Arc::new(InMemoryTokenStore::default()),
    }
}

pub fn build_session<C>(
    account_id: &str,
    config: &BridgeConfig,
    client: Arc<C>,
    token_store: Arc<dyn TokenStore>,
) -> Result<AccountSession<C>, InfraError>
where
    C: EcobeeHttpClient,
{
    let api_key = config.require_api_key()?;
    let flow = AuthFlow::new(api_key, client);
    AccountSession::new(normalize_account_id(account_id), flow, token_store)
}

/// Configured account ids, or the default account when none are listed.
pub fn configured_accounts(config: &BridgeConfig) -> Vec<String> {
    let accounts = config.account_ids();
    if accounts.is_empty() {
        vec![DEFAULT_ACCOUNT_ID.to_string()]
    } else {
        accounts
    }
}

pub fn build_context_with_client<C>(
    config: &BridgeConfig,
    client: Arc<C>,
    token_store: Arc<dyn TokenStore>,
) -> Result<SchedulerContext<C>, InfraError>
where
    C: EcobeeHttpClient,
{
    let mut context = SchedulerContext::new(config.update_frequency_minutes)?;
    for account_id in configured_accounts(config) {
        let session = build_session(
            &account_id,
            config,
            Arc::clone(&client),
            Arc::clone(&token_store),
        )?;
        context.add_account(session);
    }
    context.set_devices(config.devices.clone());
    Ok(context)
}

pub fn build_client(config: &BridgeConfig) -> Result<Arc<ReqwestEcobeeClient>, InfraError> {
    Ok(Arc::new(ReqwestEcobeeClient::new(
        &config.api_base_url,
        config.request_timeout(),
    )?))
}

pub fn build_context(
    bootstrap: &BootstrapResult,
) -> Result<SchedulerContext<ReqwestEcobeeClient>, InfraError> {
    let client = build_client(&bootstrap.config)?;
    let token_store = build_token_store(bootstrap.config.token_backend, &bootstrap.database_path);
    build_context_with_client(&bootstrap.config, client, token_store)
}
