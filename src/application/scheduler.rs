use crate::application::account_session::AccountSession;
use crate::application::auth_flow::{NowProvider, RefreshOutcome};
use crate::domain::device::{DeviceBinding, DeviceStates, map_device_states};
use crate::domain::models::AccountStatus;
use crate::infrastructure::config::validate_update_frequency;
use crate::infrastructure::ecobee_client::EcobeeHttpClient;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Clonable "update needed" flag. Raising it makes the next tick fetch regardless of the
/// update deadline.
#[derive(Debug, Clone, Default)]
pub struct UpdateTrigger {
    flag: Arc<AtomicBool>,
}

impl UpdateTrigger {
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub persisted: Vec<String>,
    pub refreshed: Vec<(String, RefreshOutcome)>,
    pub update_ran: bool,
    pub fetched: Vec<String>,
    pub fetch_failed: Vec<String>,
    pub skipped_unauthenticated: Vec<String>,
    pub devices_updated: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.persisted.is_empty() && self.refreshed.is_empty() && !self.update_ran
    }
}

/// Owns every account session and drives the refresh and update clocks.
pub struct SchedulerContext<C>
where
    C: EcobeeHttpClient,
{
    sessions: BTreeMap<String, AccountSession<C>>,
    devices: Vec<DeviceBinding>,
    device_states: BTreeMap<String, DeviceStates>,
    update_frequency: Duration,
    next_update: Option<DateTime<Utc>>,
    update_trigger: UpdateTrigger,
    tick_interval: std::time::Duration,
    now_provider: NowProvider,
}

impl<C> SchedulerContext<C>
where
    C: EcobeeHttpClient,
{
    pub fn new(update_frequency_minutes: u64) -> Result<Self, InfraError> {
        let minutes = validate_update_frequency(update_frequency_minutes)?;
        Ok(Self {
            sessions: BTreeMap::new(),
            devices: Vec::new(),
            device_states: BTreeMap::new(),
            update_frequency: Duration::minutes(minutes as i64),
            next_update: None,
            update_trigger: UpdateTrigger::default(),
            tick_interval: TICK_INTERVAL,
            now_provider: Arc::new(Utc::now),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: std::time::Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn update_trigger(&self) -> UpdateTrigger {
        self.update_trigger.clone()
    }

    pub fn update_frequency(&self) -> Duration {
        self.update_frequency
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    pub fn set_update_frequency(&mut self, minutes: u64) -> Result<(), InfraError> {
        let minutes = validate_update_frequency(minutes)?;
        self.update_frequency = Duration::minutes(minutes as i64);
        self.next_update = Some((self.now_provider)());
        self.update_trigger.request();
        info!(minutes, "update frequency changed");
        Ok(())
    }

    /// Starts managing `session`, replacing any session with the same account id.
    pub fn add_account(&mut self, session: AccountSession<C>) -> Option<AccountSession<C>> {
        let account_id = session.account_id().to_string();
        info!(account = %account_id, status = %session.status(), "account session started");
        self.update_trigger.request();
        self.sessions.insert(account_id, session)
    }

    pub fn remove_account(&mut self, account_id: &str) -> Option<AccountSession<C>> {
        let removed = self.sessions.remove(account_id)?;
        let devices = &self.devices;
        self.device_states.retain(|device_id, _| {
            devices
                .iter()
                .any(|binding| &binding.device_id == device_id && binding.account_id != account_id)
        });
        info!(account = %account_id, "account session stopped");
        Some(removed)
    }

    pub fn session(&self, account_id: &str) -> Option<&AccountSession<C>> {
        self.sessions.get(account_id)
    }

    pub fn session_mut(&mut self, account_id: &str) -> Option<&mut AccountSession<C>> {
        self.sessions.get_mut(account_id)
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn statuses(&self) -> Vec<(String, AccountStatus)> {
        self.sessions
            .iter()
            .map(|(account_id, session)| (account_id.clone(), session.status()))
            .collect()
    }

    pub fn set_devices(&mut self, devices: Vec<DeviceBinding>) {
        self.device_states
            .retain(|device_id, _| devices.iter().any(|binding| &binding.device_id == device_id));
        self.devices = devices;
    }

    pub fn devices(&self) -> &[DeviceBinding] {
        &self.devices
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceBinding> {
        self.devices.iter().find(|binding| binding.device_id == device_id)
    }

    pub fn device_states(&self, device_id: &str) -> Option<&DeviceStates> {
        self.device_states.get(device_id)
    }

    /// One scheduler iteration: pending persists, due refreshes, then the fetch if the update
    /// deadline passed or an update was requested.
    pub async fn tick(&mut self) -> TickReport {
        let now = (self.now_provider)();
        let mut report = TickReport::default();

        for (account_id, session) in self.sessions.iter_mut() {
            if session.pending_persist() && session.retry_pending_persist() {
                report.persisted.push(account_id.clone());
            }
        }

        for (account_id, session) in self.sessions.iter_mut() {
            if session.refresh_due(now) {
                let outcome = session.refresh_tokens().await;
                debug!(account = %account_id, outcome = ?outcome, "token refresh attempted");
                report.refreshed.push((account_id.clone(), outcome));
            }
        }

        let requested = self.update_trigger.take();
        let deadline_passed = self.next_update.is_none_or(|deadline| now >= deadline);
        if !(requested || deadline_passed) {
            return report;
        }

        report.update_ran = true;
        for (account_id, session) in self.sessions.iter_mut() {
            if !session.is_authenticated() || session.pending_persist() {
                report.skipped_unauthenticated.push(account_id.clone());
                continue;
            }
            match session.fetch_remote_state().await {
                Ok(()) => report.fetched.push(account_id.clone()),
                Err(_) => report.fetch_failed.push(account_id.clone()),
            }
        }
        self.next_update = Some(now + self.update_frequency);
        report.devices_updated = self.map_devices();

        debug!(
            fetched = report.fetched.len(),
            failed = report.fetch_failed.len(),
            skipped = report.skipped_unauthenticated.len(),
            devices_updated = report.devices_updated,
            next_update = ?self.next_update,
            "update pass complete"
        );
        report
    }

    fn map_devices(&mut self) -> usize {
        let mut updated = 0;
        for binding in &self.devices {
            let Some(session) = self.sessions.get(&binding.account_id) else {
                continue;
            };
            let Some(states) = map_device_states(binding, &session.snapshot()) else {
                continue;
            };
            if self.device_states.get(&binding.device_id) != Some(&states) {
                self.device_states.insert(binding.device_id.clone(), states);
                updated += 1;
            }
        }
        updated
    }

    /// Ticks until `cancel` fires. An in-flight tick finishes before the loop observes it.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            accounts = self.sessions.len(),
            devices = self.devices.len(),
            update_frequency_minutes = self.update_frequency.num_minutes(),
            "scheduler started"
        );
        while !cancel.is_cancelled() {
            let report = self.tick().await;
            if !report.is_idle() {
                debug!(report = ?report, "scheduler tick");
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("scheduler loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::auth_flow::AuthFlow;
    use crate::application::test_support::{
        FakeClock, FakeEcobeeClient, FakeFailure, grant, thermostat_json,
    };
    use crate::domain::device::{DeviceKind, StateValue};
    use crate::domain::models::StoredCredentials;
    use crate::infrastructure::credential_store::{InMemoryTokenStore, TokenStore};
    use std::sync::atomic::Ordering;

    fn session(
        account_id: &str,
        client: &Arc<FakeEcobeeClient>,
        clock: &FakeClock,
        stored: Option<StoredCredentials>,
    ) -> AccountSession<FakeEcobeeClient> {
        let store = Arc::new(InMemoryTokenStore::default());
        if let Some(stored) = stored {
            store.save(account_id, &stored).expect("seed store");
        }
        let flow = AuthFlow::new("api-key", Arc::clone(client)).with_now_provider(clock.provider());
        AccountSession::new(account_id, flow, store).expect("create session")
    }

    fn live(clock: &FakeClock, access_token: &str, refresh_token: &str) -> StoredCredentials {
        StoredCredentials {
            refresh_token: refresh_token.to_string(),
            access_token: Some(access_token.to_string()),
            expires_at: Some(clock.now() + Duration::seconds(2880)),
        }
    }

    fn scheduler(clock: &FakeClock, minutes: u64) -> SchedulerContext<FakeEcobeeClient> {
        SchedulerContext::new(minutes)
            .expect("valid frequency")
            .with_now_provider(clock.provider())
    }

    #[tokio::test]
    async fn update_deadline_drives_fetches() {
        let client = Arc::new(FakeEcobeeClient::default());
        let clock = FakeClock::starting_at_epoch();
        let start = clock.now();
        let mut context = scheduler(&clock, 15);
        context.add_account(session("home", &client, &clock, Some(live(&clock, "A1", "R1"))));

        let first = context.tick().await;
        assert_eq!(first.fetched, vec!["home"]);
        assert_eq!(context.next_update(), Some(start + Duration::seconds(900)));

        clock.set_offset(500);
        let idle = context.tick().await;
        assert!(idle.is_idle());
        assert_eq!(client.fetch_calls.load(Ordering::SeqCst), 1);

        clock.set_offset(901);
        let second = context.tick().await;
        assert_eq!(second.fetched, vec!["home"]);
        assert_eq!(client.fetch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(context.next_update(), Some(start + Duration::seconds(1801)));
    }

    #[tokio::test]
    async fn update_request_fetches_before_deadline() {
        let client = Arc::new(FakeEcobeeClient::default());
        let clock = FakeClock::starting_at_epoch();
        let mut context = scheduler(&clock, 15);
        context.add_account(session("home", &client, &clock, Some(live(&clock, "A1", "R1"))));
        context.tick().await;

        clock.set_offset(120);
        let trigger = context.update_trigger();
        trigger.request();
        let report = context.tick().await;

        assert!(report.update_ran);
        assert!(!trigger.is_requested());
        assert_eq!(client.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_runs_before_fetch_in_the_same_tick() {
        let client = Arc::new(FakeEcobeeClient::default());
        client.push_refresh(Ok(grant("A2", "R2", 3600)));
        let clock = FakeClock::starting_at_epoch();
        let mut context = scheduler(&clock, 15);
        let restored = StoredCredentials {
            refresh_token: "R1".to_string(),
            access_token: Some("A1".to_string()),
            expires_at: Some(clock.now() - Duration::seconds(1)),
        };
        context.add_account(session("home", &client, &clock, Some(restored)));

        let report = context.tick().await;

        assert_eq!(report.refreshed, vec![("home".to_string(), RefreshOutcome::Rotated)]);
        assert_eq!(report.fetched, vec!["home"]);
        assert_eq!(client.calls(), vec!["refresh:R1", "fetch:A2"]);
    }

    #[tokio::test]
    async fn refresh_clock_is_independent_of_update_clock() {
        let client = Arc::new(FakeEcobeeClient::default());
        client.push_refresh(Ok(grant("A2", "R2", 3600)));
        let clock = FakeClock::starting_at_epoch();
        let mut context = scheduler(&clock, 60);
        context.add_account(session("home", &client, &clock, Some(live(&clock, "A1", "R1"))));
        context.tick().await;

        clock.set_offset(2881);
        let report = context.tick().await;

        assert_eq!(report.refreshed.len(), 1);
        assert!(!report.update_ran);
        assert_eq!(client.calls(), vec!["fetch:A1", "refresh:R1"]);
    }

    #[tokio::test]
    async fn unauthenticated_accounts_are_skipped_and_others_continue() {
        let client = Arc::new(FakeEcobeeClient::default());
        client.push_fetch(Err(FakeFailure::Http(500)));
        let clock = FakeClock::starting_at_epoch();
        let mut context = scheduler(&clock, 15);
        context.add_account(session("a-failing", &client, &clock, Some(live(&clock, "A1", "R1"))));
        context.add_account(session("b-healthy", &client, &clock, Some(live(&clock, "B1", "S1"))));
        context.add_account(session("c-new", &client, &clock, None));

        let report = context.tick().await;

        assert_eq!(report.fetch_failed, vec!["a-failing"]);
        assert_eq!(report.fetched, vec!["b-healthy"]);
        assert_eq!(report.skipped_unauthenticated, vec!["c-new"]);
        assert_eq!(
            context.statuses(),
            vec![
                ("a-failing".to_string(), AccountStatus::Authenticated),
                ("b-healthy".to_string(), AccountStatus::Authenticated),
                ("c-new".to_string(), AccountStatus::NotAuthorized),
            ]
        );
    }

    #[tokio::test]
    async fn expired_token_during_fetch_refreshes_next_tick() {
        let client = Arc::new(FakeEcobeeClient::default());
        client.push_fetch(Err(FakeFailure::ApiStatus(14, "Authentication token has expired")));
        client.push_refresh(Ok(grant("A2", "R2", 3600)));
        let clock = FakeClock::starting_at_epoch();
        let mut context = scheduler(&clock, 15);
        context.add_account(session("home", &client, &clock, Some(live(&clock, "A1", "R1"))));

        let first = context.tick().await;
        assert_eq!(first.fetch_failed, vec!["home"]);

        clock.set_offset(1);
        let second = context.tick().await;
        assert_eq!(second.refreshed.len(), 1);
        assert_eq!(client.calls(), vec!["fetch:A1", "refresh:R1"]);
    }

    #[tokio::test]
    async fn zero_token_lifetime_does_not_refresh_every_tick() {
        let client = Arc::new(FakeEcobeeClient::default());
        for round in 0..5 {
            client.push_refresh(Ok(grant(&format!("A{round}"), &format!("R{round}"), 0)));
        }
        let clock = FakeClock::starting_at_epoch();
        let mut context = scheduler(&clock, 15);
        let restored = StoredCredentials {
            refresh_token: "R-start".to_string(),
            access_token: None,
            expires_at: None,
        };
        context.add_account(session("home", &client, &clock, Some(restored)));

        for second in 0..5 {
            clock.set_offset(second);
            context.tick().await;
        }
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(context.statuses()[0].1, AccountStatus::Authenticated);

        clock.set_offset(300);
        let report = context.tick().await;
        assert_eq!(report.refreshed.len(), 1);
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn oversized_token_lifetime_keeps_the_loop_alive() {
        let client = Arc::new(FakeEcobeeClient::default());
        client.push_refresh(Ok(grant("A2", "R2", 100_000_000_000_000)));
        let clock = FakeClock::starting_at_epoch();
        let mut context = scheduler(&clock, 15);
        let restored = StoredCredentials {
            refresh_token: "R1".to_string(),
            access_token: None,
            expires_at: None,
        };
        context.add_account(session("home", &client, &clock, Some(restored)));

        let report = context.tick().await;

        assert_eq!(report.refreshed, vec![("home".to_string(), RefreshOutcome::Rotated)]);
        assert_eq!(report.fetched, vec!["home"]);
    }

    #[tokio::test]
    async fn device_states_follow_the_snapshot() {
        let client = Arc::new(FakeEcobeeClient::default());
        client.set_thermostats(vec![thermostat_json("t1", 705)]);
        let clock = FakeClock::starting_at_epoch();
        let mut context = scheduler(&clock, 15);
        context.add_account(session("home", &client, &clock, Some(live(&clock, "A1", "R1"))));
        context.set_devices(vec![
            DeviceBinding {
                device_id: "dev-thermostat".to_string(),
                account_id: "home".to_string(),
                address: "t1".to_string(),
                kind: DeviceKind::Thermostat,
                hold_type: None,
            },
            DeviceBinding {
                device_id: "dev-sensor".to_string(),
                account_id: "home".to_string(),
                address: "RS01".to_string(),
                kind: DeviceKind::RemoteSensor,
                hold_type: None,
            },
        ]);

        let report = context.tick().await;
        assert_eq!(report.devices_updated, 2);
        assert_eq!(
            context
                .device_states("dev-thermostat")
                .and_then(|states| states.get("temperatureInput1")),
            Some(&StateValue::Number(70.5))
        );

        context.update_trigger().request();
        let unchanged = context.tick().await;
        assert_eq!(unchanged.devices_updated, 0);

        context.remove_account("home");
        assert!(context.device_states("dev-thermostat").is_none());
    }

    #[tokio::test]
    async fn update_frequency_is_validated_and_resets_deadline() {
        let clock = FakeClock::starting_at_epoch();
        let mut context = scheduler(&clock, 15);
        assert!(SchedulerContext::<FakeEcobeeClient>::new(2).is_err());
        assert!(context.set_update_frequency(61).is_err());

        clock.set_offset(30);
        context.set_update_frequency(5).expect("valid frequency");

        assert_eq!(context.update_frequency(), Duration::minutes(5));
        assert_eq!(context.next_update(), Some(clock.now()));
        assert!(context.update_trigger().is_requested());
    }

    #[tokio::test]
    async fn run_exits_promptly_after_cancellation() {
        let client = Arc::new(FakeEcobeeClient::default());
        let clock = FakeClock::starting_at_epoch();
        let mut context = scheduler(&clock, 15).with_tick_interval(std::time::Duration::from_secs(30));
        context.add_account(session("home", &client, &clock, Some(live(&clock, "A1", "R1"))));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), context.run(cancel))
            .await
            .expect("scheduler stops within one tick");
        assert_eq!(client.fetch_calls.load(Ordering::SeqCst), 1);
    }
}
