use crate::dispatch::{Command, Dispatcher};
use crate::model::{ATTR_CHANNEL, ATTR_INPUT, ATTR_POWER};
use crate::parser;
use crate::state::StateSink;
use crate::transport::Connector;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const CURRENT_CHANNEL_URI: &str = "ssap://tv/getCurrentChannel";
pub const FOREGROUND_APP_URI: &str = "ssap://com.webos.applicationManager/getForegroundAppInfo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    Channel,
    OnlineStatus,
    Input,
}

impl PollKind {
    pub const ALL: [PollKind; 3] = [Self::Channel, Self::OnlineStatus, Self::Input];

    /// Runs one cycle and writes its result. Errors never leave this function.
    pub async fn run<C: Connector, S: StateSink>(self, dispatcher: &Dispatcher<C>, sink: &S) {
        tracing::debug!(cycle = %self, "polling");
        match self {
            Self::Channel => poll_channel(dispatcher, sink).await,
            Self::OnlineStatus => poll_online_status(dispatcher, sink).await,
            Self::Input => poll_input(dispatcher, sink).await,
        }
    }
}

impl fmt::Display for PollKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Channel => "channel",
            Self::OnlineStatus => "online-status",
            Self::Input => "input",
        })
    }
}

pub async fn poll_channel<C: Connector, S: StateSink>(dispatcher: &Dispatcher<C>, sink: &S) {
    let result = dispatcher
        .dispatch(Command::rpc(CURRENT_CHANNEL_URI, None))
        .await;

    let channel = if result.succeeded {
        parser::channel_number(result.payload.as_ref()).unwrap_or_else(|anomaly| {
            tracing::debug!(%anomaly, "no channel in reply");
            String::new()
        })
    } else {
        String::new()
    };
    sink.set_state(ATTR_CHANNEL, Value::String(channel), true);
}

/// Online means the foreground app query answered with something.
pub async fn poll_online_status<C: Connector, S: StateSink>(dispatcher: &Dispatcher<C>, sink: &S) {
    let result = dispatcher
        .dispatch(Command::rpc(FOREGROUND_APP_URI, None))
        .await;

    let online = result.succeeded && parser::is_meaningful(result.payload.as_ref());
    sink.set_state(ATTR_POWER, Value::Bool(online), true);
}

pub async fn poll_input<C: Connector, S: StateSink>(dispatcher: &Dispatcher<C>, sink: &S) {
    let result = dispatcher
        .dispatch(Command::rpc(FOREGROUND_APP_URI, None))
        .await;

    if !result.succeeded {
        tracing::debug!(error = ?result.error_detail, "error polling input");
        return;
    }
    if let Some(input) = parser::input_source(result.payload.as_ref()) {
        sink.set_state(ATTR_INPUT, Value::String(input.as_str().to_string()), true);
    }
}

/// Owns the three poll tasks; dropping it without `shutdown` leaves them running.
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PollerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Starts one independent task per cycle. `None` when polling is disabled.
pub fn start<C: Connector, S: StateSink>(
    dispatcher: Dispatcher<C>,
    sink: Arc<S>,
    period: Option<Duration>,
) -> Option<PollerHandle> {
    let period = period.filter(|p| !p.is_zero())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tasks = PollKind::ALL
        .into_iter()
        .map(|kind| {
            let dispatcher = dispatcher.clone();
            let sink = sink.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(run_cycle(kind, dispatcher, sink, period, shutdown_rx))
        })
        .collect();

    tracing::info!(interval_ms = period.as_millis() as u64, "polling started");
    Some(PollerHandle { shutdown_tx, tasks })
}

async fn run_cycle<C: Connector, S: StateSink>(
    kind: PollKind,
    dispatcher: Dispatcher<C>,
    sink: Arc<S>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = kind.run(&dispatcher, sink.as_ref()) => {}
        }
    }
    tracing::debug!(cycle = %kind, "poll cycle stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use crate::transport::testing::FakeTv;
    use crate::transport::CommandError;
    use serde_json::json;

    fn setup() -> (FakeTv, Dispatcher<crate::transport::testing::FakeConnector>, StateStore) {
        let tv = FakeTv::new();
        let dispatcher = Dispatcher::new(tv.connector());
        (tv, dispatcher, StateStore::new())
    }

    #[tokio::test]
    async fn channel_cycle_writes_channel_number() {
        let (tv, dispatcher, store) = setup();
        tv.respond(
            CURRENT_CHANNEL_URI,
            Ok(json!({ "returnValue": true, "channelNumber": "5" })),
        );

        poll_channel(&dispatcher, &store).await;

        let entry = store.get(ATTR_CHANNEL).unwrap();
        assert_eq!(entry.val, json!("5"));
        assert!(entry.ack);
    }

    #[tokio::test]
    async fn channel_cycle_resets_on_error_or_missing_field() {
        let (tv, dispatcher, store) = setup();
        store.set_state(ATTR_CHANNEL, json!("5"), true);

        tv.respond(CURRENT_CHANNEL_URI, Err(CommandError::Timeout(Duration::from_secs(5))));
        poll_channel(&dispatcher, &store).await;
        assert_eq!(store.get(ATTR_CHANNEL).unwrap().val, json!(""));

        store.set_state(ATTR_CHANNEL, json!("5"), true);
        tv.respond(CURRENT_CHANNEL_URI, Ok(json!({ "returnValue": true })));
        poll_channel(&dispatcher, &store).await;
        assert_eq!(store.get(ATTR_CHANNEL).unwrap().val, json!(""));
    }

    #[tokio::test]
    async fn identical_replies_give_identical_updates() {
        let (tv, dispatcher, store) = setup();
        tv.respond(
            CURRENT_CHANNEL_URI,
            Ok(json!({ "returnValue": true, "channelNumber": "42" })),
        );
        let mut rx = store.subscribe();

        poll_channel(&dispatcher, &store).await;
        poll_channel(&dispatcher, &store).await;

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn online_status_follows_foreground_app_reply() {
        let (tv, dispatcher, store) = setup();

        tv.respond(
            FOREGROUND_APP_URI,
            Ok(json!({ "returnValue": true, "appId": "com.webos.app.livetv" })),
        );
        poll_online_status(&dispatcher, &store).await;
        assert_eq!(store.get(ATTR_POWER).unwrap().val, json!(true));

        tv.respond(FOREGROUND_APP_URI, Err(CommandError::Closed));
        poll_online_status(&dispatcher, &store).await;
        assert_eq!(store.get(ATTR_POWER).unwrap().val, json!(false));

        tv.respond(FOREGROUND_APP_URI, Ok(json!({})));
        poll_online_status(&dispatcher, &store).await;
        assert_eq!(store.get(ATTR_POWER).unwrap().val, json!(false));
    }

    #[tokio::test]
    async fn offline_when_tv_unreachable() {
        let (tv, dispatcher, store) = setup();
        tv.refuse_connections(true);
        poll_online_status(&dispatcher, &store).await;
        assert_eq!(store.get(ATTR_POWER).unwrap().val, json!(false));
    }

    #[tokio::test]
    async fn input_cycle_maps_known_apps_and_ignores_the_rest() {
        let (tv, dispatcher, store) = setup();

        tv.respond(
            FOREGROUND_APP_URI,
            Ok(json!({ "returnValue": true, "appId": "com.webos.app.hdmi2" })),
        );
        poll_input(&dispatcher, &store).await;
        assert_eq!(store.get(ATTR_INPUT).unwrap().val, json!("HDMI_2"));

        tv.respond(
            FOREGROUND_APP_URI,
            Ok(json!({ "returnValue": true, "appId": "com.webos.app.unknownthing" })),
        );
        poll_input(&dispatcher, &store).await;
        assert_eq!(store.get(ATTR_INPUT).unwrap().val, json!("HDMI_2"));

        tv.respond(FOREGROUND_APP_URI, Err(CommandError::MissingPayload));
        poll_input(&dispatcher, &store).await;
        assert_eq!(store.get(ATTR_INPUT).unwrap().val, json!("HDMI_2"));
    }

    #[test]
    fn zero_or_missing_interval_disables_polling() {
        let (_tv, dispatcher, store) = setup();
        let store = Arc::new(store);
        assert!(start(dispatcher.clone(), store.clone(), None).is_none());
        assert!(start(dispatcher, store, Some(Duration::ZERO)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_cycle_does_not_disturb_the_others() {
        let (tv, dispatcher, store) = setup();
        tv.respond(CURRENT_CHANNEL_URI, Err(CommandError::Rejected("no tuner".to_string())));
        tv.respond(
            FOREGROUND_APP_URI,
            Ok(json!({ "returnValue": true, "appId": "com.webos.app.hdmi1" })),
        );
        let store = Arc::new(store);

        let handle = start(dispatcher, store.clone(), Some(Duration::from_secs(1))).unwrap();

        // nothing runs before the first period has elapsed
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(store.snapshot().is_empty());

        tokio::time::sleep(Duration::from_millis(2600)).await;
        handle.shutdown().await;

        assert_eq!(store.get(ATTR_CHANNEL).unwrap().val, json!(""));
        assert_eq!(store.get(ATTR_POWER).unwrap().val, json!(true));
        assert_eq!(store.get(ATTR_INPUT).unwrap().val, json!("HDMI_1"));

        let uris = tv.requested_uris();
        let channel_polls = uris.iter().filter(|u| *u == CURRENT_CHANNEL_URI).count();
        let app_polls = uris.iter().filter(|u| *u == FOREGROUND_APP_URI).count();
        assert_eq!(channel_polls, 3);
        assert_eq!(app_polls, 6);
        tv.with_log(|log| assert_eq!(log.sessions_opened, log.sessions_closed));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_cycle_does_not_delay_the_others() {
        let (tv, dispatcher, store) = setup();
        tv.delay(CURRENT_CHANNEL_URI, Duration::from_secs(3600));
        tv.respond(
            FOREGROUND_APP_URI,
            Ok(json!({ "returnValue": true, "appId": "com.webos.app.hdmi3" })),
        );
        let store = Arc::new(store);

        let handle = start(dispatcher, store.clone(), Some(Duration::from_secs(1))).unwrap();
        tokio::time::sleep(Duration::from_millis(3100)).await;
        handle.shutdown().await;

        let uris = tv.requested_uris();
        let channel_polls = uris.iter().filter(|u| *u == CURRENT_CHANNEL_URI).count();
        let app_polls = uris.iter().filter(|u| *u == FOREGROUND_APP_URI).count();
        // the channel cycle is still waiting on its first reply
        assert_eq!(channel_polls, 1);
        assert_eq!(app_polls, 6);
        assert!(store.get(ATTR_CHANNEL).is_none());
        assert_eq!(store.get(ATTR_POWER).unwrap().val, json!(true));
        assert_eq!(store.get(ATTR_INPUT).unwrap().val, json!("HDMI_3"));
    }
}
