use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::keystore::{KeyStore, SERVER_TOKEN_KEY};
use crate::poller;
use crate::router::{self, Router};
use crate::state::StateStore;
use crate::transport::WebOsConnector;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    if let Some(ref command) = std::env::args().nth(1) {
        match command.as_str() {
            "config-init" => return handle_config_init(),
            "key-list" => return handle_key_list(&config),
            "key-forget" => return handle_key_forget(&config),
            "send" => return handle_send(&config).await,
            _ => {}
        }
    }

    let keys = Arc::new(Mutex::new(KeyStore::open(config.keystore.path.as_deref())?));
    let connector = WebOsConnector::new(config.endpoint(), keys.clone());
    let dispatcher = Dispatcher::new(connector);
    let store = Arc::new(StateStore::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let intent_router = Router::new(dispatcher.clone(), store.clone(), config.tv.turn_off);
    let listener = router::spawn_intent_listener(intent_router, store.subscribe(), shutdown_rx.clone());
    let pollers = poller::start(dispatcher, store.clone(), config.poll_interval());

    tracing::info!(
        tv = %config.endpoint().url(),
        polling = pollers.is_some(),
        server = config.server.enable,
        "bridge started"
    );

    let result = if config.server.enable {
        let addr: SocketAddr = format!("127.0.0.1:{}", config.server.port).parse()?;
        let token = server_token(&config, &keys)?;
        tracing::info!(url = %format!("http://{addr}/state?token={token}"), "control surface");

        tokio::select! {
            res = crate::server::start(addr, token, store.clone(), shutdown_rx) => res,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown: ctrl-c");
                Ok(())
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
        tracing::info!("shutdown: ctrl-c");
        Ok(())
    };

    let _ = shutdown_tx.send(true);
    if let Some(pollers) = pollers {
        pollers.shutdown().await;
    }
    let _ = listener.await;
    tracing::info!("bridge stopped");

    result
}

/// Configured token, else the stored one, else a fresh one that gets stored.
fn server_token(
    config: &Config,
    keys: &Mutex<KeyStore>,
) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(token) = config.server.token.clone() {
        return Ok(token);
    }

    let mut keys = keys.lock().map_err(|_| "key store lock poisoned")?;
    if let Some(existing) = keys.retrieve(SERVER_TOKEN_KEY) {
        return Ok(existing.to_string());
    }

    let token = generate_token(32);
    if let Err(err) = keys.store(SERVER_TOKEN_KEY, &token) {
        tracing::warn!(error = %err, "failed to store server token");
    }
    Ok(token)
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn handle_key_list(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let keys = KeyStore::open(config.keystore.path.as_deref())?;
    for key in keys.list_keys() {
        println!("{}", key);
    }
    Ok(())
}

fn handle_key_forget(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let name = std::env::args().nth(2).ok_or("missing key name")?;

    let mut keys = KeyStore::open(config.keystore.path.as_deref())?;
    if keys.remove(&name)? {
        println!("Removed key: {}", name);
    } else {
        println!("No such key: {}", name);
    }
    Ok(())
}

/// One-shot intent: route it, wait for the TV, print what was acknowledged.
async fn handle_send(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let attribute = args.next().ok_or("missing attribute")?;
    let raw = args.next().ok_or("missing value")?;
    let value = parse_cli_value(&raw);

    let keys = Arc::new(Mutex::new(KeyStore::open(config.keystore.path.as_deref())?));
    let dispatcher = Dispatcher::new(WebOsConnector::new(config.endpoint(), keys));
    let store = Arc::new(StateStore::new());
    let router = Router::new(dispatcher, store.clone(), config.tv.turn_off);

    let result = router
        .on_intent(&attribute, value)
        .await
        .ok_or_else(|| format!("no tv command for attribute {attribute}"))?;

    if !result.succeeded {
        let detail = result.error_detail.unwrap_or_else(|| "unknown error".to_string());
        return Err(format!("{attribute} failed: {detail}").into());
    }

    let acked = store.get(&attribute).map(|entry| entry.val).unwrap_or(Value::Null);
    println!("{} = {}", attribute, acked);
    if let Some(payload) = result.payload {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }
    Ok(())
}

/// JSON when it parses (`true`, `5`, `{..}`), the raw text otherwise.
fn parse_cli_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn generate_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
