use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use praetor_core::{now_ms, LogRecord, PageAgent, Supervisor};
use praetor_types::{events, normalize_server_key, BotEvent, EngineStatus};

mod rpc;

pub use rpc::*;

/// Browser-side operations the transport exposes but this process does not
/// implement itself: page lifecycle and cookie bootstrap live with the
/// external page controller.
#[async_trait]
pub trait BrowserControl: Send + Sync {
    async fn toggle(&self, headless: Option<bool>) -> anyhow::Result<Value>;
    async fn status(&self) -> Value;
    async fn open_page(
        &self,
        server_key: &str,
        url: Option<&str>,
    ) -> anyhow::Result<Arc<dyn PageAgent>>;
    async fn close_page(&self, server_key: &str) -> anyhow::Result<()>;
    async fn import_chrome_cookies(&self, host_like: Option<&str>) -> anyhow::Result<Value>;
    async fn set_cookies(&self, server_key: &str, cookies: Value) -> anyhow::Result<()>;
}

/// Default when no browser layer is wired in: every page operation reports
/// unsupported, status says so, and the rest of the surface keeps working.
pub struct NullBrowserControl;

#[async_trait]
impl BrowserControl for NullBrowserControl {
    async fn toggle(&self, _headless: Option<bool>) -> anyhow::Result<Value> {
        anyhow::bail!("browser control is not available in this build")
    }

    async fn status(&self) -> Value {
        json!({"available": false})
    }

    async fn open_page(
        &self,
        _server_key: &str,
        _url: Option<&str>,
    ) -> anyhow::Result<Arc<dyn PageAgent>> {
        anyhow::bail!("browser control is not available in this build")
    }

    async fn close_page(&self, _server_key: &str) -> anyhow::Result<()> {
        anyhow::bail!("browser control is not available in this build")
    }

    async fn import_chrome_cookies(&self, _host_like: Option<&str>) -> anyhow::Result<Value> {
        anyhow::bail!("browser control is not available in this build")
    }

    async fn set_cookies(&self, _server_key: &str, _cookies: Value) -> anyhow::Result<()> {
        anyhow::bail!("browser control is not available in this build")
    }
}

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub browser: Arc<dyn BrowserControl>,
}

fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Resolve the server key from params, falling back to the only registered
/// server when the frontend omits it.
async fn resolve_server_key(state: &AppState, params: &Value) -> Result<String, RpcError> {
    if let Some(key) = param_str(params, "serverKey") {
        let key = normalize_server_key(key);
        if !key.is_empty() {
            return Ok(key);
        }
    }
    let registry = state.supervisor.storage().load_registry().await;
    if registry.servers.len() == 1 {
        return Ok(registry.servers.keys().next().cloned().unwrap_or_default());
    }
    Err(RpcError::handler("serverKey required"))
}

pub async fn handle_request(
    state: &AppState,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    match method {
        "ping" => Ok(json!("pong")),

        "getServers" => {
            let instances = state.supervisor.list_active().await;
            let registry = state.supervisor.storage().load_registry().await;
            Ok(json!({"instances": instances, "registry": registry}))
        }

        "getStatus" => {
            let key = resolve_server_key(state, &params).await?;
            let status = match state.supervisor.get(&key).await {
                Some(instance) => instance.engine.status(),
                None => EngineStatus::stopped(&key),
            };
            Ok(serde_json::to_value(status).map_err(anyhow::Error::from)?)
        }

        "startBot" => {
            let key = resolve_server_key(state, &params).await?;
            let instance = state.supervisor.get_or_create(&key).await;
            if instance.bound_page().await.is_none() {
                let url = param_str(&params, "url");
                let page = state.browser.open_page(&key, url).await?;
                state.supervisor.bind_page(&key, page).await;
            }
            state.supervisor.start(&key).await?;
            Ok(json!({"started": true, "serverKey": key}))
        }

        "stopBot" => {
            let key = resolve_server_key(state, &params).await?;
            state.supervisor.stop(&key).await;
            Ok(json!({"stopped": true, "serverKey": key}))
        }

        "pauseBot" => {
            let key = resolve_server_key(state, &params).await?;
            let instance = state
                .supervisor
                .get(&key)
                .await
                .ok_or_else(|| RpcError::handler(format!("unknown server: {key}")))?;
            let paused = instance.engine.status().lifecycle == praetor_types::Lifecycle::Paused;
            if paused {
                state.supervisor.resume(&key).await;
            } else {
                state.supervisor.pause(&key).await;
            }
            Ok(json!({"paused": !paused, "serverKey": key}))
        }

        "emergencyStop" => {
            let key = param_str(&params, "serverKey").map(normalize_server_key);
            let reason = param_str(&params, "reason").unwrap_or("manual emergency stop");
            state
                .supervisor
                .emergency_stop(key.as_deref(), reason)
                .await;
            Ok(json!({"emergencyStopped": true}))
        }

        "saveConfig" => {
            let key = resolve_server_key(state, &params).await?;
            let config = params
                .get("config")
                .cloned()
                .ok_or_else(|| RpcError::handler("config required"))?;
            let effective = state
                .supervisor
                .config_store()
                .save_patch(&key, &config)
                .await?;
            if let Some(instance) = state.supervisor.get(&key).await {
                instance.engine.reload_config().await;
            }
            Ok(effective)
        }

        "getConfig" => {
            let key = resolve_server_key(state, &params).await?;
            Ok(state.supervisor.config_store().load_value(&key).await?)
        }

        "getLogs" => {
            let level = param_str(&params, "level").map(str::to_string);
            let limit = params
                .get("limit")
                .and_then(Value::as_u64)
                .unwrap_or(200)
                .min(500) as usize;
            let mut logs = state.supervisor.storage().load_logs().await;
            if let Some(level) = level {
                logs.retain(|record| record.level == level);
            }
            if logs.len() > limit {
                logs.drain(0..logs.len() - limit);
            }
            Ok(serde_json::to_value(logs).map_err(anyhow::Error::from)?)
        }

        "clearLogs" => {
            state.supervisor.storage().clear_logs().await?;
            Ok(json!({"cleared": true}))
        }

        "getQueue" => {
            let key = resolve_server_key(state, &params).await?;
            let tasks = match state.supervisor.get(&key).await {
                Some(instance) => instance.engine.queue_tasks(),
                None => Vec::new(),
            };
            Ok(serde_json::to_value(tasks).map_err(anyhow::Error::from)?)
        }

        "clearQueue" => {
            let key = resolve_server_key(state, &params).await?;
            if let Some(instance) = state.supervisor.get(&key).await {
                instance.engine.clear_queue().await;
            }
            Ok(json!({"cleared": true}))
        }

        "getStrategy" => {
            let key = resolve_server_key(state, &params).await?;
            let analysis = state
                .supervisor
                .get(&key)
                .await
                .and_then(|instance| instance.engine.analysis());
            let phase = analysis.as_ref().map(|a| a.phase);
            Ok(json!({"analysis": analysis, "phase": phase}))
        }

        "requestScan" => {
            let key = resolve_server_key(state, &params).await?;
            let instance = state
                .supervisor
                .get(&key)
                .await
                .ok_or_else(|| RpcError::handler(format!("unknown server: {key}")))?;
            instance.engine.request_scan().await;
            Ok(json!({"requested": true}))
        }

        "toggleBrowser" => {
            let headless = params.get("headless").and_then(Value::as_bool);
            Ok(state.browser.toggle(headless).await?)
        }

        "getBrowserStatus" => Ok(state.browser.status().await),

        "openPage" => {
            let key = resolve_server_key(state, &params).await?;
            let url = param_str(&params, "url");
            let page = state.browser.open_page(&key, url).await?;
            state.supervisor.bind_page(&key, page).await;
            Ok(json!({"opened": true, "serverKey": key}))
        }

        "closePage" => {
            let key = resolve_server_key(state, &params).await?;
            state.browser.close_page(&key).await?;
            Ok(json!({"closed": true}))
        }

        "importChromeCookies" => {
            let host_like = param_str(&params, "hostLike");
            Ok(state.browser.import_chrome_cookies(host_like).await?)
        }

        "setCookies" => {
            let key = resolve_server_key(state, &params).await?;
            let cookies = params.get("cookies").cloned().unwrap_or(Value::Null);
            state.browser.set_cookies(&key, cookies).await?;
            Ok(json!({"set": true}))
        }

        "getVillageConfig" => {
            let key = resolve_server_key(state, &params).await?;
            let config = state.supervisor.config_store().load_value(&key).await?;
            Ok(config
                .get("upgradeTargets")
                .cloned()
                .unwrap_or_else(|| json!({})))
        }

        "saveVillageConfig" => {
            let key = resolve_server_key(state, &params).await?;
            let targets = params
                .get("targets")
                .cloned()
                .ok_or_else(|| RpcError::handler("targets required"))?;
            let effective = state
                .supervisor
                .config_store()
                .save_patch(&key, &json!({"upgradeTargets": targets}))
                .await?;
            if let Some(instance) = state.supervisor.get(&key).await {
                instance.engine.reload_config().await;
            }
            Ok(effective
                .get("upgradeTargets")
                .cloned()
                .unwrap_or_else(|| json!({})))
        }

        "getFarmTargets" => {
            let key = resolve_server_key(state, &params).await?;
            let config = state.supervisor.config_store().load_value(&key).await?;
            Ok(config
                .pointer("/farm/targets")
                .cloned()
                .unwrap_or_else(|| json!([])))
        }

        "saveFarmTargets" => {
            let key = resolve_server_key(state, &params).await?;
            let targets = params
                .get("targets")
                .cloned()
                .ok_or_else(|| RpcError::handler("targets required"))?;
            let effective = state
                .supervisor
                .config_store()
                .save_patch(&key, &json!({"farm": {"targets": targets}}))
                .await?;
            if let Some(instance) = state.supervisor.get(&key).await {
                instance.engine.reload_config().await;
            }
            Ok(effective
                .pointer("/farm/targets")
                .cloned()
                .unwrap_or_else(|| json!([])))
        }

        "shutdown" => {
            state.supervisor.stop_all().await;
            Ok(json!({"shuttingDown": true}))
        }

        other => Err(RpcError::method_not_found(other)),
    }
}

/// Map a bus event to its transport frame. Status, game-state, and
/// emergency events keep their own event names; everything else rides
/// inside the generic `botEvent` envelope.
fn frame_for(event: &BotEvent) -> Value {
    match event.name.as_str() {
        events::STATUS_UPDATE => event_frame(events::STATUS_UPDATE, event.data.clone()),
        events::GAME_STATE => event_frame(events::GAME_STATE, event.data.clone()),
        events::EMERGENCY_STOP => event_frame(events::EMERGENCY_STOP, event.data.clone()),
        _ => event_frame(
            "botEvent",
            json!({"name": event.name, "data": event.data, "atMs": event.at_ms}),
        ),
    }
}

fn log_level_for(event: &BotEvent) -> Option<&'static str> {
    match event.name.as_str() {
        events::EMERGENCY_STOP => Some("error"),
        events::TASK_FAILED | events::CROP_CRISIS | events::ATTACK_INCOMING => Some("warn"),
        events::TASK_COMPLETED
        | events::BOT_STARTED
        | events::BOT_STOPPED
        | events::BOT_PAUSED
        | events::BOT_RESUMED
        | events::BOT_REMOVED => Some("info"),
        _ => None,
    }
}

/// Run the transport: line-delimited JSON-RPC requests on stdin, responses
/// and unsolicited events on stdout. Everything else this process prints
/// goes to stderr.
pub async fn serve_stdio(state: AppState) -> anyhow::Result<()> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = out_rx.recv().await {
            let mut line = frame.to_string();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // Mirror bus events onto the transport, with a log line and ring entry
    // for the notable ones.
    let forwarder_state = state.clone();
    let forwarder_tx = out_tx.clone();
    tokio::spawn(async move {
        let mut events_rx = forwarder_state.supervisor.bus().subscribe();
        loop {
            match events_rx.recv().await {
                Ok(event) => {
                    let _ = forwarder_tx.send(frame_for(&event));
                    if let Some(level) = log_level_for(&event) {
                        let record = LogRecord {
                            level: level.to_string(),
                            message: format!("{}: {}", event.name, event.data),
                            at_ms: event.at_ms,
                            server_key: event
                                .data
                                .get("serverKey")
                                .and_then(Value::as_str)
                                .map(String::from),
                        };
                        let _ = forwarder_tx.send(event_frame(
                            "log",
                            serde_json::to_value(&record).unwrap_or(Value::Null),
                        ));
                        if let Err(err) =
                            forwarder_state.supervisor.storage().append_log(record).await
                        {
                            warn!("log ring append failed: {err:#}");
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("event forwarder lagged, dropped {skipped} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let _ = out_tx.send(event_frame("ready", json!({"atMs": now_ms()})));
    info!("transport ready on stdio");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let request: RpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(err) => {
                warn!("unparseable request line: {err}");
                let _ = out_tx.send(parse_error_frame());
                continue;
            }
        };
        let method = request.method.clone();
        let frame = match handle_request(&state, &request.method, request.params).await {
            Ok(result) => response_ok(request.id, result),
            Err(err) => {
                warn!("{method} failed: {err}");
                response_err(request.id, &err)
            }
        };
        let _ = out_tx.send(frame);
        if method == "shutdown" {
            break;
        }
    }

    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
