use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use praetor_types::{BridgeRequest, BridgeResponse};

/// The browser layer: something that can deliver one raw message to the
/// in-page scanner/executor and hand back its reply. Injected so tests and
/// alternative drivers can stand in for a real page.
#[async_trait]
pub trait PageAgent: Send + Sync {
    async fn dispatch(&self, message: Value) -> anyhow::Result<Value>;

    /// Release the underlying page. Default is a no-op for fakes.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub const BASE_TIMEOUT_MS: u64 = 30_000;
pub const TIMEOUT_STEP_MS: u64 = 10_000;
pub const MAX_TIMEOUT_MS: u64 = 60_000;
const READY_POLL_MS: u64 = 800;
const READY_PING_TIMEOUT_MS: u64 = 2_000;

enum Attempt {
    Response(anyhow::Result<Value>),
    TimedOut,
}

/// Reliable request/response channel to the in-page agent. Survives page
/// reloads and background-tab throttling through an adaptive timeout,
/// bounded transient retries, and ghost-callback suppression: a reply that
/// loses the race against its own timeout is counted and discarded instead
/// of resolving anything.
pub struct PageBridge {
    agent: Arc<dyn PageAgent>,
    timeout_ms: AtomicU64,
    next_request_id: AtomicU64,
    ghost_responses: Arc<AtomicU64>,
}

impl PageBridge {
    pub fn new(agent: Arc<dyn PageAgent>) -> Self {
        Self {
            agent,
            timeout_ms: AtomicU64::new(BASE_TIMEOUT_MS),
            next_request_id: AtomicU64::new(1),
            ghost_responses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn current_timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::Relaxed)
    }

    /// Late replies discarded so far; useful for diagnostics and tests.
    pub fn ghost_response_count(&self) -> u64 {
        self.ghost_responses.load(Ordering::SeqCst)
    }

    pub async fn scan(&self) -> anyhow::Result<BridgeResponse> {
        self.send(BridgeRequest::Scan).await
    }

    pub async fn execute(&self, action: &str, params: Value) -> anyhow::Result<BridgeResponse> {
        self.send(BridgeRequest::Execute {
            action: action.to_string(),
            params,
            request_id: 0,
        })
        .await
    }

    /// Send one request. Execute messages get a monotonic request id so the
    /// in-page executor can drop the duplicate if a timeout retry races the
    /// original; the retry reuses the id on purpose.
    pub async fn send(&self, mut request: BridgeRequest) -> anyhow::Result<BridgeResponse> {
        if let BridgeRequest::Execute { request_id, .. } = &mut request {
            if *request_id == 0 {
                *request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            }
        }
        let kind = request.kind();
        let is_execute = matches!(request, BridgeRequest::Execute { .. });
        let payload = serde_json::to_value(&request)?;

        let mut connect_retries = 0u32;
        let mut retried_after_timeout = false;
        loop {
            let timeout_ms = self.timeout_ms.load(Ordering::Relaxed);
            match self.attempt(payload.clone(), timeout_ms).await {
                Attempt::Response(Ok(value)) => {
                    self.timeout_ms.store(BASE_TIMEOUT_MS, Ordering::Relaxed);
                    let response: BridgeResponse = serde_json::from_value(value)
                        .map_err(|err| anyhow::anyhow!("unparseable {kind} reply: {err}"))?;
                    return Ok(response);
                }
                Attempt::Response(Err(err)) => {
                    if is_transient_transport(&err) && connect_retries < 2 {
                        connect_retries += 1;
                        debug!("{kind} transport not ready, retry {connect_retries}: {err:#}");
                        tokio::time::sleep(Duration::from_millis(1_000 * connect_retries as u64))
                            .await;
                        continue;
                    }
                    return Err(err.context(format!("{kind} dispatch failed")));
                }
                Attempt::TimedOut => {
                    self.bump_timeout();
                    warn!(
                        "{kind} timed out after {timeout_ms} ms (next timeout {} ms)",
                        self.current_timeout_ms()
                    );
                    if is_execute && !retried_after_timeout {
                        retried_after_timeout = true;
                        continue;
                    }
                    anyhow::bail!("{kind} timed out after {timeout_ms} ms");
                }
            }
        }
    }

    /// Poll the agent's liveness after a navigation reloaded the page.
    pub async fn wait_for_ready(&self, max_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(max_ms);
        loop {
            let payload = match serde_json::to_value(&BridgeRequest::Ping) {
                Ok(payload) => payload,
                Err(_) => return false,
            };
            if let Attempt::Response(Ok(_)) = self.attempt(payload, READY_PING_TIMEOUT_MS).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(READY_POLL_MS)).await;
        }
    }

    /// Cheap scan + page-kind comparison.
    pub async fn verify_page(&self, expected: &str) -> bool {
        match self.scan().await {
            Ok(response) => response
                .data()
                .and_then(|data| data.get("page"))
                .and_then(|page| page.as_str())
                .is_some_and(|page| page == expected),
            Err(_) => false,
        }
    }

    fn bump_timeout(&self) {
        let current = self.timeout_ms.load(Ordering::Relaxed);
        self.timeout_ms
            .store((current + TIMEOUT_STEP_MS).min(MAX_TIMEOUT_MS), Ordering::Relaxed);
    }

    /// One dispatch raced against the timeout. The settled flag makes the
    /// race single-winner: a reply arriving after the timeout bumps the
    /// ghost counter and goes nowhere.
    async fn attempt(&self, payload: Value, timeout_ms: u64) -> Attempt {
        let settled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();
        let agent = Arc::clone(&self.agent);
        let task_settled = Arc::clone(&settled);
        let ghosts = Arc::clone(&self.ghost_responses);
        tokio::spawn(async move {
            let result = agent.dispatch(payload).await;
            if task_settled.swap(true, Ordering::SeqCst) {
                ghosts.fetch_add(1, Ordering::SeqCst);
                return;
            }
            let _ = tx.send(result);
        });

        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(result)) => Attempt::Response(result),
            Ok(Err(_closed)) => {
                Attempt::Response(Err(anyhow::anyhow!("page agent dropped the request")))
            }
            Err(_elapsed) => {
                settled.store(true, Ordering::SeqCst);
                Attempt::TimedOut
            }
        }
    }
}

fn is_transient_transport(err: &anyhow::Error) -> bool {
    let text = format!("{err:#}").to_ascii_lowercase();
    text.contains("receiving end does not exist") || text.contains("could not establish connection")
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Scripted page agent: each dispatch pops the next step and records
    /// the payload it was handed.
    struct ScriptedAgent {
        steps: Mutex<Vec<Step>>,
        seen: Mutex<Vec<Value>>,
    }

    enum Step {
        Reply(Value),
        ReplyAfterMs(u64, Value),
        Error(String),
    }

    impl ScriptedAgent {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Value> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl PageAgent for ScriptedAgent {
        async fn dispatch(&self, message: Value) -> anyhow::Result<Value> {
            self.seen.lock().push(message);
            let step = {
                let mut steps = self.steps.lock();
                if steps.is_empty() {
                    Step::Reply(json!({"success": true, "data": {}}))
                } else {
                    steps.remove(0)
                }
            };
            match step {
                Step::Reply(value) => Ok(value),
                Step::ReplyAfterMs(delay, value) => {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(value)
                }
                Step::Error(text) => Err(anyhow::anyhow!(text)),
            }
        }
    }

    fn ok_reply() -> Value {
        json!({"success": true, "data": {"page": "resources"}})
    }

    #[tokio::test]
    async fn execute_requests_carry_increasing_ids() {
        let agent = ScriptedAgent::new(vec![Step::Reply(ok_reply()), Step::Reply(ok_reply())]);
        let bridge = PageBridge::new(agent.clone());
        bridge.execute("clickResourceField", json!({"fieldId": 1})).await.expect("first");
        bridge.execute("clickUpgradeButton", json!({})).await.expect("second");
        let seen = agent.seen();
        assert_eq!(seen[0]["requestId"], 1);
        assert_eq!(seen[1]["requestId"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_retry_reuses_the_request_id_and_suppresses_the_ghost() {
        let agent = ScriptedAgent::new(vec![
            // First attempt answers long after the 30s timeout.
            Step::ReplyAfterMs(90_000, ok_reply()),
            Step::Reply(ok_reply()),
        ]);
        let bridge = PageBridge::new(agent.clone());

        let response = bridge.execute("sendFarmList", json!({})).await.expect("send");
        assert!(response.is_ok());

        let seen = agent.seen();
        assert_eq!(seen.len(), 2, "one retry after the timeout");
        assert_eq!(seen[0]["requestId"], seen[1]["requestId"]);

        // Success resets the adaptive timeout even though attempt one bumped it.
        assert_eq!(bridge.current_timeout_ms(), BASE_TIMEOUT_MS);

        // Let the abandoned first attempt finally resolve: it must be
        // swallowed and counted, not applied.
        tokio::time::sleep(Duration::from_millis(120_000)).await;
        assert_eq!(bridge.ghost_response_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_timeouts_grow_the_timeout_to_the_cap() {
        let agent = ScriptedAgent::new(
            (0..8)
                .map(|_| Step::ReplyAfterMs(600_000, ok_reply()))
                .collect(),
        );
        let bridge = PageBridge::new(agent);
        assert!(bridge.scan().await.is_err());
        assert_eq!(bridge.current_timeout_ms(), 40_000);
        assert!(bridge.scan().await.is_err());
        assert_eq!(bridge.current_timeout_ms(), 50_000);
        assert!(bridge.scan().await.is_err());
        assert_eq!(bridge.current_timeout_ms(), MAX_TIMEOUT_MS);
        assert!(bridge.scan().await.is_err());
        assert_eq!(bridge.current_timeout_ms(), MAX_TIMEOUT_MS);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_not_ready_is_retried_with_backoff() {
        let agent = ScriptedAgent::new(vec![
            Step::Error("Could not establish connection. Receiving end does not exist.".into()),
            Step::Error("Could not establish connection. Receiving end does not exist.".into()),
            Step::Reply(ok_reply()),
        ]);
        let bridge = PageBridge::new(agent.clone());
        let response = bridge.scan().await.expect("third attempt lands");
        assert!(response.is_ok());
        assert_eq!(agent.seen().len(), 3);
    }

    #[tokio::test]
    async fn hard_transport_errors_surface_after_two_retries() {
        let agent = ScriptedAgent::new(
            (0..5)
                .map(|_| Step::Error("receiving end does not exist".into()))
                .collect(),
        );
        let bridge = PageBridge::new(agent.clone());
        assert!(bridge.scan().await.is_err());
        assert_eq!(agent.seen().len(), 3, "initial try plus two retries");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_ready_polls_until_the_agent_answers() {
        let agent = ScriptedAgent::new(vec![
            Step::Error("receiving end does not exist".into()),
            Step::Error("receiving end does not exist".into()),
            Step::Reply(json!({"success": true, "data": {"alive": true}})),
        ]);
        let bridge = PageBridge::new(agent.clone());
        assert!(bridge.wait_for_ready(10_000).await);
        assert_eq!(agent.seen().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_ready_gives_up_at_the_deadline() {
        let agent = ScriptedAgent::new(
            (0..50)
                .map(|_| Step::Error("receiving end does not exist".into()))
                .collect(),
        );
        let bridge = PageBridge::new(agent);
        assert!(!bridge.wait_for_ready(3_000).await);
    }

    #[tokio::test]
    async fn verify_page_compares_the_scanned_page_kind() {
        let agent = ScriptedAgent::new(vec![
            Step::Reply(json!({"success": true, "data": {"page": "village"}})),
            Step::Reply(json!({"success": true, "data": {"page": "village"}})),
        ]);
        let bridge = PageBridge::new(agent);
        assert!(bridge.verify_page("village").await);
        assert!(!bridge.verify_page("resources").await);
    }

    #[tokio::test]
    async fn structural_failures_parse_into_typed_reasons() {
        let agent = ScriptedAgent::new(vec![Step::Reply(
            json!({"success": false, "reason": "queue_full", "message": "busy"}),
        )]);
        let bridge = PageBridge::new(agent);
        let response = bridge.execute("clickUpgradeButton", json!({})).await.expect("send");
        assert_eq!(
            response.fail_reason(),
            Some(praetor_types::FailReason::QueueFull)
        );
    }
}
