use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use praetor_core::{
    BotEngine, ConfigStore, EventBus, NullFarmIntelligence, PageAgent, Storage,
};
use praetor_types::{Lifecycle, TaskKind, TaskStatus};

/// Programmable page: one scan payload, per-action reply scripts, and a
/// transcript of everything the engine dispatched.
struct ScenarioPage {
    scan_data: Mutex<Value>,
    action_scripts: Mutex<HashMap<String, Vec<Value>>>,
    transcript: Mutex<Vec<Value>>,
}

impl ScenarioPage {
    fn new(scan_data: Value) -> Arc<Self> {
        Arc::new(Self {
            scan_data: Mutex::new(scan_data),
            action_scripts: Mutex::new(HashMap::new()),
            transcript: Mutex::new(Vec::new()),
        })
    }

    fn script_action(&self, action: &str, replies: Vec<Value>) {
        self.action_scripts
            .lock()
            .insert(action.to_string(), replies);
    }

    fn set_scan(&self, data: Value) {
        *self.scan_data.lock() = data;
    }

    fn scan_count(&self) -> usize {
        self.transcript
            .lock()
            .iter()
            .filter(|m| m["type"] == "SCAN")
            .count()
    }

    fn executed_actions(&self) -> Vec<String> {
        self.transcript
            .lock()
            .iter()
            .filter(|m| m["type"] == "EXECUTE")
            .filter_map(|m| m["action"].as_str().map(String::from))
            .collect()
    }

    fn execute_count(&self) -> usize {
        self.transcript
            .lock()
            .iter()
            .filter(|m| m["type"] == "EXECUTE")
            .count()
    }
}

#[async_trait]
impl PageAgent for ScenarioPage {
    async fn dispatch(&self, message: Value) -> anyhow::Result<Value> {
        self.transcript.lock().push(message.clone());
        match message["type"].as_str() {
            Some("SCAN") => Ok(json!({"success": true, "data": self.scan_data.lock().clone()})),
            Some("EXECUTE") => {
                let action = message["action"].as_str().unwrap_or("").to_string();
                let mut scripts = self.action_scripts.lock();
                if let Some(replies) = scripts.get_mut(&action) {
                    if !replies.is_empty() {
                        return Ok(replies.remove(0));
                    }
                }
                Ok(json!({"success": true, "data": {}}))
            }
            _ => Ok(json!({"success": true, "data": {"alive": true}})),
        }
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    engine: BotEngine,
    storage: Arc<Storage>,
}

async fn harness(server_key: &str, config_patch: Value) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(Storage::new(dir.path()).await.expect("storage"));
    let config_store = ConfigStore::new(Arc::clone(&storage));
    config_store
        .save_patch(server_key, &config_patch)
        .await
        .expect("config");
    let engine = BotEngine::new(
        server_key,
        Arc::clone(&storage),
        config_store,
        EventBus::new(),
        Arc::new(NullFarmIntelligence),
    );
    Harness {
        _dir: dir,
        engine,
        storage,
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

fn fast_delays() -> Value {
    json!({"minActionDelayMs": 0, "maxActionDelayMs": 1})
}

fn base_scan() -> Value {
    json!({
        "page": "resources",
        "loggedIn": true,
        "resources": {"wood": 2000, "clay": 2000, "iron": 2000, "crop": 2000},
        "resourceCapacity": {"warehouse": 8000, "granary": 8000},
        "resourceProduction": {"wood": 50, "clay": 50, "iron": 50, "crop": 50},
        "resourceFields": [
            {"id": 1, "type": "wood", "level": 1}
        ],
        "buildings": [],
        "constructionQueue": {"count": 0, "maxCount": 1, "items": []}
    })
}

#[tokio::test]
async fn cold_start_runs_one_cycle_and_one_upgrade() {
    let harness = harness(
        "s1.example.com",
        json!({
            "delays": fast_delays(),
            "upgradeTargets": {"1": {"enabled": true, "targetLevel": 2}},
            "autoHeroAdventure": false,
            "autoClaimQuests": false
        }),
    )
    .await;
    let page = ScenarioPage::new(base_scan());
    harness.engine.start(page.clone()).await.expect("start");

    wait_until("first task completion", || {
        harness.engine.status().stats.tasks_completed == 1
    })
    .await;

    assert_eq!(page.scan_count(), 1, "exactly one scan in the first cycle");
    assert_eq!(
        page.executed_actions(),
        vec!["navigateTo", "clickResourceField", "clickUpgradeButton"]
    );
    let status = harness.engine.status();
    assert_eq!(status.actions_this_hour, 1);
    assert_eq!(status.cooldown_count, 1, "upgrade_resource cooldown set");

    // The completed task survives in the queue tail and in persisted state.
    let tasks = harness.engine.queue_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].kind, TaskKind::UpgradeResource);
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    let persisted: praetor_types::PersistedEngineState = harness
        .storage
        .read_json(&praetor_core::state_key("s1.example.com"))
        .await
        .expect("read")
        .expect("state persisted");
    assert_eq!(persisted.stats.tasks_completed, 1);

    harness.engine.stop().await;
}

#[tokio::test]
async fn hourly_rate_limit_short_circuits_before_the_scan() {
    let harness = harness(
        "s2.example.com",
        json!({
            "delays": {"minActionDelayMs": 0, "maxActionDelayMs": 1,
                        "loopActiveMs": 300, "loopIdleMs": 400},
            "safety": {"maxActionsPerHour": 2},
            "autoHeroAdventure": false,
            "autoClaimQuests": true
        }),
    )
    .await;
    // Two upgradeable things plus a claimable quest keep work pending past
    // the budget.
    let scan = json!({
        "page": "resources",
        "loggedIn": true,
        "resources": {"wood": 9000, "clay": 9000, "iron": 9000, "crop": 9000},
        "resourceCapacity": {"warehouse": 20000, "granary": 20000},
        "resourceFields": [
            {"id": 1, "type": "wood", "level": 1},
            {"id": 2, "type": "clay", "level": 1}
        ],
        "buildings": [
            {"slot": 26, "id": 15, "level": 3}
        ],
        "claimableQuests": 2,
        "constructionQueue": {"count": 0, "maxCount": 1, "items": []}
    });
    let page = ScenarioPage::new(scan);
    harness.engine.start(page.clone()).await.expect("start");

    wait_until("budget spent", || {
        harness.engine.status().stats.tasks_completed == 2
    })
    .await;
    wait_until("rate limit reached", || {
        harness.engine.status().actions_this_hour == 2
    })
    .await;

    // Give the loop a few more ticks: the scan counter must freeze because
    // the cycle bails out before scanning.
    let scans_at_budget = page.scan_count();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(
        page.scan_count(),
        scans_at_budget,
        "rate-limited cycles must not scan"
    );
    assert_eq!(harness.engine.status().stats.tasks_completed, 2);

    harness.engine.stop().await;
}

#[tokio::test]
async fn insufficient_resources_triggers_hero_claim_and_requeue() {
    let harness = harness(
        "s4.example.com",
        json!({
            "delays": fast_delays(),
            "autoUpgradeResources": false,
            "autoHeroAdventure": false,
            "autoClaimQuests": false
        }),
    )
    .await;
    let scan = json!({
        "page": "resources",
        "loggedIn": true,
        "resources": {"wood": 50, "clay": 50, "iron": 50, "crop": 50},
        "resourceCapacity": {"warehouse": 8000, "granary": 8000},
        "resourceFields": [],
        "buildings": [
            {"slot": 26, "id": 15, "level": 3}
        ],
        "hero": {"isHome": true, "health": 100},
        "constructionQueue": {"count": 0, "maxCount": 1, "items": []}
    });
    let page = ScenarioPage::new(scan);
    page.script_action(
        "clickUpgradeButton",
        vec![json!({"success": false, "reason": "insufficient_resources", "message": "need more wood"})],
    );
    harness.engine.start(page.clone()).await.expect("start");

    wait_until("terminal failure recorded", || {
        harness.engine.status().stats.tasks_failed == 1
    })
    .await;
    wait_until("hero claim dispatched", || {
        page.executed_actions()
            .iter()
            .any(|a| a == "claimHeroResources")
    })
    .await;

    // The same upgrade is queued again, deferred by roughly 15 seconds.
    wait_until("requeued build", || {
        harness
            .engine
            .queue_tasks()
            .iter()
            .any(|t| t.kind == TaskKind::UpgradeBuilding && t.status == TaskStatus::Pending)
    })
    .await;
    let tasks = harness.engine.queue_tasks();
    let requeued = tasks
        .iter()
        .find(|t| t.kind == TaskKind::UpgradeBuilding && t.status == TaskStatus::Pending)
        .expect("requeued task");
    assert!(requeued.scheduled_for.is_some());

    harness.engine.stop().await;
}

#[tokio::test]
async fn captcha_emergency_stops_the_engine_for_good() {
    let harness = harness(
        "s6.example.com",
        json!({"delays": {"minActionDelayMs": 0, "maxActionDelayMs": 1,
                           "loopActiveMs": 300, "loopIdleMs": 300}}),
    )
    .await;
    let mut scan = base_scan();
    scan["captcha"] = json!(true);
    let page = ScenarioPage::new(scan);
    harness.engine.start(page.clone()).await.expect("start");

    wait_until("emergency stop", || {
        harness.engine.status().emergency_stopped
    })
    .await;

    let status = harness.engine.status();
    assert_eq!(status.lifecycle, Lifecycle::EmergencyStopped);
    assert!(status
        .emergency_reason
        .as_deref()
        .is_some_and(|r| r.contains("captcha")));

    // The reason is durable across restarts.
    let record: praetor_types::EmergencyRecord = harness
        .storage
        .read_json("bot_emergency_stop")
        .await
        .expect("read")
        .expect("record");
    assert!(record.reason.contains("captcha"));

    // No EXECUTE ever went out, and none may go out now that the worker is
    // gone: the page sees scans only.
    assert_eq!(page.execute_count(), 0);
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(page.execute_count(), 0);
    assert!(!harness.engine.is_running().await);

    // A fresh start clears the state.
    page.set_scan(base_scan());
    harness.engine.start(page.clone()).await.expect("restart");
    wait_until("running again", || {
        harness.engine.status().lifecycle == Lifecycle::Active
    })
    .await;
    harness.engine.stop().await;
}

#[tokio::test]
async fn pause_skips_cycles_and_resume_recovers() {
    let harness = harness(
        "pause.example.com",
        json!({"delays": {"minActionDelayMs": 0, "maxActionDelayMs": 1,
                           "loopActiveMs": 200, "loopIdleMs": 200},
                "autoUpgradeResources": false,
                "autoUpgradeBuildings": false,
                "autoHeroAdventure": false,
                "autoClaimQuests": false}),
    )
    .await;
    let page = ScenarioPage::new(base_scan());
    harness.engine.start(page.clone()).await.expect("start");
    wait_until("first scan", || page.scan_count() >= 1).await;

    harness.engine.pause().await;
    wait_until("paused", || {
        harness.engine.status().lifecycle == Lifecycle::Paused
    })
    .await;
    let frozen = page.scan_count();
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(page.scan_count(), frozen, "paused loop must not scan");

    harness.engine.resume().await;
    wait_until("scanning again", || page.scan_count() > frozen).await;
    harness.engine.stop().await;
}
