use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info, warn, Level};

use praetor_observability::{emit_event, ObservabilityEvent, ProcessKind};
use praetor_strategy::{CooldownView, Decision, Phase, StrategyAnalysis};
use praetor_types::{
    events, BotEvent, BridgeResponse, EmergencyRecord, EngineStats, EngineStatus, FailReason,
    GameSnapshot, Lifecycle, PersistedEngineState, Task, TaskKind, TaskProposal,
};

use crate::bridge::{PageAgent, PageBridge};
use crate::config::ConfigStore;
use crate::cooldown::{hopeless_cooldown_ms, slot_key, success_cooldown_ms, CooldownMap};
use crate::event_bus::EventBus;
use crate::farm::{FarmIntelligence, FarmManager};
use crate::hero::HeroManager;
use crate::navigation::{human_delay, pages, NavigationManager};
use crate::now_ms;
use crate::scheduler::Scheduler;
use crate::storage::{state_key, Storage};
use crate::task_queue::TaskQueue;

pub const MAIN_LOOP_TIMER: &str = "main_loop";
pub const HOURLY_RESET_TIMER: &str = "hourly_reset";
const HOUR_MS: u64 = 3_600_000;
/// Consecutive logged-out scans tolerated before pulling the plug.
const NOT_LOGGED_IN_LIMIT: u32 = 5;
/// Re-queue delay after a hero claim unblocked a build.
const REQUEUE_AFTER_CLAIM_MS: u64 = 15_000;

enum ControlMsg {
    Tick,
    ResetHour,
    Pause,
    Resume,
    RequestScan,
    ReloadConfig,
    ClearQueue(oneshot::Sender<()>),
    Emergency {
        reason: String,
        ack: oneshot::Sender<()>,
    },
    Stop(oneshot::Sender<()>),
}

/// Caches the worker keeps current so status queries never have to wait on
/// a busy cycle.
#[derive(Default)]
struct EngineCaches {
    status: parking_lot::RwLock<Option<EngineStatus>>,
    queue: parking_lot::RwLock<Vec<Task>>,
    analysis: parking_lot::RwLock<Option<StrategyAnalysis>>,
    snapshot: parking_lot::RwLock<Option<GameSnapshot>>,
}

struct EngineRuntime {
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    worker: tokio::task::JoinHandle<()>,
}

/// Per-server bot engine. Public operations post control messages to a
/// single worker task; the worker is the only thing that touches the queue,
/// cooldowns, and bridge, which keeps at-most-one task executing per server.
pub struct BotEngine {
    server_key: String,
    storage: Arc<Storage>,
    config_store: ConfigStore,
    bus: EventBus,
    intel: Arc<dyn FarmIntelligence>,
    runtime: Mutex<Option<EngineRuntime>>,
    caches: Arc<EngineCaches>,
}

impl BotEngine {
    pub fn new(
        server_key: impl Into<String>,
        storage: Arc<Storage>,
        config_store: ConfigStore,
        bus: EventBus,
        intel: Arc<dyn FarmIntelligence>,
    ) -> Self {
        Self {
            server_key: server_key.into(),
            storage,
            config_store,
            bus,
            intel,
            runtime: Mutex::new(None),
            caches: Arc::new(EngineCaches::default()),
        }
    }

    pub fn server_key(&self) -> &str {
        &self.server_key
    }

    pub async fn is_running(&self) -> bool {
        let mut runtime = self.runtime.lock().await;
        match runtime.as_ref() {
            Some(active) if !active.worker.is_finished() => true,
            Some(_) => {
                *runtime = None;
                false
            }
            None => false,
        }
    }

    /// Load config, restore persisted state, spawn the worker, and run the
    /// first cycle immediately. A config load failure aborts the start.
    pub async fn start(&self, agent: Arc<dyn PageAgent>) -> anyhow::Result<()> {
        if self.is_running().await {
            warn!("start ignored: {} already running", self.server_key);
            return Ok(());
        }
        let config = self.config_store.load(&self.server_key).await?;
        let persisted: PersistedEngineState = self
            .storage
            .read_json(&state_key(&self.server_key))
            .await?
            .unwrap_or_default();

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let mut worker = Worker {
            server_key: self.server_key.clone(),
            config,
            storage: Arc::clone(&self.storage),
            config_store: self.config_store.clone(),
            bus: self.bus.clone(),
            bridge: Arc::new(PageBridge::new(agent)),
            nav: NavigationManager::new(),
            queue: TaskQueue::restore(persisted.tasks),
            cooldowns: CooldownMap::new(),
            hero: HeroManager::new(),
            farm: FarmManager::new(self.server_key.clone(), Arc::clone(&self.storage)),
            intel: Arc::clone(&self.intel),
            scheduler: Scheduler::new(),
            control_tx: control_tx.clone(),
            stats: persisted.stats,
            actions_this_hour: persisted.actions_this_hour,
            hour_reset_at_ms: persisted.hour_reset_at_ms,
            not_logged_in_streak: 0,
            lifecycle: Lifecycle::Active,
            emergency_reason: None,
            last_phase: None,
            caches: Arc::clone(&self.caches),
        };

        let handle = tokio::spawn(async move {
            worker.run(control_rx).await;
        });
        *self.runtime.lock().await = Some(EngineRuntime {
            control_tx,
            worker: handle,
        });
        self.emit_lifecycle(events::BOT_STARTED);
        Ok(())
    }

    pub async fn pause(&self) {
        self.send(ControlMsg::Pause).await;
        self.emit_lifecycle(events::BOT_PAUSED);
    }

    pub async fn resume(&self) {
        self.send(ControlMsg::Resume).await;
        self.emit_lifecycle(events::BOT_RESUMED);
    }

    pub async fn request_scan(&self) {
        self.send(ControlMsg::RequestScan).await;
    }

    pub async fn reload_config(&self) {
        self.send(ControlMsg::ReloadConfig).await;
    }

    pub async fn clear_queue(&self) {
        let (ack, done) = oneshot::channel();
        if self.send(ControlMsg::ClearQueue(ack)).await {
            let _ = done.await;
        } else {
            self.caches.queue.write().clear();
        }
    }

    /// Stop the worker and wait until it has fully wound down: timers
    /// cancelled, state persisted.
    pub async fn stop(&self) {
        let runtime = self.runtime.lock().await.take();
        let Some(runtime) = runtime else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if runtime.control_tx.send(ControlMsg::Stop(ack)).is_ok() {
            let _ = done.await;
        }
        let _ = runtime.worker.await;
        self.emit_lifecycle(events::BOT_STOPPED);
    }

    /// Record the reason durably, stop the worker, and leave the engine in
    /// a state only a fresh `start` can leave.
    pub async fn emergency_stop(&self, reason: &str) {
        let runtime = self.runtime.lock().await.take();
        if let Some(runtime) = runtime {
            let (ack, done) = oneshot::channel();
            if runtime
                .control_tx
                .send(ControlMsg::Emergency {
                    reason: reason.to_string(),
                    ack,
                })
                .is_ok()
            {
                let _ = done.await;
            }
            let _ = runtime.worker.await;
        } else {
            // Not running: still record the reason.
            let record = EmergencyRecord {
                server_key: self.server_key.clone(),
                reason: reason.to_string(),
                at_ms: now_ms(),
            };
            if let Err(err) = self.storage.write_json(crate::storage::EMERGENCY_KEY, &record).await
            {
                error!("failed to persist emergency reason: {err:#}");
            }
            let mut status = self.status();
            status.lifecycle = Lifecycle::EmergencyStopped;
            status.emergency_stopped = true;
            status.emergency_reason = Some(reason.to_string());
            *self.caches.status.write() = Some(status);
        }
        self.bus.emit(BotEvent::new(
            events::EMERGENCY_STOP,
            json!({"serverKey": self.server_key, "reason": reason}),
        ));
    }

    pub fn status(&self) -> EngineStatus {
        self.caches
            .status
            .read()
            .clone()
            .unwrap_or_else(|| EngineStatus::stopped(&self.server_key))
    }

    pub fn queue_tasks(&self) -> Vec<Task> {
        self.caches.queue.read().clone()
    }

    pub fn analysis(&self) -> Option<StrategyAnalysis> {
        self.caches.analysis.read().clone()
    }

    pub fn last_snapshot(&self) -> Option<GameSnapshot> {
        self.caches.snapshot.read().clone()
    }

    async fn send(&self, msg: ControlMsg) -> bool {
        let runtime = self.runtime.lock().await;
        match runtime.as_ref() {
            Some(active) => active.control_tx.send(msg).is_ok(),
            None => false,
        }
    }

    fn emit_lifecycle(&self, name: &str) {
        self.bus.emit(BotEvent::new(
            name,
            json!({"serverKey": self.server_key}),
        ));
    }
}

/// Bridges the engine's cooldown map into the pure decision pass.
struct CooldownsAt<'a> {
    map: &'a CooldownMap,
    now_ms: u64,
}

impl CooldownView for CooldownsAt<'_> {
    fn is_cooling(&self, key: &str) -> bool {
        self.map.is_cooling(key, self.now_ms)
    }
}

enum TaskOutcome {
    Success,
    /// The page refused for a structural reason; retrying will not help.
    Structural(FailReason, String),
    /// Something transient went wrong; worth a backoff retry.
    Transient(String),
}

struct Worker {
    server_key: String,
    config: praetor_types::BotConfig,
    storage: Arc<Storage>,
    config_store: ConfigStore,
    bus: EventBus,
    bridge: Arc<PageBridge>,
    nav: NavigationManager,
    queue: TaskQueue,
    cooldowns: CooldownMap,
    hero: HeroManager,
    farm: FarmManager,
    intel: Arc<dyn FarmIntelligence>,
    scheduler: Scheduler,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    stats: EngineStats,
    actions_this_hour: u32,
    hour_reset_at_ms: u64,
    not_logged_in_streak: u32,
    lifecycle: Lifecycle,
    emergency_reason: Option<String>,
    last_phase: Option<Phase>,
    caches: Arc<EngineCaches>,
}

impl Worker {
    async fn run(&mut self, mut control_rx: mpsc::UnboundedReceiver<ControlMsg>) {
        let now = now_ms();
        if self.stats.started_at_ms.is_none() {
            self.stats.started_at_ms = Some(now);
        }
        if self.hour_reset_at_ms == 0 || now >= self.hour_reset_at_ms {
            self.actions_this_hour = 0;
            self.hour_reset_at_ms = now + HOUR_MS;
        }
        self.schedule_timers();
        self.publish_status();

        // A cycle interrupted by the previous process finishes its farm
        // run before anything new is attempted.
        match self.farm.resume_pending(&self.bridge, self.intel.as_ref()).await {
            Ok(Some(outcome)) => {
                info!(
                    "resumed farm cycle for {}: sent {} re-raided {}",
                    self.server_key, outcome.sent, outcome.re_raid_sent
                );
                self.stats.farm_raids_sent += (outcome.sent + outcome.re_raid_sent) as u64;
            }
            Ok(None) => {}
            Err(err) => warn!("farm resume failed: {err:#}"),
        }

        // First cycle fires without waiting for the timer.
        let _ = self.control_tx.send(ControlMsg::Tick);

        while let Some(msg) = control_rx.recv().await {
            match msg {
                ControlMsg::Tick => {
                    if self.lifecycle == Lifecycle::Active {
                        self.run_cycle().await;
                        self.publish_status();
                        if self.lifecycle == Lifecycle::EmergencyStopped {
                            break;
                        }
                    }
                }
                ControlMsg::ResetHour => {
                    self.actions_this_hour = 0;
                    self.hour_reset_at_ms = now_ms() + HOUR_MS;
                    self.publish_status();
                }
                ControlMsg::Pause => {
                    if self.lifecycle == Lifecycle::Active {
                        self.lifecycle = Lifecycle::Paused;
                        self.publish_status();
                    }
                }
                ControlMsg::Resume => {
                    if self.lifecycle == Lifecycle::Paused {
                        self.lifecycle = Lifecycle::Active;
                        self.publish_status();
                    }
                }
                ControlMsg::RequestScan => {
                    if self.lifecycle == Lifecycle::Active {
                        if let Some(snapshot) = self.scan().await {
                            self.remember_snapshot(snapshot);
                        }
                        self.publish_status();
                    }
                }
                ControlMsg::ReloadConfig => match self.config_store.load(&self.server_key).await {
                    Ok(config) => {
                        self.config = config;
                        info!("config reloaded for {}", self.server_key);
                    }
                    Err(err) => warn!("config reload failed: {err:#}"),
                },
                ControlMsg::ClearQueue(ack) => {
                    self.queue.clear();
                    self.caches.queue.write().clear();
                    self.publish_status();
                    let _ = ack.send(());
                }
                ControlMsg::Emergency { reason, ack } => {
                    self.enter_emergency(&reason).await;
                    let _ = ack.send(());
                    break;
                }
                ControlMsg::Stop(ack) => {
                    self.wind_down(Lifecycle::Stopped).await;
                    let _ = ack.send(());
                    break;
                }
            }
        }
    }

    fn schedule_timers(&mut self) {
        let interval = self.config.delays.loop_active_ms.max(1_000);
        let jitter = interval / 5;
        let tick_tx = self.control_tx.clone();
        self.scheduler.schedule_cycle(
            MAIN_LOOP_TIMER,
            Arc::new(move || {
                let tx = tick_tx.clone();
                Box::pin(async move {
                    let _ = tx.send(ControlMsg::Tick);
                })
            }),
            interval,
            jitter,
        );
        let reset_tx = self.control_tx.clone();
        self.scheduler.schedule_cycle(
            HOURLY_RESET_TIMER,
            Arc::new(move || {
                let tx = reset_tx.clone();
                Box::pin(async move {
                    let _ = tx.send(ControlMsg::ResetHour);
                })
            }),
            HOUR_MS,
            0,
        );
    }

    /// One pass of the main loop; the heart of the engine.
    async fn run_cycle(&mut self) {
        let now = now_ms();
        if now >= self.hour_reset_at_ms {
            self.actions_this_hour = 0;
            self.hour_reset_at_ms = now + HOUR_MS;
        } else if self.actions_this_hour >= self.config.safety.max_actions_per_hour {
            info!(
                "{}: hourly action budget spent, skipping cycle",
                self.server_key
            );
            return;
        }

        let Some(snapshot) = self.scan().await else {
            return;
        };

        if snapshot.captcha || snapshot.error {
            let reason = if snapshot.captcha {
                "captcha detected"
            } else {
                "page error detected"
            };
            self.remember_snapshot(snapshot);
            self.trigger_emergency(reason).await;
            return;
        }

        if !snapshot.logged_in {
            self.not_logged_in_streak += 1;
            warn!(
                "{} not logged in ({} consecutive)",
                self.server_key, self.not_logged_in_streak
            );
            if self.not_logged_in_streak >= NOT_LOGGED_IN_LIMIT {
                self.trigger_emergency("session lost: repeated logged-out scans")
                    .await;
            }
            return;
        }
        self.not_logged_in_streak = 0;

        self.publish_ambient_events(&snapshot);

        let decision = self.decide(&snapshot, now);
        if let Some(task) = decision
            .tasks
            .iter()
            .find(|t| t.kind == TaskKind::EmergencyStop)
        {
            let reason = task
                .params
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("strategy emergency")
                .to_string();
            self.remember_snapshot(snapshot);
            self.trigger_emergency(&reason).await;
            return;
        }
        *self.caches.analysis.write() = Some(decision.analysis.clone());
        if self.last_phase != Some(decision.phase) {
            if self.last_phase.is_some() {
                self.bus.emit(BotEvent::new(
                    events::PHASE_CHANGED,
                    json!({"serverKey": self.server_key, "phase": decision.phase}),
                ));
            }
            self.last_phase = Some(decision.phase);
        }
        for proposal in decision.tasks {
            self.queue.add(proposal, now);
        }

        // Opportunistic hero top-up when stores run dry.
        if self
            .hero
            .should_proactively_claim(&snapshot, &self.config.hero, now)
        {
            match self
                .hero
                .proactive_claim(&self.bridge, &mut self.nav, &snapshot, &self.config.hero, now)
                .await
            {
                Ok(true) => info!("{}: claimed hero resources", self.server_key),
                Ok(false) => {}
                Err(err) => warn!("hero claim failed: {err:#}"),
            }
        }

        let task = self.queue.take_next(now);
        self.adapt_loop_interval(task.is_some());
        let Some(task) = task else {
            self.remember_snapshot(snapshot);
            self.sync_queue_cache();
            self.persist_state().await;
            return;
        };

        let outcome = self.execute_task(&task).await;
        self.settle_task(&task, outcome, &snapshot).await;
        self.remember_snapshot(snapshot);
        self.sync_queue_cache();
        self.persist_state().await;
    }

    async fn scan(&mut self) -> Option<GameSnapshot> {
        match self.bridge.scan().await {
            Ok(BridgeResponse::Ok { data }) => match serde_json::from_value(data) {
                Ok(snapshot) => {
                    self.bus.emit(BotEvent::new(
                        events::SCAN_COMPLETE,
                        json!({"serverKey": self.server_key}),
                    ));
                    Some(snapshot)
                }
                Err(err) => {
                    warn!("{}: unparseable scan payload: {err}", self.server_key);
                    None
                }
            },
            Ok(BridgeResponse::Fail { reason, message }) => {
                warn!(
                    "{}: scan refused: {reason} {}",
                    self.server_key,
                    message.unwrap_or_default()
                );
                None
            }
            Err(err) => {
                warn!("{}: scan failed: {err:#}", self.server_key);
                None
            }
        }
    }

    fn decide(&self, snapshot: &GameSnapshot, now: u64) -> Decision {
        let cooldowns = CooldownsAt {
            map: &self.cooldowns,
            now_ms: now,
        };
        praetor_strategy::evaluate(snapshot, &self.config, &self.queue, &cooldowns, now)
    }

    fn publish_ambient_events(&self, snapshot: &GameSnapshot) {
        if snapshot.worst_fill_ratio() >= 0.9 {
            self.bus.emit(BotEvent::new(
                events::OVERFLOW_IMMINENT,
                json!({"serverKey": self.server_key, "fillRatio": snapshot.worst_fill_ratio()}),
            ));
        }
        if snapshot.incoming_attacks > 0 {
            self.bus.emit(BotEvent::new(
                events::ATTACK_INCOMING,
                json!({"serverKey": self.server_key, "count": snapshot.incoming_attacks}),
            ));
        }
        if snapshot.claimable_quests > 0 {
            self.bus.emit(BotEvent::new(
                events::QUEST_CLAIMABLE,
                json!({"serverKey": self.server_key, "count": snapshot.claimable_quests}),
            ));
        }
        if snapshot.resource_production.crop < 0 {
            self.bus.emit(BotEvent::new(
                events::CROP_CRISIS,
                json!({"serverKey": self.server_key, "cropPerHour": snapshot.resource_production.crop}),
            ));
        }
        let low: Vec<&str> = praetor_types::ResourceKind::ALL
            .iter()
            .filter(|&&kind| {
                let capacity = snapshot.resource_capacity.for_kind(kind);
                capacity > 0 && snapshot.resources.get(kind) * 10 < capacity
            })
            .map(|kind| kind.as_str())
            .collect();
        if !low.is_empty() {
            self.bus.emit(BotEvent::new(
                events::RESOURCES_LOW,
                json!({"serverKey": self.server_key, "resources": low}),
            ));
        }
        self.bus.emit(BotEvent::new(
            events::GAME_STATE,
            json!({"serverKey": self.server_key, "state": snapshot}),
        ));
    }

    /// Keep latency low while work is pending, conserve scans while idle.
    fn adapt_loop_interval(&mut self, busy: bool) {
        let target = if busy {
            self.config.delays.loop_active_ms
        } else {
            self.config.delays.loop_idle_ms
        };
        if self.scheduler.interval_of(MAIN_LOOP_TIMER) != Some(target) {
            self.scheduler.reschedule(MAIN_LOOP_TIMER, target);
        }
    }

    async fn execute_task(&mut self, task: &Task) -> TaskOutcome {
        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "task.execute",
                component: "engine.loop",
                server_key: Some(&self.server_key),
                task_id: Some(task.id),
                task_kind: Some(task.kind.as_str()),
                status: Some("start"),
                ..ObservabilityEvent::default()
            },
        );
        let result = match task.kind {
            TaskKind::UpgradeResource => self.handle_upgrade_resource(task).await,
            TaskKind::UpgradeBuilding => self.handle_upgrade_building(task).await,
            TaskKind::BuildNew => self.handle_build_new(task).await,
            TaskKind::TrainTroops => self.handle_train_troops(task).await,
            TaskKind::SendFarm => self.handle_send_farm().await,
            TaskKind::SendAttack => self.handle_send_attack(task).await,
            TaskKind::SendHeroAdventure => self.handle_hero_adventure().await,
            TaskKind::ClaimQuest => self.handle_claim_quest().await,
            TaskKind::BuildTraps => self.handle_build_traps(task).await,
            TaskKind::SwitchVillage => self.handle_switch_village(task).await,
            TaskKind::Navigate => self.handle_navigate(task).await,
            TaskKind::EmergencyStop => {
                // Filtered out before queueing; a persisted leftover is inert.
                Ok(TaskOutcome::Success)
            }
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => TaskOutcome::Transient(format!("{err:#}")),
        };

        // Most tasks come back to the resource overview so the next scan
        // reads fresh numbers.
        if matches!(outcome, TaskOutcome::Success) && !task.kind.skips_return_home() {
            if let Err(err) = self.nav.return_home(&self.bridge, now_ms()).await {
                warn!("return home failed: {err:#}");
            }
        }
        outcome
    }

    /// Post-processing shared by every task kind: stats, cooldowns, retry
    /// routing, hero-claim fallback, events.
    async fn settle_task(&mut self, task: &Task, outcome: TaskOutcome, snapshot: &GameSnapshot) {
        let now = now_ms();
        match outcome {
            TaskOutcome::Success => {
                self.queue.mark_completed(task.id);
                self.cooldowns
                    .set_for(task.kind.as_str(), success_cooldown_ms(task.kind), now);
                self.stats.tasks_completed += 1;
                self.stats.last_action_at_ms = Some(now);
                self.actions_this_hour += 1;
                // Farm-cycle raid totals are tracked by the farm handler;
                // this covers standalone attacks.
                if task.kind == TaskKind::SendAttack {
                    self.stats.farm_raids_sent += 1;
                }
                self.bus.emit(BotEvent::new(
                    events::TASK_COMPLETED,
                    json!({"serverKey": self.server_key, "taskId": task.id, "type": task.kind}),
                ));
            }
            TaskOutcome::Structural(reason, message) => {
                self.queue
                    .mark_failed_terminal(task.id, &format!("{reason}: {message}"));
                self.stats.tasks_failed += 1;
                let cooldown = hopeless_cooldown_ms(reason);
                match task_slot(task) {
                    Some(slot) => {
                        self.cooldowns
                            .set_for(slot_key(task.kind, slot), cooldown, now)
                    }
                    None => self.cooldowns.set_for(task.kind.as_str(), cooldown, now),
                }
                self.bus.emit(BotEvent::new(
                    events::TASK_FAILED,
                    json!({
                        "serverKey": self.server_key,
                        "taskId": task.id,
                        "type": task.kind,
                        "reason": reason,
                    }),
                ));
                if reason == FailReason::InsufficientResources && task.kind.is_build_like() {
                    self.try_hero_rescue(task, snapshot, now).await;
                }
            }
            TaskOutcome::Transient(message) => {
                let terminal = self.queue.mark_failed(task.id, &message, now);
                if terminal {
                    self.stats.tasks_failed += 1;
                    self.bus.emit(BotEvent::new(
                        events::TASK_FAILED,
                        json!({
                            "serverKey": self.server_key,
                            "taskId": task.id,
                            "type": task.kind,
                            "reason": "retries_exhausted",
                            "error": message,
                        }),
                    ));
                }
            }
        }
    }

    /// A build failed on missing resources: try emptying hero crates and,
    /// if anything was claimed, give the same task one more shot shortly.
    async fn try_hero_rescue(&mut self, task: &Task, snapshot: &GameSnapshot, now: u64) {
        let claimed = match self
            .hero
            .try_claim_for_task(&self.bridge, &mut self.nav, task, snapshot, now)
            .await
        {
            Ok(claimed) => claimed,
            Err(err) => {
                warn!("hero rescue failed: {err:#}");
                false
            }
        };
        if !claimed {
            return;
        }
        info!(
            "{}: hero crates claimed, re-queueing {} #{}",
            self.server_key, task.kind, task.id
        );
        self.queue.add(
            TaskProposal {
                kind: task.kind,
                params: task.params.clone(),
                priority: task.priority,
                village_id: task.village_id,
                scheduled_for: Some(now + REQUEUE_AFTER_CLAIM_MS),
            },
            now,
        );
    }

    // ── Handlers ────────────────────────────────────────────────────

    async fn prepare_page(&mut self, page: &str) -> anyhow::Result<()> {
        let was_cached = self.nav.current_page() == Some(page);
        self.nav.goto(&self.bridge, page, now_ms()).await?;
        human_delay(
            self.config.delays.min_action_delay_ms,
            self.config.delays.max_action_delay_ms,
        )
        .await;
        if was_cached && !self.bridge.verify_page(page).await {
            self.nav.invalidate();
            anyhow::bail!("page verification failed for {page}");
        }
        Ok(())
    }

    fn classify(&self, response: BridgeResponse) -> TaskOutcome {
        match response {
            BridgeResponse::Ok { .. } => TaskOutcome::Success,
            BridgeResponse::Fail { reason, message } => {
                let message = message.unwrap_or_default();
                if reason.is_hopeless() {
                    TaskOutcome::Structural(reason, message)
                } else {
                    TaskOutcome::Transient(format!("{reason}: {message}"))
                }
            }
        }
    }

    async fn handle_upgrade_resource(&mut self, task: &Task) -> anyhow::Result<TaskOutcome> {
        self.prepare_page(pages::RESOURCES).await?;
        let field_id = task.params.get("fieldId").cloned().unwrap_or(Value::Null);
        let response = self
            .bridge
            .execute("clickResourceField", json!({ "fieldId": field_id }))
            .await?;
        if !response.is_ok() {
            return Ok(self.classify(response));
        }
        let response = self.bridge.execute("clickUpgradeButton", json!({})).await?;
        Ok(self.classify(response))
    }

    async fn handle_upgrade_building(&mut self, task: &Task) -> anyhow::Result<TaskOutcome> {
        self.prepare_page(pages::VILLAGE).await?;
        let slot = task.params.get("slot").cloned().unwrap_or(Value::Null);
        let response = self
            .bridge
            .execute("clickBuildingSlot", json!({ "slot": slot }))
            .await?;
        if !response.is_ok() {
            return Ok(self.classify(response));
        }
        let response = self.bridge.execute("clickUpgradeButton", json!({})).await?;
        Ok(self.classify(response))
    }

    /// New constructions hide behind category tabs; when the first attempt
    /// reports the building is not on the open tab, walk the tabs and retry.
    async fn handle_build_new(&mut self, task: &Task) -> anyhow::Result<TaskOutcome> {
        self.prepare_page(pages::VILLAGE).await?;
        let slot = task.params.get("slot").cloned().unwrap_or(Value::Null);
        let gid = task.params.get("gid").cloned().unwrap_or(Value::Null);
        let response = self
            .bridge
            .execute("openEmptySlot", json!({ "slot": slot }))
            .await?;
        if !response.is_ok() {
            return Ok(self.classify(response));
        }
        let mut response = self
            .bridge
            .execute("selectBuilding", json!({ "gid": gid }))
            .await?;
        let mut tab = 1u32;
        while response.fail_reason() == Some(FailReason::BuildingNotInTab) && tab <= 2 {
            let clicked = self
                .bridge
                .execute("clickBuildingTab", json!({ "tab": tab }))
                .await?;
            if !clicked.is_ok() {
                return Ok(self.classify(clicked));
            }
            // Each tab click reloads the page.
            if !self.bridge.wait_for_ready(10_000).await {
                anyhow::bail!("page not ready after construction tab {tab}");
            }
            response = self
                .bridge
                .execute("selectBuilding", json!({ "gid": gid }))
                .await?;
            tab += 1;
        }
        if response.fail_reason() == Some(FailReason::BuildingNotInTab) {
            return Ok(TaskOutcome::Structural(
                FailReason::BuildingNotAvailable,
                "building absent from every construction tab".to_string(),
            ));
        }
        Ok(self.classify(response))
    }

    async fn handle_train_troops(&mut self, task: &Task) -> anyhow::Result<TaskOutcome> {
        self.prepare_page(pages::VILLAGE).await?;
        let building = task.params.get("buildingGid").cloned().unwrap_or(Value::Null);
        let response = self
            .bridge
            .execute("openBuilding", json!({ "gid": building }))
            .await?;
        if !response.is_ok() {
            return Ok(self.classify(response));
        }
        if !self.bridge.wait_for_ready(10_000).await {
            anyhow::bail!("training building page not ready");
        }
        let response = self
            .bridge
            .execute(
                "trainTroops",
                json!({
                    "unit": task.params.get("unit").cloned().unwrap_or(Value::Null),
                    "count": task.params.get("count").cloned().unwrap_or(Value::Null),
                }),
            )
            .await?;
        Ok(self.classify(response))
    }

    async fn handle_send_farm(&mut self) -> anyhow::Result<TaskOutcome> {
        human_delay(
            self.config.delays.min_action_delay_ms,
            self.config.delays.max_action_delay_ms,
        )
        .await;
        let outcome = self
            .farm
            .run_cycle(&self.bridge, &self.config.farm, self.intel.as_ref())
            .await?;
        self.nav.invalidate();
        if outcome.success {
            self.stats.farm_raids_sent += (outcome.sent + outcome.re_raid_sent) as u64;
            Ok(TaskOutcome::Success)
        } else {
            Ok(TaskOutcome::Transient(format!(
                "farm cycle failed after {} ms",
                outcome.duration_ms
            )))
        }
    }

    async fn handle_send_attack(&mut self, task: &Task) -> anyhow::Result<TaskOutcome> {
        self.prepare_page(pages::RALLY_POINT).await?;
        let response = self.bridge.execute("sendAttack", task.params.clone()).await?;
        Ok(self.classify(response))
    }

    async fn handle_hero_adventure(&mut self) -> anyhow::Result<TaskOutcome> {
        self.prepare_page(pages::ADVENTURES).await?;
        let response = self.bridge.execute("sendHeroAdventure", json!({})).await?;
        Ok(self.classify(response))
    }

    async fn handle_claim_quest(&mut self) -> anyhow::Result<TaskOutcome> {
        self.prepare_page(pages::QUESTS).await?;
        let response = self.bridge.execute("claimQuest", json!({})).await?;
        Ok(self.classify(response))
    }

    async fn handle_build_traps(&mut self, task: &Task) -> anyhow::Result<TaskOutcome> {
        self.prepare_page(pages::VILLAGE).await?;
        let slot = task.params.get("slot").cloned().unwrap_or(Value::Null);
        let response = self
            .bridge
            .execute("buildTraps", json!({ "slot": slot }))
            .await?;
        Ok(self.classify(response))
    }

    async fn handle_switch_village(&mut self, task: &Task) -> anyhow::Result<TaskOutcome> {
        let village = task.params.get("villageId").cloned().unwrap_or(Value::Null);
        let response = self
            .bridge
            .execute("switchVillage", json!({ "villageId": village }))
            .await?;
        self.nav.invalidate();
        if response.is_ok() && !self.bridge.wait_for_ready(10_000).await {
            anyhow::bail!("page not ready after village switch");
        }
        Ok(self.classify(response))
    }

    async fn handle_navigate(&mut self, task: &Task) -> anyhow::Result<TaskOutcome> {
        let page = task
            .params
            .get("page")
            .and_then(Value::as_str)
            .unwrap_or(pages::RESOURCES)
            .to_string();
        self.nav.goto(&self.bridge, &page, now_ms()).await?;
        Ok(TaskOutcome::Success)
    }

    // ── Lifecycle internals ─────────────────────────────────────────

    async fn trigger_emergency(&mut self, reason: &str) {
        self.enter_emergency(reason).await;
        self.bus.emit(BotEvent::new(
            events::EMERGENCY_STOP,
            json!({"serverKey": self.server_key, "reason": reason}),
        ));
    }

    async fn enter_emergency(&mut self, reason: &str) {
        error!("{}: emergency stop: {reason}", self.server_key);
        emit_event(
            Level::ERROR,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "engine.emergency_stop",
                component: "engine.loop",
                server_key: Some(&self.server_key),
                detail: Some(reason),
                ..ObservabilityEvent::default()
            },
        );
        self.emergency_reason = Some(reason.to_string());
        let record = EmergencyRecord {
            server_key: self.server_key.clone(),
            reason: reason.to_string(),
            at_ms: now_ms(),
        };
        if let Err(err) = self
            .storage
            .write_json(crate::storage::EMERGENCY_KEY, &record)
            .await
        {
            error!("failed to persist emergency reason: {err:#}");
        }
        self.wind_down(Lifecycle::EmergencyStopped).await;
    }

    /// Shared by stop and emergency stop: timers released, state persisted.
    async fn wind_down(&mut self, terminal: Lifecycle) {
        self.scheduler.stop().await;
        self.lifecycle = terminal;
        self.persist_state().await;
        self.sync_queue_cache();
        self.publish_status();
    }

    async fn persist_state(&self) {
        let state = PersistedEngineState {
            stats: self.stats,
            actions_this_hour: self.actions_this_hour,
            hour_reset_at_ms: self.hour_reset_at_ms,
            tasks: self.queue.get_all().to_vec(),
        };
        if let Err(err) = self
            .storage
            .write_json(&state_key(&self.server_key), &state)
            .await
        {
            error!("failed to persist engine state: {err:#}");
        }
    }

    fn remember_snapshot(&self, snapshot: GameSnapshot) {
        *self.caches.snapshot.write() = Some(snapshot);
    }

    fn sync_queue_cache(&self) {
        *self.caches.queue.write() = self.queue.get_all().to_vec();
    }

    fn publish_status(&self) {
        let status = EngineStatus {
            server_key: self.server_key.clone(),
            lifecycle: self.lifecycle,
            stats: self.stats,
            actions_this_hour: self.actions_this_hour,
            hour_reset_at_ms: self.hour_reset_at_ms,
            queue_depth: self.queue.pending_count(),
            cooldown_count: self.cooldowns.len(),
            next_action_at_ms: self.queue.next_due_at(),
            emergency_stopped: self.lifecycle == Lifecycle::EmergencyStopped,
            emergency_reason: self.emergency_reason.clone(),
        };
        self.bus.emit(BotEvent::new(
            events::STATUS_UPDATE,
            json!({"serverKey": self.server_key, "status": status}),
        ));
        *self.caches.status.write() = Some(status);
    }
}

fn task_slot(task: &Task) -> Option<u64> {
    task.params
        .get("slot")
        .or_else(|| task.params.get("fieldId"))
        .and_then(Value::as_u64)
}
