use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use praetor_types::{
    FarmConfig, FarmCycleOutcome, FarmCycleRecord, FarmState, ListSendResult, RaidReport,
    ReRaidTarget,
};

use crate::bridge::PageBridge;
use crate::navigation::pages;
use crate::now_ms;
use crate::storage::{farm_cycle_key, Storage};

/// Consumer of per-target raid outcomes, used to score targets over time.
/// Injected; the engine ships a no-op default.
#[async_trait]
pub trait FarmIntelligence: Send + Sync {
    async fn record(&self, server_key: &str, report: RaidReport);
}

pub struct NullFarmIntelligence;

#[async_trait]
impl FarmIntelligence for NullFarmIntelligence {
    async fn record(&self, _server_key: &str, _report: RaidReport) {}
}

const TAB_READY_WAIT_MS: u64 = 10_000;

/// Drives one farming cycle as an explicit state machine. The cycle record
/// is persisted after every transition and before every re-raid attempt, so
/// a killed process resumes mid-cycle instead of re-sending everything.
pub struct FarmManager {
    server_key: String,
    storage: Arc<Storage>,
}

impl FarmManager {
    pub fn new(server_key: impl Into<String>, storage: Arc<Storage>) -> Self {
        Self {
            server_key: server_key.into(),
            storage,
        }
    }

    /// Called once on engine start. Resumes a fresh in-flight cycle,
    /// recovers a stale one, and ignores terminal records.
    pub async fn resume_pending(
        &self,
        bridge: &PageBridge,
        intel: &dyn FarmIntelligence,
    ) -> anyhow::Result<Option<FarmCycleOutcome>> {
        let Some(record) = self
            .storage
            .read_json::<FarmCycleRecord>(&farm_cycle_key(&self.server_key))
            .await?
        else {
            return Ok(None);
        };
        if record.state.is_terminal() {
            return Ok(None);
        }
        if record.is_stale(now_ms()) {
            info!(
                "farm cycle for {} stuck in {:?}, recovering",
                self.server_key, record.state
            );
            let mut record = record;
            self.transition(&mut record, FarmState::Recovering).await?;
            return Ok(Some(self.drive(record, bridge, intel).await?));
        }
        info!(
            "resuming farm cycle for {} at {:?}",
            self.server_key, record.state
        );
        Ok(Some(self.drive(record, bridge, intel).await?))
    }

    /// Run a full cycle from scratch.
    pub async fn run_cycle(
        &self,
        bridge: &PageBridge,
        config: &FarmConfig,
        intel: &dyn FarmIntelligence,
    ) -> anyhow::Result<FarmCycleOutcome> {
        let mut record = FarmCycleRecord::fresh(config.clone(), now_ms());
        record.state = FarmState::NavRally;
        self.persist(&record).await?;
        self.drive(record, bridge, intel).await
    }

    async fn drive(
        &self,
        mut record: FarmCycleRecord,
        bridge: &PageBridge,
        intel: &dyn FarmIntelligence,
    ) -> anyhow::Result<FarmCycleOutcome> {
        loop {
            // A step that stopped advancing within the budget is stuck.
            if !matches!(record.state, FarmState::Recovering | FarmState::Failed)
                && record.is_stale(now_ms())
            {
                self.transition(&mut record, FarmState::Recovering).await?;
                continue;
            }
            match record.state {
                FarmState::Idle => {
                    return Ok(self.outcome(&record, true));
                }
                FarmState::Failed => {
                    let outcome = self.outcome(&record, false);
                    self.transition(&mut record, FarmState::Idle).await?;
                    return Ok(outcome);
                }
                FarmState::NavRally => {
                    let next = match self.goto(bridge, pages::RALLY_POINT).await {
                        Ok(()) => FarmState::ClickTab,
                        Err(err) => {
                            warn!("rally point navigation failed: {err:#}");
                            FarmState::Recovering
                        }
                    };
                    self.transition(&mut record, next).await?;
                }
                FarmState::ClickTab => {
                    let next = match bridge.execute("clickFarmListTab", json!({})).await {
                        Ok(response) if response.is_ok() => FarmState::WaitTab,
                        Ok(_) | Err(_) => FarmState::Recovering,
                    };
                    self.transition(&mut record, next).await?;
                }
                FarmState::WaitTab => {
                    // The tab click reloads the page.
                    let next = if bridge.wait_for_ready(TAB_READY_WAIT_MS).await {
                        FarmState::SendLists
                    } else {
                        FarmState::Recovering
                    };
                    self.transition(&mut record, next).await?;
                }
                FarmState::SendLists => {
                    let next = match self.send_lists(&mut record, bridge, intel).await {
                        Ok(()) if record.config.enable_re_raid => FarmState::ScanReRaid,
                        Ok(()) => FarmState::NavHome,
                        Err(err) => {
                            warn!("farm list send failed: {err:#}");
                            FarmState::Recovering
                        }
                    };
                    self.transition(&mut record, next).await?;
                }
                FarmState::ScanReRaid => {
                    let next = match self.scan_re_raid(&mut record, bridge).await {
                        Ok(()) if record.re_raid_targets.is_empty() => FarmState::NavHome,
                        Ok(()) => FarmState::SendReRaid,
                        Err(err) => {
                            warn!("re-raid scan failed: {err:#}");
                            FarmState::Recovering
                        }
                    };
                    self.transition(&mut record, next).await?;
                }
                FarmState::SendReRaid => {
                    let next = match self.send_re_raids(&mut record, bridge, intel).await {
                        Ok(()) => FarmState::NavHome,
                        Err(err) => {
                            warn!("re-raid send failed: {err:#}");
                            FarmState::Recovering
                        }
                    };
                    self.transition(&mut record, next).await?;
                }
                FarmState::NavHome => {
                    let next = match self.goto(bridge, pages::RESOURCES).await {
                        Ok(()) => FarmState::Idle,
                        Err(err) => {
                            warn!("return home failed: {err:#}");
                            FarmState::Recovering
                        }
                    };
                    self.transition(&mut record, next).await?;
                }
                FarmState::Recovering => {
                    // Best effort back to a known page, then close out. A
                    // recovered cycle reports success so the enclosing task
                    // does not burn a retry on it.
                    let recovered = self.goto(bridge, pages::RESOURCES).await.is_ok();
                    let outcome = self.outcome(&record, recovered);
                    let terminal = if recovered {
                        FarmState::Idle
                    } else {
                        FarmState::Failed
                    };
                    self.transition(&mut record, terminal).await?;
                    if !recovered {
                        self.transition(&mut record, FarmState::Idle).await?;
                    }
                    return Ok(outcome);
                }
            }
        }
    }

    async fn goto(&self, bridge: &PageBridge, page: &str) -> anyhow::Result<()> {
        let response = bridge.execute("navigateTo", json!({ "page": page })).await?;
        if !response.is_ok() {
            anyhow::bail!("navigation to {page} refused");
        }
        if !bridge.wait_for_ready(TAB_READY_WAIT_MS).await {
            anyhow::bail!("page agent not ready on {page}");
        }
        Ok(())
    }

    async fn send_lists(
        &self,
        record: &mut FarmCycleRecord,
        bridge: &PageBridge,
        intel: &dyn FarmIntelligence,
    ) -> anyhow::Result<()> {
        if record.config.use_rally_point_farm_list {
            let response = bridge
                .execute(
                    "sendFarmLists",
                    json!({
                        "minLoot": record.config.min_loot,
                        "skipLosses": record.config.skip_losses,
                    }),
                )
                .await?;
            let data = response
                .data()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("farm list send refused"))?;
            record.list_send = Some(ListSendResult {
                sent: data.get("sent").and_then(Value::as_u64).unwrap_or(0) as u32,
                skipped: data.get("skipped").and_then(Value::as_u64).unwrap_or(0) as u32,
            });
            self.feed_intelligence(intel, data.get("slots")).await;
            Ok(())
        } else {
            // Explicit target list: one attack per configured target.
            let mut sent = 0u32;
            let mut skipped = 0u32;
            for target in record.config.targets.clone() {
                let response = bridge
                    .execute(
                        "sendAttack",
                        json!({
                            "x": target.x,
                            "y": target.y,
                            "troopType": target.troop_type,
                            "count": target.count,
                        }),
                    )
                    .await?;
                if response.is_ok() {
                    sent += 1;
                } else {
                    skipped += 1;
                }
            }
            record.list_send = Some(ListSendResult { sent, skipped });
            Ok(())
        }
    }

    async fn scan_re_raid(
        &self,
        record: &mut FarmCycleRecord,
        bridge: &PageBridge,
    ) -> anyhow::Result<()> {
        let response = bridge.execute("scanFarmList", json!({})).await?;
        let data = response
            .data()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("farm list scan refused"))?;
        let slots = data
            .get("slots")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        record.re_raid_targets = slots
            .iter()
            .filter(|slot| slot.get("bountyFull").and_then(Value::as_bool).unwrap_or(false))
            .filter(|slot| {
                !(record.config.skip_losses
                    && slot.get("losses").and_then(Value::as_bool).unwrap_or(false))
            })
            .filter_map(|slot| {
                Some(ReRaidTarget {
                    x: slot.get("x")?.as_i64()? as i32,
                    y: slot.get("y")?.as_i64()? as i32,
                    name: slot.get("name").and_then(Value::as_str).map(String::from),
                })
            })
            .collect();
        record.re_raid_cursor = 0;
        Ok(())
    }

    async fn send_re_raids(
        &self,
        record: &mut FarmCycleRecord,
        bridge: &PageBridge,
        intel: &dyn FarmIntelligence,
    ) -> anyhow::Result<()> {
        while record.re_raid_cursor < record.re_raid_targets.len() {
            // Cursor goes to disk before the attempt: a crash mid-send
            // re-sends this target, never skips it.
            self.persist(record).await?;
            let target = record.re_raid_targets[record.re_raid_cursor].clone();
            let response = bridge
                .execute(
                    "sendAttack",
                    json!({
                        "x": target.x,
                        "y": target.y,
                        "troopType": record.config.re_raid.troop_type,
                        "count": record.config.re_raid.count,
                    }),
                )
                .await?;
            if response.is_ok() {
                record.re_raid_sent += 1;
                intel
                    .record(
                        &self.server_key,
                        RaidReport {
                            x: target.x,
                            y: target.y,
                            loot: 0,
                            bounty_full: true,
                            losses: false,
                            at_ms: now_ms(),
                        },
                    )
                    .await;
            } else {
                record.re_raid_failed += 1;
            }
            record.re_raid_cursor += 1;
            record.last_step_at_ms = now_ms();
            self.persist(record).await?;
        }
        Ok(())
    }

    async fn feed_intelligence(&self, intel: &dyn FarmIntelligence, slots: Option<&Value>) {
        let Some(slots) = slots.and_then(Value::as_array) else {
            return;
        };
        for slot in slots {
            let (Some(x), Some(y)) = (
                slot.get("x").and_then(Value::as_i64),
                slot.get("y").and_then(Value::as_i64),
            ) else {
                continue;
            };
            intel
                .record(
                    &self.server_key,
                    RaidReport {
                        x: x as i32,
                        y: y as i32,
                        loot: slot.get("loot").and_then(Value::as_u64).unwrap_or(0),
                        bounty_full: slot
                            .get("bountyFull")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        losses: slot.get("losses").and_then(Value::as_bool).unwrap_or(false),
                        at_ms: now_ms(),
                    },
                )
                .await;
        }
    }

    async fn transition(
        &self,
        record: &mut FarmCycleRecord,
        next: FarmState,
    ) -> anyhow::Result<()> {
        record.state = next;
        record.last_step_at_ms = now_ms();
        self.persist(record).await
    }

    async fn persist(&self, record: &FarmCycleRecord) -> anyhow::Result<()> {
        self.storage
            .write_json(&farm_cycle_key(&self.server_key), record)
            .await
    }

    fn outcome(&self, record: &FarmCycleRecord, success: bool) -> FarmCycleOutcome {
        let send = record.list_send.unwrap_or_default();
        FarmCycleOutcome {
            success,
            sent: send.sent,
            skipped: send.skipped,
            re_raid_sent: record.re_raid_sent,
            re_raid_failed: record.re_raid_failed,
            duration_ms: now_ms().saturating_sub(record.started_at_ms),
        }
    }
}
