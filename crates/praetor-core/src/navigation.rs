use std::time::Duration;

use rand::Rng;
use serde_json::json;

use crate::bridge::PageBridge;

/// Page kinds the in-page agent can navigate to.
pub mod pages {
    pub const RESOURCES: &str = "resources";
    pub const VILLAGE: &str = "village";
    pub const RALLY_POINT: &str = "rallyPoint";
    pub const ADVENTURES: &str = "adventures";
    pub const QUESTS: &str = "quests";
    pub const HERO: &str = "hero";
}

const READY_WAIT_MS: u64 = 15_000;
/// How long a dorf1 view is trusted before forcing a reload.
const OVERVIEW_CACHE_MS: u64 = 60_000;

/// Uniform random pause between page actions.
pub async fn human_delay(min_ms: u64, max_ms: u64) {
    let (low, high) = if min_ms <= max_ms {
        (min_ms, max_ms)
    } else {
        (max_ms, min_ms)
    };
    let wait = rand::thread_rng().gen_range(low..=high);
    tokio::time::sleep(Duration::from_millis(wait)).await;
}

/// Navigation with readiness await. Repeated hops to the village overview
/// are skipped while the cached view is fresh; every other page always
/// reloads.
pub struct NavigationManager {
    last_page: Option<String>,
    overview_refreshed_at_ms: u64,
}

impl NavigationManager {
    pub fn new() -> Self {
        Self {
            last_page: None,
            overview_refreshed_at_ms: 0,
        }
    }

    pub fn current_page(&self) -> Option<&str> {
        self.last_page.as_deref()
    }

    /// Drop the cached location, e.g. after an emergency or a failed task
    /// left the page in an unknown state.
    pub fn invalidate(&mut self) {
        self.last_page = None;
        self.overview_refreshed_at_ms = 0;
    }

    pub async fn goto(
        &mut self,
        bridge: &PageBridge,
        page: &str,
        now_ms: u64,
    ) -> anyhow::Result<()> {
        if page == pages::RESOURCES
            && self.last_page.as_deref() == Some(pages::RESOURCES)
            && now_ms.saturating_sub(self.overview_refreshed_at_ms) < OVERVIEW_CACHE_MS
        {
            return Ok(());
        }
        self.last_page = None;
        let response = bridge.execute("navigateTo", json!({ "page": page })).await?;
        if !response.is_ok() {
            anyhow::bail!(
                "navigation to {page} refused: {}",
                response
                    .fail_reason()
                    .map(|r| r.as_str())
                    .unwrap_or("unknown")
            );
        }
        if !bridge.wait_for_ready(READY_WAIT_MS).await {
            anyhow::bail!("page agent not ready after navigating to {page}");
        }
        self.last_page = Some(page.to_string());
        if page == pages::RESOURCES {
            self.overview_refreshed_at_ms = now_ms;
        }
        Ok(())
    }

    /// Back to the resource overview after a task, bypassing the cache so
    /// the next scan sees fresh numbers.
    pub async fn return_home(&mut self, bridge: &PageBridge, now_ms: u64) -> anyhow::Result<()> {
        self.invalidate();
        self.goto(bridge, pages::RESOURCES, now_ms).await
    }
}

impl Default for NavigationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::PageAgent;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::Arc;

    struct CountingAgent {
        dispatches: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl PageAgent for CountingAgent {
        async fn dispatch(&self, message: Value) -> anyhow::Result<Value> {
            self.dispatches.lock().push(message);
            Ok(serde_json::json!({"success": true, "data": {}}))
        }
    }

    fn counting_bridge() -> (Arc<CountingAgent>, PageBridge) {
        let agent = Arc::new(CountingAgent {
            dispatches: Mutex::new(Vec::new()),
        });
        let bridge = PageBridge::new(agent.clone());
        (agent, bridge)
    }

    fn navigations(agent: &CountingAgent) -> usize {
        agent
            .dispatches
            .lock()
            .iter()
            .filter(|m| m["action"] == "navigateTo")
            .count()
    }

    #[tokio::test]
    async fn fresh_overview_navigation_is_cached() {
        let (agent, bridge) = counting_bridge();
        let mut nav = NavigationManager::new();
        nav.goto(&bridge, pages::RESOURCES, 1_000).await.expect("first");
        nav.goto(&bridge, pages::RESOURCES, 2_000).await.expect("cached");
        assert_eq!(navigations(&agent), 1);
        // Past the cache window the overview reloads.
        nav.goto(&bridge, pages::RESOURCES, 1_000 + OVERVIEW_CACHE_MS)
            .await
            .expect("refresh");
        assert_eq!(navigations(&agent), 2);
    }

    #[tokio::test]
    async fn other_pages_always_reload() {
        let (agent, bridge) = counting_bridge();
        let mut nav = NavigationManager::new();
        nav.goto(&bridge, pages::VILLAGE, 0).await.expect("first");
        nav.goto(&bridge, pages::VILLAGE, 1).await.expect("second");
        assert_eq!(navigations(&agent), 2);
        assert_eq!(nav.current_page(), Some(pages::VILLAGE));
    }

    #[tokio::test]
    async fn return_home_bypasses_the_cache() {
        let (agent, bridge) = counting_bridge();
        let mut nav = NavigationManager::new();
        nav.goto(&bridge, pages::RESOURCES, 0).await.expect("go");
        nav.return_home(&bridge, 10).await.expect("home");
        assert_eq!(navigations(&agent), 2);
    }
}
