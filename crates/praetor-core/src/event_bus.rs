use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use praetor_types::BotEvent;

type Callback = Arc<dyn Fn(&BotEvent) -> anyhow::Result<()> + Send + Sync>;

struct Listener {
    id: u64,
    event: String,
    priority: i32,
    once: bool,
    callback: Callback,
}

const HISTORY_LIMIT: usize = 50;

/// In-process pub/sub. Listeners run synchronously on emit in priority
/// order (lower first) and are isolated: one failing listener is logged and
/// the rest still run. A broadcast mirror feeds the transport forwarder,
/// and a small ring of recent events is kept for debugging.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    listeners: RwLock<Vec<Listener>>,
    history: RwLock<VecDeque<BotEvent>>,
    next_id: AtomicU64,
    mirror: broadcast::Sender<BotEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (mirror, _) = broadcast::channel(2048);
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                history: RwLock::new(VecDeque::with_capacity(HISTORY_LIMIT)),
                next_id: AtomicU64::new(1),
                mirror,
            }),
        }
    }

    /// Register a listener for `event`; returns an id usable with `off`.
    /// `"*"` subscribes to everything.
    pub fn on<F>(&self, event: &str, priority: i32, callback: F) -> u64
    where
        F: Fn(&BotEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(event, priority, false, Arc::new(callback))
    }

    pub fn once<F>(&self, event: &str, priority: i32, callback: F) -> u64
    where
        F: Fn(&BotEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(event, priority, true, Arc::new(callback))
    }

    fn register(&self, event: &str, priority: i32, once: bool, callback: Callback) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.inner.listeners.write();
        listeners.push(Listener {
            id,
            event: event.to_string(),
            priority,
            once,
            callback,
        });
        listeners.sort_by_key(|l| l.priority);
        id
    }

    pub fn off(&self, id: u64) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    pub fn remove_all(&self) {
        self.inner.listeners.write().clear();
    }

    /// Deliver to matching listeners in priority order, then mirror to
    /// broadcast subscribers and the history ring.
    pub fn emit(&self, event: BotEvent) {
        let matched: Vec<(u64, bool, Callback)> = {
            let listeners = self.inner.listeners.read();
            listeners
                .iter()
                .filter(|l| l.event == "*" || l.event == event.name)
                .map(|l| (l.id, l.once, Arc::clone(&l.callback)))
                .collect()
        };
        let mut spent = Vec::new();
        for (id, once, callback) in matched {
            if let Err(err) = callback(&event) {
                tracing::warn!("listener for {} failed: {err:#}", event.name);
            }
            if once {
                spent.push(id);
            }
        }
        if !spent.is_empty() {
            let mut listeners = self.inner.listeners.write();
            listeners.retain(|l| !spent.contains(&l.id));
        }

        {
            let mut history = self.inner.history.write();
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        let _ = self.inner.mirror.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.inner.mirror.subscribe()
    }

    pub fn history(&self) -> Vec<BotEvent> {
        self.inner.history.read().iter().cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
