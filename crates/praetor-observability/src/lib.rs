use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Engine,
    Bridge,
    Transport,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Engine => "engine",
            ProcessKind::Bridge => "bridge",
            ProcessKind::Transport => "transport",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: String,
    pub prefix: String,
    pub initialized_at: DateTime<Utc>,
}

/// Structured event fields mirrored into the log stream. Everything is
/// optional except the event name and component so call sites stay terse.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub server_key: Option<&'a str>,
    pub task_id: Option<u64>,
    pub task_kind: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    macro_rules! log_at {
        ($macro:ident) => {
            tracing::$macro!(
                target: "praetor.obs",
                process = process.as_str(),
                component = event.component,
                event = event.event,
                server_key = event.server_key.unwrap_or(""),
                task_id = event.task_id.unwrap_or(0),
                task_kind = event.task_kind.unwrap_or(""),
                status = event.status.unwrap_or(""),
                error_code = event.error_code.unwrap_or(""),
                detail = event.detail.unwrap_or(""),
                "observability_event"
            )
        };
    }
    match level {
        Level::ERROR => log_at!(error),
        Level::WARN => log_at!(warn),
        Level::DEBUG => log_at!(debug),
        Level::TRACE => log_at!(trace),
        _ => log_at!(info),
    }
}

/// Install the global subscriber: human-readable lines on stderr (stdout is
/// reserved for the RPC protocol) plus a daily-rotating JSON file under
/// `logs_dir`. The returned guard must be held for the process lifetime or
/// buffered file lines are lost on exit.
pub fn init_logging(
    logs_dir: &Path,
    process: ProcessKind,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    std::fs::create_dir_all(logs_dir)?;
    let prefix = format!("praetor-{}", process.as_str());
    let appender = tracing_appender::rolling::daily(logs_dir, format!("{prefix}.log"));
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer),
        )
        .try_init()
        .map_err(|err| anyhow::anyhow!("subscriber init failed: {err}"))?;

    Ok((
        guard,
        LoggingInitInfo {
            process: process.as_str().to_string(),
            logs_dir: logs_dir.to_string_lossy().to_string(),
            prefix,
            initialized_at: Utc::now(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_kinds_have_stable_names() {
        assert_eq!(ProcessKind::Engine.as_str(), "engine");
        assert_eq!(ProcessKind::Transport.as_str(), "transport");
    }

    #[test]
    fn emit_event_accepts_sparse_fields() {
        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "cycle.start",
                component: "engine.loop",
                ..ObservabilityEvent::default()
            },
        );
    }
}
