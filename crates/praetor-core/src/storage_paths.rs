use std::path::PathBuf;

/// Resolved locations for everything praetor persists on one machine.
#[derive(Debug, Clone)]
pub struct SharedPaths {
    pub root: PathBuf,
    pub storage_dir: PathBuf,
    pub logs_dir: PathBuf,
}

/// `PRAETOR_STATE_DIR` overrides the platform data dir; the fallback keeps
/// working in containers without XDG dirs.
pub fn resolve_shared_paths() -> SharedPaths {
    let root = resolve_state_root();
    SharedPaths {
        storage_dir: root.join("storage"),
        logs_dir: root.join("logs"),
        root,
    }
}

fn resolve_state_root() -> PathBuf {
    if let Ok(dir) = std::env::var("PRAETOR_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("praetor");
    }
    PathBuf::from(".praetor")
}

/// Storage keys become file names; anything outside `[A-Za-z0-9_-]` is
/// flattened to `_` so hostnames with dots stay filesystem-safe.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_keys_become_flat_file_names() {
        assert_eq!(
            sanitize_key("bot_config__ts1.travian.com"),
            "bot_config__ts1_travian_com"
        );
        assert_eq!(sanitize_key("plain_key-2"), "plain_key-2");
    }

    #[test]
    fn env_override_wins() {
        std::env::set_var("PRAETOR_STATE_DIR", "/tmp/praetor-test-root");
        let paths = resolve_shared_paths();
        assert_eq!(paths.root, PathBuf::from("/tmp/praetor-test-root"));
        assert!(paths.storage_dir.ends_with("storage"));
        std::env::remove_var("PRAETOR_STATE_DIR");
    }
}
