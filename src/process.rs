//! Process liveness lookup.

use std::path::PathBuf;

/// Answers whether a pid names a live process.
pub trait ProcessLookup: Send + Sync {
    fn is_running(&self, pid: u32) -> bool;
}

/// Reads `/proc/<pid>/stat`; zombie and dead tasks count as gone.
#[derive(Debug, Clone)]
pub struct ProcfsLookup {
    root: PathBuf,
}

impl ProcfsLookup {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/proc"))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Default for ProcfsLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLookup for ProcfsLookup {
    fn is_running(&self, pid: u32) -> bool {
        let stat_path = self.root.join(pid.to_string()).join("stat");
        match std::fs::read_to_string(&stat_path) {
            Ok(stat) => match stat_state(&stat) {
                Some('Z') | Some('X') => false,
                Some(_) => true,
                None => {
                    tracing::debug!("unrecognised stat format at {}", stat_path.display());
                    true
                }
            },
            Err(err) => {
                tracing::debug!("process lookup for pid {pid} failed: {err}");
                false
            }
        }
    }
}

// The comm field is parenthesised and may itself contain ") ", so anchor on the last one.
fn stat_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("perfscope-proc-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    fn write_stat(root: &std::path::Path, pid: u32, stat: &str) {
        let dir = root.join(pid.to_string());
        std::fs::create_dir_all(&dir).expect("pid dir");
        std::fs::write(dir.join("stat"), stat).expect("stat");
    }

    #[test]
    fn running_and_zombie_states() {
        let root = fake_proc("states");
        write_stat(&root, 10, "10 (python3) S 1 10 10 0 -1");
        write_stat(&root, 11, "11 (weird) name) R 1 11 11 0 -1");
        write_stat(&root, 12, "12 (defunct) Z 1 12 12 0 -1");
        let lookup = ProcfsLookup::with_root(root.clone());
        assert!(lookup.is_running(10));
        assert!(lookup.is_running(11));
        assert!(!lookup.is_running(12));
        assert!(!lookup.is_running(13));
        let _ = std::fs::remove_dir_all(root);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_process_is_running() {
        assert!(ProcfsLookup::new().is_running(std::process::id()));
    }
}
