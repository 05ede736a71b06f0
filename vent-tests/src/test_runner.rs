use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use dotenvy::dotenv;
use tokio::sync::mpsc;
use vent::{BlockUnit, Config, Consumer, ConsumerError, DbAdapterKind};

use crate::factory::StaticBlockSource;

const DRAIN_POLL: Duration = Duration::from_millis(25);
// After the source drains, allow this many polls for stragglers before
// shutting the consumer down even if fewer commits arrived than expected.
const DRAINED_GRACE_POLLS: u32 = 80;

pub fn temp_file(name: &str) -> PathBuf {
    env::temp_dir().join(format!("vent-test-{}-{}", process::id(), name))
}

/// A database path unique to this test run, with any stale file removed.
pub fn fresh_db_path(tag: &str) -> String {
    let path = temp_file(&format!("{tag}.db"));
    let _ = fs::remove_file(&path);
    path.display().to_string()
}

/// An empty scratch directory unique to this test run.
pub fn fresh_dir(tag: &str) -> PathBuf {
    let path = temp_file(tag);
    let _ = fs::remove_dir_all(&path);
    fs::create_dir_all(&path).unwrap();
    path
}

pub fn sqlite_config(db_path: &str, spec_file: &Path, abi_file: &Path) -> Config {
    Config::new(DbAdapterKind::Sqlite, db_path)
        .with_spec_file(spec_file)
        .with_abi_file(abi_file)
}

/// Connection string for the optional server-dialect test runs.
pub fn postgres_url() -> Option<String> {
    dotenv().ok();
    env::var("VENT_TEST_POSTGRES_URL").ok()
}

/// Drives the consumer until the source is drained and `expected_commits`
/// units were observed, then shuts it down and returns its result together
/// with the observed units.
pub async fn run_until_drained(
    consumer: &Consumer,
    source: &StaticBlockSource,
    observer: &mut mpsc::Receiver<BlockUnit>,
    expected_commits: usize,
) -> (Result<(), ConsumerError>, Vec<BlockUnit>) {
    let handle = consumer.shutdown_handle();
    let run = consumer.run(source);
    tokio::pin!(run);

    let mut units = Vec::new();
    let mut polls_since_drained = 0u32;
    let mut poll = tokio::time::interval(DRAIN_POLL);

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            maybe_unit = observer.recv() => {
                if let Some(unit) = maybe_unit {
                    units.push(unit);
                }
            }
            _ = poll.tick() => {
                if source.drained() {
                    polls_since_drained += 1;
                    if units.len() >= expected_commits || polls_since_drained > DRAINED_GRACE_POLLS {
                        handle.shutdown();
                    }
                }
            }
        }
    };

    (result, units)
}

/// Removes scratch databases and spec files left behind by earlier runs.
pub fn purge_temp_artifacts() {
    let Ok(entries) = fs::read_dir(env::temp_dir()) else {
        return;
    };

    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with("vent-test-") {
            let _ = fs::remove_file(entry.path());
        }
    }
}
