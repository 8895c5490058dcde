//! Append-only outputs and the dedup ledger that makes reruns resumable.

use super::instance::Instance;
use crate::collect::{ledger_path, superset_path};
use crate::{HashSet, Result};
use camino::Utf8Path;
use ohno::IntoAppError;
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use tokio::sync::Mutex;

const LOG_TARGET: &str = "    ledger";

#[derive(Deserialize)]
struct RecordedId {
    instance_id: String,
}

#[derive(Debug)]
struct LedgerState {
    emitted: HashSet<String>,
    fetched: HashSet<String>,
    claimed: HashSet<String>,
    superset: File,
    with_tests: File,
    fetch_log: File,
}

/// Owns the three append-only files of a harvest and the ids already recorded in them.
///
/// `<output>.all` receives every valid instance, `<output>` only those with a test
/// patch, and `successful_requests.txt` beside them one id per successful diff fetch.
/// All writes and lookups go through one lock, so lines never interleave.
#[derive(Debug)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Open the outputs for appending and replay the ids they already hold.
    pub fn open(output: &Utf8Path) -> Result<Self> {
        if let Some(parent) = output.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent).into_app_err_with(|| format!("creating output directory '{parent}'"))?;
        }

        let superset_path = superset_path(output);
        let fetch_log_path = ledger_path(output);

        let emitted = replay_instance_ids(&superset_path)?;
        let fetched = replay_lines(&fetch_log_path)?;
        log::info!(
            target: LOG_TARGET,
            "{} instance(s) already emitted, {} diff(s) already fetched",
            emitted.len(),
            fetched.len()
        );

        Ok(Self {
            state: Mutex::new(LedgerState {
                emitted,
                fetched,
                claimed: HashSet::default(),
                superset: open_append(&superset_path)?,
                with_tests: open_append(output)?,
                fetch_log: open_append(&fetch_log_path)?,
            }),
        })
    }

    /// Whether `id` was emitted or had its diff fetched by this or an earlier run.
    pub async fn is_known(&self, id: &str) -> bool {
        let state = self.state.lock().await;
        state.emitted.contains(id) || state.fetched.contains(id)
    }

    /// Reserve `id` for processing in this run. Fails if the id is already known or
    /// another unit of this run has claimed it.
    pub async fn claim(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.emitted.contains(id) || state.fetched.contains(id) {
            return false;
        }
        state.claimed.insert(id.to_string())
    }

    /// Note that the diff of `id` was fetched.
    pub async fn record_fetch(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fetched.insert(id.to_string()) {
            append_line(&mut state.fetch_log, id.to_string()).into_app_err("appending to the fetch ledger")?;
            state.fetch_log.flush().into_app_err("flushing the fetch ledger")?;
        }
        Ok(())
    }

    /// Append `instance` to the superset output, and to the with-tests output if it has
    /// a test patch. Returns whether it went to the with-tests output.
    pub async fn emit(&self, instance: &Instance) -> Result<bool> {
        let line = serde_json::to_string(instance).into_app_err_with(|| format!("serializing instance '{}'", instance.instance_id))?;
        let with_tests = instance.has_tests();

        let mut state = self.state.lock().await;
        append_line(&mut state.superset, line.clone()).into_app_err("appending to the superset output")?;
        state.superset.flush().into_app_err("flushing the superset output")?;

        if with_tests {
            append_line(&mut state.with_tests, line).into_app_err("appending to the output")?;
            state.with_tests.flush().into_app_err("flushing the output")?;
        }

        let _ = state.emitted.insert(instance.instance_id.clone());
        Ok(with_tests)
    }
}

/// Append `line` and its newline in one write, so an interrupted append never leaves
/// a record without its terminator for the next one to run into.
pub(super) fn append_line(file: &mut File, mut line: String) -> io::Result<()> {
    line.push('\n');
    file.write_all(line.as_bytes())
}

fn open_append(path: &Utf8Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .into_app_err_with(|| format!("opening '{path}' for appending"))
}

fn open_existing(path: &Utf8Path) -> Result<Option<BufReader<File>>> {
    match File::open(path) {
        Ok(file) => Ok(Some(BufReader::new(file))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).into_app_err_with(|| format!("reading '{path}'")),
    }
}

fn replay_instance_ids(path: &Utf8Path) -> Result<HashSet<String>> {
    let mut ids = HashSet::default();
    let Some(reader) = open_existing(path)? else {
        return Ok(ids);
    };

    for (index, line) in reader.lines().enumerate() {
        let line = line.into_app_err_with(|| format!("reading '{path}'"))?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<RecordedId>(&line) {
            Ok(recorded) => {
                let _ = ids.insert(recorded.instance_id);
            }
            Err(e) => log::warn!(target: LOG_TARGET, "Ignoring malformed line {} of '{path}': {e}", index + 1),
        }
    }

    Ok(ids)
}

fn replay_lines(path: &Utf8Path) -> Result<HashSet<String>> {
    let mut ids = HashSet::default();
    let Some(reader) = open_existing(path)? else {
        return Ok(ids);
    };

    for line in reader.lines() {
        let line = line.into_app_err_with(|| format!("reading '{path}'"))?;
        let id = line.trim();
        if !id.is_empty() {
            let _ = ids.insert(id.to_string());
        }
    }

    Ok(ids)
}
