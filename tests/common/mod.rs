#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use probemon_stats::core::dates::local_day_bounds;
use probemon_stats::store::sqlite::ProbeStore;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_probestats") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) {
        "probestats.exe"
    } else {
        "probestats"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve probestats binary path for integration test"),
    }
}

/// A scratch HOME with a database path and a journal path inside it.
pub struct Workspace {
    pub dir: tempfile::TempDir,
    pub db: PathBuf,
    pub journal: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create workspace");
        let db = dir.path().join("probemon.db");
        let journal = dir.path().join("journal").join("consolidate.jsonl");
        Self { dir, db, journal }
    }

    pub fn home(&self) -> &Path {
        self.dir.path()
    }

    pub fn journal_lines(&self) -> Vec<serde_json::Value> {
        fs::read_to_string(&self.journal)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).expect("journal line is JSON"))
            .collect()
    }

    /// Run the binary with HOME, database and journal pointed into this workspace.
    pub fn run(&self, case_name: &str, args: &[&str]) -> CmdResult {
        self.run_with_env(case_name, args, &[])
    }

    pub fn run_with_env(&self, case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
        let mut command = Command::new(resolve_bin_path());
        command
            .args(args)
            .env("HOME", self.home())
            .env("PROBESTATS_DB", &self.db)
            .env("PROBESTATS_JOURNAL", &self.journal)
            .env_remove("PROBESTATS_OUTPUT_FORMAT")
            .env_remove("PROBESTATS_IGNORED")
            .env("NO_COLOR", "1")
            .env("RUST_BACKTRACE", "1");
        for (key, value) in env {
            command.env(key, value);
        }
        run_command(case_name, args, &mut command)
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let mut command = Command::new(resolve_bin_path());
    command.args(args).env("RUST_BACKTRACE", "1");
    run_command(case_name, args, &mut command)
}

fn run_command(case_name: &str, args: &[&str], command: &mut Command) -> CmdResult {
    let root = std::env::temp_dir().join("probestats-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");
    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));

    let output = command.output().expect("execute probestats command");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

pub const HOME_DEVICE: &str = "a8:00:00:00:00:01";
pub const WORK_DEVICE: &str = "a8:00:00:00:00:02";
pub const RANDOM_DEVICE: &str = "da:00:00:00:00:03";

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).expect("valid day")
}

/// Three days of events: two regular devices and one randomized one.
pub fn seed_three_days(path: &Path) {
    let store = ProbeStore::create(path).expect("create store");
    for d in 1..=3 {
        let (start, _) = local_day_bounds(day(d));
        let record = |offset: f64, address: &str, vendor: &str, network: &str, signal: i32| {
            store
                .record_probe(start + offset, address, vendor, network, signal)
                .expect("record probe");
        };
        record(3_600.0, HOME_DEVICE, "Acme", "home", -70);
        record(7_200.0, HOME_DEVICE, "Acme", "cafe", -80);
        record(10_800.0, HOME_DEVICE, "Acme", "", -75);
        record(14_400.0, WORK_DEVICE, "Beta", "home", -60);
        record(18_000.0, RANDOM_DEVICE, "", "home", 0);
    }
}
