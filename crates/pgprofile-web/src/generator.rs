//! Synthetic load generator: runs `pgbench` (or `psql`) for a named scenario.
//!
//! Each run is a child process owned by a task in a `JoinSet`. Output lines go
//! to the log. On shutdown the child is killed and the task ends.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use pgprofile_core::calculator::cancelled;

/// Seconds every timed scenario runs for.
const RUN_SECS: &str = "60";

/// Client counts per intensity level.
const BASE_CLIENTS: [u32; 8] = [1, 2, 5, 10, 20, 40, 80, 150];
/// Analytical queries saturate fast; fewer clients per level.
const OLAP_CLIENTS: [u32; 8] = [1, 1, 2, 2, 3, 4, 5, 6];
const ETL_MAX_CLIENTS: u32 = 200;

pub(crate) const MIN_INTENSITY: u8 = 1;
pub(crate) const MAX_INTENSITY: u8 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoadScenario {
    /// Initializes pgbench tables (scale 50).
    Init,
    Oltp,
    Olap,
    Iot,
    Locks,
    Reporting,
    Mixed,
    Etl,
    Cold,
}

impl LoadScenario {
    pub(crate) const ALL: [LoadScenario; 9] = [
        LoadScenario::Init,
        LoadScenario::Oltp,
        LoadScenario::Olap,
        LoadScenario::Iot,
        LoadScenario::Locks,
        LoadScenario::Reporting,
        LoadScenario::Mixed,
        LoadScenario::Etl,
        LoadScenario::Cold,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            LoadScenario::Init => "init",
            LoadScenario::Oltp => "oltp",
            LoadScenario::Olap => "olap",
            LoadScenario::Iot => "iot",
            LoadScenario::Locks => "locks",
            LoadScenario::Reporting => "reporting",
            LoadScenario::Mixed => "mixed",
            LoadScenario::Etl => "etl",
            LoadScenario::Cold => "cold",
        }
    }

    /// Number of pgbench clients for an intensity level.
    pub(crate) fn clients(self, intensity: u8) -> u32 {
        let idx = usize::from(clamp_intensity(i64::from(intensity)) - 1);
        match self {
            LoadScenario::Olap => OLAP_CLIENTS[idx],
            LoadScenario::Etl => (BASE_CLIENTS[idx] * 2).min(ETL_MAX_CLIENTS),
            _ => BASE_CLIENTS[idx],
        }
    }

    /// Program and arguments for this scenario.
    pub(crate) fn command(
        self,
        intensity: u8,
        database_url: &str,
        scenarios_dir: &Path,
    ) -> (&'static str, Vec<String>) {
        let clients = self.clients(intensity).to_string();
        let script = |name: &str| scenarios_dir.join(name).display().to_string();
        let timed = |extra: Vec<String>| {
            let mut args = vec!["-T".to_string(), RUN_SECS.to_string(), "-c".to_string(), clients.clone()];
            args.extend(extra);
            args.push(database_url.to_string());
            args
        };

        match self {
            LoadScenario::Init => (
                "pgbench",
                vec!["-i".into(), "-s".into(), "50".into(), database_url.into()],
            ),
            LoadScenario::Oltp => ("pgbench", timed(vec!["-j".into(), "2".into()])),
            LoadScenario::Olap => ("pgbench", timed(vec!["-f".into(), script("olap.sql")])),
            LoadScenario::Iot | LoadScenario::Etl => {
                ("pgbench", timed(vec!["-f".into(), script("iot.sql")]))
            }
            LoadScenario::Locks => ("pgbench", timed(vec!["-f".into(), script("locks.sql")])),
            LoadScenario::Reporting => {
                ("pgbench", timed(vec!["-f".into(), script("reporting.sql")]))
            }
            // Skip teller/branch updates to keep lock pressure low.
            LoadScenario::Mixed => ("pgbench", timed(vec!["-N".into()])),
            LoadScenario::Cold => (
                "psql",
                vec![
                    database_url.into(),
                    "-c".into(),
                    "VACUUM FULL pgbench_accounts;".into(),
                ],
            ),
        }
    }
}

impl fmt::Display for LoadScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LoadScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LoadScenario::ALL
            .into_iter()
            .find(|sc| sc.name() == s)
            .ok_or_else(|| format!("unknown scenario: {s}"))
    }
}

/// Parses an intensity query value. Missing or invalid means the minimum.
pub(crate) fn parse_intensity(raw: Option<&str>) -> u8 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .map_or(MIN_INTENSITY, clamp_intensity)
}

fn clamp_intensity(level: i64) -> u8 {
    // Bounded to 1..=8 so the cast is lossless.
    level.clamp(i64::from(MIN_INTENSITY), i64::from(MAX_INTENSITY)) as u8
}

/// What `start` launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LaunchInfo {
    pub(crate) scenario: String,
    pub(crate) intensity: u8,
    pub(crate) clients: u32,
}

pub(crate) struct LoadGenerator {
    database_url: String,
    scenarios_dir: PathBuf,
    shutdown: watch::Receiver<bool>,
    runs: Mutex<JoinSet<()>>,
}

impl LoadGenerator {
    pub(crate) fn new(
        database_url: String,
        scenarios_dir: PathBuf,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            database_url,
            scenarios_dir,
            shutdown,
            runs: Mutex::new(JoinSet::new()),
        }
    }

    /// Launches `scenario` in the background. Must be called inside a runtime.
    pub(crate) fn start(&self, scenario: LoadScenario, intensity: u8) -> LaunchInfo {
        let (program, args) = scenario.command(intensity, &self.database_url, &self.scenarios_dir);
        let clients = scenario.clients(intensity);
        let shutdown = self.shutdown.clone();

        info!(scenario = %scenario, intensity, clients, "starting load scenario");

        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished runs.
        while runs.try_join_next().is_some() {}
        runs.spawn(async move {
            let mut cmd = Command::new(program);
            cmd.args(&args);
            match run_streaming(scenario, cmd, shutdown).await {
                Ok(status) if status.success() => info!(scenario = %scenario, "load scenario finished"),
                Ok(status) => warn!(scenario = %scenario, %status, "load scenario failed"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    info!(scenario = %scenario, "load scenario stopped on shutdown")
                }
                Err(e) => warn!(scenario = %scenario, error = %e, "failed to run load scenario"),
            }
        });

        LaunchInfo {
            scenario: scenario.name().to_string(),
            intensity: clamp_intensity(i64::from(intensity)),
            clients,
        }
    }

    /// Waits for every run to end. Runs observe the shutdown signal and kill
    /// their child process.
    pub(crate) async fn shutdown(&self) {
        let mut runs = {
            let mut guard = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        while runs.join_next().await.is_some() {}
    }
}

enum Step {
    Stdout(Option<String>),
    Stderr(Option<String>),
    Exited(io::Result<ExitStatus>),
    Stop,
}

/// Runs `cmd`, logging each output line, until it exits or shutdown fires.
async fn run_streaming(
    scenario: LoadScenario,
    mut cmd: Command,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<ExitStatus> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn()?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(io::Error::other("child output not captured"));
    };
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let (mut stdout_done, mut stderr_done) = (false, false);

    loop {
        let step = tokio::select! {
            line = stdout.next_line(), if !stdout_done => Step::Stdout(line.ok().flatten()),
            line = stderr.next_line(), if !stderr_done => Step::Stderr(line.ok().flatten()),
            status = child.wait(), if stdout_done && stderr_done => Step::Exited(status),
            _ = cancelled(&mut shutdown) => Step::Stop,
        };

        match step {
            Step::Stdout(Some(line)) => info!(scenario = %scenario, stream = "stdout", "{line}"),
            Step::Stdout(None) => stdout_done = true,
            Step::Stderr(Some(line)) => info!(scenario = %scenario, stream = "stderr", "{line}"),
            Step::Stderr(None) => stderr_done = true,
            Step::Exited(status) => return status,
            Step::Stop => {
                child.kill().await?;
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "stopped on shutdown",
                ));
            }
        }
    }
}
