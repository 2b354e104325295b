//! Process supervision
//!
//! Owns every child process behind a stdio connection: spawn, reap, signal,
//! health check and bounded automatic restart. A reap watcher task owns each
//! `Child` and records the exit as soon as it happens, so state never lags
//! reality.

pub mod liveness;
mod types;

pub use types::{
    CommandSpec, HealthStatus, ProcessEvent, ProcessMetrics, ProcessSnapshot, ProcessState,
    RestartPolicy, StdioPipes, SupervisorError,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use liveness::Fingerprint;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Time allowed for a child to exit after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Supervisor-wide settings
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Time between SIGTERM and SIGKILL
    pub graceful_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct ProcessRecord {
    spec: CommandSpec,
    policy: RestartPolicy,
    state: ProcessState,
    pid: Option<u32>,
    fingerprint: Option<Fingerprint>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    last_health_check: Option<DateTime<Utc>>,
    restart_count: u32,
    last_exit_code: Option<i32>,
    last_error: Option<String>,
    generation: u64,
}

/// Handle on the current incarnation's reap watcher
struct RunHandle {
    kill: CancellationToken,
    exited: watch::Receiver<bool>,
}

struct ProcessSlot {
    name: String,
    /// Serialises start, stop and restart for this name
    lifecycle: tokio::sync::Mutex<()>,
    record: RwLock<ProcessRecord>,
    pipes: Mutex<Option<StdioPipes>>,
    run: Mutex<Option<RunHandle>>,
}

impl ProcessSlot {
    fn new(name: &str, spec: CommandSpec, policy: RestartPolicy) -> Self {
        Self {
            name: name.to_string(),
            lifecycle: tokio::sync::Mutex::new(()),
            record: RwLock::new(ProcessRecord {
                spec,
                policy,
                state: ProcessState::Stopped,
                pid: None,
                fingerprint: None,
                started_at: None,
                stopped_at: None,
                last_health_check: None,
                restart_count: 0,
                last_exit_code: None,
                last_error: None,
                generation: 0,
            }),
            pipes: Mutex::new(None),
            run: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> ProcessSnapshot {
        let record = self.record.read();
        ProcessSnapshot {
            name: self.name.clone(),
            command: record.spec.display(),
            state: record.state,
            pid: record.pid,
            started_at: record.started_at,
            stopped_at: record.stopped_at,
            last_health_check: record.last_health_check,
            restart_count: record.restart_count,
            last_exit_code: record.last_exit_code,
            last_error: record.last_error.clone(),
        }
    }

    fn is_running(&self) -> bool {
        let record = self.record.read();
        match (record.state, record.pid) {
            (ProcessState::Running, Some(pid)) => liveness::is_alive(pid, record.fingerprint),
            _ => false,
        }
    }
}

struct Inner {
    slots: DashMap<String, Arc<ProcessSlot>>,
    settings: SupervisorSettings,
    events: broadcast::Sender<ProcessEvent>,
}

impl Inner {
    fn publish(&self, event: ProcessEvent) {
        let _ = self.events.send(event);
    }
}

/// Supervisor for named child processes
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorSettings::default())
    }
}

impl ProcessSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                settings,
                events,
            }),
        }
    }

    /// Lifecycle events for every supervised process
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.inner.events.subscribe()
    }

    pub fn graceful_timeout(&self) -> Duration {
        self.inner.settings.graceful_timeout
    }

    fn slot(&self, name: &str) -> Option<Arc<ProcessSlot>> {
        self.inner.slots.get(name).map(|s| Arc::clone(s.value()))
    }

    /// Start `name` without automatic restart
    pub async fn start(&self, name: &str, spec: CommandSpec) -> Result<ProcessSnapshot, SupervisorError> {
        self.start_with_policy(name, spec, RestartPolicy::never()).await
    }

    /// Start `name`; fails if it is already running
    pub async fn start_with_policy(
        &self,
        name: &str,
        spec: CommandSpec,
        policy: RestartPolicy,
    ) -> Result<ProcessSnapshot, SupervisorError> {
        let slot = Arc::clone(
            self.inner
                .slots
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ProcessSlot::new(name, spec.clone(), policy.clone())))
                .value(),
        );

        let _lifecycle = slot.lifecycle.lock().await;
        if slot.is_running() {
            return Err(SupervisorError::AlreadyRunning(name.to_string()));
        }

        {
            let mut record = slot.record.write();
            record.spec = spec;
            record.policy = policy;
            record.restart_count = 0;
        }
        reap_previous(&slot).await;
        spawn_locked(&self.inner, &slot)?;
        Ok(slot.snapshot())
    }

    /// Take the unclaimed pipes of the current incarnation
    pub fn claim_stdio(&self, name: &str) -> Option<StdioPipes> {
        self.slot(name)?.pipes.lock().take()
    }

    /// Stop `name`: SIGTERM, grace period, then SIGKILL
    ///
    /// Returns whether a live process was stopped. Stopping an unknown or
    /// already stopped process is not an error.
    pub async fn stop(&self, name: &str) -> Result<bool, SupervisorError> {
        self.stop_with_timeout(name, self.inner.settings.graceful_timeout)
            .await
    }

    /// Stop `name` with an explicit grace period before SIGKILL
    pub async fn stop_with_timeout(
        &self,
        name: &str,
        graceful_timeout: Duration,
    ) -> Result<bool, SupervisorError> {
        let Some(slot) = self.slot(name) else {
            return Ok(false);
        };
        let _lifecycle = slot.lifecycle.lock().await;
        Ok(stop_locked(&slot, graceful_timeout).await)
    }

    /// Stop and start `name` with its last command
    pub async fn restart(&self, name: &str) -> Result<ProcessSnapshot, SupervisorError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        let _lifecycle = slot.lifecycle.lock().await;

        stop_locked(&slot, self.inner.settings.graceful_timeout).await;
        slot.record.write().restart_count += 1;
        reap_previous(&slot).await;
        spawn_locked(&self.inner, &slot)?;
        Ok(slot.snapshot())
    }

    /// Whether `name` is running and its pid still names our child
    pub fn is_running(&self, name: &str) -> bool {
        self.slot(name).is_some_and(|s| s.is_running())
    }

    /// Check liveness and sample resource usage
    pub fn health_check(&self, name: &str) -> Result<HealthStatus, SupervisorError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        let alive = slot.is_running();
        let mut record = slot.record.write();
        record.last_health_check = Some(Utc::now());

        let metrics = match (alive, record.pid) {
            (true, Some(pid)) => liveness::sample(pid),
            _ => None,
        };
        let uptime_secs = record
            .started_at
            .filter(|_| alive)
            .map(|at| (Utc::now() - at).num_seconds());

        Ok(HealthStatus {
            name: name.to_string(),
            state: record.state,
            pid: record.pid,
            alive,
            uptime_secs,
            restart_count: record.restart_count,
            metrics,
            checked_at: record.last_health_check,
            last_error: record.last_error.clone(),
        })
    }

    pub fn snapshot(&self, name: &str) -> Option<ProcessSnapshot> {
        self.slot(name).map(|s| s.snapshot())
    }

    /// Snapshots of every known process, sorted by name
    pub fn snapshots(&self) -> Vec<ProcessSnapshot> {
        let mut all: Vec<_> = self.inner.slots.iter().map(|s| s.snapshot()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Stop every live process concurrently
    pub async fn shutdown_all(&self, graceful_timeout: Duration) {
        let names: Vec<String> = self.inner.slots.iter().map(|s| s.key().clone()).collect();
        let results = join_all(
            names
                .iter()
                .map(|name| self.stop_with_timeout(name, graceful_timeout)),
        )
        .await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to stop '{}' during shutdown: {}", name, e);
            }
        }
    }
}

/// Wait until the previous incarnation's child has been reaped
///
/// A child killed out of band stays a zombie until its reap watcher collects
/// it, and by then it no longer counts as running. Its watcher is detached
/// from the record first so the late exit cannot overwrite the next
/// incarnation's state. Caller holds the lifecycle lock.
async fn reap_previous(slot: &ProcessSlot) {
    let Some(mut previous) = slot.run.lock().take() else {
        return;
    };
    slot.record.write().generation += 1;

    previous.kill.cancel();
    if tokio::time::timeout(KILL_WAIT, previous.exited.wait_for(|done| *done))
        .await
        .is_err()
    {
        error!("Previous process of '{}' was not reaped", slot.name);
    }
}

/// Spawn a new incarnation; caller holds the lifecycle lock
fn spawn_locked(inner: &Arc<Inner>, slot: &Arc<ProcessSlot>) -> Result<(), SupervisorError> {
    let (spec, generation) = {
        let mut record = slot.record.write();
        record.state = ProcessState::Starting;
        record.generation += 1;
        (record.spec.clone(), record.generation)
    };

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let message = e.to_string();
            let mut record = slot.record.write();
            record.state = ProcessState::Failed;
            record.pid = None;
            record.stopped_at = Some(Utc::now());
            record.last_error = Some(format!("spawn failed: {}", message));
            error!("Failed to spawn '{}' ({}): {}", slot.name, spec.display(), message);
            return Err(SupervisorError::Spawn {
                name: slot.name.clone(),
                message,
            });
        }
    };

    let pid = child.id();
    let pipes = match (child.stdin.take(), child.stdout.take()) {
        (Some(stdin), Some(stdout)) => Some(StdioPipes { stdin, stdout }),
        _ => None,
    };
    if let Some(stderr) = child.stderr.take() {
        let name = slot.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(process = %name, "stderr: {}", line);
            }
        });
    }

    *slot.pipes.lock() = pipes;
    {
        let mut record = slot.record.write();
        record.state = ProcessState::Running;
        record.pid = pid;
        record.fingerprint = pid.and_then(liveness::fingerprint);
        record.started_at = Some(Utc::now());
        record.stopped_at = None;
        record.last_error = None;
    }

    let kill = CancellationToken::new();
    let (exited_tx, exited_rx) = watch::channel(false);
    *slot.run.lock() = Some(RunHandle {
        kill: kill.clone(),
        exited: exited_rx,
    });

    info!("Process '{}' started with PID {:?}", slot.name, pid);
    if let Some(pid) = pid {
        inner.publish(ProcessEvent::Started {
            name: slot.name.clone(),
            pid,
        });
    }

    tokio::spawn(reap_watcher(
        Arc::clone(inner),
        Arc::clone(slot),
        child,
        generation,
        kill,
        exited_tx,
    ));
    Ok(())
}

/// Stop the current incarnation; caller holds the lifecycle lock
async fn stop_locked(slot: &ProcessSlot, grace: Duration) -> bool {
    let (pid, was_live) = {
        let mut record = slot.record.write();
        let was_live = record.state.is_live();
        record.state = if was_live {
            ProcessState::Stopping
        } else {
            ProcessState::Stopped
        };
        (record.pid, was_live)
    };
    slot.pipes.lock().take();
    let run = slot.run.lock().take();

    let Some(mut run) = run.filter(|_| was_live) else {
        return false;
    };

    if let Some(pid) = pid {
        send_sigterm(&slot.name, pid);
    }

    let exited_in_grace = tokio::time::timeout(grace, run.exited.wait_for(|done| *done))
        .await
        .is_ok();
    if !exited_in_grace {
        warn!(
            "Process '{}' ignored SIGTERM for {:?}, sending SIGKILL",
            slot.name, grace
        );
        run.kill.cancel();
        if tokio::time::timeout(KILL_WAIT, run.exited.wait_for(|done| *done))
            .await
            .is_err()
        {
            error!("Process '{}' did not exit after SIGKILL", slot.name);
        }
    }

    let mut record = slot.record.write();
    record.state = ProcessState::Stopped;
    record.pid = None;
    record.stopped_at = Some(Utc::now());
    info!("Process '{}' stopped", slot.name);
    true
}

#[cfg(unix)]
fn send_sigterm(name: &str, pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => debug!("Sent SIGTERM to '{}' ({})", name, pid),
        Err(nix::errno::Errno::ESRCH) => debug!("Process '{}' already gone", name),
        Err(e) => warn!("Failed to SIGTERM '{}' ({}): {}", name, pid, e),
    }
}

#[cfg(not(unix))]
fn send_sigterm(_name: &str, _pid: u32) {}

/// Owns the child until it exits, then records the outcome
async fn reap_watcher(
    inner: Arc<Inner>,
    slot: Arc<ProcessSlot>,
    mut child: Child,
    generation: u64,
    kill: CancellationToken,
    exited: watch::Sender<bool>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            if let Err(e) = child.start_kill() {
                warn!("Failed to SIGKILL '{}': {}", slot.name, e);
            }
            child.wait().await
        }
    };
    let _ = exited.send(true);

    let code = status.as_ref().ok().and_then(|s| s.code());
    let description = match &status {
        Ok(s) => s.to_string(),
        Err(e) => format!("wait failed: {}", e),
    };

    let (requested, restart_attempt) = {
        let mut record = slot.record.write();
        if record.generation != generation {
            return;
        }
        record.pid = None;
        record.last_exit_code = code;
        record.stopped_at = Some(Utc::now());

        if record.state == ProcessState::Stopping {
            (true, None)
        } else {
            record.state = ProcessState::Died;
            record.last_error = Some(format!("process exited unexpectedly ({})", description));
            if record.policy.enabled && record.restart_count < record.policy.max_restarts {
                (false, Some(record.restart_count))
            } else {
                if record.policy.enabled {
                    record.last_error = Some(format!(
                        "restart limit reached after {} restarts ({})",
                        record.restart_count, description
                    ));
                }
                (false, None)
            }
        }
    };

    inner.publish(ProcessEvent::Exited {
        name: slot.name.clone(),
        code,
        requested,
    });

    if requested {
        debug!("Process '{}' exited after stop request ({})", slot.name, description);
        return;
    }
    warn!("Process '{}' exited unexpectedly ({})", slot.name, description);
    slot.pipes.lock().take();

    match restart_attempt {
        Some(attempt) => restart_after_backoff(inner, slot, attempt, generation).await,
        None => {
            let restarts = slot.record.read().restart_count;
            if slot.record.read().policy.enabled {
                error!("Process '{}' reached its restart limit ({})", slot.name, restarts);
                inner.publish(ProcessEvent::RestartLimitReached {
                    name: slot.name.clone(),
                    restarts,
                });
            }
        }
    }
}

async fn restart_after_backoff(
    inner: Arc<Inner>,
    slot: Arc<ProcessSlot>,
    mut attempt: u32,
    mut generation: u64,
) {
    loop {
        let delay = slot.record.read().policy.delay_for_attempt(attempt);
        info!(
            "Restarting '{}' in {:?} (attempt {})",
            slot.name,
            delay,
            attempt + 1
        );
        inner.publish(ProcessEvent::Restarting {
            name: slot.name.clone(),
            attempt: attempt + 1,
        });
        tokio::time::sleep(delay).await;

        let _lifecycle = slot.lifecycle.lock().await;
        {
            let mut record = slot.record.write();
            // A stop or manual start since the exit supersedes this restart
            let dead = matches!(record.state, ProcessState::Died | ProcessState::Failed);
            if record.generation != generation || !dead {
                return;
            }
            record.restart_count += 1;
        }

        reap_previous(&slot).await;
        let Err(e) = spawn_locked(&inner, &slot) else {
            return;
        };
        warn!("Automatic restart of '{}' failed: {}", slot.name, e);

        let mut record = slot.record.write();
        if record.restart_count >= record.policy.max_restarts {
            record.last_error = Some(format!(
                "restart limit reached after {} restarts ({})",
                record.restart_count, e
            ));
            let restarts = record.restart_count;
            drop(record);
            error!("Process '{}' reached its restart limit ({})", slot.name, restarts);
            inner.publish(ProcessEvent::RestartLimitReached {
                name: slot.name.clone(),
                restarts,
            });
            return;
        }
        attempt = record.restart_count;
        generation = record.generation;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sleeper() -> CommandSpec {
        CommandSpec::new("sh").with_args(["-c", "sleep 30"])
    }

    fn quick_settings() -> SupervisorSettings {
        SupervisorSettings {
            graceful_timeout: Duration::from_millis(500),
        }
    }

    async fn wait_for_state(sup: &ProcessSupervisor, name: &str, state: ProcessState) -> ProcessSnapshot {
        for _ in 0..200 {
            if let Some(snap) = sup.snapshot(name) {
                if snap.state == state {
                    return snap;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("process '{}' never reached {:?}", name, state);
    }

    #[tokio::test]
    async fn test_duplicate_start_is_rejected() {
        let sup = ProcessSupervisor::new(quick_settings());
        let first = sup.start("idle", sleeper()).await.unwrap();
        let err = sup.start("idle", sleeper()).await.unwrap_err();

        assert!(matches!(err, SupervisorError::AlreadyRunning(_)));
        assert_eq!(sup.snapshot("idle").unwrap().pid, first.pid);
        assert!(sup.is_running("idle"));
        sup.shutdown_all(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let sup = ProcessSupervisor::new(quick_settings());
        sup.start("idle", sleeper()).await.unwrap();

        assert!(sup.stop("idle").await.unwrap());
        assert!(!sup.stop("idle").await.unwrap());
        assert!(!sup.stop("unknown").await.unwrap());
        let snap = sup.snapshot("idle").unwrap();
        assert_eq!(snap.state, ProcessState::Stopped);
        assert!(snap.stopped_at.is_some());
        assert!(!sup.is_running("idle"));
    }

    #[tokio::test]
    async fn test_sigterm_ignored_escalates_to_sigkill() {
        let sup = ProcessSupervisor::new(quick_settings());
        let stubborn = CommandSpec::new("sh").with_args(["-c", "trap '' TERM; while true; do sleep 1; done"]);
        sup.start("stubborn", stubborn).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        assert!(sup.stop("stubborn").await.unwrap());
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(!sup.is_running("stubborn"));
    }

    #[tokio::test]
    async fn test_unexpected_exit_marks_died() {
        let sup = ProcessSupervisor::new(quick_settings());
        let mut events = sup.subscribe();
        let spec = CommandSpec::new("sh").with_args(["-c", "exit 3"]);
        sup.start("short", spec).await.unwrap();

        let snap = wait_for_state(&sup, "short", ProcessState::Died).await;
        assert_eq!(snap.last_exit_code, Some(3));
        assert!(snap.pid.is_none());

        loop {
            match events.recv().await.unwrap() {
                ProcessEvent::Exited { name, requested, .. } => {
                    assert_eq!(name, "short");
                    assert!(!requested);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_restart_limit_is_honoured() {
        let sup = ProcessSupervisor::new(quick_settings());
        let policy = RestartPolicy::default()
            .with_enabled(true)
            .with_max_restarts(2)
            .with_initial_backoff(Duration::from_millis(10));
        let spec = CommandSpec::new("sh").with_args(["-c", "exit 1"]);
        sup.start_with_policy("flaky", spec, policy).await.unwrap();

        for _ in 0..200 {
            let snap = sup.snapshot("flaky").unwrap();
            if snap.restart_count == 2 && snap.state == ProcessState::Died {
                assert!(snap.last_error.unwrap().contains("restart limit reached"));
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("restart limit never reached");
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_failed() {
        let sup = ProcessSupervisor::default();
        let err = sup
            .start("ghost", CommandSpec::new("/nonexistent/conduit-binary"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PROCESS_SPAWN");
        assert_eq!(sup.snapshot("ghost").unwrap().state, ProcessState::Failed);
    }

    #[tokio::test]
    async fn test_health_check_and_claim() {
        let sup = ProcessSupervisor::new(quick_settings());
        sup.start("idle", sleeper()).await.unwrap();

        let health = sup.health_check("idle").unwrap();
        assert!(health.is_healthy());
        assert!(health.pid.is_some());

        assert!(health.checked_at.is_some());
        assert!(sup.claim_stdio("idle").is_some());
        assert!(sup.claim_stdio("idle").is_none());
        assert!(sup.health_check("missing").is_err());
        sup.shutdown_all(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn test_start_after_external_kill_reaps_previous_child() {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let sup = ProcessSupervisor::new(quick_settings());
        let old = sup.start("idle", sleeper()).await.unwrap().pid.unwrap();
        let old_pid = Pid::from_raw(old as i32);
        kill(old_pid, Signal::SIGKILL).unwrap();

        let mut fresh = None;
        for _ in 0..1000 {
            match sup.start("idle", sleeper()).await {
                Ok(snap) => {
                    fresh = Some(snap);
                    break;
                }
                Err(SupervisorError::AlreadyRunning(_)) => tokio::time::sleep(Duration::from_millis(1)).await,
                Err(e) => panic!("unexpected start error: {}", e),
            }
        }
        let fresh = fresh.expect("process never became restartable");

        // No zombie is left behind once start returns
        assert_eq!(kill(old_pid, None), Err(Errno::ESRCH));
        assert_ne!(fresh.pid, Some(old));

        // The old child's late exit must not overwrite the new incarnation
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snap = sup.snapshot("idle").unwrap();
        assert_eq!(snap.state, ProcessState::Running);
        assert_eq!(snap.pid, fresh.pid);
        sup.stop("idle").await.unwrap();
    }
}
