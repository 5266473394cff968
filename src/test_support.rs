//! Test support utilities shared across unit and integration tests.
//!
//! The in-memory doubles implement the same capability traits as the
//! production backend, mount executor and statistics provider, so driver
//! services can be exercised without a cloud account or root privileges.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::backend::{BackendFuture, VolumeBackend, VolumeError};
use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::mount::{MountError, MountExecutor};
use crate::stats::{StatsError, StatsProvider};
use crate::volume::{
    CreateOptions, MountOptions, Server, ServerId, Volume, VolumeId, VolumeStats,
};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Largest volume the in-memory backend accepts unless configured otherwise.
pub const IN_MEMORY_MAX_VOLUME_SIZE_GB: u64 = 10_000;

#[derive(Debug)]
enum AttachFailure {
    Reject(VolumeError),
    ApplyThenFail(VolumeError),
}

#[derive(Debug, Default)]
struct BackendState {
    volumes: BTreeMap<VolumeId, Volume>,
    servers: BTreeMap<ServerId, Server>,
    next_id: u64,
    create_failure: Option<VolumeError>,
    attach_failure: Option<AttachFailure>,
    attach_calls: usize,
    detach_calls: usize,
    resize_calls: usize,
}

impl BackendState {
    fn volume(&self, id: &VolumeId) -> Result<&Volume, VolumeError> {
        self.volumes
            .get(id)
            .ok_or_else(|| VolumeError::VolumeNotFound(id.to_string()))
    }

    fn volume_mut(&mut self, id: &VolumeId) -> Result<&mut Volume, VolumeError> {
        self.volumes
            .get_mut(id)
            .ok_or_else(|| VolumeError::VolumeNotFound(id.to_string()))
    }

    fn attach(&mut self, volume_id: &VolumeId, server_id: &ServerId) -> Result<(), VolumeError> {
        let server = self
            .servers
            .get(server_id)
            .cloned()
            .ok_or_else(|| VolumeError::ServerNotFound(server_id.to_string()))?;
        let volume = self.volume_mut(volume_id)?;
        if volume.location != server.location {
            return Err(VolumeError::LocationMismatch {
                volume: volume.location.clone(),
                server: server.location,
            });
        }
        match volume.server.as_ref() {
            Some(holder) if *holder == server.id => Ok(()),
            Some(holder) => Err(VolumeError::AlreadyAttachedElsewhere {
                volume_id: volume_id.clone(),
                server_id: holder.clone(),
            }),
            None => {
                volume.server = Some(server.id);
                Ok(())
            }
        }
    }
}

/// Volume backend that keeps every volume and server in memory.
///
/// It enforces the same rules as the cloud API: unique names, a single
/// holder per volume, same-location attachment and no deletion of attached
/// volumes. Failures can be injected for the next create or attach call.
#[derive(Debug)]
pub struct InMemoryVolumeBackend {
    state: Mutex<BackendState>,
    max_volume_size_gb: u64,
}

impl Default for InMemoryVolumeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVolumeBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            max_volume_size_gb: IN_MEMORY_MAX_VOLUME_SIZE_GB,
        }
    }

    /// Registers a server and returns it.
    pub fn add_server(&self, id: &str, location: &str) -> Server {
        let server = Server {
            id: ServerId::new(id),
            location: location.to_owned(),
        };
        locked(&self.state)
            .servers
            .insert(server.id.clone(), server.clone());
        server
    }

    /// Inserts a volume as-is, for example to seed a conflicting volume.
    pub fn insert_volume(&self, volume: Volume) {
        locked(&self.state)
            .volumes
            .insert(volume.id.clone(), volume);
    }

    /// Makes the next create call fail with `err`.
    pub fn fail_create_with(&self, err: VolumeError) {
        locked(&self.state).create_failure = Some(err);
    }

    /// Makes the next attach call fail with `err` without attaching.
    pub fn fail_attach_with(&self, err: VolumeError) {
        locked(&self.state).attach_failure = Some(AttachFailure::Reject(err));
    }

    /// Makes the next attach call attach the volume and then report `err`,
    /// as a timed-out request that completed remotely would.
    pub fn fail_attach_after_applying(&self, err: VolumeError) {
        locked(&self.state).attach_failure = Some(AttachFailure::ApplyThenFail(err));
    }

    /// Number of volumes currently stored.
    #[must_use]
    pub fn volume_count(&self) -> usize {
        locked(&self.state).volumes.len()
    }

    /// Number of attach calls received.
    #[must_use]
    pub fn attach_calls(&self) -> usize {
        locked(&self.state).attach_calls
    }

    /// Number of detach calls received.
    #[must_use]
    pub fn detach_calls(&self) -> usize {
        locked(&self.state).detach_calls
    }

    /// Number of resize calls received.
    #[must_use]
    pub fn resize_calls(&self) -> usize {
        locked(&self.state).resize_calls
    }

    /// Servers currently holding `volume`, for single-holder assertions.
    #[must_use]
    pub fn holders(&self, volume: &VolumeId) -> Vec<ServerId> {
        locked(&self.state)
            .volumes
            .get(volume)
            .and_then(|entry| entry.server.clone())
            .into_iter()
            .collect()
    }
}

impl VolumeBackend for InMemoryVolumeBackend {
    fn create<'a>(&'a self, opts: &'a CreateOptions) -> BackendFuture<'a, Volume, VolumeError> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            if let Some(err) = state.create_failure.take() {
                return Err(err);
            }
            if state.volumes.values().any(|volume| volume.name == opts.name) {
                return Err(VolumeError::VolumeAlreadyExists {
                    name: opts.name.clone(),
                });
            }
            if opts.min_size_gb > self.max_volume_size_gb {
                return Err(VolumeError::Provider {
                    message: format!("size {} GB exceeds the maximum", opts.min_size_gb),
                });
            }
            state.next_id = state.next_id.saturating_add(1);
            let volume = Volume {
                id: VolumeId::new(format!("vol-{}", state.next_id)),
                name: opts.name.clone(),
                size_gb: opts.min_size_gb,
                location: opts.location.clone(),
                server: None,
            };
            state.volumes.insert(volume.id.clone(), volume.clone());
            Ok(volume)
        })
    }

    fn get_by_id<'a>(&'a self, id: &'a VolumeId) -> BackendFuture<'a, Volume, VolumeError> {
        Box::pin(async move { locked(&self.state).volume(id).cloned() })
    }

    fn get_by_name<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Volume, VolumeError> {
        Box::pin(async move {
            locked(&self.state)
                .volumes
                .values()
                .find(|volume| volume.name == name)
                .cloned()
                .ok_or_else(|| VolumeError::VolumeNotFound(name.to_owned()))
        })
    }

    fn list(&self) -> BackendFuture<'_, Vec<Volume>, VolumeError> {
        Box::pin(async move { Ok(locked(&self.state).volumes.values().cloned().collect()) })
    }

    fn delete<'a>(&'a self, volume: &'a Volume) -> BackendFuture<'a, (), VolumeError> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            let current = state.volume(&volume.id)?;
            if let Some(holder) = current.server.as_ref() {
                return Err(VolumeError::Provider {
                    message: format!("volume {} is attached to {holder}", volume.id),
                });
            }
            state.volumes.remove(&volume.id);
            Ok(())
        })
    }

    fn attach<'a>(
        &'a self,
        volume: &'a Volume,
        server: &'a Server,
    ) -> BackendFuture<'a, (), VolumeError> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.attach_calls = state.attach_calls.saturating_add(1);
            match state.attach_failure.take() {
                Some(AttachFailure::Reject(err)) => Err(err),
                Some(AttachFailure::ApplyThenFail(err)) => {
                    state.attach(&volume.id, &server.id)?;
                    Err(err)
                }
                None => state.attach(&volume.id, &server.id),
            }
        })
    }

    fn detach<'a>(&'a self, volume: &'a Volume) -> BackendFuture<'a, (), VolumeError> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.detach_calls = state.detach_calls.saturating_add(1);
            let current = state.volume_mut(&volume.id)?;
            if current.server.take().is_none() {
                return Err(VolumeError::NotAttached {
                    volume_id: volume.id.clone(),
                });
            }
            Ok(())
        })
    }

    fn resize<'a>(
        &'a self,
        volume: &'a Volume,
        size_gb: u64,
    ) -> BackendFuture<'a, (), VolumeError> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.resize_calls = state.resize_calls.saturating_add(1);
            let current = state.volume_mut(&volume.id)?;
            if size_gb < current.size_gb {
                return Err(VolumeError::Provider {
                    message: String::from("volumes cannot shrink"),
                });
            }
            current.size_gb = size_gb;
            Ok(())
        })
    }

    fn get_server<'a>(&'a self, id: &'a ServerId) -> BackendFuture<'a, Server, VolumeError> {
        Box::pin(async move {
            locked(&self.state)
                .servers
                .get(id)
                .cloned()
                .ok_or_else(|| VolumeError::ServerNotFound(id.to_string()))
        })
    }

    fn max_volume_size_gb(&self, _location: &str) -> u64 {
        self.max_volume_size_gb
    }
}

/// Mount executor that records calls and tracks staged volumes in memory.
#[derive(Debug, Default)]
pub struct RecordingMountExecutor {
    staged: Mutex<BTreeSet<VolumeId>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingMountExecutor {
    /// Creates an executor with nothing staged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor that reports `volumes` as already staged.
    #[must_use]
    pub fn with_staged<I>(volumes: I) -> Self
    where
        I: IntoIterator<Item = VolumeId>,
    {
        Self {
            staged: Mutex::new(volumes.into_iter().collect()),
            calls: Mutex::default(),
        }
    }

    /// Mutating calls received so far, as `"<op> <volume> <path>"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls).clone()
    }

    /// Volumes currently staged.
    #[must_use]
    pub fn staged(&self) -> Vec<VolumeId> {
        locked(&self.staged).iter().cloned().collect()
    }

    fn record(&self, op: &str, volume: &VolumeId, path: &Utf8Path) {
        locked(&self.calls).push(format!("{op} {volume} {path}"));
    }
}

impl MountExecutor for RecordingMountExecutor {
    fn stage(
        &self,
        volume: &VolumeId,
        staging: &Utf8Path,
        _opts: &MountOptions,
    ) -> Result<(), MountError> {
        self.record("stage", volume, staging);
        locked(&self.staged).insert(volume.clone());
        Ok(())
    }

    fn unstage(&self, volume: &VolumeId, staging: &Utf8Path) -> Result<(), MountError> {
        self.record("unstage", volume, staging);
        locked(&self.staged).remove(volume);
        Ok(())
    }

    fn publish(
        &self,
        volume: &VolumeId,
        target: &Utf8Path,
        staging: &Utf8Path,
        opts: &MountOptions,
    ) -> Result<(), MountError> {
        if !opts.is_block() && !locked(&self.staged).contains(volume) {
            return Err(MountError::NotStaged {
                staging: staging.to_owned(),
            });
        }
        self.record("publish", volume, target);
        Ok(())
    }

    fn unpublish(&self, volume: &VolumeId, target: &Utf8Path) -> Result<(), MountError> {
        self.record("unpublish", volume, target);
        Ok(())
    }

    fn expand(&self, volume: &VolumeId, path: &Utf8Path) -> Result<(), MountError> {
        self.record("expand", volume, path);
        Ok(())
    }

    fn staged_volumes(&self) -> Result<Vec<VolumeId>, MountError> {
        Ok(self.staged())
    }
}

/// Statistics provider answering from a fixed table of paths.
#[derive(Debug, Default)]
pub struct FixedStatsProvider {
    entries: HashMap<Utf8PathBuf, VolumeStats>,
}

impl FixedStatsProvider {
    /// Creates a provider that knows no paths.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `stats` for `path`.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<Utf8PathBuf>, stats: VolumeStats) -> Self {
        self.entries.insert(path.into(), stats);
        self
    }
}

impl StatsProvider for FixedStatsProvider {
    fn stats(&self, path: &Utf8Path) -> Result<VolumeStats, StatsError> {
        self.entries
            .get(path)
            .copied()
            .ok_or_else(|| StatsError::NotFound(path.to_owned()))
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Clones share the same script and invocation log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(
                self.args
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned()),
            )
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        locked(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        locked(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        locked(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        locked(&self.responses)
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets `set` and removes `unset` while holding a global mutex.
    pub async fn apply(set: &[(&str, &str)], unset: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                set.iter()
                    .map(|(key, _)| *key)
                    .chain(unset.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard::apply"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(set.len().saturating_add(unset.len()));
        for (key, value) in set {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in unset {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
