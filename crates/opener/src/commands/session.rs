//! A synced replica over the file-backed store, for one CLI invocation.
//!
//! Opening loads the store file, starts the replica, and waits for the
//! first snapshot of both collections. Writes go through [`Session::execute`]
//! and are confirmed by watching the repository until the change arrives.
//! Closing shuts the replica down and writes the store back if anything
//! changed.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opener_config::Config;
use opener_core::{
    CollectionWatch, Command as CoreCommand, CommandResult, DeviceRepository, Replica,
    ReplicaState,
};
use opener_store::MemoryStore;
use tracing::{debug, warn};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

pub struct Session {
    replica: Replica<MemoryStore>,
    store: Arc<MemoryStore>,
    store_path: PathBuf,
    confirm_timeout: Duration,
    dirty: AtomicBool,
    pub format: OutputFormat,
    pub color: bool,
    pub quiet: bool,
}

impl Session {
    pub async fn open(global: &GlobalOpts, cfg: &Config) -> Result<Self, CliError> {
        let store_path = global.store.clone().unwrap_or_else(|| cfg.store_path());
        let store = Arc::new(MemoryStore::load(&store_path)?);
        debug!(path = %store_path.display(), "store loaded");

        let mut replica_config = opener_config::to_replica_config(cfg)?;
        if let Some(ms) = global.timeout {
            if ms == 0 {
                return Err(CliError::Validation {
                    field: "timeout".into(),
                    reason: "must be greater than zero".into(),
                });
            }
            replica_config.command_timeout = Duration::from_millis(ms);
        }
        let confirm_timeout = Duration::from_millis(cfg.defaults.confirm_timeout_ms);

        let replica = Replica::new(Arc::clone(&store), replica_config);
        let mut errors = replica.errors();
        replica.start().await?;

        let synced = match tokio::time::timeout(confirm_timeout, replica.wait_synced()).await {
            Ok(result) => result.map_err(CliError::from),
            Err(_) => Err(CliError::Timeout {
                operation: "initial sync".into(),
                millis: confirm_timeout.as_millis(),
            }),
        };
        if let Err(err) = synced {
            replica.shutdown().await;
            return Err(err);
        }

        // Failures from watch attempts that were since reopened.
        while let Ok(err) = errors.try_recv() {
            warn!(error = %err, "feed recovered from");
        }

        Ok(Self {
            replica,
            store,
            store_path,
            confirm_timeout,
            dirty: AtomicBool::new(false),
            format: resolve_format(global, cfg)?,
            color: output::should_color(global.color),
            quiet: global.quiet,
        })
    }

    pub fn repository(&self) -> &DeviceRepository {
        self.replica.repository()
    }

    /// Run a write against the store.
    pub async fn execute(&self, cmd: CoreCommand) -> Result<CommandResult, CliError> {
        debug!(command = ?cmd, "executing");
        self.dirty.store(true, Ordering::Release);
        self.replica.execute(cmd).await.map_err(CliError::from)
    }

    /// Wait until `done` holds for the repository, re-checking every time
    /// the watched collection moves.
    pub async fn confirm<T: Send + Sync + 'static>(
        &self,
        mut watch: CollectionWatch<T>,
        what: &str,
        done: impl Fn(&DeviceRepository) -> bool,
    ) -> Result<(), CliError> {
        let repo = self.repository();
        let wait = async {
            while !done(repo) {
                let Some(version) = watch.changed().await else {
                    return false;
                };
                debug!(collection = %watch.collection(), version, "change observed");
            }
            true
        };
        match tokio::time::timeout(self.confirm_timeout, wait).await {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(CliError::Unconfirmed { what: what.into() }),
        }
    }

    pub fn print(&self, rendered: &str) {
        output::print_output(rendered, self.quiet);
    }

    pub fn store_path(&self) -> &std::path::Path {
        &self.store_path
    }

    pub fn state(&self) -> ReplicaState {
        *self.replica.state().borrow()
    }

    /// Stop the replica and persist the store if a write went through.
    pub async fn close(self) -> Result<(), CliError> {
        self.replica.shutdown().await;
        if self.dirty.load(Ordering::Acquire) {
            self.store.save(&self.store_path)?;
            debug!(path = %self.store_path.display(), "store saved");
        }
        Ok(())
    }
}

/// `--output` wins over `[defaults].output`.
pub fn resolve_format(global: &GlobalOpts, cfg: &Config) -> Result<OutputFormat, CliError> {
    use clap::ValueEnum;

    if let Some(format) = global.output {
        return Ok(format);
    }
    OutputFormat::from_str(&cfg.defaults.output, true).map_err(|_| CliError::Validation {
        field: "defaults.output".into(),
        reason: format!("unknown output format '{}'", cfg.defaults.output),
    })
}
