use std::{
    ffi::{OsStr, OsString},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use notify::{
    event::{EventKind, ModifyKind},
    Event, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::RuleStore;
use crate::{errors::Error, Result};

/// Editors often write in several steps; let them finish before re-reading.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Background reload loop for the blocklist file.
///
/// Owns the OS watch; dropping it stops notifications.
pub struct RuleWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl RuleWatcher {
    /// Start watching `store.path()` and reloading `store` on writes.
    ///
    /// The parent directory is watched so that save-by-rename keeps working.
    /// When the path is a symlink (e.g. a mounted ConfigMap whose `..data`
    /// link is swapped), any change in that directory triggers a reload.
    pub fn spawn(store: Arc<RuleStore>, cancel: CancellationToken) -> Result<Self> {
        let path = store.path().to_path_buf();
        let file_name = path
            .file_name()
            .map(OsStr::to_os_string)
            .ok_or_else(|| Error::Config(format!("not a file path: {}", path.display())))?;
        let dir = watch_dir(&path);
        let file_filter = if is_symlink(&path) {
            debug!(
                path = %path.display(),
                "blocklist is a symlink, reloading on any change in its directory"
            );
            None
        } else {
            Some(file_name)
        };

        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Receiver gone means the loop has stopped; nothing left to notify.
            let _ = tx.send(res);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(path = %path.display(), "watching blocklist for changes");

        let task = tokio::spawn(reload_loop(store, file_filter, rx, cancel));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    /// Wait for the reload loop to exit (after `cancel` fires).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "blocklist watcher task failed");
        }
    }
}

async fn reload_loop(
    store: Arc<RuleStore>,
    file_filter: Option<OsString>,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    cancel: CancellationToken,
) {
    loop {
        let res = tokio::select! {
            _ = cancel.cancelled() => break,
            res = rx.recv() => match res {
                Some(res) => res,
                None => break,
            },
        };

        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "blocklist watch error");
                continue;
            }
        };

        if !is_reload_trigger(&event, file_filter.as_deref()) {
            continue;
        }
        debug!(kind = ?event.kind, "blocklist file changed");

        sleep(SETTLE_DELAY).await;
        // Coalesce the burst of events a single save produces.
        while let Ok(extra) = rx.try_recv() {
            if let Err(e) = extra {
                warn!(error = %e, "blocklist watch error");
            }
        }

        match store.reload() {
            Ok(rules) => info!(
                keywords = rules.keywords().len(),
                patterns = rules.patterns().len(),
                "blocklist reloaded"
            ),
            Err(e) => warn!(
                error = %e,
                "failed to reload blocklist, keeping previous rules"
            ),
        }
    }

    debug!("blocklist watcher stopped");
}

/// Whether `event` is a write (or replace) of the watched file, or of any
/// file in the directory when `file_name` is `None`.
pub fn is_reload_trigger(event: &Event, file_name: Option<&OsStr>) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
    );

    kind_matches
        && match file_name {
            Some(name) => event.paths.iter().any(|p| p.file_name() == Some(name)),
            None => true,
        }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
