//! Debounced folder watcher.
//!
//! Raw `notify` events are filtered through an [`IgnoreFilter`] and coalesced:
//! a notification is emitted once no relevant event has arrived for the
//! debounce window. Notifications carry no diff; the consumer re-syncs the
//! whole tree.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dibs_sync::IgnoreFilter;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DaemonError;

/// A stream of "something changed" notifications for one directory tree.
///
/// Not restartable: once stopped, [`FolderWatcher::next`] yields `None`.
#[derive(Debug)]
pub struct FolderWatcher {
    root: PathBuf,
    changes: mpsc::Receiver<()>,
    stop: CancellationToken,
    debouncer: JoinHandle<()>,
    _watcher: RecommendedWatcher,
}

impl FolderWatcher {
    /// Watch `root` recursively. Paths the filter ignores never produce a
    /// notification.
    pub fn watch(root: &Path, filter: IgnoreFilter, window: Duration) -> Result<Self, DaemonError> {
        // Canonical so event paths (real paths) compare against the filter root.
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
            Ok(event) => {
                if !is_relevant_event_kind(&event.kind) {
                    return;
                }
                for path in event.paths {
                    let _ = raw_tx.send(path);
                }
            }
            Err(err) => tracing::warn!(error = %err, "watcher event error"),
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let (changes_tx, changes) = mpsc::channel::<()>(1);
        let stop = CancellationToken::new();
        let debouncer = tokio::spawn(debounce_changes(
            raw_rx,
            filter,
            window,
            changes_tx,
            stop.clone(),
        ));

        tracing::info!(root = %root.display(), window_ms = window.as_millis() as u64, "watching for changes");
        Ok(Self {
            root,
            changes,
            stop,
            debouncer,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wait for the next coalesced change.
    pub async fn next(&mut self) -> Option<()> {
        self.changes.recv().await
    }

    /// Stop producing notifications. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.stop.cancel();
        self.debouncer.abort();
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Coalesce relevant paths from `raw` into single notifications on `out`.
///
/// After the first relevant path, waits until `window` passes without another
/// relevant path, then emits. `out` holds at most one pending notification, so
/// changes made while the consumer is busy fold into the pending one.
pub(crate) async fn debounce_changes(
    mut raw: mpsc::UnboundedReceiver<PathBuf>,
    filter: IgnoreFilter,
    window: Duration,
    out: mpsc::Sender<()>,
    stop: CancellationToken,
) {
    loop {
        // Idle: wait for the first relevant change.
        let first = tokio::select! {
            _ = stop.cancelled() => return,
            path = raw.recv() => path,
        };
        let Some(path) = first else { return };
        if filter.is_ignored(&path) {
            continue;
        }
        tracing::debug!(path = %path.display(), "change detected");

        // Settling: push the deadline out on every further relevant change.
        let mut deadline = Instant::now() + window;
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => break,
                path = raw.recv() => match path {
                    Some(path) if !filter.is_ignored(&path) => deadline = Instant::now() + window,
                    Some(_) => {}
                    None => break,
                },
            }
        }

        match out.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::time::advance;

    use super::*;

    struct Harness {
        raw: mpsc::UnboundedSender<PathBuf>,
        out: mpsc::Receiver<()>,
        stop: CancellationToken,
        root: PathBuf,
        _dir: TempDir,
    }

    fn harness(window: Duration) -> Harness {
        let dir = TempDir::new().expect("dir");
        let filter = IgnoreFilter::new(dir.path(), &["*.swp".to_owned()]).expect("filter");
        let root = filter.root().to_path_buf();
        let filter = filter.exclude_dir(&root.join("push"));
        let (raw, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, out) = mpsc::channel(1);
        let stop = CancellationToken::new();
        tokio::spawn(debounce_changes(raw_rx, filter, window, out_tx, stop.clone()));
        Harness {
            raw,
            out,
            stop,
            root,
            _dir: dir,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let window = Duration::from_millis(100);
        let mut h = harness(window);

        for i in 0..5 {
            h.raw.send(h.root.join(format!("main{i}.go"))).expect("send");
            settle().await;
            advance(Duration::from_millis(10)).await;
        }
        settle().await;
        assert!(h.out.try_recv().is_err(), "still inside the window");

        advance(Duration::from_millis(150)).await;
        settle().await;
        assert!(h.out.try_recv().is_ok(), "one notification after the burst");
        assert!(h.out.try_recv().is_err(), "burst collapses to one notification");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn ignored_paths_never_notify() {
        let mut h = harness(Duration::from_millis(50));

        h.raw.send(h.root.join("push").join("main.go")).expect("send");
        h.raw.send(h.root.join(".main.go.swp")).expect("send");
        settle().await;
        advance(Duration::from_millis(500)).await;
        settle().await;

        assert!(h.out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn busy_consumer_sees_one_pending_notification() {
        let window = Duration::from_millis(50);
        let mut h = harness(window);

        for _ in 0..3 {
            h.raw.send(h.root.join("lib.go")).expect("send");
            settle().await;
            advance(Duration::from_millis(200)).await;
            settle().await;
        }

        assert!(h.out.try_recv().is_ok());
        assert!(h.out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn stop_ends_the_stream() {
        let mut h = harness(Duration::from_millis(50));
        h.stop.cancel();
        settle().await;
        assert!(h.out.recv().await.is_none());
    }

    #[tokio::test]
    async fn real_write_produces_a_notification() {
        let dir = TempDir::new().expect("dir");
        let filter = IgnoreFilter::new(dir.path(), &[]).expect("filter");
        let mut watcher =
            FolderWatcher::watch(dir.path(), filter, Duration::from_millis(50)).expect("watch");

        std::fs::write(dir.path().join("main.go"), "package main").expect("write");

        let notified = tokio::time::timeout(Duration::from_secs(10), watcher.next()).await;
        assert_eq!(notified.expect("notification in time"), Some(()));

        watcher.stop();
        let ended = tokio::time::timeout(Duration::from_secs(5), watcher.next()).await;
        assert_eq!(ended.expect("stream ends"), None);
    }
}
