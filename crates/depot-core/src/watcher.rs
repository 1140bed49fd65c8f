//! Filesystem watch: invalidates the cache when the package folder
//! changes under us.
//!
//! Events flow through a bounded channel into a dedicated drain thread
//! that calls [`CacheCell::invalidate`]; the notify callback itself never
//! touches cache state. The watch is coarse: any create, modify, remove,
//! or rename touching an archive invalidates the whole index rather than
//! the single changed file. Invalidation is idempotent, so rapid-fire
//! duplicate events are harmless and a full channel just means an
//! invalidation is already pending.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::bounded;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::debug;

use crate::cache::CacheCell;
use crate::error::Result;
use depot_package::ARCHIVE_EXTENSION;

const CHANNEL_CAPACITY: usize = 64;

/// Keeps the watcher and its drain thread alive. Dropping the guard stops
/// the watcher, closes the channel, and joins the thread.
pub(crate) struct WatchGuard {
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        // Dropping the watcher drops the channel sender, which ends the
        // drain loop.
        self.watcher.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Whether an event concerns a package archive.
///
/// Everything else under the root (the metadata store's own files, delist
/// markers, stray downloads) must not churn the cache.
fn touches_archive(event: &Event) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|path| path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION))
}

/// Starts watching `root` recursively, invalidating `cell` on changes.
pub(crate) fn watch_root(root: &Path, cell: Arc<CacheCell>) -> Result<WatchGuard> {
    let (tx, rx) = bounded::<()>(CHANNEL_CAPACITY);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if touches_archive(&event) {
                    let _ = tx.try_send(());
                }
            }
        },
        Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;

    let thread = std::thread::Builder::new()
        .name("depot-watch".to_string())
        .spawn(move || {
            while rx.recv().is_ok() {
                // Collapse bursts into a single invalidation.
                while rx.try_recv().is_ok() {}
                debug!("package folder changed, invalidating index");
                cell.invalidate();
            }
        })
        .map_err(notify::Error::io)?;

    Ok(WatchGuard {
        watcher: Some(watcher),
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use notify::event::{CreateKind, ModifyKind};

    use super::*;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_archive_events_are_relevant() {
        let create = event(EventKind::Create(CreateKind::File), "/root/Foo.1.0.0.dpk");
        assert!(touches_archive(&create));

        let modify = event(
            EventKind::Modify(ModifyKind::Any),
            "/root/sub/Bar.2.0.0.dpk",
        );
        assert!(touches_archive(&modify));
    }

    #[test]
    fn test_other_files_are_ignored() {
        let store = event(EventKind::Modify(ModifyKind::Any), "/root/.depot/cache.db");
        assert!(!touches_archive(&store));

        let marker = event(
            EventKind::Create(CreateKind::File),
            "/root/Foo.1.0.0.dpk.delisted",
        );
        assert!(!touches_archive(&marker));

        let access = event(
            EventKind::Access(notify::event::AccessKind::Any),
            "/root/Foo.1.0.0.dpk",
        );
        assert!(!touches_archive(&access));
    }
}
