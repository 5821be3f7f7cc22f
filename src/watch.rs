//! Background watching of a single file for content changes.
//!
//! Identity and trust material is rotated by writing a fresh file to the
//! side and renaming it over the target, which deletes and recreates the
//! watched path. A watch registered on the file itself would be lost at
//! the first rotation, so the watch goes on the parent directory with
//! create, modify, and delete filters, and events are filtered down to
//! the watched file's basename.
//!
//! Each watched file owns one named background thread that blocks on the
//! OS watch channel. The callback runs synchronously on that thread and
//! is expected to be short (the live managers rebuild a snapshot and swap
//! one reference). A panicking callback or a lost OS watch registration
//! re-arms the loop exactly once; a second failure ends the thread
//! cleanly, leaving the owning manager serving its last good delegate.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::api::Error;

enum WatchMessage {
    Event(notify::Result<Event>),
    Shutdown,
}

/// Handle owning one file watch. Dropping it signals the background
/// thread to exit; the thread is never joined, so a drop (or a process
/// shutdown) does not block on it.
#[derive(Debug)]
pub(crate) struct WatchHandle {
    shutdown: mpsc::Sender<WatchMessage>,
    #[cfg_attr(not(test), allow(dead_code))]
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(WatchMessage::Shutdown);
    }
}

impl WatchHandle {
    #[cfg(test)]
    pub(crate) fn join(mut self) {
        let _ = self.shutdown.send(WatchMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn arm(parent: &Path, tx: mpsc::Sender<WatchMessage>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |event| {
        let _ = tx.send(WatchMessage::Event(event));
    })?;
    watcher.watch(parent, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Start watching `path` for content changes, invoking `callback` at
/// least once per observable change.
///
/// Fails with [`Error::WatchSetup`] if the OS watch cannot be registered;
/// the caller decides whether to degrade to serving without hot reload.
pub(crate) fn watch(
    path: PathBuf,
    callback: impl Fn() + Send + 'static,
) -> Result<WatchHandle, Error> {
    let parent = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => PathBuf::from("."),
        Some(p) => p.to_path_buf(),
        None => {
            return Err(Error::WatchSetup(
                path,
                notify::Error::generic("watched path has no parent directory"),
            ));
        }
    };
    let Some(basename) = path.file_name().map(OsString::from) else {
        return Err(Error::WatchSetup(
            path,
            notify::Error::generic("watched path has no file name"),
        ));
    };

    let (tx, rx) = mpsc::channel();
    let watcher = arm(&parent, tx.clone()).map_err(|e| Error::WatchSetup(path.clone(), e))?;
    let shutdown = tx.clone();
    let thread = std::thread::Builder::new()
        .name(format!("file-watcher-{}", path.display()))
        .spawn(move || run(watcher, parent, path, basename, callback, rx, tx))?;
    Ok(WatchHandle {
        shutdown,
        thread: Some(thread),
    })
}

fn run(
    mut watcher: RecommendedWatcher,
    parent: PathBuf,
    path: PathBuf,
    basename: OsString,
    callback: impl Fn(),
    rx: mpsc::Receiver<WatchMessage>,
    tx: mpsc::Sender<WatchMessage>,
) {
    log::info!("Started watching {}", path.display());
    let mut rearmed = false;
    loop {
        match rx.recv() {
            Err(_) | Ok(WatchMessage::Shutdown) => break,
            Ok(WatchMessage::Event(Err(e))) => {
                log::warn!("Watch on {} lost: {}", path.display(), e);
                if rearmed {
                    break;
                }
                match arm(&parent, tx.clone()) {
                    Ok(fresh) => {
                        watcher = fresh;
                        rearmed = true;
                    }
                    Err(e) => {
                        log::warn!("Could not re-arm watch on {}: {}", path.display(), e);
                        break;
                    }
                }
            }
            Ok(WatchMessage::Event(Ok(event))) => {
                if !(event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove()) {
                    continue;
                }
                if !event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(basename.as_os_str()))
                {
                    continue;
                }
                if std::panic::catch_unwind(AssertUnwindSafe(&callback)).is_err() {
                    log::error!("Change callback for {} panicked", path.display());
                    if rearmed {
                        break;
                    }
                    rearmed = true;
                }
            }
        }
    }
    drop(watcher);
    log::info!("Stopped watching {}", path.display());
}
