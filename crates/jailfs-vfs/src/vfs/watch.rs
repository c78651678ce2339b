//! Change-notification fan-out.
//!
//! A backend keeps at most one native subscription on its base directory,
//! however many listeners there are. Each listener carries its own glob; every
//! native event is offered to each listener in absolute form (`/src/a.rs`)
//! first, then relative form (`./src/a.rs`).
//!
//! The subscription is created when the first listener registers and dropped
//! when the last one goes away. Both transitions happen under the same mutex
//! as the registration map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use glob::{MatchOptions, Pattern};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::error::{VfsError, VfsResult};
use super::resolve::{BaseDirectory, VirtualStyle};

/// Case-insensitive, hidden entries included, `*` stops at `/`.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// File or directory was created.
    Created,
    /// File or directory was modified.
    Modified,
    /// File or directory was deleted.
    Deleted,
}

/// A change as reported by the native notifier (real path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// A change delivered to a listener (virtual path, in the form that matched).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// One delivery from the native notifier: a batch of changes or a structural
/// error.
pub type NotifyBatch = VfsResult<Vec<RawChange>>;

/// Callback the native notifier delivers into.
pub type NotifySink = Arc<dyn Fn(NotifyBatch) + Send + Sync>;

/// Listener callback for matching changes.
pub type EventCallback = Box<dyn Fn(ChangeEvent) + Send + Sync>;

/// Listener callback for notifier errors.
pub type ErrorCallback = Box<dyn Fn(&VfsError) + Send + Sync>;

/// A live native subscription. Dropping it unsubscribes.
pub trait NativeSubscription: Send {}

/// Source of native change events.
pub trait ChangeNotifier: Send + Sync {
    /// Watch `root` recursively, delivering into `sink` until the returned
    /// subscription is dropped.
    fn subscribe(&self, root: &Path, sink: NotifySink) -> VfsResult<Box<dyn NativeSubscription>>;
}

/// [`ChangeNotifier`] backed by `notify`'s platform watcher.
#[derive(Debug, Clone)]
pub struct NotifyWatcher {
    poll_interval: Duration,
}

impl Default for NotifyWatcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl NotifyWatcher {
    /// `poll_interval` only matters when `notify` falls back to polling.
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

struct NotifySubscription {
    _watcher: RecommendedWatcher,
}

impl NativeSubscription for NotifySubscription {}

impl ChangeNotifier for NotifyWatcher {
    fn subscribe(&self, root: &Path, sink: NotifySink) -> VfsResult<Box<dyn NativeSubscription>> {
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let changes = changes_from_event(event);
                    if !changes.is_empty() {
                        sink(Ok(changes));
                    }
                }
                Err(e) => sink(Err(e.into())),
            },
            notify::Config::default().with_poll_interval(self.poll_interval),
        )?;

        watcher.watch(root, RecursiveMode::Recursive)?;

        tracing::info!(path = %root.display(), "change watcher started");
        Ok(Box::new(NotifySubscription { _watcher: watcher }))
    }
}

/// Translate one `notify` event into create/update/delete changes.
///
/// A rename is reported as the old path deleted and the new path created.
fn changes_from_event(event: Event) -> Vec<RawChange> {
    let uniform = |kind: ChangeKind, paths: Vec<PathBuf>| -> Vec<RawChange> {
        paths
            .into_iter()
            .map(|path| RawChange { path, kind })
            .collect()
    };

    match event.kind {
        EventKind::Create(_) => uniform(ChangeKind::Created, event.paths),
        EventKind::Remove(_) => uniform(ChangeKind::Deleted, event.paths),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => uniform(ChangeKind::Deleted, event.paths),
            RenameMode::To => uniform(ChangeKind::Created, event.paths),
            // Backends that emit `Both` also emit the `From`/`To` halves.
            RenameMode::Both => Vec::new(),
            // No direction given (FSEvents): the path's presence decides.
            RenameMode::Any | RenameMode::Other => event
                .paths
                .into_iter()
                .map(|path| {
                    let kind = if path.symlink_metadata().is_ok() {
                        ChangeKind::Created
                    } else {
                        ChangeKind::Deleted
                    };
                    RawChange { path, kind }
                })
                .collect(),
        },
        EventKind::Modify(_) => uniform(ChangeKind::Modified, event.paths),
        _ => Vec::new(),
    }
}

struct Registration {
    pattern: Pattern,
    on_event: EventCallback,
    on_error: ErrorCallback,
}

impl Registration {
    fn matches(&self, path: &Path) -> bool {
        self.pattern.matches_path_with(path, MATCH_OPTIONS)
    }
}

#[derive(Default)]
struct WatchState {
    next_id: u64,
    registrations: HashMap<u64, Arc<Registration>>,
    subscription: Option<Box<dyn NativeSubscription>>,
}

/// Fans one native subscription out to many glob-filtered listeners.
pub struct WatchMultiplexer {
    base: Arc<BaseDirectory>,
    notifier: Arc<dyn ChangeNotifier>,
    state: Arc<Mutex<WatchState>>,
}

impl std::fmt::Debug for WatchMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchMultiplexer")
            .field("base", &self.base.path())
            .field("state", &"<locked>")
            .finish()
    }
}

impl WatchMultiplexer {
    pub fn new(base: Arc<BaseDirectory>, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            base,
            notifier,
            state: Arc::new(Mutex::new(WatchState::default())),
        }
    }

    /// Register a listener for changes whose virtual path matches `pattern`.
    ///
    /// The listener stays registered until the returned handle is dropped.
    pub fn register(
        &self,
        pattern: &str,
        on_event: EventCallback,
        on_error: ErrorCallback,
    ) -> VfsResult<WatchHandle> {
        let compiled = Pattern::new(pattern).map_err(|e| {
            VfsError::invalid_argument(format!("invalid glob pattern {pattern:?}: {e}"))
        })?;

        let mut state = self.state.lock();
        if state.subscription.is_none() {
            let sink = fan_out(Arc::downgrade(&self.state), Arc::clone(&self.base));
            state.subscription = Some(self.notifier.subscribe(self.base.path(), sink)?);
            tracing::debug!(path = %self.base.path().display(), "native subscription created");
        }

        let id = state.next_id;
        state.next_id += 1;
        state.registrations.insert(
            id,
            Arc::new(Registration {
                pattern: compiled,
                on_event,
                on_error,
            }),
        );
        tracing::debug!(id, pattern, "watch registered");

        Ok(WatchHandle {
            id,
            state: Arc::downgrade(&self.state),
        })
    }

    /// Number of live listeners.
    pub fn registration_count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    /// Whether a native subscription is currently held.
    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscription.is_some()
    }
}

fn fan_out(state: Weak<Mutex<WatchState>>, base: Arc<BaseDirectory>) -> NotifySink {
    Arc::new(move |batch: NotifyBatch| {
        let Some(state) = state.upgrade() else {
            return;
        };
        // Snapshot so callbacks run unlocked and may (un)register.
        let registrations: Vec<Arc<Registration>> =
            state.lock().registrations.values().cloned().collect();

        match batch {
            Ok(changes) => {
                for change in changes {
                    dispatch(&base, &registrations, change);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "change notifier reported an error");
                for registration in &registrations {
                    (registration.on_error)(&err);
                }
            }
        }
    })
}

fn dispatch(base: &BaseDirectory, registrations: &[Arc<Registration>], change: RawChange) {
    let (Ok(absolute), Ok(relative)) = (
        base.to_virtual(&change.path, VirtualStyle::Absolute),
        base.to_virtual(&change.path, VirtualStyle::Relative),
    ) else {
        tracing::trace!(path = %change.path.display(), "ignoring change outside the base");
        return;
    };

    for registration in registrations {
        let path = if registration.matches(&absolute) {
            &absolute
        } else if registration.matches(&relative) {
            &relative
        } else {
            continue;
        };
        (registration.on_event)(ChangeEvent {
            path: path.clone(),
            kind: change.kind,
        });
    }
}

/// Keeps a listener registered. Dropping it (or calling
/// [`unsubscribe`](Self::unsubscribe)) removes the listener, and the last
/// removal tears down the native subscription.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct WatchHandle {
    id: u64,
    state: Weak<Mutex<WatchState>>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").field("id", &self.id).finish()
    }
}

impl WatchHandle {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let teardown = {
            let mut state = state.lock();
            state.registrations.remove(&self.id);
            if state.registrations.is_empty() {
                state.subscription.take()
            } else {
                None
            }
        };
        if teardown.is_some() {
            tracing::debug!(id = self.id, "last watch removed, dropping native subscription");
        }
        // Dropped outside the lock: a notifier may be mid-delivery.
        drop(teardown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::error::ErrorCode;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeState {
        sink: Option<NotifySink>,
        subscribes: usize,
        active: usize,
    }

    #[derive(Default, Clone)]
    struct FakeNotifier {
        inner: Arc<Mutex<FakeState>>,
    }

    struct FakeSubscription(Arc<Mutex<FakeState>>);

    impl NativeSubscription for FakeSubscription {}

    impl Drop for FakeSubscription {
        fn drop(&mut self) {
            let mut state = self.0.lock();
            state.active -= 1;
            state.sink = None;
        }
    }

    impl ChangeNotifier for FakeNotifier {
        fn subscribe(
            &self,
            _root: &Path,
            sink: NotifySink,
        ) -> VfsResult<Box<dyn NativeSubscription>> {
            let mut state = self.inner.lock();
            state.subscribes += 1;
            state.active += 1;
            state.sink = Some(sink);
            Ok(Box::new(FakeSubscription(Arc::clone(&self.inner))))
        }
    }

    impl FakeNotifier {
        fn emit(&self, batch: NotifyBatch) {
            let sink = self.inner.lock().sink.clone();
            if let Some(sink) = sink {
                sink(batch);
            }
        }

        fn counts(&self) -> (usize, usize) {
            let state = self.inner.lock();
            (state.subscribes, state.active)
        }
    }

    type Seen = Arc<Mutex<Vec<ChangeEvent>>>;

    fn ignore_errors() -> ErrorCallback {
        Box::new(|_: &VfsError| {})
    }

    fn setup() -> (WatchMultiplexer, FakeNotifier, Arc<BaseDirectory>, TempDir) {
        let dir = TempDir::new().unwrap();
        let base = Arc::new(BaseDirectory::new(dir.path()).unwrap());
        let notifier = FakeNotifier::default();
        let mux = WatchMultiplexer::new(Arc::clone(&base), Arc::new(notifier.clone()));
        (mux, notifier, base, dir)
    }

    fn listen(mux: &WatchMultiplexer, pattern: &str) -> (WatchHandle, Seen) {
        let seen: Seen = Arc::default();
        let sink = Arc::clone(&seen);
        let handle = mux
            .register(
                pattern,
                Box::new(move |event| sink.lock().push(event)),
                ignore_errors(),
            )
            .unwrap();
        (handle, seen)
    }

    fn change(base: &BaseDirectory, rel: &str, kind: ChangeKind) -> RawChange {
        RawChange {
            path: base.path().join(rel),
            kind,
        }
    }

    #[test]
    fn test_single_subscription_for_many_listeners() {
        let (mux, notifier, _base, _dir) = setup();

        let (a, _) = listen(&mux, "/docs/*.md");
        let (b, _) = listen(&mux, "./src/*.rs");
        assert_eq!(notifier.counts(), (1, 1));
        assert_eq!(mux.registration_count(), 2);

        drop(a);
        assert!(mux.is_subscribed());
        b.unsubscribe();
        assert!(!mux.is_subscribed());
        assert_eq!(notifier.counts(), (1, 0));

        let (_c, _) = listen(&mux, "**");
        assert_eq!(notifier.counts(), (2, 1));
    }

    #[test]
    fn test_disjoint_listeners_fire_independently() {
        let (mux, notifier, base, _dir) = setup();
        let (_a, docs) = listen(&mux, "/docs/*.md");
        let (_b, src) = listen(&mux, "./src/*.rs");

        notifier.emit(Ok(vec![change(&base, "docs/guide.md", ChangeKind::Modified)]));
        notifier.emit(Ok(vec![change(&base, "src/lib.rs", ChangeKind::Created)]));

        assert_eq!(
            *docs.lock(),
            vec![ChangeEvent {
                path: PathBuf::from("/docs/guide.md"),
                kind: ChangeKind::Modified,
            }]
        );
        assert_eq!(
            *src.lock(),
            vec![ChangeEvent {
                path: PathBuf::from("./src/lib.rs"),
                kind: ChangeKind::Created,
            }]
        );
    }

    #[test]
    fn test_absolute_form_wins_when_both_match() {
        let (mux, notifier, base, _dir) = setup();
        let (_a, seen) = listen(&mux, "**");

        notifier.emit(Ok(vec![change(&base, "a/b.txt", ChangeKind::Deleted)]));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, PathBuf::from("/a/b.txt"));
    }

    #[test]
    fn test_case_insensitive_and_hidden() {
        let (mux, notifier, base, _dir) = setup();
        let (_a, seen) = listen(&mux, "/*.md");

        notifier.emit(Ok(vec![
            change(&base, "README.MD", ChangeKind::Modified),
            change(&base, ".notes.md", ChangeKind::Created),
            change(&base, "sub/deep.md", ChangeKind::Created),
        ]));

        let paths: Vec<PathBuf> = seen.lock().iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/README.MD"), PathBuf::from("/.notes.md")]);
    }

    #[test]
    fn test_changes_outside_base_are_dropped() {
        let (mux, notifier, _base, _dir) = setup();
        let (_a, seen) = listen(&mux, "**");

        notifier.emit(Ok(vec![RawChange {
            path: PathBuf::from("/somewhere/else.txt"),
            kind: ChangeKind::Modified,
        }]));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_errors_broadcast_to_all() {
        let (mux, notifier, _base, _dir) = setup();
        let errors = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for pattern in ["/a/*", "/b/*"] {
            let errors = Arc::clone(&errors);
            handles.push(
                mux.register(
                    pattern,
                    Box::new(|_| {}),
                    Box::new(move |err: &VfsError| errors.lock().push(err.code())),
                )
                .unwrap(),
            );
        }

        notifier.emit(Err(VfsError::other("inotify queue overflow")));
        assert_eq!(*errors.lock(), vec![ErrorCode::Unknown, ErrorCode::Unknown]);
    }

    #[test]
    fn test_invalid_pattern_rejected_without_subscribing() {
        let (mux, notifier, _base, _dir) = setup();
        let err = mux
            .register("[unclosed", Box::new(|_| {}), ignore_errors())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(notifier.counts(), (0, 0));
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let (mux, notifier, base, _dir) = setup();
        let slot: Arc<Mutex<Option<WatchHandle>>> = Arc::default();
        let inner = Arc::clone(&slot);

        let handle = mux
            .register(
                "**",
                Box::new(move |_| {
                    inner.lock().take();
                }),
                ignore_errors(),
            )
            .unwrap();
        *slot.lock() = Some(handle);

        notifier.emit(Ok(vec![change(&base, "x", ChangeKind::Created)]));
        assert_eq!(mux.registration_count(), 0);
        assert!(!mux.is_subscribed());
    }

    fn rename_event(mode: RenameMode, paths: &[&Path]) -> Event {
        paths.iter().fold(
            Event::new(EventKind::Modify(ModifyKind::Name(mode))),
            |event, path| event.add_path(path.to_path_buf()),
        )
    }

    #[test]
    fn test_rename_halves_map_to_delete_and_create() {
        let old = Path::new("/jail/old.txt");
        let new = Path::new("/jail/new.txt");

        assert_eq!(
            changes_from_event(rename_event(RenameMode::From, &[old])),
            vec![RawChange {
                path: old.to_path_buf(),
                kind: ChangeKind::Deleted
            }]
        );
        assert_eq!(
            changes_from_event(rename_event(RenameMode::To, &[new])),
            vec![RawChange {
                path: new.to_path_buf(),
                kind: ChangeKind::Created
            }]
        );
        // Already covered by the From/To halves.
        assert!(changes_from_event(rename_event(RenameMode::Both, &[old, new])).is_empty());
    }

    #[test]
    fn test_undirected_rename_uses_presence() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("here.txt");
        let gone = dir.path().join("gone.txt");
        std::fs::write(&present, b"x").unwrap();

        let changes = changes_from_event(rename_event(RenameMode::Any, &[&gone, &present]));
        assert_eq!(
            changes,
            vec![
                RawChange {
                    path: gone,
                    kind: ChangeKind::Deleted
                },
                RawChange {
                    path: present,
                    kind: ChangeKind::Created
                },
            ]
        );
    }

    #[test]
    fn test_content_and_metadata_changes_are_modifications() {
        let path = PathBuf::from("/jail/a.txt");
        let data = Event::new(EventKind::Modify(ModifyKind::Data(
            notify::event::DataChange::Content,
        )))
        .add_path(path.clone());
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Read))
            .add_path(path.clone());

        assert_eq!(
            changes_from_event(data),
            vec![RawChange {
                path,
                kind: ChangeKind::Modified
            }]
        );
        assert!(changes_from_event(access).is_empty());
    }

    #[test]
    fn test_native_rename_reports_delete_then_create() {
        let dir = TempDir::new().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        std::fs::write(root.join("old.txt"), b"x").unwrap();

        let (tx, rx) = std::sync::mpsc::channel::<RawChange>();
        let tx = Mutex::new(tx);
        let sink: NotifySink = Arc::new(move |batch: NotifyBatch| {
            for change in batch.into_iter().flatten() {
                let _ = tx.lock().send(change);
            }
        });
        let _subscription = NotifyWatcher::default().subscribe(&root, sink).unwrap();

        std::fs::rename(root.join("old.txt"), root.join("new.txt")).unwrap();

        let mut deleted = false;
        let mut created = false;
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !(deleted && created) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let Ok(change) = rx.recv_timeout(remaining) else {
                break;
            };
            assert_ne!(change.kind, ChangeKind::Modified, "rename seen as {change:?}");
            deleted |= change.path.ends_with("old.txt") && change.kind == ChangeKind::Deleted;
            created |= change.path.ends_with("new.txt") && change.kind == ChangeKind::Created;
        }
        assert!(deleted, "old name never reported deleted");
        assert!(created, "new name never reported created");
    }
}
