//! End-to-end behaviour of `LocalBackend` against a real temp directory.

use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use jailfs_vfs::vfs::{
    BaseDirectory, ChangeEvent, ChangeKind, ChangeNotifier, ErrorCode, Follow, HostError,
    LocalBackend, MAX_SYMLINK_HOPS, NativeSubscription, NotifyBatch, NotifySink, PathResolver,
    PathSegments, RawChange, VfsError, VfsOps, VfsResult,
};
use jailfs_vfs::BackendConfig;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `<tmp>/root` is the jail; `<tmp>` itself is outside it.
fn setup() -> (LocalBackend, TempDir) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("root")).unwrap();
    let backend = LocalBackend::new(dir.path().join("root")).unwrap();
    (backend, dir)
}

// ============================================================================
// Resolution scenarios
// ============================================================================

#[tokio::test]
async fn link_climbing_out_of_the_jail_is_rejected() {
    let (backend, _dir) = setup();
    let root = backend.root().to_path_buf();
    symlink("../../etc", root.join("a")).unwrap();

    let resolver = PathResolver::new(BaseDirectory::new(&root).unwrap());
    let err = resolver
        .resolve_segments(PathSegments::from_segments(["a", "b"]), Follow::Final)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = backend.read_file(Path::new("a/b")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn link_to_sibling_directory_resolves_inside() {
    let (backend, _dir) = setup();
    let root = backend.root().to_path_buf();
    std::fs::create_dir(root.join("sub")).unwrap();
    std::fs::write(root.join("sub/file.txt"), b"inside").unwrap();
    symlink("sub", root.join("link")).unwrap();

    let resolver = PathResolver::new(BaseDirectory::new(&root).unwrap());
    let resolved = resolver
        .resolve_segments(PathSegments::from_segments(["link", "file.txt"]), Follow::Final)
        .await
        .unwrap();
    assert_eq!(resolved, root.join("sub/file.txt"));

    assert_eq!(backend.read_file(Path::new("link/file.txt")).await.unwrap(), b"inside");
    assert_eq!(
        backend.real_path(Path::new("link/file.txt")).await.unwrap(),
        Path::new("/sub/file.txt")
    );
}

#[tokio::test]
async fn absolute_link_outside_the_jail_is_rejected() {
    let (backend, dir) = setup();
    std::fs::write(dir.path().join("secret"), b"nope").unwrap();
    symlink(dir.path().join("secret"), backend.root().join("leak")).unwrap();

    let err = backend.read_file(Path::new("leak")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(err.code(), backend.stat(Path::new("leak")).await.unwrap_err().code());
}

#[tokio::test]
async fn symlink_chain_respects_hop_limit() {
    let (backend, _dir) = setup();
    let root = backend.root().to_path_buf();
    std::fs::write(root.join("end"), b"reached").unwrap();

    // l0 -> l1 -> ... -> l{n-1} -> end
    let chain = |n: usize, prefix: &str| {
        for i in 0..n {
            let target = if i + 1 == n {
                "end".to_string()
            } else {
                format!("{prefix}{}", i + 1)
            };
            symlink(target, root.join(format!("{prefix}{i}"))).unwrap();
        }
    };
    chain(MAX_SYMLINK_HOPS, "ok");
    chain(MAX_SYMLINK_HOPS + 1, "long");

    assert_eq!(backend.read_file(Path::new("ok0")).await.unwrap(), b"reached");
    let err = backend.read_file(Path::new("long0")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn link_operations_act_on_the_right_side() {
    let (backend, _dir) = setup();
    let root = backend.root().to_path_buf();
    std::fs::create_dir(root.join("dir")).unwrap();
    std::fs::write(root.join("dir/target.txt"), b"t").unwrap();
    symlink("dir/target.txt", root.join("link")).unwrap();

    assert_eq!(
        backend.read_symlink(Path::new("link")).await.unwrap(),
        Path::new("/dir/target.txt")
    );
    assert_eq!(
        backend.real_path(Path::new("link")).await.unwrap(),
        Path::new("/dir/target.txt")
    );

    backend.remove_file(Path::new("link")).await.unwrap();
    assert!(!backend.exists(Path::new("link")).await.unwrap());
    assert!(backend.exists(Path::new("dir/target.txt")).await.unwrap());
}

#[tokio::test]
async fn exists_is_false_only_for_not_found() {
    let (backend, _dir) = setup();
    let root = backend.root().to_path_buf();
    symlink("self", root.join("self")).unwrap();
    std::fs::write(root.join("file"), b"").unwrap();

    assert!(!backend.exists(Path::new("missing")).await.unwrap());
    assert!(backend.exists(Path::new("file")).await.unwrap());

    let err = backend.exists(Path::new("self")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = backend.exists(Path::new("../outside")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = backend.exists(Path::new("file/child")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotADirectory);
}

// ============================================================================
// Error normalization
// ============================================================================

#[test]
fn host_error_prefix_is_stripped() {
    let host = HostError::new(
        Some("ENOENT".into()),
        "ENOENT: no such file or directory, stat '/x'",
        io::Error::from_raw_os_error(2),
    );
    let err = VfsError::from(host);
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(err.message(), "no such file or directory, stat '/x'");
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn missing_file_is_normalized() {
    let (backend, _dir) = setup();

    let err = backend.read_file(Path::new("absent.txt")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert!(!err.message().starts_with("ENOENT"));
    assert!(err.message().contains("absent.txt"));
}

// ============================================================================
// Streams
// ============================================================================

#[tokio::test]
async fn write_stream_then_read_stream() {
    let (backend, _dir) = setup();

    let mut ws = backend.write_stream(Path::new("big.bin"), Default::default(), None);
    for i in 0..4u8 {
        ws.write(&[i; 1000]).await.unwrap();
    }
    ws.close().await.unwrap();

    let mut options = backend.read_options();
    options.chunk_size = 1024;
    let chunks: Vec<Vec<u8>> = backend
        .read_stream(Path::new("big.bin"), options, None)
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![1024, 1024, 1024, 928]);
    assert_eq!(chunks.concat()[3999], 3);
}

#[tokio::test]
async fn cancelled_read_stream_yields_ecanceled() {
    let (backend, _dir) = setup();
    backend.write_file(Path::new("f"), b"data").await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let items: Vec<_> = backend
        .read_stream(Path::new("f"), backend.read_options(), Some(cancel))
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().unwrap_err().code(), ErrorCode::Cancelled);
}

#[tokio::test]
async fn write_stream_into_missing_directory_fails_on_close() {
    let (backend, _dir) = setup();

    let ws = backend.write_stream(Path::new("no/such/file"), Default::default(), None);
    assert_eq!(ws.close().await.unwrap_err().code(), ErrorCode::NotFound);
}

// ============================================================================
// Watching
// ============================================================================

#[derive(Default)]
struct FakeState {
    sink: Option<NotifySink>,
    subscribes: usize,
    active: usize,
}

#[derive(Default, Clone)]
struct FakeNotifier(Arc<Mutex<FakeState>>);

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
    fn subscribe(&self, _root: &Path, sink: NotifySink) -> VfsResult<Box<dyn NativeSubscription>> {
        let mut state = self.0.lock();
        state.subscribes += 1;
        state.active += 1;
        state.sink = Some(sink);
        Ok(Box::new(FakeSubscription(Arc::clone(&self.0))))
    }
}

impl FakeNotifier {
    fn emit(&self, batch: NotifyBatch) {
        let sink = self.0.lock().sink.clone();
        if let Some(sink) = sink {
            sink(batch);
        }
    }

    fn active(&self) -> usize {
        self.0.lock().active
    }

    fn subscribes(&self) -> usize {
        self.0.lock().subscribes
    }
}

type Seen = Arc<Mutex<Vec<ChangeEvent>>>;

fn watch(backend: &LocalBackend, pattern: &str) -> (jailfs_vfs::vfs::WatchHandle, Seen) {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let handle = backend
        .watch(
            pattern,
            Box::new(move |event| sink.lock().push(event)),
            Box::new(|_: &VfsError| {}),
        )
        .unwrap();
    (handle, seen)
}

#[tokio::test]
async fn watch_fans_out_and_tears_down() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let notifier = FakeNotifier::default();
    let backend = LocalBackend::with_notifier(dir.path(), Arc::new(notifier.clone())).unwrap();
    let root: PathBuf = backend.root().to_path_buf();

    let (md, md_seen) = watch(&backend, "/docs/*.md");
    let (rs, rs_seen) = watch(&backend, "./src/**/*.rs");
    assert_eq!((notifier.subscribes(), notifier.active()), (1, 1));

    notifier.emit(Ok(vec![
        RawChange {
            path: root.join("docs/readme.md"),
            kind: ChangeKind::Modified,
        },
        RawChange {
            path: root.join("src/vfs/lib.rs"),
            kind: ChangeKind::Created,
        },
        RawChange {
            path: root.join("notes.txt"),
            kind: ChangeKind::Deleted,
        },
    ]));

    assert_eq!(
        *md_seen.lock(),
        vec![ChangeEvent {
            path: PathBuf::from("/docs/readme.md"),
            kind: ChangeKind::Modified,
        }]
    );
    assert_eq!(
        *rs_seen.lock(),
        vec![ChangeEvent {
            path: PathBuf::from("./src/vfs/lib.rs"),
            kind: ChangeKind::Created,
        }]
    );

    drop(md);
    assert_eq!(notifier.active(), 1);
    rs.unsubscribe();
    assert_eq!(notifier.active(), 0);
    assert!(!backend.watcher().is_subscribed());

    let (_again, _) = watch(&backend, "**");
    assert_eq!((notifier.subscribes(), notifier.active()), (2, 1));
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn backend_from_config() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();

    let text = format!(
        "root = {:?}\nread_only = true\nchunk_size = 1\n",
        dir.path().display().to_string()
    );
    let config = BackendConfig::from_toml(&text).unwrap();
    let backend = LocalBackend::from_config(&config).unwrap();

    assert!(backend.read_only());
    assert_eq!(backend.read_options().chunk_size, 1);
    assert_eq!(backend.read_file(Path::new("hello.txt")).await.unwrap(), b"hi");
    assert_eq!(
        backend.mkdir(Path::new("new")).await.unwrap_err().code(),
        ErrorCode::PermissionDenied
    );
}
