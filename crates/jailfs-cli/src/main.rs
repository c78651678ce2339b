//! jailfs command-line tool.
//!
//! Runs filesystem operations against a directory tree that nothing can
//! escape, following symlinks only while they stay inside the root.
//!
//! Usage:
//!   jailfs --root ./sandbox ls /
//!   jailfs --root ./sandbox cat docs/readme.md
//!   echo hi | jailfs --root ./sandbox write notes.txt
//!   jailfs --config jailfs.toml watch '/src/**/*.rs'
//!
//! Set `RUST_LOG=jailfs_vfs=debug` to see resolution failures.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt};

use jailfs_vfs::vfs::{ChangeEvent, FileType, WriteStreamOptions};
use jailfs_vfs::{BackendConfig, LocalBackend, SymlinkTarget, VfsError, VfsOps};

/// Filesystem operations inside a jailed directory.
#[derive(Parser, Debug)]
#[command(name = "jailfs")]
#[command(about = "Filesystem operations jailed under one directory")]
struct Args {
    /// TOML config file (root, read_only, chunk_size, [watch])
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Jail root; overrides the config file's root
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Refuse every mutating operation
    #[arg(long)]
    read_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: PathBuf,
        /// Show entry types
        #[arg(short, long)]
        long: bool,
    },
    /// Print a file to stdout
    Cat { path: PathBuf },
    /// Show file attributes
    Stat { path: PathBuf },
    /// Print the fully resolved virtual path
    Realpath { path: PathBuf },
    /// Print a symlink's target
    Readlink { path: PathBuf },
    /// Write stdin to a file
    Write {
        path: PathBuf,
        /// Append instead of truncating
        #[arg(short, long)]
        append: bool,
    },
    /// Create a directory
    Mkdir { path: PathBuf },
    /// Remove a file, link or directory
    Rm {
        path: PathBuf,
        /// Remove directories and their contents
        #[arg(short, long)]
        recursive: bool,
    },
    /// Copy a file or directory
    Cp {
        from: PathBuf,
        to: PathBuf,
        /// Overwrite an existing destination file
        #[arg(short, long)]
        force: bool,
    },
    /// Rename a file or directory
    Mv { from: PathBuf, to: PathBuf },
    /// Create a symbolic link at LINK pointing to TARGET
    Ln {
        target: PathBuf,
        link: PathBuf,
        /// Store TARGET as a path from the jail root
        #[arg(short, long)]
        absolute: bool,
    },
    /// Print changes matching a glob until interrupted
    Watch {
        #[arg(default_value = "**")]
        pattern: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries file data; logs go to stderr
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let backend = open_backend(&args)?;
    run(&backend, args.command).await
}

fn open_backend(args: &Args) -> Result<LocalBackend> {
    let mut config = match &args.config {
        Some(path) => BackendConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => match &args.root {
            Some(root) => BackendConfig::new(root),
            None => bail!("either --root or --config is required"),
        },
    };
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    config.read_only |= args.read_only;

    let backend = LocalBackend::from_config(&config)
        .with_context(|| format!("opening {}", config.root.display()))?;
    tracing::debug!(root = %backend.root().display(), read_only = config.read_only, "backend ready");
    Ok(backend)
}

async fn run(backend: &LocalBackend, command: Command) -> Result<()> {
    match command {
        Command::Ls { path, long } => {
            if long {
                for entry in backend.read_dirent(&path).await? {
                    let tag = match entry.kind {
                        FileType::Directory => 'd',
                        FileType::Symlink => 'l',
                        FileType::File => '-',
                    };
                    println!("{tag} {}", entry.name);
                }
            } else {
                for name in backend.read_dir(&path).await? {
                    println!("{name}");
                }
            }
        }
        Command::Cat { path } => {
            let mut stdout = tokio::io::stdout();
            let mut stream = backend.read_stream(&path, backend.read_options(), None);
            while let Some(chunk) = stream.next().await {
                stdout.write_all(&chunk?).await?;
            }
            stdout.flush().await?;
        }
        Command::Stat { path } => {
            let attr = backend.stat(&path).await?;
            println!("kind:    {:?}", attr.kind);
            println!("symlink: {}", attr.is_symlink);
            println!("size:    {}", attr.size);
            println!("mode:    {:o}", attr.perm);
            println!("nlink:   {}", attr.nlink);
        }
        Command::Realpath { path } => {
            println!("{}", backend.real_path(&path).await?.display());
        }
        Command::Readlink { path } => {
            println!("{}", backend.read_symlink(&path).await?.display());
        }
        Command::Write { path, append } => {
            let mut stdin = tokio::io::stdin();
            let mut sink = backend.write_stream(&path, WriteStreamOptions { append }, None);
            let mut buf = vec![0u8; backend.read_options().chunk_size];
            loop {
                let n = stdin.read(&mut buf).await.context("reading stdin")?;
                if n == 0 {
                    break;
                }
                sink.write(&buf[..n]).await?;
            }
            sink.close().await?;
        }
        Command::Mkdir { path } => backend.mkdir(&path).await?,
        Command::Rm { path, recursive } => {
            let attr = backend.stat(&path).await;
            match attr {
                Ok(attr) if attr.is_dir() && !attr.is_symlink => {
                    backend.remove_dir(&path, recursive).await?
                }
                _ => backend.remove_file(&path).await?,
            }
        }
        Command::Cp { from, to, force } => {
            if backend.stat(&from).await?.is_dir() {
                backend.copy_dir(&from, &to).await?;
            } else {
                backend.copy_file(&from, &to, force).await?;
            }
        }
        Command::Mv { from, to } => backend.rename(&from, &to).await?,
        Command::Ln {
            target,
            link,
            absolute,
        } => {
            let style = if absolute {
                SymlinkTarget::Absolute
            } else {
                SymlinkTarget::Relative
            };
            backend.symlink(&link, &target, style).await?;
        }
        Command::Watch { pattern } => watch(backend, &pattern).await?,
    }
    Ok(())
}

async fn watch(backend: &LocalBackend, pattern: &str) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<ChangeEvent, String>>();
    let errors = tx.clone();

    let _handle = backend.watch(
        pattern,
        Box::new(move |event| {
            let _ = tx.send(Ok(event));
        }),
        Box::new(move |err: &VfsError| {
            let _ = errors.send(Err(err.to_string()));
        }),
    )?;
    tracing::info!(pattern, root = %backend.root().display(), "watching");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            item = rx.recv() => match item {
                Some(Ok(event)) => println!("{:?}\t{}", event.kind, event.path.display()),
                Some(Err(err)) => tracing::warn!(error = %err, "watch error"),
                None => break,
            },
        }
    }
    Ok(())
}
