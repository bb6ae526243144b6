//! blocksync CLI - delta synchronization of file trees.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use blocksync::orchestrator::{JobQueue, Watcher};
use blocksync::sync::Engine;
use blocksync::{codec, rpc};

/// blocksync - keep a remote directory mirroring a local one
#[derive(Parser)]
#[command(name = "blocksync")]
#[command(version)]
#[command(about = "rsync-style delta synchronization over a small framed RPC")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a directory tree to watchers
    Serve {
        /// Directory to serve
        #[arg(required = true)]
        dir: PathBuf,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind
        #[arg(long, default_value = "4567")]
        port: u16,

        /// Window size for signatures served to watchers
        #[arg(short, long, default_value = "1000")]
        window: u32,
    },

    /// Watch a directory and mirror it to a server
    Watch {
        /// Directory to mirror
        #[arg(required = true)]
        dir: PathBuf,

        /// Server address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(long, default_value = "4567")]
        port: u16,

        /// Number of transfer workers
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Poll interval in seconds
        #[arg(long, default_value = "1")]
        interval: u64,

        /// Window size for delta computation
        #[arg(short, long, default_value = "1000")]
        window: u32,
    },

    /// Write the signature of a file
    Signature {
        /// File to summarize
        #[arg(required = true)]
        file: PathBuf,

        /// Output signature file (default: <file>.sig)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Window size
        #[arg(short, long, default_value = "1000")]
        window: u32,
    },

    /// Compute the delta between a source file and a signature
    Delta {
        /// Source file (new version)
        #[arg(required = true)]
        source: PathBuf,

        /// Signature file (of the old version)
        #[arg(required = true)]
        signature: PathBuf,

        /// Output delta file (default: <source>.delta)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply a delta to a file in place
    Patch {
        /// File to patch (old version, replaced on success)
        #[arg(required = true)]
        basis: PathBuf,

        /// Delta file
        #[arg(required = true)]
        delta: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Serve {
            dir,
            host,
            port,
            window,
        } => run_serve(dir, &host, port, window),
        Commands::Watch {
            dir,
            host,
            port,
            workers,
            interval,
            window,
        } => run_watch(dir, host, port, workers, interval, window),
        Commands::Signature {
            file,
            output,
            window,
        } => run_signature(&file, output, window),
        Commands::Delta {
            source,
            signature,
            output,
        } => run_delta(&source, &signature, output),
        Commands::Patch { basis, delta } => run_patch(&basis, &delta),
    }
}

fn run_serve(
    dir: PathBuf,
    host: &str,
    port: u16,
    window: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if !dir.is_dir() {
        return Err(format!("not a directory: {}", dir.display()).into());
    }
    let listener = TcpListener::bind((host, port))?;
    rpc::serve(listener, dir, Engine::with_window(window))?;
    Ok(())
}

fn run_watch(
    dir: PathBuf,
    host: String,
    port: u16,
    workers: usize,
    interval: u64,
    window: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if !dir.is_dir() {
        return Err(format!("not a directory: {}", dir.display()).into());
    }
    let watcher = Watcher::new(dir, host, port)
        .with_engine(Engine::with_window(window))
        .with_workers(workers)
        .with_interval(Duration::from_secs(interval.max(1)));
    let queue = Arc::new(JobQueue::new());
    watcher.run(&queue)?;
    Ok(())
}

fn run_signature(
    file: &Path,
    output: Option<PathBuf>,
    window: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::with_window(window);
    let mut reader = std::io::BufReader::new(std::fs::File::open(file)?);
    let signature = engine.signature(&mut reader)?;

    let out = output.unwrap_or_else(|| with_suffix(file, ".sig"));
    codec::save_signature(&out, &signature)?;
    println!(
        "Wrote {} ({} chunks, window {})",
        out.display(),
        signature.chunk_count(),
        signature.window_size
    );
    Ok(())
}

fn run_delta(
    source: &Path,
    signature: &Path,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let signature = codec::load_signature(signature)?;
    let delta = Engine::new().delta_file(source, &signature)?;

    let out = output.unwrap_or_else(|| with_suffix(source, ".delta"));
    codec::save_delta(&out, &delta)?;
    println!(
        "Wrote {} ({} ops, {} bytes copied, {} bytes literal)",
        out.display(),
        delta.op_count(),
        delta.bytes_copied(),
        delta.bytes_literal()
    );
    Ok(())
}

fn run_patch(basis: &Path, delta: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let delta = codec::load_delta(delta)?;
    Engine::new().patch_file(basis, &delta)?;
    println!("Patched {} ({} bytes)", basis.display(), delta.output_len());
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
