use anyhow::Context;
use clap::Parser;
use sqlite_runner::{Dispatcher, Envelope, Response, SqliteStorage, Storage};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

mod logging;

use logging::Must;

/// sqlite-runner serves requests against named SQLite databases,
/// serializing the requests of each database onto its own worker.
#[derive(Debug, clap::Parser)]
#[clap(author, version)]
pub struct Args {
    /// Logging filter, in tracing-subscriber EnvFilter syntax.
    #[clap(long, global = true, default_value = "info", env = "SQLITE_RUNNER_LOG")]
    pub log: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Read JSON requests from stdin, one per line, and write JSON responses
    /// to stdout, one per line, in the order they complete.
    Serve(ServeArgs),
    /// Delete a database which isn't in use, along with its journal files.
    Delete(DeleteArgs),
}

#[derive(Debug, clap::Args)]
pub struct ServeArgs {
    /// Directory beneath which database names are resolved.
    #[clap(long, env = "SQLITE_RUNNER_ROOT")]
    pub root: PathBuf,
}

#[derive(Debug, clap::Args)]
pub struct DeleteArgs {
    /// Directory beneath which database names are resolved.
    #[clap(long, env = "SQLITE_RUNNER_ROOT")]
    pub root: PathBuf,
    /// Name of the database to delete.
    pub name: String,
}

fn main() {
    let args = Args::parse();
    logging::init_tracing(&args.log);

    match args.command {
        Command::Serve(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .or_bail("failed to build tokio runtime");

            runtime.block_on(serve(args)).or_bail("serve failed");
        }
        Command::Delete(args) => delete(args).or_bail("delete failed"),
    }
}

#[tracing::instrument(skip_all, fields(root = %args.root.display()))]
async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    std::fs::create_dir_all(&args.root)
        .with_context(|| format!("failed to create database root {}", args.root.display()))?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Response>();
    let dispatcher = Dispatcher::new(SqliteStorage::new(&args.root), tx);

    // Responses are written as they complete. The writer finishes once the
    // Dispatcher and every worker holding its Responder have been dropped.
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();

        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_vec(&response).context("failed to encode response")?;
            line.push(b'\n');

            stdout
                .write_all(&line)
                .await
                .context("failed to write response")?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    tracing::info!("serving requests");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut requests = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read request")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        requests += 1;

        match Envelope::decode(&line) {
            Ok(envelope) => dispatcher.handle(envelope),
            Err((callback, err)) => dispatcher.reject(callback, &err),
        }
    }
    tracing::info!(requests, "done reading requests, tearing down");

    // Teardown joins worker threads, which must not block the runtime.
    tokio::task::spawn_blocking(move || std::mem::drop(dispatcher))
        .await
        .context("teardown panicked")?;

    writer.await.context("response writer panicked")?
}

fn delete(args: DeleteArgs) -> anyhow::Result<()> {
    let storage = SqliteStorage::new(&args.root);

    let locator = storage
        .locate(&args.name)
        .with_context(|| format!("invalid database name {}", args.name))?;
    let existed = storage
        .delete(&locator)
        .with_context(|| format!("failed to delete {}", locator.display()))?;

    tracing::info!(name = %args.name, existed, "deleted database");
    Ok(())
}
