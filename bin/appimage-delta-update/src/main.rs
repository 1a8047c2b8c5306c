#![deny(unsafe_code)]

//! Command-line front door wiring [`coordinator::Coordinator`] to a
//! terminal, usable both for manual verification and as a worked example of
//! embedding the core in a collaborator application.

use clap::{Parser, Subcommand};
use coordinator::{Coordinator, FinishedResult, SessionConfig, UpdateEvent};
use descriptor::UpdateDescriptor;
use std::path::PathBuf;
use std::process::ExitCode;
use updater_errors::Action;
use url::Url;

#[derive(Parser)]
#[command(name = "appimage-delta-update", version, about = "zsync-style delta updater for AppImage bundles")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the local AppImage bundle being checked or updated.
    #[arg(long, global = true)]
    appimage: PathBuf,

    /// Legacy pipe-delimited update-information string
    /// (`zsync|<url>` or `gh-releases-zsync|user|repo|tag|filename`).
    #[arg(long, global = true)]
    update_info: String,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and echo back the update descriptor without any network access.
    GetEmbeddedInfo,
    /// Fetch the remote control file and report whether an update is available.
    CheckForUpdate,
    /// Run the full seed-scan, range-download, and verification pipeline.
    Update {
        /// Directory the new bundle (and any `.part` file) is written into.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(Cli::parse()))
}

async fn run(cli: Cli) -> ExitCode {
    let descriptor = match UpdateDescriptor::parse_legacy(&cli.update_info) {
        Ok(descriptor) => descriptor,
        Err(err) => {
            eprintln!("invalid update-information string: {err}");
            return ExitCode::FAILURE;
        }
    };

    let (action, output_dir) = match &cli.command {
        Command::GetEmbeddedInfo => (Action::GetEmbeddedInfo, cli.appimage.clone()),
        Command::CheckForUpdate => (Action::CheckForUpdate, cli.appimage.clone()),
        Command::Update { output_dir } => (Action::Update, output_dir.clone()),
    };

    let resolved_url = match resolve_control_file_url(action, &descriptor) {
        Ok(url) => url,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let mut coordinator = match Coordinator::new(SessionConfig::default()) {
        Ok(coordinator) => coordinator,
        Err(err) => {
            eprintln!("failed to initialize session: {err}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, canceling session");
            cancel.cancel();
        }
    });

    let result = coordinator
        .run(
            action,
            descriptor,
            resolved_url.as_ref(),
            &cli.appimage,
            &output_dir,
            print_event,
        )
        .await;

    match result {
        Ok(finished) => {
            print_finished(&finished);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn resolve_control_file_url(action: Action, descriptor: &UpdateDescriptor) -> Result<Option<Url>, String> {
    if action == Action::GetEmbeddedInfo {
        return Ok(None);
    }
    match descriptor {
        UpdateDescriptor::Direct { url } => {
            Url::parse(url).map(Some).map_err(|err| format!("invalid control-file URL: {err}"))
        }
        UpdateDescriptor::ReleaseHosted { transport, .. } => Err(format!(
            "resolving release-hosted transport {transport:?} into a direct control-file URL \
             is the responsibility of the embedding application, not this command"
        )),
    }
}

fn print_event(event: UpdateEvent) {
    match event {
        UpdateEvent::Started { action } => tracing::info!(%action, "started"),
        UpdateEvent::Progress { pct, bytes_done, bytes_total, rate, units, action } => {
            tracing::info!(%action, pct, bytes_done, bytes_total, rate, units, "progress");
        }
        UpdateEvent::Finished { action, .. } => tracing::info!(%action, "finished"),
        UpdateEvent::Error { kind, action } => tracing::error!(%action, %kind, "error"),
        UpdateEvent::Canceled { action } => tracing::warn!(%action, "canceled"),
        UpdateEvent::Log(message) => tracing::debug!("{message}"),
    }
}

fn print_finished(result: &FinishedResult) {
    match result {
        FinishedResult::Update { new_version_path, new_version_sha1_hash, .. } => {
            println!("updated: {} (sha1 {new_version_sha1_hash})", new_version_path.display());
        }
        FinishedResult::CheckForUpdate { update_available, remote_sha1_hash, .. } => {
            if *update_available {
                println!("update available (remote sha1 {remote_sha1_hash})");
            } else {
                println!("up to date");
            }
        }
        FinishedResult::GetEmbeddedInfo { descriptor } => {
            println!("{descriptor}");
        }
    }
}
