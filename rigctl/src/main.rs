//! Thin operator CLI against any node's coordinator API.
//!
//! Exit codes: 0 success, 2 precondition/preflight failure, 3 peer
//! unreachable, 4 upload verification failure, 1 anything else.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use api::response::{
    AggregateStatus, ClusterRecordings, ClusterStartResponse, ClusterStopResponse,
    ClusterSyncResponse, ClusterTestResponse, OffloadState, PreflightReport,
};

#[derive(Parser)]
#[command(version, about = "recording rig control")]
struct Args {
    /// Coordinator base URL (any node)
    #[arg(short, long, default_value = "http://127.0.0.1:7700")]
    server: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate cluster status
    Status,
    /// Run admission checks without touching state
    Preflight,
    /// Start a synchronized recording on all cameras
    Start {
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Stop the recording everywhere
    Stop,
    /// Trigger a time-sync pass on all nodes
    Sync,
    /// Short end-to-end self check on every camera
    Test,
    /// Recordings present on the nodes, with offload state
    Recordings,
}

const EXIT_PRECONDITION: u8 = 2;
const EXIT_UNREACHABLE: u8 = 3;
const EXIT_UPLOAD: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .expect("http client");

    match run(&args, &client).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            if e.downcast_ref::<reqwest::Error>()
                .map(|e| e.is_connect() || e.is_timeout())
                .unwrap_or(false)
            {
                ExitCode::from(EXIT_UNREACHABLE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(args: &Args, client: &reqwest::Client) -> anyhow::Result<ExitCode> {
    let base = args.server.trim_end_matches('/');
    Ok(match &args.command {
        Command::Status => {
            let status: AggregateStatus = get(client, base, api::path::COORDINATOR_STATUS).await?;
            print_json(&status)?;
            if status.summary.all_online {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_UNREACHABLE)
            }
        }
        Command::Preflight => {
            let report: PreflightReport =
                post(client, base, api::path::COORDINATOR_PREFLIGHT, None).await?;
            print_json(&report)?;
            if report.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PRECONDITION)
            }
        }
        Command::Start { session_id } => {
            let body = serde_json::json!({ "session_id": session_id });
            let resp: ClusterStartResponse =
                post(client, base, api::path::COORDINATOR_START, Some(body)).await?;
            print_json(&resp)?;
            if resp.success {
                ExitCode::SUCCESS
            } else {
                let unreachable = resp
                    .cameras
                    .values()
                    .any(|c| c.error.as_deref() == Some("peer_unreachable"));
                if unreachable {
                    ExitCode::from(EXIT_UNREACHABLE)
                } else {
                    ExitCode::from(EXIT_PRECONDITION)
                }
            }
        }
        Command::Stop => {
            let resp: ClusterStopResponse =
                post(client, base, api::path::COORDINATOR_STOP, None).await?;
            print_json(&resp)?;
            if resp.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Sync => {
            let resp: ClusterSyncResponse =
                post(client, base, api::path::COORDINATOR_SYNC, None).await?;
            print_json(&resp)?;
            if resp.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Test => {
            let resp: ClusterTestResponse =
                post(client, base, api::path::COORDINATOR_TEST, None).await?;
            print_json(&resp)?;
            if resp.all_passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PRECONDITION)
            }
        }
        Command::Recordings => {
            let resp: ClusterRecordings =
                get(client, base, api::path::COORDINATOR_RECORDINGS).await?;
            print_json(&resp)?;
            let failed = resp
                .cameras
                .values()
                .flatten()
                .any(|r| r.offload_state == OffloadState::Failed);
            if failed {
                ExitCode::from(EXIT_UPLOAD)
            } else {
                ExitCode::SUCCESS
            }
        }
    })
}

async fn get<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    base: &str,
    path: &str,
) -> anyhow::Result<T> {
    let resp = client.get(format!("{}{}", base, path)).send().await?;
    decode(resp).await
}

async fn post<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    base: &str,
    path: &str,
    body: Option<serde_json::Value>,
) -> anyhow::Result<T> {
    let req = client.post(format!("{}{}", base, path));
    let req = match body {
        Some(body) => req.json(&body),
        None => req.json(&serde_json::json!({})),
    };
    decode(req.send().await?).await
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{}: {}", status, body);
    }
    Ok(resp.json().await?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
