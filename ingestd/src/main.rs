use clap::Parser;
use tracing::{debug, info, warn};

use ingestd::config::Config;

#[derive(Parser)]
#[command(version, about = "recording ingest server")]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let cfg = Config::parse(args.config);
    utils::set_log(format!(
        "ingestd={},tower_http={}",
        cfg.log.level, cfg.log.level
    ));

    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let listener = tokio::net::TcpListener::bind(cfg.http.listen)
        .await
        .unwrap();
    ingestd::serve(cfg, listener, shutdown_signal()).await;
    info!("ingest shutdown");
}

async fn shutdown_signal() {
    let signal = utils::wait_for_stop_signal().await;
    debug!("received signal: {}", signal);
}
