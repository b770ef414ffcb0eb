use clap::Parser;
use tracing::{debug, info, warn};

use rignode::config::Config;

#[derive(Parser)]
#[command(version, about = "edge recording node")]
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
        "rignode={},tower_http={}",
        cfg.log.level, cfg.log.level
    ));

    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let listener = tokio::net::TcpListener::bind(cfg.http.listen)
        .await
        .unwrap();
    rignode::serve(cfg, listener, shutdown_signal()).await;
    info!("node shutdown");
}

async fn shutdown_signal() {
    let signal = utils::wait_for_stop_signal().await;
    debug!("received signal: {}", signal);
}
