use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use sixcard::server::{run_server, ServerConfig};

const DEFAULT_BIND: &str = "127.0.0.1:4000";

#[derive(Debug, Parser)]
#[command(name = "golf_server")]
#[command(about = "Launch the 6-card Golf websocket server", long_about = None)]
struct Args {
    /// Address to bind the server to (host:port)
    #[arg(long, env = "SERVER_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// SeaORM-compatible Postgres URL for the event log
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Redis URL for the state cache and pub/sub bus
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Replica id; generated when not provided
    #[arg(long, env = "SERVER_ID")]
    server_id: Option<String>,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "SERVER_LOG_JSON", default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = Args::parse();
    init_tracing(args.json);

    let server_id = args
        .server_id
        .unwrap_or_else(|| format!("replica-{}", &Uuid::new_v4().simple().to_string()[..8]));

    run_server(ServerConfig {
        bind: args.bind,
        database_url: args.database_url,
        redis_url: args.redis_url,
        server_id,
    })
    .await
}

fn load_dotenv() {
    let manifest_env = env!("CARGO_MANIFEST_DIR");
    let manifest_env_path = PathBuf::from(manifest_env).join(".env");
    dotenv::from_filename(manifest_env_path).ok();
    dotenv::dotenv().ok();
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt().with_env_filter(filter).with_target(false);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }
}
