use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the affinity load balancer", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "PROXY_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy system status
    Status,
    /// List backends with health and in-flight requests
    Backends,
    /// Register a backend (starts unhealthy until it passes health checks)
    Register {
        /// Stable backend id
        id: String,
        /// Backend address, e.g. 10.0.1.12:80
        address: String,
    },
    /// Remove a backend immediately
    Remove { id: String },
    /// Drain a backend, then remove it once its requests finish
    Drain { id: String },
    /// Show capacity reconciler state
    Reconciler,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Backends => client.get(format!("{}/admin/backends", cli.url)),
        Commands::Register { id, address } => client
            .post(format!("{}/admin/backends", cli.url))
            .json(&json!({ "id": id, "address": address })),
        Commands::Remove { id } => client.delete(format!("{}/admin/backends/{}", cli.url, id)),
        Commands::Drain { id } => client.post(format!("{}/admin/backends/{}/drain", cli.url, id)),
        Commands::Reconciler => client.get(format!("{}/admin/reconciler", cli.url)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
