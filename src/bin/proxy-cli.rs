//! Management CLI for the API proxy's admin surface.
//!
//! Logs in with the admin token (session cookie), then drives the mapping
//! CRUD endpoints.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the API proxy", long_about = None)]
struct Cli {
    /// Base URL of the proxy.
    #[arg(short, long, default_value = "http://localhost:8000", env = "API_PROXY_URL")]
    url: String,

    /// Admin token.
    #[arg(short, long, env = "ADMIN_TOKEN", default_value = "")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all mappings and the registry version
    List,
    /// Add a new mapping
    Add { prefix: String, target: String },
    /// Update the target of an existing mapping
    Update { prefix: String, target: String },
    /// Delete a mapping
    Delete { prefix: String },
    /// Force a reload from the KV store
    Reload,
    /// Show the statistics snapshot
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder().cookie_store(true).build()?;

    // The stats endpoint is public; everything else needs a session.
    if matches!(cli.command, Commands::Stats) {
        let res = client.get(format!("{}/stats", cli.url)).send().await?;
        return print_response(res).await;
    }

    let login = client
        .post(format!("{}/api/admin/login", cli.url))
        .json(&json!({ "token": cli.token }))
        .send()
        .await?;
    if !login.status().is_success() {
        eprintln!("login failed: HTTP {}", login.status());
        std::process::exit(1);
    }

    let res = match cli.command {
        Commands::List => {
            client
                .get(format!("{}/api/mappings", cli.url))
                .send()
                .await?
        }
        Commands::Add { prefix, target } => {
            client
                .post(format!("{}/api/mappings", cli.url))
                .json(&json!({ "prefix": prefix, "target": target }))
                .send()
                .await?
        }
        Commands::Update { prefix, target } => {
            client
                .put(format!("{}/api/mappings{}", cli.url, with_slash(&prefix)))
                .json(&json!({ "target": target }))
                .send()
                .await?
        }
        Commands::Delete { prefix } => {
            client
                .delete(format!("{}/api/mappings{}", cli.url, with_slash(&prefix)))
                .send()
                .await?
        }
        Commands::Reload => {
            client
                .post(format!("{}/api/mappings/reload", cli.url))
                .send()
                .await?
        }
        Commands::Stats => unreachable!("handled above"),
    };

    print_response(res).await
}

fn with_slash(prefix: &str) -> String {
    if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{prefix}")
    }
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let body: Value = res.json().await.unwrap_or(Value::Null);
    println!("HTTP {status}");
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
