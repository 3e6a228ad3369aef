use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "routeguard-cli")]
#[command(about = "Inspect backend health of a running routeguard proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall health summary
    Health,
    /// Per-backend health details
    Details {
        /// Only show this backend
        #[arg(short, long)]
        backend: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{base}/health")).send().await?;
            let json = read_json(res).await?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::Details { backend } => {
            let res = client.get(format!("{base}/metrics/reverseproxy/health")).send().await?;
            let json = read_json(res).await?;
            let shown = match backend {
                Some(id) => match json.get("backend_details").and_then(|d| d.get(&id)) {
                    Some(detail) => detail.clone(),
                    None => {
                        eprintln!("Error: no backend named '{id}'");
                        std::process::exit(1);
                    }
                },
                None => json,
            };
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

/// Health endpoints answer 503 with a JSON body when something is down, so only
/// a non-JSON body is an error.
async fn read_json(res: reqwest::Response) -> Result<Value, Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    match serde_json::from_str(&text) {
        Ok(json) => {
            if !status.is_success() {
                eprintln!("Proxy reports status {status}");
            }
            Ok(json)
        }
        Err(_) => Err(format!("proxy returned status {status}: {text}").into()),
    }
}
