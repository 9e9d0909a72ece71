use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "panel-cli")]
#[command(about = "Management CLI for the game server control panel", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3000")]
    url: String,

    #[arg(short, long, env = "PANEL_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show panel and game server status
    Status,
    /// Start the game server
    Start,
    /// Stop the game server
    Stop,
    /// Restart the game server
    Restart,
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
        Commands::Status => client.get(format!("{}/api/status", cli.url)),
        Commands::Start => client.post(format!("{}/api/server/start", cli.url)),
        Commands::Stop => client.post(format!("{}/api/server/stop", cli.url)),
        Commands::Restart => client.post(format!("{}/api/server/restart", cli.url)),
    };
    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let json: Value = match res.json().await {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error: panel returned status {} with unreadable body: {}", status, e);
            std::process::exit(1);
        }
    };

    if !status.is_success() {
        let message = json
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        eprintln!("Error: panel returned status {}: {}", status, message);
        std::process::exit(1);
    }

    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
