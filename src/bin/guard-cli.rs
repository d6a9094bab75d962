use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for the guarded inference proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Pipeline {
    Input,
    Output,
}

#[derive(Subcommand)]
enum Commands {
    /// Check liveness and which guards are enabled
    Health,
    /// Show admission counters
    Stats,
    /// Show the effective configuration
    Config,
    /// Run every scanner of a pipeline against a text
    Scan {
        text: String,
        #[arg(short, long, value_enum, default_value = "input")]
        pipeline: Pipeline,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Health => client.get(format!("{}/health", base)).send().await?,
        Commands::Stats => client.get(format!("{}/queue/stats", base)).send().await?,
        Commands::Config => client.get(format!("{}/config", base)).send().await?,
        Commands::Scan { text, pipeline } => {
            let pipeline = match pipeline {
                Pipeline::Input => "input",
                Pipeline::Output => "output",
            };
            client
                .post(format!("{}/scan", base))
                .json(&json!({ "text": text, "pipeline": pipeline }))
                .send()
                .await?
        }
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: guard returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
