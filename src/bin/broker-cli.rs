use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "broker-cli")]
#[command(about = "Management CLI for the broker admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8161")]
    url: String,

    #[arg(short, long, env = "BROKER_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show reload status and broker version
    Status,
    /// Check the configuration source now
    Reload,
    /// List live bindings with their provenance
    Bindings,
    /// Address settings management
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Security settings management
    #[command(subcommand)]
    Security(SecurityCommand),
    /// Diverts created outside configuration
    #[command(subcommand)]
    Divert(DivertCommand),
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Effective settings for an address
    Resolve { address: String },
    /// Fragment registered for a pattern
    Get { pattern: String },
    /// Register a JSON fragment for a pattern
    Add { pattern: String, json: String },
    /// Remove a management fragment
    Remove { pattern: String },
}

#[derive(Subcommand)]
enum SecurityCommand {
    /// Effective roles for an address
    Resolve { address: String },
    /// Register roles for a pattern, given as a JSON array
    Add { pattern: String, roles: String },
    /// Remove management roles
    Remove { pattern: String },
}

#[derive(Subcommand)]
enum DivertCommand {
    /// Create a divert
    Create {
        name: String,
        address: String,
        forwarding_address: String,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        exclusive: bool,
    },
    /// Destroy a divert
    Destroy { name: String },
}

/// Percent-encode the characters that may appear in a pattern but not in a
/// path segment.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            '/' => out.push_str("%2F"),
            '?' => out.push_str("%3F"),
            ' ' => out.push_str("%20"),
            _ => out.push(c),
        }
    }
    out
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

    let base = cli.url.trim_end_matches('/');
    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Reload => client.post(format!("{base}/admin/reload")),
        Commands::Bindings => client.get(format!("{base}/admin/bindings")),
        Commands::Settings(cmd) => match cmd {
            SettingsCommand::Resolve { address } => client.get(format!(
                "{base}/admin/address-settings/resolve/{}",
                encode_segment(&address)
            )),
            SettingsCommand::Get { pattern } => client.get(format!(
                "{base}/admin/address-settings/patterns/{}",
                encode_segment(&pattern)
            )),
            SettingsCommand::Add { pattern, json } => client
                .put(format!(
                    "{base}/admin/address-settings/patterns/{}",
                    encode_segment(&pattern)
                ))
                .body(json),
            SettingsCommand::Remove { pattern } => client.delete(format!(
                "{base}/admin/address-settings/patterns/{}",
                encode_segment(&pattern)
            )),
        },
        Commands::Security(cmd) => match cmd {
            SecurityCommand::Resolve { address } => client.get(format!(
                "{base}/admin/security/resolve/{}",
                encode_segment(&address)
            )),
            SecurityCommand::Add { pattern, roles } => {
                let roles: Value = serde_json::from_str(&roles)?;
                client
                    .put(format!(
                        "{base}/admin/security/patterns/{}",
                        encode_segment(&pattern)
                    ))
                    .json(&roles)
            }
            SecurityCommand::Remove { pattern } => client.delete(format!(
                "{base}/admin/security/patterns/{}",
                encode_segment(&pattern)
            )),
        },
        Commands::Divert(cmd) => match cmd {
            DivertCommand::Create {
                name,
                address,
                forwarding_address,
                filter,
                exclusive,
            } => client.post(format!("{base}/admin/diverts")).json(&serde_json::json!({
                "name": name,
                "address": address,
                "forwarding_address": forwarding_address,
                "filter": filter,
                "exclusive": exclusive,
            })),
            DivertCommand::Destroy { name } => {
                client.delete(format!("{base}/admin/diverts/{}", encode_segment(&name)))
            }
        },
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: admin API returned status {status}");
        if !text.is_empty() {
            eprintln!("Response: {text}");
        }
        std::process::exit(1);
    }

    if text.is_empty() {
        println!("OK ({status})");
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
