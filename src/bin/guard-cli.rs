use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for the portal-guard admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GUARD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Query the audit trail, most recent first
    Audit {
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        /// RFC 3339 lower bound
        #[arg(long)]
        since: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Audit counts by level and category
    Summary,
    /// Lockout and rate-limit statistics
    Security,
    /// Manage the SSRF allowlist
    Domains {
        #[command(subcommand)]
        action: DomainAction,
    },
}

#[derive(Subcommand)]
enum DomainAction {
    List,
    Add { domain: String },
    Remove { domain: String },
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
        Commands::Audit {
            level,
            category,
            actor,
            since,
            limit,
        } => {
            let mut query = vec![("limit", limit.to_string())];
            query.extend(level.map(|v| ("level", v)));
            query.extend(category.map(|v| ("category", v)));
            query.extend(actor.map(|v| ("actor_id", v)));
            query.extend(since.map(|v| ("start", v)));
            client.get(format!("{base}/admin/audit")).query(&query)
        }
        Commands::Summary => client.get(format!("{base}/admin/audit/summary")),
        Commands::Security => client.get(format!("{base}/admin/security")),
        Commands::Domains { action } => match action {
            DomainAction::List => client.get(format!("{base}/admin/domains")),
            DomainAction::Add { domain } => client
                .post(format!("{base}/admin/domains"))
                .json(&json!({ "domain": domain })),
            DomainAction::Remove { domain } => {
                client.delete(format!("{base}/admin/domains/{domain}"))
            }
        },
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
