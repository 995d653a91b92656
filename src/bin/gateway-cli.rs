use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use url::Url;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the edge dispatch gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: Url,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Manage routes
    Routes {
        #[command(subcommand)]
        action: RouteAction,
    },
    /// Manage rate-limit rules
    Rules {
        #[command(subcommand)]
        action: RuleAction,
    },
    /// Show pooled connection health per service
    Health,
    /// Show circuit breaker state per service
    Breakers,
}

#[derive(Subcommand)]
enum RouteAction {
    /// List routes, one page at a time
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },
    /// Register a route
    Add {
        #[arg(long)]
        path: String,
        #[arg(long, default_value = "*")]
        method: String,
        #[arg(long)]
        service: String,
        /// Backend address; repeat for several
        #[arg(long = "backend", required = true)]
        backends: Vec<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Delete a route by id
    Delete { id: String },
}

#[derive(Subcommand)]
enum RuleAction {
    /// List rules
    List,
    /// Add a rule
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        path: String,
        #[arg(long, default_value = "*")]
        method: String,
        #[arg(long)]
        limit: u32,
        #[arg(long, default_value_t = 1)]
        window_secs: u64,
    },
    /// Delete a rule by name
    Delete { name: String },
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
        Commands::Status => client.get(cli.url.join("/admin/status")?),
        Commands::Health => client.get(cli.url.join("/admin/health")?),
        Commands::Breakers => client.get(cli.url.join("/admin/breakers")?),
        Commands::Routes { action } => match action {
            RouteAction::List { page, page_size } => {
                let mut url = cli.url.join("/admin/routes")?;
                url.query_pairs_mut()
                    .append_pair("page", &page.to_string())
                    .append_pair("page_size", &page_size.to_string());
                client.get(url)
            }
            RouteAction::Add {
                path,
                method,
                service,
                backends,
                timeout_ms,
                name,
            } => client.post(cli.url.join("/admin/routes")?).json(&json!({
                "name": name,
                "path": path,
                "method": method,
                "service": service,
                "backends": backends,
                "timeout_ms": timeout_ms,
            })),
            RouteAction::Delete { id } => {
                client.delete(cli.url.join(&format!("/admin/routes/{}", id))?)
            }
        },
        Commands::Rules { action } => match action {
            RuleAction::List => client.get(cli.url.join("/admin/rules")?),
            RuleAction::Add {
                name,
                path,
                method,
                limit,
                window_secs,
            } => client.post(cli.url.join("/admin/rules")?).json(&json!({
                "name": name,
                "path": path,
                "method": method,
                "limit": limit,
                "window_secs": window_secs,
            })),
            RuleAction::Delete { name } => {
                let mut url = cli.url.join("/admin/rules/")?;
                url.path_segments_mut()
                    .map_err(|_| "admin URL cannot be a base")?
                    .pop_if_empty()
                    .push(&name);
                client.delete(url)
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
