use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cas_client::config::Config;
use cas_client::rest::{Credential, RestClient};
use cas_client::writer::{BufferedWriter, FsResolver};

#[derive(Parser)]
#[command(name = "tangle")]
#[command(about = "CAS engine client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in against a server and store a bearer token locally
    Login {
        #[arg(long)]
        server: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Clear stored credentials
    Logout,
    /// Show the active server and realm
    Status,
    /// Stage and commit a local file or directory, printing the resulting root key
    Put {
        /// Local path to a file or directory
        path: std::path::PathBuf,
        #[arg(long)]
        depot: Option<String>,
    },
    /// Fetch a node's raw bytes and write them to stdout or a file
    Get {
        key: String,
        #[arg(long)]
        out: Option<std::path::PathBuf>,
    },
    /// Show the manifest tree rooted at a key
    Tree {
        key: String,
        #[arg(long)]
        budget: Option<usize>,
    },
    #[command(subcommand)]
    Depot(DepotCommands),
    #[command(subcommand)]
    Commit(CommitCommands),
    #[command(subcommand)]
    Ticket(TicketCommands),
}

#[derive(Subcommand)]
enum DepotCommands {
    List,
    Create {
        name: String,
        #[arg(long)]
        root: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Get {
        name: String,
    },
    /// Point a depot at a new root, advancing its version
    SetRoot {
        name: String,
        root: String,
        #[arg(long)]
        message: Option<String>,
    },
    History {
        name: String,
    },
    Rollback {
        name: String,
        version: i64,
    },
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
enum CommitCommands {
    List,
    Create {
        root: String,
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Subcommand)]
enum TicketCommands {
    /// Mint a scoped, delegated-access ticket
    Create {
        /// Restrict the ticket to these keys (omit for unrestricted read scope)
        #[arg(long)]
        key: Vec<String>,
        /// Allow writes up to this many bytes (omit for read-only)
        #[arg(long)]
        quota: Option<u64>,
        #[arg(long)]
        expires_in: Option<u64>,
    },
    Revoke {
        id: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tangle=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn rest_client(config: &Config) -> anyhow::Result<RestClient> {
    let server = config.require_server_url()?;
    let credential = match &config.token {
        Some(token) => Credential::Bearer(token.clone()),
        None => Credential::None,
    };
    Ok(RestClient::new(server, credential))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Login { server, username, password } => login(server, username, password).await,
        Commands::Logout => logout(),
        Commands::Status => status(&config),
        Commands::Put { path, depot } => put(&config, &path, depot.as_deref()).await,
        Commands::Get { key, out } => get(&config, &key, out.as_deref()).await,
        Commands::Tree { key, budget } => tree(&config, &key, budget).await,
        Commands::Depot(cmd) => depot_command(&config, cmd).await,
        Commands::Commit(cmd) => commit_command(&config, cmd).await,
        Commands::Ticket(cmd) => ticket_command(&config, cmd).await,
    }
}

async fn login(server: String, username: String, password: Option<String>) -> anyhow::Result<()> {
    let password = match password {
        Some(p) => p,
        None => rpassword::prompt_password("password: ")?,
    };
    let client = RestClient::new(&server, Credential::None);
    let response = client.login(&username, &password).await?;

    let mut config = Config::load()?;
    config.server_url = Some(server);
    config.token = Some(response.bearer);
    config.realm = Some(response.realm.clone());
    config.save()?;

    println!("logged in as {}", response.realm);
    Ok(())
}

fn logout() -> anyhow::Result<()> {
    let mut config = Config::load()?;
    config.token = None;
    config.realm = None;
    config.save()?;
    println!("logged out");
    Ok(())
}

fn status(config: &Config) -> anyhow::Result<()> {
    match (&config.server_url, &config.realm) {
        (Some(server), Some(realm)) => {
            println!("server: {server}");
            println!("realm: {realm}");
            if let Some(depot) = &config.default_depot {
                println!("default depot: {depot}");
            }
        }
        _ => println!("not logged in. run: tangle login --server <url> --username <name>"),
    }
    Ok(())
}

async fn put(config: &Config, path: &std::path::Path, depot: Option<&str>) -> anyhow::Result<()> {
    config.require_auth()?;
    let rest = rest_client(config)?;
    let realm = config.require_realm()?;

    let mut writer = BufferedWriter::new(rest, realm);
    let meta = std::fs::metadata(path)?;
    let root = if meta.is_dir() {
        let resolver = FsResolver::new(path);
        writer.put_collection(&resolver)?
    } else {
        let bytes = std::fs::read(path)?;
        let content_type = mime_guess_for(path);
        writer.put_file(&bytes, &content_type)
    };

    writer.commit().await?;
    println!("committed {root}");

    if let Some(depot_name) = depot.or(config.default_depot.as_deref()) {
        let rest = rest_client(config)?;
        let realm = config.require_realm()?;
        rest.update_depot_root(&realm, depot_name, &root, None).await?;
        println!("updated depot {depot_name}");
    }
    Ok(())
}

fn mime_guess_for(path: &std::path::Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") | Some("md") => "text/plain",
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
    .to_string()
}

async fn get(config: &Config, key: &str, out: Option<&std::path::Path>) -> anyhow::Result<()> {
    config.require_auth()?;
    let rest = rest_client(config)?;
    let realm = config.require_realm()?;
    let node = rest.get_raw(&realm, key).await?;

    match out {
        Some(path) => {
            std::fs::write(path, &node.bytes)?;
            println!("wrote {} bytes to {}", node.bytes.len(), path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&node.bytes)?;
        }
    }
    Ok(())
}

async fn tree(config: &Config, key: &str, budget: Option<usize>) -> anyhow::Result<()> {
    config.require_auth()?;
    let rest = rest_client(config)?;
    let realm = config.require_realm()?;
    let response = rest.get_tree(&realm, key, budget).await?;

    for (node_key, info) in &response.nodes {
        println!("{node_key}: {info:?}");
    }
    if let Some(next) = response.next {
        println!("(truncated, continue at {next})");
    }
    Ok(())
}

async fn depot_command(config: &Config, cmd: DepotCommands) -> anyhow::Result<()> {
    config.require_auth()?;
    let rest = rest_client(config)?;
    let realm = config.require_realm()?;

    match cmd {
        DepotCommands::List => {
            let response = rest.list_depots(&realm).await?;
            for depot in response.depots {
                println!("{:<20} {} v{}", depot.name, depot.root, depot.version);
            }
        }
        DepotCommands::Create { name, root, description } => {
            let depot = rest.create_depot(&realm, &name, root.as_deref(), description.as_deref()).await?;
            println!("created {} -> {}", depot.name, depot.root);
        }
        DepotCommands::Get { name } => {
            let depot = rest.get_depot(&realm, &name).await?;
            println!("{:<20} {} v{}", depot.name, depot.root, depot.version);
        }
        DepotCommands::SetRoot { name, root, message } => {
            let depot = rest.update_depot_root(&realm, &name, &root, message.as_deref()).await?;
            println!("{} is now v{} -> {}", depot.name, depot.version, depot.root);
        }
        DepotCommands::History { name } => {
            let entries = rest.depot_history(&realm, &name).await?;
            for entry in entries {
                println!("v{} {} {}", entry.version, entry.created_at, entry.root);
            }
        }
        DepotCommands::Rollback { name, version } => {
            let depot = rest.rollback_depot(&realm, &name, version).await?;
            println!("{} rolled back to v{} -> {}", depot.name, depot.version, depot.root);
        }
        DepotCommands::Delete { name } => {
            rest.delete_depot(&realm, &name).await?;
            println!("deleted {name}");
        }
    }
    Ok(())
}

async fn commit_command(config: &Config, cmd: CommitCommands) -> anyhow::Result<()> {
    config.require_auth()?;
    let rest = rest_client(config)?;
    let realm = config.require_realm()?;

    match cmd {
        CommitCommands::List => {
            let records = rest.list_commits(&realm).await?;
            for record in records {
                println!("{} {} {}", record.created_at, record.root, record.title.as_deref().unwrap_or(""));
            }
        }
        CommitCommands::Create { root, title } => {
            let record = rest.create_commit_record(&realm, &root, title.as_deref()).await?;
            println!("recorded {} ({})", record.root, record.created_at);
        }
    }
    Ok(())
}

async fn ticket_command(config: &Config, cmd: TicketCommands) -> anyhow::Result<()> {
    config.require_auth()?;
    let rest = rest_client(config)?;

    match cmd {
        TicketCommands::Create { key, quota, expires_in } => {
            let scope = if key.is_empty() {
                serde_json::json!(null)
            } else {
                serde_json::json!(key)
            };
            let commit = match quota {
                Some(quota) => serde_json::json!({ "quota": quota }),
                None => serde_json::json!(null),
            };
            let body = serde_json::json!({
                "scope": scope,
                "commit": commit,
                "expiresIn": expires_in,
            });
            let response = rest.create_ticket(body).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        TicketCommands::Revoke { id } => {
            rest.revoke_ticket(&id).await?;
            println!("revoked {id}");
        }
    }
    Ok(())
}
