//! Tangled: a content-addressable storage server with versioned namespaces and scoped
//! delegated access.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod cas;
mod config;
mod db;
mod storage;

use config::Config;

#[derive(Parser)]
#[command(name = "tangled")]
#[command(about = "Content-addressable storage server daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (runs in background)
    Serve {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the server
    Down,
    /// Show server status
    Status,
    /// Run database migrations
    Migrate,
    /// User management
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a new local login identity
    Create {
        /// Username
        #[arg(long)]
        username: String,
    },
    /// List all local login identities
    List,
}

fn pid_file() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tangled.pid")
}

fn is_server_running() -> Option<u32> {
    let pid_path = pid_file();
    if pid_path.exists() {
        if let Ok(pid_str) = fs::read_to_string(&pid_path) {
            if let Ok(pid) = pid_str.trim().parse::<u32>() {
                #[cfg(unix)]
                {
                    let result = Command::new("kill")
                        .args(["-0", &pid.to_string()])
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status();
                    if result.map(|s| s.success()).unwrap_or(false) {
                        return Some(pid);
                    }
                }
                #[cfg(not(unix))]
                {
                    return Some(pid);
                }
            }
        }
        let _ = fs::remove_file(&pid_path);
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't need full init
    match &cli.command {
        Commands::Down => {
            return stop_server();
        }
        Commands::Status => {
            return show_status();
        }
        Commands::Serve { foreground } if !foreground => {
            return start_daemon();
        }
        _ => {}
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tangled=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve { foreground: _ } => {
            run_server(config).await?;
        }
        Commands::Down => unreachable!(),
        Commands::Status => unreachable!(),
        Commands::Migrate => {
            run_migrations(&config).await?;
        }
        Commands::User { command } => match command {
            UserCommands::Create { username } => {
                create_user(&config, &username).await?;
            }
            UserCommands::List => {
                list_users(&config).await?;
            }
        },
    }

    Ok(())
}

fn start_daemon() -> anyhow::Result<()> {
    if let Some(pid) = is_server_running() {
        println!("tangled already running (pid {})", pid);
        return Ok(());
    }

    let exe = std::env::current_exe()?;

    let child = Command::new(&exe)
        .args(["serve", "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let pid = child.id();

    let pid_path = pid_file();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, pid.to_string())?;

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    println!("tangled serving on localhost:{}", config.rest_port);
    println!("pid: {}", pid);

    Ok(())
}

fn stop_server() -> anyhow::Result<()> {
    if let Some(pid) = is_server_running() {
        #[cfg(unix)]
        {
            Command::new("kill").args([&pid.to_string()]).status()?;
        }
        #[cfg(not(unix))]
        {
            Command::new("taskkill").args(["/PID", &pid.to_string(), "/F"]).status()?;
        }

        let _ = fs::remove_file(pid_file());
        println!("tangled stopped");
    } else {
        println!("tangled not running");
    }
    Ok(())
}

fn show_status() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    if let Some(pid) = is_server_running() {
        println!("tangled running");
        println!("  pid: {}", pid);
        println!("  rest: localhost:{}", config.rest_port);
    } else {
        println!("tangled not running");
    }
    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let pid_path = pid_file();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;

    let db_pool = db::create_pool(&config.database_url).await?;

    tracing::info!("checking database migrations...");
    if let Err(e) = db::run_migrations(&db_pool).await {
        let err_str = e.to_string();
        if !err_str.contains("already exists") {
            tracing::warn!("migration warning: {}", err_str);
        }
    }

    fs::create_dir_all(&config.blob_storage_path)?;
    let blob_store = std::sync::Arc::new(storage::FsBlobStore::new(config.blob_storage_path.clone()));

    let app_state = api::AppState::new(db_pool.clone(), blob_store, config.clone());

    let rest_addr = format!("0.0.0.0:{}", config.rest_port).parse()?;
    tracing::info!("REST listening on {}", rest_addr);
    api::rest::serve(rest_addr, app_state).await?;

    let _ = fs::remove_file(pid_file());

    Ok(())
}

async fn run_migrations(config: &Config) -> anyhow::Result<()> {
    println!("running migrations...");
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    println!("migrations complete");
    Ok(())
}

async fn create_user(config: &Config, username: &str) -> anyhow::Result<()> {
    use std::io::{self, Write};

    if username.len() < 3 {
        anyhow::bail!("username must be at least 3 characters");
    }
    if !username.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        anyhow::bail!("username can only contain letters, numbers, underscores, and hyphens");
    }

    print!("Password: ");
    io::stdout().flush()?;

    let password = tokio::task::spawn_blocking(|| -> anyhow::Result<String> {
        let pass = rpassword::read_password()?;
        Ok(pass)
    })
    .await??;

    print!("Confirm password: ");
    io::stdout().flush()?;

    let confirm = tokio::task::spawn_blocking(|| -> anyhow::Result<String> {
        let pass = rpassword::read_password()?;
        Ok(pass)
    })
    .await??;

    if password != confirm {
        anyhow::bail!("passwords do not match");
    }
    if password.len() < 4 {
        anyhow::bail!("password must be at least 4 characters");
    }

    println!("connecting to database...");
    let pool = tokio::time::timeout(std::time::Duration::from_secs(10), db::create_pool(&config.database_url))
        .await
        .map_err(|_| anyhow::anyhow!("database connection timed out. Is PostgreSQL running?"))??;

    println!("hashing password...");
    let password_hash = auth::hash_password(&password)?;

    println!("creating user in database...");
    let user = db::users::create_user(&pool, username, &password_hash).await?;

    println!("user created: {} ({})", user.id, user.username);

    Ok(())
}

async fn list_users(config: &Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config.database_url).await?;
    let users = sqlx::query_as::<_, (String, String)>("SELECT id, username FROM users ORDER BY created_at")
        .fetch_all(&pool)
        .await?;

    if users.is_empty() {
        println!("no users");
    } else {
        for (id, username) in users {
            println!("{} - {}", id, username);
        }
    }

    Ok(())
}
