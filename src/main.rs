use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use podsync::auth::{hash_password, DbAuthenticator};
use podsync::config::Config;
use podsync::error::status_for;
use podsync::storage::Database;
use podsync::{SyncError, SyncService};

#[derive(Parser, Debug)]
#[command(name = "podsync", about = "Podcast subscription synchronization service")]
struct Cli {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "podsync.toml")]
    config: PathBuf,

    /// Database file (overrides `database_path` from the config file)
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Credentials {
    /// Username, or e-mail address for the legacy endpoints
    #[arg(long, short)]
    user: String,

    #[arg(long, env = "PODSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl Credentials {
    fn secret(&self) -> Result<SecretString> {
        self.password
            .clone()
            .map(SecretString::from)
            .context("A password is required (--password or PODSYNC_PASSWORD)")
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user account
    AddUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "PODSYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Upload a subscription list. Without --device this is the legacy OPML upload.
    Upload {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        device: Option<String>,
        /// txt, opml, json or json-detailed
        #[arg(long, default_value = "opml")]
        format: String,
    },
    /// Print a subscription list. Without --device this is the legacy OPML list.
    GetList {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        device: Option<String>,
        /// txt, opml, json or json-detailed
        #[arg(long, default_value = "opml")]
        format: String,
    },
    /// Subscribe a device to a feed URL
    Subscribe {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        url: String,
        #[arg(long)]
        device: String,
    },
    /// Unsubscribe a device from a podcast
    Unsubscribe {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        podcast: i64,
        #[arg(long)]
        device: String,
    },
    /// Edit podcast tags
    Tag {
        #[command(subcommand)]
        action: TagCommand,
    },
    /// Print a podcast overview as JSON
    Show {
        #[arg(long)]
        podcast: i64,
        #[arg(long, short)]
        user: Option<String>,
        #[arg(long, env = "PODSYNC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Print a user's history as JSON
    History {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        podcast: Option<i64>,
    },
    /// Print the listener count of an episode
    Listeners {
        #[arg(long)]
        episode: i64,
    },
}

#[derive(Subcommand, Debug)]
enum TagCommand {
    /// Add comma-separated tags
    Add {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        podcast: i64,
        #[arg(long)]
        tags: String,
    },
    /// Remove one tag
    Remove {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        podcast: i64,
        #[arg(long)]
        tag: String,
    },
}

/// Read an upload file, refusing anything that is not a regular file.
fn read_upload(path: &Path) -> Result<Vec<u8>> {
    // SEC-008: Canonicalize to resolve symlinks before checking the file type
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve upload file: {}", path.display()))?;
    let metadata = std::fs::metadata(&canonical)?;
    if !metadata.is_file() {
        anyhow::bail!("Upload path must be a regular file");
    }
    std::fs::read(&canonical)
        .with_context(|| format!("Failed to read upload file: {}", canonical.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the structured error for a failed operation and exit non-zero.
fn fail(err: SyncError) -> ! {
    tracing::debug!(error = ?err, "Request failed");
    match serde_json::to_string(&err.to_body()) {
        Ok(body) => eprintln!("{body}"),
        Err(_) => eprintln!("{err}"),
    }
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    // RUST_LOG takes precedence over the config file
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_path = config
        .database_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?
        .to_owned();
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {db_path}"))?;
    let auth = Arc::new(DbAuthenticator::new(db.clone()));
    let service = SyncService::new(db.clone(), auth, config);

    match cli.command {
        Command::AddUser {
            username,
            email,
            password,
        } => {
            let hash = hash_password(&SecretString::from(password))
                .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;
            let user = db
                .create_user(&username, &email, &hash)
                .await
                .context("Failed to create user")?;
            println!("Created user {} (id {})", user.username, user.id);
        }

        Command::Upload {
            credentials,
            file,
            device: None,
            ..
        } => {
            let secret = credentials.secret()?;
            let opml = read_upload(&file)?;
            let result = service
                .upload_legacy(Some(&credentials.user), Some(&secret), Some(&opml))
                .await;
            println!("{}", status_for(&result));
            if result.is_err() {
                std::process::exit(1);
            }
        }

        Command::Upload {
            credentials,
            file,
            device: Some(device),
            format,
        } => {
            let secret = credentials.secret()?;
            let body = read_upload(&file)?;
            match service
                .upload(&credentials.user, &secret, &credentials.user, &device, &format, &body)
                .await
            {
                Ok(outcome) => print_json(&outcome)?,
                Err(e) => fail(e),
            }
        }

        Command::GetList {
            credentials,
            device: None,
            ..
        } => {
            let secret = credentials.secret()?;
            match service.get_list_legacy(Some(&credentials.user), Some(&secret)).await {
                Ok(opml) => println!("{opml}"),
                Err(e) => {
                    println!("{}", e.status_token());
                    std::process::exit(1);
                }
            }
        }

        Command::GetList {
            credentials,
            device: Some(device),
            format,
        } => {
            let secret = credentials.secret()?;
            match service
                .download(&credentials.user, &secret, &credentials.user, &device, &format)
                .await
            {
                Ok(list) => println!("{}", list.body),
                Err(e) => fail(e),
            }
        }

        Command::Subscribe {
            credentials,
            url,
            device,
        } => {
            let user = match service.authenticate(&credentials.user, &credentials.secret()?).await {
                Ok(user) => user,
                Err(e) => fail(e),
            };
            let result = match service.subscribe_url(&url).await {
                Ok(podcast) => service.subscribe(&user, podcast.id, &device).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(true) => println!("Subscribed"),
                Ok(false) => println!("Already subscribed"),
                Err(e) => fail(e),
            }
        }

        Command::Unsubscribe {
            credentials,
            podcast,
            device,
        } => {
            let user = match service.authenticate(&credentials.user, &credentials.secret()?).await {
                Ok(user) => user,
                Err(e) => fail(e),
            };
            match service.unsubscribe(&user, podcast, &device).await {
                Ok(true) => println!("Unsubscribed"),
                Ok(false) => println!("Not subscribed"),
                Err(e) => fail(e),
            }
        }

        Command::Tag { action } => {
            let (credentials, podcast) = match &action {
                TagCommand::Add {
                    credentials,
                    podcast,
                    ..
                }
                | TagCommand::Remove {
                    credentials,
                    podcast,
                    ..
                } => (credentials, *podcast),
            };
            let user = match service.authenticate(&credentials.user, &credentials.secret()?).await {
                Ok(user) => user,
                Err(e) => fail(e),
            };
            let result = match &action {
                TagCommand::Add { tags, .. } => service.add_tags(&user, podcast, tags).await,
                TagCommand::Remove { tag, .. } => service.remove_tag(&user, podcast, tag).await,
            };
            match result {
                Ok(tags) => print_json(&tags)?,
                Err(e) => fail(e),
            }
        }

        Command::Show {
            podcast,
            user,
            password,
        } => {
            let viewer = match (user, password) {
                (Some(user), Some(password)) => {
                    match service.authenticate(&user, &SecretString::from(password)).await {
                        Ok(user) => Some(user),
                        Err(e) => fail(e),
                    }
                }
                (Some(_), None) => anyhow::bail!("--user requires a password"),
                _ => None,
            };
            match service.podcast_overview(podcast, viewer.as_ref()).await {
                Ok(overview) => print_json(&overview)?,
                Err(e) => fail(e),
            }
        }

        Command::History {
            credentials,
            podcast,
        } => {
            let user = match service.authenticate(&credentials.user, &credentials.secret()?).await {
                Ok(user) => user,
                Err(e) => fail(e),
            };
            match service.history(&user, podcast).await {
                Ok(history) => print_json(&history)?,
                Err(e) => fail(e),
            }
        }

        Command::Listeners { episode } => match service.listener_count(episode).await {
            Ok(count) => println!("{count}"),
            Err(e) => fail(e),
        },
    }

    Ok(())
}
