use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use fastrace::collector::{Config as FastraceConfig, ConsoleReporter};
use fastrace::prelude::*;
use roster_config::{get_config_path, get_log_dir, Config};
use roster_form::{DataUri, ImageFile, ImageSource};
use roster_output::*;
use roster_state::{Commit, Store, StoreError};
use roster_store::LocalStorage;
use roster_types::{UserForm, UserId, UserRecord};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod shell;

const MAIN_HELP: &str = r#"Roster keeps a small list of user profiles: name, email, a 10-digit mobile
number, an optional address and a profile image. Records are stored locally
and survive restarts.

`roster add` creates a user, `roster list` shows everyone, `roster show ID`
prints one user, `roster edit ID` changes fields (the image is kept unless a
new one is given) and `roster delete ID` removes a user.

`roster shell` starts an interactive session with the form, detail and edit
views of the full application.

See `roster COMMAND --help` for more documentation and command-specific options."#;

#[derive(Parser)]
#[command(name = "roster")]
#[command(about = MAIN_HELP)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Output as JSON")]
    json: bool,

    #[arg(long, global = true, help = "Print timing spans for profiling")]
    profile: bool,

    #[arg(long, global = true, help = "Config file (default: ~/.config/roster/config.toml)")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Fields of the create form. Missing values are validated, not rejected by
/// the argument parser, so every problem is reported at once.
#[derive(Args, Debug, Clone)]
pub(crate) struct FormFields {
    #[arg(long, default_value = "", help = "Full name")]
    name: String,
    #[arg(long, default_value = "", help = "Email address")]
    email: String,
    #[arg(long, default_value = "", help = "10-digit mobile number")]
    phone: String,
    #[arg(long, default_value = "", help = "Postal address")]
    address: String,
    #[arg(long, help = "Profile image file")]
    image: Option<PathBuf>,
}

impl FormFields {
    pub(crate) fn split(self) -> (UserForm, Option<Box<dyn ImageSource>>) {
        let form = UserForm::new(self.name, self.email, self.phone, self.address);
        (form, image_source(self.image))
    }
}

/// Fields of the edit form; anything omitted keeps its current value.
#[derive(Args, Debug, Clone)]
pub(crate) struct EditFields {
    #[arg(long, help = "New name")]
    name: Option<String>,
    #[arg(long, help = "New email address")]
    email: Option<String>,
    #[arg(long, help = "New 10-digit mobile number")]
    phone: Option<String>,
    #[arg(long, help = "New postal address")]
    address: Option<String>,
    #[arg(long, help = "New profile image file (default: keep current)")]
    image: Option<PathBuf>,
}

impl EditFields {
    pub(crate) fn apply(self, current: &UserRecord) -> (UserForm, Option<Box<dyn ImageSource>>) {
        let mut form = UserForm::from_record(current);
        if let Some(name) = self.name {
            form.name = name;
        }
        if let Some(email) = self.email {
            form.email = email;
        }
        if let Some(phone) = self.phone {
            form.phone = phone;
        }
        if let Some(address) = self.address {
            form.address = address;
        }
        (form, image_source(self.image))
    }
}

fn image_source(path: Option<PathBuf>) -> Option<Box<dyn ImageSource>> {
    path.map(|p| Box::new(ImageFile::new(p)) as Box<dyn ImageSource>)
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create a user.")]
    Add {
        #[command(flatten)]
        fields: FormFields,
    },

    #[command(about = "List all users.")]
    List,

    #[command(about = "Show one user's details.")]
    Show {
        #[arg(help = "User id")]
        id: UserId,
        #[arg(long, help = "Write the decoded profile image to this file")]
        export_image: Option<PathBuf>,
    },

    #[command(about = "Edit a user. Omitted fields keep their current value.")]
    Edit {
        #[arg(help = "User id")]
        id: UserId,
        #[command(flatten)]
        fields: EditFields,
    },

    #[command(about = "Delete a user.")]
    Delete {
        #[arg(help = "User id")]
        id: UserId,
    },

    #[command(about = "Start an interactive session.")]
    Shell,

    #[command(about = "Print config file location, effective settings and storage usage.")]
    Config {
        #[arg(long, help = "Write the effective settings to the config file")]
        write: bool,
    },
}

pub(crate) type AppStore = Store<LocalStorage>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    init_logging(&config)?;

    let json_output = cli.json;
    let result = if cli.profile {
        fastrace::set_reporter(ConsoleReporter, FastraceConfig::default());
        let root = Span::root("roster", SpanContext::random());
        let result = run(cli, config).in_span(root).await;
        fastrace::flush();
        result
    } else {
        run(cli, config).await
    };

    if let Err(e) = &result {
        if let Some(errors) = e.downcast_ref::<StoreError>().and_then(StoreError::field_errors) {
            if json_output {
                println!("{}", to_json(&json!({ "errors": errors })));
            } else {
                eprintln!("Invalid input:\n{}", format_field_errors(errors));
            }
            std::process::exit(1);
        }
    }
    result
}

fn init_logging(config: &Config) -> Result<()> {
    let log_dir = get_log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("roster.log"))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let json_output = cli.json;
    match cli.command {
        Commands::Config { write } => handle_config(&cli.config, &config, json_output, write),
        command => {
            let mut store = open_store(&config)?;
            match command {
                Commands::Add { fields } => handle_add(&mut store, json_output, fields).await,
                Commands::List => handle_list(&store, json_output),
                Commands::Show { id, export_image } => {
                    handle_show(&store, json_output, id, export_image).await
                }
                Commands::Edit { id, fields } => {
                    handle_edit(&mut store, json_output, id, fields).await
                }
                Commands::Delete { id } => handle_delete(&mut store, json_output, id),
                Commands::Shell => shell::run_shell(store, json_output).await,
                Commands::Config { .. } => unreachable!(),
            }
        }
    }
}

pub(crate) fn open_store(config: &Config) -> Result<AppStore> {
    let dir = config.storage.resolved_dir();
    let storage = LocalStorage::open(&dir, &config.storage.key, config.storage.map_size)
        .with_context(|| format!("Failed to open storage at {}", dir.display()))?;
    info!("Using storage at {}", dir.display());
    Ok(Store::open(storage)?.with_image_limit(config.image.max_bytes))
}

fn handle_config(
    path: &Option<PathBuf>,
    config: &Config,
    json_output: bool,
    write: bool,
) -> Result<()> {
    let config_path = path.clone().unwrap_or_else(get_config_path);
    if write {
        config.save_to(&config_path)?;
        info!("Wrote config to {}", config_path.display());
    }

    let dir = config.storage.resolved_dir();
    let stats = if dir.exists() {
        let storage = LocalStorage::open(&dir, &config.storage.key, config.storage.map_size)?;
        Some(storage.stats()?)
    } else {
        None
    };

    if json_output {
        let storage = stats.map(|s| {
            json!({
                "entries": s.entries,
                "users_bytes": s.users_bytes,
                "disk_bytes": s.disk_bytes,
            })
        });
        println!(
            "{}",
            to_json(&json!({
                "config_path": config_path,
                "exists": config_path.exists(),
                "storage_dir": dir,
                "storage": storage,
                "config": config,
            }))
        );
        return Ok(());
    }

    println!("Config file: {}", config_path.display());
    if !config_path.exists() {
        println!("(file does not exist, using defaults)");
    }
    println!("Storage dir: {}", dir.display());
    match stats {
        Some(s) => println!(
            "Storage: {} key(s), user list {}, {} on disk",
            s.entries,
            format_size(s.users_bytes),
            format_size(s.disk_bytes)
        ),
        None => println!("Storage: (not created yet)"),
    }
    println!();
    println!("{}", config.to_toml()?);
    Ok(())
}

async fn handle_add(store: &mut AppStore, json_output: bool, fields: FormFields) -> Result<()> {
    let (form, image) = fields.split();
    match store.submit(form, image).await? {
        Commit::Applied(record) => {
            if json_output {
                println!("{}", to_json(&record));
            } else {
                println!("Added user {}\n\n{}", record.id, format_user_detail(&record));
            }
            Ok(())
        }
        Commit::Discarded => Err(anyhow!("Submission was discarded")),
    }
}

fn handle_list(store: &AppStore, json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", to_json(&store.users()));
    } else {
        println!("{}", format_user_table(store.users()));
    }
    Ok(())
}

async fn handle_show(
    store: &AppStore,
    json_output: bool,
    id: UserId,
    export_image: Option<PathBuf>,
) -> Result<()> {
    let record = store.get(id).ok_or(StoreError::NotFound(id))?;

    if let Some(path) = export_image {
        let bytes = DataUri::parse(&record.image)?.decode()?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!("Wrote {} to {}", format_size(bytes.len() as u64), path.display());
    }

    if json_output {
        println!("{}", to_json(record));
    } else {
        println!("{}", format_user_detail(record));
    }
    Ok(())
}

async fn handle_edit(
    store: &mut AppStore,
    json_output: bool,
    id: UserId,
    fields: EditFields,
) -> Result<()> {
    let current = store.view_user(id)?.clone();
    store.begin_editing()?;
    let (form, image) = fields.apply(&current);

    match store.save_edit(form, image).await? {
        Commit::Applied(record) => {
            if json_output {
                println!("{}", to_json(&record));
            } else {
                println!("Updated user {}\n\n{}", record.id, format_user_detail(&record));
            }
            Ok(())
        }
        Commit::Discarded => Err(anyhow!("Edit was discarded")),
    }
}

fn handle_delete(store: &mut AppStore, json_output: bool, id: UserId) -> Result<()> {
    let removed = store.delete_user(id)?;
    if json_output {
        println!("{}", to_json(&json!({ "deleted": removed.id, "remaining": store.len() })));
    } else {
        println!("Deleted user {} ({}), {} remaining", removed.id, removed.name, store.len());
    }
    Ok(())
}
