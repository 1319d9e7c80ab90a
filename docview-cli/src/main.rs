mod script;

use clap::{Parser, Subcommand, ValueEnum};
use docview::{
    ChangeFilter, DocumentStore, DocumentView, GetOptions, InitialValue, MemoryStore, QueryOptions,
    RangedView, SubscriptionManager,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;

/// docview CLI: replay writes against a seeded store and print how a live view follows them
#[derive(Parser)]
#[command(name = "docview", version, about)]
struct Cli {
    /// YAML list of documents to seed the store with
    #[arg(long)]
    seed: PathBuf,

    /// YAML list of writes (put / delete / attach) to replay after the first fetch
    #[arg(long)]
    script: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Follow a ranged listing
    Range {
        /// Read the query options from a YAML file instead of flags
        #[arg(long)]
        options: Option<PathBuf>,
        #[arg(long)]
        start_key: Option<String>,
        #[arg(long)]
        end_key: Option<String>,
        /// Exclude end_key itself from the range
        #[arg(long)]
        exclusive_end: bool,
        /// Exact key to list (repeatable)
        #[arg(long = "key")]
        keys: Vec<String>,
        #[arg(long)]
        descending: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        /// Materialize documents in the rows
        #[arg(long)]
        include_docs: bool,
    },

    /// Follow a single document
    Get {
        /// Document ID
        id: String,
        /// Fetch a specific revision
        #[arg(long)]
        rev: Option<String>,
        /// Include the revision history
        #[arg(long)]
        revs: bool,
        /// Include attachment bodies
        #[arg(long)]
        attachments: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, execute(cli))
}

async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = Rc::new(MemoryStore::load_yaml(&cli.seed)?);
    log::info!("Seeded store with {} documents", store.len());
    let steps = script::load_script(cli.script.as_deref())?;

    match cli.command {
        Command::Range {
            options,
            start_key,
            end_key,
            exclusive_end,
            keys,
            descending,
            limit,
            skip,
            include_docs,
        } => {
            let options = match options {
                Some(path) => load_options(&path)?,
                None => QueryOptions {
                    start_key,
                    end_key,
                    inclusive_end: !exclusive_end,
                    keys: (!keys.is_empty()).then_some(keys),
                    descending,
                    limit,
                    skip,
                    include_docs,
                    ..Default::default()
                },
            };
            follow_range(store, options, &steps, &cli.format).await
        }

        Command::Get {
            id,
            rev,
            revs,
            attachments,
        } => {
            let options = GetOptions {
                rev,
                revs,
                attachments,
                ..Default::default()
            };
            follow_document(store, &id, options, &steps, &cli.format).await
        }
    }
}

async fn follow_range(
    store: Rc<MemoryStore>,
    options: QueryOptions,
    steps: &[script::Step],
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let subscriptions = SubscriptionManager::new();
    let mut feed = store.watch_changes(ChangeFilter::All);
    let mut view = RangedView::new(Rc::clone(&store), subscriptions.clone());

    view.watch(options);
    print_step("initial", &view.settled().await, format)?;

    for step in steps {
        let label = step.apply(&store)?;
        subscriptions.drain(&mut feed);
        print_step(&label, &view.settled().await, format)?;
    }

    log::info!("Store served {} queries", store.stats().queries);
    Ok(())
}

async fn follow_document(
    store: Rc<MemoryStore>,
    id: &str,
    options: GetOptions,
    steps: &[script::Step],
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let subscriptions = SubscriptionManager::new();
    let mut feed = store.watch_changes(ChangeFilter::All);
    let mut view = DocumentView::new(Rc::clone(&store), subscriptions.clone());

    view.watch(id, options, &InitialValue::Empty);
    print_step("initial", &view.settled().await, format)?;

    for step in steps {
        let label = step.apply(&store)?;
        subscriptions.drain(&mut feed);
        print_step(&label, &view.settled().await, format)?;
    }

    log::info!("Store served {} point lookups", store.stats().gets);
    Ok(())
}

fn load_options(path: &Path) -> Result<QueryOptions, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read options file '{}': {e}", path.display()))?;
    Ok(serde_yaml::from_str(&content)?)
}

fn print_step<T: Serialize>(
    label: &str,
    state: &T,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let value = serde_json::json!({ "step": label, "state": state });
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Yaml => {
            print!("---\n{}", serde_yaml::to_string(&value)?);
        }
    }
    Ok(())
}
