//! CLI entry point for `mailstrip`.

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailstrip::cache::MessageCache;
use mailstrip::classify::Classifier;
use mailstrip::config::{self, Config};
use mailstrip::extract;
use mailstrip::mailbox::{DirMailbox, Mailbox};
use mailstrip::parser::mime::parse_with_depth;
use mailstrip::pipeline::{parse_id_list, Options, Pipeline};
use mailstrip::rebuild::PlaceholderPolicy;
use mailstrip::report::{self, BatchReport, RunMode};

/// Strip attachments from email messages while keeping everything else.
#[derive(Parser)]
#[command(name = "mailstrip", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Mailbox directory (defaults to `mailbox.path` from the config file)
    #[arg(long, global = true, value_name = "DIR", env = "MAILSTRIP_MAILBOX")]
    mailbox: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for messages and print their ids
    Find {
        /// Search terms; `has:attachment` keeps only messages with attachments
        query: String,
        /// Print CSV instead of a table
        #[arg(long)]
        csv: bool,
    },
    /// Fetch messages into the local cache and print their headers
    Fetch {
        /// Comma-separated message ids
        ids: String,
    },
    /// Show which parts of each message are attachments
    ///
    /// Messages already in the local cache are read from there, so the
    /// output may describe a copy the mailbox has since replaced.
    ListAttachments {
        /// Comma-separated message ids
        ids: String,
        #[arg(long)]
        json: bool,
    },
    /// Save the attachments of each message to disk
    ExtractAttachments {
        /// Comma-separated message ids
        ids: String,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Rebuild messages without their attachments (dry run unless --make-changes)
    RemoveAttachments {
        /// Comma-separated message ids
        ids: String,
        /// Actually upload the rebuilt messages and remove the originals
        #[arg(long)]
        make_changes: bool,
        /// What replaces a removed attachment: stub or omit
        #[arg(long, value_name = "POLICY")]
        placeholder: Option<PlaceholderPolicy>,
        /// Treat unnamed non-body parts as attachments only above this size
        #[arg(long, value_name = "BYTES")]
        min_size: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);
    config.validate()?;

    match cli.command {
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
        Commands::Find { query, csv } => {
            let mailbox = open_mailbox(cli.mailbox.as_deref(), &config)?;
            cmd_find(&mailbox, &config, &query, csv)
        }
        Commands::Fetch { ids } => {
            let mailbox = open_mailbox(cli.mailbox.as_deref(), &config)?;
            cmd_fetch(&mailbox, &config, &parse_ids(&ids)?)
        }
        Commands::ListAttachments { ids, json } => {
            let mailbox = open_mailbox(cli.mailbox.as_deref(), &config)?;
            cmd_list_attachments(&mailbox, &config, &parse_ids(&ids)?, json)
        }
        Commands::ExtractAttachments { ids, output } => {
            let mailbox = open_mailbox(cli.mailbox.as_deref(), &config)?;
            cmd_extract_attachments(&mailbox, &config, &parse_ids(&ids)?, &output)
        }
        Commands::RemoveAttachments {
            ids,
            make_changes,
            placeholder,
            min_size,
            json,
        } => {
            let mut mailbox = open_mailbox(cli.mailbox.as_deref(), &config)?;
            let options = Options {
                mode: RunMode::from_flag(make_changes),
                policy: placeholder.unwrap_or(config.rebuild.placeholder),
                min_attachment_size: min_size.or(config.classify.min_attachment_size),
                max_depth: config.limits.max_depth,
                delete_mode: config.mailbox.delete_mode,
            };
            cmd_remove_attachments(&mut mailbox, &config, options, &parse_ids(&ids)?, json)
        }
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = config::log_file_path(config);
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_default();
    let log_name = log_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn open_mailbox(flag: Option<&Path>, config: &Config) -> anyhow::Result<DirMailbox> {
    let Some(path) = flag.or(config.mailbox.path.as_deref()) else {
        anyhow::bail!("No mailbox given. Pass --mailbox DIR or set mailbox.path in the config file.");
    };
    let mailbox = DirMailbox::open(path)?
        .with_quota(config.mailbox.quota_bytes)
        .with_classifier(Classifier::new(config.classify.min_attachment_size));
    Ok(mailbox)
}

fn open_cache(mailbox: &dyn Mailbox, config: &Config) -> MessageCache {
    MessageCache::new(&config::cache_dir(config), mailbox.account_name())
}

fn parse_ids(ids: &str) -> anyhow::Result<Vec<String>> {
    let ids = parse_id_list(ids);
    if ids.is_empty() {
        anyhow::bail!("No message ids given");
    }
    Ok(ids)
}

fn read_only_options(config: &Config) -> Options {
    Options {
        policy: config.rebuild.placeholder,
        min_attachment_size: config.classify.min_attachment_size,
        max_depth: config.limits.max_depth,
        ..Options::default()
    }
}

fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} {label} [{{bar:40.cyan/blue}}] {{pos}}/{{len}}"
            ))
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailstrip", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Search the mailbox and print matching messages.
fn cmd_find(mailbox: &DirMailbox, config: &Config, query: &str, csv: bool) -> anyhow::Result<()> {
    let ids = mailbox.search_message_ids(query)?;
    let cache = open_cache(mailbox, config);
    let pipeline = Pipeline::new(read_only_options(config)).with_cache(&cache);

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        let raw = pipeline.load_message(mailbox, &id)?;
        let headers = match parse_with_depth(&raw.bytes, config.limits.max_depth) {
            Ok(root) => report::interesting_headers(&root),
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Could not parse message");
                report::InterestingHeaders::default()
            }
        };
        rows.push((id, headers));
    }

    if csv {
        print!("{}", report::csv::headers_csv(&rows));
        return Ok(());
    }

    println!();
    println!("  {} result(s)", rows.len());
    println!();
    if rows.is_empty() {
        return Ok(());
    }

    println!("  {:<18} {:<25} {:<25} {:<40}", "Id", "Date", "From", "Subject");
    println!("  {}", "-".repeat(110));
    for (id, headers) in &rows {
        let date: String = headers.date.as_deref().unwrap_or("").chars().take(24).collect();
        let from: String = headers.from.as_deref().unwrap_or("").chars().take(24).collect();
        let subject: String = headers.subject.as_deref().unwrap_or("").chars().take(39).collect();
        println!("  {id:<18} {date:<25} {from:<25} {subject:<40}");
    }
    println!();
    Ok(())
}

/// Fetch messages into the cache and print their identifying headers.
fn cmd_fetch(mailbox: &DirMailbox, config: &Config, ids: &[String]) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let cache = open_cache(mailbox, config);
    let pipeline = Pipeline::new(read_only_options(config)).with_cache(&cache);

    for id in ids {
        let raw = pipeline.load_message(mailbox, id)?;
        let root = parse_with_depth(&raw.bytes, config.limits.max_depth)?;
        println!();
        println!("  {:<13} {}", "Id:", id);
        for (label, value) in report::interesting_headers(&root).fields() {
            println!("  {:<13} {}", format!("{label}:"), value);
        }
        println!("  {:<13} {}", "Size:", format_size(raw.size(), BINARY));
        println!("  {:<13} {}", "Cached at:", cache.path_for(id).display());
    }
    println!();
    Ok(())
}

fn cmd_list_attachments(
    mailbox: &DirMailbox,
    config: &Config,
    ids: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let cache = open_cache(mailbox, config);
    let pipeline = Pipeline::new(read_only_options(config)).with_cache(&cache);

    let pb = progress_bar(ids.len(), "Reading");
    let batch = pipeline.list_attachments(mailbox, ids, &|current, total| {
        pb.set_length(total as u64);
        pb.set_position(current as u64);
    });
    pb.finish_and_clear();

    print_batch(&batch, json)
}

fn cmd_extract_attachments(
    mailbox: &DirMailbox,
    config: &Config,
    ids: &[String],
    output: &Path,
) -> anyhow::Result<()> {
    let cache = open_cache(mailbox, config);
    let pipeline = Pipeline::new(read_only_options(config)).with_cache(&cache);
    let classifier = Classifier::new(config.classify.min_attachment_size);

    let pb = progress_bar(ids.len(), "Extracting");
    let mut all_paths = Vec::new();
    for (i, id) in ids.iter().enumerate() {
        pb.set_position(i as u64);
        let raw = pipeline.load_message(mailbox, id)?;
        let root = match parse_with_depth(&raw.bytes, config.limits.max_depth) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Skipping unparseable message");
                continue;
            }
        };
        let classified = classifier.classify(&root);
        if classified.attachments().is_empty() {
            continue;
        }
        let subject = report::interesting_headers(&root).subject;
        let folder = output.join(extract::message_folder_name(id, subject.as_deref()));
        all_paths.extend(extract::extract_attachments(&classified, &folder)?);
    }
    pb.finish_and_clear();

    println!(
        "  Extracted {} attachment(s) to {}",
        all_paths.len(),
        output.display()
    );
    Ok(())
}

fn cmd_remove_attachments(
    mailbox: &mut DirMailbox,
    config: &Config,
    options: Options,
    ids: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let cache = open_cache(&*mailbox, config);
    let pipeline = Pipeline::new(options).with_cache(&cache);

    let pb = progress_bar(ids.len(), "Processing");
    let batch = pipeline.remove_attachments(mailbox, ids, &|current, total| {
        pb.set_length(total as u64);
        pb.set_position(current as u64);
    });
    pb.finish_and_clear();

    print_batch(&batch, json)?;
    if batch.failed_count() > 0 {
        anyhow::bail!("{} of {} message(s) failed", batch.failed_count(), batch.messages.len());
    }
    Ok(())
}

fn print_batch(batch: &BatchReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&batch.to_json())?);
    } else {
        print!("{}", batch.render_text());
    }
    Ok(())
}
