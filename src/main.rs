//! CLI entry point for `mailverdict`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailverdict::config::{self, Config};
use mailverdict::ingest::{self, IngestMode, IngestionCoordinator};
use mailverdict::model::record::{ParsedMessage, RawMessage};
use mailverdict::oracle::{OracleClient, SystemPrompt};
use mailverdict::store::{MessageStore, SqliteStore};

#[derive(Parser)]
#[command(
    name = "mailverdict",
    version,
    about = "Classify EML/ARF messages with an LLM oracle and keep the raw evidence"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (overrides $MAILVERDICT_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one message and print its structured document
    Parse { file: PathBuf },
    /// Ingest messages and print their verdicts
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List stored messages
    List {
        /// List raw messages instead of parsed records
        #[arg(long)]
        raw: bool,
        /// With --raw, only raw messages linked to a parsed record
        #[arg(long, requires = "raw")]
        linked: bool,
        #[arg(long)]
        json: bool,
    },
    /// Delete a parsed record and its raw message
    Purge { id: i64 },
    /// Decode a message without storing or classifying it
    Decode { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref());

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Parse { file } => cmd_parse(&file, &config).await,
        Commands::Analyze { files, json } => cmd_analyze(&files, json, &config).await,
        Commands::List { raw, linked, json } => cmd_list(raw, linked, json, &config),
        Commands::Purge { id } => cmd_purge(id, &config),
        Commands::Decode { file } => cmd_decode(&file),
    }
}

/// Set up tracing: stderr plus a log file in the data directory when possible.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::data_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailverdict.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Build the coordinator for one entry point. The guideline must load or we stop here.
fn coordinator(
    config: &Config,
    mode: IngestMode,
) -> anyhow::Result<IngestionCoordinator<SqliteStore, OracleClient>> {
    let prompt = SystemPrompt::install(&config.oracle.guideline_path)?;
    let client = OracleClient::new(&config.oracle, prompt)?;
    let store = SqliteStore::open(config::database_path(config))?;

    let mut coordinator = IngestionCoordinator::new(store, client)
        .with_mode(mode)
        .with_max_message_bytes(config.ingest.max_message_bytes);
    if config.oracle.timeout_secs > 0 {
        coordinator = coordinator.with_deadline(Duration::from_secs(config.oracle.timeout_secs));
    }
    Ok(coordinator)
}

/// Read a message file after checking its extension.
fn read_message(path: &Path) -> anyhow::Result<(String, Vec<u8>)> {
    let filename = path.to_string_lossy().into_owned();
    ingest::check_input_kind(&filename)?;
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let bytes = std::fs::read(path)?;
    Ok((filename, bytes))
}

/// Ingest one file and print the decoded document.
async fn cmd_parse(path: &Path, config: &Config) -> anyhow::Result<()> {
    let (filename, bytes) = read_message(path)?;
    let coordinator = coordinator(config, config.ingest.parse_mode)?;

    let report = coordinator.ingest(&filename, &bytes).await?;
    if let Err(e) = &report.outcome {
        eprintln!("warning: stored without a verdict: {e}");
    }
    println!("{}", report.document.to_pretty_json()?);
    Ok(())
}

/// Ingest several files, printing one verdict per file.
async fn cmd_analyze(paths: &[PathBuf], json: bool, config: &Config) -> anyhow::Result<()> {
    let coordinator = coordinator(config, config.ingest.analyze_mode)?;

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Analyzing [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let mut rows = Vec::with_capacity(paths.len());
    let mut failures = 0usize;

    for path in paths {
        pb.set_message(path.display().to_string());
        let result = match read_message(path) {
            Ok((filename, bytes)) => coordinator
                .ingest(&filename, &bytes)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(report) => rows.push(serde_json::json!({
                "file": path.display().to_string(),
                "raw_message_id": report.raw.id,
                "parsed_message_id": report.parsed.id,
                "analysis": analysis_value(&report.parsed),
            })),
            Err(e) => {
                failures += 1;
                pb.suspend(|| eprintln!("{}: {e}", path.display()));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!();
        println!("  {:<6} {:<10} {:<40} {}", "ID", "Verdict", "Category", "File");
        println!("  {}", "-".repeat(90));
        for row in &rows {
            let analysis = &row["analysis"];
            let verdict = analysis["verdict"].as_str().unwrap_or("ERROR");
            let category = analysis["category"]
                .as_str()
                .or_else(|| analysis["error"].as_str())
                .unwrap_or("");
            let category: String = category.chars().take(39).collect();
            println!(
                "  {:<6} {:<10} {:<40} {}",
                row["parsed_message_id"],
                verdict,
                category,
                row["file"].as_str().unwrap_or("")
            );
        }
        println!();
        println!(
            "  {} analyzed, {} failed in {:.2?}",
            rows.len(),
            failures,
            start.elapsed()
        );
        println!();
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} file(s) could not be ingested", paths.len());
    }
    Ok(())
}

/// List parsed records or raw messages.
fn cmd_list(raw: bool, linked: bool, json: bool, config: &Config) -> anyhow::Result<()> {
    let store = SqliteStore::open(config::database_path(config))?;
    if raw {
        let messages = store.list_raw_messages(linked)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&messages)?);
        } else {
            print_raw_table(&messages);
        }
    } else {
        let messages = store.list_parsed_messages()?;
        if json {
            print_parsed_json(&messages)?;
        } else {
            print_parsed_table(&messages);
        }
    }
    Ok(())
}

fn cmd_purge(id: i64, config: &Config) -> anyhow::Result<()> {
    let store = SqliteStore::open(config::database_path(config))?;
    if !store.delete_parsed_message_cascade(id)? {
        anyhow::bail!("No parsed message with id {id}");
    }
    println!("Purged parsed message {id} and its raw message");
    Ok(())
}

/// Decode only: no storage, no oracle.
fn cmd_decode(path: &Path) -> anyhow::Result<()> {
    let (_, bytes) = read_message(path)?;
    let doc = mailverdict::parser::decode(&bytes)?;
    println!("{}", doc.to_pretty_json()?);
    Ok(())
}

fn print_parsed_table(messages: &[ParsedMessage]) {
    println!();
    println!("  {} parsed message(s)", messages.len());
    println!();
    if messages.is_empty() {
        return;
    }

    println!(
        "  {:<6} {:<17} {:<25} {:<35} {:<10}",
        "ID", "Date", "From", "Subject", "Verdict"
    );
    println!("  {}", "-".repeat(97));
    for msg in messages {
        let verdict = match msg.analysis() {
            Ok(analysis) => analysis
                .verdict()
                .map_or("ERROR", |v| v.verdict.as_str())
                .to_string(),
            Err(_) => "?".to_string(),
        };
        let from: String = msg.from_address.chars().take(24).collect();
        let subject: String = msg.subject.chars().take(34).collect();
        println!(
            "  {:<6} {:<17} {:<25} {:<35} {:<10}",
            msg.id,
            msg.date.format("%Y-%m-%d %H:%M"),
            from,
            subject,
            verdict
        );
    }
    println!();
}

fn print_parsed_json(messages: &[ParsedMessage]) -> anyhow::Result<()> {
    let items: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "id": m.id,
                "raw_message_id": m.raw_message_id,
                "date": m.date.to_rfc3339(),
                "from": m.from_address,
                "to": m.to_address,
                "subject": m.subject,
                "source_ip": m.source_ip,
                "analysis": analysis_value(m),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}

/// Stored analysis as JSON. Payloads that no longer decode are shown verbatim.
fn analysis_value(msg: &ParsedMessage) -> serde_json::Value {
    msg.analysis()
        .ok()
        .and_then(|a| serde_json::to_value(a).ok())
        .unwrap_or_else(|| serde_json::Value::String(msg.verdict_json.clone()))
}

fn print_raw_table(messages: &[RawMessage]) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {} raw message(s)", messages.len());
    println!();
    if messages.is_empty() {
        return;
    }

    println!("  {:<6} {:<8} {:>10}  {}", "ID", "Parsed", "Size", "First line");
    println!("  {}", "-".repeat(80));
    for msg in messages {
        let parsed = msg
            .parsed_message_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let first_line: String = msg
            .raw_content
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(50)
            .collect();
        println!(
            "  {:<6} {:<8} {:>10}  {}",
            msg.id,
            parsed,
            format_size(msg.raw_bytes.len() as u64, BINARY),
            first_line
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn parsed_with(verdict_json: &str) -> ParsedMessage {
        ParsedMessage {
            id: 1,
            from_address: "a@example.com".into(),
            to_address: "b@example.com".into(),
            subject: "s".into(),
            date: Utc::now(),
            source_ip: String::new(),
            verdict_json: verdict_json.into(),
            raw_message_id: 1,
        }
    }

    #[test]
    fn test_undecodable_analysis_is_shown_verbatim() {
        let value = analysis_value(&parsed_with("{truncated"));
        assert_eq!(value, serde_json::Value::String("{truncated".into()));
    }

    #[test]
    fn test_stored_analysis_is_decoded() {
        let value = analysis_value(&parsed_with(
            r#"{"error": "OracleUnavailable", "details": "refused"}"#,
        ));
        assert_eq!(value["error"], "OracleUnavailable");
        assert_eq!(value["details"], "refused");
    }
}
