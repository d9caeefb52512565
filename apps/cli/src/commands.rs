//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use personamap_core::Orchestrator;
use personamap_shared::{
    AppConfig, ContentMapping, CrawlJob, CrawlMode, CrawlScope, JobId, PersonaDefinition,
    ProgressSnapshot, init_config, load_config, load_config_from,
    validate_api_key,
};
use personamap_storage::Storage;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::progress::CliProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PersonaMap: map a site's pages to the audiences they serve.
#[derive(Parser)]
#[command(
    name = "personamap",
    version,
    about = "Crawl a site and score every page against your audience personas.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.personamap/personamap.toml.
    #[arg(long, global = true, env = "PERSONAMAP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Manage crawl jobs.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Manage persona definitions.
    Personas {
        #[command(subcommand)]
        action: PersonaAction,
    },

    /// Run a job until its frontier or page budget is exhausted.
    Crawl {
        /// Job ID.
        job_id: String,
    },

    /// Show a job's progress.
    Status {
        /// Job ID.
        job_id: String,
    },

    /// List a job's crawled pages.
    Pages {
        /// Job ID.
        job_id: String,
    },

    /// List page↔persona mappings.
    Mappings {
        /// Mappings of one page (page ID).
        #[arg(long, conflicts_with = "persona", required_unless_present = "persona")]
        page: Option<String>,

        /// Mappings of one persona (persona ID).
        #[arg(long)]
        persona: Option<String>,

        /// Include deactivated mappings from earlier crawls.
        #[arg(long)]
        history: bool,
    },

    /// Mark a mapping as reviewed by a person.
    Verify {
        /// Mapping ID.
        mapping_id: String,

        /// Clear the verified flag instead of setting it.
        #[arg(long)]
        unset: bool,
    },

    /// Show a job's URL frontier.
    Frontier {
        /// Job ID.
        job_id: String,

        /// Only show permanently failed URLs.
        #[arg(long)]
        failed: bool,
    },

    /// Database maintenance.
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Job subcommands.
#[derive(Subcommand)]
pub(crate) enum JobAction {
    /// Create a job for a site.
    Add {
        /// Base URL of the site.
        url: String,

        /// Human-readable name (defaults to the URL host).
        #[arg(short, long)]
        name: Option<String>,

        /// Wildcard pattern a URL must match (repeatable).
        #[arg(long = "include")]
        include: Vec<String>,

        /// Wildcard pattern that excludes a URL (repeatable).
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Page budget per run (defaults to `crawler.default_max_pages`).
        #[arg(long)]
        max_pages: Option<u32>,

        /// incremental or overwrite.
        #[arg(long, default_value = "incremental")]
        mode: String,

        /// Schedule string, stored for external schedulers.
        #[arg(long)]
        schedule: Option<String>,
    },
    /// List all jobs.
    List,
    /// Show one job with its frontier counts and personas.
    Show { job_id: String },
    /// Delete a job and everything it crawled.
    Delete { job_id: String },
    /// Clear a job's frontier, pages, and mappings but keep the job.
    Clear { job_id: String },
    /// Return a job left `running` by a crashed or killed process to inactive.
    Reset { job_id: String },
    /// Restrict a job to a subset of personas (none given: all active).
    Personas {
        job_id: String,
        persona_ids: Vec<String>,
    },
}

/// Persona subcommands.
#[derive(Subcommand)]
pub(crate) enum PersonaAction {
    /// Load persona definitions from a TOML file.
    Sync {
        /// File with `[[persona]]` tables.
        #[arg(long)]
        file: PathBuf,
    },
    /// List persona definitions.
    List {
        /// Include inactive personas.
        #[arg(long)]
        all: bool,
    },
}

/// Maintenance subcommands.
#[derive(Subcommand)]
pub(crate) enum MaintenanceAction {
    /// Keep only the best active mapping per page and persona.
    DedupeMappings,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "personamap=info,personamap_core=info,personamap_storage=warn",
        1 => "personamap=debug,personamap_core=debug,personamap_crawler=debug,personamap_classifier=debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
        Command::Job { action } => {
            let (config, storage) = open(config_path).await?;
            match action {
                JobAction::Add {
                    url,
                    name,
                    include,
                    exclude,
                    max_pages,
                    mode,
                    schedule,
                } => {
                    let job = build_job(&config, &url, name, include, exclude, max_pages, &mode, schedule)?;
                    cmd_job_add(&storage, &job).await
                }
                JobAction::List => cmd_job_list(&storage).await,
                JobAction::Show { job_id } => cmd_job_show(&storage, &parse_job_id(&job_id)?).await,
                JobAction::Delete { job_id } => {
                    storage.delete_job(&parse_job_id(&job_id)?).await?;
                    println!("Deleted job {job_id}");
                    Ok(())
                }
                JobAction::Clear { job_id } => {
                    storage.clear_job_data(&parse_job_id(&job_id)?).await?;
                    println!("Cleared crawl data of job {job_id}");
                    Ok(())
                }
                JobAction::Reset { job_id } => {
                    cmd_job_reset(storage, config, &parse_job_id(&job_id)?).await
                }
                JobAction::Personas {
                    job_id,
                    persona_ids,
                } => {
                    storage
                        .assign_personas(&parse_job_id(&job_id)?, &persona_ids)
                        .await?;
                    if persona_ids.is_empty() {
                        println!("Job {job_id} now uses all active personas");
                    } else {
                        println!("Job {job_id} now uses {} persona(s)", persona_ids.len());
                    }
                    Ok(())
                }
            }
        }
        Command::Personas { action } => {
            let (_, storage) = open(config_path).await?;
            match action {
                PersonaAction::Sync { file } => cmd_personas_sync(&storage, &file).await,
                PersonaAction::List { all } => cmd_personas_list(&storage, !all).await,
            }
        }
        Command::Crawl { job_id } => {
            let (config, storage) = open(config_path).await?;
            cmd_crawl(storage, config, &parse_job_id(&job_id)?).await
        }
        Command::Status { job_id } => {
            let storage = open_reader(config_path).await?;
            cmd_status(&storage, &parse_job_id(&job_id)?).await
        }
        Command::Pages { job_id } => {
            let storage = open_reader(config_path).await?;
            cmd_pages(&storage, &parse_job_id(&job_id)?).await
        }
        Command::Mappings {
            page,
            persona,
            history,
        } => {
            let storage = open_reader(config_path).await?;
            cmd_mappings(&storage, page.as_deref(), persona.as_deref(), history).await
        }
        Command::Verify { mapping_id, unset } => {
            let (_, storage) = open(config_path).await?;
            storage.verify_mapping(&mapping_id, !unset).await?;
            println!(
                "Mapping {mapping_id} {}",
                if unset { "unverified" } else { "verified" }
            );
            Ok(())
        }
        Command::Frontier { job_id, failed } => {
            let storage = open_reader(config_path).await?;
            cmd_frontier(&storage, &parse_job_id(&job_id)?, failed).await
        }
        Command::Maintenance { action } => match action {
            MaintenanceAction::DedupeMappings => {
                let (_, storage) = open(config_path).await?;
                let deactivated = storage.collapse_duplicate_mappings().await?;
                println!("Deactivated {deactivated} duplicate active mapping(s)");
                Ok(())
            }
        },
    }
}

fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    Ok(match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

/// Load config and open the database read-write (runs migrations).
async fn open(config_path: Option<&Path>) -> Result<(AppConfig, Storage)> {
    let config = load(config_path)?;
    let db_path = config.storage.resolved_path()?;
    let storage = Storage::open(&db_path)
        .await
        .wrap_err_with(|| format!("failed to open database at {}", db_path.display()))?;
    Ok((config, storage))
}

/// Open the database read-only for reporting commands.
async fn open_reader(config_path: Option<&Path>) -> Result<Storage> {
    let config = load(config_path)?;
    let db_path = config.storage.resolved_path()?;
    if !db_path.exists() {
        return Err(eyre!(
            "no database at {}: create a job first with `personamap job add`",
            db_path.display()
        ));
    }
    Ok(Storage::open_readonly(&db_path).await?)
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    raw.parse::<JobId>()
        .wrap_err_with(|| format!("invalid job ID '{raw}'"))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn build_job(
    config: &AppConfig,
    url: &str,
    name: Option<String>,
    include: Vec<String>,
    exclude: Vec<String>,
    max_pages: Option<u32>,
    mode: &str,
    schedule: Option<String>,
) -> Result<CrawlJob> {
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    // Rejects malformed patterns and unsupported schemes before anything is stored.
    CrawlScope::for_job(url, &include, &exclude)?;

    let name = name.unwrap_or_else(|| parsed.host_str().unwrap_or("unknown").to_string());
    let mut job = CrawlJob::new(
        name,
        url,
        max_pages.unwrap_or(config.crawler.default_max_pages),
    );
    job.include_patterns = include;
    job.exclude_patterns = exclude;
    job.crawl_mode = mode.parse::<CrawlMode>()?;
    job.schedule = schedule;
    Ok(job)
}

async fn cmd_job_add(storage: &Storage, job: &CrawlJob) -> Result<()> {
    storage.insert_job(job).await?;
    info!(job_id = %job.id, base_url = %job.base_url, "job created");

    println!();
    println!("  Job created");
    println!("  ID:        {}", job.id);
    println!("  Name:      {}", job.name);
    println!("  Base URL:  {}", job.base_url);
    println!("  Max pages: {}", job.max_pages);
    println!("  Mode:      {}", job.crawl_mode.as_str());
    println!();
    println!("  Run it with: personamap crawl {}", job.id);
    println!();
    Ok(())
}

async fn cmd_job_list(storage: &Storage) -> Result<()> {
    let jobs = storage.list_jobs().await?;
    if jobs.is_empty() {
        println!("No jobs yet. Create one with `personamap job add <url>`.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<10}  {:>7}  {:>6}  BASE URL",
        "ID", "NAME", "STATUS", "CRAWLED", "MAPPED"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<20}  {:<10}  {:>7}  {:>6}  {}",
            job.id,
            truncate(&job.name, 20),
            job.status.as_str(),
            job.pages_crawled,
            job.pages_mapped,
            job.base_url
        );
    }
    Ok(())
}

async fn cmd_job_show(storage: &Storage, job_id: &JobId) -> Result<()> {
    let job = storage.get_job(job_id).await?;
    let counts = storage.frontier_counts(job_id).await?;
    let personas = storage.personas_for_job(job_id).await?;

    println!();
    println!("  {} ({})", job.name, job.id);
    println!("  Base URL:   {}", job.base_url);
    println!("  Status:     {}", job.status);
    println!("  Mode:       {}", job.crawl_mode.as_str());
    println!("  Max pages:  {}", job.max_pages);
    if !job.include_patterns.is_empty() {
        println!("  Include:    {}", job.include_patterns.join(", "));
    }
    if !job.exclude_patterns.is_empty() {
        println!("  Exclude:    {}", job.exclude_patterns.join(", "));
    }
    if let Some(schedule) = &job.schedule {
        println!("  Schedule:   {schedule}");
    }
    if let Some(at) = job.last_run_at {
        println!("  Last run:   {}", at.to_rfc3339());
    }
    if let Some(err) = &job.error_message {
        println!("  Error:      {err}");
    }
    println!(
        "  Frontier:   {} total, {} crawled, {} pending, {} failed",
        counts.total, counts.crawled, counts.pending, counts.failed
    );
    let titles: Vec<&str> = personas.iter().map(|p| p.title.as_str()).collect();
    println!("  Personas:   {}", if titles.is_empty() { "none".to_string() } else { titles.join(", ") });
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Personas
// ---------------------------------------------------------------------------

/// Shape of a persona definitions file.
#[derive(Debug, Deserialize)]
struct PersonaFile {
    #[serde(default, rename = "persona")]
    personas: Vec<PersonaDefinition>,
}

fn read_persona_file(path: &Path) -> Result<Vec<PersonaDefinition>> {
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let file: PersonaFile =
        toml::from_str(&raw).wrap_err_with(|| format!("invalid persona file {}", path.display()))?;
    if file.personas.is_empty() {
        return Err(eyre!("{} defines no [[persona]] entries", path.display()));
    }
    Ok(file.personas)
}

async fn cmd_personas_sync(storage: &Storage, path: &Path) -> Result<()> {
    let personas = read_persona_file(path)?;
    let (upserted, deactivated) = storage.sync_personas(&personas).await?;
    println!("Synced {upserted} persona(s), deactivated {deactivated} missing from the file");
    Ok(())
}

async fn cmd_personas_list(storage: &Storage, active_only: bool) -> Result<()> {
    let personas = storage.list_personas(active_only).await?;
    if personas.is_empty() {
        println!("No personas. Load some with `personamap personas sync --file <toml>`.");
        return Ok(());
    }
    for p in personas {
        let marker = if p.is_active { "" } else { " (inactive)" };
        println!("{}: {}{marker}", p.id, p.title);
        if !p.keywords.is_empty() {
            println!("    keywords: {}", p.keywords.join(", "));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Crawl & status
// ---------------------------------------------------------------------------

async fn cmd_crawl(storage: Storage, config: AppConfig, job_id: &JobId) -> Result<()> {
    let orchestrator =
        Orchestrator::new(storage, config).with_reporter(Arc::new(CliProgress::new()));

    if !orchestrator.start(job_id).await? {
        return Err(eyre!(
            "job {job_id} is already running (if its process died, run `personamap job reset {job_id}`)"
        ));
    }

    tokio::select! {
        _ = orchestrator.wait(job_id) => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Stopping after the current page...");
            orchestrator.stop(job_id);
            orchestrator.wait(job_id).await;
        }
    }

    print_snapshot(orchestrator.storage(), job_id).await
}

async fn cmd_job_reset(storage: Storage, config: AppConfig, job_id: &JobId) -> Result<()> {
    let orchestrator = Orchestrator::new(storage, config);
    if orchestrator.reset(job_id).await? {
        println!("Reset job {job_id} to inactive");
    } else {
        println!("Job {job_id} is not marked running; nothing to reset");
    }
    Ok(())
}

async fn cmd_status(storage: &Storage, job_id: &JobId) -> Result<()> {
    print_snapshot(storage, job_id).await
}

async fn print_snapshot(storage: &Storage, job_id: &JobId) -> Result<()> {
    let job = storage.get_job(job_id).await?;
    let snapshot = ProgressSnapshot::from(&job);

    println!();
    println!("  {} ({})", job.name, snapshot.job_id);
    println!("  Status:     {}", snapshot.status);
    println!(
        "  Pages:      {} crawled, {} mapped",
        snapshot.pages_crawled, snapshot.pages_mapped
    );
    println!("  Discovered: {}", snapshot.total_discovered_urls);
    println!("  Progress:   {:.1}%", snapshot.progress_percentage);
    if let Some(at) = snapshot.last_activity_at {
        println!("  Activity:   {}", at.to_rfc3339());
    }
    if let Some(err) = &snapshot.error_message {
        println!("  Error:      {err}");
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Mappings & frontier
// ---------------------------------------------------------------------------

async fn cmd_pages(storage: &Storage, job_id: &JobId) -> Result<()> {
    let pages = storage.list_pages(job_id).await?;
    if pages.is_empty() {
        println!("No pages crawled yet.");
        return Ok(());
    }
    for page in pages {
        let status = page
            .status_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {status}  {:>6} words  {}",
            page.id, page.word_count, page.url
        );
        if let Some(err) = &page.processing_error {
            println!("    {err}");
        }
    }
    Ok(())
}

async fn cmd_mappings(
    storage: &Storage,
    page: Option<&str>,
    persona: Option<&str>,
    history: bool,
) -> Result<()> {
    let mappings = match (page, persona) {
        (Some(page_id), _) => {
            let page = storage.get_page_by_id(page_id).await?;
            println!("{}  {}", page.url, page.title.as_deref().unwrap_or("(untitled)"));
            storage.mappings_for_page(page_id, history).await?
        }
        (None, Some(persona_id)) => storage.mappings_for_persona(persona_id, history).await?,
        (None, None) => return Err(eyre!("pass --page or --persona")),
    };

    if mappings.is_empty() {
        println!("No mappings.");
        return Ok(());
    }
    for m in &mappings {
        print_mapping(m);
    }
    Ok(())
}

fn print_mapping(m: &ContentMapping) {
    let mut flags = Vec::new();
    if !m.is_active {
        flags.push("inactive");
    }
    if m.is_verified {
        flags.push("verified");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };

    println!(
        "{}  page={} persona={}  {:.3} ({}) {}{flags}",
        m.id,
        m.page_id,
        m.persona_id,
        m.confidence,
        m.confidence_level().label(),
        m.method.as_str(),
    );
    println!("    {}  {}", m.crawl_timestamp.to_rfc3339(), m.reason);
}

async fn cmd_frontier(storage: &Storage, job_id: &JobId, failed_only: bool) -> Result<()> {
    let counts = storage.frontier_counts(job_id).await?;
    println!(
        "{} total, {} crawled, {} pending, {} failed",
        counts.total, counts.crawled, counts.pending, counts.failed
    );

    for entry in storage.list_urls(job_id).await? {
        if failed_only && !entry.is_failed {
            continue;
        }
        let state = if entry.is_failed {
            "failed"
        } else if entry.is_crawled {
            "crawled"
        } else {
            "pending"
        };
        println!("{state:<8} p{}  {}", entry.priority, entry.url);
        if let Some(err) = &entry.last_error {
            println!("         {} attempt(s): {err}", entry.failed_attempts);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    if config.ai.enabled {
        match validate_api_key(&config) {
            Ok(()) => println!("# {} is set", config.ai.api_key_env),
            Err(e) => println!("# {e}"),
        }
    }
    Ok(())
}

/// Cut `s` to `max` characters, marking the cut with an ellipsis.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_crawl_and_mappings() {
        let cli = Cli::try_parse_from(["personamap", "-v", "crawl", "abc"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(matches!(cli.command, Command::Crawl { job_id } if job_id == "abc"));

        let cli =
            Cli::try_parse_from(["personamap", "mappings", "--persona", "dev", "--history"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Mappings { page: None, persona: Some(_), history: true }
        ));

        let cli = Cli::try_parse_from(["personamap", "job", "reset", "abc"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Job { action: JobAction::Reset { job_id } } if job_id == "abc"
        ));

        assert!(Cli::try_parse_from(["personamap", "mappings"]).is_err());
        assert!(
            Cli::try_parse_from(["personamap", "mappings", "--page", "p", "--persona", "q"]).is_err()
        );
    }

    #[test]
    fn job_add_defaults_and_validation() {
        let config = AppConfig::default();
        let job = build_job(
            &config,
            "https://www.example.com/",
            None,
            vec![],
            vec!["share=*".into()],
            None,
            "overwrite",
            None,
        )
        .unwrap();
        assert_eq!(job.name, "www.example.com");
        assert_eq!(job.max_pages, config.crawler.default_max_pages);
        assert_eq!(job.crawl_mode, CrawlMode::Overwrite);

        assert!(build_job(&config, "not a url", None, vec![], vec![], None, "incremental", None).is_err());
        assert!(build_job(&config, "https://x.com", None, vec![], vec![], None, "weekly", None).is_err());
    }

    #[test]
    fn persona_file_parses() {
        let dir = std::env::temp_dir().join(format!("pm_cli_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("personas.toml");
        std::fs::write(
            &path,
            r#"
[[persona]]
id = "dev"
title = "Developer"
description = "Builds integrations"
keywords = ["api", "sdk"]

[[persona]]
id = "mkt"
title = "Marketer"
"#,
        )
        .unwrap();

        let personas = read_persona_file(&path).unwrap();
        assert_eq!(personas.len(), 2);
        assert_eq!(personas[0].keywords, vec!["api", "sdk"]);
        assert!(personas[1].is_active);
        assert!(personas[1].keywords.is_empty());
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }
}
