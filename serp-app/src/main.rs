use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serp_common::Status;
use serp_common::observability::{LogConfig, LogFormat, init_logging};
use serp_config::{SerpConfig, SerpConfigLoader};
use serp_cse::{CredentialKind, KindStatus};
use serp_runtime::SerpRuntime;
use serp_scrape::{ScrapeError, SearchConfig, normalize_all, plan_batch};
use tether::Tether;

mod keywords;
mod output;
mod tether;

const DEFAULT_CONFIG_FILE: &str = "serp.yaml";
const DEFAULT_PROFILE_SITE: &str = "site:linkedin.com/in";

#[derive(Parser)]
#[command(name = "serp")]
#[command(about = "Bulk search-results harvester for the Google Custom Search API")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./serp.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape results for a keyword file and export them
    Scrape(ScrapeArgs),

    /// Show today's request budget
    Usage,

    /// Inspect or change stored credentials
    Credentials {
        #[command(subcommand)]
        command: CredentialCommands,
    },
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Show active credentials (masked) and backup state
    Status,
    /// Store a primary credential (kind: api_key | cx)
    SetPrimary { kind: String, value: String },
    /// Store a backup credential used once the primary runs out of quota
    SetBackup { kind: String, value: String },
    /// Remove stored primaries and backups
    Clear,
}

#[derive(Args, Debug)]
struct ScrapeArgs {
    /// Keyword file: text (one per line) or JSON
    #[arg(short, long)]
    keywords: PathBuf,

    /// Output file: .json (unified items), .jsonl or .csv (organic rows)
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long)]
    max_pages: Option<u32>,

    #[arg(long)]
    results_per_page: Option<u32>,

    /// Drop organic results (leaves nothing the backend can serve)
    #[arg(long)]
    no_organic: bool,

    #[arg(long)]
    include_paa: bool,

    #[arg(long)]
    include_related: bool,

    #[arg(long)]
    include_ads: bool,

    #[arg(long)]
    include_ai_overview: bool,

    /// `site:` scope, repeatable (default: site:linkedin.com/in)
    #[arg(long = "profile-site")]
    profile_sites: Vec<String>,

    #[arg(long)]
    allow_duplicates: bool,

    #[arg(long)]
    split_long_queries: bool,

    /// Skip the response cache for this run
    #[arg(long)]
    no_cache: bool,
}

impl ScrapeArgs {
    fn search_config(&self, cfg: &SerpConfig) -> SearchConfig {
        let mut search = SearchConfig::from(&cfg.search);
        if let Some(pages) = self.max_pages {
            search.max_pages = pages;
        }
        if let Some(rpp) = self.results_per_page {
            search.results_per_page = rpp;
        }
        search.include_organic &= !self.no_organic;
        search.include_paa |= self.include_paa;
        search.include_related |= self.include_related;
        search.include_ads |= self.include_ads;
        search.include_ai_overview |= self.include_ai_overview;
        search.allow_duplicates |= self.allow_duplicates;
        search.split_long_queries |= self.split_long_queries;
        if !self.profile_sites.is_empty() {
            search.profile_sites = self.profile_sites.clone();
        }
        if search.profile_sites.is_empty() {
            search.profile_sites = vec![DEFAULT_PROFILE_SITE.to_string()];
        }
        search
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) Load config (env wins)
    let loader = match &cli.config {
        Some(path) => SerpConfigLoader::new().with_file(path),
        None => SerpConfigLoader::new().with_optional_file(DEFAULT_CONFIG_FILE),
    };
    let cfg = loader.load()?;

    // 2) Logging from the `logging` section
    init_logging(LogConfig {
        app_name: "serp",
        log_dir: cfg.logging.dir.clone(),
        emit_stderr: cfg.logging.stderr,
        format: LogFormat::from_name(&cfg.logging.format),
        default_filter: cfg.logging.level.clone(),
    })?;

    let runtime = SerpRuntime::build("serp-worker", None)?;
    let result = match cli.command {
        Commands::Scrape(args) => runtime.block_on(run_scrape(&runtime, &cfg, args)),
        Commands::Usage => run_usage(&cfg),
        Commands::Credentials { command } => run_credentials(&cfg, command),
    };
    runtime.shutdown(Duration::from_secs(2));
    result
}

async fn run_scrape(runtime: &SerpRuntime, cfg: &SerpConfig, args: ScrapeArgs) -> Result<()> {
    let search = args.search_config(cfg);
    search.validate()?;

    let inputs = keywords::read_keywords(&args.keywords)?;
    let plan = plan_batch(&inputs, &search);
    output::append_query_log(&cfg.queries_log_path(), &plan.log)?;
    tracing::info!(
        action = "scrape_plan",
        status = %Status::Started,
        inputs = inputs.len(),
        keywords = plan.keywords.len(),
        duplicates = plan.skipped_duplicates.len(),
        "batch planned"
    );

    let mut tether = Tether::from_config(cfg);
    if args.no_cache {
        tether.disable_cache();
    }
    let handle = runtime.handle();
    let ctrl_c = handle.cancel_on_ctrl_c();
    let scraper = tether.scraper(handle.cancellation())?;
    if !tether.client()?.is_configured() {
        bail!("Google CSE is not configured: set google.api_key and google.cx (or GOOGLE_API_KEY / GOOGLE_CSE_CX)");
    }

    let report = scraper.scrape_many(&plan.keywords, &search).await;
    ctrl_c.abort();

    let unified = normalize_all(&report.items);
    let written = output::write_results(&args.output, &unified, Utc::now())?;

    let failed: Vec<&str> = report.failed_keywords().map(|k| k.keyword.as_str()).collect();
    println!("Keywords processed: {}", report.keywords.len());
    println!("Skipped duplicates: {}", plan.skipped_duplicates.len());
    println!("Failed keywords:    {}", failed.len());
    for keyword in &failed {
        println!("  - {keyword}");
    }
    println!("Total results:      {}", report.items.len());
    println!("Rows written:       {written}");
    println!("Output:             {}", args.output.display());
    if report.cancelled {
        println!("Interrupted: remaining keywords were not processed.");
    }

    match report.halted {
        Some(err @ ScrapeError::Quota(_)) => {
            let snapshot = tether.usage.snapshot();
            Err(anyhow!(err).context(format!(
                "batch stopped early (usage today {}/{})",
                snapshot.used, snapshot.quota
            )))
        }
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn run_usage(cfg: &SerpConfig) -> Result<()> {
    let tether = Tether::from_config(cfg);
    let snapshot = tether.usage.snapshot();
    println!("Date:      {}", snapshot.date);
    println!("Used:      {}", snapshot.used);
    println!("Quota:     {}", snapshot.quota);
    println!("Remaining: {}", snapshot.remaining());
    println!("File:      {}", tether.usage.path().display());
    Ok(())
}

fn run_credentials(cfg: &SerpConfig, command: CredentialCommands) -> Result<()> {
    let tether = Tether::from_config(cfg);
    let credentials = &tether.credentials;
    let parse_kind = |kind: &str| {
        CredentialKind::parse(kind).ok_or_else(|| anyhow!("unknown credential kind '{kind}' (use api_key or cx)"))
    };

    match command {
        CredentialCommands::Status => {
            let status = credentials.status();
            print_kind("API key", &status.api_key);
            print_kind("Engine id", &status.engine_id);
        }
        CredentialCommands::SetPrimary { kind, value } => {
            let message = credentials.set_primary(parse_kind(&kind)?, &value)?;
            println!("{message}");
        }
        CredentialCommands::SetBackup { kind, value } => {
            let message = credentials.set_backup(parse_kind(&kind)?, &value)?;
            println!("{message}");
        }
        CredentialCommands::Clear => {
            credentials.clear_store();
            println!("Stored credentials cleared.");
        }
    }
    Ok(())
}

fn print_kind(label: &str, status: &KindStatus) {
    let active = status.active.as_deref().unwrap_or("(not set)");
    let source = status
        .source
        .map(|s| format!("{s:?}").to_lowercase())
        .unwrap_or_else(|| "-".into());
    println!("{label}: {active} [source: {source}]");
    println!(
        "  backup: {}",
        match (status.has_backup, status.backup_exhausted) {
            (false, _) => "none",
            (true, false) => "available",
            (true, true) => "exhausted",
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ScrapeArgs {
        let mut argv = vec!["serp", "scrape", "-k", "kw.txt", "-o", "out.csv"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Commands::Scrape(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn default_profile_site_applies_when_none_configured() {
        let search = parse(&[]).search_config(&SerpConfig::default());
        assert_eq!(search.profile_sites, vec![DEFAULT_PROFILE_SITE]);
        assert!(search.organic_only());
    }

    #[test]
    fn flags_override_config() {
        let mut cfg = SerpConfig::default();
        cfg.search.profile_sites = vec!["site:example.com".into()];
        let search = parse(&[
            "--max-pages",
            "3",
            "--profile-site",
            "site:github.com",
            "--profile-site",
            "site:gitlab.com",
            "--include-ads",
            "--split-long-queries",
        ])
        .search_config(&cfg);
        assert_eq!(search.max_pages, 3);
        assert_eq!(search.profile_sites, vec!["site:github.com", "site:gitlab.com"]);
        assert!(search.include_ads);
        assert!(!search.organic_only());
        assert!(search.split_long_queries);
    }

    #[test]
    fn configured_sites_kept_without_flags() {
        let mut cfg = SerpConfig::default();
        cfg.search.profile_sites = vec!["site:example.com".into()];
        assert_eq!(
            parse(&[]).search_config(&cfg).profile_sites,
            vec!["site:example.com"]
        );
    }
}
