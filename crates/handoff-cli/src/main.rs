mod prompt;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use handoff_storage::StagingStore;
use handoff_sync::pipeline::open_store;
use handoff_sync::{
    LinkAnswers, MigrationConfig, MigrationPipeline, MigrationRunSummary, ScriptedResolver,
    StagedRenderer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::prompt::PromptResolver;

#[derive(Debug, Parser)]
#[command(name = "handoff")]
#[command(about = "Migrate on-call teams, rotations and escalation policies to FireHydrant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest, link, normalize and render (the default).
    Run(RunArgs),
    /// Re-render a document from an existing staging store.
    Render(RenderArgs),
    /// Show the link state of every staged team and user.
    Links(StoreArgs),
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// YAML answers for entities without an exact match.
    #[arg(long, env = "HANDOFF_LINKS_FILE")]
    links: Option<PathBuf>,
    #[arg(long, env = "HANDOFF_OUTPUT")]
    output: Option<PathBuf>,
    /// Keep staged data in this SQLite file instead of memory.
    #[arg(long, env = "HANDOFF_STAGING_DB")]
    staging_db: Option<PathBuf>,
    /// Never prompt; unanswered entities follow the links file's `on_unanswered`.
    #[arg(long)]
    non_interactive: bool,
    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long, env = "HANDOFF_OUTPUT", default_value = "./handoff.tf")]
    output: PathBuf,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct StoreArgs {
    #[arg(long, env = "HANDOFF_STAGING_DB")]
    staging_db: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(args).await,
        Commands::Render(args) => render(args).await,
        Commands::Links(args) => links(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = MigrationConfig::from_env();
    if let Some(links) = args.links {
        config.links_file = Some(links);
    }
    if let Some(output) = args.output {
        config.output_path = output;
    }
    if let Some(db) = args.staging_db {
        config.staging_db = Some(db);
    }

    let answers = match &config.links_file {
        Some(path) => LinkAnswers::load(path)?,
        None => LinkAnswers::default(),
    };
    info!(
        provider = %config.provider,
        target = %config.target,
        output = %config.output_path.display(),
        "starting migration run"
    );
    let pipeline = MigrationPipeline::from_config(&config).await?;

    let summary = if args.non_interactive {
        pipeline.run_once(&mut ScriptedResolver::new(answers)).await?
    } else {
        let mut resolver = PromptResolver::new(answers, io::stdin().lock(), io::stderr());
        pipeline.run_once(&mut resolver).await?
    };
    report(&summary, args.json)
}

async fn existing_store(path: &Path) -> Result<StagingStore> {
    ensure!(path.exists(), "staging store {} does not exist", path.display());
    open_store(Some(path))
        .await
        .with_context(|| format!("opening staging store {}", path.display()))
}

async fn render(args: RenderArgs) -> Result<()> {
    let store = existing_store(&args.store.staging_db).await?;
    let summary = StagedRenderer::new(&store, &args.output).run().await?;
    report(&summary, args.json)
}

async fn links(args: StoreArgs) -> Result<()> {
    let store = existing_store(&args.staging_db).await?;

    for team in store.teams().await? {
        let state = match (&team.proxy_for, &team.target) {
            (Some(proxy), _) => format!("folds into {proxy}"),
            (None, Some(target)) => format!("-> {} ({})", target.name, target.id),
            (None, None) => "unlinked".to_string(),
        };
        println!("team  {:<16} {:<32} {state}", team.id, team.name);
    }
    for user in store.users().await? {
        let state = match &user.target {
            Some(target) => format!("-> {} ({})", target.email, target.id),
            None => "unlinked".to_string(),
        };
        println!("user  {:<16} {:<32} {state}", user.id, user.email);
    }

    let stats = store.stats().await?;
    println!(
        "linked {}/{} teams ({} proxied), {}/{} users",
        stats.linked_teams, stats.teams, stats.proxied_teams, stats.linked_users, stats.users
    );
    Ok(())
}

fn report(summary: &MigrationRunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    for warning in &summary.warnings {
        println!("warning: {warning}");
    }
    println!(
        "migration complete: run_id={} users={} teams={} rotations={} policies={} warnings={}",
        summary.run_id,
        summary.rendered.users,
        summary.rendered.teams,
        summary.rendered.rotations,
        summary.rendered.escalation_policies,
        summary.warnings.len()
    );
    println!(
        "wrote {} sha256={}{}",
        summary.document.path.display(),
        summary.document.sha256,
        if summary.document.unchanged { " (unchanged)" } else { "" }
    );
    Ok(())
}
