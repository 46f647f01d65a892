//! Command-line front end for the guild archive.
//!
//! Every subcommand prints JSON on stdout; logs go to stderr.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use guild_archive_core::claims::{list_pending_claims, submit_claim};
use guild_archive_core::merges::list_merges;
use guild_archive_core::query::{
    archive_stats, leaderboard, search_users, user_messages, user_profile, user_report, user_threads, MessageSort,
};
use guild_archive_core::visitors::{list_visitors, profile_views, record_profile_view, record_visit};
use guild_archive_core::wordfreq::word_cloud;
use guild_archive_core::{import_export_with_progress, open_archive, AnalyticsEngine, ArchiveDb, Config, ImportOptions};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "guild-archive", version, about = "Guild forum archive: import and analytics")]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Overrides `archive.path`
    #[arg(long)]
    archive: Option<PathBuf>,
    /// Overrides `archive.snapshot_path`
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the archive from an export document
    Import {
        file: PathBuf,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        guild_id: Option<String>,
    },
    /// Count new messages and refresh cached aggregates
    Refresh,
    /// Print the cached homepage bundle
    Homepage,
    /// Row counts per table
    Stats,
    /// Ids aggregated for a user
    Resolve { user_id: String },
    /// Attribute `target` to `parent`
    Merge { target: String, parent: String },
    Unmerge { target: String },
    /// List merge edges
    Merges,
    Leaderboard {
        #[arg(long, default_value_t = 1)]
        page: i64,
    },
    Search { query: String },
    Profile {
        user_id: String,
        #[arg(long, default_value = "hot")]
        sort: String,
        #[arg(long, default_value_t = 1)]
        page: i64,
        /// Records a profile view by this account
        #[arg(long)]
        viewer: Option<String>,
        #[arg(long, requires = "viewer")]
        viewer_name: Option<String>,
        #[arg(long, requires = "viewer")]
        viewer_avatar: Option<String>,
    },
    Report { user_id: String },
    /// Word cloud of a plain text file, one message per line
    Wordcloud {
        file: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Ask for `target` to be merged into `requester`
    Claim { requester: String, target: String },
    /// Pending claims
    Claims,
    Approve { claim_id: i64 },
    /// Delete all claims and merges
    ResetClaims,
    /// Record a site visit, then list visitors
    Visit {
        user_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Site visitors, most recent first
    Visitors,
    /// Who viewed a profile
    Views { user_id: String },
}

const LEADERBOARD_PAGE: i64 = 50;

struct AppState {
    config: Config,
    engine: Mutex<AnalyticsEngine>,
}

impl AppState {
    fn with_engine<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut AnalyticsEngine, &mut ArchiveDb) -> Result<T>,
    {
        let mut engine = self.engine.lock().map_err(|_| anyhow!("engine lock poisoned"))?;
        let mut db = open_archive(&self.config.archive.path)?;
        f(&mut *engine, &mut db)
    }

    fn offset_hours(&self) -> i64 {
        self.config.analytics.local_offset_hours
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Row offset of a 1-based page; pages below 1 read as the first.
fn page_offset(page: i64, per_page: i64) -> Result<i64> {
    page.max(1)
        .checked_sub(1)
        .and_then(|index| index.checked_mul(per_page))
        .ok_or_else(|| anyhow!("page {page} is out of range"))
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(path) = &cli.archive {
        config.archive.path = path.clone();
    }
    if let Some(path) = &cli.snapshot {
        config.archive.snapshot_path = path.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&cli)?;
    info!(archive = %config.archive.path.display(), "using archive");
    let state = AppState {
        engine: Mutex::new(AnalyticsEngine::from_config(&config)),
        config,
    };
    run(&state, cli.command)
}

fn run(state: &AppState, command: Command) -> Result<()> {
    match command {
        Command::Import {
            file,
            batch_size,
            guild_id,
        } => {
            let mut options = ImportOptions::from(&state.config.import);
            if let Some(batch_size) = batch_size {
                options.batch_size = batch_size;
            }
            options.guild_id = guild_id;
            let report = import_export_with_progress(&file, &state.config.archive.path, &options, |msg| info!("{msg}"))?;
            print_json(&report)
        }
        Command::Refresh => state.with_engine(|engine, _| {
            let report = engine.load_or_compute()?;
            print_json(&report)
        }),
        Command::Homepage => state.with_engine(|engine, _| {
            engine.load_or_compute()?;
            print_json(engine.homepage())
        }),
        Command::Stats => state.with_engine(|_, db| print_json(&archive_stats(&db.conn)?)),
        Command::Resolve { user_id } => state.with_engine(|engine, _| {
            engine.load_or_compute()?;
            print_json(&serde_json::json!({
                "user_id": user_id,
                "canonical_parent": engine.canonical_parent(&user_id),
                "ids": engine.resolve_identity(&user_id),
            }))
        }),
        Command::Merge { target, parent } => state.with_engine(|engine, db| {
            engine.load_or_compute()?;
            engine.merge_accounts(&mut db.conn, &target, &parent)?;
            engine.homepage_or_refresh()?;
            engine.save()?;
            print_json(&list_merges(&db.conn)?)
        }),
        Command::Unmerge { target } => state.with_engine(|engine, db| {
            engine.load_or_compute()?;
            let removed = engine.unmerge(&db.conn, &target)?;
            engine.homepage_or_refresh()?;
            engine.save()?;
            print_json(&serde_json::json!({ "target_id": target, "removed": removed }))
        }),
        Command::Merges => state.with_engine(|_, db| print_json(&list_merges(&db.conn)?)),
        Command::Leaderboard { page } => state.with_engine(|engine, db| {
            let offset = page_offset(page, LEADERBOARD_PAGE)?;
            engine.load_or_compute()?;
            print_json(&leaderboard(
                &db.conn,
                engine.merges(),
                engine.transitive_merges(),
                LEADERBOARD_PAGE,
                offset,
            )?)
        }),
        Command::Search { query } => state.with_engine(|_, db| print_json(&search_users(&db.conn, &query)?)),
        Command::Profile {
            user_id,
            sort,
            page,
            viewer,
            viewer_name,
            viewer_avatar,
        } => state.with_engine(|engine, db| {
            let per_page = state.config.analytics.items_per_page;
            let offset = page_offset(page, per_page)?;
            let sort: MessageSort = sort.parse()?;
            engine.load_or_compute()?;
            // A merged account shows its owner's profile.
            let user_id = engine.profile_owner(&user_id).to_string();
            let ids = engine.resolve_identity(&user_id);
            let profile = user_profile(&db.conn, &ids, &user_id, state.offset_hours())?;
            if let Some(viewer) = &viewer {
                record_profile_view(&db.conn, &user_id, viewer, viewer_name.as_deref(), viewer_avatar.as_deref())?;
            }
            print_json(&serde_json::json!({
                "profile": profile,
                "views": profile_views(&db.conn, &user_id)?,
                "messages": user_messages(&db.conn, &ids, sort, per_page, offset)?,
                "threads": user_threads(&db.conn, &ids, per_page, offset)?,
            }))
        }),
        Command::Report { user_id } => state.with_engine(|engine, db| {
            engine.load_or_compute()?;
            let ids = engine.resolve_identity(&user_id);
            print_json(&user_report(&db.conn, &ids, &user_id, state.offset_hours())?)
        }),
        Command::Wordcloud { file, limit } => {
            let text = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            print_json(&word_cloud(text.lines(), limit))
        }
        Command::Claim { requester, target } => state.with_engine(|_, db| {
            let id = submit_claim(&db.conn, &requester, &target)?;
            print_json(&serde_json::json!({ "claim_id": id }))
        }),
        Command::Claims => state.with_engine(|_, db| print_json(&list_pending_claims(&db.conn)?)),
        Command::Approve { claim_id } => state.with_engine(|engine, db| {
            engine.load_or_compute()?;
            let claim = engine.approve_claim(&mut db.conn, claim_id)?;
            engine.homepage_or_refresh()?;
            engine.save()?;
            print_json(&claim)
        }),
        Command::ResetClaims => state.with_engine(|engine, db| {
            engine.load_or_compute()?;
            let (claims, merges) = engine.reset_all_claims(&mut db.conn)?;
            engine.homepage_or_refresh()?;
            engine.save()?;
            print_json(&serde_json::json!({ "claims": claims, "merges": merges }))
        }),
        Command::Visit { user_id, name, avatar } => state.with_engine(|_, db| {
            record_visit(&db.conn, &user_id, name.as_deref(), avatar.as_deref())?;
            print_json(&list_visitors(&db.conn)?)
        }),
        Command::Visitors => state.with_engine(|_, db| print_json(&list_visitors(&db.conn)?)),
        Command::Views { user_id } => state.with_engine(|_, db| print_json(&profile_views(&db.conn, &user_id)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offsets_start_at_zero() {
        assert_eq!(page_offset(1, 50).expect("first"), 0);
        assert_eq!(page_offset(0, 50).expect("clamped"), 0);
        assert_eq!(page_offset(-7, 50).expect("clamped"), 0);
        assert_eq!(page_offset(3, 20).expect("third"), 40);
    }

    #[test]
    fn huge_pages_are_rejected() {
        assert!(page_offset(i64::MAX, LEADERBOARD_PAGE).is_err());
        assert!(page_offset(i64::MAX / 2, 3).is_err());
        assert_eq!(page_offset(i64::MAX, 1).expect("fits"), i64::MAX - 1);
    }

    #[test]
    fn visitor_and_view_subcommands_parse() {
        let cli = Cli::try_parse_from(["guild-archive", "visit", "7", "--name", "seven"]).expect("visit");
        assert!(matches!(cli.command, Command::Visit { ref user_id, .. } if user_id == "7"));
        let cli = Cli::try_parse_from(["guild-archive", "profile", "9", "--viewer", "7"]).expect("profile");
        assert!(matches!(cli.command, Command::Profile { viewer: Some(ref v), .. } if v == "7"));
        assert!(Cli::try_parse_from(["guild-archive", "profile", "9", "--viewer-name", "x"]).is_err());
    }
}
