//! Keepsake - companion memory store CLI
//!
//! The `keepsake` command admits, queries, and curates memories, manages
//! snapshots, and drives the confirmation gate for destructive actions.
//!
//! ## Commands
//!
//! - `admit` / `get` / `query` / `tag` / `delete`: entry operations
//! - `tags` / `stats` / `tier`: index inspection and maintenance
//! - `snapshot` / `snapshots` / `restore` / `forget-snapshot`: backups
//! - `reset` / `clear-history` / `export`: gated actions

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

use keepsake_core::{
    ActionKind, ActionRequest, Content, EntryDraft, GatePayload, GateReport, GateState,
    KeepsakeConfig, MemoryEntry, MemoryError, MemoryId, MemoryKind, MemoryQuery, MemorySystem,
    SnapshotId, SnapshotReason, TrustLevel,
};

#[derive(Parser)]
#[command(name = "keepsake")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tag-indexed memory store for a conversational companion", long_about = None)]
struct Cli {
    /// Config file (default: ./keepsake.toml if present)
    #[arg(short, long, global = true, env = "KEEPSAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Answers for the confirmation gate, for scripted use.
#[derive(Args, Debug, Clone, Default)]
struct GateArgs {
    /// Acknowledge the warning without prompting
    #[arg(long)]
    ack: bool,

    /// Confirmation token to submit without prompting
    #[arg(long)]
    token: Option<String>,

    /// Skip the final review prompt
    #[arg(short, long)]
    yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a candidate memory
    Admit {
        /// Memory text, or a JSON document with --structured
        content: String,

        /// Tag path such as emotion:joy (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Importance in [0, 1]
        #[arg(short, long, default_value = "0.5")]
        importance: f64,

        /// Trust level: low, medium, high_lock
        #[arg(long, default_value = "low")]
        trust: TrustLevel,

        /// Kind: fact, conversation, preference, experience
        #[arg(short, long, default_value = "fact")]
        kind: MemoryKind,

        /// Parse content as JSON
        #[arg(long)]
        structured: bool,
    },

    /// Show one memory
    Get {
        id: MemoryId,
    },

    /// Search memories
    Query {
        /// Tag path; matches entries tagged there or below
        #[arg(short, long)]
        tag: Option<String>,

        /// Case-insensitive text filter
        #[arg(long)]
        text: Option<String>,

        /// Restrict to one kind
        #[arg(short, long)]
        kind: Option<MemoryKind>,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Additional tag paths; with --all an entry must match every path
        #[arg(long = "also")]
        also: Vec<String>,

        /// Intersect tag paths instead of uniting them
        #[arg(long)]
        all: bool,
    },

    /// Add tags to an existing memory
    Tag {
        id: MemoryId,

        /// Tag paths to add
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Delete memories. Several ids, or a locked one, go through the confirmation gate.
    Delete {
        #[arg(required = true)]
        ids: Vec<MemoryId>,

        /// Also delete high_lock memories
        #[arg(long)]
        include_locked: bool,

        #[command(flatten)]
        gate: GateArgs,
    },

    /// List tags, find similar ones, or show usage
    Tags {
        /// Show tags resembling this fragment
        #[arg(long)]
        similar: Option<String>,

        /// Show the N most used tags with counts
        #[arg(long)]
        top: Option<usize>,
    },

    /// Store statistics
    Stats,

    /// Run a tiering pass now
    Tier,

    /// Take a snapshot now
    Snapshot {
        /// Take an emergency snapshot (uncompressed, never rotated)
        #[arg(long)]
        emergency: bool,
    },

    /// List snapshots, oldest first
    Snapshots,

    /// Replace the store with a snapshot
    Restore {
        id: SnapshotId,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete one snapshot file
    ForgetSnapshot {
        id: SnapshotId,
    },

    /// Erase every memory
    Reset {
        /// Also erase high_lock memories
        #[arg(long)]
        include_locked: bool,

        #[command(flatten)]
        gate: GateArgs,
    },

    /// Erase conversation memories
    ClearHistory {
        /// Also erase high_lock conversation memories
        #[arg(long)]
        include_locked: bool,

        #[command(flatten)]
        gate: GateArgs,
    },

    /// Write every memory to a JSON file
    Export {
        output: PathBuf,

        #[command(flatten)]
        gate: GateArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    keepsake_core::init_tracing(cli.json, level);

    let config = KeepsakeConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let system = MemorySystem::open(config).context("Failed to open memory store")?;

    let stdin = io::stdin();
    let mut input = stdin.lock();

    let result = match cli.command {
        Commands::Admit {
            content,
            tags,
            importance,
            trust,
            kind,
            structured,
        } => cmd_admit(&system, &content, tags, importance, trust, kind, structured),
        Commands::Get { id } => cmd_get(&system, &id),
        Commands::Query {
            tag,
            text,
            kind,
            limit,
            also,
            all,
        } => cmd_query(&system, tag, text, kind, limit, &also, all),
        Commands::Tag { id, tags } => cmd_tag(&system, &id, &tags),
        Commands::Delete {
            ids,
            include_locked,
            gate,
        } => cmd_delete(&system, ids, include_locked, &gate, &mut input),
        Commands::Tags { similar, top } => cmd_tags(&system, similar.as_deref(), top),
        Commands::Stats => cmd_stats(&system),
        Commands::Tier => cmd_tier(&system),
        Commands::Snapshot { emergency } => cmd_snapshot(&system, emergency),
        Commands::Snapshots => cmd_snapshots(&system),
        Commands::Restore { id, yes } => cmd_restore(&system, &id, yes, &mut input),
        Commands::ForgetSnapshot { id } => cmd_forget_snapshot(&system, &id),
        Commands::Reset {
            include_locked,
            gate,
        } => cmd_gated(
            &system,
            ActionRequest::FullReset,
            include_locked,
            &gate,
            &mut input,
        ),
        Commands::ClearHistory {
            include_locked,
            gate,
        } => cmd_gated(
            &system,
            ActionRequest::ClearHistory,
            include_locked,
            &gate,
            &mut input,
        ),
        Commands::Export { output, gate } => cmd_gated(
            &system,
            ActionRequest::Export(output),
            false,
            &gate,
            &mut input,
        ),
    };

    system
        .store()
        .flush()
        .context("Failed to persist access bookkeeping")?;
    result
}

fn preview(content: &Content, max_len: usize) -> String {
    let text = match content {
        Content::Text(t) => t.clone(),
        Content::Structured(v) => v.to_string(),
    };
    if text.chars().count() <= max_len {
        text
    } else {
        let cut: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn print_entry_line(entry: &MemoryEntry) {
    let tags: Vec<String> = entry.tags.iter().map(ToString::to_string).collect();
    println!(
        "{}  {:<5} {:.2}  {:<50}  [{}]",
        entry.id,
        entry.tier.to_string(),
        entry.importance,
        preview(&entry.content, 50),
        tags.join(", ")
    );
}

/// Submit a candidate memory
fn cmd_admit(
    system: &MemorySystem,
    content: &str,
    tags: Vec<String>,
    importance: f64,
    trust: TrustLevel,
    kind: MemoryKind,
    structured: bool,
) -> Result<()> {
    let content = if structured {
        Content::Structured(
            serde_json::from_str(content).context("Content is not valid JSON")?,
        )
    } else {
        Content::Text(content.to_string())
    };
    let draft = EntryDraft::new(content)
        .with_tags(tags)
        .with_importance(importance)
        .with_trust(trust)
        .with_kind(kind);

    let entry = system.store().admit(draft).context("Memory not admitted")?;
    info!(id = %entry.id, "memory admitted");
    println!("Admitted {}", entry.id);
    Ok(())
}

/// Show one memory as JSON
fn cmd_get(system: &MemorySystem, id: &MemoryId) -> Result<()> {
    let entry = system
        .store()
        .get(id)
        .with_context(|| format!("Memory not found: {id}"))?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

/// Search memories
fn cmd_query(
    system: &MemorySystem,
    tag: Option<String>,
    text: Option<String>,
    kind: Option<MemoryKind>,
    limit: usize,
    also: &[String],
    all: bool,
) -> Result<()> {
    let hits = if also.is_empty() {
        let mut query = MemoryQuery::new().with_limit(limit);
        if let Some(tag) = tag {
            query = MemoryQuery::tagged(&tag)?.with_limit(limit);
        }
        if let Some(text) = text {
            query = query.with_text(text);
        }
        if let Some(kind) = kind {
            query = query.with_kind(kind);
        }
        system.store().query(&query)?
    } else {
        if text.is_some() || kind.is_some() {
            bail!("--text and --kind cannot be combined with --also");
        }
        let paths: Vec<String> = tag.into_iter().chain(also.iter().cloned()).collect();
        system.store().query_by_tags(&paths, all, limit)?
    };

    if hits.is_empty() {
        println!("No memories found.");
        return Ok(());
    }
    for entry in &hits {
        print_entry_line(entry);
    }
    Ok(())
}

/// Add tags to an existing memory
fn cmd_tag(system: &MemorySystem, id: &MemoryId, tags: &[String]) -> Result<()> {
    let entry = system
        .store()
        .add_tags(id, tags)
        .with_context(|| format!("Failed to tag {id}"))?;
    let rendered: Vec<String> = entry.tags.iter().map(ToString::to_string).collect();
    println!("{} now tagged [{}]", entry.id, rendered.join(", "));
    Ok(())
}

/// Delete one unlocked memory directly; locked or multiple ids go through
/// the gate
fn cmd_delete<R: BufRead>(
    system: &MemorySystem,
    ids: Vec<MemoryId>,
    include_locked: bool,
    gate: &GateArgs,
    input: &mut R,
) -> Result<()> {
    if let [id] = ids.as_slice() {
        match system.store().delete(id) {
            Ok(()) => {
                println!("Deleted {id}");
                return Ok(());
            }
            Err(MemoryError::Locked { .. }) if include_locked => {}
            Err(err @ MemoryError::Locked { .. }) => {
                return Err(err).context("Pass --include-locked to remove it through the gate");
            }
            Err(err) => return Err(err).with_context(|| format!("Failed to delete {id}")),
        }
    }
    cmd_gated(
        system,
        ActionRequest::Delete(ids),
        include_locked,
        gate,
        input,
    )
}

/// List tags, find similar ones, or show usage
fn cmd_tags(system: &MemorySystem, similar: Option<&str>, top: Option<usize>) -> Result<()> {
    let store = system.store();
    if let Some(fragment) = similar {
        let found = store.similar_tags(fragment, 20);
        if found.is_empty() {
            println!("No tags resemble '{fragment}'.");
        }
        for path in found {
            println!("{path}");
        }
        return Ok(());
    }
    if let Some(n) = top {
        let stats = store.tag_stats(n);
        println!(
            "{} tags across {} memories",
            stats.total_tags, stats.tagged_memories
        );
        for (path, count) in stats.popular {
            println!("{count:>6}  {path}");
        }
        return Ok(());
    }
    let tags = store.all_tags();
    if tags.is_empty() {
        println!("No tags yet.");
    }
    for path in tags {
        println!("{path}");
    }
    Ok(())
}

/// Store statistics
fn cmd_stats(system: &MemorySystem) -> Result<()> {
    let stats = system.store().stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Run a tiering pass now
fn cmd_tier(system: &MemorySystem) -> Result<()> {
    let report = system.run_tiering(Utc::now());
    println!(
        "Examined {}, warmed {}, cooled {}, archived {}, failed {}",
        report.examined, report.warmed, report.cooled, report.archived, report.failed
    );
    if report.failed > 0 {
        bail!("{} entries could not be migrated", report.failed);
    }
    Ok(())
}

/// Take a snapshot now
fn cmd_snapshot(system: &MemorySystem, emergency: bool) -> Result<()> {
    let reason = if emergency {
        SnapshotReason::Emergency
    } else {
        SnapshotReason::Scheduled
    };
    let meta = system
        .snapshots()
        .take(reason)
        .context("Snapshot failed")?;
    println!("Snapshot {} ({} memories)", meta.id, meta.entry_count);
    Ok(())
}

/// List snapshots, oldest first
fn cmd_snapshots(system: &MemorySystem) -> Result<()> {
    let list = system.snapshots().list()?;
    if list.is_empty() {
        println!(
            "No snapshots in {}",
            system.snapshots().dir().display()
        );
        return Ok(());
    }
    for info in list {
        println!(
            "{}  {:<9}  {}  {} bytes",
            info.id,
            info.reason.to_string(),
            info.taken_at.format("%Y-%m-%d %H:%M:%S UTC"),
            info.size_bytes
        );
    }
    Ok(())
}

/// Replace the store with a snapshot
fn cmd_restore<R: BufRead>(
    system: &MemorySystem,
    id: &SnapshotId,
    yes: bool,
    input: &mut R,
) -> Result<()> {
    if !yes
        && !prompt_yes(
            input,
            &format!("Replace every memory with the contents of {id}?"),
        )?
    {
        println!("Restore cancelled.");
        return Ok(());
    }
    let report = system
        .snapshots()
        .restore(id)
        .with_context(|| format!("Failed to restore {id}"))?;
    println!(
        "Restored {} memories from {} (previous contents saved as {})",
        report.entries, report.restored, report.safety
    );
    Ok(())
}

/// Delete one snapshot file
fn cmd_forget_snapshot(system: &MemorySystem, id: &SnapshotId) -> Result<()> {
    system
        .snapshots()
        .remove(id)
        .with_context(|| format!("Failed to remove snapshot {id}"))?;
    println!("Removed snapshot {id}");
    Ok(())
}

fn prompt_line<R: BufRead>(input: &mut R, prompt: &str) -> Result<String> {
    print!("{prompt} ");
    io::stdout().flush()?;
    let mut line = String::new();
    input.read_line(&mut line).context("Failed to read answer")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn prompt_yes<R: BufRead>(input: &mut R, prompt: &str) -> Result<bool> {
    let answer = prompt_line(input, &format!("{prompt} [y/N]"))?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn describe(kind: ActionKind, include_locked: bool) -> String {
    let locked = if include_locked {
        "including high_lock memories"
    } else {
        "high_lock memories are kept"
    };
    match kind {
        ActionKind::FullReset => format!("This erases every memory ({locked})."),
        ActionKind::ClearHistory => format!("This erases all conversation memories ({locked})."),
        ActionKind::DeleteEntries => format!("This deletes the listed memories ({locked})."),
        ActionKind::Export => "This writes every memory to a file.".to_string(),
    }
}

/// Walk the confirmation gate for `request`. Returns `None` if the operator
/// declined at any step.
fn run_gate<R: BufRead>(
    system: &MemorySystem,
    request: ActionRequest,
    include_locked: bool,
    args: &GateArgs,
    input: &mut R,
) -> Result<Option<GateReport>> {
    let mut gate = system.gate();
    let mut state = gate.start(system.action(request), include_locked)?;
    let kind = gate.kind().context("Gate started without an action")?;

    if state == GateState::Step1Acknowledged {
        println!("{}", describe(kind, include_locked));
        println!("A backup is taken before anything is removed.");
        let ack = args.ack || prompt_yes(input, "Do you understand and want to continue?")?;
        if !ack {
            gate.cancel()?;
            println!("Cancelled.");
            return Ok(None);
        }
        state = gate.advance(GatePayload::Acknowledge(true))?;
    }

    if state == GateState::Step2TokenVerified {
        let expected = kind.token().unwrap_or_default();
        let typed = match &args.token {
            Some(token) => token.clone(),
            None => prompt_line(input, &format!("Type {expected} to continue:"))?,
        };
        if let Err(err) = gate.advance(GatePayload::Token(typed)) {
            gate.cancel()?;
            return Err(err).context("Confirmation refused; nothing was changed");
        }
    }

    let go = args.yes || prompt_yes(input, &format!("Run {kind} now?"))?;
    if !go {
        gate.cancel()?;
        println!("Cancelled.");
        return Ok(None);
    }
    let report = gate.confirm().with_context(|| format!("{kind} did not run"))?;
    Ok(Some(report))
}

fn cmd_gated<R: BufRead>(
    system: &MemorySystem,
    request: ActionRequest,
    include_locked: bool,
    args: &GateArgs,
    input: &mut R,
) -> Result<()> {
    let Some(report) = run_gate(system, request, include_locked, args, input)? else {
        return Ok(());
    };
    if let Some(snapshot) = &report.snapshot {
        println!("Backup: {snapshot}");
    }
    match (&report.outcome.output, report.outcome.retained_locked) {
        (Some(path), _) => println!(
            "Wrote {} memories to {}",
            report.outcome.affected,
            path.display()
        ),
        (None, 0) => println!("{}: {} memories removed", report.kind, report.outcome.affected),
        (None, kept) => println!(
            "{}: {} memories removed, {} locked memories kept",
            report.kind, report.outcome.affected, kept
        ),
    }
    Ok(())
}
