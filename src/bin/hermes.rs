//! hermes CLI: operator interface to the labor tracker.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use hermes::config::Config;
use hermes::db::Db;
use hermes::model::{
    EmbarkMode, EventFilter, EventType, EventTypeFilter, EventTypeId, FateId, LaborFilter,
    LaborId, NewEventType, NewFate, NewQuest, QuestFilter, QuestId, QuestUpdate,
};
use hermes::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "hermes", about = "Fate-driven labor tracking")]
struct Cli {
    /// Optional TOML config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Event type administration
    EventType {
        #[command(subcommand)]
        action: EventTypeAction,
    },
    /// Host administration
    Host {
        #[command(subcommand)]
        action: HostAction,
    },
    /// Rulebook administration
    Fate {
        #[command(subcommand)]
        action: FateAction,
    },
    /// Event submission and history
    Event {
        #[command(subcommand)]
        action: EventAction,
    },
    /// Labor operations
    Labor {
        #[command(subcommand)]
        action: LaborAction,
    },
    /// Quest operations
    Quest {
        #[command(subcommand)]
        action: QuestAction,
    },
}

#[derive(Subcommand)]
enum EventTypeAction {
    /// Create an event type
    Add {
        category: String,
        state: String,
        #[arg(long)]
        description: Option<String>,
        /// Refuse events of this type from the CLI
        #[arg(long)]
        restricted: bool,
    },
    /// List event types
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        state: Option<String>,
        /// Only types that open a chain
        #[arg(long)]
        starting: bool,
    },
}

#[derive(Subcommand)]
enum HostAction {
    /// Register a host
    Add { hostname: String },
    /// Rename a host
    Rename { hostname: String, new_hostname: String },
    /// List hosts
    List,
}

#[derive(Subcommand)]
enum FateAction {
    /// Create a fate
    Add {
        /// Event type that opens the labor
        creation: i64,
        /// Event type that closes it
        completion: i64,
        /// Fate this one continues
        #[arg(long)]
        follows: Option<i64>,
        #[arg(long)]
        description: Option<String>,
        /// Labors are not for the host owner
        #[arg(long)]
        not_for_owner: bool,
        /// Labors are for the quest creator
        #[arg(long)]
        for_creator: bool,
    },
    /// Replace a fate's description
    Describe {
        id: i64,
        description: Option<String>,
    },
    /// List fates
    List,
}

#[derive(Subcommand)]
enum EventAction {
    /// Record an event on one or more hosts
    Record {
        /// Event type ID; or name it with --category and --state
        event_type: Option<i64>,
        #[arg(long, requires = "state", conflicts_with = "event_type")]
        category: Option<String>,
        #[arg(long, requires = "category")]
        state: Option<String>,
        /// Hostnames (repeatable)
        #[arg(long = "host", required = true)]
        hosts: Vec<String>,
        #[arg(long, default_value = "hermes")]
        user: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// List events
    List {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        state: Option<String>,
        /// RFC 3339; events at or after this time
        #[arg(long)]
        after: Option<DateTime<Utc>>,
        /// RFC 3339; events before this time
        #[arg(long)]
        before: Option<DateTime<Utc>>,
        /// Events from the latest one of this type onwards
        #[arg(long)]
        after_type: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum LaborAction {
    /// List labors
    List {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        quest: Option<i64>,
        /// Only open labors
        #[arg(long)]
        open: bool,
        /// A whole chain by its origin labor
        #[arg(long)]
        chain: Option<i64>,
        /// Only labors for host owners
        #[arg(long)]
        for_owner: bool,
        /// Only labors for quest creators
        #[arg(long)]
        for_creator: bool,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a labor
    Show { id: i64 },
    /// Acknowledge a labor
    Ack {
        id: i64,
        #[arg(long)]
        user: String,
    },
    /// Attach a labor to a quest
    Attach { id: i64, quest: i64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Fresh,
    Adopt,
}

#[derive(Subcommand)]
enum QuestAction {
    /// Embark on a quest
    Embark {
        /// Event type ID
        event_type: i64,
        description: String,
        #[arg(long)]
        creator: String,
        /// Hostnames (repeatable)
        #[arg(long = "host", required = true)]
        hosts: Vec<String>,
        /// RFC 3339 target time
        #[arg(long)]
        target: Option<DateTime<Utc>>,
        #[arg(long, value_enum, default_value = "fresh")]
        mode: ModeArg,
    },
    /// List quests
    List {
        #[arg(long)]
        open: bool,
        #[arg(long)]
        creator: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a quest with its progress
    Show { id: i64 },
    /// Update a quest
    Update {
        id: i64,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        creator: Option<String>,
        #[arg(long)]
        target: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    let db = Db::connect_with_config(&config).await?;
    db.migrate().await?;

    match cli.command {
        Command::EventType { action } => cmd_event_type(&db, action).await,
        Command::Host { action } => cmd_host(&db, action).await,
        Command::Fate { action } => cmd_fate(&db, action).await,
        Command::Event { action } => cmd_event(&db, action).await,
        Command::Labor { action } => cmd_labor(&db, action).await,
        Command::Quest { action } => cmd_quest(&db, action).await,
    }
}

async fn cmd_event_type(db: &Db, action: EventTypeAction) -> anyhow::Result<()> {
    match action {
        EventTypeAction::Add {
            category,
            state,
            description,
            restricted,
        } => {
            let mut new = NewEventType::new(category, state).restricted(restricted);
            if let Some(description) = description {
                new = new.description(description);
            }
            let et = db.add_event_type(new).await?;
            println!("Created event type {}: {et}", et.id);
        }
        EventTypeAction::List {
            category,
            state,
            starting,
        } => {
            let filter = EventTypeFilter {
                category,
                state,
                starting_only: starting,
            };
            let types = db.list_event_types(&filter).await?;
            println!(
                "{:<6}  {:<24}  {:<16}  {:<10}  DESCRIPTION",
                "ID", "CATEGORY", "STATE", "RESTRICTED"
            );
            println!("{}", "-".repeat(80));
            for et in &types {
                println!(
                    "{:<6}  {:<24}  {:<16}  {:<10}  {}",
                    et.id,
                    et.category,
                    et.state,
                    if et.restricted { "yes" } else { "no" },
                    et.description.as_deref().unwrap_or("-")
                );
            }
            println!("\n{} event type(s)", types.len());
        }
    }
    Ok(())
}

async fn cmd_host(db: &Db, action: HostAction) -> anyhow::Result<()> {
    match action {
        HostAction::Add { hostname } => {
            let host = db.create_host(&hostname).await?;
            println!("Created host {}: {}", host.id, host.hostname);
        }
        HostAction::Rename {
            hostname,
            new_hostname,
        } => {
            let host = db.rename_host(&hostname, &new_hostname).await?;
            println!("Renamed host {} from {hostname} to {}", host.id, host.hostname);
        }
        HostAction::List => {
            let hosts = db.list_hosts().await?;
            for host in &hosts {
                println!("{:<6}  {}", host.id, host.hostname);
            }
            println!("\n{} host(s)", hosts.len());
        }
    }
    Ok(())
}

async fn cmd_fate(db: &Db, action: FateAction) -> anyhow::Result<()> {
    match action {
        FateAction::Add {
            creation,
            completion,
            follows,
            description,
            not_for_owner,
            for_creator,
        } => {
            let mut new = NewFate::new(EventTypeId(creation), EventTypeId(completion))
                .for_owner(!not_for_owner)
                .for_creator(for_creator);
            if let Some(follows) = follows {
                new = new.follows(FateId(follows));
            }
            if let Some(description) = description {
                new = new.description(description);
            }
            let fate = db.create_fate(new).await?;
            println!("Created fate {}", fate.id);
        }
        FateAction::Describe { id, description } => {
            let fate = db
                .update_fate_description(FateId(id), description.as_deref())
                .await?;
            println!("Updated fate {}", fate.id);
        }
        FateAction::List => {
            let fates = db.all_fates().await?;
            println!(
                "{:<6}  {:<8}  {:<10}  {:<8}  {:<12}  DESCRIPTION",
                "ID", "CREATES", "COMPLETES", "FOLLOWS", "PRECEDES"
            );
            println!("{}", "-".repeat(80));
            for fate in &fates {
                let precedes: Vec<String> = fate.precedes.iter().map(|id| id.to_string()).collect();
                println!(
                    "{:<6}  {:<8}  {:<10}  {:<8}  {:<12}  {}",
                    fate.id,
                    fate.creation_type_id,
                    fate.completion_type_id,
                    fate.follows_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    if precedes.is_empty() {
                        "-".to_string()
                    } else {
                        precedes.join(",")
                    },
                    fate.description.as_deref().unwrap_or("-")
                );
            }
            println!("\n{} fate(s)", fates.len());
        }
    }
    Ok(())
}

async fn cmd_event(db: &Db, action: EventAction) -> anyhow::Result<()> {
    match action {
        EventAction::Record {
            event_type,
            category,
            state,
            hosts,
            user,
            note,
        } => {
            let event_type = throwable_event_type(db, event_type, category, state).await?;
            let events = db
                .record_events_for_hosts(&hosts, &user, event_type.id, note.as_deref())
                .await?;
            for event in &events {
                println!("Recorded event {} on host {}", event.id, event.host_id);
            }
        }
        EventAction::List {
            host,
            category,
            state,
            after,
            before,
            after_type,
            limit,
        } => {
            let filter = EventFilter {
                hostname: host,
                category,
                state,
                after,
                before,
                after_event_type: after_type.map(EventTypeId),
                limit: Some(limit),
                ..Default::default()
            };
            let events = db.list_events(&filter).await?;
            println!(
                "{:<8}  {:<6}  {:<6}  {:<12}  {:<17}  NOTE",
                "ID", "HOST", "TYPE", "USER", "TIME"
            );
            println!("{}", "-".repeat(80));
            for event in &events {
                println!(
                    "{:<8}  {:<6}  {:<6}  {:<12}  {:<17}  {}",
                    event.id,
                    event.host_id,
                    event.event_type_id,
                    event.user,
                    event.timestamp.format("%Y-%m-%d %H:%M"),
                    event.note.as_deref().unwrap_or("-")
                );
            }
            println!("\n{} event(s)", events.len());
        }
    }
    Ok(())
}

async fn cmd_labor(db: &Db, action: LaborAction) -> anyhow::Result<()> {
    match action {
        LaborAction::List {
            host,
            quest,
            open,
            chain,
            for_owner,
            for_creator,
            limit,
        } => {
            let filter = LaborFilter {
                hostname: host,
                quest_id: quest.map(QuestId),
                open: open.then_some(true),
                chain: chain.map(LaborId),
                for_owner: for_owner.then_some(true),
                for_creator: for_creator.then_some(true),
                limit: Some(limit),
                ..Default::default()
            };
            let labors = db.list_labors(&filter).await?;
            println!(
                "{:<8}  {:<6}  {:<6}  {:<8}  {:<8}  {:<17}  COMPLETED",
                "ID", "HOST", "QUEST", "ORIGIN", "ACKED", "CREATED"
            );
            println!("{}", "-".repeat(80));
            for labor in &labors {
                println!(
                    "{:<8}  {:<6}  {:<6}  {:<8}  {:<8}  {:<17}  {}",
                    labor.id,
                    labor.host_id,
                    labor
                        .quest_id
                        .map(|q| q.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    labor.chain_origin(),
                    labor.ack_user.as_deref().unwrap_or("-"),
                    labor.creation_time.format("%Y-%m-%d %H:%M"),
                    labor
                        .completion_time
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "open".to_string())
                );
            }
            println!("\n{} labor(s)", labors.len());
        }
        LaborAction::Show { id } => {
            let labor = db.get_labor(LaborId(id)).await?;
            println!("{}", serde_json::to_string_pretty(&labor)?);
        }
        LaborAction::Ack { id, user } => {
            let labor = db.acknowledge_labor(LaborId(id), &user).await?;
            println!("Acknowledged labor {} as {user}", labor.id);
        }
        LaborAction::Attach { id, quest } => {
            let labor = db.attach_labor_to_quest(LaborId(id), QuestId(quest)).await?;
            println!("Attached labor {} to quest {quest}", labor.id);
        }
    }
    Ok(())
}

async fn cmd_quest(db: &Db, action: QuestAction) -> anyhow::Result<()> {
    match action {
        QuestAction::Embark {
            event_type,
            description,
            creator,
            hosts,
            target,
            mode,
        } => {
            let mode = match mode {
                ModeArg::Fresh => EmbarkMode::Fresh,
                ModeArg::Adopt => EmbarkMode::Adopt,
            };
            let event_type = throwable_event_type(db, Some(event_type), None, None).await?;
            let mut new = NewQuest::new(creator, description, event_type.id)
                .hosts(hosts)
                .mode(mode);
            if let Some(target) = target {
                new = new.target_time(target);
            }
            let quest = db.embark_quest(new).await?;
            let progress = db.quest_progress(quest.id).await?;
            println!(
                "Embarked quest {} with {} labor(s)",
                quest.id, progress.total_labors
            );
        }
        QuestAction::List {
            open,
            creator,
            limit,
        } => {
            let filter = QuestFilter {
                open_only: open,
                creator,
                limit: Some(limit),
                ..Default::default()
            };
            let quests = db.list_quests(&filter).await?;
            println!(
                "{:<6}  {:<12}  {:<17}  {:<17}  DESCRIPTION",
                "ID", "CREATOR", "EMBARKED", "COMPLETED"
            );
            println!("{}", "-".repeat(80));
            for quest in &quests {
                println!(
                    "{:<6}  {:<12}  {:<17}  {:<17}  {}",
                    quest.id,
                    quest.creator,
                    quest.embark_time.format("%Y-%m-%d %H:%M"),
                    quest
                        .completion_time
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    quest.description
                );
            }
            println!("\n{} quest(s)", quests.len());
        }
        QuestAction::Show { id } => {
            let quest = db.get_quest(QuestId(id)).await?;
            let progress = db.quest_progress(quest.id).await?;
            println!("ID:          {}", quest.id);
            println!("Creator:     {}", quest.creator);
            println!("Description: {}", quest.description);
            println!("Embarked:    {}", quest.embark_time);
            if let Some(target) = quest.target_time {
                println!("Target:      {target}");
            }
            if let Some(completed) = quest.completion_time {
                println!("Completed:   {completed}");
            }
            println!(
                "Progress:    {}/{} labors ({}%)",
                progress.completed_labors, progress.total_labors, progress.percent_complete
            );
        }
        QuestAction::Update {
            id,
            description,
            creator,
            target,
        } => {
            let quest = db
                .update_quest(
                    QuestId(id),
                    QuestUpdate {
                        description,
                        creator,
                        target_time: target,
                    },
                )
                .await?;
            println!("Updated quest {}", quest.id);
        }
    }
    Ok(())
}

/// Resolve the event type an operator asked for, refusing restricted ones.
async fn throwable_event_type(
    db: &Db,
    id: Option<i64>,
    category: Option<String>,
    state: Option<String>,
) -> anyhow::Result<EventType> {
    let event_type = match (id, category, state) {
        (Some(id), _, _) => db.get_event_type(EventTypeId(id)).await?,
        (None, Some(category), Some(state)) => db
            .find_event_type(&category, &state)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no event type {category}/{state}"))?,
        _ => anyhow::bail!("give an event type ID or both --category and --state"),
    };
    event_type.ensure_unrestricted()?;
    Ok(event_type)
}
