mod config;
mod logging;
mod output;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::{Config, ConfigError};
use fb_core::types::{DraftId, EventId, ExportSnapshot, IdError, Owner, PromoteInput, UserId};
use fb_core::{FieldbookError, RequestContext};
use fb_events::{NoticeBus, NoticeSource};
use fb_sync::{
    HttpRemote, RemoteError, RemoteService, SaveScheduler, StaticSession, Storage, SyncEngine,
    SyncError,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "fb", version, about = "Offline-first field inspection records")]
struct Cli {
    /// Config file; defaults to $FIELDBOOK_CONFIG or .fieldbook/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(subcommand)]
    Draft(DraftCommand),
    /// Turn a draft into an event record.
    Promote {
        draft_id: String,
        #[arg(long)]
        program: String,
        #[arg(long)]
        container: String,
        #[arg(long)]
        stage: String,
        /// Inspection date (YYYY-MM-DD); today when omitted.
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        linked: Option<String>,
        /// Keep the record as a saved draft instead of queueing it.
        #[arg(long)]
        save_only: bool,
    },
    /// Merged work list for the configured user.
    List,
    Status,
    /// Run one sync pass.
    Sync,
    /// Sync periodically until interrupted.
    Watch,
    Retry {
        event_id: String,
    },
    /// Queue a saved draft record for sync.
    Submit {
        event_id: String,
    },
    Delete {
        event_id: String,
    },
    PurgeSynced,
    /// Dump every record plus the configured user's drafts as JSON.
    Export {
        /// Write to this file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DraftCommand {
    /// Print a fresh draft id.
    New,
    /// Save fields, e.g. `dataElement_abc=4` or `notes="late"`.
    Set {
        draft_id: String,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    Show {
        draft_id: String,
    },
    Section {
        draft_id: String,
        name: String,
        #[arg(long)]
        done: bool,
    },
    Delete {
        draft_id: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fieldbook(#[from] FieldbookError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{message}")]
    Usage { message: String },
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }
}

struct App {
    config: Config,
    storage: Storage,
    owner: Owner,
    json: bool,
}

impl App {
    fn open(cli: &Cli) -> Result<Self, CliError> {
        let config = Config::load(cli.config.as_deref())?;
        let owner = Owner::new(UserId::new(&config.user.id)?, config.user.name.clone());
        let storage = Storage::open(&config.db_path, NoticeBus::default())
            .map_err(FieldbookError::from)?;
        tracing::debug!(db_path = %config.db_path.display(), user_id = %owner.user_id, "storage opened");
        Ok(Self {
            config,
            storage,
            owner,
            json: cli.json,
        })
    }

    fn scheduler(&self, draft_id: DraftId) -> SaveScheduler {
        SaveScheduler::new(
            self.storage.clone(),
            draft_id,
            self.owner.clone(),
            self.config.scheduler.debounce(),
        )
    }

    fn engine(&self) -> Result<SyncEngine, CliError> {
        let remote = &self.config.remote;
        let base_url = remote
            .base_url
            .as_deref()
            .ok_or_else(|| CliError::usage("remote.base_url is not configured"))?;
        let mut client = HttpRemote::new(base_url, remote.timeout())?;
        if let Some(username) = &remote.username {
            client = client.with_basic_auth(username, remote.password.clone().unwrap_or_default());
        }
        let client: Arc<dyn RemoteService> = Arc::new(client);
        let session = Arc::new(StaticSession::new(self.owner.clone(), !self.config.offline));
        Ok(SyncEngine::new(self.storage.clone(), client, session).with_ping_check(remote.ping_check))
    }
}

fn ctx() -> RequestContext {
    RequestContext::new(NoticeSource::Cli)
}

/// Splits `key=value`; the value is read as JSON when it parses, otherwise
/// kept as text.
fn parse_assignment(raw: &str) -> Result<(String, Value), CliError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| CliError::usage(format!("expected key=value, got `{raw}`")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::usage(format!("missing field key in `{raw}`")));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if let Command::Draft(DraftCommand::New) = cli.command {
        println!("{}", DraftId::generate());
        return Ok(());
    }

    let app = App::open(&cli)?;
    match cli.command {
        Command::Draft(command) => run_draft(&app, command).await,
        Command::Promote {
            draft_id,
            program,
            container,
            stage,
            date,
            linked,
            save_only,
        } => {
            let draft_id = DraftId::new(draft_id)?;
            let input = PromoteInput {
                program_id: program,
                container_id: container,
                stage_id: stage,
                event_date: date.unwrap_or_else(|| chrono::Local::now().date_naive()),
                linked_entity_id: linked,
                submit: !save_only,
            };
            let owner = app.owner.clone();
            let event = app
                .storage
                .run(move |fb| fb.drafts().promote(&ctx(), &draft_id, &owner, input))
                .await?;
            if app.json {
                output::json(&event)?;
            } else {
                output::event(&event);
            }
            Ok(())
        }
        Command::List => {
            let user_id = app.owner.user_id.clone();
            let items = app.storage.run(move |fb| fb.view().merged(&user_id)).await?;
            if app.json {
                output::json(&items)?;
            } else {
                output::work_list(&items);
            }
            Ok(())
        }
        Command::Status => {
            let stats = app.storage.run(|fb| fb.events().stats()).await?;
            if app.json {
                output::json(&stats)?;
            } else {
                output::stats(&stats);
            }
            Ok(())
        }
        Command::Sync => {
            let outcome = app.engine()?.sync_pending().await?;
            if app.json {
                output::json(&outcome)?;
            } else {
                output::sync_outcome(&outcome);
            }
            Ok(())
        }
        Command::Watch => {
            let engine = Arc::new(app.engine()?);
            tracing::info!(every_secs = app.config.sync.interval_secs, "watching for pending records");
            let handle = engine.schedule(app.config.sync.interval());
            let stopped = tokio::signal::ctrl_c().await;
            handle.abort();
            stopped.map_err(|err| CliError::usage(format!("cannot listen for ctrl-c: {err}")))
        }
        Command::Retry { event_id } => {
            let event_id = EventId::new(event_id)?;
            let outcome = app.engine()?.retry(&event_id).await?;
            if app.json {
                output::json(&outcome)?;
            } else {
                output::record_outcome(&outcome);
            }
            Ok(())
        }
        Command::Submit { event_id } => {
            let event_id = EventId::new(event_id)?;
            let event = app
                .storage
                .run(move |fb| fb.events().submit(&ctx(), &event_id))
                .await?;
            if app.json {
                output::json(&event)?;
            } else {
                output::event(&event);
            }
            Ok(())
        }
        Command::Delete { event_id } => {
            let event_id = EventId::new(event_id)?;
            let shown = event_id.clone();
            app.storage
                .run(move |fb| fb.events().delete(&ctx(), &event_id))
                .await?;
            println!("deleted {shown}");
            Ok(())
        }
        Command::PurgeSynced => {
            let count = app.storage.run(|fb| fb.events().purge_synced(&ctx())).await?;
            println!("removed {count} synced record(s)");
            Ok(())
        }
        Command::Export { output: target } => {
            let user_id = app.owner.user_id.clone();
            let snapshot = app.storage.run(move |fb| fb.export(&user_id)).await?;
            match target {
                Some(path) => {
                    write_export(&snapshot, &path)?;
                    println!(
                        "exported {} record(s) and {} draft(s) to {}",
                        snapshot.events.len(),
                        snapshot.drafts.len(),
                        path.display()
                    );
                }
                None => output::json(&snapshot)?,
            }
            Ok(())
        }
    }
}

fn write_export(snapshot: &ExportSnapshot, path: &Path) -> Result<(), CliError> {
    let body = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, body).map_err(|source| CliError::Write {
        path: path.to_path_buf(),
        source,
    })
}

async fn run_draft(app: &App, command: DraftCommand) -> Result<(), CliError> {
    match command {
        DraftCommand::New => Ok(()),
        DraftCommand::Set { draft_id, fields } => {
            let fields = fields
                .iter()
                .map(|raw| parse_assignment(raw))
                .collect::<Result<Vec<_>, _>>()?;
            let scheduler = app.scheduler(DraftId::new(draft_id)?);
            scheduler.save_fields(fields)?;
            let saved = scheduler.flush_pending_saves().await?;
            tracing::debug!(saved, draft_id = %scheduler.draft_id(), "fields flushed");
            show_draft(app, &scheduler).await
        }
        DraftCommand::Show { draft_id } => {
            let scheduler = app.scheduler(DraftId::new(draft_id)?);
            show_draft(app, &scheduler).await
        }
        DraftCommand::Section {
            draft_id,
            name,
            done,
        } => {
            let scheduler = app.scheduler(DraftId::new(draft_id)?);
            let draft = scheduler.complete_section(name, done).await?;
            if app.json {
                output::json(&draft)?;
            } else {
                output::draft(&draft);
            }
            Ok(())
        }
        DraftCommand::Delete { draft_id } => {
            let draft_id = DraftId::new(draft_id)?;
            let shown = draft_id.clone();
            let deleted = app
                .storage
                .run(move |fb| fb.drafts().delete(&ctx(), &draft_id))
                .await?;
            if deleted {
                println!("deleted draft {shown}");
            } else {
                println!("no draft {shown}");
            }
            Ok(())
        }
    }
}

async fn show_draft(app: &App, scheduler: &SaveScheduler) -> Result<(), CliError> {
    match scheduler.load_form_data().await? {
        Some(draft) if app.json => output::json(&draft)?,
        Some(draft) => output::draft(&draft),
        None => println!("no draft {}", scheduler.draft_id()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assignments_read_json_then_fall_back_to_text() {
        assert_eq!(
            parse_assignment("dataElement_score=4").unwrap(),
            ("dataElement_score".to_string(), json!(4))
        );
        assert_eq!(
            parse_assignment("notes=late arrival").unwrap(),
            ("notes".to_string(), json!("late arrival"))
        );
        assert_eq!(
            parse_assignment("flag=true").unwrap(),
            ("flag".to_string(), json!(true))
        );
        assert_eq!(
            parse_assignment("empty=").unwrap(),
            ("empty".to_string(), json!(""))
        );
        assert_eq!(
            parse_assignment("expr=a=b").unwrap(),
            ("expr".to_string(), json!("a=b"))
        );
    }

    #[test]
    fn assignments_need_a_key() {
        assert!(matches!(
            parse_assignment("novalue"),
            Err(CliError::Usage { .. })
        ));
        assert!(matches!(
            parse_assignment(" =4"),
            Err(CliError::Usage { .. })
        ));
    }

    #[test]
    fn cli_parses_promote() {
        let cli = Cli::try_parse_from([
            "fb",
            "promote",
            "evAAAAAAAA1",
            "--program",
            "prgInspect1",
            "--container",
            "ouClinic001",
            "--stage",
            "stgFacility",
            "--date",
            "2025-07-11",
            "--save-only",
        ])
        .unwrap();

        match cli.command {
            Command::Promote {
                date, save_only, ..
            } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 7, 11));
                assert!(save_only);
            }
            _ => panic!("expected promote"),
        }
    }

    #[test]
    fn cli_parses_export_target() {
        let cli = Cli::try_parse_from(["fb", "export", "-o", "backup.json"]).unwrap();
        match cli.command {
            Command::Export { output } => assert_eq!(output, Some(PathBuf::from("backup.json"))),
            _ => panic!("expected export"),
        }
        let cli = Cli::try_parse_from(["fb", "export"]).unwrap();
        assert!(matches!(cli.command, Command::Export { output: None }));
    }

    #[test]
    fn export_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        let snapshot = ExportSnapshot {
            exported_at: chrono::Utc::now(),
            user_id: UserId::new("u1").unwrap(),
            events: Vec::new(),
            drafts: Vec::new(),
            stats: Default::default(),
        };

        write_export(&snapshot, &path).unwrap();
        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["userId"], json!("u1"));
        assert_eq!(written["events"], json!([]));

        let missing = dir.path().join("no-such-dir").join("export.json");
        assert!(matches!(
            write_export(&snapshot, &missing),
            Err(CliError::Write { .. })
        ));
    }

    #[test]
    fn draft_set_requires_fields() {
        assert!(Cli::try_parse_from(["fb", "draft", "set", "d1"]).is_err());
        assert!(Cli::try_parse_from(["fb", "draft", "set", "d1", "a=1"]).is_ok());
    }
}
