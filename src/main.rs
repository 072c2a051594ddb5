use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use fireinspect::app::{App, InspectionChanges, SyncSummary};
use fireinspect::config::Config;
use fireinspect::model::{InspectionKind, InspectionRecord, NewInspection};
use fireinspect::photo::Photo;

#[derive(Parser, Debug)]
#[command(name = "fireinspect")]
#[command(about = "Offline-first fire-safety inspection log")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fireinspect/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Start without connectivity; mutations stay queued
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Record a new inspection
  Add {
    /// extintores, mangueiras, acidentes or alarmes
    #[arg(short, long)]
    kind: InspectionKind,
    #[arg(short, long)]
    location: String,
    /// Inspection date (YYYY-MM-DD), defaults to today
    #[arg(short, long)]
    date: Option<NaiveDate>,
    #[arg(short, long, default_value = "")]
    notes: String,
    /// Image file attached to the inspection
    #[arg(short, long)]
    photo: PathBuf,
  },
  /// List inspections, newest first
  #[command(visible_alias = "ls")]
  List {
    #[arg(short, long)]
    kind: Option<InspectionKind>,
  },
  /// Show one inspection
  Show { id: i64 },
  /// Change fields of an inspection
  Update {
    id: i64,
    #[arg(short, long)]
    kind: Option<InspectionKind>,
    #[arg(short, long)]
    location: Option<String>,
    #[arg(short, long)]
    date: Option<NaiveDate>,
    #[arg(short, long)]
    notes: Option<String>,
    #[arg(short, long)]
    photo: Option<PathBuf>,
  },
  /// Delete an inspection
  #[command(visible_alias = "rm")]
  Delete { id: i64 },
  /// Mark an inspection as delivered without sending it
  MarkSynced { id: i64 },
  /// Show how many changes are waiting for delivery
  Pending,
  /// Deliver queued changes now
  Sync,
  /// Request a path or URL through the caching proxy
  Fetch {
    target: String,
    #[arg(short, long, default_value = "GET")]
    method: reqwest::Method,
  },
  /// Evict cached resources past their retention
  Janitor,
  /// Write every inspection to a JSON backup
  Export { path: Option<PathBuf> },
  /// Delete every cached resource
  ClearCache,
  /// Recreate a corrupt record store, discarding all local data
  Recover {
    #[arg(long)]
    yes: bool,
  },
  /// Keep the background worker running until interrupted
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = fireinspect::logging::init(&config.data_dir()?)?;

  let app = App::new(config, args.offline).await?;
  if let Some(e) = app.store_error() {
    eprintln!("Warning: record store unavailable ({}). Reads are empty and writes fail.", e);
    if e.is_corruption() {
      eprintln!("Run `fireinspect recover --yes` to recreate it.");
    }
  }

  let result = execute(&app, args.command).await;
  app.shutdown().await?;
  result
}

async fn execute(app: &App, command: Command) -> Result<()> {
  match command {
    Command::Add {
      kind,
      location,
      date,
      notes,
      photo,
    } => {
      let id = app
        .add(NewInspection {
          kind,
          location,
          date,
          notes,
          photo: Some(Photo::from_file(&photo)?),
        })
        .await?;
      println!("Recorded inspection {}", id);
    }
    Command::List { kind } => {
      let records = app.list(kind).await?;
      if records.is_empty() {
        println!("No inspections");
      }
      for record in &records {
        println!("{}", summary_line(record));
      }
    }
    Command::Show { id } => {
      let record = app.show(id).await?;
      print_record(&record);
    }
    Command::Update {
      id,
      kind,
      location,
      date,
      notes,
      photo,
    } => {
      let photo = photo.as_deref().map(Photo::from_file).transpose()?;
      app
        .update(
          id,
          InspectionChanges {
            kind,
            location,
            date,
            notes,
            photo,
          },
        )
        .await?;
      println!("Updated inspection {}", id);
    }
    Command::Delete { id } => {
      app.delete(id).await?;
      println!("Deleted inspection {}", id);
    }
    Command::MarkSynced { id } => {
      app.mark_synced(id).await?;
      println!("Inspection {} marked as synced", id);
    }
    Command::Pending => {
      let (count, records) = app.pending().await?;
      println!("{} queued change(s)", count);
      for record in &records {
        println!("{}", summary_line(record));
      }
    }
    Command::Sync => match app.sync().await? {
      SyncSummary::Completed { delivered, pending } => {
        println!("Delivered {} change(s), {} still queued", delivered, pending)
      }
      SyncSummary::Deferred { pending } => {
        println!("Offline: {} change(s) will sync when connectivity returns", pending)
      }
      SyncSummary::TimedOut { pending } => {
        println!("Sync still running, {} change(s) queued", pending)
      }
      SyncSummary::WorkerUnavailable => return Err(eyre!("Background worker is not running")),
    },
    Command::Fetch { target, method } => {
      let served = app.fetch(&target, method).await?;
      println!(
        "{} {} ({:?})",
        served.response.status, served.response.status_text, served.source
      );
      if let Some(content_type) = served.response.content_type() {
        println!("content-type: {}", content_type);
      }
      println!("{} bytes", served.response.body.len());
    }
    Command::Janitor => {
      app.janitor()?;
      println!("Cache janitor requested");
    }
    Command::Export { path } => {
      let path = app.export(path).await?;
      println!("Backup written to {}", path.display());
    }
    Command::ClearCache => {
      let names = app.clear_cache()?;
      println!("Cleared {} cache(s)", names.len());
    }
    Command::Recover { yes } => {
      app.recover(yes).await?;
      println!("Record store recreated");
    }
    Command::Run => app.run().await?,
  }
  Ok(())
}

fn summary_line(record: &InspectionRecord) -> String {
  format!(
    "{:>5}  {:<11} {}  {:<8} {}",
    record.id.map(|id| id.to_string()).unwrap_or_default(),
    record.kind.title(),
    record.date,
    record.sync_state.as_str(),
    record.location
  )
}

fn print_record(record: &InspectionRecord) {
  println!("{}", summary_line(record));
  println!("  author:  {}", record.author);
  println!("  created: {}", record.created_at.to_rfc3339());
  if !record.notes.is_empty() {
    println!("  notes:   {}", record.notes);
  }
  let photo = record.photo.mime().unwrap_or("unknown");
  match record.photo.byte_len() {
    Ok(len) => println!("  photo:   {} ({} bytes)", photo, len),
    Err(_) => println!("  photo:   {} (unreadable)", photo),
  }
}
