//! gatectl - administer the plate gate record store

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;

use plate_gate::{
    AuthorizedFilter, EventFilter, EventRecord, NormalizedPlate, RecordStore, SqliteRecordStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the gate database.
    #[arg(long, env = "PLATE_GATE_DB_PATH", default_value = "plate_gate.db")]
    db_path: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authorize a plate for a person.
    AddAuthorized {
        #[arg(long)]
        name: String,
        #[arg(long)]
        plate: String,
    },
    /// Remove an authorized identity by id.
    RemoveAuthorized {
        #[arg(long)]
        id: i64,
    },
    /// List authorized identities, newest first.
    ListAuthorized,
    /// Set a camera's stream URI (takes effect on the next daemon start).
    SetCamera {
        #[arg(long)]
        camera_id: String,
        #[arg(long)]
        uri: String,
    },
    /// List configured cameras.
    ListCameras,
    /// Export gate events, newest first.
    ExportEvents {
        /// Substring of the recorded name.
        #[arg(long)]
        name: Option<String>,
        /// Substring of the plate.
        #[arg(long)]
        plate: Option<String>,
        /// First day to include (YYYY-MM-DD).
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day to include (YYYY-MM-DD).
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, value_enum, default_value = "all")]
        authorized: AuthorizedArg,
        #[arg(long, default_value_t = 500)]
        limit: usize,
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,
        /// Output file; stdout when omitted.
        #[arg(long)]
        output: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AuthorizedArg {
    All,
    Yes,
    No,
}

impl From<AuthorizedArg> for AuthorizedFilter {
    fn from(value: AuthorizedArg) -> Self {
        match value {
            AuthorizedArg::All => AuthorizedFilter::All,
            AuthorizedArg::Yes => AuthorizedFilter::Authorized,
            AuthorizedArg::No => AuthorizedFilter::Unauthorized,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let mut store = SqliteRecordStore::open(&args.db_path)?;

    match args.command {
        Command::AddAuthorized { name, plate } => {
            let plate = NormalizedPlate::parse(&plate)
                .ok_or_else(|| anyhow!("plate '{}' has no letters or digits", plate))?;
            let id = store.add_authorized(&name, &plate)?;
            println!("authorized {} for {} (id {})", plate, name.trim(), id);
        }
        Command::RemoveAuthorized { id } => {
            if !store.remove_authorized(id)? {
                return Err(anyhow!("no authorized identity with id {}", id));
            }
            println!("removed authorized identity {}", id);
        }
        Command::ListAuthorized => {
            for identity in store.list_authorized()? {
                println!("{}\t{}\t{}", identity.id, identity.plate, identity.name);
            }
        }
        Command::SetCamera { camera_id, uri } => {
            let (camera_id, uri) = (camera_id.trim(), uri.trim());
            if camera_id.is_empty() || uri.is_empty() {
                return Err(anyhow!("camera id and URI must not be empty"));
            }
            store.set_camera_uri(camera_id, uri)?;
            println!("camera {} set to {}", camera_id, uri);
        }
        Command::ListCameras => {
            for camera in store.camera_settings()? {
                println!("{}\t{}", camera.camera_id, camera.stream_uri);
            }
        }
        Command::ExportEvents {
            name,
            plate,
            from,
            to,
            authorized,
            limit,
            format,
            output,
        } => {
            let filter = EventFilter {
                name_contains: name,
                plate_contains: plate,
                from,
                to,
                authorized: authorized.into(),
                limit,
            };
            let records = store.export_events(&filter)?;
            let bytes = match format {
                ExportFormat::Json => serde_json::to_vec_pretty(&records)?,
                ExportFormat::Csv => events_csv(&records)?,
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, bytes)?;
                    eprintln!("{} events written to {}", records.len(), path);
                }
                None => std::io::stdout().write_all(&bytes)?,
            }
        }
    }
    Ok(())
}

fn events_csv(records: &[EventRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["plate", "name", "camera", "timestamp", "authorized"])?;
    for record in records {
        writer.write_record([
            record.plate.as_str(),
            record.name.as_str(),
            record.camera_id.as_str(),
            record.timestamp.as_str(),
            if record.authorized { "yes" } else { "no" },
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("failed to flush csv: {}", e))
}
