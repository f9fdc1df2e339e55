use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};

use shipment_nps::config::{AppConfig, MailConfig, NavConfig, SurveyConfig};
use shipment_nps::importer::ShipmentImporter;
use shipment_nps::nav::NavClient;
use shipment_nps::scheduler::{self, Scheduler};
use shipment_nps::store::{Database, LibSqlBackend};
use shipment_nps::survey::{SmtpMailer, SurveyDispatcher};

#[derive(Parser)]
#[command(name = "shipment-nps")]
#[command(about = "Import ERP shipments and send NPS survey emails", version)]
struct Cli {
    /// SQLite database file, overriding NPS_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Run as if today were this date (YYYY-MM-DD)
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import new shipments for every region
    Import,
    /// Send NPS emails for pending shipments
    Dispatch,
    /// Import, then dispatch
    Run,
    /// Run import + dispatch on the NPS_SCHEDULE cron expression
    Schedule,
    /// Add a region by name
    AddRegion { name: String },
    /// Stop sending surveys to an address
    OptOut { email: String },
    /// Resume sending surveys to an address
    OptIn { email: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let app = AppConfig::from_env();
    let db_path = resolve_db_path(cli.db.clone(), &app);
    let today = cli.today.unwrap_or_else(|| Utc::now().date_naive());

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
    );

    match cli.command {
        Command::Import => {
            let report = importer(&db)?.import_all_regions(today).await?;
            print_json(&report)?;
        }
        Command::Dispatch => {
            let report = dispatcher(&db)?.dispatch(today).await?;
            print_json(&report)?;
        }
        Command::Run => {
            let report = scheduler::run_once(&importer(&db)?, &dispatcher(&db)?, today).await?;
            print_json(&report)?;
        }
        Command::Schedule => {
            let schedule = scheduler::parse_schedule(&app.schedule)?;
            eprintln!("shipment-nps v{}", env!("CARGO_PKG_VERSION"));
            eprintln!("   Database: {}", db_path.display());
            eprintln!("   Schedule: {}", app.schedule);
            Scheduler::new(schedule, Arc::new(importer(&db)?), Arc::new(dispatcher(&db)?))
                .run()
                .await;
        }
        Command::AddRegion { name } => {
            let region = db.upsert_region(name.trim()).await?;
            print_json(&region)?;
        }
        Command::OptOut { email } => set_surveyable(&db, &email, false).await?,
        Command::OptIn { email } => set_surveyable(&db, &email, true).await?,
    }

    Ok(())
}

/// `--db` wins; otherwise `NPS_DB_PATH` (or its default) via `AppConfig`.
fn resolve_db_path(flag: Option<PathBuf>, app: &AppConfig) -> PathBuf {
    flag.unwrap_or_else(|| app.db_path.clone())
}

fn importer(db: &Arc<dyn Database>) -> anyhow::Result<ShipmentImporter> {
    let nav = NavClient::new(&NavConfig::from_env()?)?;
    Ok(ShipmentImporter::new(Arc::clone(db), Arc::new(nav)))
}

fn dispatcher(db: &Arc<dyn Database>) -> anyhow::Result<SurveyDispatcher> {
    let mail = MailConfig::from_env()?;
    let survey = SurveyConfig::from_env()?;
    let mailer = SmtpMailer::new(&mail)?;
    Ok(SurveyDispatcher::new(
        Arc::clone(db),
        Arc::new(mailer),
        survey.base_url,
        mail.from_address,
    ))
}

async fn set_surveyable(db: &Arc<dyn Database>, email: &str, surveyable: bool) -> anyhow::Result<()> {
    if !db.set_user_surveyable(email, surveyable).await? {
        anyhow::bail!("No user with email {email}");
    }
    tracing::info!(email, surveyable, "User updated");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
