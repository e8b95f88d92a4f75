//! Command line front end
//!
//! Parses arguments, wires the real HTTP-backed components together and
//! renders progress and reports on the terminal. Everything interesting
//! lives in the library modules; this file only prints and prompts.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use qrcode::render::unicode;
use qrcode::QrCode;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::ai::{Classifier, CredentialManager, OpenAiBackend, PromptTemplate};
use crate::auth::passport::PassportApi;
use crate::auth::{LoginState, QrLogin};
use crate::cancel::CancelFlag;
use crate::config::{AiSettings, AppConfig};
use crate::error::{FavError, Result};
use crate::http_client::{ai_client, platform_client};
use crate::pipeline::{
    ensure_session, CollectionSelector, MoveConfirmation, MovePlan, MoveStatus, Orchestrator,
    ProgressEvent, ProgressSink, RunReport, RunRequest,
};
use crate::platform::{BiliApi, Collection, Platform};
use crate::session::{session_from_env, CredentialStore, FileCredentialStore, SessionStore};

const AI_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Parser)]
#[command(name = "favsort")]
#[command(about = "Sort Bilibili favorites into collections with an AI classifier", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a collection and move each item into its matching collection
    Run {
        /// Source collection (title or numeric id); prompted for when omitted
        #[arg(short, long)]
        source: Option<String>,

        /// Target collection (title or id), repeatable; prompted for when omitted
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// Collection receiving items the classifier cannot place
        #[arg(long)]
        fallback: Option<String>,

        /// Concurrent classification requests
        #[arg(short, long)]
        workers: Option<usize>,

        /// Classify and print the plan without moving anything
        #[arg(long)]
        dry_run: bool,

        /// Execute moves without asking for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Custom prompt template file
        #[arg(long, env = "FAVSORT_PROMPT_TEMPLATE")]
        prompt: Option<PathBuf>,
    },

    /// List your favorites collections
    Collections,

    /// Log in by scanning a QR code with the mobile app
    Login,

    /// Forget the saved session
    Logout,

    /// Save the AI API key to the system keychain
    SetKey {
        /// API key; read from stdin when omitted
        key: Option<String>,

        /// OpenAI-compatible endpoint to save alongside
        #[arg(long)]
        base_url: Option<String>,

        /// Model name to save alongside
        #[arg(long)]
        model: Option<String>,
    },

    /// Remove the saved AI API key
    ClearKey,
}

/// Components shared by every platform command
struct App {
    config: AppConfig,
    store: Arc<SessionStore>,
    credentials: Arc<FileCredentialStore>,
    platform: Arc<Platform>,
    login: Arc<QrLogin>,
    cancel: CancelFlag,
}

impl App {
    async fn new(config: AppConfig) -> Result<Self> {
        let http = platform_client(config.platform.request_timeout)?;

        let store = Arc::new(SessionStore::new());
        if let Some(session) = session_from_env(|key| std::env::var(key).ok())? {
            tracing::info!("Using session from BILIBILI_COOKIE");
            store.replace(session).await;
        }

        let credentials = Arc::new(FileCredentialStore::default_location());
        let cancel = CancelFlag::new();
        let platform = Arc::new(Platform::new(
            Arc::new(BiliApi::new(http.clone())),
            store.clone(),
            config.platform.clone(),
            config.retry.clone(),
        ));
        let login = Arc::new(
            QrLogin::new(
                Arc::new(PassportApi::new(http)),
                credentials.clone(),
                config.auth.clone(),
            )
            .with_observer(Arc::new(print_login_state))
            .with_cancel(cancel.clone()),
        );

        Ok(Self {
            config,
            store,
            credentials,
            platform,
            login,
            cancel,
        })
    }

    async fn ensure_session(&self) -> Result<()> {
        ensure_session(&self.platform, self.credentials.as_ref(), self.login.as_ref()).await
    }
}

/// Execute the parsed command; the returned value is the process exit code
pub async fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            source,
            targets,
            fallback,
            workers,
            dry_run,
            yes,
            prompt,
        } => {
            let mut config = AppConfig::from_env()?;
            if let Some(workers) = workers {
                config.classifier.workers = workers;
            }
            if prompt.is_some() {
                config.classifier.prompt_template = prompt;
            }
            config.validate()?;
            let app = App::new(config).await?;
            run_organize(&app, source, targets, fallback, dry_run, yes).await
        }
        Commands::Collections => {
            let app = App::new(AppConfig::from_env()?).await?;
            app.ensure_session().await?;
            let collections = app.platform.list_collections().await?;
            print_collections(&collections);
            Ok(0)
        }
        Commands::Login => {
            let app = App::new(AppConfig::from_env()?).await?;
            let session = app.login.login(&app.store).await?;
            println!("Logged in as user {}", session.user_id);
            Ok(0)
        }
        Commands::Logout => {
            let credentials = FileCredentialStore::default_location();
            credentials.clear()?;
            println!("Saved session removed ({})", credentials.path().display());
            Ok(0)
        }
        Commands::SetKey {
            key,
            base_url,
            model,
        } => {
            let key = match key {
                Some(k) => k,
                None => read_line("AI API key: ").await?,
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(FavError::config("API key is empty"));
            }
            CredentialManager::store_api_key(key)?;

            if base_url.is_some() || model.is_some() {
                let path = AiSettings::default_path();
                let mut settings = AiSettings::load_file(&path)?.unwrap_or_default();
                if let Some(url) = base_url {
                    settings.base_url = url;
                }
                if let Some(model) = model {
                    settings.model_name = model;
                }
                // The key stays in the keychain only
                settings.api_key = String::new();
                settings.save_file(&path)?;
            }
            println!("API key saved");
            Ok(0)
        }
        Commands::ClearKey => {
            CredentialManager::delete_api_key()?;
            println!("API key removed");
            Ok(0)
        }
    }
}

async fn run_organize(
    app: &App,
    source: Option<String>,
    targets: Vec<String>,
    fallback: Option<String>,
    dry_run: bool,
    yes: bool,
) -> Result<i32> {
    let settings = AiSettings::resolve(&AiSettings::default_path())?;
    let workers = app.config.classifier.workers;
    let template = PromptTemplate::load(app.config.classifier.prompt_template.as_deref())?;
    let backend = OpenAiBackend::new(ai_client(AI_TIMEOUT, workers)?, settings);
    let classifier = Arc::new(Classifier::new(
        Arc::new(backend),
        template,
        app.config.classifier.clone(),
        app.config.retry.clone(),
    ));

    let (tx, rx) = unbounded_channel();
    let mut orchestrator = Orchestrator::new(
        app.platform.clone(),
        classifier,
        app.login.clone(),
        app.credentials.clone(),
        app.config.platform.move_interval,
    )
    .with_progress(ProgressSink::new(tx));
    if !yes && !dry_run {
        orchestrator = orchestrator.with_confirmation(Arc::new(StdinConfirm));
    }

    let cancel = app.cancel.clone();
    watch_ctrl_c(cancel.clone());

    orchestrator.ensure_session().await?;

    let (source, targets) = if source.is_none() || targets.is_empty() {
        let collections = app.platform.list_collections().await?;
        let source = match source {
            Some(s) => CollectionSelector::parse(&s),
            None => CollectionSelector::Id(pick_one(&collections, "Source collection").await?.id),
        };
        let targets = if targets.is_empty() {
            pick_many(&collections, "Target collections")
                .await?
                .into_iter()
                .map(|c| CollectionSelector::Id(c.id))
                .collect()
        } else {
            targets.iter().map(|t| CollectionSelector::parse(t)).collect()
        };
        (source, targets)
    } else {
        (
            CollectionSelector::parse(&source.unwrap_or_default()),
            targets.iter().map(|t| CollectionSelector::parse(t)).collect(),
        )
    };

    let request = RunRequest {
        source,
        targets,
        fallback: fallback
            .or_else(|| app.config.fallback_collection.clone())
            .map(|f| CollectionSelector::parse(&f)),
        dry_run,
    };

    let printer = tokio::spawn(print_progress(rx));
    let result = orchestrator.run(&request, &cancel).await;
    // Dropping the orchestrator closes the progress channel
    drop(orchestrator);
    let _ = printer.await;

    let report = result?;
    print_report(&report);
    Ok(if report.is_complete() { 0 } else { 1 })
}

/// First Ctrl-C cancels the run, a second one exits immediately
fn watch_ctrl_c(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("\nCancelling: finishing the current move, skipping the rest (Ctrl-C again to quit)");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted");
            std::process::exit(130);
        }
    });
}

/// Reads y/N from stdin after printing the plan
struct StdinConfirm;

#[async_trait]
impl MoveConfirmation for StdinConfirm {
    async fn confirm(&self, plan: &MovePlan) -> bool {
        println!("\nPlanned moves out of {:?}:", plan.source.title);
        for mv in &plan.moves {
            let marker = if mv.fallback { " (fallback)" } else { "" };
            println!("  {:<40} -> {}{}", truncate(&mv.title, 40), mv.target_title, marker);
        }
        println!("{} to move, {} left in place", plan.moves.len(), plan.skipped);

        match read_line(&format!("Proceed with {} moves? [y/N] ", plan.moves.len())).await {
            Ok(answer) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read confirmation");
                false
            }
        }
    }
}

async fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    tokio::task::spawn_blocking(|| -> Result<String> {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    })
    .await
    .map_err(|e| FavError::storage(format!("stdin reader failed: {}", e)))?
}

/// Parse "1, 3 4" style input into zero-based indices
fn parse_choices(input: &str, len: usize) -> Result<Vec<usize>> {
    let mut picked = Vec::new();
    for token in input.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        let n: usize = token
            .parse()
            .map_err(|_| FavError::config(format!("Not a number: {:?}", token)))?;
        if n == 0 || n > len {
            return Err(FavError::config(format!("Choice {} is out of range 1-{}", n, len)));
        }
        if !picked.contains(&(n - 1)) {
            picked.push(n - 1);
        }
    }
    Ok(picked)
}

async fn pick_one<'a>(collections: &'a [Collection], label: &str) -> Result<&'a Collection> {
    print_collections(collections);
    let choice = parse_choices(&read_line(&format!("{} number: ", label)).await?, collections.len())?;
    match choice.as_slice() {
        [index] => Ok(&collections[*index]),
        _ => Err(FavError::config("Pick exactly one collection")),
    }
}

async fn pick_many<'a>(collections: &'a [Collection], label: &str) -> Result<Vec<&'a Collection>> {
    let choices = parse_choices(
        &read_line(&format!("{} (numbers separated by commas): ", label)).await?,
        collections.len(),
    )?;
    if choices.is_empty() {
        return Err(FavError::config("At least one target collection is required"));
    }
    Ok(choices.into_iter().map(|i| &collections[i]).collect())
}

fn print_collections(collections: &[Collection]) {
    println!("{:>3}  {:>12}  {:>6}  Title", "#", "Id", "Items");
    for (n, c) in collections.iter().enumerate() {
        println!("{:>3}  {:>12}  {:>6}  {}", n + 1, c.id, c.item_count, c.title);
    }
}

fn print_login_state(state: &LoginState) {
    match state {
        LoginState::ChallengeIssued(challenge) => {
            eprintln!("Scan this QR code with the Bilibili app:\n");
            match render_qr(&challenge.url) {
                Some(qr) => eprintln!("{}", qr),
                None => tracing::warn!("Could not render the QR code"),
            }
            eprintln!("If it does not scan, turn this link into a QR code:\n  {}\n", challenge.url);
            eprintln!("Waiting for scan...");
        }
        LoginState::Polling { scanned: true, .. } => eprintln!("Scanned, confirm the login on your phone"),
        LoginState::Confirmed(_) => eprintln!("Login confirmed"),
        LoginState::Expired => eprintln!("The QR code expired"),
        LoginState::Rejected(reason) => eprintln!("Login rejected: {}", reason),
        LoginState::TimedOut => eprintln!("Gave up waiting for the scan"),
        LoginState::Idle | LoginState::Polling { .. } => {}
    }
}

/// Terminal QR code, light modules drawn as blocks for dark backgrounds
fn render_qr(payload: &str) -> Option<String> {
    let code = QrCode::new(payload.as_bytes()).ok()?;
    Some(
        code.render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .build(),
    )
}

async fn print_progress(mut rx: UnboundedReceiver<ProgressEvent>) {
    let mut total = 0;
    let mut classified = 0;
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::RunStarted { source, total: n } => {
                total = n;
                eprintln!("Classifying {} items from {:?}", n, source);
            }
            ProgressEvent::ItemStarted { .. } => {}
            ProgressEvent::ItemClassified { video_id, category } => {
                classified += 1;
                let category = category.as_deref().unwrap_or("-");
                eprintln!("[{}/{}] {} -> {}", classified, total, video_id, category);
            }
            ProgressEvent::ItemMoved { video_id, target } => {
                eprintln!("moved   {} -> {}", video_id, target)
            }
            ProgressEvent::ItemSkipped { video_id, reason } => {
                eprintln!("skipped {} ({})", video_id, reason)
            }
            ProgressEvent::ItemFailed { video_id, error } => {
                eprintln!("failed  {}: {}", video_id, error)
            }
            ProgressEvent::RunFinished { .. } => {}
        }
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("{:<14}  {:<13}  {:<40}  {:<20}  Reason", "Video", "Status", "Title", "Target");
    for o in &report.outcomes {
        println!(
            "{:<14}  {:<13}  {:<40}  {:<20}  {}",
            o.bvid,
            o.status.as_str(),
            truncate(&o.title, 40),
            truncate(o.target_title.as_deref().unwrap_or("-"), 20),
            o.reason.as_deref().unwrap_or("")
        );
    }

    let s = &report.summary;
    println!(
        "\n{} items: {} moved, {} skipped, {} failed, {} not attempted ({} unresolved)",
        s.total, s.moved, s.skipped, s.failed, s.not_attempted, s.unresolved
    );
    if report.cancelled {
        println!("Run was cancelled");
    }
    if let Some(reason) = &report.aborted {
        println!("Run aborted: {}", reason);
    }
    let failed = report
        .outcomes
        .iter()
        .filter(|o| o.status == MoveStatus::Failed)
        .count();
    if failed > 0 {
        println!("Re-run the same command to retry the {} failed items", failed);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
