#![allow(missing_docs)]

//! Armitage — sales-qualification conversational agent.
//!
//! Single binary: serves the web chat HTTP endpoint, consumes WhatsApp
//! events from the gateway sidecar, and runs the periodic reconciliation
//! and follow-up jobs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use url::Url;

use armitage::agent::{Orchestrator, OrchestratorDeps, TurnRequest};
use armitage::agent::breaker::DegradedModeBreaker;
use armitage::agent::ratelimit::RateLimiter;
use armitage::calendar::{CalendarProvider, HttpCalendarProvider};
use armitage::config::{load_config_or_default, Config};
use armitage::gateway::{
    spawn_event_listener, GatewayEvent, HttpMessagingGateway, MessagingGateway,
};
use armitage::knowledge::KnowledgeClient;
use armitage::logging;
use armitage::prompts::PromptLibrary;
use armitage::providers;
use armitage::scheduling::jobs::{run_jobs, JobsDeps};
use armitage::scheduling::reconciler::CalendarReconciler;
use armitage::scheduling::reservation::ReservationManager;
use armitage::server::{self, AppState};
use armitage::store::{Channel, Store};
use armitage::tools::{build_registry, RegistryDeps};

/// Buffer size of the gateway event channel.
const GATEWAY_CHANNEL_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "armitage", version, about = "Sales-qualification conversational agent")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent service (default).
    Start,
    /// Validate the configuration and exit.
    CheckConfig,
    /// Seed weekday business-hour slots into the database.
    SeedSlots {
        /// How many days ahead to seed.
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config =
        load_config_or_default(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => start(config).await,
        Command::CheckConfig => check_config(&config),
        Command::SeedSlots { days } => seed_slots(&config, days).await,
    }
}

/// Run the full service until a shutdown signal arrives.
async fn start(config: Config) -> anyhow::Result<()> {
    let _logging_guard = logging::init_production(&config.service.logs_dir)?;
    info!(version = env!("CARGO_PKG_VERSION"), "armitage starting");

    let store = Arc::new(
        Store::connect(&config.service.db_path)
            .await
            .context("failed to open database")?,
    );

    let prompts = PromptLibrary::new(config.service.prompts_dir.clone())
        .context("failed to initialise prompt library")?;

    let provider = providers::from_config(&config.llm).context("failed to build LLM provider")?;
    info!(model = provider.model_id(), "LLM provider ready");

    let calendar_client = HttpCalendarProvider::new(config.calendar.base_url.clone());
    if let Err(e) = calendar_client.wait_healthy().await {
        warn!(error = %e, "calendar bridge not healthy, bookings will miss external events");
    }
    let calendar: Arc<dyn CalendarProvider> = Arc::new(calendar_client);

    let gateway_client = HttpMessagingGateway::new(config.gateway.base_url.clone());
    if config.gateway.enabled {
        if let Err(e) = gateway_client.wait_healthy().await {
            warn!(error = %e, "messaging bridge not healthy, outbound delivery may fail");
        }
    }
    let gateway: Arc<dyn MessagingGateway> = Arc::new(gateway_client);

    let knowledge = Arc::new(KnowledgeClient::new(&config.knowledge));

    let reservations = Arc::new(ReservationManager::new(
        Arc::clone(&store),
        Arc::clone(&calendar),
        config.booking.clone(),
        config.business.clone(),
    ));
    let reconciler = Arc::new(CalendarReconciler::new(
        Arc::clone(&store),
        Arc::clone(&calendar),
        config.calendar.reconcile_window_days,
        config.booking.slot_duration_minutes,
    ));

    let registry = build_registry(RegistryDeps {
        store: Arc::clone(&store),
        reservations: Arc::clone(&reservations),
        gateway: Arc::clone(&gateway),
        knowledge,
        bant: config.bant.clone(),
        business: config.business.clone(),
        gateway_config: config.gateway.clone(),
    });
    registry.validate_catalogs()?;
    let registry = Arc::new(registry);

    let breaker = Arc::new(DegradedModeBreaker::new(&config.breaker));
    let limiter = Arc::new(RateLimiter::new(3600, config.limits.hourly_message_limit));

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorDeps {
            store: Arc::clone(&store),
            provider,
            registry,
            prompts,
            breaker,
            limiter,
        },
        &config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let jobs_handle = tokio::spawn(run_jobs(
        JobsDeps {
            store: Arc::clone(&store),
            gateway: Arc::clone(&gateway),
            reconciler,
            config: config.jobs.clone(),
        },
        shutdown_rx.clone(),
    ));

    let whatsapp_handle = if config.gateway.enabled {
        Some(spawn_whatsapp_loop(
            config.gateway.base_url.clone(),
            Arc::clone(&orchestrator),
            Arc::clone(&gateway),
            shutdown_rx.clone(),
        ))
    } else {
        info!("gateway disabled, WhatsApp loop not started");
        None
    };

    let app_state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        store: Arc::clone(&store),
    };
    info!("armitage ready");

    tokio::select! {
        result = server::serve(&config.service.host, config.service.port, app_state, shutdown_rx) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Flip the flag and give background tasks a bounded window to finish.
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(config.service.shutdown_grace_secs);
    let drain = async {
        if let Err(e) = jobs_handle.await {
            warn!(error = %e, "job runner did not join cleanly");
        }
        if let Some(handle) = whatsapp_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "WhatsApp loop did not join cleanly");
            }
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "background tasks exceeded shutdown grace");
    }

    drop(orchestrator);
    drop(gateway);
    drop(reservations);
    match Arc::try_unwrap(store) {
        Ok(store) => store.shutdown().await,
        Err(_) => warn!("store still shared at shutdown, skipping writer drain"),
    }

    info!("armitage stopped");
    Ok(())
}

/// Consume gateway events, handle each inbound message as a turn, and send
/// the reply back through the gateway.
fn spawn_whatsapp_loop(
    base_url: String,
    orchestrator: Arc<Orchestrator>,
    gateway: Arc<dyn MessagingGateway>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (event_tx, mut event_rx) = mpsc::channel::<GatewayEvent>(GATEWAY_CHANNEL_CAPACITY);
        let listener = spawn_event_listener(base_url, event_tx);

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        info!("gateway event channel closed");
                        break;
                    };
                    handle_gateway_event(event, &orchestrator, gateway.as_ref()).await;
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("WhatsApp loop shutting down");
                        break;
                    }
                }
            }
        }

        listener.abort();
    })
}

async fn handle_gateway_event(
    event: GatewayEvent,
    orchestrator: &Orchestrator,
    gateway: &dyn MessagingGateway,
) {
    match event {
        GatewayEvent::Message {
            contact,
            text,
            message_id,
            from_me,
        } => {
            // Messages we sent from another device echo back; skip them.
            if from_me || text.trim().is_empty() {
                return;
            }
            if let Some(id) = &message_id {
                tracing::debug!(message_id = %id, contact = %contact, "gateway message");
            }

            let request = TurnRequest {
                channel: Channel::Whatsapp,
                contact_handle: contact.clone(),
                message_text: text,
                conversation_id: None,
            };
            match orchestrator.handle_turn(request).await {
                Ok(outcome) => {
                    if let Some(reply) = outcome.reply {
                        if let Err(e) = gateway.send_text(&contact, &reply).await {
                            warn!(contact = %contact, error = %e, "reply delivery failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(contact = %contact, error = %e, "turn failed for gateway message");
                }
            }
        }
        GatewayEvent::Connected => info!("gateway connected"),
        GatewayEvent::Disconnected { reason } => {
            warn!(reason = reason.as_deref().unwrap_or("unknown"), "gateway disconnected");
        }
    }
}

/// Validate configuration, prompts, and the provider setup, then exit.
fn check_config(config: &Config) -> anyhow::Result<()> {
    logging::init_cli();

    PromptLibrary::new_without_watcher(config.service.prompts_dir.clone())
        .context("prompts directory is not readable")?;

    for (name, base_url) in [
        ("gateway", &config.gateway.base_url),
        ("calendar", &config.calendar.base_url),
        ("knowledge", &config.knowledge.base_url),
    ] {
        Url::parse(base_url)
            .with_context(|| format!("{name} base_url is not a valid URL: {base_url}"))?;
    }

    match providers::from_config(&config.llm) {
        Ok(provider) => println!("llm: {} ready", provider.model_id()),
        Err(e) => println!("llm: NOT ready ({e})"),
    }

    println!("service: {}:{}", config.service.host, config.service.port);
    println!("database: {}", config.service.db_path.display());
    println!(
        "gateway: {} ({})",
        config.gateway.base_url,
        if config.gateway.enabled { "enabled" } else { "disabled" }
    );
    println!("calendar: {}", config.calendar.base_url);
    println!("knowledge: {}", config.knowledge.base_url);
    println!("configuration OK");
    Ok(())
}

/// Seed weekday business-hour slots for the next `days` days.
async fn seed_slots(config: &Config, days: u32) -> anyhow::Result<()> {
    logging::init_cli();

    let store = Store::connect(&config.service.db_path)
        .await
        .context("failed to open database")?;
    let today = Utc::now().date_naive();
    let created = store
        .seed_weekday_slots(today, days, config.booking.slot_duration_minutes)
        .await?;
    println!("created {created} slots over the next {days} days");
    store.shutdown().await;
    Ok(())
}
