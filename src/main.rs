use anyhow::Result;
use log::{info, LevelFilter};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use frigate_event_processor::config::{self, AppConfig, LoggingConfig};
use frigate_event_processor::engine::{AdmissionEngine, Clock, EngineMsg, RuleSet};
use frigate_event_processor::frigate::FrigateClient;
use frigate_event_processor::messaging::{self, MqttAlertSink};

fn init_logging(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if config.path.is_some() {
        info!("Log file handling is delegated to the supervisor; writing to stderr");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "./config.yaml".to_string());

    let config = match config::load_config(Path::new(&path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {:#}", path, e);
            std::process::exit(2);
        }
    };

    init_logging(&config.logging);
    info!("Configuration loaded from {}", path);

    if let Err(e) = run_app(config).await {
        log::error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_app(config: AppConfig) -> Result<()> {
    let (client, eventloop) = messaging::connect(&config.mqtt);
    let (tx, rx) = mpsc::channel::<EngineMsg>(256);

    let sink = Arc::new(MqttAlertSink::new(
        client.clone(),
        config.mqtt.alert_topic.clone(),
    ));
    let checker = if config.frigate.verify_artifacts {
        Some(Arc::new(FrigateClient::new(&config.frigate)?))
    } else {
        None
    };

    let rules = RuleSet::from_config(&config);
    info!(
        "Admission rules cover {} cameras; alerts publish to {}",
        config.alerts.iter().filter(|a| a.enabled).count(),
        config.mqtt.alert_topic
    );

    let engine = AdmissionEngine::new(
        rules,
        config.frigate.api_base_url(),
        Clock::new(),
        sink,
        checker,
        tx.clone(),
    );
    let engine_task = tokio::spawn(engine.run(rx));

    let ingress_task = tokio::spawn(messaging::run_ingress(
        client.clone(),
        eventloop,
        config.mqtt.clone(),
        tx.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    messaging::announce_offline(&client, &config.mqtt).await;
    ingress_task.abort();
    let _ = tx.send(EngineMsg::Shutdown).await;
    let _ = engine_task.await;

    info!("Disconnected.");
    Ok(())
}
