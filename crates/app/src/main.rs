// Client vocal temps réel voice-relay
//
// Capture le micro, envoie l'audio au relais WebSocket et joue les réponses.
// Commandes clavier (suivies d'Entrée) :
// - r : démarrer / arrêter l'enregistrement
// - s : afficher l'état de la session
// - q : quitter (Ctrl+C fonctionne aussi)

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use audio::{CpalCapture, CpalOutputFactory};
use clap::Parser;
use network::WebSocketConnector;
use session::SessionController;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "voice-relay", version, about = "Client vocal temps réel via relais WebSocket")]
struct Cli {
    /// Fichier de configuration TOML
    #[arg(short, long, env = "VOICE_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// URL d'un relais déjà démarré (ws:// ou wss://)
    #[arg(long, env = "VOICE_RELAY_URL")]
    relay_url: Option<String>,

    /// URL du service de provisionnement du relais
    #[arg(long, env = "VOICE_RELAY_PROVISION_URL")]
    provision_url: Option<String>,

    /// Démarre l'enregistrement dès la connexion
    #[arg(long)]
    record: bool,

    /// Augmente la verbosité (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_overrides(cli.relay_url, cli.provision_url);

    let session_config = config.session_config();
    session_config.validate()?;

    let provisioner = config.provisioner()?;
    let capture = CpalCapture::new(session_config.audio.clone())?;

    let mut controller = SessionController::new(
        session_config,
        provisioner,
        Arc::new(WebSocketConnector),
        Box::new(capture),
        Arc::new(CpalOutputFactory),
    );

    println!("🎙️  voice-relay");
    println!("==============");
    println!("   r - démarrer / arrêter l'enregistrement");
    println!("   s - état de la session");
    println!("   q - quitter");

    let opened = if cli.record {
        controller.start_capture().await
    } else {
        controller.connect().await
    };
    if let Err(e) = opened {
        // La session reste utilisable : `r` retente la connexion
        println!("❌ {}", e);
    }
    print_status(&controller);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "r" | "R" => {
                        if let Err(e) = controller.toggle_capture().await {
                            println!("❌ {}", e);
                        }
                        print_status(&controller);
                    }
                    "s" | "S" => print_status(&controller),
                    "q" | "Q" => break,
                    "" => {}
                    other => println!("❓ Commande inconnue : {}", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            event = controller.next_event() => {
                if let Err(e) = controller.dispatch(event).await {
                    tracing::warn!("Événement non traité: {}", e);
                }
                if controller.state().is_terminal() {
                    print_status(&controller);
                }
            }
        }
    }

    controller.close().await;
    println!("👋 Au revoir !");
    Ok(())
}

/// Affiche l'état courant de la session
fn print_status(controller: &SessionController) {
    let stats = controller.stats();

    println!("\n📊 {} : {}", controller.state(), controller.status());
    if let Some(url) = controller.relay_url() {
        println!("   Relais : {} ({})", url, controller.transport_state().description());
    }
    println!(
        "   Frames envoyées : {} (perdues : {})",
        stats.frames_sent, stats.frames_dropped
    );
    println!(
        "   Réponses audio : {} (invalides : {}, erreurs service : {})",
        stats.deltas_received, stats.malformed_payloads, stats.service_errors
    );
    if let Some(playback) = controller.playback_status() {
        println!(
            "   Lecture : {} buffers planifiés, {} ignorés{}",
            playback.buffers_scheduled,
            playback.buffers_discarded,
            if playback.active { " 🔊" } else { "" }
        );
    }
}
