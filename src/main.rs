use agent_voice_rs::{
    agent::{AgentTemplate, VoiceStyles},
    cli::{self, TalkOptions},
    config::{load_config, AppConfig},
    connector::SseConnectorFactory,
    http_server,
    lifecycle::{ConnectorLifecycleManager, LifecycleConfig},
    pipeline::{HostedPipelineConfig, HostedVoicePipeline},
    relay::RequestHandler,
    ws_server::WsServer,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the agent over WebSocket and HTTP
    Serve {
        /// WebSocket bind address
        #[arg(long, default_value = "0.0.0.0:5001")]
        ws_address: String,

        /// HTTP bind address
        #[arg(long, default_value = "0.0.0.0:5002")]
        http_address: String,
    },
    /// Talk to the agent from the terminal
    Talk {
        /// Audio file to send instead of recording from the microphone
        #[arg(long)]
        input: Option<PathBuf>,

        /// WAV file to write the reply to instead of playing it
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn build_manager(config: &AppConfig) -> Arc<ConnectorLifecycleManager> {
    Arc::new(ConnectorLifecycleManager::new(
        LifecycleConfig {
            endpoint_url: config.connector_url.clone(),
            connect_timeout: config.connect_timeout,
        },
        AgentTemplate::voice_assistant(&config.model),
        Arc::new(SseConnectorFactory::new("MCP Server")),
    ))
}

async fn serve(config: AppConfig, ws_address: &str, http_address: &str) -> Result<()> {
    let manager = build_manager(&config);
    let pipeline = HostedVoicePipeline::new(HostedPipelineConfig::from_app_config(&config))
        .context("Failed to create voice pipeline")?;
    let handler = Arc::new(RequestHandler::new(Arc::clone(&manager), Arc::new(pipeline)));

    if !manager.refresh().await {
        log::warn!("⚠️  Agent failed to initialize, clients will trigger a retry");
    }

    let shutdown = CancellationToken::new();
    let ws = WsServer::new(Arc::clone(&handler), shutdown.clone());
    let ws_listener = ws.bind(ws_address).await?;
    let http_listener = TcpListener::bind(http_address)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", http_address))?;

    let ws_task = tokio::spawn(async move { ws.serve(ws_listener).await });
    let http_task = tokio::spawn(http_server::serve(
        http_listener,
        Arc::clone(&handler),
        shutdown.clone(),
    ));

    println!("🚀 Serving on ws://{} and http://{}", ws_address, http_address);
    println!("   Press Ctrl+C to exit");

    tokio::signal::ctrl_c().await?;
    log::info!("🛑 Received shutdown signal");
    shutdown.cancel();

    for (name, task) in [("WebSocket", ws_task), ("HTTP", http_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("{} server error: {}", name, e),
            Err(e) => log::error!("{} server task failed: {}", name, e),
        }
    }

    manager.shutdown().await;
    log::info!("✅ Cleanup complete");
    Ok(())
}

async fn talk(config: AppConfig, options: TalkOptions) -> Result<()> {
    let manager = build_manager(&config);
    let pipeline = HostedVoicePipeline::new(
        HostedPipelineConfig::from_app_config(&config)
            .with_tts_instructions(VoiceStyles::upbeat_guide()),
    )
    .context("Failed to create voice pipeline")?;
    let handler = Arc::new(RequestHandler::new(Arc::clone(&manager), Arc::new(pipeline)));

    manager.refresh().await;

    let result = tokio::select! {
        result = cli::run(handler, options) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted.");
            Ok(())
        }
    };

    manager.shutdown().await;
    log::info!("✅ Cleanup complete");
    result.context("Terminal session failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("🚀 Initializing agent-voice-rs");

    let args = Args::parse();
    let config = load_config().context("Failed to load configuration")?;

    match args.command {
        Command::Serve {
            ws_address,
            http_address,
        } => serve(config, &ws_address, &http_address).await,
        Command::Talk { input, output } => talk(config, TalkOptions { input, output }).await,
    }
}
