use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use facetalk_core::config::Config;
use facetalk_core::types::{AvatarVariant, Voice};
use facetalk_pipeline::cache::{HttpBlobCache, MediaCache, NullCache};
use facetalk_pipeline::queue::LocalRenderQueue;
use facetalk_pipeline::{Pipeline, PipelineBuilder, StageTimeouts};
use facetalk_providers::did::DidRenderer;
use facetalk_providers::null::{NullGenerator, NullRenderer, NullSynthesizer, NullTranscriber};
use facetalk_providers::openai::OpenAiClient;
use facetalk_providers::{AvatarRenderer, ResponseGenerator, SpeechSynthesizer, Transcriber};

#[derive(Parser)]
#[command(
    name = "facetalk",
    about = "Real-time talking-avatar chat server — speech in, avatar video out",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, default_value = "facetalk.json")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one text exchange through the pipeline and print the result
    Ask {
        /// Text to send
        text: String,

        /// User id for conversation history
        #[arg(long, default_value = "cli_user")]
        user_id: String,

        /// Avatar to animate (female | male)
        #[arg(long)]
        avatar: Option<AvatarVariant>,

        /// Synthesis voice
        #[arg(long)]
        voice: Option<Voice>,
    },

    /// Query a running server's health endpoint
    Status {
        /// Server base URL (default: from config port)
        #[arg(long)]
        url: Option<String>,
    },
}

/// Wire providers out of the config, substituting null variants where
/// credentials are missing.
fn build_pipeline(config: &Config) -> Pipeline {
    let timeouts = StageTimeouts::from(&config.timeouts());

    let openai = config.openai.as_ref().and_then(OpenAiClient::from_config);
    let (transcriber, generator, synthesizer): (
        Arc<dyn Transcriber>,
        Arc<dyn ResponseGenerator>,
        Arc<dyn SpeechSynthesizer>,
    ) = match openai {
        Some(client) => {
            let client = Arc::new(client);
            (client.clone(), client.clone(), client)
        }
        None => {
            tracing::warn!("OpenAI not configured; speech and chat will be unavailable");
            (
                Arc::new(NullTranscriber),
                Arc::new(NullGenerator),
                Arc::new(NullSynthesizer),
            )
        }
    };

    let renderer: Arc<dyn AvatarRenderer> =
        match config.render.as_ref().and_then(DidRenderer::from_config) {
            Some(renderer) => Arc::new(renderer),
            None => {
                tracing::warn!("Avatar rendering not configured; serving placeholder videos");
                Arc::new(NullRenderer)
            }
        };

    let cache: Arc<dyn MediaCache> =
        match config.storage.as_ref().and_then(HttpBlobCache::from_config) {
            Some(cache) => Arc::new(cache),
            None => {
                tracing::info!("Blob storage not configured; media served from origin URLs");
                Arc::new(NullCache)
            }
        };

    let mut builder =
        PipelineBuilder::new(transcriber, generator, synthesizer, renderer.clone(), cache)
            .timeouts(timeouts);

    if let Some(queue_config) = &config.queue {
        if queue_config.enabled {
            tracing::info!(workers = queue_config.workers, "Render offload enabled");
            builder = builder.queue(LocalRenderQueue::spawn(
                renderer,
                timeouts,
                queue_config.workers,
            ));
        }
    }

    builder.build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = Config::load(std::path::Path::new(&cli.config))?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let bind = config.gateway_bind();

            let pipeline = Arc::new(build_pipeline(&config));
            let state = Arc::new(facetalk_gateway::GatewayState::new(pipeline));

            tracing::info!("Starting FaceTalk gateway on {bind}:{port}");
            facetalk_gateway::start_gateway(state, &bind, port).await?;
        }
        Commands::Ask {
            text,
            user_id,
            avatar,
            voice,
        } => {
            let pipeline = build_pipeline(&config);
            let cancel = CancellationToken::new();
            let result = pipeline
                .process_text(
                    &text,
                    &user_id,
                    avatar.unwrap_or_default(),
                    voice.unwrap_or_default(),
                    &cancel,
                )
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Status { url } => {
            let base = url.unwrap_or_else(|| format!("http://127.0.0.1:{}", config.gateway_port()));
            let health: serde_json::Value =
                reqwest::get(format!("{base}/health")).await?.json().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }

    Ok(())
}
