use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use caption_server::{
    gemini::{GeminiClient, DEFAULT_BASE_URL, DEFAULT_MODEL},
    prompt::PromptTemplate,
    server::{self, AppState},
    tracing_utils::init_logging,
};
use clap::Parser;
use tracing::{info, warn};

/// App Configuration
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(default_value = "5000", long, short, env)]
    port: u16,
    #[clap(default_value = "uploads", long, env)]
    upload_dir: PathBuf,
    #[clap(long, env, hide_env_values = true)]
    gemini_api_key: Option<String>,
    #[clap(default_value = DEFAULT_MODEL, long, env)]
    gemini_model: String,
    #[clap(default_value = DEFAULT_BASE_URL, long, env)]
    gemini_base_url: String,
    #[clap(long, env)]
    upstream_timeout_secs: Option<u64>,
    #[clap(default_value = "16777216", long, env)]
    max_upload_bytes: usize,
    #[clap(long, env)]
    prompt_template_path: Option<PathBuf>,
    #[clap(long, env)]
    json_output: bool,
    #[clap(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
    #[clap(long, env = "OTEL_SERVICE_NAME", default_value = "caption-server")]
    otlp_service_name: String,
}

fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();
    //Get args
    let args = Args::parse();

    // Launch Tokio runtime
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let http_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), args.port);

            init_logging(args.otlp_service_name, args.json_output, args.otlp_endpoint);

            if args.gemini_api_key.is_none() {
                warn!("GEMINI_API_KEY is not set; generation requests will fail to authenticate");
            }
            let prompt_template = PromptTemplate::load(args.prompt_template_path)?;
            let generator = GeminiClient::new(
                args.gemini_base_url,
                args.gemini_model,
                args.gemini_api_key,
                args.upstream_timeout_secs.map(Duration::from_secs),
            )?;
            info!("Using generation model [{}]", generator.model());

            let state = AppState::new(Arc::new(generator), prompt_template, args.upload_dir);
            server::run(http_addr, state, args.max_upload_bytes).await?;

            Ok::<(), anyhow::Error>(())
        })
}
