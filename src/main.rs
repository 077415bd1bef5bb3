use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use turnstile::batch::{Batcher, EmbedProcessor};
use turnstile::cache::{InMemoryCacheStore, ResponseCache};
use turnstile::config::AppConfig;
use turnstile::executor::{CallOptions, RequestExecutor};
use turnstile::ledger::InMemoryUsageStore;
use turnstile::provider::{GenerateRequest, GoogleBackend};
use turnstile::quota::{QuotaGuard, StaticResolver};
use turnstile::service::AiService;
use turnstile::tier::{self, MembershipTier};

#[derive(Parser)]
#[command(name = "turnstile", version, about = "Cost-bounded generative-AI client")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one generation through the full pipeline
    Generate(GenerateArgs),
    /// Embed inputs, batched into a single upstream call per window
    Embed(EmbedArgs),
    /// Print the membership tier limit table
    Tiers,
}

#[derive(Args)]
struct GenerateArgs {
    /// Prompt text
    prompt: String,

    /// Model id (defaults to the configured model)
    #[arg(short, long)]
    model: Option<String>,

    /// System instruction
    #[arg(long)]
    system: Option<String>,

    /// Stream tokens as they arrive
    #[arg(long)]
    stream: bool,

    /// Account to meter against
    #[arg(long, default_value = "cli-user")]
    user: String,

    /// Membership tier: free, pro, or enterprise
    #[arg(long, default_value = "free")]
    tier: String,

    /// Estimated cost of this generation in cents
    #[arg(long, default_value_t = 1)]
    cost_cents: u64,

    /// Overall deadline in seconds, covering retries
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args)]
struct EmbedArgs {
    /// Texts to embed
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Embedding model id
    #[arg(short, long, default_value = "text-embedding-004")]
    model: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?.with_env_overrides();
    config.validate()?;

    match cli.command {
        Commands::Generate(args) => {
            turnstile::logging::init_tracing(&config.logging)
                .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
            generate(&config, args).await
        }
        Commands::Embed(args) => {
            turnstile::logging::init_tracing(&config.logging)
                .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
            embed(&config, args).await
        }
        Commands::Tiers => {
            print_tiers();
            Ok(())
        }
    }
}

async fn generate(config: &AppConfig, args: GenerateArgs) -> anyhow::Result<()> {
    let api_key = config
        .provider
        .api_key
        .clone()
        .context("no API key configured; set TURNSTILE_API_KEY")?;

    let backend = Arc::new(GoogleBackend::new(
        &config.provider.base_url,
        api_key,
        Arc::new(reqwest::Client::new()),
        Duration::from_secs(config.provider.request_timeout_secs),
    ));

    let cache = if config.cache.enabled {
        ResponseCache::new(
            Arc::new(InMemoryCacheStore::new(config.cache.max_entries)),
            Duration::from_secs(config.cache.ttl_secs),
        )
    } else {
        ResponseCache::disabled()
    };

    let quota = Arc::new(QuotaGuard::new(
        Arc::new(InMemoryUsageStore::new()),
        Arc::new(StaticResolver::new(
            &args.user,
            MembershipTier::from_plan(&args.tier),
        )),
    ));

    let service = AiService::new(
        backend,
        RequestExecutor::new(config.retry.policy()),
        cache,
        quota,
    );

    let model = args
        .model
        .unwrap_or_else(|| config.provider.default_model.clone());
    let mut request = GenerateRequest::from_prompt(model, &args.prompt);
    request.system_instruction = args.system;

    let options = CallOptions {
        timeout: args.timeout_secs.map(Duration::from_secs),
        ..Default::default()
    };

    if args.stream {
        let mut stream = service
            .generate_stream(&request, args.cost_cents, &options)
            .await?;
        let mut stdout = std::io::stdout();
        while let Some(chunk) = stream.next().await {
            write!(stdout, "{}", chunk.text)?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
    } else {
        let response = service
            .generate(&request, args.cost_cents, &options)
            .await?;
        println!("{}", response.text());
    }

    Ok(())
}

async fn embed(config: &AppConfig, args: EmbedArgs) -> anyhow::Result<()> {
    let api_key = config
        .provider
        .api_key
        .clone()
        .context("no API key configured; set TURNSTILE_API_KEY")?;

    let backend = Arc::new(GoogleBackend::new(
        &config.provider.base_url,
        api_key,
        Arc::new(reqwest::Client::new()),
        Duration::from_secs(config.provider.request_timeout_secs),
    ));

    let batcher = Batcher::new(
        Arc::new(EmbedProcessor::new(backend, args.model)),
        config.batch.window(),
    );

    let mut handles = Vec::new();
    for input in args.inputs {
        let batcher = batcher.clone();
        handles.push((input.clone(), tokio::spawn(async move {
            batcher.submit(input).await
        })));
    }
    for (input, handle) in handles {
        let embedding = handle.await??;
        println!("{}\t{}", input, serde_json::to_string(&embedding)?);
    }

    Ok(())
}

fn print_tiers() {
    fn count(limit: Option<u32>) -> String {
        limit.map_or_else(|| "unlimited".to_string(), |n| n.to_string())
    }

    for tier in [
        MembershipTier::Free,
        MembershipTier::Pro,
        MembershipTier::Enterprise,
    ] {
        let limits = tier::limits(tier);
        println!("{}", tier.display_name());
        println!("  videos/day:     {}", count(limits.max_videos_per_day));
        println!("  images/day:     {}", count(limits.max_images_per_day));
        println!("  projects:       {}", count(limits.max_projects));
        println!(
            "  max video:      {}",
            tier::format_duration(limits.max_video_duration_secs)
        );
        println!(
            "  daily budget:   ${:.2}",
            limits.daily_spend_limit_cents as f64 / 100.0
        );
        println!();
    }
}
