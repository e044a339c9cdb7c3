use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use nano_slots::logging::{self, LogFormat};
use nano_slots::{
    CompletionRequest, ContextConfig, ReplayBackend, SlotContext, SlotWorker, TokenEncoder,
};

#[derive(Parser, Debug)]
#[command(name = "nano-slots")]
#[command(about = "Run concurrent completions over a fixed pool of sequence slots")]
struct Args {
    /// JSON context configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Total sequences the KV cache was sized for
    #[arg(long)]
    n_seq_max: Option<usize>,

    /// Sequences reserved for cache use
    #[arg(long)]
    cache_seq: Option<usize>,

    /// Chat template name (vicuna and deepseek carry an antiprompt)
    #[arg(long)]
    chat_template: Option<String>,

    /// Number of concurrent requests
    #[arg(short, long, default_value = "8")]
    requests: u64,

    /// Maximum tokens to generate per request
    #[arg(long, default_value = "64")]
    max_tokens: usize,

    /// Text every slot generates
    #[arg(long, default_value = "Sure, here it is. ASSISTANT: more")]
    script: String,

    /// Simulated latency per decode step, in milliseconds
    #[arg(long, default_value = "5")]
    step_ms: u64,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let format = if args.json {
        LogFormat::Json
    } else {
        LogFormat::from_env()
    };
    logging::init(&args.log_level, format);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Chat template used when neither the config file nor the flag names one.
const DEFAULT_CHAT_TEMPLATE: &str = "vicuna";

/// Load the config file, then apply command-line overrides.
fn load_config(args: &Args) -> nano_slots::Result<ContextConfig> {
    let mut config = match &args.config {
        Some(path) => ContextConfig::from_json_file(path)?,
        None => ContextConfig::default(),
    };
    if let Some(n_seq_max) = args.n_seq_max {
        config.n_seq_max = n_seq_max;
    }
    if let Some(cache_seq) = args.cache_seq {
        config.cache_seq = cache_seq;
    }
    if let Some(chat_template) = &args.chat_template {
        config.chat_template = Some(chat_template.clone());
    }
    if config.chat_template.is_none() {
        config.chat_template = Some(DEFAULT_CHAT_TEMPLATE.to_string());
    }
    Ok(config)
}

fn run(args: &Args) -> nano_slots::Result<()> {
    let config = load_config(args)?;

    let backend = ReplayBackend::from_text(&args.script)
        .with_step_delay(Duration::from_millis(args.step_ms));
    let ctx = SlotContext::bootstrap(config, &backend, None)?;
    let scheduler = ctx.scheduler();

    info!(
        slots = ctx.n_seq_max(),
        requests = args.requests,
        template = ctx.chat_template(),
        "starting"
    );

    thread::scope(|s| {
        for request_id in 0..args.requests {
            let mut worker = SlotWorker::new(scheduler.clone(), backend.clone());
            s.spawn(move || {
                let mut rng = rand::rngs::StdRng::seed_from_u64(request_id);
                let prompt = match backend_prompt(&worker, request_id) {
                    Ok(prompt) => prompt,
                    Err(e) => {
                        error!(request_id, "tokenize failed: {e}");
                        return;
                    }
                };
                let request = CompletionRequest::new(request_id, prompt).max_tokens(args.max_tokens);

                loop {
                    match worker.run(request.clone()) {
                        Ok(completion) => {
                            info!(
                                request_id,
                                slot = completion.slot,
                                finish_reason = ?completion.finish_reason,
                                text = %completion.text,
                                "completed"
                            );
                            break;
                        }
                        Err(e) if e.is_retryable() => {
                            thread::sleep(Duration::from_millis(rng.gen_range(5..25)));
                        }
                        Err(e) => {
                            error!(request_id, "completion failed: {e}");
                            break;
                        }
                    }
                }
            });
        }
    });

    let snapshots = serde_json::to_string_pretty(&scheduler.snapshots())?;
    println!("{snapshots}");
    Ok(())
}

fn backend_prompt(
    worker: &SlotWorker<ReplayBackend>,
    request_id: u64,
) -> nano_slots::Result<Vec<u32>> {
    worker.backend().encode(&format!("USER: request {request_id}\n"))
}
