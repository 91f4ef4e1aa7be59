//! Follow a lesson step by step, checking each step against frames from a
//! directory that stands in for the camera.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stepcheck::hands::{DEFAULT_BURST_COUNT, FrameDirectory};
use stepcheck::session::{load_progress, save_progress};
use stepcheck::{Advance, Instruction, StaticToken, StepSession, VerifyClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "student", about = "Follow a lesson with camera-checked steps")]
struct Args {
    #[arg(
        long,
        env = "STEPCHECK_PROXY_URL",
        default_value = "http://127.0.0.1:8787/api/verify_step"
    )]
    proxy_url: String,

    #[arg(long, env = "STEPCHECK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Refuse to verify without a token.
    #[arg(long, default_value_t = false)]
    require_auth: bool,

    /// Lesson file: an instruction as JSON, or plain text with one step per line.
    #[arg(long)]
    lesson: PathBuf,

    /// Directory of .jpg/.png frames replayed as the camera.
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Capture a burst and send the best frame instead of a single shot.
    #[arg(long, default_value_t = false)]
    burst: bool,

    #[arg(long, default_value_t = DEFAULT_BURST_COUNT)]
    burst_count: usize,

    #[arg(long, default_value_t = 100)]
    burst_gap_ms: u64,

    #[arg(long, default_value_t = 12_000)]
    timeout_ms: u64,

    /// Where progress is saved. Defaults to the local data directory.
    #[arg(long)]
    progress: Option<PathBuf>,

    /// Only check that the proxy is reachable.
    #[arg(long, default_value_t = false)]
    ping: bool,
}

fn load_lesson(path: &Path) -> Result<Instruction> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading lesson {}", path.display()))?;

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        return serde_json::from_str(&text)
            .with_context(|| format!("parsing lesson {}", path.display()));
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("lesson")
        .to_string();
    Ok(Instruction {
        id: name.clone(),
        title: name,
        content: text,
    })
}

fn default_progress_path(instruction_id: &str) -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepcheck")
        .join(format!("{instruction_id}.json"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let args = Args::parse();

    let client = VerifyClient::new(args.proxy_url.clone())
        .with_timeout(Duration::from_millis(args.timeout_ms))
        .with_tokens(Arc::new(StaticToken(args.token.clone())))
        .require_auth(args.require_auth);

    if args.ping {
        let reply = client.ping().await?;
        println!("Proxy is up (model {}).", reply.model);
        return Ok(());
    }

    let instruction = load_lesson(&args.lesson)?;
    let frames_dir = args
        .frames
        .as_ref()
        .context("--frames is required unless --ping is given")?;
    let mut camera = FrameDirectory::open(frames_dir)
        .with_context(|| format!("opening frames directory {}", frames_dir.display()))?;
    if camera.is_empty() {
        anyhow::bail!("no .jpg or .png frames in {}", frames_dir.display());
    }

    let progress_path = args
        .progress
        .clone()
        .unwrap_or_else(|| default_progress_path(&instruction.id));
    let mut progress = load_progress(&progress_path, &instruction.id)?;
    let mut session = StepSession::resume(instruction.steps(), progress.current_step);

    info!(
        lesson = %instruction.id,
        steps = session.len(),
        frames = camera.len(),
        "Lesson loaded"
    );
    println!("{} ({} steps)", instruction.title, session.len());
    println!("Enter: verify current step   p: ping proxy   q: quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let index = session.current_index();
        let Some(step) = session.current_step().map(String::from) else {
            break;
        };
        println!("\nStep {}/{}: {}", index + 1, session.len(), step);

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "q" => break,
            "p" => {
                match client.ping().await {
                    Ok(reply) => println!("Proxy is up (model {}).", reply.model),
                    Err(e) => println!("Proxy unreachable: {}", e.user_message()),
                }
                continue;
            }
            _ => {}
        }

        let outcome = if args.burst {
            client
                .verify_burst(
                    &mut camera,
                    &step,
                    args.burst_count,
                    Duration::from_millis(args.burst_gap_ms),
                )
                .await
        } else {
            client.verify_single(&mut camera, &step).await
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Verification failed");
                println!("{}", e.user_message());
                continue;
            }
        };

        println!(
            "Confidence {:.0}%: {}",
            result.confidence * 100.0,
            result.feedback
        );

        let advance = session.apply(&result);
        progress.record(index, &result, advance);
        if let Err(e) = save_progress(&progress_path, &progress) {
            warn!(error = %e, path = %progress_path.display(), "Could not save progress");
        }

        match advance {
            Advance::Moved { .. } => println!("Step complete."),
            Advance::Finished => {
                println!("All steps completed!");
                break;
            }
            Advance::Stay => println!("Not yet. Try again."),
        }
    }

    Ok(())
}
