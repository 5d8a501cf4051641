use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use dlbridge_core::engine::http::{HttpEngine, HttpEngineConfig};
use dlbridge_core::engine::DownloadEngine;
use dlbridge_core::{BridgeError, DownloadScreen, EngineError, ScreenConfig, ScreenHandle};

mod paths;
mod prompt_authorizer;
mod terminal_renderer;

use prompt_authorizer::{PermissionMode, PromptAuthorizer};
use terminal_renderer::TerminalRenderer;

/// Extras key removed by the `d` command.
const DELETE_KEY: &str = "testBoolean";

const STATE_FILE: &str = "dlbridge-state.json";

#[derive(Parser)]
#[command(name = "dlbridge", about = "Single download screen for the terminal")]
struct Args {
    /// URL to download
    #[arg(short, long, default_value = "https://proof.ovh.net/files/1Mb.dat")]
    url: String,

    /// Download directory (default: $DLBRIDGE_DOWNLOAD_DIR, then ~/Downloads/dlbridge)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Tag attached to the download; repeatable
    #[arg(short, long = "tag", default_value = "bookmark-1")]
    tags: Vec<String>,

    /// Treat the storage permission as already granted
    #[arg(long, conflicts_with = "deny")]
    grant: bool,

    /// Refuse the storage permission when asked
    #[arg(long)]
    deny: bool,
}

impl Args {
    fn permission_mode(&self) -> PermissionMode {
        if self.grant {
            PermissionMode::Grant
        } else if self.deny {
            PermissionMode::Deny
        } else {
            PermissionMode::Prompt
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("dlbridge: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), EngineError> {
    let mode = args.permission_mode();
    let dir = paths::download_dir(args.output_dir);
    let destination = paths::destination_for(&dir, &args.url);

    let engine = Arc::new(HttpEngine::open(HttpEngineConfig::default().with_state_path(dir.join(STATE_FILE))).await?);
    let authorizer = Arc::new(PromptAuthorizer::new(mode));
    let renderer = Arc::new(TerminalRenderer::new());

    let config = ScreenConfig::new(&args.url, destination.to_string_lossy()).with_tags(args.tags);
    let (screen, handle) = DownloadScreen::new(config, engine.clone(), authorizer.clone(), renderer.clone());

    renderer.println(format!("Downloading {} -> {}", args.url, destination.display()));
    renderer.println("Commands: r = retry, d = delete extra, h = hide, s = show, q = quit");
    let screen_task = tokio::spawn(screen.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match dispatch(line.trim(), &handle, &authorizer, &renderer) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        log::error!("[cli] {}", e);
                        break;
                    }
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    log::warn!("[cli] stdin unreadable: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    let _ = handle.teardown();
    match screen_task.await {
        Ok(outcome) => {
            if let Some(session) = outcome.tracked {
                log::info!("[cli] left session {} in state {:?}", session.id, session.status);
            }
        }
        Err(e) => log::error!("[cli] screen task failed: {}", e),
    }
    renderer.finish();
    engine.close().await;
    Ok(())
}

/// Returns Ok(false) when the user asked to quit.
fn dispatch(
    command: &str,
    handle: &ScreenHandle,
    authorizer: &PromptAuthorizer,
    renderer: &TerminalRenderer,
) -> Result<bool, BridgeError> {
    if authorizer.answer(command) {
        return Ok(true);
    }
    match command {
        "r" | "retry" => handle.retry()?,
        "d" | "delete" => handle.delete_extra(DELETE_KEY)?,
        "h" | "hide" => handle.set_visible(false)?,
        "s" | "show" => handle.set_visible(true)?,
        "q" | "quit" => return Ok(false),
        "" => {}
        other => renderer.println(format!("unknown command: {}", other)),
    }
    Ok(true)
}
