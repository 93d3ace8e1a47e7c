use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use genie_core::voice::{UnavailableCapture, UnavailableSynthesis};
use genie_core::{
    assemble_reply, synthesis_from_config, ChatSession, Config, GraphClient, SessionOptions,
    SpeechSynthesis, VoiceEvent,
};
use tokio::sync::mpsc;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "genie")]
#[command(about = "Chat with Jarvis, a streaming conversational agent, by text or voice")]
#[command(version)]
struct Cli {
    /// Base URL of the graph server (overrides config and GENIE_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the chat view (default)
    Chat,
    /// Send one message and print the reply
    Ask {
        /// Your message
        message: String,
        /// Also speak the reply with the configured speech engine
        #[arg(long)]
        speak: bool,
    },
    /// Print the effective configuration
    Config {
        /// Write a starter config file if there is none yet
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = Some(endpoint);
    }

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            if let Some(path) = config.log_path() {
                // The terminal is not in raw mode yet
                if let Err(e) = init_file_logging(cli.verbose, &path) {
                    eprintln!("genie: logging disabled: {:#}", e);
                }
            }
            run_chat(&config).await
        }
        Commands::Ask { message, speak } => {
            init_stderr_logging(cli.verbose);
            ask(&config, &message, speak).await
        }
        Commands::Config { init: true } => init_config(),
        Commands::Config { init: false } => show_config(&config),
    }
}

fn env_filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn init_stderr_logging(verbose: u8) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(env_filter(verbose))
        .init();
}

/// The chat view owns the terminal, so logs go to a file instead
fn init_file_logging(verbose: u8, path: &Path) -> Result<()> {
    let file = open_log_file(path)?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .with(env_filter(verbose))
        .init();
    Ok(())
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }
    File::options()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))
}

async fn run_chat(config: &Config) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut events = EventHandler::new();
    let transport = Arc::new(GraphClient::new(config.endpoint()));
    let mut app = App::new(config, transport, events.sender(), events.voice_events());
    tracing::info!(endpoint = config.endpoint(), "chat view mounted");

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event).await?,
                None => break,
            }
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    // Unmount: dropping the app drops the session and cancels its request
    drop(app);
    tracing::info!("chat view unmounted");
    tui::restore()?;
    result
}

async fn ask(config: &Config, message: &str, speak: bool) -> Result<()> {
    let client = GraphClient::new(config.endpoint());
    let (voice_tx, mut voice_rx) = mpsc::unbounded_channel();
    let synthesis: Box<dyn SpeechSynthesis> = if speak {
        synthesis_from_config(config, voice_tx)
    } else {
        Box::new(UnavailableSynthesis)
    };
    let mut session = ChatSession::new(
        SessionOptions::from(config),
        Box::new(UnavailableCapture),
        synthesis,
    );

    session.set_input(message);
    let Some(request) = session.begin_submit() else {
        bail!("Nothing to send: the message is empty");
    };

    let cancel = request.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let outcome = assemble_reply(
        &client,
        &request.text,
        request.idle_timeout,
        &request.cancel,
        |fragment| {
            let _ = write!(stdout, "{}", fragment);
            let _ = stdout.flush();
        },
    )
    .await;
    interrupt.abort();

    if let Err(e) = &outcome {
        tracing::error!(error = %e, endpoint = config.endpoint(), "request failed");
    }
    session.finish_reply(outcome);
    println!();

    if let Some(error) = &session.state().last_error {
        bail!("{}", error);
    }

    // Wait for the spoken reply to finish before exiting
    while session.is_speaking() {
        tokio::select! {
            event = voice_rx.recv() => match event {
                Some(event @ VoiceEvent::PlaybackFinished(_)) => session.handle_voice_event(event),
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

fn init_config() -> Result<()> {
    let path = Config::get_config_path()?;
    if Config::init_at(&path)? {
        println!("Wrote {}", path.display());
    } else {
        println!("{} already exists, left unchanged", path.display());
    }
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!("# {}", Config::get_config_path()?.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    println!();
    println!("endpoint:        {}", config.endpoint());
    println!("preferred voice: {}", config.preferred_voice());
    println!("timeout:         {}s", config.request_timeout().as_secs());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_unusable_log_path_is_reported() {
        // /dev/null is a file, so no directory can be created under it
        let err = open_log_file(Path::new("/dev/null/genie/genie.log")).unwrap_err();
        assert!(format!("{:#}", err).contains("/dev/null/genie"));
    }

    #[test]
    fn test_config_init_flag() {
        let cli = Cli::try_parse_from(["genie", "config", "--init"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Config { init: true })));

        let cli = Cli::try_parse_from(["genie"]).unwrap();
        assert!(cli.command.is_none());
    }
}
