use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use spyglass::audio::{self, AudioCapture, PlaybackTuning, Player};
use spyglass::fallback::{self, FallbackRequest, FallbackUpdate};
use spyglass::live::{Command as ClientCommand, LiveClient, Session};
use spyglass::speech::SpeechQueue;
use spyglass::store::{self, AccountRepo, LogRepo, ProjectRepo, UsageRepo};
use spyglass::tools::{TaskTools, ToolRegistry};
use spyglass::{ClientEvent, Config, Speaker};

/// Spyglass - realtime voice and screen assistant client
#[derive(Parser)]
#[command(name = "spyglass", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable spoken fallback replies (text-only output)
    #[arg(long, env = "SPYGLASS_NO_SPEECH")]
    no_speech: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send a single message through the fallback path and print the reply
    Send {
        /// Message text
        text: String,
    },
    /// List tasks in a project (the active one by default)
    Tasks {
        /// Project name
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,spyglass=info",
        1 => "info,spyglass=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Send { text } => send_once(&text).await,
            Command::Tasks { project } => list_tasks(project.as_deref()),
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let config = Config::load_with_options(cli.no_speech);
    let Some(gemini_key) = config.api_keys.gemini.clone() else {
        anyhow::bail!("GEMINI_API_KEY is not set; export it or add it to config.toml");
    };

    let pool = store::init(config.db_path())?;
    let account = AccountRepo::new(pool.clone()).find_or_create(&config.account)?;
    tracing::info!(account = %account.username, "starting spyglass");

    let registry = ToolRegistry::new(TaskTools::new(
        ProjectRepo::new(pool.clone()),
        account.id.clone(),
    ));

    let player = Player::start(PlaybackTuning::default())?;
    let speech = if config.speech.enabled {
        match config.api_keys.openai.clone() {
            Some(key) => SpeechQueue::start(key, config.speech_settings(), player.clone()),
            None => {
                tracing::warn!("OPENAI_API_KEY not set, fallback replies will be text only");
                SpeechQueue::disabled()
            }
        }
    } else {
        SpeechQueue::disabled()
    };

    let capture = AudioCapture::new(spyglass::live::CAPTURE_BLOCK_SAMPLES)?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = Session::new(
        config.session_settings(gemini_key.clone()),
        player,
        speech,
        registry,
        events_tx,
    );

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let client = LiveClient::new(
        session,
        capture,
        config.live_endpoint(gemini_key),
        command_rx,
    );

    let printer = tokio::spawn(print_events(
        events_rx,
        LogRepo::new(pool.clone()),
        UsageRepo::new(pool),
        account.id,
    ));

    spawn_stdin_reader(command_tx.clone());
    let shutdown_tx = command_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(ClientCommand::Shutdown);
        }
    });

    println!("spyglass ready - speak once connected, or type a message");
    println!("commands: /connect /disconnect /mute /unmute /quit");
    let _ = command_tx.send(ClientCommand::Connect);

    // The client owns the microphone stream, so it runs on this task
    client.run().await;
    let _ = printer.await;
    Ok(())
}

/// Print events to the terminal and persist finalized entries.
async fn print_events(
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    logs: LogRepo,
    usage: UsageRepo,
    account_id: String,
) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Connected => println!("* connected"),
            ClientEvent::Disconnected => println!("* disconnected"),
            ClientEvent::Error { message } => eprintln!("! {message}"),
            ClientEvent::Transcript(entry) => {
                if !entry.is_final {
                    continue;
                }
                println!("{:>9} | {}", entry.speaker.as_str(), entry.message);
                if let Err(e) = logs.append(&account_id, &entry) {
                    tracing::warn!(error = %e, "failed to persist transcript entry");
                }
                if entry.speaker == Speaker::User {
                    if let Err(e) = usage.increment_today(&account_id) {
                        tracing::warn!(error = %e, "failed to count request");
                    }
                }
            }
            ClientEvent::Stats(stats) => tracing::debug!(
                tokens = stats.estimated_tokens,
                per_minute = stats.tokens_per_minute,
                turns = stats.model_turns,
                "usage"
            ),
            ClientEvent::Volume { input, output } => {
                tracing::trace!(input, output, "volume");
            }
        }
    }
}

/// Forward stdin lines as commands from a blocking reader thread.
fn spawn_stdin_reader(commands: mpsc::UnboundedSender<ClientCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let command = match trimmed {
                "/quit" | "/exit" => {
                    let _ = commands.send(ClientCommand::Shutdown);
                    break;
                }
                "/connect" => ClientCommand::Connect,
                "/disconnect" => ClientCommand::Disconnect,
                "/mute" => ClientCommand::SetMuted(true),
                "/unmute" => ClientCommand::SetMuted(false),
                text => ClientCommand::SendText(text.to_string()),
            };
            if commands.send(command).is_err() {
                break;
            }
        }
    });
}

/// Send one message through the fallback path and stream the reply.
async fn send_once(text: &str) -> anyhow::Result<()> {
    let config = Config::load();
    let Some(gemini_key) = config.api_keys.gemini.clone() else {
        anyhow::bail!("GEMINI_API_KEY is not set; export it or add it to config.toml");
    };

    let pool = store::init(config.db_path())?;
    let account = AccountRepo::new(pool.clone()).find_or_create(&config.account)?;
    let registry = ToolRegistry::new(TaskTools::new(ProjectRepo::new(pool), account.id));

    let request = FallbackRequest {
        base_url: config.fallback.base_url.clone(),
        api_key: gemini_key,
        model: config.fallback.model.clone(),
        text: text.to_string(),
        frame: None,
        video_paused: true,
        system_instruction: config.system_instruction.clone(),
        declarations: registry.declarations(),
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(fallback::run(request, registry, SpeechQueue::disabled(), tx));

    while let Some(update) = rx.recv().await {
        match update {
            FallbackUpdate::Delta(delta) => {
                print!("{delta}");
                std::io::stdout().flush().ok();
            }
            FallbackUpdate::ToolNote(note) => eprintln!("\n[{note}]"),
            FallbackUpdate::Done { .. } => {
                println!();
                break;
            }
            FallbackUpdate::Failed { message } => anyhow::bail!("request failed: {message}"),
        }
    }
    Ok(())
}

/// List tasks in a project.
fn list_tasks(project: Option<&str>) -> anyhow::Result<()> {
    let config = Config::load();
    let pool = store::init(config.db_path())?;
    let account = AccountRepo::new(pool.clone()).find_or_create(&config.account)?;
    let projects = ProjectRepo::new(pool);

    let project = match project {
        Some(name) => projects
            .find_by_name(&account.id, name)?
            .ok_or_else(|| anyhow::anyhow!("no project named \"{name}\""))?,
        None => projects.active_project(&account.id)?,
    };

    let marker = if project.is_active { " (active)" } else { "" };
    println!("{}{marker}", project.name);
    let tasks = projects.tasks_for_project(&project.id)?;
    if tasks.is_empty() {
        println!("  no tasks");
        return Ok(());
    }
    for task in tasks {
        let done = if task.completed { "x" } else { " " };
        let mut line = format!("  [{done}] {}", task.title);
        if let Some(priority) = &task.priority {
            line.push_str(&format!(" ({priority})"));
        }
        if let Some(due) = &task.due_date {
            line.push_str(&format!(" (due {due})"));
        }
        println!("{line}");
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(spyglass::live::CAPTURE_BLOCK_SAMPLES)?;
    capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = audio::rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (audio::meter_level(&samples) * 50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        // Clear buffer each second
        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let player = Player::start(PlaybackTuning::default())?;

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let num_samples = (sample_rate * 2) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    player.schedule(&samples, sample_rate)?;

    while !player.is_idle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    player.shutdown();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
