use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use first_aid_coach::config::validate_endpoint;
use first_aid_coach::protocol::Role;
use first_aid_coach::session::FileFrameSource;
use first_aid_coach::tools::{DEFAULT_BPM, Metronome, ToneEffects, ToolEvent, tone};
use first_aid_coach::voice::{
    AudioInput, AudioOutput, CpalMicrophone, CpalSpeaker, PLAYBACK_SAMPLE_RATE, PlaybackSink,
    calculate_rms,
};
use first_aid_coach::{
    Config, Devices, SessionEvent, SessionHandle, SessionOrchestrator, StreamingStatus,
};

/// Coach - hands-free first aid coaching client
#[derive(Parser)]
#[command(name = "coach", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a coaching session (default)
    Run {
        /// Realtime service endpoint (ws:// or wss://)
        #[arg(short, long, env = "COACH_ENDPOINT")]
        endpoint: Option<String>,

        /// Keep the audio gate open without a wake phrase
        #[arg(long)]
        always_active: bool,

        /// JPEG file or directory of JPEGs to stream as camera frames
        #[arg(long)]
        camera_file: Option<std::path::PathBuf>,
    },
    /// Show a live level meter for the default microphone
    TestMic {
        /// How long to listen, in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Play a reference tone on the default speaker
    TestSpeaker,
    /// Play the CPR metronome
    Metronome {
        /// Beats per minute
        #[arg(short, long, default_value_t = DEFAULT_BPM)]
        bpm: u32,
        /// How long to play, in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,first_aid_coach=info",
        1 => "info,first_aid_coach=debug",
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Command::Run {
        endpoint: None,
        always_active: false,
        camera_file: None,
    });

    match command {
        Command::Run {
            endpoint,
            always_active,
            camera_file,
        } => run_session(endpoint, always_active, camera_file).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::Metronome { bpm, seconds } => play_metronome(bpm, seconds).await,
    }
}

async fn run_session(
    endpoint: Option<String>,
    always_active: bool,
    camera_file: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(endpoint) = endpoint {
        validate_endpoint(&endpoint)?;
        config.endpoint = endpoint;
    }
    config.voice.always_active |= always_active;
    tracing::debug!(?config, "loaded configuration");

    let mut devices = Devices::system(&config);
    if let Some(path) = camera_file {
        devices.camera = Arc::new(FileFrameSource::new(path));
    }
    if config.recognizer.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set, wake word detection disabled and audio gate held open");
    }

    let session = SessionOrchestrator::spawn(config, devices)?;
    let mut events = session.subscribe();
    session.start().await?;

    println!("Streaming. Say \"hey coach\" to talk.");
    println!("Commands: t = talk now, a = always active on, q = always active off, d <id> = dismiss card");
    println!("Press Ctrl-C to end the session.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    let stopped = event == SessionEvent::Status(StreamingStatus::Stopped);
                    print_event(&event);
                    if stopped {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "event display lagged"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_input(&session, line.trim()).await?,
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    if let Some(recording) = session.stop().await? {
        println!("\nSession saved to {}", recording.directory.display());
        if let Some(report) = recording.report_path {
            println!("EMS report: {}", report.display());
        }
    }
    session.shutdown();
    Ok(())
}

async fn handle_input(session: &SessionHandle, line: &str) -> anyhow::Result<()> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("t") => session.trigger_activation()?,
        Some("a") => session.set_always_active(true)?,
        Some("q") => session.set_always_active(false)?,
        Some("d") => match parts.next().and_then(|id| id.parse::<u64>().ok()) {
            Some(id) => {
                if !session.dismiss_card(id).await? {
                    println!("no card {id}");
                }
            }
            None => println!("usage: d <card id>"),
        },
        Some(other) => println!("unknown command: {other}"),
        None => {}
    }
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Status(status) => println!("[status] {status}"),
        SessionEvent::Activation(state) => {
            if state.active {
                println!("[listening] {:?}", state.reason);
            } else {
                println!("[idle]");
            }
        }
        SessionEvent::Scenario(state) => println!(
            "[scenario] {} ({}) {}",
            state.scenario, state.severity, state.summary
        ),
        SessionEvent::Transcript {
            role,
            text,
            partial: false,
        } => {
            let who = match role {
                Role::User => "you",
                Role::Assistant => "coach",
            };
            println!("{who}: {text}");
        }
        SessionEvent::Transcript { .. } | SessionEvent::Connection(_) => {}
        SessionEvent::TranscriptDone => println!(),
        SessionEvent::Interrupted => println!("[interrupted]"),
        SessionEvent::SceneObservation(text) => println!("[scene] {text}"),
        SessionEvent::Tool(tool) => print_tool(tool),
        SessionEvent::Error(message) => eprintln!("[error] {message}"),
    }
}

fn print_tool(event: &ToolEvent) {
    match event {
        ToolEvent::MetronomeStarted { bpm } => println!("[metronome] {bpm} bpm"),
        ToolEvent::MetronomeStopped => println!("[metronome] stopped"),
        ToolEvent::TimerStarted { label, seconds } => println!("[timer] {label}: {seconds}s"),
        ToolEvent::TimerTick { label, remaining } if remaining % 10 == 0 => {
            println!("[timer] {label}: {remaining}s left");
        }
        ToolEvent::TimerTick { .. } => {}
        ToolEvent::TimerFired { label } => println!("[timer] {label} done"),
        ToolEvent::TimerStopped { label } => println!("[timer] {label} cancelled"),
        ToolEvent::CardsChanged(cards) => {
            for card in cards {
                println!("[card {}] {:?}: {}", card.id, card.kind, card.title);
                for item in &card.items {
                    println!("    - {item}");
                }
            }
        }
    }
}

/// Level meter for the default input device
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Listening for {duration}s. Say the wake phrase a few times.\n");

    let captured: Arc<Mutex<Vec<f32>>> = Arc::default();
    let sample_rate = Arc::new(std::sync::atomic::AtomicU32::new(0));

    let mut mic = CpalMicrophone::new();
    {
        let captured = Arc::clone(&captured);
        let sample_rate = Arc::clone(&sample_rate);
        mic.start(Box::new(move |chunk| {
            sample_rate.store(chunk.sample_rate(), std::sync::atomic::Ordering::Relaxed);
            if let Ok(mut buf) = captured.lock() {
                buf.extend(chunk.to_mono());
            }
        }))?;
    }

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = captured
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] {} Hz | RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            sample_rate.load(std::sync::atomic::Ordering::Relaxed),
            energy,
            peak,
            meter
        );
    }

    mic.stop();

    println!();
    println!("A flat meter means no input reached the coach.");
    println!("Check the system default input device and its mute switch.");

    Ok(())
}

/// Two seconds of A4 through the playback path
async fn test_speaker() -> anyhow::Result<()> {
    let speaker = CpalSpeaker::new();
    speaker.start()?;

    let samples = tone(440.0, 2.0, 0.3);
    println!(
        "Playing a 440 Hz tone ({} samples at {} Hz)",
        samples.len(),
        PLAYBACK_SAMPLE_RATE
    );
    speaker.enqueue(samples);
    tokio::time::sleep(Duration::from_millis(2300)).await;
    speaker.stop();

    println!("Silence means the default output device is muted or missing.");

    Ok(())
}

/// Play the metronome through the speaker
async fn play_metronome(bpm: u32, seconds: u64) -> anyhow::Result<()> {
    let speaker = Arc::new(CpalSpeaker::new());
    speaker.start()?;

    let effects = Arc::new(ToneEffects::new(PlaybackSink::new(speaker.clone())));
    let mut metronome = Metronome::new(effects);
    println!("Metronome at {bpm} bpm for {seconds}s");
    metronome.start(bpm);

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    metronome.stop();
    speaker.stop();
    Ok(())
}
