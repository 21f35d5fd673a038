use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use beacon_live::session::{AgentState, AgentStatus, Command as AgentCommand, VoiceAgent};
use beacon_live::transport::GeminiLiveConnector;
use beacon_live::visualizer::Visualizer;
use beacon_live::voice::{
    AnalyserTap, AudioBackend, CaptureSettings, CpalBackend, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE, PlaybackScheduler, samples_to_wav,
};
use beacon_live::{Config, knowledge};

/// Beacon Live - Realtime voice conversations with Gemini Live
#[derive(Parser)]
#[command(name = "beacon-live", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/omni/beacon-live/config.toml)
    #[arg(short, long, env = "BEACON_LIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Do not draw the waveform
    #[arg(long)]
    no_visualizer: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
    /// Print the resolved configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_live=info",
        1 => "info,beacon_live=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
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
    let config = Config::load(cli.config.as_deref())?;

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(duration, output).await,
            Command::TestSpeaker => test_speaker().await,
            Command::ShowConfig => {
                show_config(&config);
                Ok(())
            }
        };
    }

    tracing::debug!(?config, "loaded configuration");

    let connector = GeminiLiveConnector::new(config.endpoint.clone(), config.api_key.clone());
    let instructions = knowledge::provider(config.instructions.as_deref());

    let mut agent = VoiceAgent::new(
        config.agent.clone(),
        Box::new(CpalBackend),
        Arc::new(connector),
        instructions,
    );

    let visualizer = (config.visualizer.enabled && !cli.no_visualizer).then(|| {
        Visualizer::new(config.visualizer, agent.subscribe(), agent.analyser()).spawn()
    });

    let (commands_tx, commands_rx) = mpsc::channel(8);
    let stdin_tx = commands_tx.clone();
    std::thread::spawn(move || read_commands(&stdin_tx));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = commands_tx.send(AgentCommand::Shutdown).await;
        }
    });
    tokio::spawn(log_status(agent.subscribe()));

    println!("Press Enter to start or stop talking, q to quit.");
    agent.run(commands_rx).await;

    if let Some(visualizer) = visualizer {
        visualizer.stop();
    }
    tracing::info!("goodbye");

    Ok(())
}

/// Map stdin lines to agent commands
///
/// Runs on a plain thread: a blocked stdin read must not hold up runtime
/// shutdown.
fn read_commands(commands: &mpsc::Sender<AgentCommand>) {
    for line in std::io::stdin().lock().lines() {
        let command = match line {
            Ok(line) => match line.trim() {
                "" => AgentCommand::Toggle,
                "c" | "connect" => AgentCommand::Connect,
                "d" | "disconnect" => AgentCommand::Disconnect,
                "q" | "quit" | "exit" => AgentCommand::Shutdown,
                other => {
                    println!("unknown command '{other}' (Enter toggles, q quits)");
                    continue;
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stdin");
                break;
            }
        };

        let shutdown = command == AgentCommand::Shutdown;
        if commands.blocking_send(command).is_err() || shutdown {
            return;
        }
    }

    let _ = commands.blocking_send(AgentCommand::Shutdown);
}

/// Log each published state change
async fn log_status(mut status: watch::Receiver<AgentStatus>) {
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        match (current.state, current.error) {
            (AgentState::Error, Some(error)) => tracing::error!(%error, "agent error"),
            (state, _) => tracing::info!(%state, "agent state"),
        }
    }
}

/// Print the resolved configuration
fn show_config(config: &Config) {
    let path = beacon_live::config::file::config_file_path()
        .map_or_else(|| "(unavailable)".to_string(), |p| p.display().to_string());
    let key = config.api_key.as_ref().map_or("not set", |_| "set");

    println!("config file:       {path}");
    println!("api key:           {key}");
    println!("endpoint:          {}", config.endpoint);
    println!("model:             {}", config.agent.model);
    println!("voice:             {}", config.agent.voice);
    println!(
        "transcription:     input={} output={}",
        config.agent.input_transcription, config.agent.output_transcription
    );
    println!("connect timeout:   {:?}", config.agent.connect_timeout);
    println!("chunk size:        {} samples", config.agent.chunk_size);
    println!("queue capacity:    {} frames", config.agent.queue_capacity);
    println!("turn tolerance:    {}s", config.agent.tolerance);
    println!("turn detection:    {:?}", config.agent.turn_detection);
    println!(
        "instructions:      {}",
        config
            .instructions
            .as_ref()
            .map_or_else(|| "(built-in)".to_string(), |p| p.display().to_string())
    );
    println!(
        "visualizer:        enabled={} {}x{} @ {} fps",
        config.visualizer.enabled,
        config.visualizer.width,
        config.visualizer.height,
        config.visualizer.fps
    );
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let window: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let recording: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));

    let callback_window = Arc::clone(&window);
    let callback_recording = Arc::clone(&recording);
    let keep = output.is_some();

    let mut input = CpalBackend.open_input(
        CaptureSettings {
            sample_rate: INPUT_SAMPLE_RATE,
        },
        Box::new(move |samples: &[f32]| {
            if let Ok(mut w) = callback_window.lock() {
                w.extend_from_slice(samples);
            }
            if keep && let Ok(mut r) = callback_recording.lock() {
                r.extend_from_slice(samples);
            }
        }),
    )?;
    input.start()?;

    let sample_rate = input.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = window
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    input.stop();

    if let Some(path) = output {
        let samples = recording
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default();
        let wav = samples_to_wav(&samples, sample_rate)?;
        tokio::fs::write(&path, wav).await?;
        println!("\nWrote {} samples to {}", samples.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave split into back-to-back segments
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a steady 440Hz tone for 2 seconds\n");

    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
    let output = CpalBackend.open_output(finished_tx, AnalyserTap::default())?;
    let mut scheduler = PlaybackScheduler::new(output);

    // Four 0.5s segments at 24kHz; any gap between them is audible
    let frequency = 440.0_f32;
    let segment_len = OUTPUT_SAMPLE_RATE as usize / 2;
    for segment in 0..4 {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..segment_len)
            .map(|i| {
                let t = (segment * segment_len + i) as f32 / OUTPUT_SAMPLE_RATE as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
            })
            .collect();

        let placed = scheduler.schedule(samples, OUTPUT_SAMPLE_RATE)?;
        println!(
            "Segment {} scheduled at {:.3}s for {:.3}s",
            placed.id, placed.start_at, placed.duration
        );
    }

    let wait = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(id) = finished_rx.recv().await {
            if scheduler.segment_ended(id) {
                break;
            }
        }
    })
    .await;

    if wait.is_err() {
        println!("Timed out waiting for playback to finish");
    }
    scheduler.flush();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
