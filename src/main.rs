use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use voice_call::config::{ClientConfig, Voice};
use voice_call::core::turn::{PhaseCallback, TranscriptCallback, TurnErrorCallback};
use voice_call::core::{
    CallStateMachine, CallStatus, CaptureSource, HttpSignalingRelay, NoCapture, SessionHandle,
    StatusCallback, TranscriptResult, TurnPhase, VoiceSession, WavCapture, WavRecorder,
    WebRtcTransport,
};

/// Voice Call - real-time voice AI client over WebRTC
#[derive(Parser, Debug)]
#[command(name = "voice-call")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// WAV file played as the microphone
    #[arg(long, value_name = "WAV")]
    capture: Option<PathBuf>,

    /// Record the assistant's audio to this WAV file
    #[arg(long, value_name = "WAV")]
    record: Option<PathBuf>,

    /// Relay base URL
    #[arg(long, value_name = "URL")]
    relay: Option<String>,

    /// Assistant voice
    #[arg(long, value_name = "NAME")]
    voice: Option<String>,

    /// Disable input transcription on the relay
    #[arg(long)]
    no_stt: bool,
}

const HELP: &str =
    "commands: connect | hangup | pause | resume | mute | unmute | say <text> | quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ClientConfig::from_file(path)
        }
        None => ClientConfig::from_env(),
    }
    .map_err(|e| anyhow!("Failed to load configuration: {}", e))?;

    if let Some(relay) = cli.relay {
        config.relay_url = relay;
    }
    if let Some(voice) = cli.voice {
        config.voice = Voice::from_str_or_default(&voice);
    }
    if cli.no_stt {
        config.enable_stt = false;
    }
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    info!(
        "Relay {}{} voice={} stt={}",
        config.relay_url, config.calls_path, config.voice, config.enable_stt
    );

    let relay = HttpSignalingRelay::new(config.relay_config())?;

    let capture: Arc<dyn CaptureSource> = match cli.capture {
        Some(path) => Arc::new(WavCapture::new(path)),
        None => Arc::new(NoCapture),
    };
    let mut transport = WebRtcTransport::new(config.webrtc_config(), capture);
    let recorder = match cli.record {
        Some(path) => {
            let recorder = Arc::new(WavRecorder::create(path, config.audio.sample_rate)?);
            transport = transport.with_playback(recorder.clone());
            Some(recorder)
        }
        None => None,
    };

    let machine = CallStateMachine::new(
        Arc::new(transport),
        Arc::new(relay),
        config.call_settings(),
    );
    let (mut session, handle) = VoiceSession::new(machine, config.response_debounce());

    let status_callback: StatusCallback = Arc::new(|status: CallStatus| {
        Box::pin(async move {
            println!("[call] {status}");
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    session.on_status(status_callback);

    let phase_callback: PhaseCallback = Arc::new(|phase: TurnPhase| {
        Box::pin(async move {
            println!("[turn] {phase}");
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    session.on_phase(phase_callback);

    let transcript_callback: TranscriptCallback = Arc::new(|transcript: TranscriptResult| {
        Box::pin(async move {
            if transcript.is_final {
                println!("[{}] {}", transcript.role, transcript.text);
            }
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    session.on_transcript(transcript_callback);

    let error_callback: TurnErrorCallback = Arc::new(|message: String| {
        Box::pin(async move {
            eprintln!("[error] {message}");
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    session.on_error(error_callback);

    let session_task = tokio::spawn(session.run());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !dispatch_line(&handle, line.trim())? {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    // The session may already have stopped; shutdown is best-effort.
    let _ = handle.shutdown();
    session_task
        .await
        .map_err(|e| anyhow!("Session task failed: {}", e))?;

    if let Some(recorder) = recorder {
        recorder.finish()?;
    }
    Ok(())
}

/// Run one stdin command. Returns false on `quit`.
fn dispatch_line(handle: &SessionHandle, line: &str) -> anyhow::Result<bool> {
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((line, ""));

    match command {
        "" => {}
        "connect" => handle.connect()?,
        "hangup" | "disconnect" => handle.hang_up()?,
        "pause" => handle.set_paused(true)?,
        "resume" => handle.set_paused(false)?,
        "mute" => handle.set_mic_enabled(false)?,
        "unmute" => handle.set_mic_enabled(true)?,
        "say" if !rest.is_empty() => handle.send_text(rest)?,
        "quit" | "exit" => return Ok(false),
        _ => println!("{HELP}"),
    }
    Ok(true)
}
