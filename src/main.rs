use std::future::Future;
use std::pin::Pin;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use url::Url;

use fluent_flow::session::{ConnectionStatus, Intent, RecordingStatus};
use fluent_flow::voice::{
    MicrophoneCapture, SilentPlayback, SpeakerPlayback, SpeechCapture, SpeechPlayback,
    SpeechToText, TextToSpeech, UnsupportedCapture,
};
use fluent_flow::{
    ChatMode, Config, HttpReplyClient, Message, Sender, Session, SessionSettings, TurnInput,
    TurnOutcome,
};

/// How often the REPL folds live transcription into the session
const PUMP_INTERVAL: Duration = Duration::from_millis(250);

/// A send still waiting on the backend, polled next to stdin
type PendingTurn<'a> =
    Pin<Box<dyn Future<Output = fluent_flow::Result<Option<TurnOutcome>>> + 'a>>;

/// Fluent Flow - practice conversations by voice or text
#[derive(Parser)]
#[command(name = "fluent", version, about)]
struct Cli {
    /// Chat mode: "text" or "voice"
    #[arg(short, long)]
    mode: Option<ChatMode>,

    /// Text chat backend base URL
    #[arg(long)]
    text_url: Option<Url>,

    /// Voice chat backend base URL
    #[arg(long)]
    voice_url: Option<Url>,

    /// Disable microphone and speaker
    #[arg(long)]
    disable_voice: bool,

    /// Don't speak replies aloud
    #[arg(long)]
    no_speech: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive conversation (default)
    Chat,
    /// Send one message and print the reply
    Send {
        /// Message text
        message: String,
    },
    /// Check backend health
    Health,
    /// Clear the backend conversation history
    Clear,
    /// Print the backend conversation history
    History,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so they don't interleave with the conversation
    let filter = match cli.verbose {
        0 => "warn,fluent_flow=info",
        1 => "info,fluent_flow=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let command = cli.command.unwrap_or(Command::Chat);
    if let Command::TestMic { duration } = command {
        test_mic(duration).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load()?;
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(url) = cli.text_url {
        config.backend.text_url = url;
    }
    if let Some(url) = cli.voice_url {
        config.backend.voice_url = url;
    }
    if cli.disable_voice {
        config.voice.enabled = false;
    }
    if cli.no_speech {
        config.voice.speak_replies = false;
    }
    tracing::debug!(?config, "loaded configuration");

    let session = build_session(&config)?;

    match command {
        Command::Chat => chat(&session).await.map(|()| ExitCode::SUCCESS),
        Command::Send { message } => send_once(&session, message).await,
        Command::Health => {
            let status = session.probe_connection().await;
            println!("{}: {}", config.mode, describe_connection(status));
            Ok(exit_code(status == ConnectionStatus::Connected))
        }
        Command::Clear => {
            session.clear_conversation().await?;
            println!("Conversation cleared.");
            Ok(ExitCode::SUCCESS)
        }
        Command::History => {
            let count = session.restore_history().await?;
            if count == 0 {
                println!("No messages.");
            }
            for message in session.snapshot().history {
                print_message(&message);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::TestMic { .. } => Ok(ExitCode::SUCCESS),
    }
}

/// Wire the session to the HTTP backend and whatever audio the host offers
fn build_session(config: &Config) -> anyhow::Result<Session> {
    let client = Arc::new(HttpReplyClient::new(&config.backend, config.mode)?);

    let (capture, playback): (Box<dyn SpeechCapture>, Box<dyn SpeechPlayback>) =
        if config.voice.enabled {
            (
                Box::new(MicrophoneCapture::new(
                    build_stt(config),
                    config.voice.partial_interval,
                )),
                Box::new(SpeakerPlayback::new(build_tts(config))),
            )
        } else {
            tracing::info!("voice disabled, running text-only");
            (Box::new(UnsupportedCapture), Box::new(SilentPlayback))
        };

    Ok(Session::new(
        client,
        capture,
        playback,
        SessionSettings::from(config),
    ))
}

fn build_stt(config: &Config) -> Option<SpeechToText> {
    let provider = config.voice.stt_provider;
    let Some(key) = config.api_keys.for_stt(provider) else {
        tracing::info!(?provider, "no STT key configured, live transcription disabled");
        return None;
    };

    SpeechToText::new(provider, key.clone(), config.voice.stt_model.clone())
        .inspect_err(|e| tracing::warn!(error = %e, "STT unavailable"))
        .ok()
}

fn build_tts(config: &Config) -> Option<TextToSpeech> {
    let provider = config.voice.tts_provider;
    let key = config.api_keys.for_tts(provider)?;

    TextToSpeech::new(
        provider,
        key.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
        config.voice.tts_model.clone(),
    )
    .inspect_err(|e| tracing::warn!(error = %e, "TTS unavailable"))
    .ok()
}

/// A line of REPL input
#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Say(String),
    SendPending,
    Record,
    Cancel,
    Clear,
    History,
    Reconnect,
    Help,
    Quit,
}

impl ReplCommand {
    /// Commands that would start a second turn
    const fn needs_idle(&self) -> bool {
        matches!(self, Self::Say(_) | Self::SendPending | Self::Record)
    }
}

fn parse_command(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    match trimmed {
        "" => ReplCommand::SendPending,
        "/record" | "/r" => ReplCommand::Record,
        "/cancel" => ReplCommand::Cancel,
        "/clear" => ReplCommand::Clear,
        "/history" => ReplCommand::History,
        "/reconnect" => ReplCommand::Reconnect,
        "/help" | "/?" => ReplCommand::Help,
        "/quit" | "/exit" | "/q" => ReplCommand::Quit,
        _ => ReplCommand::Say(trimmed.to_string()),
    }
}

/// Interactive conversation loop
#[allow(clippy::future_not_send)]
async fn chat(session: &Session) -> anyhow::Result<()> {
    let status = session.probe_connection().await;
    println!(
        "Fluent Flow ({} mode) - {}",
        session.settings().mode,
        describe_connection(status)
    );
    if status == ConnectionStatus::Connected && session.settings().mode == ChatMode::Text {
        match session.restore_history().await {
            Ok(count) if count > 0 => render_history(session),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "no history restored"),
        }
    }
    if !session.capture_supported() {
        println!("(voice input unavailable, type your messages)");
    }
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(PUMP_INTERVAL);
    let mut shown_partial: Option<String> = None;
    let mut turn: Option<PendingTurn<'_>> = None;

    loop {
        tokio::select! {
            result = async {
                match turn.as_mut() {
                    Some(pending) => pending.await,
                    None => std::future::pending().await,
                }
            }, if turn.is_some() => {
                turn = None;
                report(session, result);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = parse_command(&line);
                if turn.is_some() && command.needs_idle() {
                    println!("! still waiting for a reply (/clear to start over)");
                    continue;
                }
                match command {
                    ReplCommand::Quit => break,
                    ReplCommand::Say(text) => {
                        session.dispatch(Intent::InputChange(text)).await?;
                        turn = Some(Box::pin(session.dispatch(Intent::Send)));
                    }
                    ReplCommand::SendPending => {
                        turn = Some(Box::pin(session.dispatch(Intent::Send)));
                    }
                    ReplCommand::Record => {
                        let listening = session.state().recording == RecordingStatus::Listening;
                        if listening && session.settings().mode == ChatMode::Voice {
                            turn = Some(Box::pin(session.dispatch(Intent::RecordToggle)));
                        } else {
                            let result = session.dispatch(Intent::RecordToggle).await;
                            if !listening && result.is_ok() {
                                println!("Listening... (/record to stop, /cancel to discard)");
                            }
                            report(session, result);
                            if listening && let Some(heard) = session.state().pending_transcript {
                                println!("Heard: {heard}  (Enter to send, or type a replacement)");
                            }
                        }
                        shown_partial = None;
                    }
                    ReplCommand::Cancel => {
                        session.cancel_capture();
                        shown_partial = None;
                        println!("Recording discarded.");
                    }
                    ReplCommand::Clear => match session.dispatch(Intent::Clear).await {
                        Ok(_) => println!("Conversation cleared."),
                        Err(e) => println!("! {e}"),
                    },
                    ReplCommand::History => render_history(session),
                    ReplCommand::Reconnect => {
                        let status = session.probe_connection().await;
                        println!("{}", describe_connection(status));
                    }
                    ReplCommand::Help => print_help(),
                }
            }
            _ = ticker.tick() => {
                if session.pump_capture() > 0 {
                    let partial = session.state().pending_transcript;
                    if partial.is_some() && partial != shown_partial {
                        println!("  ... {}", partial.as_deref().unwrap_or_default());
                        shown_partial = partial;
                    }
                }
            }
        }

        if let Some(notice) = session.take_notice() {
            println!("! {notice}");
        }
    }

    session.cancel_capture();
    Ok(())
}

/// Print what a turn produced
fn report(session: &Session, result: fluent_flow::Result<Option<TurnOutcome>>) {
    match result {
        Ok(Some(TurnOutcome::Replied(reply))) => {
            if let Some(heard) = &reply.transcript {
                println!("you said: {heard}");
            }
            if let Some(corrected) = reply
                .corrected_transcript
                .as_ref()
                .filter(|c| Some(*c) != reply.transcript.as_ref())
            {
                println!("  better: {corrected}");
            }
            if !reply.reply_text.is_empty() {
                println!("assistant: {}", reply.reply_text);
            }
        }
        Ok(Some(TurnOutcome::Failed(_))) => {
            if let Some(message) = session.snapshot().history.last() {
                print_message(message);
            }
        }
        Ok(Some(TurnOutcome::Discarded) | None) => {}
        Err(e) => println!("! {e}"),
    }
}

fn render_history(session: &Session) {
    println!("---");
    for message in session.display_history() {
        print_message(&message);
    }
    println!("---");
}

fn print_message(message: &Message) {
    let who = match message.sender {
        Sender::User => "you",
        Sender::Assistant => "assistant",
    };
    println!("{who}: {}", message.text);
}

fn print_help() {
    println!("Type a message and press Enter. Commands:");
    println!("  /record   start or stop recording");
    println!("  /cancel   discard the current recording");
    println!("  /clear    start a new conversation");
    println!("  /history  show recent messages");
    println!("  /quit     exit");
}

const fn describe_connection(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Disconnected => "backend unreachable",
        ConnectionStatus::Unknown => "not checked",
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

/// Send one typed message outside the REPL
#[allow(clippy::future_not_send)]
async fn send_once(session: &Session, message: String) -> anyhow::Result<ExitCode> {
    session.probe_connection().await;
    match session.send_turn(TurnInput::Text(message)).await? {
        TurnOutcome::Replied(reply) => {
            println!("{}", reply.reply_text);
            Ok(ExitCode::SUCCESS)
        }
        TurnOutcome::Failed(e) => {
            eprintln!("error: {e}");
            Ok(ExitCode::FAILURE)
        }
        TurnOutcome::Discarded => Ok(ExitCode::FAILURE),
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = MicrophoneCapture::new(None, Duration::from_secs(1));
    let _events = capture.start()?;

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);

        capture.clear_buffer();
    }

    capture.stop()?;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");

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
