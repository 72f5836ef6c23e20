use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{select, Receiver};

use moodlens_core::capture::domain::source_descriptor::{SourceDescriptor, SourceKind};
use moodlens_core::classification::domain::emotion::{EmotionVocabulary, Locale};
use moodlens_core::classification::domain::emotion_result::FaceEmotion;
use moodlens_core::detection::domain::backend_kind::BackendKind;
use moodlens_core::pipeline::domain::annotated_frame::AnnotatedFrame;
use moodlens_core::pipeline::domain::playback_controller::PlaybackState;
use moodlens_core::pipeline::domain::result_renderer::ResultRenderer;
use moodlens_core::pipeline::domain::session::SessionEvent;
use moodlens_core::pipeline::orchestrator::{PipelineComponents, PipelineOrchestrator};
use moodlens_core::shared::settings::PipelineSettings;

/// Real-time facial emotion detection for cameras, videos and images.
#[derive(Parser)]
#[command(name = "moodlens")]
struct Cli {
    /// `camera:<index>`, a video file or an image file.
    source: String,

    /// Face detector: cascade, deep-detector or landmark-mesh.
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Emotion classes: 5 or 7.
    #[arg(long)]
    classes: Option<EmotionVocabulary>,

    /// Record annotated video to this file.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Save the last annotated frame to this file on exit.
    #[arg(long)]
    photo: Option<PathBuf>,

    /// Write the annotated image (image sources only).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Directory searched for model files before the cache.
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Settings file (default: the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Process video files as fast as possible instead of in real time.
    #[arg(long)]
    no_pacing: bool,

    /// Stop after this many processed frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Print emotion labels in Spanish.
    #[arg(long)]
    spanish: bool,
}

/// A line typed on stdin while the pipeline runs.
#[derive(Debug, PartialEq)]
enum Command {
    Pause,
    Resume,
    Seek(Duration),
    Forward,
    Rewind,
    Stop,
    Backend(BackendKind),
    Record(PathBuf),
    EndRecording,
    Photo(PathBuf),
    Open(SourceDescriptor),
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, arg) = match line.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (line, ""),
        };
        let require = |what: &str| {
            if arg.is_empty() {
                Err(format!("'{word}' needs {what}"))
            } else {
                Ok(arg)
            }
        };

        match word.to_ascii_lowercase().as_str() {
            "pause" => Ok(Command::Pause),
            "resume" | "play" => Ok(Command::Resume),
            "seek" => {
                let secs: f64 = require("a position in seconds")?
                    .parse()
                    .map_err(|_| format!("invalid position '{arg}'"))?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(format!("invalid position '{arg}'"));
                }
                Ok(Command::Seek(Duration::from_secs_f64(secs)))
            }
            "fwd" => Ok(Command::Forward),
            "rew" => Ok(Command::Rewind),
            "stop" => Ok(Command::Stop),
            "backend" => require("a backend name")?.parse().map(Command::Backend),
            "record" => require("a file path").map(|p| Command::Record(PathBuf::from(p))),
            "endrec" => Ok(Command::EndRecording),
            "photo" => require("a file path").map(|p| Command::Photo(PathBuf::from(p))),
            "open" => require("a source")?.parse().map(Command::Open),
            "status" => Ok(Command::Status),
            "quit" | "exit" => Ok(Command::Quit),
            "" => Err("empty command".into()),
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

/// Prints one line per presented frame.
struct ConsoleRenderer {
    locale: Locale,
}

impl ResultRenderer for ConsoleRenderer {
    fn render(&mut self, frame: &AnnotatedFrame) {
        println!("{}", describe(frame, self.locale));
    }
}

fn describe(frame: &AnnotatedFrame, locale: Locale) -> String {
    let backend = frame.backend.map_or("none", |b| b.name());
    let ts = frame.frame.timestamp().as_secs_f64();
    let mut line = format!("#{:<6} {ts:8.2}s [{backend}]", frame.sequence);
    if frame.faces.is_empty() {
        line.push_str(" no faces");
    }
    for face in &frame.faces {
        let b = face.region.bbox;
        let label = match &face.emotion {
            FaceEmotion::Classified(result) => format!(
                "{} {:.0}%",
                result.dominant().label(locale),
                result.confidence() * 100.0
            ),
            FaceEmotion::Unclassified => "unclassified".to_string(),
        };
        line.push_str(&format!(" | ({},{} {}x{}) {label}", b.x, b.y, b.width, b.height));
    }
    if let Some(note) = &frame.readiness_note {
        line.push_str(&format!(" ({note})"));
    }
    line
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let descriptor: SourceDescriptor = cli.source.parse()?;
    validate(&cli, &descriptor)?;
    let settings = build_settings(&cli)?;

    log::info!(
        "Loading {} backend and {}-class emotion classifier",
        settings.backend,
        settings.vocabulary.len()
    );
    let load_timeout = settings.model_load_timeout();
    let mut orchestrator =
        PipelineOrchestrator::new(settings.clone(), PipelineComponents::production(&settings));
    if !orchestrator.wait_until_ready(load_timeout) {
        log::warn!("Models still loading; frames stay unannotated until they are ready");
    }

    let locale = if cli.spanish {
        Locale::Spanish
    } else {
        Locale::English
    };
    orchestrator.attach_renderer(Box::new(ConsoleRenderer { locale }));
    orchestrator.open_source(descriptor.clone())?;
    if let Some(path) = &cli.record {
        orchestrator.start_recording(path)?;
    }

    let exit = drive(&mut orchestrator, &descriptor, cli.max_frames);

    for path in [&cli.output, &cli.photo].into_iter().flatten() {
        orchestrator.capture_still(path)?;
        log::info!("Output written to {}", path.display());
    }
    finish_recording(&mut orchestrator);
    print_summary(&orchestrator);
    orchestrator.close();
    exit
}

/// Runs until the source is exhausted, `--max-frames` is reached or the
/// user quits.
fn drive(
    orchestrator: &mut PipelineOrchestrator,
    descriptor: &SourceDescriptor,
    max_frames: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let events = orchestrator.events();
    let mut commands = spawn_stdin_reader();
    let mut ended = false;
    let mut live = descriptor.kind().is_live();

    loop {
        let mut stdin_closed = false;
        select! {
            recv(commands) -> line => match line {
                Ok(line) => match line.parse::<Command>() {
                    Ok(Command::Quit) => return Ok(()),
                    Ok(Command::Open(next)) => {
                        match orchestrator.open_source(next.clone()) {
                            Ok(_) => {
                                ended = false;
                                live = next.kind().is_live();
                            }
                            Err(e) => eprintln!("{e}"),
                        }
                    }
                    Ok(command) => {
                        if let Err(e) = execute(orchestrator, command) {
                            eprintln!("{e}");
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                },
                Err(_) => stdin_closed = true,
            },
            recv(events) -> event => {
                if let Ok(event) = event {
                    match &event {
                        SessionEvent::SourceEnded { .. } => ended = true,
                        SessionEvent::SessionFault { error, .. } => {
                            return Err(format!("source failed: {error}").into());
                        }
                        _ => {}
                    }
                    report(&event);
                }
            },
            default(Duration::from_millis(100)) => {}
        }
        if stdin_closed {
            // Keep running without commands
            commands = crossbeam_channel::never();
        }

        let processed = orchestrator.snapshot().counters.processed;
        if max_frames.is_some_and(|max| processed >= max) {
            log::info!("Reached {processed} frames");
            return Ok(());
        }
        if ended && !live && orchestrator.wait_until_drained(Duration::from_millis(100)) {
            return Ok(());
        }
    }
}

fn execute(
    orchestrator: &mut PipelineOrchestrator,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Pause => print_playback(orchestrator.pause()?),
        Command::Resume => print_playback(orchestrator.resume()?),
        Command::Seek(position) => print_playback(orchestrator.seek(position)?),
        Command::Forward => print_playback(orchestrator.skip(true)?),
        Command::Rewind => print_playback(orchestrator.skip(false)?),
        Command::Stop => print_playback(orchestrator.stop()?),
        Command::Backend(kind) => {
            orchestrator.select_backend(kind);
            eprintln!("Switching to {kind} backend");
        }
        Command::Record(path) => {
            orchestrator.start_recording(&path)?;
            eprintln!("Recording to {}", path.display());
        }
        Command::EndRecording => finish_recording(orchestrator),
        Command::Photo(path) => {
            orchestrator.capture_still(&path)?;
            eprintln!("Saved {}", path.display());
        }
        Command::Status => print_summary(orchestrator),
        Command::Open(_) | Command::Quit => {}
    }
    Ok(())
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::BackendActivated(kind) => log::info!("Now detecting with {kind}"),
        SessionEvent::ReadinessFault { model, reason } => {
            log::warn!("{model} not available: {reason}")
        }
        SessionEvent::SourceEnded { .. } => log::info!("End of source"),
        SessionEvent::SessionFault { error, .. } => log::error!("{error}"),
        SessionEvent::RecordingStopped { destination, error } => match error {
            Some(e) => log::warn!("Recording to {} stopped: {e}", destination.display()),
            None => log::info!("Recording saved to {}", destination.display()),
        },
        SessionEvent::PlaybackChanged(state) => log::debug!("{}", describe_playback(&state)),
    }
}

fn print_playback(state: PlaybackState) {
    eprintln!("{}", describe_playback(&state));
}

fn describe_playback(state: &PlaybackState) -> String {
    let total = state
        .duration
        .map_or_else(|| "?".to_string(), |d| format!("{:.2}s", d.as_secs_f64()));
    format!(
        "{:?} at {:.2}s / {total}",
        state.status,
        state.position.as_secs_f64()
    )
}

fn finish_recording(orchestrator: &mut PipelineOrchestrator) {
    match orchestrator.stop_recording() {
        Some(Ok(summary)) => log::info!(
            "Recorded {} frames to {} ({} dropped)",
            summary.frames_written,
            summary.destination.display(),
            summary.frames_dropped
        ),
        Some(Err(e)) => log::warn!("Recording failed: {e}"),
        None => {}
    }
}

fn print_summary(orchestrator: &PipelineOrchestrator) {
    let snapshot = orchestrator.snapshot();
    let c = snapshot.counters;
    let backend = snapshot
        .active_backend
        .map_or_else(|| "none".to_string(), |b| b.to_string());
    eprintln!(
        "Backend {backend} (requested {}), classifier {:?}",
        snapshot.requested_backend, snapshot.classifier
    );
    eprintln!(
        "Frames: {} captured, {} processed, {} dropped (queue), {} skipped (display), {} dropped (recorder)",
        c.captured, c.processed, c.dropped_backpressure, c.dropped_presentation, c.dropped_recorder
    );
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn build_settings(cli: &Cli) -> Result<PipelineSettings, Box<dyn std::error::Error>> {
    let mut settings = match &cli.config {
        Some(path) => PipelineSettings::load_or_default(path),
        None => PipelineSettings::load(),
    };
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    if let Some(classes) = cli.classes {
        settings.vocabulary = classes;
    }
    if let Some(dir) = &cli.models_dir {
        settings.models_dir = Some(dir.clone());
    }
    if cli.no_pacing {
        settings.realtime_playback = false;
    }
    settings.validate()?;
    Ok(settings)
}

fn validate(cli: &Cli, descriptor: &SourceDescriptor) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = descriptor.path() {
        if !path.exists() {
            return Err(format!("Input file not found: {}", path.display()).into());
        }
    }
    if cli.output.is_some() && descriptor.kind() != SourceKind::Image {
        return Err("--output is only supported for image sources; use --record".into());
    }
    if cli.max_frames == Some(0) {
        return Err("--max-frames must be at least 1".into());
    }
    if let Some(dir) = &cli.models_dir {
        if !dir.is_dir() {
            return Err(format!("Models directory not found: {}", dir.display()).into());
        }
    }
    for path in [&cli.record, &cli.photo, &cli.output].into_iter().flatten() {
        check_parent(path)?;
    }
    Ok(())
}

fn check_parent(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            Err(format!("Directory not found: {}", parent.display()).into())
        }
        _ => Ok(()),
    }
}
