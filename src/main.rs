use anyhow::{Context, Result};
use chordia::analysis::Analyzer;
use chordia::click::{render_click_track, write_wav, ClickSink, SmartClick, TerminalClickSink};
use chordia::client::GeminiClient;
use chordia::config::{AppConfig, API_KEY_ENV};
use chordia::input::{self, AudioInput};
use chordia::media::MediaStore;
use chordia::model::{format_timestamp, AnalysisDocument, AudioMetadata, SongAnalysis};
use chordia::playback::{
    CancelToken, ClickDriver, SyncLoop, SystemClock, TimeObserver, TimeTracker, Transport,
};
use chordia::retry::ThreadSleeper;
use chordia::session::Session;
use chordia::simplify::{format_chord, Complexity};
use chordia::timeline::{Timeline, TimelineView};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "chordia", version, about = "Chord and song-structure transcription with a generative model")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
    Basic,
    Intermediate,
    Advanced,
}

impl From<LevelArg> for Complexity {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Basic => Complexity::Basic,
            LevelArg::Intermediate => Complexity::Intermediate,
            LevelArg::Advanced => Complexity::Advanced,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a recording: file, link, or microphone
    Analyze {
        /// Audio file to analyze
        file: Option<PathBuf>,

        /// Analyze a remote recording instead of a local file
        #[arg(long, conflicts_with_all = ["file", "record"])]
        url: Option<String>,

        /// Record this many seconds from the microphone
        #[arg(long, value_name = "SECS", conflicts_with = "file")]
        record: Option<u64>,

        /// Write an HTML report
        #[arg(long, value_name = "OUT")]
        html: Option<PathBuf>,

        /// Save the analysis as JSON for the other commands
        #[arg(long, value_name = "OUT")]
        json: Option<PathBuf>,

        /// Chord detail level (defaults to config)
        #[arg(long, value_enum)]
        complexity: Option<LevelArg>,

        /// Follow along with the timeline after analysis
        #[arg(long)]
        follow: bool,

        /// Sound the Smart Click while following
        #[arg(long, requires = "follow")]
        click: bool,
    },

    /// Print the chord table of a saved analysis
    Chords {
        analysis: PathBuf,

        #[arg(long, value_enum)]
        complexity: Option<LevelArg>,
    },

    /// Run the synchronized timeline in the terminal
    Play {
        analysis: PathBuf,

        /// Playback rate (0.25 - 4.0)
        #[arg(long, default_value_t = 1.0)]
        rate: f64,

        /// Start position in seconds
        #[arg(long, default_value_t = 0.0)]
        start: f64,

        /// Sound the Smart Click
        #[arg(long)]
        click: bool,

        #[arg(long, value_enum)]
        complexity: Option<LevelArg>,
    },

    /// Export a saved analysis as an HTML report
    Report {
        analysis: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum)]
        complexity: Option<LevelArg>,
    },

    /// Render the Smart Click for a whole song to a WAV file
    ClickTrack {
        analysis: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value_t = 1.0)]
        rate: f64,

        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();
    let level_or_default =
        |arg: Option<LevelArg>| arg.map(Complexity::from).unwrap_or(config.display.complexity);

    match cli.command {
        Commands::Analyze { file, url, record, html, json, complexity, follow, click } => {
            let level = level_or_default(complexity);
            let (audio, metadata) = if let Some(url) = url {
                input::from_url(&url).context("Invalid link")?
            } else if let Some(secs) = record {
                record_microphone(secs)?
            } else if let Some(path) = file {
                input::load_file(&path, config.max_upload_bytes())
                    .with_context(|| format!("Cannot use {}", path.display()))?
            } else {
                anyhow::bail!("Nothing to analyze. Pass a file, --url, or --record.");
            };

            let api_key = config.api_key().with_context(|| {
                format!("No API key. Set {API_KEY_ENV} or model.api_key in the config file.")
            })?;
            let client = GeminiClient::new(&config.model.endpoint, &api_key, config.timeout());
            let analyzer = Analyzer::new(client, &config.model.primary)
                .with_fallback(config.fallback_model())
                .with_retry_policy(config.retry_policy())
                .with_json_mode(config.model.json_mode)
                .with_progress(true);

            let mut session = Session::new(MediaStore::new());
            session.load_audio(audio, metadata.clone())?;
            let analysis = session.run_analysis(&analyzer).context("Analysis failed")?;

            print_overview(&analysis, &metadata);
            println!();
            print_chord_table(&analysis, level);

            let doc = AnalysisDocument { metadata, analysis };
            if let Some(path) = json {
                let text = serde_json::to_string_pretty(&doc)?;
                std::fs::write(&path, text)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("\nSaved analysis to {}", path.display());
            }
            if let Some(path) = html {
                chordia::report::write_report(&path, &doc.analysis, &doc.metadata, level)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Wrote report to {}", path.display());
            }
            if follow {
                if session.audio().and_then(|a| a.lease()).is_none() {
                    log::info!("Following a linked recording; start it in your player now");
                }
                run_playback(&doc, &config, 1.0, 0.0, click, level)?;
            }
        }

        Commands::Chords { analysis, complexity } => {
            let doc = load_document(&analysis)?;
            print_overview(&doc.analysis, &doc.metadata);
            println!();
            print_chord_table(&doc.analysis, level_or_default(complexity));
        }

        Commands::Play { analysis, rate, start, click, complexity } => {
            let doc = load_document(&analysis)?;
            run_playback(&doc, &config, rate, start, click, level_or_default(complexity))?;
        }

        Commands::Report { analysis, output, complexity } => {
            let doc = load_document(&analysis)?;
            chordia::report::write_report(
                &output,
                &doc.analysis,
                &doc.metadata,
                level_or_default(complexity),
            )
            .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Wrote report to {}", output.display());
        }

        Commands::ClickTrack { analysis, output, rate, sample_rate } => {
            let doc = load_document(&analysis)?;
            let samples = render_click_track(
                &doc.analysis,
                doc.duration(),
                rate,
                sample_rate,
                config.click_settings(),
                config.schedule_interval(),
            )?;
            write_wav(&output, &samples, sample_rate)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "Wrote {:.1}s click track to {}",
                samples.len() as f64 / sample_rate as f64,
                output.display()
            );
        }
    }

    Ok(())
}

#[cfg(feature = "microphone")]
fn record_microphone(secs: u64) -> Result<(AudioInput, AudioMetadata)> {
    println!("Recording {secs}s from the default microphone...");
    let recording = chordia::recorder::capture::record(std::time::Duration::from_secs(secs))
        .context("Recording failed")?;
    Ok(input::from_recording(recording))
}

#[cfg(not(feature = "microphone"))]
fn record_microphone(_secs: u64) -> Result<(AudioInput, AudioMetadata)> {
    anyhow::bail!("This build has no microphone support. Rebuild with `--features microphone`.")
}

fn load_document(path: &Path) -> Result<AnalysisDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    AnalysisDocument::from_text(&text, &name)
        .with_context(|| format!("{} is not a readable analysis", path.display()))
}

/// Follow the timeline (and optionally the click) until the song ends or
/// the user presses Enter.
fn run_playback(
    doc: &AnalysisDocument,
    config: &AppConfig,
    rate: f64,
    start: f64,
    click: bool,
    level: Complexity,
) -> Result<()> {
    let duration = doc.duration();
    if duration <= 0.0 {
        anyhow::bail!("The analysis has no timed chords to follow.");
    }

    let mut transport = Transport::new(SystemClock::default(), duration);
    transport.seek(start);
    transport.set_rate(rate);

    let mut view = TimelineView::new(
        Timeline::new(&doc.analysis),
        level,
        config.display.strip_width,
        std::io::stdout(),
    );
    let mut tracker = TimeTracker::default();

    let mut sink = TerminalClickSink::new(std::io::stdout());
    let mut smart_click = if click {
        let c = SmartClick::from_analysis(&doc.analysis, config.click_settings());
        if c.is_none() {
            eprintln!("No tempo in the analysis; click disabled.");
        }
        c
    } else {
        None
    };
    if let Some(c) = smart_click.as_mut() {
        c.set_enabled(true, &mut sink, transport.now());
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            cancel.cancel_on_line(std::io::stdin().lock());
        });
    }

    println!(
        "Playing {} from {} at {:.2}x. Press Enter to stop.",
        doc.metadata.file_name,
        format_timestamp(transport.position()),
        transport.rate()
    );
    transport.play();

    let sink_ref: &mut dyn ClickSink = &mut sink;
    let driver = smart_click
        .as_mut()
        .map(move |click| ClickDriver { click, sink: sink_ref });
    let mut observers: [&mut dyn TimeObserver; 2] = [&mut view, &mut tracker];
    let stats = SyncLoop::new(config.display.frame_rate, config.schedule_interval()).run(
        &mut transport,
        &mut observers,
        driver,
        &ThreadSleeper,
        &cancel,
    );
    println!();

    log::info!(
        "Stopped at {} after {} frames ({} scheduler ticks, {} clicks)",
        format_timestamp(tracker.position),
        stats.frames,
        stats.schedule_ticks,
        sink.fired()
    );
    Ok(())
}

fn print_overview(analysis: &SongAnalysis, metadata: &AudioMetadata) {
    if !metadata.file_name.is_empty() {
        println!("{}", metadata.file_name);
    }
    let tempo = analysis
        .bpm
        .map(|b| format!("{b:.0} BPM"))
        .unwrap_or_else(|| "tempo unknown".to_string());
    println!("Key: {}  Time: {}  Tempo: {}", analysis.key, analysis.time_signature, tempo);
    if let Some(c) = &analysis.complexity {
        println!("Complexity: {c}");
    }
    for m in &analysis.modulations {
        println!("Modulation: {m}");
    }
    if !analysis.summary.is_empty() {
        println!("\n{}", analysis.summary);
    }
}

/// Print the chord list with the section each chord falls in.
fn print_chord_table(analysis: &SongAnalysis, level: Complexity) {
    let timeline = Timeline::new(analysis);
    println!("{:>7}  {:<12} {:<16} {:>6} {:>5}", "Time", "Section", "Chord", "Len", "Conf");
    println!("{}", "-".repeat(52));
    for c in timeline.chords() {
        let section = timeline.section_at(c.start).map(|s| s.name.as_str()).unwrap_or("");
        let section: String = section.chars().take(12).collect();
        let conf = c
            .confidence
            .map(|v| format!("{:.0}%", v * 100.0))
            .unwrap_or_default();
        println!(
            "{:>7}  {:<12} {:<16} {:>5.1}s {:>5}",
            c.timestamp(),
            section,
            format_chord(c, level),
            c.duration,
            conf
        );
    }
    println!("\n{} chords, shown at {} level", analysis.chords.len(), level.label());
}
