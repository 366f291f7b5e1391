use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_voice::command::{NoMatchReason, Resolver};
use beacon_voice::grammar::{TEMPLATES, Vocabularies, compile};
use beacon_voice::model::ModelBuilder;
use beacon_voice::session::{AudioEvent, AudioSource};
use beacon_voice::voice::{MicrophoneConfig, MicrophoneSource};
use beacon_voice::worker::{
    DECODER_SAMPLE_RATE, EXIT_DECODER_INIT, RemoteLoader, SpeechToText, WorkerState, serve,
};
use beacon_voice::{Config, Daemon, Error};

/// Beacon Voice - offline voice control for smart-home gateways
#[derive(Parser)]
#[command(name = "beacon-voice", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/beacon/voice.toml)
    #[arg(short, long, env = "BEACON_VOICE_CONFIG")]
    config: Option<PathBuf>,

    /// Wake word override
    #[arg(long, env = "BEACON_VOICE_WAKE_WORD")]
    wake_word: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice control daemon (default)
    Run,
    /// Run the decode worker process
    Worker {
        /// Directory holding the published corpus and scorer
        #[arg(long)]
        models_dir: Option<PathBuf>,
        /// Loopback port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Interim transcript interval in milliseconds (0 disables)
        #[arg(long, default_value = "1000")]
        interim_ms: u64,
    },
    /// Print the compiled grammar corpus
    Grammar {
        /// Device name to include (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Parse and match a transcript without touching any device
    Resolve {
        /// Transcript to resolve
        transcript: String,
        /// Known device name (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Compile the grammar and build the language model once
    BuildModel {
        /// Device name to include (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Output directory (defaults to the configured models dir)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_voice=info",
        1 => "info,beacon_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(wake_word) = cli.wake_word {
        config.wake_word = wake_word.trim().to_lowercase();
        config.validate()?;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            tracing::info!(wake_word = %config.wake_word, "starting beacon voice");
            Daemon::new(config).run().await?;
        }
        Command::Worker {
            models_dir,
            port,
            interim_ms,
        } => return cmd_worker(config, models_dir, port, interim_ms).await,
        Command::Grammar { tags } => cmd_grammar(&config, &tags),
        Command::Resolve { transcript, tags } => cmd_resolve(&config, &transcript, &tags)?,
        Command::BuildModel { tags, out } => cmd_build_model(&config, &tags, out).await?,
        Command::TestMic { duration } => test_mic(config.microphone, duration).await?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Run the decode worker; exits with [`EXIT_DECODER_INIT`] if the decoder cannot start
async fn cmd_worker(
    config: Config,
    models_dir: Option<PathBuf>,
    port: Option<u16>,
    interim_ms: u64,
) -> anyhow::Result<ExitCode> {
    let models_dir = models_dir.unwrap_or(config.model.models_dir);
    let port = port.unwrap_or(config.worker.port);
    let interim = (interim_ms > 0).then(|| Duration::from_millis(interim_ms));
    let init_failed = || ExitCode::from(u8::try_from(EXIT_DECODER_INIT).unwrap_or(1));

    let stt = config
        .stt
        .api_key
        .ok_or_else(|| Error::Config("STT API key required for the decode worker".to_string()))
        .and_then(|key| {
            SpeechToText::new(config.stt.provider, key, config.stt.model, config.stt.endpoint)
        });
    let stt = match stt {
        Ok(stt) => stt,
        Err(e) => {
            tracing::error!(error = %e, "decoder failed to initialize");
            return Ok(init_failed());
        }
    };

    let loader = Arc::new(RemoteLoader::new(Arc::new(stt), DECODER_SAMPLE_RATE));
    let state = match WorkerState::init(models_dir, loader, interim).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "decoder failed to initialize");
            return Ok(init_failed());
        }
    };

    serve(state, port).await?;
    Ok(ExitCode::SUCCESS)
}

/// Print the compiled grammar corpus
fn cmd_grammar(config: &Config, tags: &[String]) {
    let corpus = compile(&TEMPLATES, &Vocabularies::standard(), tags, &config.wake_word);
    print!("{}", corpus.to_text());
}

/// Dry-run resolution against tags given on the command line
fn cmd_resolve(config: &Config, transcript: &str, tags: &[String]) -> anyhow::Result<()> {
    let resolver = Resolver::standard(config.match_threshold)?;
    let known: Vec<(String, String)> = tags.iter().map(|t| (t.clone(), t.clone())).collect();

    match resolver.match_tags(transcript, &known) {
        Ok((intent, candidate)) => {
            println!("device:     {}", candidate.tag);
            println!("similarity: {:.3}", candidate.similarity);
            println!("capability: {}", intent.capability);
            println!("operation:  {:?}", intent.operation);
        }
        Err(NoMatchReason::BelowThreshold { phrase, best }) => {
            println!(
                "no match: \"{phrase}\" is closest to \"{}\" ({:.3} < {:.2})",
                best.tag,
                best.similarity,
                resolver.threshold()
            );
        }
        Err(reason) => println!("no match: {reason}"),
    }

    Ok(())
}

/// Build the corpus and scorer once
async fn cmd_build_model(config: &Config, tags: &[String], out: Option<PathBuf>) -> anyhow::Result<()> {
    let out = out.unwrap_or_else(|| config.model.models_dir.clone());
    let corpus = compile(&TEMPLATES, &Vocabularies::standard(), tags, &config.wake_word);
    println!("Compiled {} phrases", corpus.len());

    let builder = ModelBuilder::new(
        config.model.tools_dir.clone(),
        config.model.alphabet(),
        config.model.tool_timeout,
    );
    let artifacts = builder.build(&corpus, &out).await?;

    println!("Corpus: {}", artifacts.corpus.display());
    println!("Scorer: {}", artifacts.scorer.display());
    Ok(())
}

/// Test microphone input
async fn test_mic(microphone: MicrophoneConfig, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut source = MicrophoneSource::new(microphone);
    source.start(DECODER_SAMPLE_RATE).await?;

    println!("Sample rate: {DECODER_SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut samples: Vec<i16> = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, source.next_event()).await {
                Ok(Ok(AudioEvent::Frame(frame))) => samples.extend(frame),
                Ok(Ok(AudioEvent::Silence)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }

        let energy = calculate_rms(&samples);
        let peak = samples
            .iter()
            .map(|&s| f32::from(s).abs() / 32768.0)
            .fold(0.0_f32, f32::max);

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

    source.pause().await;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Set microphone.device in voice.toml");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let s = f32::from(s) / 32768.0;
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}
