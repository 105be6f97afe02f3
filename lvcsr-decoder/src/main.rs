//! lvcsr-decoder - two-pass LVCSR search from the command line
//!
//! Reads per-frame acoustic scores (JSON), runs the lexicon-tree beam search
//! and the best-first stack decoder, and prints the recognized sentences.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lvcsr_decoder::{
    load_scores, stream, version, Decoder, DecoderConfig, OutputFormat, OutputSink,
};
use lvcsr_search::LogProb;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};

/// Two-pass LVCSR decoder
#[derive(Parser, Debug)]
#[command(name = "lvcsr-decoder", version, about = "Two-pass LVCSR decoding search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Model bundle (overrides the configuration)
    #[arg(long, global = true, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Output format (overrides the configuration)
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,

    /// Number of sentences to find
    #[arg(long, global = true)]
    nbest: Option<usize>,

    /// Pass 1 beam width
    #[arg(long, global = true)]
    beam: Option<usize>,

    /// Split the input at long pauses (minimum pause length in frames)
    #[arg(long, global = true, value_name = "FRAMES")]
    segment: Option<usize>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode score files, one utterance each
    Decode {
        /// JSON score matrices ({"frames": [[...], ...]})
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Decode frames read from stdin, one JSON array per line
    Stream,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show version and build information
    Version {
        /// Include build metadata and supported formats
        #[arg(long)]
        detailed: bool,
    },
}

impl Cli {
    fn log_level(&self, config: Option<&DecoderConfig>) -> Level {
        if self.quiet {
            return Level::WARN;
        }
        match self.verbose {
            0 => config.map_or(Level::INFO, DecoderConfig::tracing_level),
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    fn load_config(&self) -> Result<DecoderConfig> {
        let mut config = match &self.config {
            Some(path) => DecoderConfig::load_from(path)?,
            None => DecoderConfig::load().context("Failed to load configuration")?,
        };
        if let Some(model) = &self.model {
            config.model_path = model.to_string_lossy().into_owned();
        }
        if let Some(format) = self.format {
            config.output = format;
        }
        if let Some(n) = self.nbest {
            config.search.pass2.nbest = n;
        }
        if let Some(beam) = self.beam {
            config.search.pass1.beam_width = beam;
        }
        if let Some(frames) = self.segment {
            config.search = config.search.segmentation(frames);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version { detailed } => {
            if *detailed {
                print!("{}", version::version_long());
            } else {
                println!("{}", version::version_short());
            }
            Ok(())
        }
        Commands::InitConfig { force } => {
            init_logging(cli.log_level(None));
            let mut config = DecoderConfig::default();
            if let Some(path) = &cli.config {
                config.config_path = path.clone();
            }
            if config.config_path.exists() && !force {
                warn!(
                    "⚠️ {} already exists, use --force to overwrite",
                    config.config_path.display()
                );
                return Ok(());
            }
            config.save()?;
            info!("📋 Configuration written to {}", config.config_path.display());
            Ok(())
        }
        Commands::Decode { inputs } => {
            let config = cli.load_config()?;
            init_logging(cli.log_level(Some(&config)));
            decode_files(&config, inputs)
        }
        Commands::Stream => {
            let config = cli.load_config()?;
            init_logging(cli.log_level(Some(&config)));
            decode_stdin(&config).await
        }
    }
}

fn init_logging(level: Level) {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();
}

fn decode_files(config: &DecoderConfig, inputs: &[PathBuf]) -> Result<()> {
    info!("🎙️ lvcsr-decoder v{}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration: {}", config.config_path.display());
    let decoder = Decoder::from_config(config)?;

    let mut failed = 0;
    for input in inputs {
        info!("🔎 Decoding {}", input.display());
        let outcome = load_scores(input, decoder.model()).and_then(|scores| {
            let mut sink = OutputSink::new(&decoder.model().vocab, config.output, io::stdout().lock());
            decoder.decode(&scores, &mut sink)?;
            sink.finish().context("Failed to write results")?;
            Ok(())
        });
        if let Err(e) = outcome {
            error!("{}: {:#}", input.display(), e);
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} inputs failed", failed, inputs.len());
    }
    Ok(())
}

async fn decode_stdin(config: &DecoderConfig) -> Result<()> {
    info!("🎙️ lvcsr-decoder v{} (streaming)", env!("CARGO_PKG_VERSION"));
    let decoder = Arc::new(Decoder::from_config(config)?);
    let format = config.output;

    let (sender, handle) = stream::spawn(decoder.clone(), config.stream_buffer, move |d| {
        Box::new(OutputSink::new(&d.model().vocab, format, io::stdout()))
    });

    let cancel = decoder.cancel_flag();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let frame: Vec<LogProb> = serde_json::from_str(line)
                    .with_context(|| format!("Bad frame line: {}", line))?;
                // a stopped worker reports its own error below
                if sender.send(frame).await.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("👋 Interrupted, finishing current input");
                cancel.cancel();
                break;
            }
        }
    }
    drop(sender);

    handle.await.context("Decoder worker panicked")??;
    Ok(())
}
