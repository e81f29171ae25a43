use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use mft_bridge::config::{BridgeConfig, CLASSIFIER_CLASSES, CLASSIFIER_INPUT_LEN, NER_INPUT_LEN, NER_LABELS};
use mft_bridge::{InboxProvider, InferenceBridge, MessageCapture};
use mft_core::model::{CompactGraph, GraphSpec};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Run the SMS classifier and entity models")]
struct Args {
    /// Directory holding the packaged model artifacts
    #[arg(long, env = "MFT_ASSET_ROOT", default_value = "assets")]
    assets: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write random demo artifacts under a directory
    WriteDemo {
        #[arg(long)]
        out: PathBuf,
        /// Vocabulary size of the demo models
        #[arg(long, default_value_t = 1024)]
        vocab: usize,
    },
    /// Load both models and print their tensor shapes
    Inspect,
    /// Classify a token sequence (zero-padded or truncated to 128)
    Classify {
        #[arg(long, value_delimiter = ',')]
        tokens: Vec<i32>,
    },
    /// Extract per-token label scores (zero-padded or truncated to 256)
    Extract {
        #[arg(long, value_delimiter = ',')]
        tokens: Vec<i32>,
    },
    /// List inbox messages newest first
    Inbox {
        #[arg(long)]
        db: PathBuf,
        /// YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS (UTC)
        #[arg(long)]
        since: Option<String>,
    },
}

fn pad_to(mut tokens: Vec<i32>, len: usize) -> Vec<i32> {
    tokens.resize(len, 0);
    tokens
}

fn parse_since(s: &str) -> Result<i64> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| anyhow!("unrecognized date: {}", s))
}

fn ready_bridge(assets: PathBuf) -> Result<InferenceBridge> {
    let mut bridge = InferenceBridge::new(BridgeConfig::new(&assets));
    bridge
        .try_initialize()
        .with_context(|| format!("failed to load models from {}", assets.display()))?;
    Ok(bridge)
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::WriteDemo { out, vocab } => {
            let config = BridgeConfig::new(&out);
            let classifier =
                CompactGraph::random(GraphSpec::sequence_classifier(CLASSIFIER_INPUT_LEN, CLASSIFIER_CLASSES).with_vocab(vocab));
            let ner = CompactGraph::random(GraphSpec::token_classifier(NER_INPUT_LEN, NER_LABELS).with_vocab(vocab));
            classifier
                .save(out.join(&config.classifier_path))
                .context("failed to write classifier model")?;
            ner.save(out.join(&config.ner_path))
                .context("failed to write entity model")?;
            println!("Saved demo models to {:?}", out);
        }
        Command::Inspect => {
            let bridge = ready_bridge(args.assets)?;
            for info in bridge.describe() {
                println!("{}: input {:?} -> output {:?}", info.name, info.input_shape, info.output_shape);
            }
        }
        Command::Classify { tokens } => {
            let mut bridge = ready_bridge(args.assets)?;
            let result = bridge
                .classify(&pad_to(tokens, CLASSIFIER_INPUT_LEN))
                .context("classification failed")?;
            println!("{:?}", result.scores());
            bridge.shutdown();
        }
        Command::Extract { tokens } => {
            let mut bridge = ready_bridge(args.assets)?;
            let result = bridge
                .extract_entities(&pad_to(tokens, NER_INPUT_LEN))
                .context("entity extraction failed")?;
            for (pos, row) in result.to_grid().outer_iter().enumerate() {
                println!("{:>3}: {:?}", pos, row.to_vec());
            }
            bridge.shutdown();
        }
        Command::Inbox { db, since } => {
            let start_date = since.as_deref().map(parse_since).transpose()?.unwrap_or(0);
            let capture = MessageCapture::new(InboxProvider::new(&db));
            let messages = capture
                .fetch(start_date)
                .with_context(|| format!("failed to read inbox {}", db.display()))?;
            for msg in messages {
                let when = msg
                    .received_at()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| msg.date.to_string());
                println!("{}  {}  {}", when, msg.address, msg.body);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run(Args::parse())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dates_and_datetimes() {
        assert_eq!(parse_since("1970-01-02").unwrap(), 86_400_000);
        assert_eq!(parse_since("1970-01-01T00:00:01").unwrap(), 1_000);
    }

    #[test]
    fn bad_date_is_reported() {
        let err = parse_since("yesterday").unwrap_err();
        assert_eq!(err.to_string(), "unrecognized date: yesterday");
    }

    #[test]
    fn missing_assets_keep_the_cause() {
        let dir = tempfile::tempdir().unwrap();
        let err = ready_bridge(dir.path().to_path_buf()).err().unwrap();
        assert!(err.to_string().starts_with("failed to load models from"));
        assert!(err.chain().count() >= 2);
        assert!(err.root_cause().to_string().contains("not found"));
    }
}
