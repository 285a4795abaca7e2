use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use toolgate_receipts::{verify_log, JournalEntry};
use toolgate_sign::{sign, SignedEnvelope, Verifier, DEFAULT_REPLAY_WINDOW_SECS};
use toolgate_types::now_secs;

#[derive(Parser)]
#[command(name = "toolgate")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Episodes {
        #[command(subcommand)]
        action: EpisodeCommand,
        #[arg(long, default_value = "./episodes.jsonl")]
        path: PathBuf,
    },
    /// Print the signed-envelope headers for a body.
    Sign {
        #[arg(long, default_value = "POST")]
        method: String,
        #[arg(long)]
        path: String,
        #[arg(long)]
        secret: String,
        #[command(flatten)]
        body: BodyArgs,
    },
    /// Check an envelope against a body and secret.
    Verify {
        #[arg(long, default_value = "POST")]
        method: String,
        #[arg(long)]
        path: String,
        #[arg(long)]
        secret: String,
        #[arg(long)]
        timestamp: i64,
        #[arg(long)]
        digest: String,
        #[arg(long)]
        signature: String,
        #[arg(long, default_value_t = DEFAULT_REPLAY_WINDOW_SECS)]
        window: i64,
        #[command(flatten)]
        body: BodyArgs,
    },
}

#[derive(Subcommand)]
enum EpisodeCommand {
    Tail {
        #[arg(long, default_value_t = 10)]
        lines: usize,
    },
    Verify,
}

#[derive(Args)]
struct BodyArgs {
    #[arg(long, conflicts_with = "body_file")]
    body: Option<String>,
    #[arg(long)]
    body_file: Option<PathBuf>,
}

impl BodyArgs {
    fn read(&self) -> anyhow::Result<Vec<u8>> {
        match (&self.body, &self.body_file) {
            (Some(body), _) => Ok(body.clone().into_bytes()),
            (None, Some(path)) => std::fs::read(path).with_context(|| format!("reading {}", path.display())),
            (None, None) => Ok(Vec::new()),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Episodes { action, path } => match action {
            EpisodeCommand::Tail { lines } => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let all: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
                let start = all.len().saturating_sub(lines);
                for line in &all[start..] {
                    match serde_json::from_str::<JournalEntry>(line) {
                        Ok(entry) => {
                            let ep = entry.episode;
                            println!(
                                "{} {} {} {} {}",
                                ep.ts,
                                ep.id,
                                ep.episode_type.as_str(),
                                ep.decision,
                                ep.reason
                            );
                        }
                        Err(_) => println!("{line}"),
                    }
                }
            }
            EpisodeCommand::Verify => {
                let count = verify_log(&path)?;
                println!("episode log ok ({count} entries)");
            }
        },
        Command::Sign {
            method,
            path,
            secret,
            body,
        } => {
            let envelope = sign(&method, &path, now_secs(), Some(secret.as_bytes()), &body.read()?)?;
            for (name, value) in envelope.headers() {
                println!("{name}: {value}");
            }
        }
        Command::Verify {
            method,
            path,
            secret,
            timestamp,
            digest,
            signature,
            window,
            body,
        } => {
            let envelope = SignedEnvelope {
                method: method.to_ascii_uppercase(),
                path,
                timestamp,
                body_digest: digest,
                signature: Some(signature),
                request_id: String::new(),
            };
            match Verifier::new(secret)
                .with_window(window)
                .verify(&envelope, &body.read()?, now_secs())
            {
                Ok(()) => println!("signature ok"),
                Err(err) => bail!("signature rejected: {err}"),
            }
        }
    }

    Ok(())
}
