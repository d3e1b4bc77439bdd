use std::env;

use anyhow::Context;
use change_stream::{OffsetStore, RedisOffsetStore, RedisOffsetStoreConfig, StreamOffset};
use chrono::{DateTime, Utc};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, PartialEq)]
enum Command {
    Get,
    Reset,
    SetTime(DateTime<Utc>),
}

impl Command {
    /// `None` for an unknown subcommand or a wrong argument count.
    fn parse(args: &[String]) -> anyhow::Result<Option<Self>> {
        let command = match args.get(1).map(String::as_str) {
            Some("get") if args.len() == 2 => Some(Command::Get),
            Some("reset") if args.len() == 2 => Some(Command::Reset),
            Some("set-time") if args.len() == 3 => {
                let ts = DateTime::parse_from_rfc3339(&args[2])
                    .with_context(|| format!("invalid timestamp: {}", args[2]))?
                    .with_timezone(&Utc);
                Some(Command::SetTime(ts))
            }
            _ => None,
        };
        Ok(command)
    }
}

fn usage() {
    eprintln!("Usage:");
    eprintln!("  change-stream-cli get");
    eprintln!("  change-stream-cli reset");
    eprintln!("  change-stream-cli set-time <rfc3339_ts>");
    eprintln!();
    eprintln!("Reads CHANGE_STREAM_REDIS_URL, CHANGE_STREAM_HASH and CHANGE_STREAM_KEY.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = Command::parse(&args)? else {
        usage();
        std::process::exit(1);
    };

    let config = RedisOffsetStoreConfig::from_env()
        .context("CHANGE_STREAM_HASH and CHANGE_STREAM_KEY must be set")?;
    let store = RedisOffsetStore::connect(&config).await?;

    match command {
        Command::Get => match store.get_offset().await? {
            Some(offset) => {
                println!("token: {}", offset.resume_token);
                match offset.timestamp {
                    Some(ts) => println!("ts:    {}", ts.to_rfc3339()),
                    None => println!("ts:    -"),
                }
            }
            None => println!("No offset stored for {}/{}", store.hash(), store.key()),
        },
        Command::Reset => {
            store.clear_offset().await?;
            println!("Cleared offset for {}/{}", store.hash(), store.key());
        }
        Command::SetTime(ts) => {
            store.set_offset(&StreamOffset::at_time(ts)).await?;
            println!(
                "Offset for {}/{} now starts at {}",
                store.hash(),
                store.key(),
                ts.to_rfc3339()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("change-stream-cli")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(Command::parse(&args(&["get"])).unwrap(), Some(Command::Get));
        assert_eq!(
            Command::parse(&args(&["reset"])).unwrap(),
            Some(Command::Reset)
        );
        assert_eq!(
            Command::parse(&args(&["set-time", "2024-05-01T10:00:00Z"])).unwrap(),
            Some(Command::SetTime(
                Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
            ))
        );
    }

    #[test]
    fn test_parse_rejects_bad_usage_before_connecting() {
        assert_eq!(Command::parse(&args(&[])).unwrap(), None);
        assert_eq!(Command::parse(&args(&["drop"])).unwrap(), None);
        assert_eq!(Command::parse(&args(&["get", "extra"])).unwrap(), None);
        assert_eq!(Command::parse(&args(&["set-time"])).unwrap(), None);
        assert!(Command::parse(&args(&["set-time", "yesterday"])).is_err());
    }
}
