//! Parsing of the `!`-prefixed console commands.

use anyhow::{Context, Result, anyhow, bail};
use multiworld::ClientStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Check(Vec<i64>),
    Scout(Vec<i64>),
    Status(ClientStatus),
    Items,
    Sync,
    Players,
    Stats,
    Quit,
    Help,
    /// Anything that is not a command goes to the room chat.
    Chat(String),
}

pub const HELP: &str = "\
commands:
  !check <ids...>    mark locations checked
  !scout <ids...>    ask which items sit at locations
  !status <status>   unknown | connected | ready | playing | goal
  !items             list received items
  !sync              ask the server to resend everything
  !players           list players in the room
  !stats             message and byte counters
  !quit              disconnect and exit
anything else is sent as chat";

/// Parse one console line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('!') else {
        return Ok(Some(Command::Chat(line.to_string())));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let command = match name.as_str() {
        "check" => Command::Check(location_ids(&args)?),
        "scout" => Command::Scout(location_ids(&args)?),
        "status" => {
            let [status] = args.as_slice() else {
                bail!("usage: !status <unknown|connected|ready|playing|goal>");
            };
            Command::Status(status.parse().map_err(|e: String| anyhow!(e))?)
        }
        "items" => Command::Items,
        "sync" => Command::Sync,
        "players" => Command::Players,
        "stats" => Command::Stats,
        "quit" | "exit" => Command::Quit,
        "help" => Command::Help,
        other => bail!("unknown command `!{other}` (try !help)"),
    };
    Ok(Some(command))
}

fn location_ids(args: &[&str]) -> Result<Vec<i64>> {
    if args.is_empty() {
        bail!("expected at least one location id");
    }
    args.iter()
        .map(|arg| {
            arg.parse::<i64>()
                .with_context(|| format!("invalid location id `{arg}`"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_and_blank_lines() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(
            parse("hello there").unwrap(),
            Some(Command::Chat("hello there".into()))
        );
    }

    #[test]
    fn location_commands() {
        assert_eq!(
            parse("!check 12345 67890").unwrap(),
            Some(Command::Check(vec![12345, 67890]))
        );
        assert_eq!(parse("!SCOUT 7").unwrap(), Some(Command::Scout(vec![7])));
        assert!(parse("!check").is_err());
        assert!(parse("!check 12 abc").is_err());
    }

    #[test]
    fn status_command() {
        assert_eq!(
            parse("!status goal").unwrap(),
            Some(Command::Status(ClientStatus::Goal))
        );
        assert!(parse("!status").is_err());
        assert!(parse("!status finished").is_err());
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("!items").unwrap(), Some(Command::Items));
        assert_eq!(parse("!quit").unwrap(), Some(Command::Quit));
        assert_eq!(parse("!exit").unwrap(), Some(Command::Quit));
        assert!(parse("!fly").is_err());
    }
}
