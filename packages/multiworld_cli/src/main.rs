use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use multiworld::config::DEFAULT_CONFIG_FILE;
use multiworld::{
    FileConfig, NetworkItem, ServerConfig, Session, SessionConfig, SessionEvent, load_config,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

mod commands;

use commands::Command;

#[derive(Parser)]
#[command(name = "mwclient")]
#[command(about = "Connect to a multiworld server and play from the console")]
struct Cli {
    /// Configuration file (defaults to ./mwclient.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address: host, host:port, or ws://host:port/path
    #[arg(short, long)]
    address: Option<String>,

    /// Server port when the address names none
    #[arg(short, long)]
    port: Option<u16>,

    /// Slot name to authenticate as
    #[arg(short, long)]
    slot: Option<String>,

    /// Room password
    #[arg(long)]
    password: Option<String>,

    /// Game name sent with Connect
    #[arg(short, long)]
    game: Option<String>,

    /// Do not reconnect after a dropped connection
    #[arg(long)]
    no_reconnect: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    /// Command-line flags override the file/env configuration.
    fn apply(&self, fc: &mut FileConfig) {
        if let Some(address) = &self.address {
            fc.server.address = address.clone();
        }
        if let Some(port) = self.port {
            fc.server.port = port;
        }
        if let Some(slot) = &self.slot {
            fc.server.slot_name = slot.clone();
        }
        if let Some(password) = &self.password {
            fc.server.password = password.clone();
        }
        if let Some(game) = &self.game {
            fc.session.game = game.clone();
        }
        if self.no_reconnect {
            fc.session.auto_reconnect = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "mwclient=debug,multiworld=debug,ws_client=debug,info"
    } else {
        "mwclient=info,multiworld=info,ws_client=warn,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut fc: FileConfig = load_config(&config_path)
        .extract()
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;
    cli.apply(&mut fc);

    let server = ServerConfig::from_file(&fc.server);
    if server.slot_name.is_empty() {
        bail!("no slot name configured (use --slot or [server] slot_name)");
    }
    run(server, SessionConfig::from_file(&fc)).await
}

async fn run(server: ServerConfig, config: SessionConfig) -> Result<()> {
    let session = Session::new(config);
    let mut events = session
        .take_events()
        .context("session event receiver already taken")?;

    info!(
        address = %server.address,
        port = server.port,
        slot = %server.slot_name,
        session_id = session.session_id(),
        "starting"
    );
    if !session.connect(&server.address, server.port, &server.slot_name, &server.password) {
        // The reason was published as an event.
        if let Ok(SessionEvent::Error { message, .. }) = events.try_recv() {
            bail!("cannot connect: {message}");
        }
        bail!("cannot connect to {}:{}", server.address, server.port);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", commands::HELP);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match commands::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => execute(&session, command),
                    Ok(None) => {}
                    Err(e) => println!("error: {e:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.flush(Duration::from_secs(1));
    session.disconnect();
    info!(
        sent = session.messages_sent(),
        received = session.messages_received(),
        "disconnected"
    );
    Ok(())
}

fn execute(session: &Session, command: Command) {
    let needs_auth = !matches!(
        command,
        Command::Check(_) | Command::Items | Command::Players | Command::Stats | Command::Help
    );
    if needs_auth && !session.is_connected() {
        println!("not connected ({})", session.state());
        return;
    }

    match command {
        Command::Check(ids) => session.check_locations(&ids),
        Command::Scout(ids) => {
            session.scout_locations(&ids, 0);
        }
        Command::Status(status) => {
            session.update_status(status);
            println!("status: {}", status.as_str());
        }
        Command::Items => {
            let items = session.pending_items();
            println!("{} item(s) received", session.received_item_count());
            for item in &items {
                println!("  {}", describe_item(item));
            }
        }
        Command::Sync => {
            session.sync_data();
        }
        Command::Players => {
            for player in session.players() {
                println!(
                    "  team {} slot {}: {} ({})",
                    player.team, player.slot, player.alias, player.name
                );
            }
        }
        Command::Stats => match serde_json::to_string_pretty(&session.transport_stats()) {
            Ok(stats) => println!(
                "session: {} sent, {} received\ntransport: {stats}",
                session.messages_sent(),
                session.messages_received()
            ),
            Err(e) => warn!(error = %e, "failed to render stats"),
        },
        Command::Help => println!("{}", commands::HELP),
        Command::Chat(text) => {
            session.send_chat_message(&text);
        }
        Command::Quit => {}
    }
}

fn describe_item(item: &NetworkItem) -> String {
    let mut kind = Vec::new();
    if item.is_advancement() {
        kind.push("progression");
    }
    if item.is_useful() {
        kind.push("useful");
    }
    if item.is_trap() {
        kind.push("trap");
    }
    let kind = if kind.is_empty() {
        String::new()
    } else {
        format!(" [{}]", kind.join(", "))
    };
    format!(
        "item {} from player {} (location {}){kind}",
        item.item, item.player, item.location
    )
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Connected => println!("* connected"),
        SessionEvent::Disconnected { code, reason } => {
            println!("* disconnected ({code}{}{reason})", if reason.is_empty() { "" } else { ": " })
        }
        SessionEvent::ItemReceived { item } => println!("* received {}", describe_item(item)),
        SessionEvent::LocationChecked { location } => println!("* checked location {location}"),
        SessionEvent::ChatMessage { text } => println!("{text}"),
        SessionEvent::LocationsScouted { items } => {
            for item in items {
                println!("* location {} holds {}", item.location, describe_item(item));
            }
        }
        SessionEvent::Error { kind, message } => println!("! {kind}: {message}"),
    }
}
