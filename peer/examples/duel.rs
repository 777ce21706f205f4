//! Play one battle from the terminal.
//!
//! Usage:
//!   cargo run --example duel -- host --bind 0.0.0.0:5000 --pokemon pikachu
//!   cargo run --example duel -- join --peer 127.0.0.1:5000 --pokemon squirtle
//!   cargo run --example duel -- spectate --peer 127.0.0.1:5000
//!
//! Set `RUST_LOG=pokelink_peer=debug` to see protocol traffic.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use pokelink_battle::{SpeciesLookup, starters};
use pokelink_peer::{
    BattleError, BattleEvent, BattlePokemon, BattleSession, CommunicationMode, Handler,
    MoveChoice, SessionConfig, Spectator, StatBoosts, TurnOutcome, TurnState,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Host,
    Join,
    Spectate,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer pokemon battle over UDP")]
struct Args {
    #[arg(value_enum)]
    mode: Mode,

    /// Local address to bind
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: String,

    /// Host address, for join and spectate
    #[arg(short, long)]
    peer: Option<SocketAddr>,

    /// Pokemon name or pokedex number
    #[arg(long, default_value = "pikachu")]
    pokemon: String,

    #[arg(short, long)]
    name: Option<String>,

    /// Fixed battle seed (host only)
    #[arg(long)]
    seed: Option<u64>,

    /// JSON session config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mirror battle traffic to spectators
    #[arg(long)]
    broadcast: bool,

    /// Always pick the first move instead of asking
    #[arg(long)]
    auto: bool,

    /// Seconds the host waits for a player
    #[arg(long, default_value = "300")]
    wait: u64,
}

struct Terminal {
    lines: Lines<BufReader<Stdin>>,
    auto: bool,
}

impl Terminal {
    fn new(auto: bool) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            auto,
        }
    }
}

#[async_trait]
impl Handler for Terminal {
    async fn choose_move(&mut self, me: &BattlePokemon, opponent: &BattlePokemon) -> MoveChoice {
        println!(
            "\n{} {}/{} HP  vs  {} {}/{} HP",
            me.name(),
            me.current_hp(),
            me.max_hp(),
            opponent.name(),
            opponent.current_hp(),
            opponent.max_hp()
        );
        let first = me.moves().first().cloned().unwrap_or_else(|| "Tackle".to_string());
        if self.auto {
            return MoveChoice::new(first);
        }

        for (i, name) in me.moves().iter().enumerate() {
            println!("  {}) {}", i + 1, name);
        }
        println!(
            "Pick a move (add ! to spend a special attack boost, {} left):",
            me.boosts().special_attack_uses
        );

        let line = match self.lines.next_line().await {
            Ok(Some(line)) => line,
            _ => return MoveChoice::new(first),
        };
        let (input, boosted) = match line.trim().strip_suffix('!') {
            Some(rest) => (rest.trim(), true),
            None => (line.trim(), false),
        };
        let name = input
            .parse::<usize>()
            .ok()
            .and_then(|i| me.moves().get(i.wrapping_sub(1)))
            .cloned()
            .unwrap_or_else(|| if input.is_empty() { first } else { input.to_string() });

        MoveChoice {
            move_name: name,
            use_boost: boosted,
        }
    }

    async fn on_move_rejected(&mut self, choice: &MoveChoice, error: &BattleError) {
        println!("Can't use {}: {}", choice.move_name, error);
    }

    async fn on_connected(&mut self, seed: u64, opponent: SocketAddr) {
        println!("Connected to {} (seed {})", opponent, seed);
    }

    async fn on_spectator_joined(&mut self, addr: SocketAddr) {
        println!("Spectator joined from {}", addr);
    }

    async fn on_opponent_ready(&mut self, pokemon_name: &str) {
        println!("Opponent sends out {}!", pokemon_name);
    }

    async fn on_turn(&mut self, outcome: &TurnOutcome) {
        println!(
            "[turn {}] {} ({} damage, {} HP left)",
            outcome.turn,
            outcome.report.status_message,
            outcome.report.damage_dealt,
            outcome.report.defender_hp_remaining
        );
    }

    async fn on_chat(&mut self, sender: &str, text: &str) {
        println!("<{}> {}", sender, text);
    }

    async fn on_sticker(&mut self, sender: &str, data: &[u8]) {
        println!("<{}> [sticker, {} bytes]", sender, data.len());
    }

    async fn on_game_over(&mut self, winner: &str, loser: &str) {
        println!("{} fainted. {} wins!", loser, winner);
    }

    async fn on_terminated(&mut self, state: TurnState, reason: &str) {
        println!("Battle ended in {}: {}", state, reason);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(name) = &args.name {
        config = config.with_player_name(name.clone());
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    match args.mode {
        Mode::Spectate => spectate(&args, &config).await,
        Mode::Host | Mode::Join => play(&args, config).await,
    }
}

async fn play(args: &Args, config: SessionConfig) -> Result<()> {
    let dex = starters();
    let species = dex
        .lookup(&args.pokemon)
        .cloned()
        .ok_or_else(|| anyhow!("Unknown pokemon '{}'", args.pokemon))?;

    let mut session = match args.mode {
        Mode::Host => {
            let mut session = BattleSession::host(args.bind.as_str(), config).await?;
            println!("Hosting on {}, waiting for a player...", session.local_addr());
            session
                .accept_player(Duration::from_secs(args.wait))
                .await
                .context("No player joined")?;
            session
        }
        _ => {
            let host = args.peer.context("--peer is required to join")?;
            let mut session = BattleSession::joiner(args.bind.as_str(), config).await?;
            session.connect(host).await?;
            session
        }
    };

    let mode = if args.broadcast {
        CommunicationMode::Broadcast
    } else {
        CommunicationMode::P2P
    };
    session
        .setup_battle(species, StatBoosts::default(), mode)
        .await?;

    let mut terminal = Terminal::new(args.auto);
    let state = session.run(&mut terminal).await?;
    println!("Final state: {}", state);
    session.close();
    Ok(())
}

async fn spectate(args: &Args, config: &SessionConfig) -> Result<()> {
    let host = args.peer.context("--peer is required to spectate")?;
    let mut spectator = Spectator::join(args.bind.as_str(), host, config).await?;
    println!("Watching {} (battle is {})", host, spectator.battle_state());

    loop {
        match spectator.next_event(Duration::from_secs(600)).await? {
            Some(BattleEvent::TurnReported(report)) => println!(
                "{} ({} damage, {} HP left)",
                report.status_message, report.damage_dealt, report.defender_hp_remaining
            ),
            Some(BattleEvent::Chat { sender, text }) => println!("<{}> {}", sender, text),
            Some(BattleEvent::GameOver { winner, loser }) => {
                println!("{} fainted. {} wins!", loser, winner);
                return Ok(());
            }
            Some(_) => {}
            None => return Err(anyhow!("No battle traffic for ten minutes")),
        }
    }
}
