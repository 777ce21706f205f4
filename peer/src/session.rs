use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use pokelink_battle::{BattleEngine, BattlePokemon, Species, StatBoosts};
use pokelink_protocol::{
    BattleSetup, CalculationReport, ChatContent, CommunicationMode, Message, MessageKind,
};
use tokio::net::ToSocketAddrs;
use tokio::time::Instant;

use crate::PeerError;
use crate::chat::ChatHandle;
use crate::config::SessionConfig;
use crate::events::{Agreement, BattleEvent, TurnOutcome, chat_event};
use crate::handler::{Handler, dispatch};
use crate::registry::PeerRegistry;
use crate::reliability::{Received, ReliableChannel};
use crate::state::{Role, TurnState};
use crate::transport::UdpTransport;

/// Status value sent in SPECTATOR_RESPONSE
const SPECTATOR_ACCEPTED: &str = "ACCEPTED";

/// HP and boosts of one pokemon, for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PokemonStatus {
    pub name: String,
    pub current_hp: u32,
    pub max_hp: u32,
    pub boosts: StatBoosts,
}

impl From<&BattlePokemon> for PokemonStatus {
    fn from(pokemon: &BattlePokemon) -> Self {
        Self {
            name: pokemon.name().to_string(),
            current_hp: pokemon.current_hp(),
            max_hp: pokemon.max_hp(),
            boosts: pokemon.boosts(),
        }
    }
}

/// Snapshot of a session for UIs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub role: Role,
    pub state: TurnState,
    pub seed: Option<u64>,
    pub local_addr: SocketAddr,
    pub opponent_addr: Option<SocketAddr>,
    pub spectators: usize,
    pub turn: u32,
    pub my_turn: bool,
    pub me: Option<PokemonStatus>,
    pub opponent: Option<PokemonStatus>,
}

/// One peer's side of a battle.
///
/// Owns the socket, the battle engine and local copies of both pokemon.
/// Every wait is bounded by [`SessionConfig`]; running out of time or
/// retries always lands in a terminal state.
pub struct BattleSession {
    role: Role,
    config: SessionConfig,
    channel: ReliableChannel,
    registry: Arc<RwLock<PeerRegistry>>,
    chat: ChatHandle,
    state: TurnState,
    opponent_addr: Option<SocketAddr>,
    seed: Option<u64>,
    engine: Option<BattleEngine>,
    me: Option<BattlePokemon>,
    opponent: Option<BattlePokemon>,
    my_turn: bool,
    turn: u32,
    events: Vec<BattleEvent>,
}

impl BattleSession {
    /// Bind a session that waits for a joiner
    pub async fn host(addr: impl ToSocketAddrs, config: SessionConfig) -> Result<Self, PeerError> {
        Self::bind(Role::Host, addr, config).await
    }

    /// Bind a session that connects to a host
    pub async fn joiner(addr: impl ToSocketAddrs, config: SessionConfig) -> Result<Self, PeerError> {
        Self::bind(Role::Joiner, addr, config).await
    }

    async fn bind(
        role: Role,
        addr: impl ToSocketAddrs,
        config: SessionConfig,
    ) -> Result<Self, PeerError> {
        let transport = UdpTransport::bind(addr).await?;
        let registry = Arc::new(RwLock::new(PeerRegistry::new()));
        let chat = ChatHandle::new(
            transport.clone(),
            Arc::clone(&registry),
            config.player_name.clone(),
        );
        tracing::info!(role = %role, local_addr = %transport.local_addr(), "Session bound");

        Ok(Self {
            role,
            config,
            channel: ReliableChannel::new(transport),
            registry,
            chat,
            state: TurnState::Disconnected,
            opponent_addr: None,
            seed: None,
            engine: None,
            me: None,
            opponent: None,
            my_turn: false,
            turn: 0,
            events: Vec::new(),
        })
    }

    // === Accessors ===

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    pub fn opponent_addr(&self) -> Option<SocketAddr> {
        self.opponent_addr
    }

    pub fn my_pokemon(&self) -> Option<&BattlePokemon> {
        self.me.as_ref()
    }

    pub fn opponent_pokemon(&self) -> Option<&BattlePokemon> {
        self.opponent.as_ref()
    }

    /// Whether this peer attacks next
    pub fn is_my_turn(&self) -> bool {
        self.my_turn && self.state == TurnState::WaitingForMove
    }

    pub fn spectators(&self) -> Vec<SocketAddr> {
        self.registry().spectators().to_vec()
    }

    /// Handle for sending chat from another task
    pub fn chat_handle(&self) -> ChatHandle {
        self.chat.clone()
    }

    /// Drain queued events
    pub fn take_events(&mut self) -> Vec<BattleEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            role: self.role,
            state: self.state,
            seed: self.seed,
            local_addr: self.local_addr(),
            opponent_addr: self.opponent_addr,
            spectators: self.registry().spectator_count(),
            turn: self.turn,
            my_turn: self.is_my_turn(),
            me: self.me.as_ref().map(PokemonStatus::from),
            opponent: self.opponent.as_ref().map(PokemonStatus::from),
        }
    }

    // === Handshake ===

    /// Host: wait for a HANDSHAKE_REQUEST and answer it with the battle seed.
    ///
    /// Spectators and chat arriving meanwhile are served as usual.
    pub async fn accept_player(&mut self, timeout: Duration) -> Result<u64, PeerError> {
        self.require_role(Role::Host)?;
        self.require_state(TurnState::Disconnected)?;

        let deadline = Instant::now() + timeout;
        while let Some(received) = self.next_received(deadline).await? {
            match received {
                Received::Message {
                    from,
                    message: Message::HandshakeRequest,
                } => {
                    let seed = self.config.seed.unwrap_or_else(rand::random);
                    if let Err(e) = self
                        .channel
                        .send_unreliable(Message::HandshakeResponse { seed }, from)
                        .await
                    {
                        return self.fail(TurnState::Error, e);
                    }
                    tracing::info!(opponent = %from, seed, "Player connected");
                    self.connected(from, seed);
                    return Ok(seed);
                }
                other => self.handle_incidental(other).await,
            }
        }

        Err(PeerError::Timeout("handshake request"))
    }

    /// Joiner: send HANDSHAKE_REQUEST until the host answers, within the
    /// configured number of attempts.
    pub async fn connect(&mut self, host: SocketAddr) -> Result<u64, PeerError> {
        self.require_role(Role::Joiner)?;
        self.require_state(TurnState::Disconnected)?;

        let policy = self.config.handshake;
        for attempt in 1..=policy.attempts() {
            tracing::info!(host = %host, attempt, "Sending handshake request");
            if let Err(e) = self
                .channel
                .send_unreliable(Message::HandshakeRequest, host)
                .await
            {
                return self.fail(TurnState::Error, e);
            }

            let deadline = Instant::now() + policy.timeout;
            while let Some(received) = self.next_received(deadline).await? {
                match received {
                    Received::Message {
                        from,
                        message: Message::HandshakeResponse { seed },
                    } if from == host => {
                        tracing::info!(host = %host, seed, "Connected to host");
                        self.connected(host, seed);
                        return Ok(seed);
                    }
                    other => self.handle_incidental(other).await,
                }
            }
        }

        tracing::error!(host = %host, attempts = policy.attempts(), "Handshake failed");
        self.set_state(TurnState::Error);
        Err(PeerError::HandshakeFailed {
            attempts: policy.attempts(),
        })
    }

    fn connected(&mut self, opponent: SocketAddr, seed: u64) {
        self.registry_mut().set_opponent(opponent);
        self.opponent_addr = Some(opponent);
        self.seed = Some(seed);
        self.engine = Some(BattleEngine::new(seed));
        self.set_state(TurnState::Connected);
        self.events.push(BattleEvent::Connected { seed, opponent });
    }

    // === Setup ===

    /// Send this peer's BATTLE_SETUP and wait for the opponent's.
    ///
    /// A local species the opponent would reject, or a malformed or invalid
    /// opponent setup, aborts with [`PeerError::InvalidSetup`] and leaves the
    /// session CONNECTED.
    pub async fn setup_battle(
        &mut self,
        species: Species,
        boosts: StatBoosts,
        communication_mode: CommunicationMode,
    ) -> Result<(), PeerError> {
        self.require_state(TurnState::Connected)?;

        // Hold our own pokemon to the rules applied to the opponent's
        let species = Species::from_record(&species.to_record())
            .map_err(|e| PeerError::InvalidSetup(e.to_string()))?;
        let me = BattlePokemon::new(species, boosts);
        let setup = BattleSetup {
            communication_mode,
            pokemon_name: me.name().to_string(),
            pokemon: me.species.to_record(),
            stat_boosts: boosts,
        };
        tracing::info!(pokemon = %me.name(), mode = communication_mode.as_str(), "Sending battle setup");
        if let Err(e) = self.send_to_opponent(Message::BattleSetup(setup)).await {
            return self.fail(TurnState::Error, e);
        }
        self.me = Some(me);
        self.set_state(TurnState::BattleReady);

        self.channel.redeliver_deferred();
        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            let Some(received) = self.next_received(deadline).await? else {
                return self.fail(TurnState::Error, PeerError::Timeout("opponent battle setup"));
            };
            match received {
                Received::Message {
                    from,
                    message: Message::BattleSetup(setup),
                } if self.is_opponent(from) => {
                    let species = match Species::from_record(&setup.pokemon) {
                        Ok(species) => species,
                        Err(e) => return self.reject_setup(e.to_string()),
                    };
                    tracing::info!(
                        pokemon = %setup.pokemon_name,
                        mode = setup.communication_mode.as_str(),
                        "Opponent ready"
                    );
                    self.opponent = Some(BattlePokemon::new(species, setup.stat_boosts));
                    self.my_turn = self.role == Role::Host;
                    self.turn = 1;
                    self.set_state(TurnState::WaitingForMove);
                    self.events.push(BattleEvent::OpponentReady {
                        pokemon_name: setup.pokemon_name,
                        communication_mode: setup.communication_mode,
                    });
                    return Ok(());
                }
                Received::Malformed {
                    from,
                    kind: MessageKind::BattleSetup,
                    error,
                } if self.is_opponent(from) => return self.reject_setup(error.to_string()),
                other => self.handle_incidental(other).await,
            }
        }
    }

    fn reject_setup<T>(&mut self, reason: String) -> Result<T, PeerError> {
        tracing::warn!(reason = %reason, "Rejecting opponent battle setup");
        self.me = None;
        self.set_state(TurnState::Connected);
        Err(PeerError::InvalidSetup(reason))
    }

    // === Turns ===

    /// Attack with `move_name`: compute and apply the result locally, commit
    /// it in a CALCULATION_REPORT and wait for the defender's verdict.
    ///
    /// If the defender faints, GAME_OVER follows.
    pub async fn attack(&mut self, move_name: &str, use_boost: bool) -> Result<TurnOutcome, PeerError> {
        self.require_state(TurnState::WaitingForMove)?;
        if !self.my_turn {
            return Err(PeerError::OutOfTurn("attack"));
        }
        let mark = self.events.len();

        let (engine, me, opponent) = self.battle_parts()?;
        let result = engine.execute_turn(me, opponent, move_name, use_boost)?;
        let report = result.report;
        tracing::info!(
            turn = self.turn,
            move_used = %report.move_used,
            damage = report.damage_dealt,
            defender_hp = report.defender_hp_remaining,
            "Committing turn"
        );

        self.set_state(TurnState::WaitingForConfirm);
        if let Err(e) = self
            .send_to_opponent(Message::CalculationReport(report.clone()))
            .await
        {
            return self.fail(TurnState::Error, e);
        }
        self.chat
            .relay_to_spectators(Message::CalculationReport(report.clone()))
            .await;

        let agreement = self.await_attack_verdict(&report).await?;
        let outcome_turn = self.turn;
        let mut trailing = Vec::new();

        if agreement != Agreement::Diverged {
            if result.defender_fainted {
                self.finish_as_winner(&mut trailing).await;
            } else {
                self.next_turn();
            }
        }

        let outcome = TurnOutcome {
            turn: outcome_turn,
            attacking: true,
            report,
            hit: result.outcome.hit,
            agreement,
            state: self.state,
        };
        Ok(self.settle(mark, outcome, trailing))
    }

    /// Wait for the opponent's commit, recompute it and confirm or dispute it.
    ///
    /// If this peer's pokemon faints, waits for the opponent's GAME_OVER.
    pub async fn defend(&mut self) -> Result<TurnOutcome, PeerError> {
        self.require_state(TurnState::WaitingForMove)?;
        if self.my_turn {
            return Err(PeerError::OutOfTurn("defend"));
        }
        let mark = self.events.len();

        self.channel.redeliver_deferred();
        let deadline = Instant::now() + self.config.turn_timeout;
        let theirs = loop {
            let Some(received) = self.next_received(deadline).await? else {
                return self.fail(TurnState::Error, PeerError::Timeout("opponent move"));
            };
            match received {
                Received::Message {
                    from,
                    message: Message::CalculationReport(report),
                } if self.is_opponent(from) => break report,
                Received::Malformed {
                    from,
                    kind: MessageKind::CalculationReport,
                    error,
                } if self.is_opponent(from) => {
                    return self.fail(TurnState::Error, PeerError::Parse(error));
                }
                other => self.handle_incidental(other).await,
            }
        };
        self.chat
            .relay_to_spectators(Message::CalculationReport(theirs.clone()))
            .await;
        self.set_state(TurnState::WaitingForConfirm);

        let (ours, hit) = self.recompute(&theirs)?;
        let agreement = if ours.resolution() == theirs.resolution() {
            if let Err(e) = self.send_to_opponent(Message::CalculationConfirm).await {
                return self.fail(TurnState::Error, e);
            }
            Agreement::Confirmed
        } else {
            tracing::warn!(
                ours = ?ours.resolution(),
                theirs = ?theirs.resolution(),
                "Calculation mismatch, requesting resolution"
            );
            if let Err(e) = self
                .send_to_opponent(Message::ResolutionRequest(ours.resolution()))
                .await
            {
                return self.fail(TurnState::Error, e);
            }
            self.await_defense_verdict().await?
        };

        let outcome_turn = self.turn;
        let mut trailing = Vec::new();
        if agreement != Agreement::Diverged {
            let fainted = self.me.as_ref().is_some_and(BattlePokemon::is_fainted);
            if fainted {
                self.await_game_over(&mut trailing).await?;
            } else {
                self.next_turn();
            }
        }

        let outcome = TurnOutcome {
            turn: outcome_turn,
            attacking: false,
            report: ours,
            hit,
            agreement,
            state: self.state,
        };
        Ok(self.settle(mark, outcome, trailing))
    }

    /// Play turns until the battle ends, asking `handler` for moves and
    /// forwarding every event to it.
    pub async fn run<H: Handler>(&mut self, handler: &mut H) -> Result<TurnState, PeerError> {
        self.dispatch_events(handler).await;

        while self.state == TurnState::WaitingForMove {
            let result = if self.my_turn {
                let (Some(me), Some(opponent)) = (&self.me, &self.opponent) else {
                    return Err(PeerError::NotConnected);
                };
                let choice = handler.choose_move(me, opponent).await;
                match self.attack(&choice.move_name, choice.use_boost).await {
                    // Nothing was sent, so the same turn can be retried
                    Err(PeerError::Battle(e)) => {
                        tracing::warn!(move_name = %choice.move_name, error = %e, "Move rejected");
                        handler.on_move_rejected(&choice, &e).await;
                        continue;
                    }
                    other => other,
                }
            } else {
                self.defend().await
            };
            self.dispatch_events(handler).await;
            result?;
        }

        Ok(self.state)
    }

    async fn dispatch_events<H: Handler>(&mut self, handler: &mut H) {
        for event in self.take_events() {
            dispatch(handler, &event).await;
        }
    }

    /// Reproduce the opponent's commit against local copies. A move this
    /// peer cannot reproduce yields a zero-damage result, which will not
    /// match the commit.
    fn recompute(&mut self, theirs: &CalculationReport) -> Result<(CalculationReport, bool), PeerError> {
        let (engine, me, opponent) = self.battle_parts()?;
        match engine.execute_turn(opponent, me, &theirs.move_used, theirs.special_attack_boost) {
            Ok(result) => Ok((result.report, result.outcome.hit)),
            Err(e) => {
                tracing::warn!(move_used = %theirs.move_used, error = %e, "Cannot reproduce opponent move");
                let report = CalculationReport {
                    attacker: opponent.name().to_string(),
                    move_used: theirs.move_used.clone(),
                    remaining_health: opponent.current_hp(),
                    damage_dealt: 0,
                    defender_hp_remaining: me.current_hp(),
                    status_message: e.to_string(),
                    special_attack_boost: theirs.special_attack_boost,
                };
                Ok((report, false))
            }
        }
    }

    /// Attacker side: CALCULATION_CONFIRM, or a RESOLUTION_REQUEST to judge
    async fn await_attack_verdict(&mut self, report: &CalculationReport) -> Result<Agreement, PeerError> {
        self.channel.redeliver_deferred();
        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            let Some(received) = self.next_received(deadline).await? else {
                return self.fail(TurnState::Error, PeerError::Timeout("calculation confirm"));
            };
            match received {
                Received::Message {
                    from,
                    message: Message::CalculationConfirm,
                } if self.is_opponent(from) => return Ok(Agreement::Confirmed),
                Received::Message {
                    from,
                    message: Message::ResolutionRequest(theirs),
                } if self.is_opponent(from) => {
                    let ours = report.resolution();
                    if theirs == ours {
                        tracing::info!("Resolution request matches local result, accepting");
                        if let Err(e) = self.send_to_opponent(Message::CalculationConfirm).await {
                            return self.fail(TurnState::Error, e);
                        }
                        return Ok(Agreement::Resolved);
                    }

                    tracing::error!(ours = ?ours, theirs = ?theirs, "Resolution failed, engines diverged");
                    if let Err(e) = self.send_to_opponent(Message::ResolutionRequest(ours)).await {
                        tracing::warn!(error = %e, "Could not deliver resolution verdict");
                    }
                    self.terminate(TurnState::Terminated, "calculation mismatch after resolution");
                    return Ok(Agreement::Diverged);
                }
                other => self.handle_incidental(other).await,
            }
        }
    }

    /// Defender side: after a RESOLUTION_REQUEST, a confirm accepts our
    /// values and a counter-request ends the battle
    async fn await_defense_verdict(&mut self) -> Result<Agreement, PeerError> {
        self.channel.redeliver_deferred();
        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            let Some(received) = self.next_received(deadline).await? else {
                self.terminate(TurnState::Terminated, "no verdict on resolution request");
                return Ok(Agreement::Diverged);
            };
            match received {
                Received::Message {
                    from,
                    message: Message::CalculationConfirm,
                } if self.is_opponent(from) => {
                    tracing::info!("Opponent accepted resolution");
                    return Ok(Agreement::Resolved);
                }
                Received::Message {
                    from,
                    message: Message::ResolutionRequest(theirs),
                } if self.is_opponent(from) => {
                    tracing::error!(theirs = ?theirs, "Opponent rejected resolution, engines diverged");
                    self.terminate(TurnState::Terminated, "calculation mismatch after resolution");
                    return Ok(Agreement::Diverged);
                }
                other => self.handle_incidental(other).await,
            }
        }
    }

    async fn finish_as_winner(&mut self, trailing: &mut Vec<BattleEvent>) {
        let (winner, loser) = self.names();
        tracing::info!(winner = %winner, loser = %loser, "Opponent fainted, sending GAME_OVER");

        let game_over = Message::GameOver {
            winner: winner.clone(),
            loser: loser.clone(),
        };
        self.chat.relay_to_spectators(game_over.clone()).await;
        let delivered = self.send_to_opponent(game_over).await;

        trailing.push(BattleEvent::GameOver { winner, loser });
        match delivered {
            Ok(()) => self.set_state(TurnState::GameOver),
            Err(e) => {
                tracing::warn!(error = %e, "GAME_OVER was not acknowledged");
                self.set_state(TurnState::Terminated);
                trailing.push(BattleEvent::Terminated {
                    state: TurnState::Terminated,
                    reason: format!("GAME_OVER not acknowledged: {}", e),
                });
            }
        }
    }

    async fn await_game_over(&mut self, trailing: &mut Vec<BattleEvent>) -> Result<(), PeerError> {
        self.channel.redeliver_deferred();
        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            let Some(received) = self.next_received(deadline).await? else {
                tracing::warn!("Fainted but GAME_OVER never arrived");
                self.set_state(TurnState::Terminated);
                trailing.push(BattleEvent::Terminated {
                    state: TurnState::Terminated,
                    reason: "GAME_OVER never arrived".to_string(),
                });
                return Ok(());
            };
            match received {
                Received::Message {
                    from,
                    message: Message::GameOver { winner, loser },
                } if self.is_opponent(from) => {
                    tracing::info!(winner = %winner, loser = %loser, "Battle lost");
                    self.chat
                        .relay_to_spectators(Message::GameOver {
                            winner: winner.clone(),
                            loser: loser.clone(),
                        })
                        .await;
                    self.set_state(TurnState::GameOver);
                    trailing.push(BattleEvent::GameOver { winner, loser });
                    self.linger().await;
                    return Ok(());
                }
                other => self.handle_incidental(other).await,
            }
        }
    }

    /// Keep reading for a while so a resent GAME_OVER still gets its ACK.
    /// The battle is already decided, so a socket error only ends the wait.
    async fn linger(&mut self) {
        let deadline = Instant::now() + self.config.linger;
        loop {
            match self.channel.recv_until(deadline).await {
                Ok(Some(received)) => self.handle_incidental(received).await,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Stopped lingering after GAME_OVER");
                    break;
                }
            }
        }
    }

    fn next_turn(&mut self) {
        self.my_turn = !self.my_turn;
        self.turn += 1;
        self.set_state(TurnState::WaitingForMove);
    }

    fn settle(&mut self, mark: usize, outcome: TurnOutcome, trailing: Vec<BattleEvent>) -> TurnOutcome {
        // The turn itself is reported before anything it caused
        let position = self.events[mark..]
            .iter()
            .position(|e| matches!(e, BattleEvent::Terminated { .. }))
            .map_or(self.events.len(), |i| mark + i);
        self.events
            .insert(position, BattleEvent::TurnResolved(outcome.clone()));
        self.events.extend(trailing);
        outcome
    }

    // === Out-of-band traffic ===

    /// Anything that is not the message a protocol step is waiting for.
    /// Failures here are logged and never end the battle.
    async fn handle_incidental(&mut self, received: Received) {
        if self.belongs_to_later_step(&received) {
            tracing::debug!(from = %received.from(), kind = %received.kind(), state = %self.state, "Deferring battle message");
            self.channel.defer(received);
            return;
        }

        let message = match received {
            Received::Message { from, message } => (from, message),
            Received::Malformed { from, kind, error } => {
                tracing::warn!(from = %from, kind = %kind, error = %error, state = %self.state, "Ignoring malformed message");
                return;
            }
        };

        match message {
            (from, Message::SpectatorRequest) => self.accept_spectator(from).await,
            (from, Message::HandshakeRequest) => self.answer_handshake(from).await,
            (from, Message::Chat { sender, content }) => {
                self.receive_chat(from, sender, content).await
            }
            (from, other) => {
                tracing::warn!(from = %from, kind = %other.kind(), state = %self.state, "Ignoring unexpected message");
            }
        }
    }

    /// Opponent battle traffic that arrived ahead of the step consuming it.
    /// It has already been ACKed and will not be resent.
    fn belongs_to_later_step(&self, received: &Received) -> bool {
        let battle_traffic = matches!(
            received.kind(),
            MessageKind::BattleSetup
                | MessageKind::CalculationReport
                | MessageKind::CalculationConfirm
                | MessageKind::ResolutionRequest
                | MessageKind::GameOver
        );
        // Before the handshake completes the host's address is not known yet
        let from_opponent = self
            .opponent_addr
            .is_none_or(|addr| addr == received.from());
        battle_traffic && from_opponent && !self.state.is_terminal()
    }

    async fn accept_spectator(&mut self, from: SocketAddr) {
        if self.is_opponent(from) {
            tracing::warn!(from = %from, "Opponent cannot also spectate");
            return;
        }

        let added = self.registry_mut().add_spectator(from);
        let response = Message::SpectatorResponse {
            status: SPECTATOR_ACCEPTED.to_string(),
            battle_state: self.state.as_str().to_string(),
        };
        if let Err(e) = self.channel.send_unreliable(response, from).await {
            tracing::warn!(spectator = %from, error = %e, "Failed to answer spectator request");
        }

        if added {
            tracing::info!(spectator = %from, "Spectator joined");
            self.events.push(BattleEvent::SpectatorJoined(from));
        }
    }

    async fn answer_handshake(&mut self, from: SocketAddr) {
        match (self.role, self.seed) {
            (Role::Host, Some(seed)) if self.is_opponent(from) => {
                tracing::debug!(from = %from, "Answering repeated handshake request");
                if let Err(e) = self
                    .channel
                    .send_unreliable(Message::HandshakeResponse { seed }, from)
                    .await
                {
                    tracing::warn!(from = %from, error = %e, "Failed to answer handshake request");
                }
            }
            _ => {
                tracing::warn!(from = %from, state = %self.state, "Ignoring handshake request");
            }
        }
    }

    async fn receive_chat(&mut self, from: SocketAddr, sender: String, content: ChatContent) {
        let known = self.registry().is_known(from);
        if !known {
            tracing::warn!(from = %from, "Ignoring chat from unknown address");
            return;
        }

        if let Some(event) = chat_event(sender.clone(), &content) {
            self.events.push(event);
            self.chat
                .relay(Message::Chat { sender, content }, Some(from))
                .await;
        }
    }

    /// Send a chat line to the opponent and spectators
    pub async fn send_chat(&self, text: &str) -> Result<usize, PeerError> {
        self.chat.send_text(text).await
    }

    /// Send sticker bytes to the opponent and spectators
    pub async fn send_sticker(&self, data: &[u8]) -> Result<usize, PeerError> {
        self.chat.send_sticker(data).await
    }

    /// Forget the opponent and all spectators. Chat handles stop reaching anyone.
    pub fn close(self) {
        self.registry_mut().clear();
        tracing::info!(state = %self.state, "Session closed");
    }

    // === Helpers ===

    /// Next message before `deadline`. A socket failure ends the battle in ERROR.
    async fn next_received(&mut self, deadline: Instant) -> Result<Option<Received>, PeerError> {
        match self.channel.recv_until(deadline).await {
            Ok(received) => Ok(received),
            Err(e) => self.fail(TurnState::Error, e),
        }
    }

    async fn send_to_opponent(&mut self, message: Message) -> Result<(), PeerError> {
        let addr = self.opponent_addr.ok_or(PeerError::NotConnected)?;
        let policy = self.config.ack;
        self.channel.send_reliable(message, addr, &policy).await?;
        Ok(())
    }

    fn battle_parts(
        &mut self,
    ) -> Result<(&mut BattleEngine, &mut BattlePokemon, &mut BattlePokemon), PeerError> {
        match (&mut self.engine, &mut self.me, &mut self.opponent) {
            (Some(engine), Some(me), Some(opponent)) => Ok((engine, me, opponent)),
            _ => Err(PeerError::NotConnected),
        }
    }

    /// (this peer's pokemon, opponent's pokemon)
    fn names(&self) -> (String, String) {
        let name = |p: &Option<BattlePokemon>| {
            p.as_ref()
                .map(|p| p.name().to_string())
                .unwrap_or_default()
        };
        (name(&self.me), name(&self.opponent))
    }

    fn is_opponent(&self, addr: SocketAddr) -> bool {
        self.opponent_addr == Some(addr)
    }

    fn require_state(&self, expected: TurnState) -> Result<(), PeerError> {
        if self.state != expected {
            return Err(PeerError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn require_role(&self, role: Role) -> Result<(), PeerError> {
        if self.role != role {
            return Err(PeerError::WrongRole(role));
        }
        Ok(())
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state != state {
            tracing::debug!(role = %self.role, from = %self.state, to = %state, "State transition");
            self.state = state;
        }
    }

    fn terminate(&mut self, state: TurnState, reason: &str) {
        tracing::warn!(role = %self.role, state = %state, reason, "Battle ended abnormally");
        self.set_state(state);
        self.events.push(BattleEvent::Terminated {
            state,
            reason: reason.to_string(),
        });
    }

    fn fail<T>(&mut self, state: TurnState, error: PeerError) -> Result<T, PeerError> {
        self.terminate(state, &error.to_string());
        Err(error)
    }

    fn registry(&self) -> RwLockReadGuard<'_, PeerRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, PeerRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}
