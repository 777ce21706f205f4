use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use pokelink_battle::{BattleEngine, Type};
use pokelink_peer::{
    Agreement, BattleError, BattleEvent, BattlePokemon, BattleSession, CommunicationMode,
    Handler, Message, MoveChoice, PeerError, Received, ReliableChannel, RetryPolicy,
    SessionConfig, Species, Spectator, StatBoosts, TurnOutcome, TurnState, UdpTransport,
};
use pokelink_protocol::{BattleSetup, CalculationReport, Frame, Resolution};

const SEED: u64 = 42;

fn fast_config(name: &str) -> SessionConfig {
    SessionConfig {
        handshake: RetryPolicy::new(Duration::from_millis(100), 4),
        ack: RetryPolicy::new(Duration::from_millis(150), 4),
        response_timeout: Duration::from_secs(3),
        turn_timeout: Duration::from_secs(3),
        linger: Duration::from_millis(100),
        seed: Some(SEED),
        player_name: name.to_string(),
    }
}

fn species(name: &str, type1: Type, hp: u32, attack: u32, defense: u32) -> Species {
    Species {
        name: name.to_string(),
        pokedex_number: 0,
        type1,
        type2: None,
        hp,
        attack,
        defense,
        special_attack: attack,
        special_defense: defense,
        speed: 50,
        abilities: Vec::new(),
    }
}

fn sturdy_grass() -> Species {
    species("Leafwall", Type::Grass, 300, 49, 49)
}

fn sturdy_fire() -> Species {
    species("Emberwall", Type::Fire, 300, 52, 43)
}

fn battle_setup(species: &Species) -> BattleSetup {
    BattleSetup {
        communication_mode: CommunicationMode::P2P,
        pokemon_name: species.name.clone(),
        pokemon: species.to_record(),
        stat_boosts: StatBoosts::default(),
    }
}

fn ack_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(150), 4)
}

async fn scripted_channel() -> ReliableChannel {
    ReliableChannel::new(UdpTransport::bind("127.0.0.1:0").await.unwrap())
}

/// Next delivered message on a hand-driven channel
async fn next_message(channel: &mut ReliableChannel) -> (SocketAddr, Message) {
    match channel.recv(Duration::from_secs(3)).await.unwrap() {
        Some(Received::Message { from, message }) => (from, message),
        other => panic!("expected a message, got {:?}", other),
    }
}

async fn connected_pair() -> (BattleSession, BattleSession) {
    let mut host = BattleSession::host("127.0.0.1:0", fast_config("Ash"))
        .await
        .unwrap();
    let mut joiner = BattleSession::joiner("127.0.0.1:0", fast_config("Gary"))
        .await
        .unwrap();
    let host_addr = host.local_addr();

    let (accepted, connected) = tokio::join!(
        host.accept_player(Duration::from_secs(3)),
        joiner.connect(host_addr)
    );
    assert_eq!(accepted.unwrap(), SEED);
    assert_eq!(connected.unwrap(), SEED);
    (host, joiner)
}

async fn ready_pair(host_species: Species, joiner_species: Species) -> (BattleSession, BattleSession) {
    let (mut host, mut joiner) = connected_pair().await;
    let (a, b) = tokio::join!(
        host.setup_battle(host_species, StatBoosts::default(), CommunicationMode::P2P),
        joiner.setup_battle(joiner_species, StatBoosts::default(), CommunicationMode::P2P)
    );
    a.unwrap();
    b.unwrap();
    (host, joiner)
}

/// A real host in battle against a hand-driven joiner channel
async fn host_with_scripted_joiner(
    host_species: Species,
    joiner_species: Species,
) -> (BattleSession, ReliableChannel) {
    let mut host = BattleSession::host("127.0.0.1:0", fast_config("Ash"))
        .await
        .unwrap();
    let mut channel = scripted_channel().await;
    let host_addr = host.local_addr();

    let hosting = async {
        host.accept_player(Duration::from_secs(3)).await.unwrap();
        host.setup_battle(host_species, StatBoosts::default(), CommunicationMode::P2P)
            .await
            .unwrap();
    };
    let joining = async {
        channel
            .send_unreliable(Message::HandshakeRequest, host_addr)
            .await
            .unwrap();
        let (_, Message::HandshakeResponse { seed: SEED }) = next_message(&mut channel).await else {
            panic!("expected handshake response");
        };
        let (_, Message::BattleSetup(_)) = next_message(&mut channel).await else {
            panic!("expected battle setup");
        };
        channel
            .send_reliable(Message::BattleSetup(battle_setup(&joiner_species)), host_addr, &ack_policy())
            .await
            .unwrap();
    };
    tokio::join!(hosting, joining);
    assert_eq!(host.state(), TurnState::WaitingForMove);
    (host, channel)
}

#[tokio::test]
async fn test_handshake_gives_up_after_retries() {
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = SessionConfig {
        handshake: RetryPolicy::new(Duration::from_millis(30), 2),
        ..SessionConfig::default()
    };
    let mut joiner = BattleSession::joiner("127.0.0.1:0", config).await.unwrap();

    let started = std::time::Instant::now();
    let result = joiner.connect(silent.local_addr().unwrap()).await;

    assert!(matches!(result, Err(PeerError::HandshakeFailed { attempts: 3 })));
    assert_eq!(joiner.state(), TurnState::Error);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_setup_sent_before_handshake_response_is_kept() {
    let mut channel = scripted_channel().await;
    let mut joiner = BattleSession::joiner("127.0.0.1:0", fast_config("Gary"))
        .await
        .unwrap();
    let host_addr = channel.local_addr();

    // The first handshake response is lost, so the host's setup overtakes it
    let scripted_host = async {
        let (joiner_addr, Message::HandshakeRequest) = next_message(&mut channel).await else {
            panic!("expected handshake request");
        };
        channel
            .send_reliable(Message::BattleSetup(battle_setup(&sturdy_grass())), joiner_addr, &ack_policy())
            .await
            .unwrap();
        loop {
            match next_message(&mut channel).await {
                (from, Message::HandshakeRequest) => channel
                    .send_unreliable(Message::HandshakeResponse { seed: SEED }, from)
                    .await
                    .unwrap(),
                (_, Message::BattleSetup(setup)) => break setup,
                (_, other) => panic!("unexpected {:?}", other),
            }
        }
    };
    let joining = async {
        joiner.connect(host_addr).await?;
        joiner
            .setup_battle(sturdy_fire(), StatBoosts::default(), CommunicationMode::P2P)
            .await
    };
    let (joiner_setup, result) = tokio::join!(scripted_host, joining);

    result.unwrap();
    assert_eq!(joiner_setup.pokemon_name, "Emberwall");
    assert_eq!(joiner.state(), TurnState::WaitingForMove);
    assert_eq!(joiner.opponent_pokemon().unwrap().name(), "Leafwall");
    assert!(!joiner.is_my_turn());
}

#[tokio::test]
async fn test_local_species_is_validated_before_sending() {
    let (mut host, mut joiner) = connected_pair().await;

    let fainted = species("Husk", Type::Normal, 0, 10, 10);
    let result = host
        .setup_battle(fainted, StatBoosts::default(), CommunicationMode::P2P)
        .await;
    assert!(matches!(result, Err(PeerError::InvalidSetup(_))));
    assert_eq!(host.state(), TurnState::Connected);
    assert!(host.my_pokemon().is_none());

    // Nothing reached the joiner, so a valid setup still goes through
    let (a, b) = tokio::join!(
        host.setup_battle(sturdy_grass(), StatBoosts::default(), CommunicationMode::P2P),
        joiner.setup_battle(sturdy_fire(), StatBoosts::default(), CommunicationMode::P2P)
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(joiner.opponent_pokemon().unwrap().name(), "Leafwall");
}

#[tokio::test]
async fn test_setup_enters_battle_with_host_first() {
    let (mut host, mut joiner) = ready_pair(sturdy_grass(), sturdy_fire()).await;

    assert_eq!(host.state(), TurnState::WaitingForMove);
    assert_eq!(joiner.state(), TurnState::WaitingForMove);
    assert!(host.is_my_turn());
    assert!(!joiner.is_my_turn());
    assert_eq!(host.opponent_pokemon().unwrap().name(), "Emberwall");
    assert_eq!(joiner.opponent_pokemon().unwrap().max_hp(), 300);

    let events = joiner.take_events();
    assert!(events.contains(&BattleEvent::Connected {
        seed: SEED,
        opponent: host.local_addr(),
    }));
    assert!(events.contains(&BattleEvent::OpponentReady {
        pokemon_name: "Leafwall".to_string(),
        communication_mode: CommunicationMode::P2P,
    }));
    assert!(host.take_events().iter().any(|e| matches!(e, BattleEvent::OpponentReady { .. })));
}

#[tokio::test]
async fn test_turn_is_confirmed_with_seeded_damage() {
    let (mut host, mut joiner) = ready_pair(sturdy_grass(), sturdy_fire()).await;

    let mut engine = BattleEngine::new(SEED);
    let mut attacker = BattlePokemon::new(sturdy_grass(), StatBoosts::default());
    let mut defender = BattlePokemon::new(sturdy_fire(), StatBoosts::default());
    let expected = engine
        .execute_turn(&mut attacker, &mut defender, "Tackle", false)
        .unwrap()
        .report;

    let (attacked, defended) = tokio::join!(host.attack("Tackle", false), joiner.defend());
    let attacked = attacked.unwrap();
    let defended = defended.unwrap();

    assert_eq!(attacked.agreement, Agreement::Confirmed);
    assert_eq!(defended.agreement, Agreement::Confirmed);
    assert_eq!(attacked.report, expected);
    assert_eq!(defended.report, expected);
    assert!(expected.damage_dealt >= 1);

    assert_eq!(joiner.my_pokemon().unwrap().current_hp(), 300 - expected.damage_dealt);
    assert_eq!(host.opponent_pokemon().unwrap().current_hp(), 300 - expected.damage_dealt);

    assert!(!host.is_my_turn());
    assert!(joiner.is_my_turn());
    assert_eq!(host.status().turn, 2);
    assert!(matches!(
        host.take_events().last(),
        Some(BattleEvent::TurnResolved(outcome)) if outcome.attacking && outcome.turn == 1
    ));
}

#[tokio::test]
async fn test_boosts_are_spent_on_both_sides() {
    let (mut host, mut joiner) = ready_pair(sturdy_fire(), sturdy_grass()).await;

    let (attacked, defended) = tokio::join!(host.attack("Ember", true), joiner.defend());
    let attacked = attacked.unwrap();
    assert!(attacked.report.special_attack_boost);
    assert_eq!(defended.unwrap().agreement, Agreement::Confirmed);

    assert_eq!(host.my_pokemon().unwrap().boosts(), StatBoosts::new(4, 5));
    assert_eq!(joiner.opponent_pokemon().unwrap().boosts(), StatBoosts::new(4, 5));
    assert_eq!(joiner.my_pokemon().unwrap().boosts(), StatBoosts::new(5, 4));
    assert_eq!(host.opponent_pokemon().unwrap().boosts(), StatBoosts::new(5, 4));
}

#[tokio::test]
async fn test_turn_order_is_enforced() {
    let (mut host, mut joiner) = ready_pair(sturdy_grass(), sturdy_fire()).await;

    assert!(matches!(
        joiner.attack("Ember", false).await,
        Err(PeerError::OutOfTurn(_))
    ));
    assert!(matches!(host.defend().await, Err(PeerError::OutOfTurn(_))));
    assert!(matches!(
        joiner.accept_player(Duration::from_millis(10)).await,
        Err(PeerError::WrongRole(_))
    ));
    assert!(matches!(
        host.attack("Hydro Pump", false).await,
        Err(PeerError::Battle(_))
    ));
    assert_eq!(host.state(), TurnState::WaitingForMove);
}

#[derive(Default)]
struct Recorder {
    game_over: Option<(String, String)>,
    turns: usize,
}

#[async_trait]
impl Handler for Recorder {
    async fn on_turn(&mut self, _outcome: &TurnOutcome) {
        self.turns += 1;
    }

    async fn on_game_over(&mut self, winner: &str, loser: &str) {
        self.game_over = Some((winner.to_string(), loser.to_string()));
    }
}

#[tokio::test]
async fn test_run_until_faint() {
    let strong = species("Bruiser", Type::Normal, 100, 200, 50);
    let fragile = species("Paper", Type::Normal, 5, 10, 10);
    let (mut host, mut joiner) = ready_pair(strong, fragile).await;

    let mut host_handler = Recorder::default();
    let mut joiner_handler = Recorder::default();
    let (host_end, joiner_end) = tokio::join!(
        host.run(&mut host_handler),
        joiner.run(&mut joiner_handler)
    );

    assert_eq!(host_end.unwrap(), TurnState::GameOver);
    assert_eq!(joiner_end.unwrap(), TurnState::GameOver);
    assert!(joiner.my_pokemon().unwrap().is_fainted());

    let expected = Some(("Bruiser".to_string(), "Paper".to_string()));
    assert_eq!(host_handler.game_over, expected);
    assert_eq!(joiner_handler.game_over, expected);
    assert_eq!(host_handler.turns, 1);
    assert_eq!(joiner_handler.turns, 1);
}

/// Picks a move its pokemon does not know, then falls back to the first one
#[derive(Default)]
struct Fumbler {
    rejected: Vec<String>,
}

#[async_trait]
impl Handler for Fumbler {
    async fn choose_move(&mut self, me: &BattlePokemon, _opponent: &BattlePokemon) -> MoveChoice {
        if self.rejected.is_empty() {
            return MoveChoice::new("Hydro Pump");
        }
        MoveChoice::new(me.moves()[0].clone())
    }

    async fn on_move_rejected(&mut self, choice: &MoveChoice, error: &BattleError) {
        assert!(matches!(error, BattleError::MoveNotAvailable { .. }));
        self.rejected.push(choice.move_name.clone());
    }
}

#[tokio::test]
async fn test_run_asks_again_after_rejected_move() {
    let strong = species("Bruiser", Type::Normal, 100, 200, 50);
    let fragile = species("Paper", Type::Normal, 5, 10, 10);
    let (mut host, mut joiner) = ready_pair(strong, fragile).await;

    let mut host_handler = Fumbler::default();
    let mut joiner_handler = Recorder::default();
    let (host_end, joiner_end) = tokio::join!(
        host.run(&mut host_handler),
        joiner.run(&mut joiner_handler)
    );

    assert_eq!(host_end.unwrap(), TurnState::GameOver);
    assert_eq!(joiner_end.unwrap(), TurnState::GameOver);
    assert_eq!(host_handler.rejected, vec!["Hydro Pump".to_string()]);
    assert_eq!(joiner_handler.turns, 1);
}

#[tokio::test]
async fn test_unacked_game_over_terminates_winner() {
    let strong = species("Bruiser", Type::Normal, 100, 200, 50);
    let fragile = species("Paper", Type::Normal, 5, 10, 10);
    let (mut host, mut channel) = host_with_scripted_joiner(strong, fragile).await;
    let host_addr = host.local_addr();

    // Confirms the fatal commit, then never reads again
    let defender = async {
        let (_, Message::CalculationReport(report)) = next_message(&mut channel).await else {
            panic!("expected calculation report");
        };
        channel
            .send_sequenced(Message::CalculationConfirm, host_addr)
            .await
            .unwrap();
        report
    };
    let (attacked, report) = tokio::join!(host.attack("Tackle", false), defender);

    let outcome = attacked.unwrap();
    assert_eq!(report.defender_hp_remaining, 0);
    assert_eq!(outcome.agreement, Agreement::Confirmed);
    assert_eq!(outcome.state, TurnState::Terminated);
    assert_eq!(host.state(), TurnState::Terminated);

    let events = host.take_events();
    assert!(events.contains(&BattleEvent::GameOver {
        winner: "Bruiser".to_string(),
        loser: "Paper".to_string(),
    }));
    assert!(events
        .iter()
        .any(|e| matches!(e, BattleEvent::Terminated { state: TurnState::Terminated, .. })));
}

#[tokio::test]
async fn test_unacked_report_ends_in_error() {
    let (mut host, _silent) = host_with_scripted_joiner(sturdy_grass(), sturdy_fire()).await;

    let started = std::time::Instant::now();
    let result = host.attack("Tackle", false).await;

    assert!(matches!(result, Err(PeerError::AckTimeout { attempts: 5, .. })));
    assert_eq!(host.state(), TurnState::Error);
    assert!(host
        .take_events()
        .iter()
        .any(|e| matches!(e, BattleEvent::Terminated { state: TurnState::Error, .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_attacker_terminates_when_resolution_disagrees() {
    let (mut host, mut channel) = host_with_scripted_joiner(sturdy_grass(), sturdy_fire()).await;
    let host_addr = host.local_addr();

    let defender = async {
        let (_, Message::CalculationReport(report)) = next_message(&mut channel).await else {
            panic!("expected calculation report");
        };
        let mut disputed = report.resolution();
        disputed.damage_dealt += 1;
        disputed.defender_hp_remaining -= 1;
        channel
            .send_reliable(Message::ResolutionRequest(disputed), host_addr, &ack_policy())
            .await
            .unwrap();

        let (_, verdict) = next_message(&mut channel).await;
        let after = channel.recv(Duration::from_millis(500)).await.unwrap();
        (report, verdict, after)
    };
    let (attacked, (report, verdict, after)) =
        tokio::join!(host.attack("Tackle", false), defender);

    let outcome = attacked.unwrap();
    assert_eq!(outcome.agreement, Agreement::Diverged);
    assert_eq!(host.state(), TurnState::Terminated);
    assert_eq!(verdict, Message::ResolutionRequest(report.resolution()));
    assert_eq!(after, None);
    assert!(host
        .take_events()
        .iter()
        .any(|e| matches!(e, BattleEvent::Terminated { state: TurnState::Terminated, .. })));
}

#[tokio::test]
async fn test_resent_report_is_applied_once() {
    let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let mut channel = ReliableChannel::new(transport.clone());
    let mut joiner = BattleSession::joiner("127.0.0.1:0", fast_config("Gary"))
        .await
        .unwrap();
    let host_addr = channel.local_addr();

    let scripted_host = async {
        let mut engine = BattleEngine::new(SEED);
        let mut host_mon = BattlePokemon::new(sturdy_grass(), StatBoosts::default());
        let mut joiner_mon = BattlePokemon::new(sturdy_fire(), StatBoosts::default());

        let (joiner_addr, Message::HandshakeRequest) = next_message(&mut channel).await else {
            panic!("expected handshake request");
        };
        channel
            .send_unreliable(Message::HandshakeResponse { seed: SEED }, joiner_addr)
            .await
            .unwrap();
        let (_, Message::BattleSetup(_)) = next_message(&mut channel).await else {
            panic!("expected battle setup");
        };
        channel
            .send_reliable(Message::BattleSetup(battle_setup(&sturdy_grass())), joiner_addr, &ack_policy())
            .await
            .unwrap();

        // Turn 1: the same commit goes out twice under one sequence number
        let first = engine
            .execute_turn(&mut host_mon, &mut joiner_mon, "Tackle", false)
            .unwrap()
            .report;
        let seq = channel
            .send_sequenced(Message::CalculationReport(first.clone()), joiner_addr)
            .await
            .unwrap();
        let copy = Frame::sequenced(seq, Message::CalculationReport(first.clone()));
        transport.send_to(&copy.to_bytes(), joiner_addr).await.unwrap();
        channel.await_ack(seq, &ack_policy()).await.unwrap();
        assert_eq!(next_message(&mut channel).await.1, Message::CalculationConfirm);

        // Turn 2: the joiner attacks
        let (_, Message::CalculationReport(theirs)) = next_message(&mut channel).await else {
            panic!("expected calculation report");
        };
        let ours = engine
            .execute_turn(&mut joiner_mon, &mut host_mon, &theirs.move_used, theirs.special_attack_boost)
            .unwrap()
            .report;
        assert_eq!(ours, theirs);
        channel
            .send_reliable(Message::CalculationConfirm, joiner_addr, &ack_policy())
            .await
            .unwrap();

        // Turn 3
        let third = engine
            .execute_turn(&mut host_mon, &mut joiner_mon, "Tackle", false)
            .unwrap()
            .report;
        channel
            .send_reliable(Message::CalculationReport(third.clone()), joiner_addr, &ack_policy())
            .await
            .unwrap();
        assert_eq!(next_message(&mut channel).await.1, Message::CalculationConfirm);
        (first, third)
    };
    let joining = async {
        joiner.connect(host_addr).await?;
        joiner
            .setup_battle(sturdy_fire(), StatBoosts::default(), CommunicationMode::P2P)
            .await?;
        let first = joiner.defend().await?;
        joiner.attack("Ember", false).await?;
        let third = joiner.defend().await?;
        Ok::<_, PeerError>((first, third))
    };
    let ((first, third), played) = tokio::join!(scripted_host, joining);
    let (defended_first, defended_third) = played.unwrap();

    assert_eq!(defended_first.report, first);
    assert_eq!(defended_third.report, third);
    assert_eq!(defended_third.agreement, Agreement::Confirmed);
    assert_eq!(defended_third.turn, 3);
    assert_eq!(
        joiner.my_pokemon().unwrap().current_hp(),
        300 - first.damage_dealt - third.damage_dealt
    );
}

/// A hand-driven host that commits whatever report it is given
async fn scripted_host(
    channel: &mut ReliableChannel,
    host_species: &Species,
    report: CalculationReport,
) -> Option<Resolution> {
    let policy = ack_policy();
    let timeout = Duration::from_secs(3);

    let Some(Received::Message {
        from: joiner,
        message: Message::HandshakeRequest,
    }) = channel.recv(timeout).await.unwrap()
    else {
        panic!("expected handshake request");
    };
    channel
        .send_unreliable(Message::HandshakeResponse { seed: SEED }, joiner)
        .await
        .unwrap();

    let Some(Received::Message {
        message: Message::BattleSetup(_),
        ..
    }) = channel.recv(timeout).await.unwrap()
    else {
        panic!("expected battle setup");
    };
    channel
        .send_reliable(Message::BattleSetup(battle_setup(host_species)), joiner, &policy)
        .await
        .unwrap();

    let resolution = report.resolution();
    channel
        .send_reliable(Message::CalculationReport(report), joiner, &policy)
        .await
        .unwrap();

    match channel.recv(timeout).await.unwrap() {
        Some(Received::Message {
            message: Message::ResolutionRequest(theirs),
            ..
        }) => {
            channel
                .send_reliable(Message::ResolutionRequest(resolution), joiner, &policy)
                .await
                .unwrap();
            Some(theirs)
        }
        _ => None,
    }
}

async fn scripted_joiner(
    joiner: &mut BattleSession,
    host: SocketAddr,
) -> Result<TurnOutcome, PeerError> {
    joiner.connect(host).await?;
    joiner
        .setup_battle(sturdy_fire(), StatBoosts::default(), CommunicationMode::P2P)
        .await?;
    joiner.defend().await
}

#[tokio::test]
async fn test_mismatch_terminates_after_resolution() {
    let mut channel = ReliableChannel::new(UdpTransport::bind("127.0.0.1:0").await.unwrap());
    let mut joiner = BattleSession::joiner("127.0.0.1:0", fast_config("Gary"))
        .await
        .unwrap();
    let bogus = CalculationReport {
        attacker: "Leafwall".to_string(),
        move_used: "Tackle".to_string(),
        remaining_health: 300,
        damage_dealt: 250,
        defender_hp_remaining: 50,
        status_message: "Leafwall used Tackle!".to_string(),
        special_attack_boost: false,
    };

    let host_addr = channel.local_addr();
    let host_species = sturdy_grass();
    let (theirs, defended) = tokio::join!(
        scripted_host(&mut channel, &host_species, bogus),
        scripted_joiner(&mut joiner, host_addr)
    );

    let theirs = theirs.expect("joiner should request resolution");
    assert_ne!(theirs.damage_dealt, 250);
    assert_eq!(theirs.defender_hp_remaining, 300 - theirs.damage_dealt);

    let outcome = defended.unwrap();
    assert_eq!(outcome.agreement, Agreement::Diverged);
    assert_eq!(joiner.state(), TurnState::Terminated);
    assert!(joiner
        .take_events()
        .iter()
        .any(|e| matches!(e, BattleEvent::Terminated { state: TurnState::Terminated, .. })));
}

#[tokio::test]
async fn test_invalid_opponent_setup_is_rejected() {
    let mut channel = ReliableChannel::new(UdpTransport::bind("127.0.0.1:0").await.unwrap());
    let mut joiner = BattleSession::joiner("127.0.0.1:0", fast_config("Gary"))
        .await
        .unwrap();
    let host_addr = channel.local_addr();
    let policy = ack_policy();

    let fake_host = async {
        let Some(Received::Message { from, .. }) =
            channel.recv(Duration::from_secs(3)).await.unwrap()
        else {
            panic!("expected handshake request");
        };
        channel
            .send_unreliable(Message::HandshakeResponse { seed: SEED }, from)
            .await
            .unwrap();
        channel.recv(Duration::from_secs(3)).await.unwrap();

        let mut record = sturdy_grass().to_record();
        record.hp = 0;
        let setup = BattleSetup {
            communication_mode: CommunicationMode::P2P,
            pokemon_name: record.name.clone(),
            pokemon: record,
            stat_boosts: StatBoosts::default(),
        };
        channel
            .send_reliable(Message::BattleSetup(setup), from, &policy)
            .await
            .unwrap();
    };
    let setup = async {
        joiner.connect(host_addr).await?;
        joiner
            .setup_battle(sturdy_fire(), StatBoosts::default(), CommunicationMode::P2P)
            .await
    };
    let ((), result) = tokio::join!(fake_host, setup);

    assert!(matches!(result, Err(PeerError::InvalidSetup(_))));
    assert_eq!(joiner.state(), TurnState::Connected);
    assert!(joiner.my_pokemon().is_none());
}

#[tokio::test]
async fn test_spectator_sees_commits_and_chat() {
    let mut host = BattleSession::host("127.0.0.1:0", fast_config("Ash"))
        .await
        .unwrap();
    let mut joiner = BattleSession::joiner("127.0.0.1:0", fast_config("Gary"))
        .await
        .unwrap();
    let host_addr = host.local_addr();
    let spectator_config = fast_config("Brock");

    let (accepted, spectator) = tokio::join!(host.accept_player(Duration::from_secs(3)), async {
        let spectator = Spectator::join("127.0.0.1:0", host_addr, &spectator_config).await;
        joiner.connect(host_addr).await.unwrap();
        spectator
    });
    accepted.unwrap();
    let mut spectator = spectator.unwrap();
    assert_eq!(spectator.battle_state(), "DISCONNECTED");
    assert_eq!(host.status().spectators, 1);

    let (a, b) = tokio::join!(
        host.setup_battle(sturdy_grass(), StatBoosts::default(), CommunicationMode::Broadcast),
        joiner.setup_battle(sturdy_fire(), StatBoosts::default(), CommunicationMode::Broadcast)
    );
    a.unwrap();
    b.unwrap();

    let (attacked, _, seen) = tokio::join!(
        host.attack("Vine Whip", false),
        joiner.defend(),
        spectator.next_event(Duration::from_secs(3))
    );
    let attacked = attacked.unwrap();
    assert_eq!(
        seen.unwrap(),
        Some(BattleEvent::TurnReported(attacked.report))
    );

    // The joiner chats then attacks; the host relays the chat while defending
    let (sent, defended) = tokio::join!(
        async {
            let sent = joiner.send_chat("good luck").await;
            joiner.attack("Ember", false).await.unwrap();
            sent
        },
        host.defend()
    );
    defended.unwrap();
    assert_eq!(sent.unwrap(), 1);

    let mut relayed = Vec::new();
    while let Some(event) = spectator.next_event(Duration::from_millis(500)).await.unwrap() {
        relayed.push(event);
    }
    assert!(relayed.contains(&BattleEvent::Chat {
        sender: "Gary".to_string(),
        text: "good luck".to_string(),
    }));
    assert!(relayed.iter().any(|e| matches!(e, BattleEvent::TurnReported(r) if r.move_used == "Ember")));
    assert!(host.take_events().contains(&BattleEvent::Chat {
        sender: "Gary".to_string(),
        text: "good luck".to_string(),
    }));
}

#[tokio::test]
async fn test_spectator_joining_mid_turn_does_not_disturb_it() {
    let (mut host, mut joiner) = ready_pair(sturdy_grass(), sturdy_fire()).await;
    let host_addr = host.local_addr();
    let (attacked, defended) = tokio::join!(host.attack("Tackle", false), joiner.defend());
    attacked.unwrap();
    defended.unwrap();

    let stranger = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let spectator_config = fast_config("Brock");

    // The host is waiting for the joiner's commit while both arrive
    let (defended, attacked, spectator) = tokio::join!(
        host.defend(),
        async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            joiner.attack("Ember", false).await
        },
        async {
            stranger
                .send_to(&Frame::unsequenced(Message::HandshakeRequest).to_bytes(), host_addr)
                .await
                .unwrap();
            Spectator::join("127.0.0.1:0", host_addr, &spectator_config).await
        }
    );

    assert_eq!(defended.unwrap().agreement, Agreement::Confirmed);
    assert_eq!(attacked.unwrap().agreement, Agreement::Confirmed);
    assert_eq!(host.state(), TurnState::WaitingForMove);
    assert!(host.is_my_turn());

    let mut spectator = spectator.unwrap();
    assert_eq!(spectator.battle_state(), "WAITING_FOR_MOVE");
    assert!(host
        .take_events()
        .contains(&BattleEvent::SpectatorJoined(spectator.local_addr())));
    let seen = spectator.next_event(Duration::from_secs(1)).await.unwrap();
    assert!(matches!(seen, Some(BattleEvent::TurnReported(r)) if r.move_used == "Ember"));

    // A stray handshake from someone else is not answered
    assert_eq!(
        stranger.recv_timeout(Duration::from_millis(200)).await.unwrap(),
        None
    );
}
