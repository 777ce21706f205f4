
use crate::ParseError;
use crate::codec::{RawMessage, decode};
use crate::payload::{
    BattleSetup, CalculationReport, CommunicationMode, PokemonRecord, Resolution, StatBoosts,
};

/// Field carrying a reliability-layer sequence number
pub const SEQUENCE_NUMBER: &str = "sequence_number";

/// Message kinds as they appear in the `message_type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    HandshakeRequest,
    HandshakeResponse,
    SpectatorRequest,
    SpectatorResponse,
    BattleSetup,
    CalculationReport,
    CalculationConfirm,
    ResolutionRequest,
    Ack,
    GameOver,
    ChatMessage,
}

impl MessageKind {
    pub const ALL: [MessageKind; 11] = [
        MessageKind::HandshakeRequest,
        MessageKind::HandshakeResponse,
        MessageKind::SpectatorRequest,
        MessageKind::SpectatorResponse,
        MessageKind::BattleSetup,
        MessageKind::CalculationReport,
        MessageKind::CalculationConfirm,
        MessageKind::ResolutionRequest,
        MessageKind::Ack,
        MessageKind::GameOver,
        MessageKind::ChatMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::HandshakeRequest => "HANDSHAKE_REQUEST",
            MessageKind::HandshakeResponse => "HANDSHAKE_RESPONSE",
            MessageKind::SpectatorRequest => "SPECTATOR_REQUEST",
            MessageKind::SpectatorResponse => "SPECTATOR_RESPONSE",
            MessageKind::BattleSetup => "BATTLE_SETUP",
            MessageKind::CalculationReport => "CALCULATION_REPORT",
            MessageKind::CalculationConfirm => "CALCULATION_CONFIRM",
            MessageKind::ResolutionRequest => "RESOLUTION_REQUEST",
            MessageKind::Ack => "ACK",
            MessageKind::GameOver => "GAME_OVER",
            MessageKind::ChatMessage => "CHAT_MESSAGE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Whether this kind travels with a sequence number and must be ACKed
    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            MessageKind::BattleSetup
                | MessageKind::CalculationReport
                | MessageKind::CalculationConfirm
                | MessageKind::ResolutionRequest
                | MessageKind::GameOver
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Body of a chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatContent {
    Text(String),
    /// Base64-encoded sticker image
    Sticker(String),
}

/// A typed protocol message, decoded once at the codec boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    HandshakeRequest,
    HandshakeResponse {
        seed: u64,
    },
    SpectatorRequest,
    SpectatorResponse {
        status: String,
        battle_state: String,
    },
    BattleSetup(BattleSetup),
    CalculationReport(CalculationReport),
    CalculationConfirm,
    ResolutionRequest(Resolution),
    Ack {
        ack_number: u32,
    },
    GameOver {
        winner: String,
        loser: String,
    },
    Chat {
        sender: String,
        content: ChatContent,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::HandshakeRequest => MessageKind::HandshakeRequest,
            Message::HandshakeResponse { .. } => MessageKind::HandshakeResponse,
            Message::SpectatorRequest => MessageKind::SpectatorRequest,
            Message::SpectatorResponse { .. } => MessageKind::SpectatorResponse,
            Message::BattleSetup(_) => MessageKind::BattleSetup,
            Message::CalculationReport(_) => MessageKind::CalculationReport,
            Message::CalculationConfirm => MessageKind::CalculationConfirm,
            Message::ResolutionRequest(_) => MessageKind::ResolutionRequest,
            Message::Ack { .. } => MessageKind::Ack,
            Message::GameOver { .. } => MessageKind::GameOver,
            Message::Chat { .. } => MessageKind::ChatMessage,
        }
    }

    pub fn requires_ack(&self) -> bool {
        self.kind().requires_ack()
    }

    /// Write this message's fields (after `message_type`) into `raw`
    fn write_fields(&self, raw: &mut RawMessage) {
        match self {
            Message::HandshakeRequest
            | Message::SpectatorRequest
            | Message::CalculationConfirm => {}
            Message::HandshakeResponse { seed } => raw.insert("seed", seed),
            Message::SpectatorResponse {
                status,
                battle_state,
            } => {
                raw.insert("status", status);
                raw.insert("battle_state", battle_state);
            }
            Message::BattleSetup(setup) => {
                raw.insert("communication_mode", setup.communication_mode.as_str());
                raw.insert("pokemon_name", &setup.pokemon_name);
                raw.insert("pokemon", setup.pokemon.to_json());
                raw.insert("stat_boosts", setup.stat_boosts.to_json());
            }
            Message::CalculationReport(report) => {
                raw.insert("attacker", &report.attacker);
                raw.insert("move_used", &report.move_used);
                raw.insert("remaining_health", report.remaining_health);
                raw.insert("damage_dealt", report.damage_dealt);
                raw.insert("defender_hp_remaining", report.defender_hp_remaining);
                raw.insert("status_message", &report.status_message);
                raw.insert(
                    "special_attack_boost",
                    u8::from(report.special_attack_boost),
                );
            }
            Message::ResolutionRequest(resolution) => {
                raw.insert("attacker", &resolution.attacker);
                raw.insert("move_used", &resolution.move_used);
                raw.insert("damage_dealt", resolution.damage_dealt);
                raw.insert("defender_hp_remaining", resolution.defender_hp_remaining);
            }
            Message::Ack { ack_number } => raw.insert("ack_number", ack_number),
            Message::GameOver { winner, loser } => {
                raw.insert("winner", winner);
                raw.insert("loser", loser);
            }
            Message::Chat { sender, content } => {
                raw.insert("sender", sender);
                match content {
                    ChatContent::Text(text) => {
                        raw.insert("content_type", "TEXT");
                        raw.insert("text", text);
                    }
                    ChatContent::Sticker(data) => {
                        raw.insert("content_type", "STICKER");
                        raw.insert("sticker_data", data);
                    }
                }
            }
        }
    }

    /// Build a typed message from a decoded datagram
    pub fn from_raw(raw: &RawMessage) -> Result<Self, ParseError> {
        let type_name = raw.message_type().ok_or_else(|| {
            if raw.is_empty() {
                ParseError::EmptyMessage
            } else {
                ParseError::MissingField(crate::MESSAGE_TYPE.to_string())
            }
        })?;
        let kind = MessageKind::parse(type_name)
            .ok_or_else(|| ParseError::UnknownType(type_name.to_string()))?;

        match kind {
            MessageKind::HandshakeRequest => Ok(Message::HandshakeRequest),
            MessageKind::HandshakeResponse => Ok(Message::HandshakeResponse {
                seed: raw.parse_field("seed")?,
            }),
            MessageKind::SpectatorRequest => Ok(Message::SpectatorRequest),
            MessageKind::SpectatorResponse => Ok(Message::SpectatorResponse {
                status: raw.require("status")?.to_string(),
                battle_state: raw.get("battle_state").unwrap_or_default().to_string(),
            }),
            MessageKind::BattleSetup => parse_battle_setup(raw),
            MessageKind::CalculationReport => parse_calculation_report(raw),
            MessageKind::CalculationConfirm => Ok(Message::CalculationConfirm),
            MessageKind::ResolutionRequest => Ok(Message::ResolutionRequest(Resolution {
                attacker: raw.require("attacker")?.to_string(),
                move_used: raw.require("move_used")?.to_string(),
                damage_dealt: raw.parse_field("damage_dealt")?,
                defender_hp_remaining: raw.parse_field("defender_hp_remaining")?,
            })),
            MessageKind::Ack => Ok(Message::Ack {
                ack_number: raw.parse_field("ack_number")?,
            }),
            MessageKind::GameOver => Ok(Message::GameOver {
                winner: raw.require("winner")?.to_string(),
                loser: raw.get("loser").unwrap_or_default().to_string(),
            }),
            MessageKind::ChatMessage => parse_chat(raw),
        }
    }
}

fn parse_battle_setup(raw: &RawMessage) -> Result<Message, ParseError> {
    let communication_mode = match raw.get("communication_mode") {
        Some(mode) => CommunicationMode::parse(mode).ok_or_else(|| {
            ParseError::InvalidFormat(format!("invalid communication_mode: {:?}", mode))
        })?,
        None => CommunicationMode::default(),
    };

    let pokemon = PokemonRecord::from_json(raw.require("pokemon")?)?;
    let stat_boosts = match raw.get("stat_boosts") {
        Some(json) => StatBoosts::from_json(json)?,
        None => StatBoosts::default(),
    };
    let pokemon_name = raw
        .get("pokemon_name")
        .map(str::to_string)
        .unwrap_or_else(|| pokemon.name.clone());

    Ok(Message::BattleSetup(BattleSetup {
        communication_mode,
        pokemon_name,
        pokemon,
        stat_boosts,
    }))
}

fn parse_calculation_report(raw: &RawMessage) -> Result<Message, ParseError> {
    Ok(Message::CalculationReport(CalculationReport {
        attacker: raw.require("attacker")?.to_string(),
        move_used: raw.require("move_used")?.to_string(),
        remaining_health: raw.parse_field("remaining_health")?,
        damage_dealt: raw.parse_field("damage_dealt")?,
        defender_hp_remaining: raw.parse_field("defender_hp_remaining")?,
        status_message: raw.get("status_message").unwrap_or_default().to_string(),
        special_attack_boost: raw.parse_flag("special_attack_boost")?,
    }))
}

fn parse_chat(raw: &RawMessage) -> Result<Message, ParseError> {
    let sender = raw.get("sender").unwrap_or("Unknown").to_string();

    let content = match raw.get("content_type") {
        Some("STICKER") => ChatContent::Sticker(raw.require("sticker_data")?.to_string()),
        Some("TEXT") | None => ChatContent::Text(raw.require("text")?.to_string()),
        Some(other) => {
            return Err(ParseError::InvalidFormat(format!(
                "invalid content_type: {:?}",
                other
            )));
        }
    };

    Ok(Message::Chat { sender, content })
}

/// A message as it travels in one datagram, with its optional sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence_number: Option<u32>,
    pub message: Message,
}

impl Frame {
    pub fn unsequenced(message: Message) -> Self {
        Self {
            sequence_number: None,
            message,
        }
    }

    pub fn sequenced(sequence_number: u32, message: Message) -> Self {
        Self {
            sequence_number: Some(sequence_number),
            message,
        }
    }

    /// Convenience constructor for an ACK of `sequence_number`
    pub fn ack(sequence_number: u32) -> Self {
        Self::unsequenced(Message::Ack {
            ack_number: sequence_number,
        })
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    pub fn to_raw(&self) -> RawMessage {
        let mut raw = RawMessage::new(self.message.kind().as_str());
        if let Some(seq) = self.sequence_number {
            raw.insert(SEQUENCE_NUMBER, seq);
        }
        self.message.write_fields(&mut raw);
        raw
    }

    /// Serialize to wire format: `message_type` line, then `sequence_number`, then fields
    pub fn to_wire_format(&self) -> String {
        self.to_raw().to_wire_format()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_raw().to_bytes()
    }

    pub fn from_raw(raw: &RawMessage) -> Result<Self, ParseError> {
        let message = Message::from_raw(raw)?;
        let sequence_number = raw.parse_optional(SEQUENCE_NUMBER)?;
        Ok(Self {
            sequence_number,
            message,
        })
    }
}

/// Decode and type a complete datagram
pub fn parse_frame(bytes: &[u8]) -> Result<Frame, ParseError> {
    Frame::from_raw(&decode(bytes))
}
