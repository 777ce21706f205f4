use thiserror::Error;

pub mod codec;
pub mod message;
pub mod payload;

pub use codec::{MESSAGE_TYPE, RawMessage, decode, encode};
pub use message::{ChatContent, Frame, Message, MessageKind, SEQUENCE_NUMBER, parse_frame};
pub use payload::{
    BattleSetup, CalculationReport, CommunicationMode, DEFAULT_BOOST_USES, PokemonRecord,
    Resolution, StatBoosts,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Empty message")]
    EmptyMessage,
}
