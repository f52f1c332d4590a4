//! Inter-node message types and protocol constants

pub mod constants;
mod messages;

pub use messages::{
    JoinMessage, Message, SettingsChanged, SettingsReport, SettingsRequest, WelcomeMessage,
};
