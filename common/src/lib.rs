#![doc = include_str!("../Readme.md")]

//! The wire-level milter protocol: frame codes, field layouts, and the
//! bitflags exchanged during option negotiation. The `server` and `client`
//! crates build a session/connection API on top of these types; nothing
//! here knows about phases, macros, or the `Milter` trait.

pub mod actions;
pub mod commands;
pub mod decoding;
pub mod encoding;
pub mod modifications;
pub mod optneg;

mod error;

use encoding::ServerMessage;

pub use error::{InvalidData, NotEnoughData, ProtocolError};

use modifications::{
    body::ReplaceBody,
    headers::{AddHeader, ChangeHeader, InsertHeader},
    quarantine::Quarantine,
    recipients::{AddRecipient, DeleteRecipient},
};
