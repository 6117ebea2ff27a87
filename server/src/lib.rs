#![doc = include_str!("../Readme.md")]

mod action_sender;
mod codec;
mod connection;
mod macros;
mod milter;
mod negotiator;
mod phase;
mod session;

#[cfg(feature = "_fuzzing")]
pub mod fuzzing;

pub use connection::{listen, BindAddr, ListenConfig};
pub use macros::MacroLookup;
pub use milter::{Error, Milter};
pub use negotiator::{Events, EventInterest};
pub use phase::Phase;
pub use session::Session;
