//! Containing data to be taken `Action`s on.
//!
//! The milter client sends data via commands, including the data it received
//! from the smtp session.

mod body;
mod connect;
mod header;
mod helo;
mod mail;
mod mmacro;
mod recipient;
mod unknown;

use enum_dispatch::enum_dispatch;

pub use self::body::{Body, EndOfBody};
pub use self::connect::{Connect, Family};
pub use self::header::{EndOfHeader, Header};
pub use self::helo::Helo;
pub use self::mail::{Data, Mail};
pub use self::mmacro::Macro;
pub use self::recipient::Recipient;
pub use self::unknown::Unknown;

/// The subset of commands a negotiated [`Protocol`](crate::optneg::Protocol)
/// can suppress sending or replying to via its `NO_*`/`NR_*` bits.
///
/// Unlike [`ClientCommand`](crate::decoding::ClientCommand), this excludes
/// `Abort`, `Quit`, `QuitNc`, `OptNeg` and `Macro` — those aren't subject to
/// per-event suppression. See the respective contents about documentation.
#[allow(missing_docs)]
#[enum_dispatch]
#[cfg_attr(feature = "tracing", derive(strum::Display))]
#[derive(Debug)]
pub enum Command {
    // SMTP opening
    Connect,
    Helo,
    // Header
    Mail,
    Recipient,
    Header,
    EndOfHeader,
    // Body
    Data,
    Body,
    EndOfBody,
    // Unknown
    Unknown,
}
