//! Phase-keyed cache of MTA-supplied macro key/value pairs.

use miltergate_wire::commands::Macro;

use crate::phase::Phase;

/// Number of phases a macro definition can target: `Connect`, `Hello`,
/// `Mail`, `Recipient`, `Data`, `Header`, `EndOfHeader`, `Body`,
/// `EndOfMessage`.
const SLOTS: usize = 9;

fn slot(phase: Phase) -> Option<usize> {
    match phase {
        Phase::Connect => Some(0),
        Phase::Hello => Some(1),
        Phase::Mail => Some(2),
        Phase::Recipient => Some(3),
        Phase::Data => Some(4),
        Phase::Header => Some(5),
        Phase::EndOfHeader => Some(6),
        Phase::Body => Some(7),
        Phase::EndOfMessage => Some(8),
        Phase::Options | Phase::Disconnect | Phase::Quit => None,
    }
}

/// Maps the wire `DefineMacro` command code to the phase it targets.
///
/// These codes are the same single-character command codes used
/// throughout the wire protocol (`C` for `Connect`, `M` for `Mail`, and
/// so on); a macro definition is always sent just ahead of the command
/// it annotates.
fn phase_for_code(code: u8) -> Phase {
    match code {
        b'C' => Phase::Connect,
        b'M' => Phase::Mail,
        b'R' => Phase::Recipient,
        b'T' => Phase::Data,
        b'L' => Phase::Header,
        b'N' => Phase::EndOfHeader,
        b'B' => Phase::Body,
        b'E' => Phase::EndOfMessage,
        // SMFIC_HELO and SMFIC_UNKNOWN both target Hello.
        _ => Phase::Hello,
    }
}

/// Holds the most recently received macro definitions, keyed by the phase
/// they were defined for.
///
/// Lookup scans from the requesting phase backwards towards `Connect`,
/// letting a more specific phase's definition shadow an earlier one -
/// matching the protocol's "visible to this phase and later" rule.
/// `Connect` and `Hello` definitions live for the whole connection;
/// everything from `Mail` onward is transaction-scoped and cleared by
/// [`Macros::reset_transaction`].
#[derive(Debug, Clone, Default)]
pub struct Macros {
    by_phase: [Vec<(String, String)>; SLOTS],
}

impl Macros {
    /// Absorb a `DefineMacro` frame, replacing its target phase's entry
    /// wholesale.
    pub fn absorb(&mut self, macro_: &Macro) {
        let Some(idx) = slot(phase_for_code(macro_.code)) else {
            return;
        };
        self.by_phase[idx] = macro_
            .macros()
            .map(|(name, value)| {
                (
                    String::from_utf8_lossy(name).into_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                )
            })
            .collect();
    }

    /// Look up `name`, visible from `current_phase`.
    ///
    /// Scans phases from `current_phase` back to `Connect`, so a
    /// definition made closer to `current_phase` wins over an older one
    /// further back in the same connection.
    #[must_use]
    pub fn get(&self, current_phase: Phase, name: &str) -> Option<&str> {
        let upto = slot(current_phase).unwrap_or(SLOTS - 1);
        for idx in (0..=upto).rev() {
            if let Some((_, value)) = self.by_phase[idx].iter().find(|(k, _)| k == name) {
                return Some(value);
            }
        }
        None
    }

    /// Clear every transaction-scoped phase (`Mail` through
    /// `EndOfMessage`), as happens on `Abort` or after the reply to
    /// `EndOfMessage` has been sent.
    pub fn reset_transaction(&mut self) {
        for stage in &mut self.by_phase[slot(Phase::Mail).unwrap()..] {
            stage.clear();
        }
    }
}

/// A read-only view of [`Macros`], scoped to the phase the handler
/// currently being dispatched was received in.
///
/// Passed to every [`Milter`](crate::Milter) handler so it can inspect
/// macros the MTA sent ahead of the event, without being able to mutate
/// the session's own copy.
#[derive(Debug, Clone, Copy)]
pub struct MacroLookup<'a> {
    macros: &'a Macros,
    phase: Phase,
}

impl<'a> MacroLookup<'a> {
    pub(crate) fn new(macros: &'a Macros, phase: Phase) -> Self {
        Self { macros, phase }
    }

    /// Look up `name`, visible from the phase this lookup was scoped to.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.macros.get(self.phase, name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use miltergate_wire::decoding::ClientCommand;
    use pretty_assertions::assert_eq;

    fn macro_frame(code: u8, pairs: &[(&str, &str)]) -> Macro {
        // Frame as the wire sees it: outer command code `D` (DefineMacro),
        // then the phase-target code, then alternating NUL-terminated pairs.
        let mut buffer = BytesMut::new();
        buffer.put_u8(b'D');
        buffer.put_u8(code);
        for (k, v) in pairs {
            buffer.extend_from_slice(k.as_bytes());
            buffer.put_u8(0);
            buffer.extend_from_slice(v.as_bytes());
            buffer.put_u8(0);
        }
        match ClientCommand::parse(buffer).expect("valid macro frame") {
            ClientCommand::Macro(macro_) => macro_,
            other => panic!("expected a Macro command, got {other:?}"),
        }
    }

    #[test]
    fn test_connect_macro_visible_in_later_phases() {
        let mut macros = Macros::default();
        macros.absorb(&macro_frame(b'C', &[("j", "mailhost")]));

        assert_eq!(macros.get(Phase::Connect, "j"), Some("mailhost"));
        assert_eq!(macros.get(Phase::Body, "j"), Some("mailhost"));
    }

    #[test]
    fn test_mail_macro_not_visible_before_mail() {
        let mut macros = Macros::default();
        macros.absorb(&macro_frame(b'M', &[("mail_host", "h1")]));

        assert_eq!(macros.get(Phase::Hello, "mail_host"), None);
        assert_eq!(macros.get(Phase::Recipient, "mail_host"), Some("h1"));
    }

    #[test]
    fn test_abort_clears_transaction_scope_but_not_connect() {
        let mut macros = Macros::default();
        macros.absorb(&macro_frame(b'C', &[("j", "mailhost")]));
        macros.absorb(&macro_frame(b'M', &[("mail_host", "h1")]));

        macros.reset_transaction();

        assert_eq!(macros.get(Phase::Body, "mail_host"), None);
        assert_eq!(macros.get(Phase::Body, "j"), Some("mailhost"));
    }

    #[test]
    fn test_more_specific_phase_shadows_earlier_definition() {
        let mut macros = Macros::default();
        macros.absorb(&macro_frame(b'C', &[("i", "connect-value")]));
        macros.absorb(&macro_frame(b'M', &[("i", "mail-value")]));

        assert_eq!(macros.get(Phase::Recipient, "i"), Some("mail-value"));
    }
}
