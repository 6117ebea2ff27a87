//! The per-connection conversation phase and the legality of incoming commands.

use miltergate_wire::decoding::ClientCommand;

/// A point on the milter conversation's state machine.
///
/// Transitions are driven by [`Phase::next`] once a command has been accepted
/// as legal by [`Phase::accepts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for option negotiation.
    Options,
    /// Waiting for connection info.
    Connect,
    /// Waiting for HELO/EHLO.
    Hello,
    /// Waiting for the envelope sender.
    Mail,
    /// Collecting envelope recipients.
    Recipient,
    /// Waiting for the DATA marker.
    Data,
    /// Collecting headers.
    Header,
    /// Between the last header and the body.
    EndOfHeader,
    /// Collecting body chunks.
    Body,
    /// The end-of-message modification window.
    EndOfMessage,
    /// The MTA may reuse this socket for a new message.
    Disconnect,
    /// The conversation is over.
    Quit,
}

impl Phase {
    /// Whether `command` is legal to receive while in `self`.
    ///
    /// `DefineMacro` (the wire `Macro` command) is legal ahead of any event
    /// up through `EndOfHeader`, but not once the body is being streamed or
    /// the message is otherwise wrapping up. `Abort` is legal from
    /// `Connect` through `Body`, but not once the end-of-message window or
    /// a disconnect/reuse handshake has started. `QuitNc` (the wire
    /// `Disconnect` command) is only legal where a reused connection makes
    /// sense: right after `Connect`, right after `Hello`, or at
    /// end-of-message.
    #[must_use]
    pub fn accepts(self, command: &ClientCommand) -> bool {
        if matches!(command, ClientCommand::Macro(_)) {
            return matches!(
                self,
                Self::Connect
                    | Self::Hello
                    | Self::Mail
                    | Self::Recipient
                    | Self::Data
                    | Self::Header
                    | Self::EndOfHeader
            );
        }
        if matches!(command, ClientCommand::Abort(_)) {
            return matches!(
                self,
                Self::Connect
                    | Self::Hello
                    | Self::Mail
                    | Self::Recipient
                    | Self::Data
                    | Self::Header
                    | Self::EndOfHeader
                    | Self::Body
            );
        }
        if matches!(command, ClientCommand::Quit(_)) {
            return !matches!(self, Self::Options | Self::Quit);
        }
        if matches!(command, ClientCommand::QuitNc(_)) {
            return matches!(self, Self::Connect | Self::Hello | Self::EndOfMessage);
        }

        match self {
            Self::Options => matches!(command, ClientCommand::OptNeg(_)),
            Self::Connect => matches!(command, ClientCommand::Connect(_)),
            Self::Hello => matches!(
                command,
                ClientCommand::Helo(_) | ClientCommand::Unknown(_)
            ),
            Self::Mail => matches!(command, ClientCommand::Mail(_)),
            Self::Recipient => matches!(
                command,
                ClientCommand::Recipient(_) | ClientCommand::Data(_)
            ),
            Self::Data => matches!(command, ClientCommand::Header(_) | ClientCommand::EndOfHeader(_)),
            Self::Header => matches!(command, ClientCommand::Header(_) | ClientCommand::EndOfHeader(_)),
            Self::EndOfHeader => {
                matches!(command, ClientCommand::Body(_) | ClientCommand::EndOfBody(_))
            }
            Self::Body => matches!(command, ClientCommand::Body(_) | ClientCommand::EndOfBody(_)),
            Self::EndOfMessage => matches!(command, ClientCommand::Mail(_)),
            Self::Disconnect => matches!(command, ClientCommand::Connect(_)),
            Self::Quit => false,
        }
    }

    /// The phase entered after accepting `command` while in `self`.
    ///
    /// Only meaningful when [`Phase::accepts`] returned `true` for the same
    /// pair; callers must check legality first.
    #[must_use]
    pub fn next(self, command: &ClientCommand) -> Self {
        if matches!(command, ClientCommand::Macro(_)) {
            return self;
        }
        if matches!(command, ClientCommand::Abort(_)) {
            return Self::Hello;
        }
        if matches!(command, ClientCommand::QuitNc(_)) {
            return Self::Disconnect;
        }
        if matches!(command, ClientCommand::Quit(_)) {
            return Self::Quit;
        }

        match command {
            ClientCommand::OptNeg(_) => Self::Connect,
            ClientCommand::Connect(_) => Self::Hello,
            ClientCommand::Helo(_) | ClientCommand::Unknown(_) => Self::Mail,
            ClientCommand::Mail(_) => Self::Recipient,
            ClientCommand::Recipient(_) => Self::Recipient,
            ClientCommand::Data(_) => Self::Data,
            ClientCommand::Header(_) => Self::Header,
            ClientCommand::EndOfHeader(_) => Self::EndOfHeader,
            ClientCommand::Body(_) => Self::Body,
            ClientCommand::EndOfBody(_) => Self::EndOfMessage,
            ClientCommand::Abort(_) | ClientCommand::Quit(_) | ClientCommand::QuitNc(_) | ClientCommand::Macro(_) => {
                unreachable!("handled above")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use miltergate_wire::commands::{Body, Connect, Data, Family, Mail, Recipient};
    use miltergate_wire::decoding::ClientCommand;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn connect_cmd() -> ClientCommand {
        Connect::new(b"host", Family::Inet, Some(25), b"127.0.0.1").into()
    }

    #[rstest]
    #[case(Phase::Hello, connect_cmd(), false)]
    #[case(Phase::Connect, connect_cmd(), true)]
    fn test_accepts(#[case] phase: Phase, #[case] command: ClientCommand, #[case] expected: bool) {
        assert_eq!(phase.accepts(&command), expected);
    }

    #[test]
    fn test_body_rejected_in_mail_phase() {
        let body: ClientCommand = Body::from(b"hi".as_slice()).into();
        assert!(!Phase::Mail.accepts(&body));
    }

    #[test]
    fn test_recipient_loops_in_recipient_phase() {
        let rcpt: ClientCommand = Recipient::from(b"<a@b>".as_slice()).into();
        assert!(Phase::Recipient.accepts(&rcpt));
        assert_eq!(Phase::Recipient.next(&rcpt), Phase::Recipient);
    }

    #[test]
    fn test_mail_after_end_of_message_reuses_connection() {
        let mail: ClientCommand = Mail::from(b"<a@b>".as_slice()).into();
        assert!(Phase::EndOfMessage.accepts(&mail));
        assert_eq!(Phase::EndOfMessage.next(&mail), Phase::Recipient);
    }

    #[test]
    fn test_data_skips_to_header_phase() {
        let data: ClientCommand = Data.into();
        assert!(Phase::Recipient.accepts(&data));
        assert_eq!(Phase::Recipient.next(&data), Phase::Data);
    }

    fn abort_cmd() -> ClientCommand {
        miltergate_wire::actions::Abort.into()
    }

    fn quit_nc_cmd() -> ClientCommand {
        miltergate_wire::actions::QuitNc.into()
    }

    #[rstest]
    #[case(Phase::Connect, true)]
    #[case(Phase::Hello, true)]
    #[case(Phase::Body, true)]
    #[case(Phase::EndOfMessage, false)]
    #[case(Phase::Disconnect, false)]
    fn test_abort_legality(#[case] phase: Phase, #[case] expected: bool) {
        assert_eq!(phase.accepts(&abort_cmd()), expected);
    }

    #[rstest]
    #[case(Phase::Connect, true)]
    #[case(Phase::Hello, true)]
    #[case(Phase::EndOfMessage, true)]
    #[case(Phase::Mail, false)]
    #[case(Phase::Body, false)]
    fn test_quit_nc_legality(#[case] phase: Phase, #[case] expected: bool) {
        assert_eq!(phase.accepts(&quit_nc_cmd()), expected);
    }

    #[test]
    fn test_quit_nc_transitions_to_disconnect() {
        assert_eq!(Phase::Hello.next(&quit_nc_cmd()), Phase::Disconnect);
    }

    #[test]
    fn test_disconnect_accepts_connect_to_reuse_socket() {
        assert!(Phase::Disconnect.accepts(&connect_cmd()));
        assert_eq!(Phase::Disconnect.next(&connect_cmd()), Phase::Hello);
    }

    #[test]
    fn test_macro_rejected_in_body_and_end_of_message() {
        let macro_cmd: ClientCommand = miltergate_wire::commands::Macro::default().into();
        assert!(!Phase::Body.accepts(&macro_cmd));
        assert!(!Phase::EndOfMessage.accepts(&macro_cmd));
        assert!(Phase::Header.accepts(&macro_cmd));
    }
}
