//! The per-connection dispatch loop (C4): phase enforcement, macro
//! absorption, handler dispatch and panic containment.

use std::io;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use asynchronous_codec::Framed;
use futures::{AsyncRead, AsyncWrite, Future, FutureExt, SinkExt, StreamExt};
use miltergate_bytes::debug;
use miltergate_wire::{
    actions::{Action, Tempfail},
    commands::Command,
    decoding::ClientCommand,
    encoding::ServerMessage,
    optneg::{Capability, OptNeg},
};
use tokio::time::timeout;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::action_sender;
use crate::codec::MilterCodec;
use crate::macros::{MacroLookup, Macros};
use crate::milter::Error;
use crate::phase::Phase;
use crate::Milter;

/// MTA read timeout, matching the default sendmail/postfix milter
/// conversation timeout.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(7210);
/// MTA write timeout.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(600);

/// Drives a single milter connection for one [`Milter`] implementation.
///
/// Owns everything scoped to this connection: the current [`Phase`], the
/// macro cache, and the negotiated options, once negotiation has happened.
#[derive(Debug)]
pub struct Session<'m, M: Milter> {
    milter: &'m mut M,
    codec: MilterCodec,
    phase: Phase,
    macros: Macros,
    options: Option<OptNeg>,
    quit_on_abort: bool,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl<'m, M: Milter> Session<'m, M> {
    /// Create a session for a single connection.
    pub fn new(milter: &'m mut M, quit_on_abort: bool, max_buffer_size: usize) -> Self {
        Self {
            milter,
            codec: MilterCodec::new(max_buffer_size),
            phase: Phase::Options,
            macros: Macros::default(),
            options: None,
            quit_on_abort,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// A session configured to behave like postfix expects, treating
    /// `Abort` like `Quit`.
    ///
    /// Originally there were three distinct use cases: `Abort` (the current
    /// SMTP client finished; the next mail arrives on the same connection),
    /// `Quit` (the SMTP client disconnected and the milter client is done
    /// with this connection too), and `Quit NC` (the SMTP client
    /// disconnected but the milter client wants to reuse this connection
    /// for someone else). MTAs mix these up in practice; postfix in
    /// particular always opens a new connection per milter conversation and
    /// treats `Abort` as equivalent to `Quit`. See [this comment][c] in
    /// postfix's own source.
    ///
    /// [c]: https://github.com/vdukhovni/postfix/blob/17dbfb9b8b9b483a23ea84dcd272c6d4010ad74b/postfix/src/milter/milter8.c#L387-L392
    #[must_use]
    pub fn default_postfix(milter: &'m mut M) -> Self {
        Self::new(milter, true, 2_usize.pow(16) + 128)
    }

    /// Override the read/write timeouts used while driving this session.
    #[must_use]
    pub fn with_timeouts(mut self, read_timeout: Duration, write_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }

    fn effective_actions(&self) -> Capability {
        self.options.as_ref().map_or(Capability::empty(), |o| o.capabilities)
    }

    /// Whether the MTA declared it doesn't want a reply for `command`, via
    /// the negotiated `Protocol`'s `NR_*` bits.
    fn should_skip_reply(&self, command: &Command) -> bool {
        self.options
            .as_ref()
            .is_some_and(|o| o.protocol.should_skip_response(command))
    }

    /// Run the dispatch loop over `socket` until the connection ends or an
    /// unrecoverable error occurs.
    ///
    /// # Errors
    /// Returns an error on I/O failure, a codec error the MTA can't be sent
    /// a `Tempfail` for, or a propagated [`Milter`] implementation error.
    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    pub async fn run<RW: AsyncRead + AsyncWrite + Unpin + Send>(
        &mut self,
        socket: RW,
    ) -> Result<(), Error<M::Error>> {
        let mut framed = Framed::new(socket, &mut self.codec);

        loop {
            let command = match timeout(self.read_timeout, framed.next()).await {
                Err(_elapsed) => return Err(read_timed_out().into()),
                Ok(None) => return Ok(()),
                Ok(Some(Ok(command))) => command,
                Ok(Some(Err(err))) => {
                    let _ = send_with_timeout::<RW, M::Error>(
                        &mut framed,
                        &Action::from(Tempfail).into(),
                        self.write_timeout,
                    )
                    .await;
                    return Err(err.into());
                }
            };
            debug!("Received {}", command);

            if let ClientCommand::Macro(macro_) = &command {
                self.macros.absorb(macro_);
                self.milter
                    .macro_(macro_.clone())
                    .await
                    .map_err(Error::from_app_error)?;
                continue;
            }

            if !self.phase.accepts(&command) {
                debug!("Protocol violation: {:?} illegal in phase {:?}", command, self.phase);
                let _ = send_with_timeout::<RW, M::Error>(
                    &mut framed,
                    &Action::from(Tempfail).into(),
                    self.write_timeout,
                )
                .await;
                return Ok(());
            }

            let next_phase = self.phase.next(&command);

            match command {
                ClientCommand::OptNeg(opt_neg) => {
                    let response = self.milter.option_negotiation(opt_neg).await?;
                    self.options = Some(response.clone());
                    send_with_timeout(&mut framed, &response.into(), self.write_timeout).await?;
                }
                ClientCommand::Connect(connect) => {
                    let skip = self.options.as_ref().is_some_and(|o| o.protocol.should_skip_response(&Command::from(connect.clone())));
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    Self::reply(self.milter.connect(connect, macros), &mut framed, self.write_timeout, skip)
                        .await?;
                }
                ClientCommand::Helo(helo) => {
                    let skip = self.options.as_ref().is_some_and(|o| o.protocol.should_skip_response(&Command::from(helo.clone())));
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    Self::reply(self.milter.helo(helo, macros), &mut framed, self.write_timeout, skip)
                        .await?;
                }
                ClientCommand::Mail(mail) => {
                    let skip = self.options.as_ref().is_some_and(|o| o.protocol.should_skip_response(&Command::from(mail.clone())));
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    Self::reply(self.milter.mail(mail, macros), &mut framed, self.write_timeout, skip)
                        .await?;
                }
                ClientCommand::Recipient(rcpt) => {
                    let skip = self.options.as_ref().is_some_and(|o| o.protocol.should_skip_response(&Command::from(rcpt.clone())));
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    Self::reply(self.milter.rcpt(rcpt, macros), &mut framed, self.write_timeout, skip)
                        .await?;
                }
                ClientCommand::Data(v) => {
                    let skip = self.options.as_ref().is_some_and(|o| o.protocol.should_skip_response(&Command::from(v)));
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    Self::reply(self.milter.data(macros), &mut framed, self.write_timeout, skip)
                        .await?;
                }
                ClientCommand::Header(header) => {
                    let skip = self.options.as_ref().is_some_and(|o| o.protocol.should_skip_response(&Command::from(header.clone())));
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    Self::reply(self.milter.header(header, macros), &mut framed, self.write_timeout, skip)
                        .await?;
                }
                ClientCommand::EndOfHeader(v) => {
                    let skip = self.options.as_ref().is_some_and(|o| o.protocol.should_skip_response(&Command::from(v)));
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    Self::reply(self.milter.end_of_header(macros), &mut framed, self.write_timeout, skip)
                        .await?;
                }
                ClientCommand::Body(body) => {
                    let skip = self.options.as_ref().is_some_and(|o| o.protocol.should_skip_response(&Command::from(body.clone())));
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    Self::reply(self.milter.body(body, macros), &mut framed, self.write_timeout, skip)
                        .await?;
                }
                ClientCommand::Unknown(unknown) => {
                    let skip = self.options.as_ref().is_some_and(|o| o.protocol.should_skip_response(&Command::from(unknown.clone())));
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    Self::reply(self.milter.unknown(unknown, macros), &mut framed, self.write_timeout, skip)
                        .await?;
                }
                ClientCommand::EndOfBody(_v) => {
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    let outcome = AssertUnwindSafe(self.milter.end_of_body(macros))
                        .catch_unwind()
                        .await;
                    let response = match outcome {
                        Ok(result) => result.map_err(Error::from_app_error)?,
                        Err(panic) => {
                            let _ = send_with_timeout::<RW, M::Error>(
                                &mut framed,
                                &Action::from(Tempfail).into(),
                                self.write_timeout,
                            )
                            .await;
                            return Err(Error::HandlerPanic(panic_message(&panic)));
                        }
                    };

                    match action_sender::gate(response, self.options.as_ref().map_or(Capability::empty(), |o| o.capabilities)) {
                        Ok(messages) => {
                            for message in messages {
                                send_with_timeout(&mut framed, &message, self.write_timeout).await?;
                            }
                        }
                        Err(needed) => {
                            self.milter.rejected_modification(needed).await;
                            send_with_timeout(
                                &mut framed,
                                &Action::from(Tempfail).into(),
                                self.write_timeout,
                            )
                            .await?;
                        }
                    }
                    self.macros.reset_transaction();
                }
                ClientCommand::Abort(_v) => {
                    let macros = MacroLookup::new(&self.macros, self.phase);
                    let response = self.milter.abort(macros).await.map_err(Error::from_app_error)?;
                    self.macros.reset_transaction();

                    if self.quit_on_abort {
                        self.milter.quit().await.map_err(Error::from_app_error)?;
                        return Ok(());
                    }
                    send_with_timeout(&mut framed, &response.into(), self.write_timeout).await?;
                }
                ClientCommand::Quit(_v) => {
                    self.milter.quit().await.map_err(Error::from_app_error)?;
                    return Ok(());
                }
                ClientCommand::QuitNc(_v) => {
                    self.milter.quit_nc().await.map_err(Error::from_app_error)?;
                }
                ClientCommand::Macro(_) => unreachable!("handled above via `continue`"),
            };

            self.phase = next_phase;
        }
    }

    /// Invoke a handler, then send whatever [`Action`] it returned, unless
    /// `skip_reply` says the MTA declared it doesn't want one.
    async fn reply<RW: AsyncRead + AsyncWrite + Unpin>(
        milter_fn: impl Future<Output = Result<impl Into<Action>, M::Error>>,
        framed: &mut Framed<RW, &mut MilterCodec>,
        write_timeout: Duration,
        skip_reply: bool,
    ) -> Result<(), Error<M::Error>> {
        let response = milter_fn.await.map_err(Error::from_app_error)?;
        if skip_reply {
            return Ok(());
        }
        let response: Action = response.into();

        send_with_timeout(framed, &response.into(), write_timeout).await
    }
}

async fn send_with_timeout<RW: AsyncRead + AsyncWrite + Unpin, ImplError>(
    framed: &mut Framed<RW, &mut MilterCodec>,
    message: &ServerMessage,
    write_timeout: Duration,
) -> Result<(), Error<ImplError>> {
    timeout(write_timeout, framed.send(message))
        .await
        .map_err(|_elapsed| write_timed_out())??;
    Ok(())
}

fn read_timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "milter client sent nothing in time")
}

fn write_timed_out<ImplError>() -> Error<ImplError> {
    io::Error::new(io::ErrorKind::TimedOut, "milter client did not read the reply in time").into()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use futures::io::Cursor;
    use miltergate_wire::actions::Continue;

    #[derive(Default)]
    struct EchoMilter;

    #[async_trait]
    impl Milter for EchoMilter {
        type Error = std::convert::Infallible;

        async fn abort(&mut self, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
            Ok(Continue.into())
        }
    }

    #[tokio::test]
    async fn test_protocol_violation_closes_without_panicking() {
        // Data ('T') is illegal while still waiting for Options.
        let mut input = Vec::new();
        input.extend_from_slice(&4u32.to_be_bytes());
        input.push(b'T');
        input.extend_from_slice(&[0, 0, 0]);

        let mut milter = EchoMilter;
        let mut session = Session::default_postfix(&mut milter);

        let cursor = Cursor::new(input);
        let result = session.run(cursor).await;
        assert!(result.is_ok());
    }
}
