//! Drives [`miltergate_server::Session`] end-to-end over an in-memory
//! duplex pipe using [`miltergate_client`], standing in for a real
//! Postfix/Sendmail conversation.

use async_trait::async_trait;
use miltergate_client::Client;
use miltergate_server::{EventInterest, MacroLookup, Milter, Session};
use miltergate_wire::{
    actions::{Action, Continue},
    commands::{Body, Connect, Family, Header, Helo, Mail, Recipient},
    modifications::{headers::AddHeader, ModificationResponse},
    optneg::{Capability, OptNeg},
};
use pretty_assertions::assert_eq;
use tokio_util::compat::TokioAsyncReadCompatExt;

#[derive(Debug, Default)]
struct AddHeaderMilter;

#[async_trait]
impl Milter for AddHeaderMilter {
    type Error = std::convert::Infallible;

    fn interest(&self) -> EventInterest {
        EventInterest {
            required_actions: Capability::SMFIF_ADDHDRS,
            ..EventInterest::default()
        }
    }

    async fn end_of_body(&mut self, _macros: MacroLookup<'_>) -> Result<ModificationResponse, Self::Error> {
        let mut builder = ModificationResponse::builder();
        builder.push(AddHeader::new(b"X-Added", b"yes"));
        Ok(builder.contin())
    }

    async fn abort(&mut self, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        Ok(Continue.into())
    }
}

async fn full_transaction(connection: &mut miltergate_client::Connection<impl futures::AsyncRead + futures::AsyncWrite + Unpin>) {
    connection
        .connect(Connect::new(b"client.example", Family::Inet, Some(25), b"127.0.0.1"))
        .await
        .expect("connect accepted");
    connection
        .helo(Helo::from(b"client.example".as_slice()))
        .await
        .expect("helo accepted");
    connection
        .mail(Mail::from(b"<from@example.com>".as_slice()))
        .await
        .expect("mail accepted");
    connection
        .recipient(Recipient::from(b"<to@example.com>".as_slice()))
        .await
        .expect("rcpt accepted");
    connection.data().await.expect("data accepted");
    connection
        .header(Header::new(b"Subject", b"hi"))
        .await
        .expect("header accepted");
    connection.end_of_header().await.expect("eoh accepted");
    connection
        .body(Body::from(b"hello world".as_slice()))
        .await
        .expect("body accepted");
}

#[tokio::test]
async fn test_add_header_modification_reaches_the_client() {
    let (client_half, server_half) = tokio::io::duplex(4096);
    let mut milter = AddHeaderMilter;
    let mut session = Session::default_postfix(&mut milter);

    let client = Client::new(OptNeg::default());

    let client_script = async {
        let mut connection = client
            .connect_via(client_half.compat())
            .await
            .expect("option negotiation succeeds");

        full_transaction(&mut connection).await;

        let response = connection.end_of_body().await.expect("eob accepted");
        let modifications: Vec<_> = response.modifications().iter().cloned().collect();
        assert_eq!(modifications.len(), 1);

        connection.quit().await.expect("quit sent");
    };

    let (server_result, ()) = tokio::join!(session.run(server_half.compat()), client_script);
    server_result.expect("session completes without error");
}

#[derive(Debug, Default)]
struct UngatedAddHeaderMilter {
    rejected: bool,
}

#[async_trait]
impl Milter for UngatedAddHeaderMilter {
    type Error = std::convert::Infallible;

    // Default `interest()`: doesn't require SMFIF_ADDHDRS, so if the MTA
    // didn't offer it either, the action sender must refuse to emit it.
    async fn end_of_body(&mut self, _macros: MacroLookup<'_>) -> Result<ModificationResponse, Self::Error> {
        let mut builder = ModificationResponse::builder();
        builder.push(AddHeader::new(b"X-Added", b"yes"));
        Ok(builder.contin())
    }

    async fn rejected_modification(&mut self, needed: Capability) {
        assert_eq!(needed, Capability::SMFIF_ADDHDRS);
        self.rejected = true;
    }

    async fn abort(&mut self, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        Ok(Continue.into())
    }
}

#[tokio::test]
async fn test_ungated_modification_is_rejected_without_closing_the_connection() {
    let (client_half, server_half) = tokio::io::duplex(4096);
    let mut milter = UngatedAddHeaderMilter::default();

    let client_options = OptNeg {
        capabilities: Capability::empty(),
        ..OptNeg::default()
    };
    let client = Client::new(client_options);

    let client_script = async {
        let mut connection = client
            .connect_via(client_half.compat())
            .await
            .expect("option negotiation succeeds");

        full_transaction(&mut connection).await;

        connection
            .end_of_body()
            .await
            .expect_err("an ungated modification gets Tempfail, not the requested actions");

        connection.quit().await.expect("quit sent");
    };

    {
        let mut session = Session::default_postfix(&mut milter);
        let (server_result, ()) = tokio::join!(session.run(server_half.compat()), client_script);
        server_result.expect("the session keeps running instead of closing on a rejected modification");
    }

    assert!(milter.rejected, "rejected_modification must have been called");
}

#[derive(Debug, Default)]
struct ChgFromMilter;

#[async_trait]
impl Milter for ChgFromMilter {
    type Error = std::convert::Infallible;

    fn interest(&self) -> EventInterest {
        EventInterest {
            required_actions: Capability::SMFIF_CHGFROM,
            ..EventInterest::default()
        }
    }

    async fn abort(&mut self, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        Ok(Continue.into())
    }
}

#[tokio::test]
async fn test_unsupported_required_action_rejects_negotiation() {
    let (client_half, server_half) = tokio::io::duplex(4096);
    let mut milter = ChgFromMilter;
    let mut session = Session::default_postfix(&mut milter);

    // The MTA doesn't offer SMFIF_CHGFROM, which this milter requires.
    let client_options = OptNeg {
        capabilities: Capability::SMFIF_ADDHDRS,
        ..OptNeg::default()
    };
    let client = Client::new(client_options);

    let client_script = async {
        client
            .connect_via(client_half.compat())
            .await
            .expect_err("negotiation must fail before any mail-processing frame is sent");
    };

    let (server_result, ()) = tokio::join!(session.run(server_half.compat()), client_script);
    server_result.expect_err("the session must close with a negotiation error, not run to completion");
}

#[derive(Debug, Default)]
struct NeverAbortedMilter;

#[async_trait]
impl Milter for NeverAbortedMilter {
    type Error = std::convert::Infallible;

    async fn abort(&mut self, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        Ok(Continue.into())
    }
}

#[tokio::test]
async fn test_phase_violation_is_rejected() {
    let (client_half, server_half) = tokio::io::duplex(4096);
    let mut milter = NeverAbortedMilter;
    let mut session = Session::default_postfix(&mut milter);

    let client = Client::new(OptNeg::default());

    let client_script = async {
        let mut connection = client
            .connect_via(client_half.compat())
            .await
            .expect("option negotiation succeeds");

        // Mail before Connect/Helo is illegal per the state machine.
        connection
            .mail(Mail::from(b"<from@example.com>".as_slice()))
            .await
            .expect_err("mail before connect must be rejected");
    };

    let (server_result, ()) = tokio::join!(session.run(server_half.compat()), client_script);
    server_result.expect("a protocol violation closes the connection cleanly, not with an error");
}
