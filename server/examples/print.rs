//! A milter that prints callback arguments and macros for each stage.

use std::env;
use async_trait::async_trait;

use miltergate_server::{listen, BindAddr, Error, ListenConfig, MacroLookup, Milter};
use miltergate_wire::{
        actions::{Action, Continue},
        commands::{Body, Connect, Header, Helo, Macro, Mail, Recipient, Unknown},
        modifications::ModificationResponse,
        optneg::OptNeg,
};

struct PrintMilter;

#[async_trait]
impl Milter for PrintMilter {
    type Error = &'static str;
    async fn option_negotiation(&mut self, opt_neg: OptNeg) -> Result<OptNeg, Error<Self::Error>> {
        println!("\n======== NEGOTIATE ========");
        println!("  opts received: {opt_neg:#?}");
        let opts = OptNeg::default();
        println!("  opts sent back: {opts:#?}");
        Ok(opts)
    }

    async fn connect(&mut self, connect_info: Connect, macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        println!("\n======== CONNECT ========");
        println!("  hostname: {}", connect_info.hostname());
        println!(
            "  socket_info: {}:{:?}",
            connect_info.address(),
            connect_info.port
        );
        println!("  family: {:?}", connect_info.family);
        if let Some(daemon_name) = macros.get("j") {
            println!("  {{j}} macro: {daemon_name}");
        }
        Ok(Continue.into())
    }

    async fn helo(&mut self, helo: Helo, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        println!("\n======== HELO ========");
        println!("  hostname: {}", helo.helo());
        Ok(Continue.into())
    }

    async fn mail(&mut self, mail: Mail, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        println!("\n======== MAIL ========");
        println!("  sender: {}", mail.sender());
        for arg in mail.esmtp_args() {
            println!("  esmtp_args: {arg}");
        }
        Ok(Continue.into())
    }

    async fn rcpt(&mut self, recipient: Recipient, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        println!("\n======== RCPT ========");
        println!("  recipient: {:?}", recipient.recipient());
        for arg in recipient.esmtp_args() {
            println!("  esmtp_args: {arg}");
        }
        Ok(Continue.into())
    }

    async fn data(&mut self, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        println!("\n======== DATA ========");
        Ok(Continue.into())
    }

    async fn header(&mut self, header: Header, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        println!("\n======== HEADER ========");
        println!("  name: {}", header.name());
        println!("  value: {}", header.value());
        Ok(Continue.into())
    }

    async fn end_of_header(&mut self, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        println!("\n======== EOH ========");
        Ok(Continue.into())
    }

    async fn body(&mut self, body: Body, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        println!("\n======== BODY ========");
        println!("  body part: {}", String::from_utf8_lossy(body.as_bytes()));
        Ok(Continue.into())
    }

    async fn end_of_body(&mut self, _macros: MacroLookup<'_>) -> Result<ModificationResponse, Self::Error> {
        println!("\n======== END OF BODY ========");
        Ok(ModificationResponse::empty_continue())
    }

    async fn abort(&mut self, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        println!("\n======== ABORT ========");
        Ok(Continue.into())
    }

    async fn quit(&mut self) -> Result<(), Self::Error> {
        println!("\n======== QUIT ========");
        Ok(())
    }

    async fn quit_nc(&mut self) -> Result<(), Self::Error> {
        println!("\n======== QUIT NEXT CONNECTION ========");
        Ok(())
    }

    async fn unknown(&mut self, cmd: Unknown, _macros: MacroLookup<'_>) -> Result<Action, Self::Error> {
        println!("\n======== UNKNOWN ========");
        println!("  Raw: {cmd:?}");
        Ok(Continue.into())
    }

    async fn macro_(&mut self, macro_: Macro) -> Result<(), Self::Error> {
        println!("\n======== MACRO ========");
        println!(
            "  code: {}",
            char::from_u32(u32::from(macro_.code)).unwrap()
        );
        for (key, value) in macro_.macros() {
            println!(
                "  macro - {}:{}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(value)
            );
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let addr = env::var("LISTEN_ADDR").unwrap_or("0.0.0.0:8080".to_string());
    let bind = BindAddr::Tcp(addr.parse().expect("LISTEN_ADDR must be a socket address"));

    println!("\n======== Listening on {addr} ========");
    listen(bind, || PrintMilter, ListenConfig::default())
        .await
        .expect("listener failed");
}
