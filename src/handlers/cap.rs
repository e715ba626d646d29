//! IRCv3 capability negotiation.

use super::connection::try_complete_registration;
use super::core::{Context, Handler};
use crate::error::{HandlerError, HandlerResult};
use async_trait::async_trait;
use munin_proto::{Capability, Message, Response, Source};

pub struct CapHandler;

#[async_trait]
impl Handler for CapHandler {
    fn pre_registration(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let sub = msg
            .param(0)
            .map(str::to_ascii_uppercase)
            .unwrap_or_default();
        match sub.as_str() {
            "LS" => self.handle_ls(ctx, msg.param(1)).await,
            "LIST" => self.handle_list(ctx).await,
            "REQ" => self.handle_req(ctx, msg.param(1).unwrap_or_default()).await,
            "END" => self.handle_end(ctx).await,
            _ => {
                ctx.send_numeric(
                    Response::ERR_UNKNOWNCOMMAND,
                    vec![format!("CAP {sub}"), "Unknown CAP subcommand".to_string()],
                )
                .await
            }
        }
    }
}

impl CapHandler {
    /// Advertised token for one capability, with a value where the
    /// capability defines one.
    fn advertise(ctx: &Context<'_>, cap: Capability, v302: bool) -> Option<String> {
        let config = ctx.rookery.config();
        match cap {
            Capability::Sts => {
                if !config.security.enable_sts {
                    return None;
                }
                if v302 {
                    Some(format!("sts=duration={}", config.security.sts_duration_secs))
                } else {
                    None // sts is 302-only
                }
            }
            Capability::Sasl if v302 => Some("sasl=PLAIN,EXTERNAL".to_string()),
            other => Some(other.as_str().to_string()),
        }
    }

    async fn handle_ls(&self, ctx: &mut Context<'_>, version: Option<&str>) -> HandlerResult {
        let v302 = version.is_some_and(|v| v.parse::<u32>().map(|n| n >= 302).unwrap_or(false));
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        {
            let mut s = session.write();
            if !s.registered {
                s.cap_negotiating = true;
            }
        }
        let tokens: Vec<String> = Capability::ALL
            .iter()
            .filter_map(|&cap| Self::advertise(ctx, cap, v302))
            .collect();
        self.cap_reply(ctx, "LS", &tokens.join(" ")).await
    }

    async fn handle_list(&self, ctx: &mut Context<'_>) -> HandlerResult {
        let caps = {
            let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
            let s = session.read();
            let mut names: Vec<&str> = s.caps.iter().map(|c| c.as_str()).collect();
            names.sort_unstable();
            names.join(" ")
        };
        self.cap_reply(ctx, "LIST", &caps).await
    }

    async fn handle_req(&self, ctx: &mut Context<'_>, request: &str) -> HandlerResult {
        // Atomic: every token must resolve or the whole request is NAKed.
        let mut changes: Vec<(Capability, bool)> = Vec::new();
        let mut valid = true;
        for token in request.split_whitespace() {
            let (name, enable) = match token.strip_prefix('-') {
                Some(rest) => (rest, false),
                None => (token, true),
            };
            match name.parse::<Capability>() {
                Ok(cap) => changes.push((cap, enable)),
                Err(()) => {
                    valid = false;
                    break;
                }
            }
        }

        if !valid || changes.is_empty() {
            return self.cap_reply(ctx, "NAK", request).await;
        }

        {
            let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
            let mut s = session.write();
            if !s.registered {
                s.cap_negotiating = true;
            }
            for (cap, enable) in &changes {
                if *enable {
                    s.caps.insert(*cap);
                } else {
                    s.caps.remove(cap);
                }
            }
        }
        self.cap_reply(ctx, "ACK", request).await
    }

    async fn handle_end(&self, ctx: &mut Context<'_>) -> HandlerResult {
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        session.write().cap_negotiating = false;
        try_complete_registration(ctx).await
    }

    async fn cap_reply(&self, ctx: &Context<'_>, sub: &str, payload: &str) -> HandlerResult {
        let target = ctx.nick_or_star();
        ctx.send(
            Message::new(
                "CAP",
                vec![target, sub.to_string(), payload.to_string()],
            )
            .with_source(Source::server(&ctx.rookery.info.name)),
        )
        .await
    }
}
