//! Presence: AWAY and SETNAME.

use super::core::{Context, Handler};
use super::helpers::require_params;
use crate::error::{HandlerError, HandlerResult};
use async_trait::async_trait;
use munin_proto::{Capability, Message, Response};

pub struct AwayHandler;

#[async_trait]
impl Handler for AwayHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let text = msg.param(0).filter(|t| !t.is_empty()).map(str::to_string);
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        let source = {
            let mut s = session.write();
            s.away = text.clone();
            s.source()
        };

        match &text {
            Some(_) => {
                ctx.send_numeric(
                    Response::RPL_NOWAWAY,
                    vec!["You have been marked as being away".to_string()],
                )
                .await?
            }
            None => {
                ctx.send_numeric(
                    Response::RPL_UNAWAY,
                    vec!["You are no longer marked as being away".to_string()],
                )
                .await?
            }
        }

        // away-notify: observers with the cap see the transition.
        let notify =
            Message::new("AWAY", text.clone().into_iter().collect()).with_source(source);
        broadcast_with_cap(ctx, &notify, Capability::AwayNotify);
        ctx.rookery.broadcast_servers(
            &Message::new("AWAY", text.into_iter().collect())
                .with_source(munin_proto::Source::server(&ctx.uid)),
            None,
        );
        Ok(())
    }
}

pub struct SetnameHandler;

#[async_trait]
impl Handler for SetnameHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 1)?;
        let new_name = msg.params[0].clone();
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        let source = {
            let mut s = session.write();
            s.realname = Some(new_name.clone());
            s.source()
        };

        let change = Message::new("SETNAME", vec![new_name]).with_source(source);
        // SETNAME always echoes to the issuer, capability or not.
        ctx.send(change.clone()).await?;
        broadcast_with_cap(ctx, &change, Capability::Setname);
        Ok(())
    }
}

/// Fan a message out to common-channel peers holding a capability.
fn broadcast_with_cap(ctx: &Context<'_>, msg: &Message, cap: Capability) {
    let channel_names: Vec<String> = ctx
        .session()
        .map(|s| s.read().channels.iter().cloned().collect())
        .unwrap_or_default();

    let mut seen = std::collections::HashSet::new();
    for name in &channel_names {
        let Some(channel) = ctx.rookery.channel(name) else {
            continue;
        };
        let members: Vec<String> = channel.lock().members.keys().cloned().collect();
        for member in members {
            if member == ctx.uid || !ctx.rookery.is_local_uid(&member) {
                continue;
            }
            if !seen.insert(member.clone()) {
                continue;
            }
            let has_cap = ctx
                .rookery
                .sessions
                .get(&member)
                .map(|s| s.value().read().has_cap(cap))
                .unwrap_or(false);
            if has_cap {
                ctx.rookery.send(&member, msg.clone());
            }
        }
    }
}
