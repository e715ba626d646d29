//! NS/CS/MS convenience aliases: `/NS IDENTIFY ...` behaves exactly like
//! `/PRIVMSG NickServ :IDENTIFY ...`.

use super::core::{Context, Handler};
use crate::error::HandlerResult;
use async_trait::async_trait;
use munin_proto::Message;

async fn forward(ctx: &mut Context<'_>, service: &str, msg: &Message) -> HandlerResult {
    let text = msg.params.join(" ");
    if text.is_empty() {
        return Ok(());
    }
    crate::services::handle_service_message(ctx.rookery, &ctx.uid, service, &text).await;
    Ok(())
}

pub struct NickServAlias;

#[async_trait]
impl Handler for NickServAlias {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        forward(ctx, "NickServ", msg).await
    }
}

pub struct ChanServAlias;

#[async_trait]
impl Handler for ChanServAlias {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        forward(ctx, "ChanServ", msg).await
    }
}

pub struct MemoServAlias;

#[async_trait]
impl Handler for MemoServAlias {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        forward(ctx, "MemoServ", msg).await
    }
}
