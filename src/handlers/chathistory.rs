//! `draft/chathistory`.
//!
//! Sub-selectors LATEST, BEFORE, AFTER, AROUND, BETWEEN, TARGETS. Results
//! arrive ascending inside a `chathistory` batch; missing targets produce
//! an empty batch rather than an error.

use super::core::{Context, Handler};
use super::helpers::{new_msgid, require_params};
use crate::db::{Anchor, StoredMessage};
use crate::error::{HandlerError, HandlerResult};
use async_trait::async_trait;
use chrono::DateTime;
use munin_proto::{irc_to_lower, Capability, Message, Source};

/// Ceiling on per-request history.
const MAX_LIMIT: u32 = 100;

pub struct ChatHistoryHandler;

#[async_trait]
impl Handler for ChatHistoryHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 2)?;
        let sub = msg.params[0].to_ascii_uppercase();

        match sub.as_str() {
            "LATEST" => {
                // CHATHISTORY LATEST <target> <*|anchor> <limit>
                require_params(msg, 4)?;
                let target = irc_to_lower(&msg.params[1]);
                let limit = parse_limit(msg.param(3));
                let messages = if msg.params[2] == "*" {
                    ctx.rookery.db.history().latest(&target, limit).await
                } else {
                    let Some(anchor) = parse_anchor(&msg.params[2]) else {
                        return fail(ctx, "LATEST", "INVALID_PARAMS").await;
                    };
                    ctx.rookery.db.history().after(&target, &anchor, limit).await
                };
                self.emit(ctx, &msg.params[1], messages).await
            }
            "BEFORE" | "AFTER" | "AROUND" => {
                require_params(msg, 4)?;
                let target = irc_to_lower(&msg.params[1]);
                let Some(anchor) = parse_anchor(&msg.params[2]) else {
                    return fail(ctx, &sub, "INVALID_PARAMS").await;
                };
                let limit = parse_limit(msg.param(3));
                let history = ctx.rookery.db.history();
                let messages = match sub.as_str() {
                    "BEFORE" => history.before(&target, &anchor, limit).await,
                    "AFTER" => history.after(&target, &anchor, limit).await,
                    _ => history.around(&target, &anchor, limit).await,
                };
                self.emit(ctx, &msg.params[1], messages).await
            }
            "BETWEEN" => {
                require_params(msg, 5)?;
                let target = irc_to_lower(&msg.params[1]);
                let (Some(a), Some(b)) = (parse_anchor(&msg.params[2]), parse_anchor(&msg.params[3]))
                else {
                    return fail(ctx, "BETWEEN", "INVALID_PARAMS").await;
                };
                let limit = parse_limit(msg.param(4));
                let messages = ctx.rookery.db.history().between(&target, &a, &b, limit).await;
                self.emit(ctx, &msg.params[1], messages).await
            }
            "TARGETS" => {
                require_params(msg, 4)?;
                let (Some(Anchor::Ts(a)), Some(Anchor::Ts(b))) =
                    (parse_anchor(&msg.params[1]), parse_anchor(&msg.params[2]))
                else {
                    return fail(ctx, "TARGETS", "INVALID_PARAMS").await;
                };
                let limit = parse_limit(msg.param(3));
                let targets = ctx
                    .rookery
                    .db
                    .history()
                    .targets(a, b, limit)
                    .await
                    .unwrap_or_default();

                let batch_ref = new_msgid();
                self.open_batch(ctx, &batch_ref, "*").await?;
                for (target, ts) in targets {
                    let line = Message::new(
                        "CHATHISTORY",
                        vec![
                            "TARGETS".to_string(),
                            target,
                            format_ts(ts),
                        ],
                    )
                    .with_source(Source::server(&ctx.rookery.info.name))
                    .with_tag("batch", Some(batch_ref.clone()));
                    ctx.send(line).await?;
                }
                self.close_batch(ctx, &batch_ref).await
            }
            _ => fail(ctx, &sub, "INVALID_PARAMS").await,
        }
    }
}

impl ChatHistoryHandler {
    async fn emit(
        &self,
        ctx: &Context<'_>,
        target: &str,
        messages: Result<Vec<StoredMessage>, crate::db::DbError>,
    ) -> HandlerResult {
        let messages = match messages {
            Ok(m) => m,
            Err(e) => return Err(HandlerError::Persistence(e.to_string())),
        };

        let batch_ref = new_msgid();
        self.open_batch(ctx, &batch_ref, target).await?;
        for stored in messages {
            let source = ctx
                .rookery
                .user_source(&stored.sender_uid)
                .unwrap_or_else(|| Source::server(&stored.sender_uid));
            let mut line = Message::new(
                "PRIVMSG",
                vec![target.to_string(), stored.text.clone()],
            )
            .with_source(source)
            .with_tag("batch", Some(batch_ref.clone()))
            .with_tag("time", Some(format_ts(stored.ts)))
            .with_tag("msgid", Some(stored.msg_id.clone()));
            if let Some(account) = &stored.sender_account {
                line = line.with_tag("account", Some(account.clone()));
            }
            ctx.send(line).await?;
        }
        self.close_batch(ctx, &batch_ref).await
    }

    async fn open_batch(&self, ctx: &Context<'_>, batch_ref: &str, target: &str) -> HandlerResult {
        if !self.has_batch(ctx) {
            return Ok(());
        }
        ctx.send(
            Message::new(
                "BATCH",
                vec![
                    format!("+{batch_ref}"),
                    "chathistory".to_string(),
                    target.to_string(),
                ],
            )
            .with_source(Source::server(&ctx.rookery.info.name)),
        )
        .await
    }

    async fn close_batch(&self, ctx: &Context<'_>, batch_ref: &str) -> HandlerResult {
        if !self.has_batch(ctx) {
            return Ok(());
        }
        ctx.send(
            Message::new("BATCH", vec![format!("-{batch_ref}")])
                .with_source(Source::server(&ctx.rookery.info.name)),
        )
        .await
    }

    fn has_batch(&self, ctx: &Context<'_>) -> bool {
        ctx.session()
            .map(|s| s.read().has_cap(Capability::Batch))
            .unwrap_or(false)
    }
}

/// `timestamp=...` or `msgid=...`.
fn parse_anchor(raw: &str) -> Option<Anchor> {
    if let Some(ts) = raw.strip_prefix("timestamp=") {
        // ISO8601 or raw unix seconds.
        if let Ok(parsed) = DateTime::parse_from_rfc3339(ts) {
            return Some(Anchor::Ts(parsed.timestamp()));
        }
        return ts.parse().ok().map(Anchor::Ts);
    }
    raw.strip_prefix("msgid=").map(|id| Anchor::MsgId(id.to_string()))
}

fn parse_limit(raw: Option<&str>) -> u32 {
    raw.and_then(|l| l.parse().ok())
        .filter(|&l| l > 0)
        .unwrap_or(50)
        .min(MAX_LIMIT)
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_default()
}

/// standard-replies FAIL.
async fn fail(ctx: &Context<'_>, sub: &str, code: &str) -> HandlerResult {
    ctx.send(
        Message::new(
            "FAIL",
            vec![
                "CHATHISTORY".to_string(),
                code.to_string(),
                sub.to_string(),
                "Invalid parameters".to_string(),
            ],
        )
        .with_source(Source::server(&ctx.rookery.info.name)),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_parsing() {
        assert!(matches!(parse_anchor("timestamp=100"), Some(Anchor::Ts(100))));
        assert!(matches!(
            parse_anchor("timestamp=2023-01-01T00:00:00Z"),
            Some(Anchor::Ts(_))
        ));
        assert!(matches!(parse_anchor("msgid=abc"), Some(Anchor::MsgId(_))));
        assert!(parse_anchor("garbage").is_none());
    }

    #[test]
    fn limit_parsing() {
        assert_eq!(parse_limit(Some("4")), 4);
        assert_eq!(parse_limit(Some("0")), 50);
        assert_eq!(parse_limit(Some("9999")), MAX_LIMIT);
        assert_eq!(parse_limit(None), 50);
    }
}
