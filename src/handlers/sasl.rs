//! SASL authentication (PLAIN and EXTERNAL).
//!
//! `AUTHENTICATE <mech>` opens an exchange; the client answers with
//! base64 payload in 400-byte chunks terminated by a short chunk or a
//! bare `+`. A lone `*` aborts.

use super::connection::try_complete_registration;
use super::core::{Context, Handler};
use crate::error::{HandlerError, HandlerResult};
use crate::state::SaslState;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use munin_proto::{Message, Response, Source};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

/// Maximum size of one AUTHENTICATE chunk.
const CHUNK: usize = 400;

pub struct AuthenticateHandler;

#[async_trait]
impl Handler for AuthenticateHandler {
    fn pre_registration(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        crate::metrics::AUTH_ATTEMPTS.inc();
        let arg = msg.param(0).unwrap_or_default().to_string();
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;

        let state = session.read().sasl.clone();
        match state {
            SaslState::Done => {
                ctx.send_numeric(
                    Response::ERR_SASLALREADY,
                    vec!["You have already authenticated".to_string()],
                )
                .await
            }
            SaslState::None => self.begin(ctx, &arg).await,
            SaslState::InProgress(mech) => self.continue_exchange(ctx, &mech, &arg).await,
        }
    }
}

impl AuthenticateHandler {
    async fn begin(&self, ctx: &mut Context<'_>, mechanism: &str) -> HandlerResult {
        let mech = mechanism.to_ascii_uppercase();
        if mech != "PLAIN" && mech != "EXTERNAL" {
            ctx.send_numeric(Response::RPL_SASLMECHS, vec![
                "PLAIN,EXTERNAL".to_string(),
                "are available SASL mechanisms".to_string(),
            ])
            .await?;
            return self.fail(ctx, "Unknown SASL mechanism").await;
        }

        {
            let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
            let mut s = session.write();
            s.sasl = SaslState::InProgress(mech);
            s.sasl_buffer.clear();
        }
        ctx.send(
            Message::new("AUTHENTICATE", vec!["+".to_string()])
                .with_source(Source::server(&ctx.rookery.info.name)),
        )
        .await
    }

    async fn continue_exchange(
        &self,
        ctx: &mut Context<'_>,
        mechanism: &str,
        chunk: &str,
    ) -> HandlerResult {
        if chunk == "*" {
            {
                let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
                let mut s = session.write();
                s.sasl = SaslState::None;
                s.sasl_buffer.zeroize();
                s.sasl_buffer.clear();
            }
            ctx.send_numeric(
                Response::ERR_SASLABORTED,
                vec!["SASL authentication aborted".to_string()],
            )
            .await?;
            return try_complete_registration(ctx).await;
        }

        if chunk.len() > CHUNK {
            return self.fail(ctx, "SASL message too long").await;
        }

        let payload = {
            let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
            let mut s = session.write();
            if chunk != "+" {
                s.sasl_buffer.push_str(chunk);
            }
            if chunk.len() == CHUNK {
                debug!(uid = %ctx.uid, total = s.sasl_buffer.len(), "SASL chunk accumulated");
                return Ok(());
            }
            std::mem::take(&mut s.sasl_buffer)
        };

        let result = match mechanism {
            "PLAIN" => self.finish_plain(ctx, payload).await,
            _ => self.finish_external(ctx, payload).await,
        };
        result?;
        try_complete_registration(ctx).await
    }

    async fn finish_plain(&self, ctx: &mut Context<'_>, mut payload: String) -> HandlerResult {
        let decoded = B64.decode(payload.as_bytes());
        payload.zeroize();
        let Ok(mut decoded) = decoded else {
            return self.fail(ctx, "Invalid base64").await;
        };

        let parts: Vec<&[u8]> = decoded.split(|&b| b == 0).collect();
        if parts.len() != 3 {
            decoded.zeroize();
            return self.fail(ctx, "Invalid SASL PLAIN response").await;
        }
        let authzid = String::from_utf8(parts[0].to_vec()).unwrap_or_default();
        let authcid = String::from_utf8(parts[1].to_vec()).unwrap_or_default();
        let mut password = String::from_utf8(parts[2].to_vec()).unwrap_or_default();
        decoded.zeroize();

        if authcid.is_empty() {
            password.zeroize();
            return self.fail(ctx, "Invalid SASL PLAIN response").await;
        }
        let account_name = if authzid.is_empty() { &authcid } else { &authzid };

        let outcome = ctx.rookery.db.accounts().identify(account_name, &password).await;
        password.zeroize();

        match outcome {
            Ok(account) => self.succeed(ctx, &account.name).await,
            Err(e) => {
                warn!(uid = %ctx.uid, account = %account_name, error = %e, "SASL PLAIN failed");
                self.fail(ctx, "SASL authentication failed").await
            }
        }
    }

    async fn finish_external(&self, ctx: &mut Context<'_>, _payload: String) -> HandlerResult {
        let fingerprint = {
            let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
            let s = session.read();
            s.cert_fingerprint.clone()
        };
        let Some(fingerprint) = fingerprint else {
            return self.fail(ctx, "No client certificate presented").await;
        };

        match ctx.rookery.db.accounts().identify_by_certfp(&fingerprint).await {
            Ok(account) => self.succeed(ctx, &account.name).await,
            Err(_) => {
                warn!(uid = %ctx.uid, "SASL EXTERNAL failed: unknown fingerprint");
                self.fail(ctx, "SASL authentication failed").await
            }
        }
    }

    /// 900 + 903; `session.account` is set exactly once here.
    async fn succeed(&self, ctx: &mut Context<'_>, account: &str) -> HandlerResult {
        let source = {
            let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
            let mut s = session.write();
            s.sasl = SaslState::Done;
            s.account = Some(account.to_string());
            s.source()
        };
        info!(uid = %ctx.uid, account = %account, "SASL authentication successful");
        ctx.send_numeric(
            Response::RPL_LOGGEDIN,
            vec![
                source.to_string(),
                account.to_string(),
                format!("You are now logged in as {account}"),
            ],
        )
        .await?;
        ctx.send_numeric(
            Response::RPL_SASLSUCCESS,
            vec!["SASL authentication successful".to_string()],
        )
        .await?;

        // account-notify to common channels once registered.
        let notify = Message::new("ACCOUNT", vec![account.to_string()]).with_source(source);
        ctx.rookery.send_common_peers(&ctx.uid, &notify, false);
        Ok(())
    }

    /// 904; the session stays unauthenticated.
    async fn fail(&self, ctx: &mut Context<'_>, reason: &str) -> HandlerResult {
        {
            let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
            let mut s = session.write();
            s.sasl = SaslState::None;
            s.sasl_buffer.zeroize();
            s.sasl_buffer.clear();
        }
        ctx.send_numeric(Response::ERR_SASLFAIL, vec![reason.to_string()])
            .await
    }
}
