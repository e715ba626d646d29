//! Burst generation.
//!
//! After handshake both sides exchange their full state: known servers,
//! users (UID), channels (SJOIN, with TB for topics), and persistent
//! network bans (ENCAP). The burst ends with a PING carrying our SID; the
//! peer's PONG marks the link fully established.

use crate::security::BanKind;
use crate::state::Rookery;
use munin_proto::{Message, Source};

/// Generate the full burst for a new peer. `peer_sid` is excluded from
/// the server list (it knows itself).
pub fn generate_burst(rookery: &Rookery, peer_sid: &str) -> Vec<Message> {
    let local_sid = &rookery.info.sid;
    let mut lines = Vec::new();

    // 1. Servers: everything we know except ourselves and the peer.
    for server in rookery.topology.all() {
        if &server.sid == local_sid || server.sid == peer_sid {
            continue;
        }
        lines.push(
            Message::new(
                "SERVER",
                vec![
                    server.name.clone(),
                    (server.hop_count + 1).to_string(),
                    server.sid.clone(),
                    server.description.clone(),
                ],
            )
            .with_source(Source::server(local_sid)),
        );
    }

    // 2. Users: local sessions from us, services and remote users from
    // their origin SID.
    for entry in rookery.sessions.iter() {
        let s = entry.value().read();
        if !s.registered {
            continue;
        }
        lines.push(
            Message::new(
                "UID",
                vec![
                    s.nick.clone().unwrap_or_default(),
                    "1".to_string(),
                    s.nick_ts.to_string(),
                    s.user.clone().unwrap_or_default(),
                    s.host.clone(),
                    s.uid.clone(),
                    s.ip.to_string(),
                    s.modes.to_mode_string(),
                    s.host.clone(),
                    s.realname.clone().unwrap_or_default(),
                ],
            )
            .with_source(Source::server(local_sid)),
        );
    }
    for entry in rookery.remotes.iter() {
        let user = entry.value();
        if !user.is_service && user.sid() == peer_sid {
            continue; // never bounce users back at their origin
        }
        let origin = if user.is_service {
            local_sid.clone()
        } else {
            user.sid().to_string()
        };
        lines.push(
            Message::new(
                "UID",
                vec![
                    user.nick.clone(),
                    "2".to_string(),
                    user.introduced_ts.to_string(),
                    user.user.clone(),
                    user.host.clone(),
                    user.uid.clone(),
                    "0".to_string(),
                    user.modes.to_mode_string(),
                    user.display_host().to_string(),
                    user.realname.clone(),
                ],
            )
            .with_source(Source::server(&origin)),
        );
    }

    // 3. Channels: one SJOIN each, then TB for topics.
    for entry in rookery.channels.iter() {
        let chan = entry.value().lock();
        if chan.members.is_empty() {
            continue;
        }
        let mut prefixed: Vec<String> = chan
            .members
            .iter()
            .map(|(uid, modes)| format!("{}{}", modes.all_prefixes(), uid))
            .collect();
        prefixed.sort_unstable();

        let mode_string = chan.modes.to_mode_string(true);
        let mut parts = mode_string.split(' ');
        let letters = parts.next().unwrap_or("+").to_string();
        let mut params = vec![chan.created_ts.to_string(), chan.name.clone(), letters];
        params.extend(parts.map(str::to_string));
        params.push(prefixed.join(" "));

        lines.push(Message::new("SJOIN", params).with_source(Source::server(local_sid)));

        if let Some(topic) = &chan.topic {
            lines.push(
                Message::new(
                    "TB",
                    vec![
                        chan.name.clone(),
                        topic.set_at.to_string(),
                        topic.set_by.clone(),
                        topic.text.clone(),
                    ],
                )
                .with_source(Source::server(local_sid)),
            );
        }
    }

    // 4. Persistent network bans. G-lines travel as AKILL, K-lines as
    // KLINE; both wrapped in a broadcast ENCAP.
    {
        let bans = rookery.bans.read();
        let now = chrono::Utc::now();
        for ban in bans.iter() {
            if ban.is_expired(now) {
                continue;
            }
            let subcmd = match ban.kind {
                BanKind::GLine => "AKILL",
                BanKind::KLine => "KLINE",
                _ => continue,
            };
            lines.push(
                Message::new(
                    "ENCAP",
                    vec![
                        "*".to_string(),
                        subcmd.to_string(),
                        ban.pattern.clone(),
                        ban.reason.clone(),
                    ],
                )
                .with_source(Source::server(local_sid)),
            );
        }
    }

    // 5. Implicit end-of-burst.
    lines.push(Message::ping(local_sid.clone()).with_source(Source::server(local_sid)));

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::*;
    use crate::state::MemberModes;

    #[tokio::test]
    async fn burst_order_and_content() {
        let rookery = rookery().await;
        crate::services::register_services(&rookery);
        let (alice, _rx) = fake_session(&rookery, "alice");

        let (chan, _) = rookery.channel_or_create("#t");
        {
            let mut guard = chan.lock();
            guard.created_ts = 1000;
            guard.modes.no_external = true;
            guard.modes.topic_lock = true;
            guard.add_member(alice.clone(), MemberModes { op: true, ..Default::default() });
            guard.topic = Some(crate::state::Topic {
                text: "hello".into(),
                set_by: "alice".into(),
                set_at: 1234,
            });
        }

        let burst = generate_burst(&rookery, "002");

        // Users before channels, PING last.
        let uid_idx = burst.iter().position(|m| m.command == "UID").unwrap();
        let sjoin_idx = burst.iter().position(|m| m.command == "SJOIN").unwrap();
        assert!(uid_idx < sjoin_idx);
        assert_eq!(burst.last().unwrap().command, "PING");

        // The SJOIN carries TS, name, modes, and the op-prefixed uid.
        let sjoin = &burst[sjoin_idx];
        assert_eq!(sjoin.params[0], "1000");
        assert_eq!(sjoin.params[1], "#t");
        assert_eq!(sjoin.params[2], "+nt");
        assert_eq!(sjoin.params[3], format!("@{alice}"));

        // Topic burst follows its channel.
        let tb = burst.iter().find(|m| m.command == "TB").unwrap();
        assert_eq!(tb.params[0], "#t");
        assert_eq!(tb.params[3], "hello");

        // Services are introduced from our SID.
        let service_uid = burst
            .iter()
            .filter(|m| m.command == "UID")
            .find(|m| m.params[0] == "NickServ")
            .expect("NickServ in burst");
        assert_eq!(service_uid.params[5], "001AAAAAN");
    }

    #[tokio::test]
    async fn burst_excludes_peers_own_users() {
        let rookery = rookery().await;
        rookery.remotes.insert(
            "002AAAABA".to_string(),
            crate::state::RemoteUser {
                uid: "002AAAABA".into(),
                nick: "bob".into(),
                user: "bob".into(),
                host: "h".into(),
                vhost: None,
                realname: "Bob".into(),
                modes: Default::default(),
                account: None,
                away: None,
                introduced_ts: 1,
                channels: Default::default(),
                is_service: false,
            },
        );

        let burst = generate_burst(&rookery, "002");
        assert!(
            !burst
                .iter()
                .any(|m| m.command == "UID" && m.params[5] == "002AAAABA"),
            "peer's own users must not be bounced back"
        );
    }
}
