//! Post-burst S2S message dispatch.
//!
//! Every message carries a source (UID for user traffic, SID for server
//! traffic). Traffic relayed onward never goes back out the link it
//! arrived on.

use crate::error::LinkError;
use crate::security::{BanKind, ServerBan};
use crate::state::{ChannelModes, MemberModes, RemoteUser, Rookery, SjoinOutcome};
use chrono::Utc;
use munin_proto::{irc_to_lower, Message, Source};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The link a message arrived on.
pub struct PeerContext {
    pub sid: String,
    pub name: String,
}

/// Dispatch one message from an established link. `Ok(false)` closes the
/// link gracefully.
pub async fn dispatch(
    rookery: &Arc<Rookery>,
    peer: &PeerContext,
    msg: &Message,
) -> Result<bool, LinkError> {
    let source = msg.source.clone();
    let source_id = match &source {
        Some(Source::Named(id)) => id.clone(),
        Some(Source::User { nick, .. }) => nick.clone(),
        None => peer.sid.clone(),
    };

    match msg.command.as_str() {
        "PING" => {
            let token = msg.params.last().cloned().unwrap_or_default();
            rookery.send_server(
                &peer.sid,
                Message::new("PONG", vec![rookery.info.name.clone(), token])
                    .with_source(Source::server(&rookery.info.sid)),
            );
        }
        "PONG" => {
            // Burst handshake complete from the peer's side.
            debug!(peer = %peer.name, "burst acknowledged");
        }
        "ERROR" => {
            warn!(peer = %peer.name, error = ?msg.params.first(), "peer closed link");
            return Ok(false);
        }
        "SQUIT" => handle_squit(rookery, peer, msg)?,
        "SERVER" => handle_server(rookery, peer, &source_id, msg)?,
        "UID" => handle_uid(rookery, peer, &source_id, msg),
        "NICK" => handle_nick_change(rookery, peer, &source_id, msg),
        "QUIT" => {
            let reason = msg.params.first().cloned().unwrap_or_default();
            rookery.remove_remote_user(&source_id, &reason);
            rookery.broadcast_servers(msg, Some(&peer.sid));
        }
        "KILL" => handle_kill(rookery, peer, msg),
        "SJOIN" => handle_sjoin(rookery, peer, &source_id, msg),
        "TMODE" => handle_tmode(rookery, peer, &source_id, msg),
        "TB" => handle_tb(rookery, peer, msg),
        "TOPIC" => handle_topic(rookery, peer, &source_id, msg),
        "PART" => handle_part(rookery, peer, &source_id, msg),
        "KICK" => handle_kick(rookery, peer, &source_id, msg),
        "PRIVMSG" | "NOTICE" => handle_message(rookery, peer, &source_id, msg).await,
        "MODE" => handle_user_mode(rookery, peer, msg),
        "AWAY" => {
            if let Some(mut user) = rookery.remotes.get_mut(&source_id) {
                user.away = msg.params.first().cloned();
            }
            rookery.broadcast_servers(msg, Some(&peer.sid));
        }
        "INVITE" => {
            // :uid INVITE <target_uid> <channel>
            if let (Some(target_uid), Some(channel)) = (msg.param(0), msg.param(1)) {
                if rookery.is_local_uid(target_uid) {
                    if let Some(chan) = rookery.channel(channel) {
                        chan.lock().invited.push(target_uid.to_string());
                    }
                    let inviter = rookery
                        .user_source(&source_id)
                        .unwrap_or_else(|| Source::server(&peer.name));
                    let target_nick = rookery.user_nick(target_uid).unwrap_or_default();
                    rookery.send(
                        target_uid,
                        Message::new("INVITE", vec![target_nick, channel.to_string()])
                            .with_source(inviter),
                    );
                } else {
                    rookery.send_server(&target_uid[..3], msg.clone());
                }
            }
        }
        "WALLOPS" => {
            let text = msg.params.first().cloned().unwrap_or_default();
            let wall = Message::new("WALLOPS", vec![text]).with_source(
                rookery
                    .user_source(&source_id)
                    .unwrap_or_else(|| Source::server(&peer.name)),
            );
            for entry in rookery.sessions.iter() {
                let wants = {
                    let s = entry.value().read();
                    s.modes.wallops || s.modes.oper
                };
                if wants {
                    rookery.send(entry.key(), wall.clone());
                }
            }
            rookery.broadcast_servers(msg, Some(&peer.sid));
        }
        "ENCAP" => handle_encap(rookery, peer, &source_id, msg).await,
        other => {
            // Unknown S2S traffic is logged and relayed, never fatal.
            debug!(peer = %peer.name, command = %other, "unhandled S2S command relayed");
            rookery.broadcast_servers(msg, Some(&peer.sid));
        }
    }
    Ok(true)
}

fn handle_squit(
    rookery: &Arc<Rookery>,
    peer: &PeerContext,
    msg: &Message,
) -> Result<(), LinkError> {
    let Some(target_name) = msg.param(0) else {
        return Ok(());
    };
    let reason = msg.param(1).unwrap_or("SQUIT").to_string();

    if munin_proto::irc_eq(target_name, &rookery.info.name) {
        // We are being removed from the peer's view; drop the link.
        return Err(LinkError::Protocol(format!("SQUIT for us: {reason}")));
    }
    if let Some(sid) = rookery.topology.sid_by_name(target_name) {
        super::split::handle_netsplit(rookery, &sid, &reason, Some(&peer.sid));
    }
    Ok(())
}

fn handle_server(
    rookery: &Arc<Rookery>,
    peer: &PeerContext,
    source_id: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    // :<uplink-sid> SERVER <name> <hop> <sid> :<description>
    if msg.params.len() < 4 {
        return Err(LinkError::Protocol("short SERVER line".to_string()));
    }
    let (name, hop, sid, description) = (
        msg.params[0].clone(),
        msg.params[1].parse::<u8>().unwrap_or(2),
        msg.params[2].clone(),
        msg.params[3].clone(),
    );

    // Jupes block named servers from joining the network.
    {
        let now = Utc::now();
        let bans = rookery.bans.read();
        if bans.iter().any(|b| b.matches_server(&name, now)) {
            warn!(server = %name, "juped server introduction refused");
            return Ok(());
        }
    }

    let uplink = if rookery.topology.contains_sid(source_id) {
        source_id.to_string()
    } else {
        peer.sid.clone()
    };
    let added = rookery.topology.add_server(super::topology::LinkedServer {
        sid: sid.clone(),
        name: name.clone(),
        description,
        hop_count: hop,
        uplink: Some(uplink),
        is_direct: false,
    });
    if !added {
        warn!(server = %name, sid = %sid, "duplicate server introduction ignored");
        return Ok(());
    }
    info!(server = %name, sid = %sid, via = %peer.name, "server introduced");
    rookery.broadcast_servers(msg, Some(&peer.sid));
    Ok(())
}

/// Which side of a nick collision dies: the younger nickname.
enum Collision {
    KillIncoming,
    KillExisting,
    KillBoth,
}

fn resolve_collision(existing_ts: i64, incoming_ts: i64) -> Collision {
    use std::cmp::Ordering;
    match incoming_ts.cmp(&existing_ts) {
        Ordering::Greater => Collision::KillIncoming,
        Ordering::Less => Collision::KillExisting,
        Ordering::Equal => Collision::KillBoth,
    }
}

fn handle_uid(rookery: &Arc<Rookery>, peer: &PeerContext, _source_id: &str, msg: &Message) {
    // :<origin-sid> UID nick hop ts user host uid ip modes vhost :realname
    if msg.params.len() < 10 {
        warn!(peer = %peer.name, "short UID line dropped");
        return;
    }
    let nick = msg.params[0].clone();
    let introduced_ts: i64 = msg.params[2].parse().unwrap_or_else(|_| Utc::now().timestamp());
    let user = msg.params[3].clone();
    let host = msg.params[4].clone();
    let uid = msg.params[5].clone();
    let modes = crate::state::UserModes::from_mode_string(&msg.params[7]);
    let vhost = Some(msg.params[8].clone()).filter(|v| v != "*" && v != &host);
    let realname = msg.params[9].clone();

    if rookery.is_local_uid(&uid) || rookery.remotes.contains_key(&uid) {
        warn!(uid = %uid, "duplicate UID introduction dropped");
        return;
    }

    // Nick collision: the younger introduction loses.
    if let Some(existing_uid) = rookery.uid_by_nick(&nick) {
        let existing_ts = if let Some(session) = rookery.sessions.get(&existing_uid) {
            session.value().read().nick_ts
        } else if let Some(remote) = rookery.remotes.get(&existing_uid) {
            remote.introduced_ts
        } else {
            0
        };

        let kill = |victim_uid: &str| {
            info!(nick = %nick, victim = %victim_uid, "nick collision");
            rookery.broadcast_servers(
                &Message::new(
                    "KILL",
                    vec![victim_uid.to_string(), "Nick collision".to_string()],
                )
                .with_source(Source::server(&rookery.info.sid)),
                None,
            );
            if rookery.is_local_uid(victim_uid) {
                rookery.kill_connection(victim_uid, "Nick collision");
            } else {
                rookery.remove_remote_user(victim_uid, "Nick collision");
            }
        };

        match resolve_collision(existing_ts, introduced_ts) {
            Collision::KillIncoming => {
                kill(&uid);
                return;
            }
            Collision::KillExisting => kill(&existing_uid),
            Collision::KillBoth => {
                kill(&existing_uid);
                kill(&uid);
                return;
            }
        }
    }

    let remote = RemoteUser {
        uid: uid.clone(),
        nick: nick.clone(),
        user,
        host,
        vhost,
        realname,
        modes,
        account: None,
        away: None,
        introduced_ts,
        channels: HashSet::new(),
        is_service: false,
    };
    rookery.claim_nick(&nick, &uid);
    rookery.remotes.insert(uid, remote);
    rookery.broadcast_servers(msg, Some(&peer.sid));
}

fn handle_nick_change(
    rookery: &Arc<Rookery>,
    peer: &PeerContext,
    source_uid: &str,
    msg: &Message,
) {
    let Some(new_nick) = msg.param(0).map(str::to_string) else {
        return;
    };
    let new_ts: i64 = msg
        .param(1)
        .and_then(|t| t.parse().ok())
        .unwrap_or_else(|| Utc::now().timestamp());

    // Collision with a different holder of the nick.
    if let Some(existing_uid) = rookery.uid_by_nick(&new_nick) {
        if existing_uid != source_uid {
            let existing_ts = if let Some(session) = rookery.sessions.get(&existing_uid) {
                session.value().read().nick_ts
            } else if let Some(remote) = rookery.remotes.get(&existing_uid) {
                remote.introduced_ts
            } else {
                0
            };
            let kill_existing = !matches!(resolve_collision(existing_ts, new_ts), Collision::KillIncoming);
            let victim = if kill_existing { existing_uid.clone() } else { source_uid.to_string() };
            info!(nick = %new_nick, victim = %victim, "nick-change collision");
            rookery.broadcast_servers(
                &Message::new("KILL", vec![victim.clone(), "Nick collision".to_string()])
                    .with_source(Source::server(&rookery.info.sid)),
                None,
            );
            if rookery.is_local_uid(&victim) {
                rookery.kill_connection(&victim, "Nick collision");
            } else {
                rookery.remove_remote_user(&victim, "Nick collision");
            }
            if victim == source_uid {
                return;
            }
        }
    }

    let old_source = rookery.user_source(source_uid);
    if let Some(mut remote) = rookery.remotes.get_mut(source_uid) {
        let old_nick = remote.nick.clone();
        rookery.release_nick(&old_nick, source_uid);
        remote.nick = new_nick.clone();
        remote.introduced_ts = new_ts;
    } else {
        return;
    }
    rookery.claim_nick(&new_nick, source_uid);

    if let Some(old_source) = old_source {
        let change = Message::new("NICK", vec![new_nick]).with_source(old_source);
        rookery.send_common_peers(source_uid, &change, false);
    }
    rookery.broadcast_servers(msg, Some(&peer.sid));
}

fn handle_kill(rookery: &Arc<Rookery>, peer: &PeerContext, msg: &Message) {
    let Some(target_uid) = msg.param(0) else {
        return;
    };
    let reason = msg.param(1).unwrap_or("Killed").to_string();

    if rookery
        .remotes
        .get(target_uid)
        .is_some_and(|r| r.is_service)
    {
        return; // services are exempt from remote KILLs
    }

    if rookery.is_local_uid(target_uid) {
        rookery.kill_connection(target_uid, &reason);
    } else {
        rookery.remove_remote_user(target_uid, &reason);
    }
    rookery.broadcast_servers(msg, Some(&peer.sid));
}

fn handle_sjoin(rookery: &Arc<Rookery>, peer: &PeerContext, _source_id: &str, msg: &Message) {
    // :<sid> SJOIN <ts> <name> <+modes> [mode params] :<prefixed uids>
    if msg.params.len() < 4 {
        warn!(peer = %peer.name, "short SJOIN dropped");
        return;
    }
    let their_ts: i64 = msg.params[0].parse().unwrap_or_else(|_| Utc::now().timestamp());
    let name = msg.params[1].clone();
    let mode_letters = msg.params[2].clone();
    let mode_params: Vec<String> = msg.params[3..msg.params.len() - 1].to_vec();
    let member_list = msg.params.last().cloned().unwrap_or_default();

    let their_modes = ChannelModes::from_sjoin(&mode_letters, &mode_params);
    let (channel, created) = rookery.channel_or_create(&name);

    let outcome = {
        let mut chan = channel.lock();
        if created {
            chan.created_ts = their_ts;
            chan.modes = their_modes.clone();
            SjoinOutcome::RemoteWins
        } else {
            chan.ts6_merge(their_ts, their_modes)
        }
    };

    // Add members; statuses only when the remote side's TS prevailed.
    let folded = irc_to_lower(&name);
    for token in member_list.split_whitespace() {
        let status_end = token
            .find(|c: char| !matches!(c, '@' | '%' | '+'))
            .unwrap_or(token.len());
        let (prefixes, uid) = token.split_at(status_end);
        if uid.is_empty() {
            continue;
        }
        let status = if outcome == SjoinOutcome::LocalWins {
            MemberModes::default()
        } else {
            MemberModes::from_prefixes(prefixes)
        };

        let is_new = {
            let mut chan = channel.lock();
            let new = !chan.members.contains_key(uid);
            if new {
                chan.add_member(uid.to_string(), status);
            } else if outcome != SjoinOutcome::LocalWins {
                if let Some(member) = chan.members.get_mut(uid) {
                    member.op |= status.op;
                    member.halfop |= status.halfop;
                    member.voice |= status.voice;
                }
            }
            new
        };

        if let Some(mut remote) = rookery.remotes.get_mut(uid) {
            remote.channels.insert(folded.clone());
        }

        if is_new {
            if let Some(source) = rookery.user_source(uid) {
                let join = Message::new("JOIN", vec![name.clone()]).with_source(source);
                rookery.send_channel(&name, &join, Some(uid));
            }
        }
    }

    rookery.broadcast_servers(msg, Some(&peer.sid));
}

fn handle_tmode(rookery: &Arc<Rookery>, peer: &PeerContext, source_id: &str, msg: &Message) {
    // :<src> TMODE <ts> <channel> <modes> [params...]
    if msg.params.len() < 3 {
        return;
    }
    let their_ts: i64 = msg.params[0].parse().unwrap_or(i64::MAX);
    let name = msg.params[1].clone();
    let letters = msg.params[2].clone();
    let params: Vec<String> = msg.params[3..].to_vec();

    let Some(channel) = rookery.channel(&name) else {
        return;
    };
    {
        let mut chan = channel.lock();
        // Stale TS means the sender lost a merge it has not seen yet.
        if their_ts > chan.created_ts {
            return;
        }
        let mut adding = true;
        let mut args = params.iter();
        for letter in letters.chars() {
            match letter {
                '+' => adding = true,
                '-' => adding = false,
                'i' => chan.modes.invite_only = adding,
                'm' => chan.modes.moderated = adding,
                'n' => chan.modes.no_external = adding,
                'p' => chan.modes.private = adding,
                'r' => chan.modes.registered_only = adding,
                's' => chan.modes.secret = adding,
                't' => chan.modes.topic_lock = adding,
                'k' => {
                    chan.modes.key = if adding { args.next().cloned() } else { None };
                }
                'l' => {
                    chan.modes.limit = if adding {
                        args.next().and_then(|l| l.parse().ok())
                    } else {
                        None
                    };
                }
                'b' | 'e' | 'I' => {
                    let Some(mask) = args.next() else { continue };
                    let list = match letter {
                        'b' => &mut chan.bans,
                        'e' => &mut chan.excepts,
                        _ => &mut chan.invex,
                    };
                    if adding {
                        if !list.iter().any(|e| &e.mask == mask) {
                            list.push(crate::state::ListEntry {
                                mask: mask.clone(),
                                set_by: peer.name.clone(),
                                set_at: Utc::now().timestamp(),
                            });
                        }
                    } else {
                        list.retain(|e| &e.mask != mask);
                    }
                }
                'o' | 'h' | 'v' => {
                    let Some(target) = args.next() else { continue };
                    if let Some(member) = chan.members.get_mut(target) {
                        match letter {
                            'o' => member.op = adding,
                            'h' => member.halfop = adding,
                            _ => member.voice = adding,
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // Show local members a MODE from the actor (nicks, not uids).
    let source = rookery
        .user_source(source_id)
        .unwrap_or_else(|| Source::server(&peer.name));
    let mut display = vec![name.clone(), letters];
    display.extend(params.iter().map(|p| {
        rookery.user_nick(p).unwrap_or_else(|| p.clone())
    }));
    rookery.send_channel(&name, &Message::new("MODE", display).with_source(source), None);

    rookery.broadcast_servers(msg, Some(&peer.sid));
}

fn handle_tb(rookery: &Arc<Rookery>, peer: &PeerContext, msg: &Message) {
    // :<sid> TB <channel> <ts> <setter> :<topic>
    if msg.params.len() < 4 {
        return;
    }
    let name = msg.params[0].clone();
    let set_at: i64 = msg.params[1].parse().unwrap_or(0);
    let set_by = msg.params[2].clone();
    let text = msg.params[3].clone();

    let Some(channel) = rookery.channel(&name) else {
        return;
    };
    let apply = {
        let chan = channel.lock();
        // Topic burst only fills gaps or replaces with an older topic.
        chan.topic.as_ref().map(|t| set_at < t.set_at).unwrap_or(true)
    };
    if apply {
        channel.lock().topic = Some(crate::state::Topic {
            text: text.clone(),
            set_by: set_by.clone(),
            set_at,
        });
        let topic = Message::new("TOPIC", vec![name.clone(), text])
            .with_source(Source::server(&peer.name));
        rookery.send_channel(&name, &topic, None);
    }
    rookery.broadcast_servers(msg, Some(&peer.sid));
}

fn handle_topic(rookery: &Arc<Rookery>, peer: &PeerContext, source_id: &str, msg: &Message) {
    if msg.params.len() < 2 {
        return;
    }
    let (name, text) = (msg.params[0].clone(), msg.params[1].clone());
    let Some(channel) = rookery.channel(&name) else {
        return;
    };
    let setter = rookery.user_nick(source_id).unwrap_or_else(|| peer.name.clone());
    channel.lock().topic = Some(crate::state::Topic {
        text: text.clone(),
        set_by: setter,
        set_at: Utc::now().timestamp(),
    });
    let source = rookery
        .user_source(source_id)
        .unwrap_or_else(|| Source::server(&peer.name));
    rookery.send_channel(&name, &Message::new("TOPIC", vec![name.clone(), text]).with_source(source), None);
    rookery.broadcast_servers(msg, Some(&peer.sid));
}

fn handle_part(rookery: &Arc<Rookery>, peer: &PeerContext, source_uid: &str, msg: &Message) {
    let Some(name) = msg.param(0).map(str::to_string) else {
        return;
    };
    let reason = msg.param(1).unwrap_or("Leaving").to_string();

    if let Some(source) = rookery.user_source(source_uid) {
        let part = Message::new("PART", vec![name.clone(), reason]).with_source(source);
        rookery.send_channel(&name, &part, Some(source_uid));
    }
    if let Some(channel) = rookery.channel(&name) {
        let destroy = channel.lock().remove_member(source_uid);
        if destroy {
            rookery.destroy_channel(&name);
        }
    }
    if let Some(mut remote) = rookery.remotes.get_mut(source_uid) {
        remote.channels.remove(&irc_to_lower(&name));
    }
    rookery.broadcast_servers(msg, Some(&peer.sid));
}

fn handle_kick(rookery: &Arc<Rookery>, peer: &PeerContext, source_id: &str, msg: &Message) {
    if msg.params.len() < 2 {
        return;
    }
    let (name, target_uid) = (msg.params[0].clone(), msg.params[1].clone());
    let reason = msg.param(2).unwrap_or("Kicked").to_string();

    let kicker = rookery
        .user_source(source_id)
        .unwrap_or_else(|| Source::server(&peer.name));
    let target_nick = rookery.user_nick(&target_uid).unwrap_or_else(|| target_uid.clone());
    let kick = Message::new("KICK", vec![name.clone(), target_nick, reason])
        .with_source(kicker);
    rookery.send_channel(&name, &kick, None);

    if let Some(channel) = rookery.channel(&name) {
        let destroy = channel.lock().remove_member(&target_uid);
        if destroy {
            rookery.destroy_channel(&name);
        }
    }
    if let Some(session) = rookery.sessions.get(&target_uid) {
        session.value().write().channels.remove(&irc_to_lower(&name));
    } else if let Some(mut remote) = rookery.remotes.get_mut(&target_uid) {
        remote.channels.remove(&irc_to_lower(&name));
    }
    rookery.broadcast_servers(msg, Some(&peer.sid));
}

async fn handle_message(
    rookery: &Arc<Rookery>,
    peer: &PeerContext,
    source_id: &str,
    msg: &Message,
) {
    let (Some(target), Some(text)) = (msg.param(0), msg.param(1)) else {
        return;
    };
    let source = rookery
        .user_source(source_id)
        .unwrap_or_else(|| Source::server(&peer.name));

    if target.starts_with('#') {
        let wire = Message::new(msg.command.clone(), vec![target.to_string(), text.to_string()])
            .with_source(source);
        rookery.send_channel(target, &wire, Some(source_id));

        // Forward one copy per other link with members behind it.
        let link_sids: Vec<String> = rookery.links.iter().map(|e| e.key().clone()).collect();
        for sid in link_sids {
            if sid != peer.sid && rookery.channel_has_members_behind(target, &sid) {
                rookery.send_server(&sid, msg.clone());
            }
        }
        return;
    }

    // Direct message to a UID. Services intercept theirs; unknown UIDs
    // are dropped silently on S2S.
    if rookery
        .remotes
        .get(target)
        .is_some_and(|r| r.is_service)
    {
        if msg.command == "PRIVMSG" {
            let service_nick = rookery.user_nick(target).unwrap_or_default();
            crate::services::handle_service_message(rookery, source_id, &service_nick, text).await;
        }
        return;
    }

    if rookery.is_local_uid(target) {
        let target_nick = rookery.user_nick(target).unwrap_or_else(|| target.to_string());
        let wire = Message::new(msg.command.clone(), vec![target_nick, text.to_string()])
            .with_source(source);
        rookery.send(target, wire);
    } else if rookery.remotes.contains_key(target) {
        rookery.send_server(&target[..3], msg.clone());
    } else {
        debug!(target = %target, "S2S message to unknown UID dropped");
    }
}

fn handle_user_mode(rookery: &Arc<Rookery>, peer: &PeerContext, msg: &Message) {
    // :<uid> MODE <uid|nick> <modes>
    if msg.params.len() < 2 {
        return;
    }
    let target = &msg.params[0];
    let changes = &msg.params[1];
    if let Some(mut remote) = rookery.remotes.get_mut(target) {
        let mut adding = true;
        for c in changes.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                'i' => remote.modes.invisible = adding,
                'w' => remote.modes.wallops = adding,
                'o' => remote.modes.oper = adding,
                'B' => remote.modes.bot = adding,
                'Z' => remote.modes.secure = adding,
                _ => {}
            }
        }
    }
    rookery.broadcast_servers(msg, Some(&peer.sid));
}

async fn handle_encap(
    rookery: &Arc<Rookery>,
    peer: &PeerContext,
    source_id: &str,
    msg: &Message,
) {
    // :<src> ENCAP {*|<sid>} <subcmd> <args...>
    let (Some(target), Some(subcmd)) = (msg.param(0), msg.param(1)) else {
        return;
    };

    let for_us = target == "*" || target == rookery.info.sid;
    if for_us {
        let args: Vec<&str> = msg.params[2..].iter().map(String::as_str).collect();
        match subcmd.to_ascii_uppercase().as_str() {
            "KLINE" | "AKILL" => {
                if let Some(pattern) = args.first() {
                    let kind = if subcmd.eq_ignore_ascii_case("KLINE") {
                        BanKind::KLine
                    } else {
                        BanKind::GLine
                    };
                    let reason = args.get(1).unwrap_or(&"Banned").to_string();
                    info!(pattern = %pattern, kind = ?kind, via = %peer.name, "network ban received");
                    rookery.bans.write().push(ServerBan {
                        id: 0,
                        kind,
                        pattern: pattern.to_string(),
                        reason,
                        set_by: peer.name.clone(),
                        set_at: Utc::now(),
                        expires_at: None,
                    });
                }
            }
            "UNKLINE" | "UNAKILL" => {
                if let Some(pattern) = args.first() {
                    rookery
                        .bans
                        .write()
                        .retain(|b| &b.pattern != pattern);
                }
            }
            "LOGIN" => {
                if let Some(account) = args.first() {
                    if let Some(mut remote) = rookery.remotes.get_mut(source_id) {
                        remote.account = Some(account.to_string());
                    }
                }
            }
            "LOGOUT" => {
                if let Some(mut remote) = rookery.remotes.get_mut(source_id) {
                    remote.account = None;
                }
            }
            "CERTFP" | "SASL" => {
                // Informational; nothing to apply locally.
                debug!(subcmd = %subcmd, via = %peer.name, "ENCAP noted");
            }
            other => {
                debug!(subcmd = %other, via = %peer.name, "unknown ENCAP subcommand ignored");
            }
        }
    }

    if target == "*" {
        rookery.broadcast_servers(msg, Some(&peer.sid));
    } else if !for_us {
        rookery.send_server(target, msg.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::*;
    use crate::state::MemberModes;

    fn peer() -> PeerContext {
        PeerContext {
            sid: "002".into(),
            name: "b.example".into(),
        }
    }

    fn uid_line(nick: &str, ts: i64, uid: &str) -> Message {
        format!(":002 UID {nick} 1 {ts} {nick} host.example {uid} 0 +i host.example :Real Name")
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn uid_introduces_remote_user() {
        let rookery = rookery().await;
        dispatch(&rookery, &peer(), &uid_line("bob", 100, "002AAAABA"))
            .await
            .unwrap();
        let user = rookery.remotes.get("002AAAABA").expect("user registered");
        assert_eq!(user.nick, "bob");
        assert_eq!(user.introduced_ts, 100);
        assert_eq!(rookery.uid_by_nick("bob").as_deref(), Some("002AAAABA"));
    }

    #[tokio::test]
    async fn nick_collision_kills_younger() {
        let rookery = rookery().await;
        // Existing bob at ts 100.
        dispatch(&rookery, &peer(), &uid_line("bob", 100, "002AAAABA"))
            .await
            .unwrap();
        // Younger bob (ts 200) arrives: incoming dies, existing stays.
        dispatch(&rookery, &peer(), &uid_line("bob", 200, "003AAAABA"))
            .await
            .unwrap();
        assert!(rookery.remotes.get("003AAAABA").is_none());
        assert_eq!(rookery.uid_by_nick("bob").as_deref(), Some("002AAAABA"));
    }

    #[tokio::test]
    async fn nick_collision_kills_older_existing() {
        let rookery = rookery().await;
        dispatch(&rookery, &peer(), &uid_line("bob", 200, "002AAAABA"))
            .await
            .unwrap();
        // Older introduction (ts 100) wins over the existing ts-200 bob.
        dispatch(&rookery, &peer(), &uid_line("bob", 100, "003AAAABA"))
            .await
            .unwrap();
        assert!(rookery.remotes.get("002AAAABA").is_none());
        assert_eq!(rookery.uid_by_nick("bob").as_deref(), Some("003AAAABA"));
    }

    #[tokio::test]
    async fn sjoin_remote_wins_resets_local_state() {
        // Local #c at ts 500 (+nt, 001AAAAAA op); remote SJOIN at 400
        // with +m and @002AAAAAA.
        let rookery = rookery().await;
        let (chan, _) = rookery.channel_or_create("#c");
        {
            let mut guard = chan.lock();
            guard.created_ts = 500;
            guard.modes.no_external = true;
            guard.modes.topic_lock = true;
            guard.add_member("001AAAAAA".into(), MemberModes { op: true, ..Default::default() });
        }

        let sjoin: Message = ":002 SJOIN 400 #c +m :@002AAAAAA".parse().unwrap();
        dispatch(&rookery, &peer(), &sjoin).await.unwrap();

        let guard = chan.lock();
        assert_eq!(guard.created_ts, 400);
        assert!(guard.modes.moderated);
        assert!(!guard.modes.no_external && !guard.modes.topic_lock);
        assert_eq!(
            guard.member_modes("001AAAAAA"),
            Some(MemberModes::default()),
            "local op demoted"
        );
        assert!(guard.member_modes("002AAAAAA").unwrap().op, "remote op kept");
    }

    #[tokio::test]
    async fn sjoin_local_wins_strips_incoming_status() {
        let rookery = rookery().await;
        let (chan, _) = rookery.channel_or_create("#c");
        {
            let mut guard = chan.lock();
            guard.created_ts = 400;
            guard.modes.no_external = true;
        }

        let sjoin: Message = ":002 SJOIN 500 #c +m :@002AAAAAA".parse().unwrap();
        dispatch(&rookery, &peer(), &sjoin).await.unwrap();

        let guard = chan.lock();
        assert_eq!(guard.created_ts, 400);
        assert!(!guard.modes.moderated, "losing side's modes ignored");
        assert_eq!(
            guard.member_modes("002AAAAAA"),
            Some(MemberModes::default()),
            "member added without status"
        );
    }

    #[tokio::test]
    async fn unknown_uid_privmsg_dropped_silently() {
        let rookery = rookery().await;
        let msg: Message = ":002AAAABA PRIVMSG 001ZZZZZZ :hello".parse().unwrap();
        // No panic, no reply, nothing to assert beyond a clean return.
        dispatch(&rookery, &peer(), &msg).await.unwrap();
    }

    #[tokio::test]
    async fn squit_for_us_closes_link() {
        let rookery = rookery().await;
        let msg: Message = ":002 SQUIT irc.test.example :bye".parse().unwrap();
        assert!(dispatch(&rookery, &peer(), &msg).await.is_err());
    }

    #[tokio::test]
    async fn encap_kline_lands_in_ban_cache() {
        let rookery = rookery().await;
        let msg: Message = ":002 ENCAP * KLINE *@bad.example :spam".parse().unwrap();
        dispatch(&rookery, &peer(), &msg).await.unwrap();
        let bans = rookery.bans.read();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].pattern, "*@bad.example");

        drop(bans);
        let msg: Message = ":002 ENCAP * UNKLINE *@bad.example".parse().unwrap();
        dispatch(&rookery, &peer(), &msg).await.unwrap();
        assert!(rookery.bans.read().is_empty());
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let rookery = rookery().await;
        // No link registered: the PONG goes nowhere, but dispatch must
        // not fail.
        let msg: Message = ":002 PING :002".parse().unwrap();
        assert!(dispatch(&rookery, &peer(), &msg).await.unwrap());
    }
}
