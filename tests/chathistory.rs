//! CHATHISTORY selectors over a live connection.

mod common;

use common::TestServer;
use munind::db::StoredMessage;

async fn seed(server: &TestServer) -> anyhow::Result<()> {
    for (i, ts) in [100i64, 110, 120, 130, 140, 150].iter().enumerate() {
        server
            .rookery
            .db
            .history()
            .append(&StoredMessage {
                msg_id: format!("m{}", i + 1),
                target: "#h".to_string(),
                sender_uid: "001AAAABA".to_string(),
                sender_account: None,
                text: format!("message {}", i + 1),
                tags: None,
                ts: *ts,
            })
            .await?;
    }
    Ok(())
}

#[tokio::test]
async fn around_returns_a_batch_with_the_window() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    seed(&server).await?;

    let mut client = server.connect().await?;
    client
        .register_with_caps("alice", &["batch", "draft/chathistory", "message-tags", "server-time"])
        .await?;

    client.send("CHATHISTORY AROUND #h msgid=m4 4").await?;

    let open = client
        .expect("batch open", |l| l.contains("BATCH +") && l.contains("chathistory"))
        .await?;
    assert!(open.contains("#h"), "{open}");

    // m3, m4, m5, m6 ascending: two at-or-before the anchor, two after.
    for msgid in ["m3", "m4", "m5", "m6"] {
        let line = client
            .expect("history line", |l| l.contains("PRIVMSG #h"))
            .await?;
        assert!(
            line.contains(&format!("msgid={msgid}")),
            "expected {msgid} in order, got: {line}"
        );
        assert!(line.contains("batch="), "{line}");
    }

    client.expect("batch close", |l| l.contains("BATCH -")).await?;
    Ok(())
}

#[tokio::test]
async fn latest_and_missing_target() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    seed(&server).await?;

    let mut client = server.connect().await?;
    client
        .register_with_caps("bob", &["batch", "draft/chathistory", "message-tags"])
        .await?;

    client.send("CHATHISTORY LATEST #h * 2").await?;
    client.expect("batch open", |l| l.contains("BATCH +")).await?;
    let first = client
        .expect("m5", |l| l.contains("PRIVMSG #h"))
        .await?;
    assert!(first.contains("msgid=m5"), "{first}");
    let second = client
        .expect("m6", |l| l.contains("PRIVMSG #h"))
        .await?;
    assert!(second.contains("msgid=m6"), "{second}");
    client.expect("batch close", |l| l.contains("BATCH -")).await?;

    // Unknown targets produce an empty batch, not an error.
    client.send("CHATHISTORY LATEST #nowhere * 5").await?;
    let open = client.expect("batch open", |l| l.contains("BATCH +")).await?;
    let close = client.expect("batch close", |l| l.contains("BATCH -")).await?;
    assert!(!open.is_empty() && !close.is_empty());
    Ok(())
}
