//! NickServ / MemoServ over a live connection.

mod common;

use common::TestServer;

#[tokio::test]
async fn nickserv_register_and_identify() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    let mut alice = server.connect().await?;
    alice.register("alice").await?;

    alice
        .send("PRIVMSG NickServ :REGISTER sup3rs3cret alice@example.org")
        .await?;
    let reply = alice
        .expect("registration notice", |l| {
            l.contains("NOTICE") && l.contains("registered")
        })
        .await?;
    assert!(reply.starts_with(":NickServ!services@"), "{reply}");

    // A fresh connection identifies with the NS alias.
    drop(alice);
    let mut returning = server.connect().await?;
    returning.register("alice2").await?;
    returning.send("NS IDENTIFY alice sup3rs3cret").await?;
    returning
        .expect("identified", |l| l.contains("NOTICE") && l.contains("identified as alice"))
        .await?;

    returning.send("NS IDENTIFY alice wrongpass").await?;
    returning
        .expect("rejected", |l| l.contains("NOTICE") && l.contains("Invalid credentials"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn weak_password_rejected() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    let mut client = server.connect().await?;
    client.register("carol").await?;

    client.send("PRIVMSG NickServ :REGISTER short").await?;
    client
        .expect("too short", |l| l.contains("at least 8 characters"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn memoserv_requires_identification_then_works() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    let mut alice = server.connect().await?;
    alice.register("alice").await?;

    // Unidentified senders are turned away.
    alice.send("MS SEND bob :hello").await?;
    alice
        .expect("must identify", |l| l.contains("identified to your account"))
        .await?;

    alice.send("NS REGISTER sup3rs3cret").await?;
    alice
        .expect("registered", |l| l.contains("registered"))
        .await?;

    let mut bob = server.connect().await?;
    bob.register("bob").await?;
    bob.send("NS REGISTER an0ther-s3cret").await?;
    bob.expect("registered", |l| l.contains("registered")).await?;

    alice.send("MS SEND bob greetings from alice").await?;
    alice
        .expect("sent", |l| l.contains("Memo sent to bob"))
        .await?;
    // Online identified recipients get a nudge.
    bob.expect("nudge", |l| l.contains("new memo from alice"))
        .await?;

    bob.send("MS LIST").await?;
    bob.expect("listing", |l| l.contains("1 memo"))
        .await?;
    bob.send("MS READ 1").await?;
    bob.expect("memo body", |l| l.contains("greetings from alice"))
        .await?;
    Ok(())
}
