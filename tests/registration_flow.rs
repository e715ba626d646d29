//! Registration, JOIN, and PRIVMSG end-to-end.

mod common;

use common::TestServer;

#[tokio::test]
async fn welcome_burst_has_numerics_in_order() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    let mut client = server.connect().await?;

    client.send("CAP LS 302").await?;
    client.send("NICK alice").await?;
    client.send("USER alice 0 * :Alice").await?;
    client.send("CAP END").await?;

    // CAP LS reply advertises the capability set.
    let ls = client.expect("CAP LS", |l| l.contains("CAP") && l.contains("LS")).await?;
    assert!(ls.contains("sasl"));
    assert!(ls.contains("server-time"));
    assert!(ls.contains("draft/chathistory"));

    for numeric in ["001", "002", "003", "004", "005"] {
        let line = client
            .expect(numeric, |l| l.contains(&format!(" {numeric} ")))
            .await?;
        assert!(line.contains("alice"), "{line}");
    }
    client.expect("375", |l| l.contains(" 375 ")).await?;
    client.expect("372", |l| l.contains(" 372 ")).await?;
    client.expect("376", |l| l.contains(" 376 ")).await?;
    Ok(())
}

#[tokio::test]
async fn commands_require_registration() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    let mut client = server.connect().await?;

    client.send("JOIN #t").await?;
    let line = client.expect("451", |l| l.contains(" 451 ")).await?;
    assert!(line.contains("not registered"), "{line}");

    // PING works before registration.
    client.send("PING :token").await?;
    client
        .expect("PONG", |l| l.contains("PONG") && l.contains("token"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn join_echo_names_and_privmsg_delivery() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    let mut alice = server.connect().await?;
    let mut bob = server.connect().await?;
    alice.register("alice").await?;
    bob.register("bob").await?;

    alice.send("JOIN #t").await?;
    alice
        .expect("JOIN echo", |l| l.contains("JOIN") && l.contains("#t") && l.contains("alice"))
        .await?;
    let names = alice.expect("353", |l| l.contains(" 353 ")).await?;
    assert!(names.contains("@alice"), "creator is opped: {names}");
    alice.expect("366", |l| l.contains(" 366 ")).await?;

    bob.send("JOIN #t").await?;
    bob.expect("JOIN echo", |l| l.contains("JOIN") && l.contains("bob"))
        .await?;
    alice
        .expect("bob's join", |l| l.contains("JOIN") && l.contains("bob"))
        .await?;

    // Without echo-message the sender does not see their own message.
    alice.send("PRIVMSG #t :hi there").await?;
    let delivered = bob
        .expect("privmsg", |l| l.contains("PRIVMSG #t :hi there"))
        .await?;
    assert!(delivered.contains("alice!alice@"), "{delivered}");
    alice
        .expect_silence(|l| l.contains("PRIVMSG #t :hi there"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn echo_message_cap_reflects_messages() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    let mut alice = server.connect().await?;
    let mut bob = server.connect().await?;
    alice.register_with_caps("alice", &["echo-message"]).await?;
    bob.register("bob").await?;

    alice.send("JOIN #t").await?;
    alice.expect("366", |l| l.contains(" 366 ")).await?;
    bob.send("JOIN #t").await?;
    bob.expect("366", |l| l.contains(" 366 ")).await?;

    alice.send("PRIVMSG #t :echoed").await?;
    alice
        .expect("echo", |l| l.contains("PRIVMSG #t :echoed"))
        .await?;
    bob.expect("delivery", |l| l.contains("PRIVMSG #t :echoed"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn nickname_conflicts_rejected() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    let mut alice = server.connect().await?;
    alice.register("alice").await?;

    let mut imposter = server.connect().await?;
    imposter.send("NICK alice").await?;
    imposter.expect("433", |l| l.contains(" 433 ")).await?;

    // Casemapped variant is the same nick.
    imposter.send("NICK ALICE").await?;
    imposter.expect("433", |l| l.contains(" 433 ")).await?;

    imposter.send("NICK al[ce").await?;
    imposter.send("USER al 0 * :Al").await?;
    imposter.expect("001", |l| l.contains(" 001 ")).await?;
    Ok(())
}

#[tokio::test]
async fn quit_broadcasts_to_shared_channels() -> anyhow::Result<()> {
    let server = TestServer::spawn().await?;
    let mut alice = server.connect().await?;
    let mut bob = server.connect().await?;
    alice.register("alice").await?;
    bob.register("bob").await?;

    alice.send("JOIN #t").await?;
    alice.expect("366", |l| l.contains(" 366 ")).await?;
    bob.send("JOIN #t").await?;
    bob.expect("366", |l| l.contains(" 366 ")).await?;
    alice
        .expect("bob join", |l| l.contains("JOIN") && l.contains("bob"))
        .await?;

    bob.send("QUIT :gone fishing").await?;
    let quit = alice
        .expect("quit", |l| l.contains("QUIT") && l.contains("bob"))
        .await?;
    assert!(quit.contains("gone fishing"), "{quit}");
    Ok(())
}
