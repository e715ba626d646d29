//! Message-flood behavior: burst passes, overflow drains to 263 without a
//! disconnect.

mod common;

use common::TestServer;

#[tokio::test]
async fn flood_of_fifteen_delivers_burst_only() -> anyhow::Result<()> {
    // Harness config: message_burst = 10 with a negligible refill rate.
    let server = TestServer::spawn().await?;
    let mut sender = server.connect().await?;
    let mut observer = server.connect().await?;
    sender.register("flooder").await?;
    observer.register("observer").await?;

    sender.send("JOIN #f").await?;
    sender.expect("366", |l| l.contains(" 366 ")).await?;
    observer.send("JOIN #f").await?;
    observer.expect("366", |l| l.contains(" 366 ")).await?;
    sender
        .expect("observer join", |l| l.contains("JOIN") && l.contains("observer"))
        .await?;

    for i in 0..15 {
        sender.send(&format!("PRIVMSG #f :flood {i}")).await?;
    }

    // Exactly the burst size arrives at the observer.
    for i in 0..10 {
        observer
            .expect("flood line", |l| l.contains(&format!(":flood {i}")))
            .await?;
    }
    observer
        .expect_silence(|l| (10..15).any(|i| l.contains(&format!(":flood {i}"))))
        .await?;

    // The overflow earned 263s, not a disconnect.
    sender.expect("263", |l| l.contains(" 263 ")).await?;
    sender.send("PING :still-alive").await?;
    sender
        .expect("still connected", |l| l.contains("PONG") && l.contains("still-alive"))
        .await?;
    Ok(())
}
