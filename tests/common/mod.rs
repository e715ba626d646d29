//! Integration test infrastructure: an in-process server instance plus a
//! line-oriented test client.

#![allow(dead_code)]

use munind::config::Config;
use munind::db::Database;
use munind::network::Gateway;
use munind::state::Rookery;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// An in-process munind instance bound to an ephemeral port.
pub struct TestServer {
    pub rookery: Arc<Rookery>,
    pub addr: String,
}

impl TestServer {
    /// Spawn a server with test-friendly limits (generous command rate,
    /// tiny message refill so flood tests are deterministic).
    pub async fn spawn() -> anyhow::Result<TestServer> {
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0")?;
            probe.local_addr()?.port()
        };

        let config_toml = format!(
            r#"
            [server]
            name = "test.irc.example"
            sid = "001"
            description = "Test server"
            network = "TestNet"
            metrics_port = 0

            [[listen]]
            addr = "127.0.0.1:{port}"

            [database]
            path = ":memory:"

            [limits]
            registration_timeout_secs = 10

            [security.rate_limit]
            connection_rate = 1000.0
            connection_burst = 1000
            command_rate = 1000.0
            command_burst = 2000
            message_rate = 0.001
            message_burst = 10

            [motd]
            lines = ["Test Server"]
            "#
        );
        let config: Config = toml::from_str(&config_toml)?;

        let db = Database::open_in_memory().await?;
        let (rookery, mut disconnect_rx) = Rookery::new(config, "test-config.toml".into(), db);
        let rookery = Arc::new(rookery);
        munind::services::register_services(&rookery);

        {
            let rookery = Arc::clone(&rookery);
            tokio::spawn(async move {
                while let Some((uid, reason)) = disconnect_rx.recv().await {
                    rookery.kill_connection(&uid, &reason);
                }
            });
        }

        let registry = Arc::new(munind::handlers::registry_with_defaults());
        let gateway = Gateway::bind(Arc::clone(&rookery), registry).await?;
        tokio::spawn(gateway.run());

        let addr = format!("127.0.0.1:{port}");
        for _ in 0..30 {
            if TcpStream::connect(&addr).await.is_ok() {
                return Ok(TestServer { rookery, addr });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server failed to start listening")
    }

    pub async fn connect(&self) -> anyhow::Result<TestClient> {
        TestClient::connect(&self.addr).await
    }
}

/// A raw IRC line client.
pub struct TestClient {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: &str) -> anyhow::Result<TestClient> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(TestClient {
            reader: BufReader::new(read_half).lines(),
            writer: write_half,
        })
    }

    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        Ok(())
    }

    /// Next line, bounded by a timeout.
    pub async fn recv(&mut self) -> anyhow::Result<String> {
        match timeout(Duration::from_secs(5), self.reader.next_line()).await {
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => anyhow::bail!("connection closed"),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => anyhow::bail!("timed out waiting for a line"),
        }
    }

    /// Read lines until one satisfies the predicate, returning it.
    pub async fn expect<F: Fn(&str) -> bool>(&mut self, what: &str, pred: F) -> anyhow::Result<String> {
        for _ in 0..200 {
            let line = self.recv().await?;
            if pred(&line) {
                return Ok(line);
            }
        }
        anyhow::bail!("never saw expected line: {what}")
    }

    /// Assert that nothing matching the predicate arrives within a short
    /// window.
    pub async fn expect_silence<F: Fn(&str) -> bool>(&mut self, pred: F) -> anyhow::Result<()> {
        let window = tokio::time::sleep(Duration::from_millis(300));
        tokio::pin!(window);
        loop {
            tokio::select! {
                line = self.reader.next_line() => {
                    if let Ok(Some(line)) = line {
                        if pred(&line) {
                            anyhow::bail!("unexpected line arrived: {line}");
                        }
                        continue;
                    }
                    return Ok(());
                }
                _ = &mut window => return Ok(()),
            }
        }
    }

    /// Full registration handshake: CAP LS/END, NICK/USER, drained
    /// through the end of the MOTD.
    pub async fn register(&mut self, nick: &str) -> anyhow::Result<()> {
        self.register_with_caps(nick, &[]).await
    }

    /// Registration negotiating the given capabilities.
    pub async fn register_with_caps(&mut self, nick: &str, caps: &[&str]) -> anyhow::Result<()> {
        self.send("CAP LS 302").await?;
        self.send(&format!("NICK {nick}")).await?;
        self.send(&format!("USER {nick} 0 * :{nick} test")).await?;
        if !caps.is_empty() {
            self.send(&format!("CAP REQ :{}", caps.join(" "))).await?;
            self.expect("CAP ACK", |l| l.contains("CAP") && l.contains("ACK"))
                .await?;
        }
        self.send("CAP END").await?;
        self.expect("001", |l| l.contains(" 001 ")).await?;
        self.expect("end of MOTD", |l| l.contains(" 376 ") || l.contains(" 422 "))
            .await?;
        Ok(())
    }
}
