//! Newline-delimited JSON feed over TCP.
//!
//! Protocol: the client sends `AUTH <token>\n` and expects a single `OK`
//! line back; after that every line is one JSON payload (tweet-shaped data,
//! `{"warning": ..}` or `{"disconnect": ..}`). Blank lines are keep-alives.

use std::env;

use async_trait::async_trait;
use floodwatch_core::{
    errors::Error,
    ports::{FeedConnection, FeedEvent, FeedTransport},
    Result,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedSettings {
    pub addr: String,
    pub token: String,
}

impl FeedSettings {
    /// Read `FLOODWATCH_FEED_ADDR` and `FLOODWATCH_FEED_TOKEN`.
    ///
    /// Call after `Config::load()` so `.env` values are visible.
    pub fn from_env() -> Result<Self> {
        let addr = env::var("FLOODWATCH_FEED_ADDR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("FLOODWATCH_FEED_ADDR is required".to_string()))?;
        let token = env::var("FLOODWATCH_FEED_TOKEN")
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(Self { addr, token })
    }
}

#[derive(Clone, Debug)]
pub struct TcpLineTransport {
    settings: FeedSettings,
}

impl TcpLineTransport {
    pub fn new(settings: FeedSettings) -> Self {
        Self { settings }
    }

    async fn open(&self) -> Result<(Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf)> {
        let stream = TcpStream::connect(&self.settings.addr)
            .await
            .map_err(|e| Error::Transport(format!("connect {}: {e}", self.settings.addr)))?;
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(format!("AUTH {}\n", self.settings.token).as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("auth write failed: {e}")))?;

        let ack = lines
            .next_line()
            .await
            .map_err(|e| Error::Transport(format!("auth read failed: {e}")))?
            .unwrap_or_default();
        if ack.trim() != "OK" {
            return Err(Error::Credentials(format!(
                "feed rejected token: {}",
                ack.trim()
            )));
        }

        Ok((lines, write))
    }
}

#[async_trait]
impl FeedTransport for TcpLineTransport {
    async fn verify_credentials(&self) -> Result<()> {
        if self.settings.token.is_empty() {
            return Err(Error::Credentials(
                "FLOODWATCH_FEED_TOKEN is not set".to_string(),
            ));
        }
        let (_lines, mut write) = self.open().await?;
        if let Err(e) = write.shutdown().await {
            debug!(addr = %self.settings.addr, error = %e, "closing verification socket failed");
        }
        debug!(addr = %self.settings.addr, "feed token accepted");
        Ok(())
    }

    async fn connect(&self) -> Result<FeedConnection> {
        let (lines, write) = self.open().await?;
        info!(addr = %self.settings.addr, "feed stream open");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        tokio::spawn(read_loop(lines, write, tx, cancel.clone()));

        Ok(FeedConnection { events: rx, cancel })
    }
}

async fn read_loop(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    // Held so the peer does not see a half-closed socket.
    _write: OwnedWriteHalf,
    tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,
            next = lines.next_line() => next,
        };

        let event = match next {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match FeedEvent::from_line(line) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable feed line");
                        continue;
                    }
                }
            }
            Ok(None) => FeedEvent::End,
            Err(e) => FeedEvent::Error {
                error: e.to_string(),
                code: Some(format!("{:?}", e.kind())),
            },
        };

        let terminal = matches!(event, FeedEvent::End | FeedEvent::Error { .. });
        if tx.send(event).await.is_err() || terminal {
            break;
        }
    }
    debug!("feed reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// One-connection feed server: checks the token, then writes `lines`.
    async fn serve(token: &'static str, lines: Vec<String>, close: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read).lines();
            let auth = reader.next_line().await.unwrap().unwrap_or_default();
            if auth != format!("AUTH {token}") {
                write.write_all(b"DENIED\n").await.unwrap();
                return;
            }
            write.write_all(b"OK\n").await.unwrap();
            for line in lines {
                write.write_all(line.as_bytes()).await.unwrap();
                write.write_all(b"\n").await.unwrap();
            }
            if !close {
                // Keep the socket open until the client goes away.
                let _ = reader.next_line().await;
            }
        });
        addr
    }

    fn transport(addr: String, token: &str) -> TcpLineTransport {
        TcpLineTransport::new(FeedSettings {
            addr,
            token: token.to_string(),
        })
    }

    #[tokio::test]
    async fn verify_accepts_valid_token() {
        let addr = serve("s3cret", Vec::new(), true).await;
        transport(addr, "s3cret").verify_credentials().await.unwrap();
    }

    #[tokio::test]
    async fn verify_rejects_wrong_token() {
        let addr = serve("s3cret", Vec::new(), true).await;
        let err = transport(addr, "guess")
            .verify_credentials()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Credentials(_)));
    }

    #[tokio::test]
    async fn verify_requires_a_token() {
        let err = transport("127.0.0.1:1".to_string(), "")
            .verify_credentials()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Credentials(_)));
    }

    #[tokio::test]
    async fn stream_decodes_lines_and_skips_garbage() {
        let tweet = json!({
            "id_str": "7",
            "text": "banjir @petajkt",
            "user": {"screen_name": "budi"}
        });
        let warning = json!({"warning": {"code": "FALLING_BEHIND", "message": "slow"}});
        let addr = serve(
            "s3cret",
            vec![
                tweet.to_string(),
                String::new(),
                "{not json".to_string(),
                json!({"text": "no user"}).to_string(),
                warning.to_string(),
            ],
            true,
        )
        .await;

        let mut conn = transport(addr, "s3cret").connect().await.unwrap();

        match conn.events.recv().await {
            Some(FeedEvent::Data(m)) => {
                assert_eq!(m.id, "7");
                assert_eq!(m.author.as_str(), "budi");
            }
            other => panic!("expected data, got {other:?}"),
        }
        assert!(matches!(
            conn.events.recv().await,
            Some(FeedEvent::Warning { code, .. }) if code == "FALLING_BEHIND"
        ));
        assert!(matches!(conn.events.recv().await, Some(FeedEvent::End)));
        assert!(conn.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_stops_the_reader() {
        let addr = serve("s3cret", Vec::new(), false).await;
        let mut conn = transport(addr, "s3cret").connect().await.unwrap();

        conn.cancel.cancel();
        assert!(conn.events.recv().await.is_none());
    }

    #[test]
    fn settings_require_an_address() {
        env::remove_var("FLOODWATCH_FEED_ADDR");
        assert!(matches!(FeedSettings::from_env(), Err(Error::Config(_))));
    }
}
