//! In-process SSH server that answers shell sessions for the terminal tests.
//!
//! Accepts password `hunter2` for any user, echoes input back, and ends the
//! shell with exit status 0 when it receives `exit\r`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use tokio::net::TcpListener;

pub const PASSWORD: &str = "hunter2";

/// Written as soon as the shell starts.
pub const BANNER: &str = "welcome\r\n";

/// Written before the shell exits.
pub const FAREWELL: &str = "bye\r\n";

/// What the shell saw from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Pty {
        term: String,
        cols: u32,
        rows: u32,
        pix_width: u32,
        pix_height: u32,
    },
    WindowChange {
        cols: u32,
        rows: u32,
        pix_width: u32,
        pix_height: u32,
    },
    Input(Vec<u8>),
}

/// A listening server and the events of every session it has served.
pub struct SshServer {
    pub port: u16,
    events: Arc<Mutex<Vec<ShellEvent>>>,
}

impl SshServer {
    pub async fn start() -> Self {
        let config = Arc::new(server::Config {
            keys: vec![russh_keys::key::KeyPair::generate_ed25519().expect("host key")],
            auth_rejection_time: Duration::from_millis(10),
            ..Default::default()
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ssh");
        let port = listener.local_addr().expect("ssh addr").port();
        let events = Arc::new(Mutex::new(Vec::new()));

        let shared = events.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = ShellHandler {
                    events: shared.clone(),
                };
                let config = config.clone();
                tokio::spawn(async move {
                    if let Ok(running) = server::run_stream(config, stream, handler).await {
                        let _ = running.await;
                    }
                });
            }
        });

        Self { port, events }
    }

    pub fn events(&self) -> Vec<ShellEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until an event matching `pred` has been recorded.
    pub async fn saw(&self, pred: impl Fn(&ShellEvent) -> bool) -> bool {
        for _ in 0..100 {
            if self.events().iter().any(&pred) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

struct ShellHandler {
    events: Arc<Mutex<Vec<ShellEvent>>>,
}

impl ShellHandler {
    fn record(&self, event: ShellEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl server::Handler for ShellHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, _user: &str, password: &str) -> Result<Auth, Self::Error> {
        if password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        _channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _modes: &[(Pty, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.record(ShellEvent::Pty {
            term: term.to_string(),
            cols: col_width,
            rows: row_height,
            pix_width,
            pix_height,
        });
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.data(channel, CryptoVec::from_slice(BANNER.as_bytes()));
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.record(ShellEvent::WindowChange {
            cols: col_width,
            rows: row_height,
            pix_width,
            pix_height,
        });
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.record(ShellEvent::Input(data.to_vec()));
        if data == b"exit\r" {
            session.data(channel, CryptoVec::from_slice(FAREWELL.as_bytes()));
            session.exit_status_request(channel, 0);
            session.eof(channel);
            session.close(channel);
        } else {
            session.data(channel, CryptoVec::from_slice(data));
        }
        Ok(())
    }
}
