//! IMAP Server
//!
//! Accepts connections, speaks the line-oriented (plus literal) IMAP wire
//! protocol, and drives a `ConnectionState` per socket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use mairust_common::config::ImapConfig;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::command::{ImapCommand, TaggedCommand};
use super::connection::ConnectionState;
use super::credentials::CredentialVerifier;
use super::mailbox::MailboxRegistry;
use super::message::MessageSource;
use super::parser::ImapParser;
use super::response::ImapResponse;

/// IMAP server: owns the mailbox registry and the collaborators every
/// connection needs, and accepts sockets against them.
pub struct ImapServer {
    config: ImapConfig,
    registry: Arc<MailboxRegistry>,
    credentials: Arc<dyn CredentialVerifier>,
    source: Arc<dyn MessageSource>,
}

impl ImapServer {
    pub fn new(
        config: ImapConfig,
        registry: Arc<MailboxRegistry>,
        credentials: Arc<dyn CredentialVerifier>,
        source: Arc<dyn MessageSource>,
    ) -> Self {
        Self {
            config,
            registry,
            credentials,
            source,
        }
    }

    /// Start the IMAP server
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        info!("IMAP server listening on {}", self.config.bind);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let registry = self.registry.clone();
                    let credentials = self.credentials.clone();
                    let source = self.source.clone();
                    let timeout_minutes = self.config.timeout_minutes;

                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_connection(stream, addr, registry, credentials, source, timeout_minutes).await
                        {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    /// Handle a single IMAP connection
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<MailboxRegistry>,
        credentials: Arc<dyn CredentialVerifier>,
        source: Arc<dyn MessageSource>,
        timeout_minutes: i64,
    ) -> Result<()> {
        info!("New IMAP connection from {}", addr);

        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let writer = Arc::new(Mutex::new(writer));
        let mut conn = ConnectionState::new(registry, credentials, source);
        let read_timeout = std::time::Duration::from_secs((timeout_minutes * 60).max(1) as u64);

        {
            let mut w = writer.lock().await;
            w.write_all(ConnectionState::greeting().as_bytes()).await?;
            w.flush().await?;
        }

        let mut line = String::new();

        loop {
            line.clear();

            let read_result = tokio::time::timeout(read_timeout, reader.read_line(&mut line)).await;

            let command = match read_result {
                Ok(Ok(0)) => {
                    info!("Connection closed by client {}", addr);
                    break;
                }
                Ok(Ok(_)) => {
                    debug!("Received from {}: {}", addr, line.trim());
                    match Self::read_command(&line, &mut reader, &writer).await {
                        Ok(Some(cmd)) => cmd,
                        Ok(None) => {
                            let mut w = writer.lock().await;
                            w.write_all(b"* BAD Invalid command\r\n").await?;
                            w.flush().await?;
                            continue;
                        }
                        Err(e) => {
                            error!("Error reading command from {}: {}", addr, e);
                            break;
                        }
                    }
                }
                Ok(Err(e)) => {
                    error!("Read error from {}: {}", addr, e);
                    break;
                }
                Err(_) => {
                    warn!("Connection timeout for {}", addr);
                    let mut w = writer.lock().await;
                    w.write_all(ImapResponse::bye("Connection timeout").as_bytes()).await?;
                    w.flush().await?;
                    break;
                }
            };

            let is_idle = matches!(command.command, ImapCommand::Idle);
            let idle_tag = command.tag.clone();
            let outcome = conn.dispatch(command);

            {
                let mut w = writer.lock().await;
                for l in &outcome.lines {
                    w.write_all(l.as_bytes()).await?;
                }
                w.flush().await?;
            }

            if outcome.close {
                break;
            }

            if is_idle {
                if Self::run_idle(&mut reader, &writer, &mut conn, &idle_tag, read_timeout).await? {
                    break;
                }
            }
        }

        info!("IMAP connection closed for {}", addr);
        Ok(())
    }

    /// Read one client input, resolving an APPEND literal body if the line
    /// declares one. Returns `None` for a line that doesn't parse.
    async fn read_command(
        first_line: &str,
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: &Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    ) -> Result<Option<TaggedCommand>> {
        if let Some(header) = ImapParser::try_append_header(first_line) {
            if header.synchronizing {
                let mut w = writer.lock().await;
                w.write_all(ImapResponse::continue_req().as_bytes()).await?;
                w.flush().await?;
            }

            let mut body = vec![0u8; header.literal_size];
            reader.read_exact(&mut body).await?;

            // Consume the trailing CRLF (and any text after the literal on
            // the same line, which this server doesn't otherwise support).
            let mut trailer = String::new();
            reader.read_line(&mut trailer).await?;

            return Ok(Some(TaggedCommand {
                tag: header.tag,
                command: ImapCommand::Append {
                    mailbox: header.mailbox,
                    flags: header.flags,
                    date: header.date,
                    message: body,
                },
            }));
        }

        Ok(ImapParser::parse(first_line))
    }

    /// Block until `DONE` arrives, pushing untagged updates as the selected
    /// mailbox changes in the meantime. Returns `true` if the connection
    /// should close (read error or timeout).
    async fn run_idle(
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: &Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
        conn: &mut ConnectionState,
        tag: &str,
        read_timeout: std::time::Duration,
    ) -> Result<bool> {
        let mailbox = conn.selected_mailbox_state();
        let mut line = String::new();

        loop {
            line.clear();

            let notified = async {
                match &mailbox {
                    Some(m) => m.notify_handle().notified().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                result = tokio::time::timeout(read_timeout, reader.read_line(&mut line)) => {
                    match result {
                        Ok(Ok(0)) => return Ok(true),
                        Ok(Ok(_)) => {
                            if line.trim().eq_ignore_ascii_case("DONE") {
                                let mut w = writer.lock().await;
                                w.write_all(ImapResponse::ok(tag, "IDLE terminated").as_bytes()).await?;
                                w.flush().await?;
                                return Ok(false);
                            }
                        }
                        Ok(Err(_)) | Err(_) => return Ok(true),
                    }
                }
                _ = notified => {
                    let updates = conn.poll_pending();
                    if !updates.is_empty() {
                        let mut w = writer.lock().await;
                        for l in &updates {
                            w.write_all(l.as_bytes()).await?;
                        }
                        w.flush().await?;
                    }
                }
            }
        }
    }
}
