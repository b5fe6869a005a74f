//! SMTP ingress boundary adapter.
//!
//! A deliberately small ESMTP listener: enough protocol to accept a
//! transaction, hand its bytes to the annotation joiner, and answer
//! accept/reject. Authentication is optional (accept-all); TLS-on-accept
//! is available when certificate material is configured.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::annotate::Annotator;
use crate::error::{ConfigError, Result};
use crate::route::DeliveryRouter;

const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
const MAX_COMMAND_BYTES: usize = 1024;

/// The SMTP ingress collaborator: one session task per connection, one
/// annotation joiner per transaction.
pub struct SmtpServer {
    domain: String,
    annotator: Arc<Annotator>,
    router: Arc<DeliveryRouter>,
    tls: Option<TlsAcceptor>,
}

impl SmtpServer {
    pub fn new(
        domain: String,
        annotator: Arc<Annotator>,
        router: Arc<DeliveryRouter>,
        tls: Option<TlsAcceptor>,
    ) -> Self {
        Self {
            domain,
            annotator,
            router,
            tls,
        }
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "mail server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                debug!(%peer, "smtp connection accepted");
                if let Err(e) = server.handle(stream).await {
                    debug!(%peer, error = %e, "smtp session ended with error");
                }
            });
        }
    }

    async fn handle(&self, stream: TcpStream) -> io::Result<()> {
        match &self.tls {
            Some(acceptor) => {
                let tls = acceptor.accept(stream).await?;
                self.session(BufStream::new(tls)).await
            }
            None => self.session(BufStream::new(stream)).await,
        }
    }

    async fn session<S>(&self, mut stream: BufStream<S>) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        reply(&mut stream, &format!("220 {} ESMTP mailcast", self.domain)).await?;

        let mut sender_seen = false;
        let mut rcpt_count = 0usize;

        loop {
            let line = match read_bounded_line(&mut stream, MAX_COMMAND_BYTES).await? {
                LineRead::Eof => return Ok(()),
                LineRead::TooLong => {
                    reply(&mut stream, "500 line too long").await?;
                    continue;
                }
                LineRead::Line(line) => line,
            };
            let command = line.trim_end();
            let upper = command.to_ascii_uppercase();

            if upper.starts_with("EHLO") {
                stream
                    .write_all(format!("250-{} greets you\r\n", self.domain).as_bytes())
                    .await?;
                reply(&mut stream, "250 SMTPUTF8").await?;
            } else if upper.starts_with("HELO") {
                reply(&mut stream, &format!("250 {}", self.domain)).await?;
            } else if upper.starts_with("AUTH") {
                // Authentication is optional on this listener.
                reply(&mut stream, "235 2.7.0 accepted").await?;
            } else if upper.starts_with("MAIL FROM") {
                sender_seen = true;
                rcpt_count = 0;
                reply(&mut stream, "250 OK").await?;
            } else if upper.starts_with("RCPT TO") {
                if sender_seen {
                    rcpt_count += 1;
                    reply(&mut stream, "250 OK").await?;
                } else {
                    reply(&mut stream, "503 need MAIL before RCPT").await?;
                }
            } else if upper == "DATA" {
                if rcpt_count == 0 {
                    reply(&mut stream, "503 need RCPT before DATA").await?;
                    continue;
                }
                reply(&mut stream, "354 End data with <CR><LF>.<CR><LF>").await?;
                match read_data(&mut stream, MAX_MESSAGE_BYTES).await? {
                    DataRead::Eof => return Ok(()),
                    DataRead::TooLarge => {
                        reply(&mut stream, "552 message too large").await?;
                    }
                    DataRead::Complete(raw) => match self.annotator.annotate(&raw).await {
                        Ok(email) => {
                            reply(&mut stream, "250 OK message accepted").await?;
                            // The transaction is accepted at this point;
                            // routing misses are delivery concerns only.
                            if let Err(e) = self.router.route(email).await {
                                debug!(error = %e, "message not routed");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "transaction rejected");
                            reply(&mut stream, "451 transaction failed").await?;
                        }
                    },
                }
                sender_seen = false;
                rcpt_count = 0;
            } else if upper == "RSET" {
                sender_seen = false;
                rcpt_count = 0;
                reply(&mut stream, "250 OK").await?;
            } else if upper == "NOOP" {
                reply(&mut stream, "250 OK").await?;
            } else if upper == "QUIT" {
                reply(&mut stream, &format!("221 {} closing", self.domain)).await?;
                return Ok(());
            } else {
                reply(&mut stream, "502 command not implemented").await?;
            }
        }
    }
}

async fn reply<S>(stream: &mut BufStream<S>, line: &str) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await
}

enum LineRead {
    Line(String),
    TooLong,
    Eof,
}

/// Read one LF-terminated line, buffering at most `cap` bytes.
///
/// A longer line is consumed through to its newline without being held in
/// memory and reported as `TooLong`, so a client streaming an endless
/// newline-free byte sequence cannot grow the buffer past the cap.
async fn read_bounded_line<R>(stream: &mut R, cap: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let mut overlong = false;
    loop {
        let buf = stream.fill_buf().await?;
        if buf.is_empty() {
            return Ok(LineRead::Eof);
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if !overlong && line.len() + pos + 1 <= cap {
                    line.push_str(&String::from_utf8_lossy(&buf[..=pos]));
                } else {
                    overlong = true;
                }
                stream.consume(pos + 1);
                return Ok(if overlong {
                    LineRead::TooLong
                } else {
                    LineRead::Line(line)
                });
            }
            None => {
                let len = buf.len();
                if !overlong && line.len() + len <= cap {
                    line.push_str(&String::from_utf8_lossy(buf));
                } else {
                    overlong = true;
                    line.clear();
                }
                stream.consume(len);
            }
        }
    }
}

enum DataRead {
    Complete(Vec<u8>),
    TooLarge,
    Eof,
}

/// Read DATA lines up to the bare-dot terminator, un-stuffing leading
/// double dots per RFC 5321. Holds at most `limit` accepted bytes plus one
/// in-flight line; anything beyond that is drained, not buffered.
async fn read_data<R>(stream: &mut R, limit: usize) -> io::Result<DataRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let mut too_large = false;
    loop {
        let line = match read_bounded_line(stream, limit).await? {
            LineRead::Eof => return Ok(DataRead::Eof),
            LineRead::TooLong => {
                too_large = true;
                raw.clear();
                continue;
            }
            LineRead::Line(line) => line,
        };
        if line.trim_end_matches(['\r', '\n']) == "." {
            return Ok(if too_large {
                DataRead::TooLarge
            } else {
                DataRead::Complete(raw)
            });
        }
        if too_large {
            continue;
        }
        let bytes = if line.starts_with('.') {
            &line.as_bytes()[1..]
        } else {
            line.as_bytes()
        };
        if raw.len() + bytes.len() > limit {
            // Keep draining to the terminator so the session can answer 552.
            too_large = true;
            raw.clear();
            continue;
        }
        raw.extend_from_slice(bytes);
    }
}

/// Load a TLS acceptor from PEM certificate and key files.
pub fn tls_acceptor(cert_path: &Path, key_path: &Path) -> std::result::Result<TlsAcceptor, ConfigError> {
    let certs = rustls_pemfile::certs(&mut io::BufReader::new(std::fs::File::open(cert_path)?))
        .collect::<io::Result<Vec<_>>>()?;
    let key = rustls_pemfile::private_key(&mut io::BufReader::new(std::fs::File::open(key_path)?))?
        .ok_or_else(|| ConfigError::Tls(format!("no private key in {}", key_path.display())))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ConfigError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

// ── Tests ───────────────────────────────────────────────────────────
