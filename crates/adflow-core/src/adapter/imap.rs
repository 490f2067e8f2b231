//! IMAP mailbox adapter
//!
//! Polls a monitored folder for unread messages, oldest first, and
//! peek-fetches the raw content so the unread flag survives a downstream
//! failure. The message is only flagged seen in `acknowledge`, after the
//! rest of the pipeline has committed.
//!
//! The `imap` protocol crate is synchronous; all protocol work runs under
//! `tokio::task::spawn_blocking` with explicit connect/read/write timeouts
//! on the underlying socket.

use async_trait::async_trait;
use chrono::Utc;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use adflow_common::{IngestError, Result};

use crate::config::ImapConfig;
use crate::contract::SourceAdapter;
use crate::model::{IngestionPayload, SourceKind};
use crate::validator::AccountResolver;

type TlsSession = imap::Session<native_tls::TlsStream<TcpStream>>;

/// One fetched-but-unacknowledged message.
struct PendingMessage {
    session: TlsSession,
    uid: u32,
}

pub struct ImapAdapter {
    config: ImapConfig,
    resolver: Arc<dyn AccountResolver>,
    pending: Option<PendingMessage>,
}

impl ImapAdapter {
    pub fn new(config: ImapConfig, resolver: Arc<dyn AccountResolver>) -> Self {
        Self {
            config,
            resolver,
            pending: None,
        }
    }

    /// Open a secured connection, select the monitored folder, and
    /// peek-fetch the oldest unread message. Runs on the blocking pool.
    fn fetch_oldest_unread(config: &ImapConfig) -> Result<Option<(TlsSession, u32, Vec<u8>)>> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(adapter_err("resolve mailbox host"))?
            .next()
            .ok_or_else(|| IngestError::Adapter(format!("no address for {}", config.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(adapter_err("connect to mailbox"))?;
        tcp.set_read_timeout(Some(timeout)).map_err(adapter_err("set read timeout"))?;
        tcp.set_write_timeout(Some(timeout)).map_err(adapter_err("set write timeout"))?;

        let tls = native_tls::TlsConnector::new().map_err(adapter_err("build TLS connector"))?;
        let tls_stream = tls
            .connect(&config.host, tcp)
            .map_err(adapter_err("TLS handshake"))?;

        let mut client = imap::Client::new(tls_stream);
        // The untagged greeting must be consumed before the first command.
        client
            .read_greeting()
            .map_err(adapter_err("read server greeting"))?;
        let mut session = client
            .login(&config.user, &config.password)
            .map_err(|(e, _)| IngestError::Adapter(format!("mailbox login failed: {}", e)))?;

        session
            .select(&config.folder)
            .map_err(adapter_err("select folder"))?;

        let unread = session
            .uid_search("UNSEEN")
            .map_err(adapter_err("search unread"))?;

        // Oldest first: UIDs are assigned in arrival order.
        let Some(uid) = unread.iter().min().copied() else {
            let _ = session.logout();
            return Ok(None);
        };

        // BODY.PEEK leaves the unread flag untouched.
        let messages = session
            .uid_fetch(uid.to_string(), "(BODY.PEEK[])")
            .map_err(adapter_err("peek-fetch message"))?;

        let raw = messages
            .iter()
            .next()
            .and_then(|m| m.body())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| IngestError::Adapter(format!("empty fetch for uid {}", uid)))?;

        Ok(Some((session, uid, raw)))
    }

    /// Extract sender, subject, recipients, and exactly one report
    /// attachment from a raw message.
    fn extract_payload(&self, raw: &[u8]) -> Result<IngestionPayload> {
        let parsed =
            mailparse::parse_mail(raw).map_err(adapter_err("parse MIME message"))?;

        let sender_raw = parsed.headers.get_first_value("From").unwrap_or_default();
        let subject = parsed.headers.get_first_value("Subject");
        let to_raw = parsed.headers.get_first_value("To").unwrap_or_default();

        let sender = extract_address(&sender_raw)
            .ok_or_else(|| IngestError::Adapter("message has no sender address".to_string()))?;
        let recipients = extract_addresses(&to_raw);

        let (content, filename) = self.extract_report_attachment(&parsed)?;

        let account_id = self.resolver.resolve(&recipients).ok_or_else(|| {
            IngestError::Adapter(format!("no account identity for recipients {:?}", recipients))
        })?;

        Ok(IngestionPayload {
            account_id,
            sender: sender.to_lowercase().trim().to_string(),
            content,
            filename,
            source: SourceKind::Email,
            received_at: Utc::now(),
            subject,
        })
    }

    /// Exactly one attachment with the expected report extension; zero or
    /// several is a structural error on this message.
    fn extract_report_attachment(&self, parsed: &ParsedMail<'_>) -> Result<(Vec<u8>, String)> {
        let suffix = format!(".{}", self.config.report_extension.to_lowercase());
        let mut attachments = Vec::new();
        collect_attachments(parsed, &suffix, &mut attachments)?;

        match attachments.len() {
            0 => Err(IngestError::Adapter(format!(
                "no {} attachment found in message",
                self.config.report_extension
            ))),
            1 => Ok(attachments.remove(0)),
            n => Err(IngestError::Adapter(format!(
                "multiple report attachments found ({}), expected exactly one",
                n
            ))),
        }
    }

    async fn teardown(&mut self) {
        if let Some(pending) = self.pending.take() {
            let mut session = pending.session;
            let result = tokio::task::spawn_blocking(move || session.logout()).await;
            if !matches!(result, Ok(Ok(_))) {
                debug!("stale mailbox session teardown failed");
            }
        }
    }
}

fn adapter_err<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> IngestError {
    move |e| IngestError::Adapter(format!("{}: {}", context, e))
}

fn extract_address(value: &str) -> Option<String> {
    match mailparse::addrparse(value) {
        Ok(list) => list.extract_single_info().map(|info| info.addr),
        // Fall back to the raw header for non-conforming senders; the
        // validator will reject anything that is not allow-listed anyway.
        Err(_) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        },
    }
}

fn extract_addresses(value: &str) -> Vec<String> {
    match mailparse::addrparse(value) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                mailparse::MailAddr::Single(info) => vec![info.addr.clone()],
                mailparse::MailAddr::Group(group) => {
                    group.addrs.iter().map(|i| i.addr.clone()).collect()
                },
            })
            .collect(),
        Err(_) => value.split(',').map(|s| s.trim().to_string()).collect(),
    }
}

fn collect_attachments(
    part: &ParsedMail<'_>,
    suffix: &str,
    out: &mut Vec<(Vec<u8>, String)>,
) -> Result<()> {
    for sub in &part.subparts {
        collect_attachments(sub, suffix, out)?;
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned());

    let is_attachment = disposition.disposition == DispositionType::Attachment;
    if let (true, Some(name)) = (is_attachment, filename) {
        if name.to_lowercase().ends_with(suffix) {
            let content = part
                .get_body_raw()
                .map_err(adapter_err("decode attachment"))?;
            out.push((content, name));
        }
    }
    Ok(())
}

#[async_trait]
impl SourceAdapter for ImapAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Email
    }

    async fn receive(&mut self) -> Result<Option<IngestionPayload>> {
        // A session can linger when the previous item failed before its
        // acknowledge; drop it so the unread message is re-fetched fresh.
        self.teardown().await;

        let config = self.config.clone();
        let fetched = tokio::task::spawn_blocking(move || Self::fetch_oldest_unread(&config))
            .await
            .map_err(|e| IngestError::Adapter(format!("mailbox task failed: {}", e)))??;

        let Some((session, uid, raw)) = fetched else {
            return Ok(None);
        };

        debug!(uid, bytes = raw.len(), "fetched unread message");

        // Keep the session before extraction: on a structural error the
        // runner still acknowledges this exact message to break the
        // poison loop, and that needs the live session.
        self.pending = Some(PendingMessage { session, uid });

        let payload = self.extract_payload(&raw)?;
        Ok(Some(payload))
    }

    async fn acknowledge(&mut self, ingestion_id: Option<Uuid>) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            warn!(?ingestion_id, "acknowledge with no pending message");
            return Ok(());
        };

        let uid = pending.uid;
        let mut session = pending.session;
        tokio::task::spawn_blocking(move || {
            let result = session
                .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
                .map(|_| ())
                .map_err(adapter_err("mark message seen"));
            let _ = session.logout();
            result
        })
        .await
        .map_err(|e| IngestError::Adapter(format!("mailbox task failed: {}", e)))??;

        debug!(uid, ?ingestion_id, "message acknowledged");
        Ok(())
    }
}
