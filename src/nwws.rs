//! NWWS-OI client.
//!
//! The NOAA Weather Wire Service Open Interface is an XMPP server whose
//! `nwws@conference` chatroom carries every text product the NWS issues. The
//! peculiarities this client deals with:
//!
//! * the server offers PLAIN SASL only, which tokio-xmpp negotiates;
//! * some deployments refuse the MUC join until the roster has been fetched,
//!   so session start is presence → roster → join;
//! * the product is **not** in the message `<body>`; the body is a one-line
//!   summary. The full text is the character content of a custom
//!   `<x xmlns="nwws-oi">` child, HTML-entity-encoded, and that element's
//!   attributes carry the WMO header fields.
//!
//! On disconnect a single reconnect loop backs off 5 s, doubling to a 300 s
//! cap, and resets once a session reaches the room. There is never more than
//! one outstanding reconnect attempt.

use futures::StreamExt;
use jid::Jid;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_xmpp::AsyncClient;
use xmpp_parsers::iq::Iq;
use xmpp_parsers::message::{Message, MessageType};
use xmpp_parsers::muc::Muc;
use xmpp_parsers::presence::{Presence, Type as PresenceType};
use xmpp_parsers::roster::Roster;
use xmpp_parsers::Element;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

/// Connection settings for NWWS-OI.
#[derive(Debug, Clone)]
pub struct NwwsConfig {
    /// Account username (the part before `@`).
    pub username: String,
    /// Account password.
    pub password: String,
    /// XMPP server hostname.
    pub server: String,
    /// MUC room carrying the product stream.
    pub room: String,
    /// Nickname to join under; messages from this nick are ignored.
    pub nickname: String,
}

impl NwwsConfig {
    /// Build a config from credentials, with the operational server defaults.
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_owned(),
            password: password.to_owned(),
            server: "nwws-oi.weather.gov".to_owned(),
            room: "nwws@conference.nwws-oi.weather.gov".to_owned(),
            nickname: "nwswire".to_owned(),
        }
    }
}

/// One raw product received from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProduct {
    /// Six-character WMO product designator, e.g. `WFUS53`.
    pub ttaaii: Option<String>,
    /// Four-character issuing center, e.g. `KCLE`.
    pub cccc: Option<String>,
    /// AWIPS identifier, e.g. `TORCLE`.
    pub awips_id: Option<String>,
    /// Upstream message id.
    pub message_id: Option<String>,
    /// The product text, entities decoded.
    pub text: String,
}

/// Events delivered by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NwwsEvent {
    /// Joined the product room.
    Connected,
    /// Lost the session; a reconnect is scheduled.
    Disconnected,
    /// A product arrived.
    Product(RawProduct),
}

/// The error returned when the client cannot be constructed.
#[derive(thiserror::Error, Debug)]
pub enum NwwsError {
    /// Credentials or server name do not form a valid JID
    #[error("invalid JID: {0}")]
    InvalidJid(String),
}

/// A resilient NWWS-OI session.
///
/// [`NwwsClient::spawn`] starts the connection task; [`NwwsClient::recv`]
/// yields events until [`NwwsClient::shutdown`] is called.
pub struct NwwsClient {
    events: mpsc::Receiver<NwwsEvent>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl NwwsClient {
    /// Validate the configuration and start the connection task.
    pub fn spawn(config: NwwsConfig) -> Result<Self, NwwsError> {
        let account = format!("{}@{}", config.username, config.server);
        let jid = Jid::from_str(&account).map_err(|e| NwwsError::InvalidJid(e.to_string()))?;
        let room_jid = Jid::from_str(&format!("{}/{}", config.room, config.nickname))
            .map_err(|e| NwwsError::InvalidJid(e.to_string()))?;

        let (events_tx, events) = mpsc::channel(256);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(config, jid, room_jid, events_tx, shutdown_rx));

        Ok(Self {
            events,
            shutdown,
            task,
        })
    }

    /// The next event, or `None` once the client has stopped.
    pub async fn recv(&mut self) -> Option<NwwsEvent> {
        self.events.recv().await
    }

    /// Stop the session and the reconnect loop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

enum SessionEnd {
    /// The shutdown signal fired.
    Shutdown,
    /// The transport dropped; `joined` says whether the room was reached.
    Lost { joined: bool },
}

async fn run(
    config: NwwsConfig,
    jid: Jid,
    room_jid: Jid,
    events: mpsc::Sender<NwwsEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match session(&config, &jid, &room_jid, &events, &mut shutdown).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Lost { joined } => {
                tracing::warn!(delay_secs = delay.as_secs(), "NWWS session lost, reconnecting");
                let _ = events.send(NwwsEvent::Disconnected).await;
                if joined {
                    delay = INITIAL_RECONNECT_DELAY;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }
    tracing::info!("NWWS client stopped");
}

/// Drive one XMPP session until it drops or shutdown fires.
async fn session(
    config: &NwwsConfig,
    jid: &Jid,
    room_jid: &Jid,
    events: &mpsc::Sender<NwwsEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    tracing::info!(server = %config.server, "connecting to NWWS-OI");
    let mut client = AsyncClient::new(jid.clone(), config.password.clone());
    client.set_reconnect(false);
    let mut joined = false;

    loop {
        let event = tokio::select! {
            event = client.next() => event,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = client.send_end().await;
                    return SessionEnd::Shutdown;
                }
                continue;
            }
        };

        match event {
            Some(tokio_xmpp::Event::Online { .. }) => {
                tracing::info!(room = %config.room, "NWWS session online, joining room");
                if let Err(error) = start_session(&mut client, room_jid).await {
                    tracing::error!(%error, "NWWS session setup failed");
                    return SessionEnd::Lost { joined };
                }
                joined = true;
                let _ = events.send(NwwsEvent::Connected).await;
            }
            Some(tokio_xmpp::Event::Stanza(stanza)) => {
                if let Some(product) = extract_product(stanza, &config.nickname) {
                    tracing::debug!(
                        awips_id = ?product.awips_id,
                        bytes = product.text.len(),
                        "received product"
                    );
                    let _ = events.send(NwwsEvent::Product(product)).await;
                }
            }
            Some(tokio_xmpp::Event::Disconnected(error)) => {
                tracing::warn!(%error, "NWWS disconnected");
                return SessionEnd::Lost { joined };
            }
            None => return SessionEnd::Lost { joined },
        }
    }
}

/// Presence, then roster, then the MUC join. Some NWWS servers refuse the
/// join until the roster has been requested.
async fn start_session(
    client: &mut AsyncClient,
    room_jid: &Jid,
) -> Result<(), tokio_xmpp::Error> {
    let presence = Presence::new(PresenceType::None);
    client.send_stanza(presence.into()).await?;

    let roster = Iq::from_get("roster", Roster {
        ver: None,
        items: Vec::new(),
    });
    client.send_stanza(roster.into()).await?;

    let mut join = Presence::new(PresenceType::None);
    join.to = Some(room_jid.clone());
    join.payloads.push(Muc::new().into());
    client.send_stanza(join.into()).await?;
    Ok(())
}

/// Pull the raw product out of a group-chat stanza.
///
/// Returns `None` for anything that is not a product: non-message stanzas,
/// direct messages, our own echoes, and messages without the `{nwws-oi}x`
/// payload (the plain `<body>` summary line is deliberately ignored).
fn extract_product(stanza: Element, own_nickname: &str) -> Option<RawProduct> {
    let message = Message::try_from(stanza).ok()?;
    if message.type_ != MessageType::Groupchat {
        return None;
    }

    if let Some(Jid::Full(from)) = &message.from {
        if from.resource().to_string() == own_nickname {
            return None;
        }
    }

    let payload = message.payloads.iter().find(|p| p.is("x", "nwws-oi"))?;
    let text = decode_entities(&payload.text());

    // Some relays double every newline; undo that before parsing.
    let text = if text.matches('\n').count() == text.matches("\n\n").count() * 2 {
        text.replace("\n\n", "\n")
    } else {
        text
    };

    // A leading LDM sequence number line is transport framing, not product.
    let text = match {
        let mut parts = text.splitn(3, '\n');
        (parts.next(), parts.next(), parts.next())
    } {
        (Some(""), Some(seq), Some(rest)) if seq.trim().parse::<u64>().is_ok() => rest.to_owned(),
        _ => text,
    };

    let text = text.trim().to_owned();
    if text.is_empty() {
        return None;
    }

    Some(RawProduct {
        ttaaii: payload.attr("ttaaii").map(str::to_owned),
        cccc: payload.attr("cccc").map(str::to_owned),
        awips_id: payload
            .attr("awipsid")
            .filter(|id| !id.is_empty())
            .map(str::to_owned),
        message_id: payload.attr("id").map(str::to_owned),
        text,
    })
}

/// Decode the HTML entities NWWS leaves in the payload text.
fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
