//! Read pump: classifies inbound frames and routes them.
//!
//! Responses resolve the pending slot registered under their id,
//! notifications go to the event listener, pongs feed the heartbeat.

use std::sync::{Arc, PoisonError};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use craftlink_protocol::Inbound;
use craftlink_protocol::constants::MSMP_MAX_MESSAGE_SIZE;

use crate::client::{PendingMap, SharedListener};
use crate::error::MsmpError;
use crate::events;
use crate::pumps::heartbeat::PongTracker;

/// Everything the read pump routes into.
#[derive(Clone)]
pub(crate) struct Dispatch {
    pub(crate) pending: PendingMap,
    pub(crate) listener: SharedListener,
    pub(crate) pongs: Arc<PongTracker>,
    pub(crate) outbound: mpsc::Sender<tungstenite::Message>,
}

/// How the read side of a link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkEnd {
    Cancelled,
    ClosedByServer,
    StreamEnded,
    Failed(String),
}

/// Reads until the stream ends, fails, or the link is cancelled.
pub(crate) async fn read_pump<S>(mut stream: S, dispatch: Dispatch, cancel: CancellationToken) -> LinkEnd
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return LinkEnd::Cancelled,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(tungstenite::Message::Text(text))) => {
                handle_text(&text, &dispatch).await;
            }
            Some(Ok(tungstenite::Message::Ping(data))) => {
                trace!("ping from server");
                let _ = dispatch.outbound.send(tungstenite::Message::Pong(data)).await;
            }
            Some(Ok(tungstenite::Message::Pong(_))) => {
                trace!("pong");
                dispatch.pongs.record();
            }
            Some(Ok(tungstenite::Message::Close(frame))) => {
                debug!(?frame, "server sent close frame");
                return LinkEnd::ClosedByServer;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "management read failed");
                return LinkEnd::Failed(e.to_string());
            }
            None => return LinkEnd::StreamEnded,
        }
    }
}

/// Routes one text frame.
async fn handle_text(text: &str, dispatch: &Dispatch) {
    if text.len() > MSMP_MAX_MESSAGE_SIZE {
        warn!(bytes = text.len(), "message too large, dropping");
        return;
    }

    let inbound = match Inbound::parse(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!(error = %e, "unparseable management message");
            return;
        }
    };

    match inbound {
        Inbound::Response { id, outcome } => {
            let slot = dispatch.pending.lock().await.remove(&id);
            match slot {
                Some(tx) => {
                    let _ = tx.send(outcome.map_err(MsmpError::from));
                }
                None => debug!(id, "response for unknown or expired request"),
            }
        }
        Inbound::Notification { method, params } => {
            let listener = dispatch
                .listener
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            events::dispatch(listener.as_deref(), &method, &params);
        }
        Inbound::Unrecognized => {
            debug!("ignoring message that is neither response nor notification");
        }
    }
}
