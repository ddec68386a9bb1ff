//! Write pump: the only task that touches the sink half of the socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Forwards queued frames to the socket until cancelled or the queue
/// closes, then sends a close frame.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = outbound.recv() => frame,
        };
        let Some(frame) = frame else { break };

        if let Err(e) = sink.send(frame).await {
            warn!(error = %e, "management write failed");
            break;
        }
    }

    debug!("write pump stopping");
    let _ = sink.send(tungstenite::Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;
    use std::time::Duration;

    fn capture_sink(
        tx: mpsc::Sender<tungstenite::Message>,
    ) -> impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(sink::unfold(tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg).await;
            Ok::<_, tungstenite::Error>(tx)
        }))
    }

    #[tokio::test]
    async fn forwards_frames_in_order() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (queue_tx, queue_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(write_pump(capture_sink(sink_tx), queue_rx, cancel));

        queue_tx
            .send(tungstenite::Message::Text("one".into()))
            .await
            .unwrap();
        queue_tx
            .send(tungstenite::Message::Text("two".into()))
            .await
            .unwrap();
        drop(queue_tx);

        handle.await.unwrap();
        assert_eq!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Text("one".into()))
        );
        assert_eq!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Text("two".into()))
        );
        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Close(_))
        ));
    }

    #[tokio::test]
    async fn cancel_sends_close_frame() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (_queue_tx, queue_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(write_pump(capture_sink(sink_tx), queue_rx, cancel.clone()));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Close(_))
        ));
    }
}
