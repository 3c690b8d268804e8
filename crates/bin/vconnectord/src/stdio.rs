//! Line-delimited JSON transport over stdin/stdout.
//!
//! Each inbound line is one command message; each outbound message is written
//! as one line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};

use vconnector_app::messages::OutboundMessage;

/// Forward non-blank lines from `reader` to `inbound` until end of input or
/// until the receiving side goes away.
pub async fn read_lines<R>(reader: R, inbound: mpsc::Sender<String>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                if inbound.send(line).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read inbound line");
                return;
            }
        }
    }
}

/// Write every message from `outbound` to `writer`, one JSON document per
/// line, until the bus closes.
pub async fn write_lines<W>(mut writer: W, mut outbound: broadcast::Receiver<OutboundMessage>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = match outbound.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "outbound writer lagged behind the bus");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let mut line = match message.to_json() {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode outbound message");
                continue;
            }
        };
        line.push('\n');

        if let Err(err) = writer.write_all(line.as_bytes()).await {
            tracing::error!(error = %err, "failed to write outbound message");
            return;
        }
        if let Err(err) = writer.flush().await {
            tracing::error!(error = %err, "failed to flush outbound messages");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vconnector_domain::device::ConnectionState;
    use vconnector_domain::key::DeviceKey;
    use vconnector_domain::time::now;

    #[tokio::test]
    async fn should_forward_non_blank_lines() {
        let input: &[u8] = b"{\"a\":1}\n\n   \n{\"b\":2}\n";
        let (tx, mut rx) = mpsc::channel(8);

        read_lines(input, tx).await;

        assert_eq!(rx.recv().await.unwrap(), "{\"a\":1}");
        assert_eq!(rx.recv().await.unwrap(), "{\"b\":2}");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn should_stop_reading_when_receiver_dropped() {
        let input: &[u8] = b"one\ntwo\n";
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        read_lines(input, tx).await;
    }

    #[tokio::test]
    async fn should_write_one_json_line_per_message() {
        let (tx, rx) = broadcast::channel(8);
        let message = OutboundMessage::ConnectionState {
            device: DeviceKey::new("hall").unwrap(),
            state: ConnectionState::Connected,
            timestamp: now(),
        };
        tx.send(message.clone()).unwrap();
        tx.send(message).unwrap();
        drop(tx);

        let mut output = Vec::new();
        write_lines(&mut output, rx).await;

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let decoded: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(decoded["type"], "connection_state");
        assert_eq!(decoded["device"], "hall");
    }
}
