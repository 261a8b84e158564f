// src/exec/channel.rs

//! Length-prefixed, strictly half-duplex message channel over a pipe pair.
//!
//! The same type is used on both ends: the coordinator drives it through
//! [`Channel::exchange`], a worker through [`Channel::recv`] and
//! [`Channel::send`].

use std::io::ErrorKind as IoErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::trace;

use super::protocol::{Envelope, MAX_FRAME_LEN, ResultMessage};
use crate::errors::{FleetError, Result};
use crate::job::ModelNode;

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Channel {
    reader: BufReader<BoxReader>,
    writer: BufWriter<BoxWriter>,
}

impl Channel {
    pub fn new(reader: BoxReader, writer: BoxWriter) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    /// Write one framed envelope and flush it.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(FleetError::Protocol(format!(
                "outgoing {} frame of {} bytes exceeds limit of {MAX_FRAME_LEN}",
                envelope.kind_name(),
                payload.len()
            )));
        }

        // Bounded by MAX_FRAME_LEN above, so the cast is lossless.
        self.writer
            .write_u32(payload.len() as u32)
            .await
            .map_err(write_error)?;
        self.writer.write_all(&payload).await.map_err(write_error)?;
        self.writer.flush().await.map_err(write_error)?;

        trace!(kind = envelope.kind_name(), bytes = payload.len(), "frame sent");
        Ok(())
    }

    /// Read one framed envelope. `Ok(None)` means the peer closed the
    /// channel cleanly between frames.
    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        let len = match self.reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(read_error(e)),
        };

        if len > MAX_FRAME_LEN {
            return Err(FleetError::Protocol(format!(
                "incoming frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
            )));
        }

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).await.map_err(read_error)?;

        let envelope: Envelope = serde_json::from_slice(&payload)
            .map_err(|e| FleetError::Protocol(format!("unreadable frame: {e}")))?;
        trace!(kind = envelope.kind_name(), bytes = len, "frame received");
        Ok(Some(envelope))
    }

    /// Send one job and read until its result arrives.
    ///
    /// Every progress report in between is handed to `on_progress` in the
    /// order the worker sent it. EOF or an unexpected message kind fails
    /// the exchange.
    pub async fn exchange<F>(&mut self, job: ModelNode, on_progress: F) -> Result<ResultMessage>
    where
        F: FnMut(f64) + Send,
    {
        self.send(&Envelope::Job { job }).await?;
        self.await_result(on_progress).await
    }

    /// The receiving half of [`Channel::exchange`], for callers that send
    /// the job themselves.
    pub async fn await_result<F>(&mut self, mut on_progress: F) -> Result<ResultMessage>
    where
        F: FnMut(f64) + Send,
    {
        loop {
            match self.recv().await? {
                Some(Envelope::ProgressReport { progress }) => on_progress(progress),
                Some(Envelope::Result(result)) => return Ok(result),
                Some(other) => {
                    return Err(FleetError::Protocol(format!(
                        "unexpected {} message while awaiting a result",
                        other.kind_name()
                    )));
                }
                None => {
                    return Err(FleetError::ChannelClosed(
                        "worker closed the channel before sending a result".to_string(),
                    ));
                }
            }
        }
    }

    /// Flush and close the outbound half so the peer sees EOF.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(write_error)
    }
}

fn read_error(e: std::io::Error) -> FleetError {
    match e.kind() {
        IoErrorKind::UnexpectedEof | IoErrorKind::ConnectionReset => {
            FleetError::ChannelClosed(format!("read failed: {e}"))
        }
        _ => FleetError::IoError(e),
    }
}

fn write_error(e: std::io::Error) -> FleetError {
    match e.kind() {
        IoErrorKind::BrokenPipe | IoErrorKind::ConnectionReset => {
            FleetError::ChannelClosed(format!("write failed: {e}"))
        }
        _ => FleetError::IoError(e),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::errors::ErrorKind;

    fn pair() -> (Channel, Channel) {
        let (a_tx, b_rx) = duplex(1024);
        let (b_tx, a_rx) = duplex(1024);
        (
            Channel::new(Box::new(a_rx), Box::new(a_tx)),
            Channel::new(Box::new(b_rx), Box::new(b_tx)),
        )
    }

    #[tokio::test]
    async fn exchange_collects_progress_then_result() {
        let (mut coord, mut worker) = pair();

        let peer = tokio::spawn(async move {
            let job = worker.recv().await.unwrap().unwrap();
            assert_eq!(job.kind_name(), "job");
            for p in [0.25, 0.5] {
                worker.send(&Envelope::ProgressReport { progress: p }).await.unwrap();
            }
            worker.send(&Envelope::Result(ResultMessage::default())).await.unwrap();
        });

        let mut seen = Vec::new();
        let result = coord
            .exchange(ModelNode::new("j", "Simulation"), |p| seen.push(p))
            .await
            .unwrap();
        peer.await.unwrap();

        assert!(result.is_success());
        assert_eq!(seen, vec![0.25, 0.5]);
    }

    #[tokio::test]
    async fn eof_before_result_is_a_disconnect() {
        let (mut coord, mut worker) = pair();
        let peer = tokio::spawn(async move {
            let _ = worker.recv().await;
            drop(worker);
        });

        let err = coord
            .exchange(ModelNode::new("j", "Simulation"), |_| {})
            .await
            .unwrap_err();
        peer.await.unwrap();
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
    }

    #[tokio::test]
    async fn job_reply_is_a_protocol_violation() {
        let (mut coord, mut worker) = pair();
        let peer = tokio::spawn(async move {
            let env = worker.recv().await.unwrap().unwrap();
            worker.send(&env).await.unwrap();
        });

        let err = coord
            .exchange(ModelNode::new("j", "Simulation"), |_| {})
            .await
            .unwrap_err();
        peer.await.unwrap();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn oversized_and_garbage_frames_are_rejected() {
        let (a_tx, b_rx) = duplex(64);
        let mut raw: BoxWriter = Box::new(a_tx);
        let mut reader = Channel::new(Box::new(b_rx), Box::new(tokio::io::sink()));

        raw.write_u32(u32::MAX).await.unwrap();
        raw.flush().await.unwrap();
        let err = reader.recv().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let (c_tx, d_rx) = duplex(64);
        let mut raw: BoxWriter = Box::new(c_tx);
        let mut reader = Channel::new(Box::new(d_rx), Box::new(tokio::io::sink()));
        raw.write_u32(3).await.unwrap();
        raw.write_all(b"{{{").await.unwrap();
        raw.flush().await.unwrap();
        let err = reader.recv().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn clean_close_between_frames_is_none() {
        let (mut coord, worker) = pair();
        drop(worker);
        assert!(coord.recv().await.unwrap().is_none());
    }
}
