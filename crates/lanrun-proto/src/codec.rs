//! Length-delimited JSON framing.
//!
//! Every message travels as a 4-byte big-endian length followed by that
//! many bytes of JSON. A TCP read may return half a frame or several
//! frames; the codec buffers until a whole frame is available.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{ProtoError, Request, Response, DEFAULT_MAX_FRAME_LEN};

/// Encodes `Enc` and decodes `Dec`, one JSON document per frame.
pub struct JsonCodec<Enc, Dec> {
    inner: LengthDelimitedCodec,
    _types: PhantomData<fn(Enc) -> Dec>,
}

/// Coordinator side: reads requests, writes responses.
pub type CoordinatorCodec = JsonCodec<Response, Request>;

/// Worker side: writes requests, reads responses.
pub type WorkerCodec = JsonCodec<Request, Response>;

impl<Enc, Dec> JsonCodec<Enc, Dec> {
    /// Codec with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Codec that rejects frames longer than `max_frame_len` bytes.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max_frame_len)
                .new_codec(),
            _types: PhantomData,
        }
    }
}

impl<Enc, Dec> Default for JsonCodec<Enc, Dec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Enc, Dec: DeserializeOwned> Decoder for JsonCodec<Enc, Dec> {
    type Item = Dec;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

impl<Enc: Serialize, Dec> Encoder<Enc> for JsonCodec<Enc, Dec> {
    type Error = ProtoError;

    fn encode(&mut self, item: Enc, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use lanrun_core::PeerId;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use crate::Payload;

    fn heartbeat() -> Request {
        Request::Heartbeat {
            peer_id: PeerId::new("w1"),
        }
    }

    #[test]
    fn test_partial_frames_are_buffered() {
        let mut worker = WorkerCodec::new();
        let mut coordinator = CoordinatorCodec::new();

        let mut wire = BytesMut::new();
        worker.encode(heartbeat(), &mut wire).unwrap();

        // Deliver the frame in three pieces.
        let tail = wire.split_off(6);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&wire[..3]);
        assert!(coordinator.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[3..]);
        assert!(coordinator.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&tail);
        assert_eq!(coordinator.decode(&mut buf).unwrap(), Some(heartbeat()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut worker = WorkerCodec::new();
        let mut coordinator = CoordinatorCodec::new();

        let mut buf = BytesMut::new();
        worker.encode(heartbeat(), &mut buf).unwrap();
        worker
            .encode(
                Request::RequestTask {
                    peer_id: PeerId::new("w1"),
                },
                &mut buf,
            )
            .unwrap();

        assert_eq!(coordinator.decode(&mut buf).unwrap(), Some(heartbeat()));
        assert!(matches!(
            coordinator.decode(&mut buf).unwrap(),
            Some(Request::RequestTask { .. })
        ));
        assert!(coordinator.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversize_frame_is_rejected() {
        let mut coordinator = CoordinatorCodec::with_max_frame_len(16);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&1000u32.to_be_bytes());
        buf.extend_from_slice(b"{}");

        assert!(matches!(coordinator.decode(&mut buf), Err(ProtoError::Io(_))));
    }

    #[test]
    fn test_invalid_json_frame_is_rejected() {
        let mut coordinator = CoordinatorCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(b"hello");

        assert!(matches!(coordinator.decode(&mut buf), Err(ProtoError::Json(_))));
    }

    #[tokio::test]
    async fn test_large_payload_over_a_small_pipe() {
        // A 64-byte pipe forces many short reads for one frame.
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(client, WorkerCodec::new());
        let mut reader = FramedRead::new(server, CoordinatorCodec::new());

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let request = Request::SubmitResult {
            peer_id: None,
            name: "big.zip".to_string(),
            payload: Payload(payload.clone()),
        };

        let send = tokio::spawn(async move { writer.send(request).await });
        let received = reader.next().await.unwrap().unwrap();
        send.await.unwrap().unwrap();

        match received {
            Request::SubmitResult { payload: got, .. } => assert_eq!(got.into_inner(), payload),
            other => panic!("unexpected request: {:?}", other),
        }
    }
}
