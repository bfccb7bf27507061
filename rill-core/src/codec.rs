//! # JSON message codec
//!
//! This module implements `tonic::codec::Codec` so that tonic can transport
//! plain serde types, bypassing the need for a protobuf schema or generated
//! structs. Message framing, flow control and trailers stay with tonic; the
//! codec only turns one typed message into one JSON frame and back.
use bytes::{Buf, BufMut};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A codec that frames typed messages as JSON.
///
/// `E` is the message type written to the wire, `D` the one read from it.
/// Clients instantiate it as `SerdeCodec<Req, Res>`, servers as
/// `SerdeCodec<Res, Req>`.
pub struct SerdeCodec<E, D> {
    _marker: PhantomData<(E, D)>,
}

impl<E, D> Default for SerdeCodec<E, D> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<E, D> Codec for SerdeCodec<E, D>
where
    E: Serialize + Send + 'static,
    D: DeserializeOwned + Send + 'static,
{
    type Encode = E;
    type Decode = D;

    type Encoder = SerdeEncoder<E>;
    type Decoder = SerdeDecoder<D>;

    fn encoder(&mut self) -> Self::Encoder {
        SerdeEncoder(PhantomData)
    }

    fn decoder(&mut self) -> Self::Decoder {
        SerdeDecoder(PhantomData)
    }
}

/// Serializes one typed message into the outgoing frame buffer.
pub struct SerdeEncoder<E>(PhantomData<E>);

impl<E> Encoder for SerdeEncoder<E>
where
    E: Serialize + Send + 'static,
{
    type Item = E;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        let bytes = serde_json::to_vec(&item)
            .map_err(|e| Status::internal(format!("failed to encode message as JSON: {e}")))?;
        dst.put_slice(&bytes);
        Ok(())
    }
}

/// Deserializes one incoming frame into the typed message.
pub struct SerdeDecoder<D>(PhantomData<D>);

impl<D> Decoder for SerdeDecoder<D>
where
    D: DeserializeOwned + Send + 'static,
{
    type Item = D;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let buf = src.copy_to_bytes(src.remaining());
        let item = serde_json::from_slice(&buf)
            .map_err(|e| Status::internal(format!("failed to decode JSON message: {e}")))?;
        Ok(Some(item))
    }
}
