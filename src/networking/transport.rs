//! The socket as the connection layer sees it: a stream of frames in and a
//! sink of byte messages out. Everything websocket specific stays here.

use futures::future;
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt};
use std::pin::Pin;
use warp::ws::{Message, WebSocket};

use crate::error::RpcError;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data(Vec<u8>),
    /// ping / pong, never surfaced
    Control,
    /// close frame with its status code, if the peer sent one
    Close(Option<u16>),
}

impl Frame {
    /// Closing with no code, 1000 or 1001 is an orderly shutdown.
    pub fn is_normal_close(&self) -> bool {
        matches!(
            self,
            Frame::Close(None) | Frame::Close(Some(CLOSE_NORMAL)) | Frame::Close(Some(CLOSE_GOING_AWAY))
        )
    }
}

pub type FrameStream = BoxStream<'static, Result<Frame, RpcError>>;
pub type FrameSink = Pin<Box<dyn Sink<Vec<u8>, Error = RpcError> + Send>>;

/// Split an upgraded warp websocket into the frame stream and byte sink a
/// connection runs on. Outgoing JSON goes out as text frames.
pub fn split_warp_socket(socket: WebSocket) -> (FrameStream, FrameSink) {
    let (sink, stream) = socket.split();
    let stream = stream
        .map(|item| item.map(frame_from_warp).map_err(RpcError::from))
        .boxed();
    let sink = sink
        .sink_map_err(|err: warp::Error| RpcError::from(err))
        .with(|bytes: Vec<u8>| future::ready(Ok::<Message, RpcError>(text_message(bytes))));
    (stream, Box::pin(sink))
}

fn frame_from_warp(message: Message) -> Frame {
    if message.is_close() {
        Frame::Close(message.close_frame().map(|(code, _reason)| code))
    } else if message.is_text() || message.is_binary() {
        Frame::Data(message.as_bytes().to_vec())
    } else {
        Frame::Control
    }
}

fn text_message(bytes: Vec<u8>) -> Message {
    match String::from_utf8(bytes) {
        Ok(text) => Message::text(text),
        Err(err) => Message::binary(err.into_bytes()),
    }
}
