//! Point-to-point message link between two nodes

use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::protocol::Message;
use crate::transport::framing::{read_frame, write_frame};
use crate::{Error, Result};

/// An established link carrying framed protocol messages.
pub struct Link {
    stream: TcpStream,
}

impl Link {
    /// Connect to a listening node.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { stream })
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Send one message.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let payload = message.to_bytes()?;
        write_frame(&mut self.stream, &payload).await
    }

    /// Receive one message.
    pub async fn recv(&mut self) -> Result<Message> {
        let payload = read_frame(&mut self.stream).await?;
        Message::from_bytes(&payload).map_err(Error::Decode)
    }

    /// Remote address of the link.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream
            .peer_addr()
            .map_err(|e| Error::Network(e.to_string()))
    }

    /// Split into read and write halves for concurrent processing.
    pub fn into_split(self) -> (LinkReader, LinkWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            LinkReader { stream: read_half },
            LinkWriter { stream: write_half },
        )
    }
}

/// Read half of a link
pub struct LinkReader {
    stream: tokio::net::tcp::OwnedReadHalf,
}

impl LinkReader {
    /// Receive one message.
    pub async fn recv(&mut self) -> Result<Message> {
        let payload = read_frame(&mut self.stream).await?;
        Message::from_bytes(&payload).map_err(Error::Decode)
    }
}

/// Write half of a link
pub struct LinkWriter {
    stream: tokio::net::tcp::OwnedWriteHalf,
}

impl LinkWriter {
    /// Send one message.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let payload = message.to_bytes()?;
        write_frame(&mut self.stream, &payload).await
    }
}
