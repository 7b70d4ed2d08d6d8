//! Line-oriented TCP transport for `URL=` connections (raw SCPI sockets).

use super::{Transport, TransportError};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// An open TCP connection.
pub struct TcpTransport {
    peer: String,
    stream: Option<BufReader<TcpStream>>,
    termination: String,
    timeout: Duration,
}

impl TcpTransport {
    /// Connect to `host`, adding `default_port` when the address has none.
    pub async fn connect(
        host: &str,
        default_port: u16,
        termination: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let peer = with_port(host, default_port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&peer))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .with_context(|| format!("Failed to connect to {peer}"))?;
        debug!(target: "comm", "Connected to {}", peer);
        Ok(Self {
            peer,
            stream: Some(BufReader::new(stream)),
            termination: termination.to_string(),
            timeout,
        })
    }

    fn stream(&mut self) -> Result<&mut BufReader<TcpStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected.into())
    }
}

fn with_port(host: &str, default_port: u16) -> String {
    let has_port = host.rsplit_once(':').is_some_and(|(name, port)| {
        port.parse::<u16>().is_ok() && (!name.contains(':') || name.ends_with(']'))
    });
    if has_port {
        host.to_string()
    } else {
        format!("{host}:{default_port}")
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn describe(&self) -> String {
        format!("tcp {}", self.peer)
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        let line = format!("{}{}", message, self.termination);
        let peer = self.peer.clone();
        let stream = self.stream()?;
        stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write to {peer}"))?;
        debug!(target: "comm", "{} <- {}", peer, message);
        Ok(())
    }

    async fn query(&mut self, message: &str) -> Result<String> {
        self.send(message).await?;
        let timeout = self.timeout;
        let peer = self.peer.clone();
        let stream = self.stream()?;
        let mut reply = String::new();
        let read = tokio::time::timeout(timeout, stream.read_line(&mut reply))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .with_context(|| format!("Failed to read from {peer}"))?;
        if read == 0 {
            return Err(anyhow!("{peer} closed the connection"));
        }
        let reply = reply.trim().to_string();
        debug!(target: "comm", "{} -> {}", peer, reply);
        Ok(reply)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.get_mut().shutdown().await.ok();
            debug!(target: "comm", "Closed {}", self.peer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn default_port_is_added_when_missing() {
        assert_eq!(with_port("10.0.0.5", 5025), "10.0.0.5:5025");
        assert_eq!(with_port("10.0.0.5:111", 5025), "10.0.0.5:111");
        assert_eq!(with_port("scope.lab", 5025), "scope.lab:5025");
    }

    #[tokio::test]
    async fn queries_a_line_based_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut line = String::new();
            socket.read_line(&mut line).await.unwrap();
            assert_eq!(line, "*IDN?\n");
            socket.get_mut().write_all(b"ACME,DVM,1,0.1\n").await.unwrap();
        });

        let mut link = TcpTransport::connect(
            &addr.to_string(),
            5025,
            "\n",
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(link.query("*IDN?").await.unwrap(), "ACME,DVM,1,0.1");
        link.close().await.unwrap();
        link.close().await.unwrap();
        server.await.unwrap();
    }
}
