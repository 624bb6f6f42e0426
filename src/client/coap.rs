//! # CoAP over UDP (RFC 7252)
//!
//! Readings go out as a single confirmable POST:
//!
//! | Field        | Value                                   |
//! |--------------|-----------------------------------------|
//! | Type         | CON (0)                                 |
//! | Code         | 0.02 POST                               |
//! | Message ID   | incremented per request                 |
//! | Token        | 4 bytes, unique per request             |
//! | Uri-Path     | one option per path segment             |
//! | Content-Format | 50 (application/json)                 |
//! | Payload      | `{"humidity":..,"temperature":..}`      |
//!
//! The server either piggybacks its response on the ACK, or sends an empty
//! ACK first and the response later in a separate message carrying the same
//! token. Separate CON responses are acknowledged.
//!
//! Without an ACK the request is retransmitted after `ack_timeout`, doubling
//! the wait each time, up to `max_retransmit` times.

use async_trait::async_trait;
use coap_lite::{CoapOption, ContentFormat, MessageClass, MessageType, Packet, RequestType};
use log::{debug, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};

use crate::client::{Response, Transport, TransportError};
use crate::config::CoapConfig;

/// Largest datagram read from the socket.
const RECV_BUFFER: usize = 1500;

/// How long to wait for a separate response once the request was acknowledged.
const SEPARATE_RESPONSE_WAIT: Duration = Duration::from_secs(93);

pub struct CoapClient {
    socket: Option<UdpSocket>,
    target: String,
    port: u16,
    ack_timeout: Duration,
    max_retransmit: u32,
    next_message_id: u16,
    token_seed: u32,
}

enum Received {
    Response(Packet),
    Acknowledged,
    TimedOut,
}

impl CoapClient {
    /// Resolves `host` and binds a local socket. Resolution failure is not an
    /// error: the literal host is used and resolved again on send.
    pub async fn open(host: String, port: u16, config: CoapConfig) -> Result<Self, TransportError> {
        let target = resolve(&host, port).await;

        let bind_addr = match target.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => "[::]:0",
            _ => "0.0.0.0:0",
        };
        let socket = UdpSocket::bind(bind_addr).await.map_err(TransportError::Open)?;

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();

        info!("CoAP client ready for {}:{}", target, port);

        Ok(Self {
            socket: Some(socket),
            target,
            port,
            ack_timeout: config.ack_timeout(),
            max_retransmit: config.max_retransmit,
            next_message_id: seed as u16,
            token_seed: seed ^ std::process::id(),
        })
    }

    #[cfg(test)]
    fn target(&self) -> &str {
        &self.target
    }

    fn next_ids(&mut self) -> (u16, Vec<u8>) {
        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        let token = (self.token_seed ^ u32::from(message_id)).to_be_bytes().to_vec();
        (message_id, token)
    }

    fn describe_target(&self) -> String {
        format!("{}:{}", self.target, self.port)
    }
}

async fn resolve(host: &str, port: u16) -> String {
    match lookup_host((host, port)).await {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            match addrs.iter().find(|a| a.is_ipv4()).or(addrs.first()) {
                Some(addr) => {
                    debug!("Resolved {} to {}", host, addr.ip());
                    addr.ip().to_string()
                }
                None => host.to_string(),
            }
        }
        Err(e) => {
            debug!("Could not resolve {}: {}, using it as is", host, e);
            host.to_string()
        }
    }
}

fn build_request(path: &str, payload: &[u8], message_id: u16, token: &[u8]) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Confirmable);
    packet.header.code = MessageClass::Request(RequestType::Post);
    packet.header.message_id = message_id;
    packet.set_token(token.to_vec());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet.set_content_format(ContentFormat::ApplicationJSON);
    packet.payload = payload.to_vec();
    packet
}

fn into_response(packet: Packet) -> Response {
    let code = match packet.header.code {
        MessageClass::Response(kind) => format!("{:?}", kind),
        other => format!("{:?}", other),
    };
    Response {
        code,
        payload: packet.payload,
    }
}

async fn acknowledge(socket: &UdpSocket, message_id: u16, to: SocketAddr) {
    let mut ack = Packet::new();
    ack.header.set_type(MessageType::Acknowledgement);
    ack.header.code = MessageClass::Empty;
    ack.header.message_id = message_id;

    match ack.to_bytes() {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, to).await {
                warn!("Failed to acknowledge response {}: {}", message_id, e);
            }
        }
        Err(e) => warn!("Failed to encode ACK: {:?}", e),
    }
}

/// Waits until `deadline` for the reply to `message_id`/`token`, dropping
/// anything unrelated.
async fn receive(
    socket: &UdpSocket,
    message_id: u16,
    token: &[u8],
    deadline: Instant,
) -> Result<Received, TransportError> {
    let mut buf = [0u8; RECV_BUFFER];
    loop {
        let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => return Ok(Received::TimedOut),
        };

        let packet = match Packet::from_bytes(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Ignoring malformed datagram from {}: {:?}", from, e);
                continue;
            }
        };

        match packet.header.get_type() {
            MessageType::Acknowledgement if packet.header.message_id == message_id => {
                if matches!(packet.header.code, MessageClass::Empty) {
                    return Ok(Received::Acknowledged);
                }
                return Ok(Received::Response(packet));
            }
            MessageType::Reset if packet.header.message_id == message_id => {
                return Err(TransportError::Reset(from.to_string()));
            }
            MessageType::Confirmable if packet.get_token() == token => {
                acknowledge(socket, packet.header.message_id, from).await;
                return Ok(Received::Response(packet));
            }
            MessageType::NonConfirmable if packet.get_token() == token => {
                return Ok(Received::Response(packet));
            }
            _ => debug!(
                "Ignoring unrelated message {} from {}",
                packet.header.message_id, from
            ),
        }
    }
}

#[async_trait]
impl Transport for CoapClient {
    async fn publish(&mut self, path: &str, payload: &[u8]) -> Result<Response, TransportError> {
        if self.socket.is_none() {
            return Err(TransportError::Closed);
        }
        let (message_id, token) = self.next_ids();
        let request = build_request(path, payload, message_id, &token);
        let bytes = request
            .to_bytes()
            .map_err(|e| TransportError::Codec(format!("{:?}", e)))?;

        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        let destination = (self.target.as_str(), self.port);
        let mut wait = self.ack_timeout;

        for attempt in 0..=self.max_retransmit {
            if attempt > 0 {
                debug!("Retransmitting message {} (attempt {})", message_id, attempt + 1);
            }
            socket.send_to(&bytes, destination).await?;

            match receive(socket, message_id, &token, Instant::now() + wait).await? {
                Received::Response(packet) => return Ok(into_response(packet)),
                Received::Acknowledged => {
                    debug!("Message {} acknowledged, waiting for separate response", message_id);
                    let deadline = Instant::now() + SEPARATE_RESPONSE_WAIT;
                    loop {
                        match receive(socket, message_id, &token, deadline).await? {
                            Received::Response(packet) => return Ok(into_response(packet)),
                            // Duplicate ACK for a retransmitted request.
                            Received::Acknowledged => continue,
                            Received::TimedOut => {
                                return Err(TransportError::Timeout {
                                    target: self.describe_target(),
                                    attempts: attempt + 1,
                                })
                            }
                        }
                    }
                }
                Received::TimedOut => wait *= 2,
            }
        }

        Err(TransportError::Timeout {
            target: self.describe_target(),
            attempts: self.max_retransmit + 1,
        })
    }

    async fn close(&mut self) {
        if self.socket.take().is_some() {
            info!("Stopped CoAP client for {}", self.describe_target());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coap_lite::ResponseType;

    fn quick_config(max_retransmit: u32) -> CoapConfig {
        CoapConfig {
            ack_timeout: 1,
            max_retransmit,
        }
    }

    async fn server() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    async fn recv_packet(socket: &UdpSocket) -> (Packet, SocketAddr) {
        let mut buf = [0u8; RECV_BUFFER];
        let (len, from) = socket.recv_from(&mut buf).await.unwrap();
        (Packet::from_bytes(&buf[..len]).unwrap(), from)
    }

    fn uri_path(packet: &Packet) -> String {
        packet
            .get_option(CoapOption::UriPath)
            .map(|segments| {
                segments
                    .iter()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }

    fn reply(request: &Packet, kind: MessageType, code: MessageClass) -> Vec<u8> {
        let mut packet = Packet::new();
        packet.header.set_type(kind);
        packet.header.code = code;
        packet.header.message_id = request.header.message_id;
        packet.set_token(request.get_token().to_vec());
        packet.to_bytes().unwrap()
    }

    #[tokio::test]
    async fn test_unresolvable_host_falls_back_to_literal() {
        let client = CoapClient::open("no-such-host.invalid".to_string(), 5683, quick_config(0))
            .await
            .unwrap();
        assert_eq!(client.target(), "no-such-host.invalid");
    }

    #[tokio::test]
    async fn test_ip_literal_is_kept() {
        let client = CoapClient::open("127.0.0.1".to_string(), 5683, quick_config(0))
            .await
            .unwrap();
        assert_eq!(client.target(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_publish_piggybacked_response() {
        let (socket, port) = server().await;
        let peer = tokio::spawn(async move {
            let (request, from) = recv_packet(&socket).await;
            let bytes = reply(
                &request,
                MessageType::Acknowledgement,
                MessageClass::Response(ResponseType::Changed),
            );
            socket.send_to(&bytes, from).await.unwrap();
            request
        });

        let mut client = CoapClient::open("127.0.0.1".to_string(), port, quick_config(2))
            .await
            .unwrap();
        let response = client
            .publish("api/v1/ABC123/telemetry", br#"{"humidity":20.0,"temperature":25.0}"#)
            .await
            .unwrap();
        let request = peer.await.unwrap();

        assert_eq!(response.code, "Changed");
        assert_eq!(request.header.get_type(), MessageType::Confirmable);
        assert!(matches!(
            request.header.code,
            MessageClass::Request(RequestType::Post)
        ));
        assert_eq!(uri_path(&request), "api/v1/ABC123/telemetry");
        assert_eq!(request.payload, br#"{"humidity":20.0,"temperature":25.0}"#.to_vec());
    }

    #[tokio::test]
    async fn test_lost_request_is_retransmitted() {
        let (socket, port) = server().await;
        let peer = tokio::spawn(async move {
            let (first, _) = recv_packet(&socket).await;
            let (second, from) = recv_packet(&socket).await;
            assert_eq!(first.header.message_id, second.header.message_id);
            let bytes = reply(
                &second,
                MessageType::Acknowledgement,
                MessageClass::Response(ResponseType::Created),
            );
            socket.send_to(&bytes, from).await.unwrap();
        });

        let mut client = CoapClient::open("127.0.0.1".to_string(), port, quick_config(2))
            .await
            .unwrap();
        let response = client.publish("api/v1/T/telemetry", b"{}").await.unwrap();
        peer.await.unwrap();

        assert_eq!(response.code, "Created");
    }

    #[tokio::test]
    async fn test_separate_response_is_acknowledged() {
        let (socket, port) = server().await;
        let peer = tokio::spawn(async move {
            let (request, from) = recv_packet(&socket).await;
            let empty_ack = reply(&request, MessageType::Acknowledgement, MessageClass::Empty);
            socket.send_to(&empty_ack, from).await.unwrap();

            let mut separate = Packet::new();
            separate.header.set_type(MessageType::Confirmable);
            separate.header.code = MessageClass::Response(ResponseType::Changed);
            separate.header.message_id = request.header.message_id.wrapping_add(1000);
            separate.set_token(request.get_token().to_vec());
            separate.payload = b"ok".to_vec();
            socket.send_to(&separate.to_bytes().unwrap(), from).await.unwrap();

            let (ack, _) = recv_packet(&socket).await;
            (ack, separate.header.message_id)
        });

        let mut client = CoapClient::open("127.0.0.1".to_string(), port, quick_config(0))
            .await
            .unwrap();
        let response = client.publish("api/v1/T/telemetry", b"{}").await.unwrap();
        let (ack, separate_id) = peer.await.unwrap();

        assert_eq!(response.payload, b"ok".to_vec());
        assert_eq!(ack.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(ack.header.message_id, separate_id);
    }

    #[tokio::test]
    async fn test_duplicate_ack_keeps_waiting_for_response() {
        let (socket, port) = server().await;
        let peer = tokio::spawn(async move {
            // Drop the first transmission, acknowledge the retransmission twice.
            let _ = recv_packet(&socket).await;
            let (request, from) = recv_packet(&socket).await;
            let empty_ack = reply(&request, MessageType::Acknowledgement, MessageClass::Empty);
            socket.send_to(&empty_ack, from).await.unwrap();
            socket.send_to(&empty_ack, from).await.unwrap();

            tokio::time::sleep(Duration::from_millis(200)).await;
            let mut separate = Packet::new();
            separate.header.set_type(MessageType::NonConfirmable);
            separate.header.code = MessageClass::Response(ResponseType::Changed);
            separate.header.message_id = request.header.message_id.wrapping_add(7);
            separate.set_token(request.get_token().to_vec());
            separate.payload = b"late".to_vec();
            socket.send_to(&separate.to_bytes().unwrap(), from).await.unwrap();
        });

        let mut client = CoapClient::open("127.0.0.1".to_string(), port, quick_config(2))
            .await
            .unwrap();
        let response = client.publish("api/v1/T/telemetry", b"{}").await.unwrap();
        peer.await.unwrap();

        assert_eq!(response.code, "Changed");
        assert_eq!(response.payload, b"late".to_vec());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (_socket, port) = server().await;

        let mut client = CoapClient::open("127.0.0.1".to_string(), port, quick_config(0))
            .await
            .unwrap();
        let result = client.publish("api/v1/T/telemetry", b"{}").await;

        assert!(matches!(
            result,
            Err(TransportError::Timeout { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut client = CoapClient::open("127.0.0.1".to_string(), 5683, quick_config(0))
            .await
            .unwrap();
        client.close().await;
        client.close().await;

        let result = client.publish("api/v1/T/telemetry", b"{}").await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
