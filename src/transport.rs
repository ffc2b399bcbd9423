//! Transport layer: one duplex byte stream to the Xcom gateway.
//!
//! All variants funnel into the same send/receive contract consumed by the
//! request engine:
//!
//! - **TCP** (`TcpTransport`): the Moxa gateway dials *us*; we bind a local
//!   port and wait for its inbound connection.
//! - **UDP** (`UdpTransport`): request/response datagrams with a fixed
//!   remote gateway address.
//! - **Serial** (`SerialTransport`): the Xcom-RS232i framed serial link.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{info, trace, warn};

use crate::constants::{DEFAULT_SERIAL_BAUDRATE, STOP_TIMEOUT};
use crate::error::{XcomError, XcomResult};
use crate::protocol::XcomPackage;

/// Largest datagram we accept from the gateway; comfortably above the
/// biggest multi-info response (8 + 76*7 bytes plus framing)
const MAX_DATAGRAM_SIZE: usize = 2048;

/// Format raw bytes as hex for packet traces
fn log_packet(direction: &str, data: &[u8]) {
    trace!("[XCOM] {} {} bytes ({})", direction, data.len(), hex::encode(data));
}

/// A duplex connection to the Xcom gateway.
///
/// Implementations own exactly one connection; the request engine wraps the
/// transport in a lock so wire traffic is never interleaved.
#[async_trait]
pub trait XcomTransport: Send {
    /// Write one serialized package to the gateway
    async fn send(&mut self, package: &XcomPackage) -> XcomResult<()>;

    /// Read the next complete package from the gateway.
    ///
    /// Blocks until a package arrives or the connection fails; callers bound
    /// the wait with their own deadline.
    async fn receive(&mut self) -> XcomResult<XcomPackage>;

    /// Local connection state; does not probe the remote end
    fn is_connected(&self) -> bool;

    /// Description of the connected peer, if any
    fn peer(&self) -> Option<String>;

    /// Close the connection
    async fn close(&mut self) -> XcomResult<()>;
}

/// Xcom-LAN TCP transport. The gateway is the TCP *client*: it connects to
/// the port we listen on.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    remote: Option<SocketAddr>,
    local_port: u16,
}

impl TcpTransport {
    /// Bind `port` and wait up to `start_timeout` for the gateway to
    /// connect.
    pub async fn accept(port: u16, start_timeout: Duration) -> XcomResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| XcomError::connection(format!("Failed to bind port {port}: {e}")))?;

        info!("Xcom TCP server listening on port {port}, waiting for gateway to connect");

        let (stream, remote) = timeout(start_timeout, listener.accept())
            .await
            .map_err(|_| XcomError::timeout("waiting for gateway connection", start_timeout))?
            .map_err(|e| XcomError::connection(format!("Accept failed on port {port}: {e}")))?;

        stream
            .set_nodelay(true)
            .map_err(|e| XcomError::connection(format!("Failed to set nodelay: {e}")))?;

        info!("Connected to Xcom gateway '{remote}'");

        Ok(TcpTransport {
            stream: Some(stream),
            remote: Some(remote),
            local_port: port,
        })
    }

    /// Wrap an already-accepted gateway connection
    pub fn from_stream(stream: TcpStream) -> Self {
        let remote = stream.peer_addr().ok();
        let local_port = stream.local_addr().map(|a| a.port()).unwrap_or(0);
        TcpTransport {
            stream: Some(stream),
            remote,
            local_port,
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

#[async_trait]
impl XcomTransport for TcpTransport {
    async fn send(&mut self, package: &XcomPackage) -> XcomResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| XcomError::connection("No gateway connection"))?;

        let data = package.to_bytes();
        log_packet("send", &data);

        stream
            .write_all(&data)
            .await
            .map_err(|e| XcomError::write(format!("Failed to send package to gateway: {e}")))
    }

    async fn receive(&mut self) -> XcomResult<XcomPackage> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| XcomError::connection("No gateway connection"))?;

        XcomPackage::parse(stream).await
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn peer(&self) -> Option<String> {
        self.remote.map(|addr| addr.to_string())
    }

    async fn close(&mut self) -> XcomResult<()> {
        if let Some(mut stream) = self.stream.take() {
            match timeout(STOP_TIMEOUT, stream.shutdown()).await {
                Ok(Err(e)) => warn!("Error while closing gateway connection: {e}"),
                Err(_) => warn!("Timeout while closing gateway connection"),
                Ok(Ok(())) => {}
            }
        }
        self.remote = None;
        Ok(())
    }
}

/// Xcom-LAN UDP transport: datagrams exchanged with a fixed gateway
/// address.
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    remote: SocketAddr,
    local_port: u16,
}

impl UdpTransport {
    /// Bind `local_port` and pair with the gateway at `remote`
    pub async fn bind(remote: SocketAddr, local_port: u16) -> XcomResult<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port)).await.map_err(|e| {
            XcomError::connection(format!("Failed to bind UDP port {local_port}: {e}"))
        })?;

        info!("Xcom UDP socket on port {local_port}, gateway at {remote}");

        Ok(UdpTransport {
            socket: Some(socket),
            remote,
            local_port,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

#[async_trait]
impl XcomTransport for UdpTransport {
    async fn send(&mut self, package: &XcomPackage) -> XcomResult<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| XcomError::connection("UDP socket closed"))?;

        let data = package.to_bytes();
        log_packet("send", &data);

        socket
            .send_to(&data, self.remote)
            .await
            .map_err(|e| XcomError::write(format!("Failed to send datagram to gateway: {e}")))?;
        Ok(())
    }

    async fn receive(&mut self) -> XcomResult<XcomPackage> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| XcomError::connection("UDP socket closed"))?;

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| XcomError::read(format!("Failed to receive datagram: {e}")))?;

        trace!("datagram of {len} bytes from {from}");
        XcomPackage::parse_bytes(&buf[..len]).await
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn peer(&self) -> Option<String> {
        self.socket.as_ref().map(|_| self.remote.to_string())
    }

    async fn close(&mut self) -> XcomResult<()> {
        self.socket = None;
        Ok(())
    }
}

/// Xcom-RS232i serial transport
pub struct SerialTransport {
    port: Option<SerialStream>,
    port_name: String,
    baud_rate: u32,
}

impl SerialTransport {
    /// Open the serial link with the default baudrate (115200 8N1)
    pub fn open(port: &str) -> XcomResult<Self> {
        Self::open_with_baudrate(port, DEFAULT_SERIAL_BAUDRATE)
    }

    pub fn open_with_baudrate(port: &str, baud_rate: u32) -> XcomResult<Self> {
        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .open_native_async()
            .map_err(|e| {
                XcomError::connection(format!("Failed to open serial port {port}: {e}"))
            })?;

        info!("Xcom serial connection via {port} at {baud_rate} baud");

        Ok(SerialTransport {
            port: Some(stream),
            port_name: port.to_string(),
            baud_rate,
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[async_trait]
impl XcomTransport for SerialTransport {
    async fn send(&mut self, package: &XcomPackage) -> XcomResult<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| XcomError::connection("Serial port not open"))?;

        let data = package.to_bytes();
        log_packet("send", &data);

        port.write_all(&data)
            .await
            .map_err(|e| XcomError::write(format!("Failed to send package on serial link: {e}")))?;
        port.flush()
            .await
            .map_err(|e| XcomError::write(format!("Failed to flush serial link: {e}")))
    }

    async fn receive(&mut self) -> XcomResult<XcomPackage> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| XcomError::connection("Serial port not open"))?;

        XcomPackage::parse(port).await
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn peer(&self) -> Option<String> {
        self.port.as_ref().map(|_| self.port_name.clone())
    }

    async fn close(&mut self) -> XcomResult<()> {
        // dropping the stream releases the port
        self.port = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{addr, ObjectType, PropertyId, ServiceId};

    fn probe_package() -> XcomPackage {
        XcomPackage::request(
            ServiceId::Read,
            ObjectType::Info,
            3023,
            PropertyId::Value,
            vec![],
            addr::SOURCE,
            101,
        )
    }

    #[tokio::test]
    async fn test_tcp_accept_times_out_without_gateway() {
        let result = TcpTransport::accept(0, Duration::from_millis(100)).await;
        match result {
            Err(XcomError::Timeout { .. }) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tcp_send_receive_round_trip() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            TcpTransport::from_stream(stream)
        });

        let mut gateway = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut transport = accept_task.await.unwrap();
        assert!(transport.is_connected());
        assert!(transport.peer().is_some());

        // client -> gateway
        let request = probe_package();
        transport.send(&request).await.unwrap();
        let seen = XcomPackage::parse(&mut gateway).await.unwrap();
        assert_eq!(seen, request);

        // gateway -> client
        let mut response = request.clone();
        response.frame.service_flags = 0x02;
        gateway.write_all(&response.to_bytes()).await.unwrap();
        let received = transport.receive().await.unwrap();
        assert!(received.is_response());

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        assert!(transport.send(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_udp_send_receive_round_trip() {
        let gateway = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let gateway_addr = gateway.local_addr().unwrap();

        let mut transport = UdpTransport::bind(gateway_addr, 0).await.unwrap();
        let local_addr = transport.local_addr().unwrap();

        let request = probe_package();
        transport.send(&request).await.unwrap();

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = gateway.recv_from(&mut buf).await.unwrap();
        let seen = XcomPackage::parse_bytes(&buf[..len]).await.unwrap();
        assert_eq!(seen, request);

        let mut response = request.clone();
        response.frame.service_flags = 0x02;
        gateway
            .send_to(&response.to_bytes(), ("127.0.0.1", local_addr.port()))
            .await
            .unwrap();
        let received = transport.receive().await.unwrap();
        assert!(received.is_response());

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }
}
