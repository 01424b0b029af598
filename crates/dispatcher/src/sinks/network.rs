//! NetworkSink - UDP datagram per event

use contracts::{AccessSink, ContractError, RetryPolicy, SharedEvent};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, instrument};

/// Serialization format for network transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkFormat {
    /// JSON (human-readable, larger)
    #[default]
    Json,
    /// Bincode (binary, compact)
    Bincode,
}

/// Configuration for NetworkSink
#[derive(Debug, Clone)]
pub struct NetworkSinkConfig {
    /// Target address
    pub addr: SocketAddr,
    /// Serialization format
    pub format: NetworkFormat,
    /// Max datagram size (UDP typically 65507 for IPv4)
    pub max_packet_size: usize,
    /// Retries for transient send failures (e.g. ICMP port unreachable)
    pub retry: RetryPolicy,
}

impl NetworkSinkConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            format: NetworkFormat::default(),
            max_packet_size: 65000,
            retry: RetryPolicy::fixed(2, 10),
        }
    }

    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let addr_str = params
            .get("addr")
            .ok_or_else(|| "missing 'addr' parameter".to_string())?;

        let addr: SocketAddr = addr_str
            .parse()
            .map_err(|e| format!("invalid address '{}': {}", addr_str, e))?;

        let format = match params.get("encoding").map(String::as_str) {
            Some("bincode") => NetworkFormat::Bincode,
            Some("json") | None => NetworkFormat::Json,
            Some(other) => return Err(format!("unknown encoding '{}'", other)),
        };

        let mut config = Self::new(addr);
        config.format = format;

        if let Some(size) = params.get("max_packet_size").and_then(|s| s.parse().ok()) {
            config.max_packet_size = size;
        }
        if let Some(retries) = params.get("retries").and_then(|s| s.parse().ok()) {
            config.retry.max_retries = retries;
        }
        if let Some(backoff) = params.get("backoff_ms").and_then(|s| s.parse().ok()) {
            config.retry.backoff_ms = backoff;
        }

        Ok(config)
    }
}

/// Sink that sends each event as one UDP datagram
pub struct NetworkSink {
    name: String,
    config: NetworkSinkConfig,
    socket: Mutex<Option<UdpSocket>>,
}

impl NetworkSink {
    /// Create a new NetworkSink
    #[instrument(name = "network_sink_new", skip(name, config), fields(target = %config.addr))]
    pub fn new(name: impl Into<String>, config: NetworkSinkConfig) -> std::io::Result<Self> {
        let name = name.into();
        // Bind to any available port of the target's family
        let bind_addr: SocketAddr = if config.addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(config.addr)?;

        debug!(
            sink = %name,
            target = %config.addr,
            "NetworkSink connected"
        );

        Ok(Self {
            name,
            config,
            socket: Mutex::new(Some(socket)),
        })
    }

    /// Create from params (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = NetworkSinkConfig::from_params(params)
            .map_err(|e| ContractError::config_validation(format!("sinks[name={name}]"), e))?;

        Self::new(name.as_str(), config)
            .map_err(|e| ContractError::sink_connection(&name, e.to_string()))
    }

    fn serialize_event(&self, event: &SharedEvent) -> Result<Vec<u8>, String> {
        match self.config.format {
            NetworkFormat::Json => {
                serde_json::to_vec(event.as_ref()).map_err(|e| format!("json error: {}", e))
            }
            NetworkFormat::Bincode => {
                bincode::serialize(event.as_ref()).map_err(|e| format!("bincode error: {}", e))
            }
        }
    }

    fn prepare_payload(&self, event: &SharedEvent) -> Result<Vec<u8>, ContractError> {
        let data = self
            .serialize_event(event)
            .map_err(|e| ContractError::sink_write(&self.name, e))?;

        if data.len() > self.config.max_packet_size {
            return Err(ContractError::sink_write(
                &self.name,
                format!(
                    "datagram of {} bytes exceeds max_packet_size {}",
                    data.len(),
                    self.config.max_packet_size
                ),
            ));
        }

        Ok(data)
    }
}

impl AccessSink for NetworkSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &SharedEvent) -> Result<(), ContractError> {
        let data = self.prepare_payload(event)?;

        let guard = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        let socket = guard
            .as_ref()
            .ok_or_else(|| ContractError::sink_write(&self.name, "socket not connected"))?;

        let sent = socket
            .send(&data)
            .map_err(|e| ContractError::sink_io(&self.name, &e))?;
        debug!(sink = %self.name, bytes = sent, "Sent");
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.config.retry
    }

    #[instrument(name = "network_sink_close", skip(self), fields(sink = %self.name))]
    fn close(&self) -> Result<(), ContractError> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(sink = %self.name, "NetworkSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::mock::{self, MockRequest, MockResponse};
    use contracts::AccessEvent;
    use std::sync::Arc;
    use std::time::Duration;

    fn receiver() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    fn event() -> SharedEvent {
        Arc::new(mock::freeze(
            &mut MockRequest::get("/ping?n=1"),
            &MockResponse::ok(4),
        ))
    }

    #[test]
    fn test_network_sink_config_parsing() {
        let mut params = HashMap::new();
        params.insert("addr".to_string(), "127.0.0.1:9999".to_string());
        params.insert("encoding".to_string(), "bincode".to_string());
        params.insert("retries".to_string(), "5".to_string());

        let config = NetworkSinkConfig::from_params(&params).unwrap();
        assert_eq!(config.addr.port(), 9999);
        assert_eq!(config.format, NetworkFormat::Bincode);
        assert_eq!(config.retry.max_retries, 5);

        params.insert("encoding".to_string(), "xml".to_string());
        assert!(NetworkSinkConfig::from_params(&params).is_err());
    }

    #[test]
    fn test_json_datagram() {
        let (rx, addr) = receiver();
        let sink = NetworkSink::new("test_net", NetworkSinkConfig::new(addr)).unwrap();

        sink.deliver(&event()).unwrap();

        let mut buf = [0u8; 65536];
        let n = rx.recv(&mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(value["request_uri"], "/ping");
        assert_eq!(value["query_string"], "?n=1");
    }

    #[test]
    fn test_bincode_datagram() {
        let (rx, addr) = receiver();
        let mut config = NetworkSinkConfig::new(addr);
        config.format = NetworkFormat::Bincode;
        let sink = NetworkSink::new("test_net", config).unwrap();

        let sent = event();
        sink.deliver(&sent).unwrap();

        let mut buf = [0u8; 65536];
        let n = rx.recv(&mut buf).unwrap();
        let back: AccessEvent = bincode::deserialize(&buf[..n]).unwrap();
        assert_eq!(back.request_url(), sent.request_url());
        assert_eq!(back.status_code(), 200);
    }

    #[test]
    fn test_oversized_datagram_rejected() {
        let (_rx, addr) = receiver();
        let mut config = NetworkSinkConfig::new(addr);
        config.max_packet_size = 16;
        let sink = NetworkSink::new("tiny", config).unwrap();

        let err = sink.deliver(&event()).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_deliver_after_close_fails() {
        let (_rx, addr) = receiver();
        let sink = NetworkSink::new("closing", NetworkSinkConfig::new(addr)).unwrap();
        sink.close().unwrap();
        assert!(sink.deliver(&event()).is_err());
    }
}
