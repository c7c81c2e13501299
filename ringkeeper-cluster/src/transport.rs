//! Channel and server setup shared by every dialer and listener.

use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use std::future::Future;
use std::time::Duration;
use tonic::transport::{
    Certificate, Channel, ClientTlsConfig, Endpoint, Identity, Server, ServerTlsConfig,
};

/// Dial timeout for every outgoing connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// How outgoing connections are made.
#[derive(Debug, Clone, Default)]
pub struct Transport {
    tls: Option<ClientTlsConfig>,
}

impl Transport {
    /// Plaintext HTTP/2 connections.
    pub fn plaintext() -> Self {
        Self::default()
    }

    /// Transport for a service, using TLS when configured.
    pub fn from_config(config: &ClusterConfig) -> ClusterResult<Self> {
        if !config.use_tls {
            return Ok(Self::plaintext());
        }
        let ca_file = config
            .ca_file
            .as_ref()
            .ok_or_else(|| ClusterError::Config("use_tls requires ca_file".to_string()))?;
        let ca = std::fs::read(ca_file).map_err(|e| ClusterError::storage(ca_file, e))?;
        Ok(Self {
            tls: Some(ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca))),
        })
    }

    /// Build an endpoint for `addr` (`host:port`, or a full URI).
    pub fn endpoint(&self, addr: &str) -> ClusterResult<Endpoint> {
        let uri = if addr.contains("://") {
            addr.to_string()
        } else if self.tls.is_some() {
            format!("https://{addr}")
        } else {
            format!("http://{addr}")
        };

        let mut endpoint = Channel::from_shared(uri)
            .map_err(|e| ClusterError::Config(format!("bad address '{addr}': {e}")))?
            .connect_timeout(DIAL_TIMEOUT);
        if let Some(tls) = &self.tls {
            endpoint = endpoint.tls_config(tls.clone())?;
        }
        Ok(endpoint)
    }

    /// Connect to `addr`, giving up after `limit`.
    pub async fn connect(&self, addr: &str, limit: Duration) -> ClusterResult<Channel> {
        let endpoint = self.endpoint(addr)?;
        match tokio::time::timeout(limit, endpoint.connect()).await {
            Ok(channel) => Ok(channel?),
            Err(_) => Err(ClusterError::Timeout {
                operation: "dial",
                elapsed: limit,
            }),
        }
    }
}

/// A server builder, with TLS applied when configured.
pub fn server_builder(config: &ClusterConfig) -> ClusterResult<Server> {
    if !config.use_tls {
        return Ok(Server::builder());
    }

    let (cert_file, key_file) = match (&config.cert_file, &config.key_file) {
        (Some(cert), Some(key)) => (cert, key),
        _ => {
            return Err(ClusterError::Config(
                "use_tls requires cert_file and key_file".to_string(),
            ))
        }
    };
    let cert = std::fs::read(cert_file).map_err(|e| ClusterError::storage(cert_file, e))?;
    let key = std::fs::read(key_file).map_err(|e| ClusterError::storage(key_file, e))?;
    let mut tls = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));
    if let Some(ca_file) = &config.ca_file {
        let ca = std::fs::read(ca_file).map_err(|e| ClusterError::storage(ca_file, e))?;
        tls = tls.client_ca_root(Certificate::from_pem(ca));
    }

    Ok(Server::builder().tls_config(tls)?)
}

/// Await a unary call, failing with [`ClusterError::Timeout`] after `limit`.
pub async fn call<T, F>(operation: &'static str, limit: Duration, call: F) -> ClusterResult<T>
where
    F: Future<Output = Result<tonic::Response<T>, tonic::Status>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(response) => Ok(response?.into_inner()),
        Err(_) => Err(ClusterError::Timeout {
            operation,
            elapsed: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_scheme() {
        let transport = Transport::plaintext();
        let endpoint = transport.endpoint("127.0.0.1:4444").unwrap();
        assert_eq!(endpoint.uri().scheme_str(), Some("http"));
        assert_eq!(endpoint.uri().port_u16(), Some(4444));

        let endpoint = transport.endpoint("http://10.0.0.1:9").unwrap();
        assert_eq!(endpoint.uri().host(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Transport::plaintext()
            .connect(&addr.to_string(), DIAL_TIMEOUT)
            .await;
        assert!(result.is_err());
    }
}
