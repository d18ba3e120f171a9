use std::{
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use super::{MetricId, ProviderError, SensorProvider, SensorReading, PING_LATENCY};

/// Round-trip latency measured as the time to complete a TCP connect.
pub struct PingProvider {
    target: String,
    timeout: Duration,
}

impl PingProvider {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    fn resolve(&self) -> Result<SocketAddr, ProviderError> {
        self.target
            .to_socket_addrs()
            .map_err(|e| ProviderError::Unavailable(format!("cannot resolve {}: {e}", self.target)))?
            .next()
            .ok_or_else(|| ProviderError::Unavailable(format!("{} has no address", self.target)))
    }
}

impl SensorProvider for PingProvider {
    fn name(&self) -> &str {
        "ping"
    }

    fn metrics(&self) -> Vec<MetricId> {
        vec![PING_LATENCY.into()]
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        let addr = self.resolve()?;
        let started = Instant::now();
        match TcpStream::connect_timeout(&addr, self.timeout) {
            Ok(_) => {
                let ms = started.elapsed().as_secs_f64() * 1000.0;
                Ok(vec![SensorReading::number(PING_LATENCY, ms, "ms")])
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(ProviderError::Timeout(self.timeout))
            }
            Err(e) => Err(ProviderError::Unavailable(format!("{addr}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn measures_local_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let mut provider = PingProvider::new(target, Duration::from_secs(1));
        let readings = provider.read().unwrap();
        assert_eq!(readings[0].metric, MetricId::new(PING_LATENCY));
        assert!(readings[0].value.as_f64().unwrap() >= 0.0);
    }

    #[test]
    fn refused_connect_is_an_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut provider = PingProvider::new(format!("127.0.0.1:{port}"), Duration::from_secs(1));
        assert!(provider.read().is_err());
    }

    #[test]
    fn unresolvable_target() {
        let mut provider = PingProvider::new("not an address", Duration::from_millis(100));
        assert!(matches!(provider.read(), Err(ProviderError::Unavailable(_))));
    }
}
