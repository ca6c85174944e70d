//! Advertised address resolution for bound services.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::ENV_APP_ID;
use crate::discovery::ServiceDescriptor;
use crate::error::ServerError;
use crate::service::intranet::intranet_ip;

/// Source of this machine's intranet address.
pub type IntranetResolver = Arc<dyn Fn() -> io::Result<IpAddr> + Send + Sync>;

/// Split `host:port` on the last `:`, so `[::]:8000` keeps its brackets.
pub fn split_host_port(address: &str) -> Option<(&str, &str)> {
    address.rsplit_once(':')
}

/// Hosts that mean "every interface" and can't be advertised as is.
pub fn is_wildcard_host(host: &str) -> bool {
    matches!(host, "" | "0.0.0.0" | "::" | "[::]")
}

/// Application id to synthesize a descriptor from when none was bound:
/// the configured one, else `RPC_APP_ID` from the environment.
pub fn default_app_id(configured: Option<&str>) -> Option<String> {
    configured
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_APP_ID).ok())
        .filter(|id| !id.trim().is_empty())
}

/// Fills in the advertised address of descriptors that don't carry one.
#[derive(Clone)]
pub struct ServiceBinder {
    listen_address: String,
    resolver: IntranetResolver,
}

impl ServiceBinder {
    pub fn new(listen_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            resolver: Arc::new(intranet_ip),
        }
    }

    /// Replace the interface lookup, mainly for tests.
    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn() -> io::Result<IpAddr> + Send + Sync + 'static,
    {
        self.resolver = Arc::new(resolver);
        self
    }

    /// The address descriptors without one are advertised at.
    ///
    /// A wildcard host becomes the intranet address with the configured
    /// port; any other listen address is used verbatim.
    pub fn advertised_address(&self) -> Result<String, ServerError> {
        let Some((host, port)) = split_host_port(&self.listen_address) else {
            return Ok(self.listen_address.clone());
        };
        if !is_wildcard_host(host) {
            return Ok(self.listen_address.clone());
        }
        let ip = (self.resolver)().map_err(|e| ServerError::IntranetAddress(Arc::new(e)))?;
        Ok(match ip {
            IpAddr::V4(v4) => format!("{v4}:{port}"),
            IpAddr::V6(v6) => format!("[{v6}]:{port}"),
        })
    }

    /// Resolve every descriptor's advertised address.
    ///
    /// The intranet lookup only happens when some descriptor needs it.
    pub fn bind(
        &self,
        services: Vec<ServiceDescriptor>,
    ) -> Result<Vec<ServiceDescriptor>, ServerError> {
        if services.iter().all(|s| !s.address.is_empty()) {
            return Ok(services);
        }
        let advertised = self.advertised_address()?;
        Ok(services
            .into_iter()
            .map(|mut service| {
                if service.address.is_empty() {
                    service.address = advertised.clone();
                }
                service
            })
            .collect())
    }
}

impl std::fmt::Debug for ServiceBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBinder")
            .field("listen_address", &self.listen_address)
            .finish_non_exhaustive()
    }
}
