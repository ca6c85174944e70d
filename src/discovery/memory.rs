//! In-process discovery backend.
//!
//! Keeps registered instances in a concurrent map and records every call in
//! order, so tests and single-process setups can observe what the server
//! announced and when. Failures can be injected per operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::discovery::{Discovery, DiscoveryError, ServiceDescriptor};

/// One call observed by [`InMemoryDiscovery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Registered(ServiceDescriptor),
    Unregistered(ServiceDescriptor),
}

#[derive(Debug, Default)]
pub struct InMemoryDiscovery {
    instances: DashMap<String, ServiceDescriptor>,
    events: Mutex<Vec<DiscoveryEvent>>,
    fail_register: AtomicBool,
    fail_unregister: AtomicBool,
}

fn key(service: &ServiceDescriptor) -> String {
    format!("{}/{}", service.app_id, service.address)
}

impl InMemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `register` fail.
    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    /// Make every following `unregister` fail.
    pub fn fail_unregister(&self, fail: bool) {
        self.fail_unregister.store(fail, Ordering::SeqCst);
    }

    /// Currently registered instances of `app_id`.
    pub fn instances(&self, app_id: &str) -> Vec<ServiceDescriptor> {
        let mut found: Vec<_> = self
            .instances
            .iter()
            .filter(|entry| entry.value().app_id == app_id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.address.cmp(&b.address));
        found
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Every call seen so far, oldest first.
    pub fn events(&self) -> Vec<DiscoveryEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    fn push(&self, event: DiscoveryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl Discovery for InMemoryDiscovery {
    async fn register(&self, service: &ServiceDescriptor) -> Result<(), DiscoveryError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Unavailable("injected register failure".to_string()));
        }
        self.instances.insert(key(service), service.clone());
        self.push(DiscoveryEvent::Registered(service.clone()));
        Ok(())
    }

    async fn unregister(&self, service: &ServiceDescriptor) -> Result<(), DiscoveryError> {
        self.push(DiscoveryEvent::Unregistered(service.clone()));
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Unavailable("injected unregister failure".to_string()));
        }
        match self.instances.remove(&key(service)) {
            Some(_) => Ok(()),
            None => Err(DiscoveryError::NotRegistered(service.to_string())),
        }
    }
}
