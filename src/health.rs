//! Built-in `grpc.health.v1.Health`, served by `tonic-health`.
//!
//! The server (the empty service name) and every service it exposes report
//! `SERVING` only while the lifecycle is `Listening`, so load balancers
//! checking it stop routing here as soon as draining begins, in step with
//! the discovery unregistration. Names the server does not expose answer
//! `NOT_FOUND`. `Watch` streams follow the same transitions.

use axum::Router;
use tonic_health::server::{health_reporter, HealthReporter};
use tonic_health::ServingStatus;

use crate::lifecycle::LifecycleState;

pub const HEALTH_SERVICE: &str = "grpc.health.v1.Health";

const HEALTH_ROUTE: &str = "/grpc.health.v1.Health/{*method}";

/// Health status matching a lifecycle state.
pub fn serving_status(state: LifecycleState) -> ServingStatus {
    match state {
        LifecycleState::Listening => ServingStatus::Serving,
        LifecycleState::Unbound | LifecycleState::Draining | LifecycleState::Stopped => {
            ServingStatus::NotServing
        }
    }
}

/// Pushes lifecycle transitions into the health service.
#[derive(Clone, Debug)]
pub struct HealthPublisher {
    reporter: HealthReporter,
    services: Vec<String>,
}

impl HealthPublisher {
    /// `services` are full service names (`package.Service`). The empty
    /// name and the health service itself are always reported.
    pub fn new(reporter: HealthReporter, services: impl IntoIterator<Item = String>) -> Self {
        let mut names = vec![String::new(), HEALTH_SERVICE.to_string()];
        for name in services {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Self {
            reporter,
            services: names,
        }
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub async fn publish(&self, state: LifecycleState) {
        let status = serving_status(state);
        for service in &self.services {
            self.reporter.set_service_status(service, status).await;
        }
        tracing::debug!(state = %state, status = ?status, "health status published");
    }
}

/// Mount the health service on `router`. Every service starts out
/// `NOT_SERVING` once the returned publisher reports the first state.
pub fn mount(router: Router, services: impl IntoIterator<Item = String>) -> (Router, HealthPublisher) {
    let (reporter, service) = health_reporter();
    let router = router.route_service(HEALTH_ROUTE, service);
    (router, HealthPublisher::new(reporter, services))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serving_only_while_listening() {
        assert_eq!(serving_status(LifecycleState::Listening), ServingStatus::Serving);
        for state in [LifecycleState::Unbound, LifecycleState::Draining, LifecycleState::Stopped] {
            assert_eq!(serving_status(state), ServingStatus::NotServing);
        }
    }

    #[test]
    fn server_and_health_service_are_always_reported() {
        let (reporter, _service) = health_reporter();
        let publisher = HealthPublisher::new(
            reporter,
            ["echo.Echo".to_string(), HEALTH_SERVICE.to_string()],
        );
        assert_eq!(
            publisher.services(),
            ["".to_string(), HEALTH_SERVICE.to_string(), "echo.Echo".to_string()]
        );
    }
}
