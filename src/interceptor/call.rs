//! Call types flowing through the interceptor chain.
//!
//! Messages are type-erased into [`Payload`] so interceptors can be written
//! once for every method. The transport wraps the decoded request before the
//! chain runs and unwraps the response after it.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use tonic::metadata::MetadataMap;
use tonic::Status;

use garde::{Report, Validate};

/// Error type handlers and interceptors return before translation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a unary call while it is inside the chain.
pub type UnaryResult = Result<Payload, BoxError>;

/// A stream of messages in either direction of a streaming call.
pub type PayloadStream = BoxStream<'static, Result<Payload, Status>>;

/// Result of opening a streaming call while it is inside the chain.
pub type StreamResult = Result<PayloadStream, BoxError>;

/// Shape of an RPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Unary => "unary",
            CallKind::ServerStreaming => "server_streaming",
            CallKind::ClientStreaming => "client_streaming",
            CallKind::BidiStreaming => "bidi_streaming",
        }
    }

    pub fn is_streaming(&self) -> bool {
        !matches!(self, CallKind::Unary)
    }
}

/// Identity of the method being called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    /// Full method path, e.g. `/echo.Echo/Say`.
    pub full_method: String,
    pub kind: CallKind,
    /// Remote address, when the transport knows it.
    pub peer: Option<SocketAddr>,
}

impl CallInfo {
    pub fn new(full_method: impl Into<String>, kind: CallKind) -> Self {
        Self {
            full_method: full_method.into(),
            kind,
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    /// `echo.Echo` for `/echo.Echo/Say`.
    pub fn service(&self) -> &str {
        self.split().0
    }

    /// `Say` for `/echo.Echo/Say`.
    pub fn method(&self) -> &str {
        self.split().1
    }

    fn split(&self) -> (&str, &str) {
        let path = self.full_method.trim_start_matches('/');
        path.rsplit_once('/').unwrap_or(("", path))
    }
}

type ValidateFn = fn(&(dyn Any + Send + Sync)) -> Result<(), Report>;

/// A type-erased RPC message.
///
/// A payload built with [`Payload::validated`] remembers the validation
/// rules of its concrete type so the validation interceptor can run them
/// without knowing the type.
pub struct Payload {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
    validator: Option<ValidateFn>,
}

impl Payload {
    /// Wrap a message that declares no validation rules.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: std::any::type_name::<T>(),
            validator: None,
        }
    }

    /// Wrap a message whose [`Validate`] rules should be enforced.
    pub fn validated<T>(value: T) -> Self
    where
        T: Validate + Any + Send + Sync,
        T::Context: Default,
    {
        Self {
            validator: Some(run_rules::<T>),
            ..Self::new(value)
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    /// Take the concrete message back out, or get the payload back on a
    /// type mismatch.
    pub fn downcast<T: Any>(self) -> Result<T, Payload> {
        let Payload {
            value,
            type_name,
            validator,
        } = self;
        match value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Payload {
                value,
                type_name,
                validator,
            }),
        }
    }

    /// Run the declared rules. `None` when the message declares none.
    pub fn validate(&self) -> Option<Result<(), Report>> {
        self.validator.map(|rules| rules(self.value.as_ref()))
    }
}

fn run_rules<T>(value: &(dyn Any + Send + Sync)) -> Result<(), Report>
where
    T: Validate + Any,
    T::Context: Default,
{
    match value.downcast_ref::<T>() {
        Some(message) => message.validate(),
        None => Ok(()),
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type", &self.type_name)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

/// A unary call on its way to the handler.
#[derive(Debug)]
pub struct UnaryCall {
    pub info: CallInfo,
    pub metadata: MetadataMap,
    pub request: Payload,
}

impl UnaryCall {
    pub fn new(info: CallInfo, request: Payload) -> Self {
        Self {
            info,
            metadata: MetadataMap::new(),
            request,
        }
    }
}

/// A streaming call on its way to the handler.
///
/// For server-streaming methods `requests` yields exactly one message.
pub struct StreamCall {
    pub info: CallInfo,
    pub metadata: MetadataMap,
    pub requests: PayloadStream,
}

impl StreamCall {
    pub fn new(info: CallInfo, requests: PayloadStream) -> Self {
        Self {
            info,
            metadata: MetadataMap::new(),
            requests,
        }
    }
}

impl fmt::Debug for StreamCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCall")
            .field("info", &self.info)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// The innermost step of a unary call: the handler itself.
pub trait UnaryEndpoint: Send + Sync + 'static {
    fn call(&self, call: UnaryCall) -> BoxFuture<'static, UnaryResult>;
}

/// The innermost step of a streaming call.
pub trait StreamEndpoint: Send + Sync + 'static {
    fn call(&self, call: StreamCall) -> BoxFuture<'static, StreamResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, garde::Validate)]
    struct Ping {
        #[garde(length(min = 1))]
        name: String,
    }

    #[test]
    fn call_info_splits_full_method() {
        let info = CallInfo::new("/echo.Echo/Say", CallKind::Unary);
        assert_eq!(info.service(), "echo.Echo");
        assert_eq!(info.method(), "Say");
    }

    #[test]
    fn downcast_mismatch_returns_payload() {
        let payload = Payload::new(7u32);
        let payload = payload.downcast::<String>().unwrap_err();
        assert_eq!(payload.downcast::<u32>().unwrap(), 7);
    }

    #[test]
    fn plain_payload_has_no_rules() {
        let payload = Payload::new(Ping { name: String::new() });
        assert!(payload.validate().is_none());
    }

    #[test]
    fn validated_payload_runs_rules() {
        let payload = Payload::validated(Ping { name: String::new() });
        let report = payload.validate().expect("rules").unwrap_err();
        assert!(report.to_string().contains("name"));
    }
}
