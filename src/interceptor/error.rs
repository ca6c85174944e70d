//! Error-code translation.
//!
//! Handlers may fail with anything that converts into [`BoxError`]. On the
//! way out every error becomes a structured [`Status`]:
//! - a `Status` passes through unchanged
//! - an [`RpcError`] keeps its code and message
//! - a `garde` validation [`Report`] becomes `INVALID_ARGUMENT`
//! - anything else becomes `INVALID_ARGUMENT` with the original message

use async_trait::async_trait;
use garde::Report;
use thiserror::Error;
use tonic::{Code, Status};

use crate::interceptor::call::{BoxError, StreamCall, StreamResult, UnaryCall, UnaryResult};
use crate::interceptor::chain::{StreamInterceptor, StreamNext, UnaryInterceptor, UnaryNext};
use crate::interceptor::validate::describe;

/// A handler error that carries the status code it should surface with.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RpcError {
    pub code: Code,
    pub message: String,
}

impl RpcError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

}

impl From<RpcError> for Status {
    fn from(err: RpcError) -> Self {
        Status::new(err.code, err.message)
    }
}

/// The code `err` will surface with once translated.
pub fn code_of(err: &BoxError) -> Code {
    if let Some(status) = err.downcast_ref::<Status>() {
        status.code()
    } else if let Some(rpc) = err.downcast_ref::<RpcError>() {
        rpc.code
    } else {
        Code::InvalidArgument
    }
}

/// Convert any handler error into a structured status.
pub fn into_status(err: BoxError) -> Status {
    let err = match err.downcast::<Status>() {
        Ok(status) => return *status,
        Err(err) => err,
    };
    let err = match err.downcast::<RpcError>() {
        Ok(rpc) => return (*rpc).into(),
        Err(err) => err,
    };
    match err.downcast::<Report>() {
        Ok(report) => Status::invalid_argument(describe(&report)),
        Err(other) => Status::invalid_argument(other.to_string()),
    }
}

/// Outermost default interceptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTranslation;

#[async_trait]
impl UnaryInterceptor for ErrorTranslation {
    fn name(&self) -> &'static str {
        "error_translation"
    }

    async fn intercept(&self, call: UnaryCall, next: UnaryNext) -> UnaryResult {
        next.run(call).await.map_err(|err| into_status(err).into())
    }
}

#[async_trait]
impl StreamInterceptor for ErrorTranslation {
    fn name(&self) -> &'static str {
        "error_translation"
    }

    async fn intercept(&self, call: StreamCall, next: StreamNext) -> StreamResult {
        next.run(call).await.map_err(|err| into_status(err).into())
    }
}
