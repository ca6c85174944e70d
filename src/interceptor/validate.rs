//! Request validation.
//!
//! Request types declare their rules with `garde`
//! (`#[derive(garde::Validate)]` and `#[garde(...)]` field attributes).
//! Methods registered through the `validated_*` builders carry those rules
//! in their payload; the [`RequestValidation`] interceptor runs them before
//! the handler and fails the call with `INVALID_ARGUMENT` on the first
//! violating request. Requests that declare no rules pass straight through.

use async_trait::async_trait;
use futures_util::StreamExt;
use garde::Report;
use tonic::Status;

use crate::interceptor::call::{Payload, StreamCall, StreamResult, UnaryCall, UnaryResult};
use crate::interceptor::chain::{StreamInterceptor, StreamNext, UnaryInterceptor, UnaryNext};

pub use garde::Validate;

/// One line per report: `name: length is lower than 1; age: ...`.
pub fn describe(report: &Report) -> String {
    report
        .to_string()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

fn check(payload: &Payload) -> Result<(), Status> {
    match payload.validate() {
        Some(Err(report)) => Err(Status::invalid_argument(describe(&report))),
        _ => Ok(()),
    }
}

/// Installable interceptor enforcing declared request rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestValidation;

#[async_trait]
impl UnaryInterceptor for RequestValidation {
    fn name(&self) -> &'static str {
        "request_validation"
    }

    async fn intercept(&self, call: UnaryCall, next: UnaryNext) -> UnaryResult {
        if let Err(status) = check(&call.request) {
            tracing::info!(method = %call.info.full_method, reason = %status.message(), "request rejected");
            return Err(status.into());
        }
        next.run(call).await
    }
}

#[async_trait]
impl StreamInterceptor for RequestValidation {
    fn name(&self) -> &'static str {
        "request_validation"
    }

    async fn intercept(&self, mut call: StreamCall, next: StreamNext) -> StreamResult {
        let method = call.info.full_method.clone();
        call.requests = call
            .requests
            .map(move |item| {
                item.and_then(|payload| {
                    check(&payload).map(|()| payload).inspect_err(|status| {
                        tracing::info!(method = %method, reason = %status.message(), "stream message rejected");
                    })
                })
            })
            .boxed();
        next.run(call).await
    }
}
