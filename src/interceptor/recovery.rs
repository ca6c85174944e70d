//! Panic recovery.
//!
//! A panic anywhere below this interceptor (inner interceptors, the handler,
//! or a response stream being polled) is caught, logged and turned into an
//! `INTERNAL` status for that call only.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use tonic::Status;

use crate::interceptor::call::{PayloadStream, StreamCall, StreamResult, UnaryCall, UnaryResult};
use crate::interceptor::chain::{StreamInterceptor, StreamNext, UnaryInterceptor, UnaryNext};

/// Best-effort text of a panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn recovered(method: &str, panic: Box<dyn Any + Send>) -> Status {
    let message = panic_message(panic.as_ref());
    tracing::error!(method = %method, panic = %message, "recovered from panic in rpc handler");
    Status::internal(format!("panic: {message}"))
}

/// Third default interceptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicRecovery;

#[async_trait]
impl UnaryInterceptor for PanicRecovery {
    fn name(&self) -> &'static str {
        "panic_recovery"
    }

    async fn intercept(&self, call: UnaryCall, next: UnaryNext) -> UnaryResult {
        let method = call.info.full_method.clone();
        match AssertUnwindSafe(next.run(call)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(recovered(&method, panic).into()),
        }
    }
}

#[async_trait]
impl StreamInterceptor for PanicRecovery {
    fn name(&self) -> &'static str {
        "panic_recovery"
    }

    async fn intercept(&self, call: StreamCall, next: StreamNext) -> StreamResult {
        let method = call.info.full_method.clone();
        let responses = match AssertUnwindSafe(next.run(call)).catch_unwind().await {
            Ok(result) => result?,
            Err(panic) => return Err(recovered(&method, panic).into()),
        };

        let guarded: PayloadStream = stream! {
            let mut responses = responses;
            loop {
                match AssertUnwindSafe(responses.next()).catch_unwind().await {
                    Ok(Some(item)) => {
                        yield item;
                    }
                    Ok(None) => break,
                    Err(panic) => {
                        yield Err(recovered(&method, panic));
                        break;
                    }
                }
            }
        }
        .boxed();

        Ok(guarded)
    }
}
