//! Per-call logging.
//!
//! Logs the call identity on entry and the outcome with its latency on exit,
//! and feeds the call metrics. The result is returned untouched.

use std::time::Instant;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use tonic::metadata::MetadataMap;
use tonic::Code;

use crate::interceptor::call::{CallInfo, PayloadStream, StreamCall, StreamResult, UnaryCall, UnaryResult};
use crate::interceptor::chain::{StreamInterceptor, StreamNext, UnaryInterceptor, UnaryNext};
use crate::interceptor::error::code_of;
use crate::observability::metrics;

/// Metadata key carrying the per-request identifier.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// Request id from metadata, or a fresh one for calls that arrive without.
pub fn request_id(metadata: &MetadataMap) -> String {
    metadata
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn peer(info: &CallInfo) -> String {
    info.peer.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Second default interceptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallLogging;

#[async_trait]
impl UnaryInterceptor for CallLogging {
    fn name(&self) -> &'static str {
        "call_logging"
    }

    async fn intercept(&self, call: UnaryCall, next: UnaryNext) -> UnaryResult {
        let info = call.info.clone();
        let request_id = request_id(&call.metadata);
        let started = Instant::now();

        tracing::info!(
            request_id = %request_id,
            method = %info.full_method,
            peer = %peer(&info),
            "rpc call started"
        );

        let result = next.run(call).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    request_id = %request_id,
                    method = %info.full_method,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    "rpc call completed"
                );
                metrics::record_call(&info.full_method, Code::Ok, elapsed);
            }
            Err(err) => {
                let code = code_of(err);
                tracing::error!(
                    request_id = %request_id,
                    method = %info.full_method,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    code = ?code,
                    error = %err,
                    "rpc call failed"
                );
                metrics::record_call(&info.full_method, code, elapsed);
            }
        }

        result
    }
}

#[async_trait]
impl StreamInterceptor for CallLogging {
    fn name(&self) -> &'static str {
        "call_logging"
    }

    async fn intercept(&self, call: StreamCall, next: StreamNext) -> StreamResult {
        let info = call.info.clone();
        let request_id = request_id(&call.metadata);
        let started = Instant::now();

        tracing::info!(
            request_id = %request_id,
            method = %info.full_method,
            kind = info.kind.as_str(),
            peer = %peer(&info),
            "rpc stream opened"
        );

        let responses = match next.run(call).await {
            Ok(responses) => responses,
            Err(err) => {
                let code = code_of(&err);
                tracing::error!(
                    request_id = %request_id,
                    method = %info.full_method,
                    code = ?code,
                    error = %err,
                    "rpc stream rejected"
                );
                metrics::record_call(&info.full_method, code, started.elapsed());
                return Err(err);
            }
        };

        let logged: PayloadStream = stream! {
            let mut responses = responses;
            let mut sent = 0u64;
            let mut code = Code::Ok;
            while let Some(item) = responses.next().await {
                match &item {
                    Ok(_) => sent += 1,
                    Err(status) => code = status.code(),
                }
                yield item;
            }
            let elapsed = started.elapsed();
            tracing::info!(
                request_id = %request_id,
                method = %info.full_method,
                messages = sent,
                code = ?code,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "rpc stream closed"
            );
            metrics::record_call(&info.full_method, code, elapsed);
        }
        .boxed();

        Ok(logged)
    }
}
