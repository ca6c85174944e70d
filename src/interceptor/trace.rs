//! Call tracing.
//!
//! Opens an `rpc.server` span around each call. A W3C `traceparent` sent by
//! the caller is extracted with the OpenTelemetry trace-context propagator
//! and set as the span's parent, so with an OpenTelemetry layer installed the
//! call joins the caller's trace. The caller's trace id and span id are also
//! recorded as span fields for plain log output. The final status code is
//! recorded on the span before it closes.

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tonic::metadata::{KeyRef, MetadataMap};
use tonic::Code;
use tracing::{field, Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::interceptor::call::{CallInfo, PayloadStream, StreamCall, StreamResult, UnaryCall, UnaryResult};
use crate::interceptor::chain::{StreamInterceptor, StreamNext, UnaryInterceptor, UnaryNext};
use crate::interceptor::error::code_of;

/// Metadata key of the W3C trace context.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// Reads propagation headers out of gRPC metadata.
pub struct MetadataExtractor<'a>(pub &'a MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.to_str().ok()
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(|key| match key {
                KeyRef::Ascii(key) => key.as_str(),
                KeyRef::Binary(key) => key.as_str(),
            })
            .collect()
    }
}

/// The caller's trace context. Carries no valid span when the call arrived
/// without a well-formed `traceparent`.
pub fn remote_context(metadata: &MetadataMap) -> Context {
    TraceContextPropagator::new().extract(&MetadataExtractor(metadata))
}

fn call_span(info: &CallInfo, metadata: &MetadataMap) -> Span {
    let span = tracing::info_span!(
        "rpc.server",
        rpc.service = %info.service(),
        rpc.method = %info.method(),
        rpc.kind = info.kind.as_str(),
        trace_id = field::Empty,
        parent_span_id = field::Empty,
        rpc.code = field::Empty,
    );

    let parent = remote_context(metadata);
    let remote = parent.span().span_context().clone();
    if remote.is_valid() {
        span.record("trace_id", field::display(remote.trace_id()));
        span.record("parent_span_id", field::display(remote.span_id()));
        // Without an OpenTelemetry layer there is nothing to parent.
        let _ = span.set_parent(parent);
    }
    span
}

fn record_code(span: &Span, code: Code) {
    span.record("rpc.code", field::debug(code));
}

/// Installable tracing interceptor for unary and streaming calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallTracing;

#[async_trait]
impl UnaryInterceptor for CallTracing {
    fn name(&self) -> &'static str {
        "call_tracing"
    }

    async fn intercept(&self, call: UnaryCall, next: UnaryNext) -> UnaryResult {
        let span = call_span(&call.info, &call.metadata);
        let result = next.run(call).instrument(span.clone()).await;
        let code = match &result {
            Ok(_) => Code::Ok,
            Err(err) => code_of(err),
        };
        record_code(&span, code);
        result
    }
}

#[async_trait]
impl StreamInterceptor for CallTracing {
    fn name(&self) -> &'static str {
        "call_tracing"
    }

    async fn intercept(&self, call: StreamCall, next: StreamNext) -> StreamResult {
        let span = call_span(&call.info, &call.metadata);
        let responses = match next.run(call).instrument(span.clone()).await {
            Ok(responses) => responses,
            Err(err) => {
                record_code(&span, code_of(&err));
                return Err(err);
            }
        };

        // The span moves into the stream and closes when the stream is
        // exhausted or dropped.
        let traced: PayloadStream = stream! {
            let mut responses = responses;
            let mut code = Code::Ok;
            while let Some(item) = responses.next().instrument(span.clone()).await {
                if let Err(status) = &item {
                    code = status.code();
                }
                yield item;
            }
            record_code(&span, code);
        }
        .boxed();

        Ok(traced)
    }
}
