//! Call interceptor pipeline.
//!
//! # Data Flow
//! ```text
//! transport ─▶ error_translation ─▶ call_logging ─▶ panic_recovery ─▶ user interceptors ─▶ handler
//!           ◀─ Status             ◀─ logged      ◀─ caught panic  ◀─ ...              ◀─ result
//! ```
//!
//! # Design Decisions
//! - The default triple is always outermost, in that order, so errors from
//!   anywhere are translated and logged and panics from anywhere are caught
//! - The chain is a list concatenation fixed when the server is built and
//!   shared read-only between concurrent calls
//! - Messages are type-erased into [`Payload`] so one interceptor serves
//!   every method
//! - Validation and tracing are opt-in interceptors

pub mod call;
pub mod chain;
pub mod error;
pub mod logging;
pub mod recovery;
pub mod trace;
pub mod validate;

pub use call::{
    BoxError, CallInfo, CallKind, Payload, PayloadStream, StreamCall, StreamEndpoint,
    StreamResult, UnaryCall, UnaryEndpoint, UnaryResult,
};
pub use chain::{
    stream_fn, unary_fn, InterceptorChain, StreamFn, StreamInterceptor, StreamNext, UnaryFn,
    UnaryInterceptor, UnaryNext,
};
pub use error::{code_of, into_status, ErrorTranslation, RpcError};
pub use logging::{request_id, CallLogging, REQUEST_ID_KEY};
pub use recovery::PanicRecovery;
pub use trace::{remote_context, CallTracing, MetadataExtractor, TRACEPARENT_KEY};
pub use validate::{describe, RequestValidation, Validate};
