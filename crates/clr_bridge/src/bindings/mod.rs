//! Typed call surfaces in both directions.
//!
//! * [`outbound`] - native functions exported to managed code
//! * [`inbound`] - managed methods imported for native code

pub mod inbound;
pub mod outbound;

pub use inbound::{Import, ImportId, ImportTarget, IntoArgs, TypedImport};
pub use outbound::{NativeFn, OutboundBinding, OutboundRegistry};
