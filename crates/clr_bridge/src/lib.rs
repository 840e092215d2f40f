//! In-process .NET Core runtime bridge
//!
//! Locates an installed runtime, hosts it inside the current process through
//! the `coreclr` hosting library, and lets native and managed code call each
//! other through typed bindings.
//!
//! ```text
//! locator → version → host ─┬─ outbound bindings (native fns for managed code)
//!                           ├─ resolver → inbound imports (managed fns for native code)
//!                           ├─ tracking (weak objects shared across the boundary)
//!                           └─ lifecycle (exactly-once teardown)
//! ```
//!
//! Everything hangs off a [`Bridge`]: register outbound bindings, call
//! [`Bridge::load_host`], declare imports, and let [`Bridge::teardown`] (or
//! the process exit hook) release the runtime.

pub mod bindings;
pub mod bridge;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod locator;
pub mod resolver;
pub mod tracking;
pub mod version;
pub mod wire;

pub use bindings::{Import, ImportId, ImportTarget, IntoArgs, NativeFn, OutboundBinding, OutboundRegistry, TypedImport};
pub use bridge::{BindingInfo, Bridge};
pub use error::{BridgeError, Result};
pub use host::{ClrHost, CoreClrLibrary, HostInstance, HostLoader};
pub use locator::{HostEnvironment, LauncherCatalog, RuntimeCatalog, RuntimeDescriptor};
pub use resolver::Resolver;
pub use tracking::{ObjectKey, ObjectTable};
pub use version::RuntimeVersion;
pub use wire::{FromValue, IntoValue, Signature, Value, WireType};
