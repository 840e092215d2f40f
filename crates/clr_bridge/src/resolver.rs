//! Symbol resolution: (assembly, type, method) to a native function pointer.

use std::ffi::CString;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::bridge::BridgeShared;
use crate::error::{BridgeError, Result};
use crate::host::{ClrHost, HostInstance};

/// Asks the runtime for a native-callable pointer to `type_name.method`.
///
/// This is the single path every delegate lookup takes, bootstrap entry
/// points and user imports alike.
///
/// # Arguments
///
/// * `clr` - The loaded hosting library
/// * `instance` - Handle and domain returned by initialization
/// * `assembly` - Assembly identity, e.g. `Spadecs, Version=1.0.0.0`
/// * `type_name` - Fully qualified managed type
/// * `method` - Static method on that type
///
/// # Returns
///
/// The function address. A non-zero status maps to
/// [`BridgeError::CreateDelegate`], a null pointer to
/// [`BridgeError::NullDelegate`], and a name containing NUL to
/// [`BridgeError::InteriorNul`].
pub(crate) fn create_delegate(
    clr: &dyn ClrHost,
    instance: HostInstance,
    assembly: &str,
    type_name: &str,
    method: &str,
) -> Result<usize> {
    let name = format!("{type_name}.{method}");
    let encode = |text: &str| CString::new(text).map_err(|_| BridgeError::InteriorNul(name.clone()));
    let assembly_c = encode(assembly)?;
    let type_c = encode(type_name)?;
    let method_c = encode(method)?;

    let address = clr
        .create_delegate(instance, &assembly_c, &type_c, &method_c)
        .map_err(|status| BridgeError::CreateDelegate {
            type_name: type_name.to_string(),
            method: method.to_string(),
            status,
        })?;
    if address == 0 {
        return Err(BridgeError::NullDelegate {
            type_name: type_name.to_string(),
            method: method.to_string(),
        });
    }
    debug!("Resolved {} in [{}] at {:#x}", name, assembly, address);
    Ok(address)
}

/// Resolves managed methods into callable function pointers while the host
/// is live. Returned by [`crate::Bridge::load_host`].
#[derive(Clone)]
pub struct Resolver {
    shared: Arc<BridgeShared>,
}

impl Resolver {
    pub(crate) fn new(shared: Arc<BridgeShared>) -> Self {
        Self { shared }
    }

    /// Resolves a managed static method to a callable address.
    ///
    /// # Arguments
    ///
    /// * `type_name` - Fully qualified managed type
    /// * `method` - Method name on that type
    /// * `assembly` - Assembly identity, or `None` for the bootstrap assembly
    ///
    /// # Returns
    ///
    /// The function address, or [`BridgeError::HostNotLoaded`] once the host
    /// is torn down. Results are not cached here; [`crate::Import`] caches
    /// its own resolution.
    pub fn resolve(&self, type_name: &str, method: &str, assembly: Option<&str>) -> Result<usize> {
        self.shared.resolve(type_name, method, assembly)
    }

    /// Whether the host this resolver belongs to is still up.
    pub fn is_live(&self) -> bool {
        self.shared.is_live()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("live", &self.is_live()).finish()
    }
}
