//! Provider implementations, the extension catalog and the workspace
//! provider registry.
//!
//! Two concrete provider tiers live here: [`BaseProvider`] exposes the
//! static entries an extension declares, [`SerializableProvider`] owns
//! mutable storage and round-trips through the XML storage format and can be
//! copied (shallow or deep) into configurations. The [`ExtensionCatalog`]
//! holds read-only template instances built from declared definitions, and
//! the [`ProviderRegistry`] maintains the workspace-level indirection table
//! behind stable [`WorkspaceProvider`] handles.

mod base;
mod catalog;
mod entries_xml;
mod registry;
mod serializable;

pub use base::BaseProvider;
pub use catalog::{CatalogBuilder, CatalogError, ExtensionCatalog, ProviderDefinition};
pub use registry::{ProviderRegistry, WorkspaceProvider};
pub use serializable::{
    SerializableProvider, ATTR_CLASS, ATTR_ID, ATTR_NAME, ELEM_PROVIDER,
    STORE_ENTRIES_WITH_PROJECT,
};
