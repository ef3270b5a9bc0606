//! Serialization engine: the split project-area/workspace-area storage
//! documents and the reference/copy normalization of provider lists.
//!
//! A configuration's provider list is persisted per configuration as either
//! a full `provider` element (serializable providers, with their entry
//! trees) or a `provider-reference` element carrying only the id (workspace
//! providers, whose state is derivable from the catalog or the
//! workspace-level document). Documents are complete replacements; a store
//! whose content collapses to all-default is removed rather than written.

mod paths;
mod store;

pub use paths::{project_store_path, project_workspace_store_path, workspace_store_path};
pub use store::{
    load_project, load_project_from, load_workspace_document, serialize_project,
    serialize_project_into, serialize_workspace_document, ELEM_CONFIGURATION, ELEM_PROJECT,
    ELEM_PROVIDER_REFERENCE, ELEM_WORKSPACE,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to access settings storage")]
    Xml(#[from] lset_xml::XmlError),
}
