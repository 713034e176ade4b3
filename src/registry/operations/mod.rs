//! Registry operations grouped by resource
//!
//! Each group wraps a [`RegistryClient`](super::client::RegistryClient)
//! already scoped to one repository.

pub mod blob_operations;
pub mod manifest_operations;
pub mod repository_operations;

pub use blob_operations::BlobOperations;
pub use manifest_operations::ManifestOperations;
pub use repository_operations::RepositoryOperations;
