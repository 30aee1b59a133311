//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod page_repo;
pub mod vm_metric_repo;
pub mod vm_repo;

pub use page_repo::PageRepo;
pub use vm_metric_repo::VmMetricRepo;
pub use vm_repo::VmRepo;
