//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` entity struct matching the database
//! row and, where the fabric writes rows, a create DTO.

pub mod vm;
pub mod vm_metric;
