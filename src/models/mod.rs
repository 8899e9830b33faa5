//! Domain model module declarations.
//!
//! Typed views over the `data` payloads of CSend frames. Unknown fields are
//! ignored and optional fields default, so a newer child with extra fields
//! still decodes.

pub mod message;
pub mod peer;
pub mod status;
