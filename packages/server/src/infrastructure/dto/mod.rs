//! Data Transfer Objects (DTOs).
//!
//! WebSocket frames are defined once in `listenhall_shared::protocol`;
//! only the HTTP API has server-specific shapes.

pub mod http;
