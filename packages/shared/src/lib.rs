//! Types and utilities shared by the listenhall server and client.

pub mod logger;
pub mod protocol;
pub mod time;
