//! Frame delivery implementations
//!
//! - `websocket`: pushes encoded frames into each socket's writer task

pub mod websocket;

pub use websocket::WebSocketMessagePusher;
