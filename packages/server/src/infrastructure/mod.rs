//! Infrastructure layer: concrete implementations of the domain interfaces
//! and the DTOs used at the HTTP boundary.

pub mod dto;
pub mod message_pusher;
pub mod repository;
