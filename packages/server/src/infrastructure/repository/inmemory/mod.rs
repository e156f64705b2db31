//! In-memory repositories backed by `HashMap`s.

mod connection;
mod room;

pub use connection::InMemoryConnectionRegistry;
pub use room::InMemoryRoomRepository;
