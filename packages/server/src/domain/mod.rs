//! Domain layer: value objects, entities and the interfaces the use cases
//! depend on. Concrete implementations live in the infrastructure layer.

pub mod entity;
pub mod error;
pub mod message_pusher;
pub mod repository;
pub mod value_object;

pub use entity::{Connection, Room, RoomRuleError};
pub use error::{MessagePushError, RepositoryError};
pub use message_pusher::{MessagePusher, PusherChannel};
pub use repository::{ConnectionRegistry, RoomRepository};
pub use value_object::{ChannelName, ParticipantId, RoomId, Timestamp, ValueObjectError};
