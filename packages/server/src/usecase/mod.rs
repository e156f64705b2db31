//! UseCase layer: application services orchestrating the domain.

pub mod channel_subscription;
pub mod connect_participant;
pub mod disconnect_participant;
pub mod error;
pub mod playback;
pub mod presence;
pub mod relay_broadcast;
pub mod room_lifecycle;

pub use channel_subscription::ChannelSubscriptionUseCase;
pub use connect_participant::ConnectParticipantUseCase;
pub use disconnect_participant::{DisconnectOutcome, DisconnectParticipantUseCase};
pub use error::{ConnectError, PlaybackError, RelayError, RoomCommandError};
pub use playback::PlaybackUseCase;
pub use presence::PresenceUseCase;
pub use relay_broadcast::RelayBroadcastUseCase;
pub use room_lifecycle::RoomLifecycleUseCase;
