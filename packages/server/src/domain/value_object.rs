//! Value objects of the relay domain.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

const MAX_ID_LENGTH: usize = 64;
const MAX_CHANNEL_LENGTH: usize = 128;

/// Validation errors for value objects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("value must not be empty")]
    Empty,
    #[error("value must be at most {max} characters")]
    TooLong { max: usize },
    #[error("invalid character '{0}'")]
    InvalidCharacter(char),
}

/// Identifiers are restricted to `[A-Za-z0-9_-]`.
fn validate_identifier(value: &str) -> Result<(), ValueObjectError> {
    if value.is_empty() {
        return Err(ValueObjectError::Empty);
    }
    if value.chars().count() > MAX_ID_LENGTH {
        return Err(ValueObjectError::TooLong { max: MAX_ID_LENGTH });
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(ValueObjectError::InvalidCharacter(c));
    }
    Ok(())
}

/// Identity of a connected participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        validate_identifier(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a listening room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        validate_identifier(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a pub/sub channel. Any non-blank string up to 128 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        if value.trim().is_empty() {
            return Err(ValueObjectError::Empty);
        }
        if value.chars().count() > MAX_CHANNEL_LENGTH {
            return Err(ValueObjectError::TooLong {
                max: MAX_CHANNEL_LENGTH,
            });
        }
        Ok(Self(value))
    }

    /// Signaling channel of a room.
    pub fn for_room(room_id: &RoomId) -> Self {
        Self(listenhall_shared::protocol::signal_channel(room_id.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChannelName {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id_accepts_valid_identifier() {
        // テスト項目: 英数字・ハイフン・アンダースコアからなる ID を受け付ける
        // given (前提条件):
        let raw = "host_01-a".to_string();

        // when (操作):
        let result = ParticipantId::new(raw);

        // then (期待する結果):
        assert_eq!(result.unwrap().as_str(), "host_01-a");
    }

    #[test]
    fn test_participant_id_rejects_empty() {
        // テスト項目: 空文字の ID はエラーになる
        assert_eq!(
            ParticipantId::new(String::new()),
            Err(ValueObjectError::Empty)
        );
    }

    #[test]
    fn test_room_id_rejects_invalid_character() {
        // テスト項目: 許可されない文字を含むルーム ID はエラーになる
        // given (前提条件):
        let raw = "room 1".to_string();

        // when (操作):
        let result = RoomId::new(raw);

        // then (期待する結果):
        assert_eq!(result, Err(ValueObjectError::InvalidCharacter(' ')));
    }

    #[test]
    fn test_room_id_rejects_too_long() {
        // テスト項目: 64 文字を超えるルーム ID はエラーになる
        let raw = "a".repeat(65);
        assert_eq!(
            RoomId::new(raw),
            Err(ValueObjectError::TooLong { max: 64 })
        );
    }

    #[test]
    fn test_channel_name_for_room() {
        // テスト項目: ルームのシグナリングチャンネル名が導出される
        // given (前提条件):
        let room_id = RoomId::new("party".to_string()).unwrap();

        // when (操作):
        let channel = ChannelName::for_room(&room_id);

        // then (期待する結果):
        assert_eq!(channel.as_str(), "room:party");
    }

    #[test]
    fn test_channel_name_rejects_blank() {
        // テスト項目: 空白のみのチャンネル名はエラーになる
        assert_eq!(
            ChannelName::new("   ".to_string()),
            Err(ValueObjectError::Empty)
        );
    }
}
