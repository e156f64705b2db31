//! Terminal rendering of playback and link status.

use crate::{peer::LinkState, sync::PlaybackView};

/// Format a position as `m:ss`
pub fn format_position(position_ms: i64) -> String {
    let total_secs = position_ms.max(0) / 1000;
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

pub struct PlaybackFormatter;

impl PlaybackFormatter {
    /// One status line, e.g. `▶ track-1 1:05`
    pub fn format_view(view: &PlaybackView) -> String {
        match &view.track_id {
            Some(track_id) => format!(
                "{} {} {}",
                if view.playing { "▶" } else { "⏸" },
                track_id,
                format_position(view.position_ms)
            ),
            None => "⏹ (no track)".to_string(),
        }
    }

    pub fn format_links(links: &[(String, LinkState)]) -> String {
        if links.is_empty() {
            return "no peers".to_string();
        }
        links
            .iter()
            .map(|(peer, state)| format!("{peer}: {state:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn format_toggle(kind: &str, enabled: Option<bool>) -> String {
        match enabled {
            Some(true) => format!("{kind} on"),
            Some(false) => format!("{kind} off"),
            None => format!("no {kind} track"),
        }
    }
}
