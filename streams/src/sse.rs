//! SSE frame formatting for workflow events.

use protocol::StreamEvent;

/// Format a stream event as an SSE frame: `event: <type>\ndata: <json>\n\n`.
pub fn format_frame(event: &StreamEvent) -> String {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("event: {}\ndata: {}\n\n", event.event_type, data)
}
