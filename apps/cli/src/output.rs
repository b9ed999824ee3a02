//! Output formatting utilities

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format speed as human-readable; negative rates mean "unknown"
pub fn format_speed(bytes_per_sec: i64) -> String {
    if bytes_per_sec < 0 {
        return "-".to_string();
    }
    format!("{}/s", human_bytes::human_bytes(bytes_per_sec as f64))
}

/// Format an ETA in milliseconds; negative means "unknown"
pub fn format_eta(eta_ms: i64) -> String {
    if eta_ms < 0 {
        return "-".to_string();
    }

    let seconds = (eta_ms as u64).div_ceil(1000);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
