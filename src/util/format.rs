use crate::spotify::types::PlaybackState;

/// `m:ss`, minutes unbounded.
pub fn format_time(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Progress through the current track in percent, 0 when unknown.
pub fn progress_percent(state: &PlaybackState) -> f64 {
    let (Some(progress), Some(track)) = (state.progress_ms, state.track.as_ref()) else {
        return 0.0;
    };
    if track.duration_ms == 0 {
        return 0.0;
    }
    (progress as f64 / track.duration_ms as f64 * 100.0).min(100.0)
}

/// Fixed-width text progress bar, e.g. `[#####-----]`.
pub fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
