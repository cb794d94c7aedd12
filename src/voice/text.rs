//! Text preparation for the speech engine

/// Characters that break command-line quoting in the synthesis pipeline
const STRIPPED: [char; 5] = ['"', '\'', '`', '´', '\\'];

const ELLIPSIS: &str = "...";

/// Strip quoting characters, collapse whitespace runs and cap the length
///
/// `max_chars` counts characters, including the trailing ellipsis when
/// the text is cut.
pub fn normalize(text: &str, max_chars: usize) -> String {
    let cleaned: String = text.chars().filter(|c| !STRIPPED.contains(c)).collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let head: String = collapsed.chars().take(keep).collect();
    format!("{}{}", head.trim_end(), ELLIPSIS)
}

/// Map a speech rate (1.0 nominal, higher is faster) to the engine's
/// length scale, never going below `min_scale`
pub fn length_scale(rate: f32, min_scale: f32) -> f32 {
    let rate = if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        1.0
    };
    (1.0 / rate).max(min_scale)
}
