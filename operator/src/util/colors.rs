use owo_colors::Rgb;

/// Accent palette for controller action logs: dim slate for the
/// punctuation, amber for the resource and action values.
pub const ACTION_DIM: Rgb = Rgb(96, 110, 140);
pub const ACTION_VALUE: Rgb = Rgb(224, 160, 64);
