//! Default post formatting per publication tier.

use crate::rate_controller::Tier;

/// Channel posts are capped well below common messenger limits.
pub const MAX_POST_CHARS: usize = 3500;

pub fn format_post(tier: Tier, text: &str, source: &str) -> String {
    let body = text.trim();
    let head = match tier {
        Tier::Critical => "🚨 BREAKING\n\n",
        Tier::High => "⚡ ",
        Tier::Normal => "",
    };
    let mut out = format!("{head}{body}");
    if out.chars().count() > MAX_POST_CHARS {
        out = out.chars().take(MAX_POST_CHARS - 1).collect();
        out.push('…');
    }
    if !source.trim().is_empty() {
        out.push_str("\n\nvia ");
        out.push_str(source.trim());
    }
    out
}
