//! Channel-name rules.
//!
//! A channel is named by exactly one emoji. "One emoji" means one user
//! perceived character: a pictograph with its optional modifiers, a ZWJ
//! sequence, a flag, a tag sequence, or a keycap.

use crate::error::WriteError;
use bonfire_types::ChannelName;

const ZWJ: char = '\u{200D}';
const KEYCAP: char = '\u{20E3}';

fn is_variation_selector(c: char) -> bool {
    matches!(c, '\u{FE0E}' | '\u{FE0F}')
}

fn is_skin_tone(c: char) -> bool {
    matches!(c, '\u{1F3FB}'..='\u{1F3FF}')
}

fn is_tag(c: char) -> bool {
    matches!(c, '\u{E0020}'..='\u{E007F}')
}

fn is_regional_indicator(c: char) -> bool {
    matches!(c, '\u{1F1E6}'..='\u{1F1FF}')
}

fn is_keycap_base(c: char) -> bool {
    c.is_ascii_digit() || c == '#' || c == '*'
}

fn is_pictograph(c: char) -> bool {
    matches!(c,
        '\u{00A9}' | '\u{00AE}' | '\u{203C}' | '\u{2049}' | '\u{2122}' | '\u{2139}'
        | '\u{2194}'..='\u{21AA}'
        | '\u{231A}'..='\u{23FF}'
        | '\u{24C2}'
        | '\u{25AA}'..='\u{25FE}'
        | '\u{2600}'..='\u{27BF}'
        | '\u{2934}' | '\u{2935}'
        | '\u{2B05}'..='\u{2B55}'
        | '\u{3030}' | '\u{303D}' | '\u{3297}' | '\u{3299}'
        | '\u{1F000}'..='\u{1FAFF}')
        && !is_skin_tone(c)
        && !is_regional_indicator(c)
}

/// Counts emoji clusters in `s`. Returns `None` if `s` holds anything that is
/// not part of an emoji.
fn emoji_clusters(s: &str) -> Option<usize> {
    let mut clusters = 0;
    let mut joined = false;
    let mut open_flag = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if is_pictograph(c) {
            if !joined {
                clusters += 1;
            }
            joined = false;
            open_flag = false;
        } else if is_regional_indicator(c) {
            // Two regional indicators make one flag.
            if open_flag {
                open_flag = false;
            } else {
                clusters += 1;
                open_flag = true;
            }
            joined = false;
        } else if is_keycap_base(c) {
            // Only valid as the base of a keycap sequence.
            chars.next_if(|&n| is_variation_selector(n));
            chars.next_if_eq(&KEYCAP)?;
            clusters += 1;
            joined = false;
            open_flag = false;
        } else if c == ZWJ {
            if clusters == 0 || joined {
                return None;
            }
            joined = true;
        } else if is_variation_selector(c) || is_skin_tone(c) || is_tag(c) {
            if clusters == 0 {
                return None;
            }
        } else {
            return None;
        }
    }

    if joined {
        return None;
    }
    Some(clusters)
}

/// Validates a requested channel name.
///
/// Surrounding whitespace is trimmed. The result must be a single emoji.
pub fn validate_channel_name(name: &str) -> Result<ChannelName, WriteError> {
    let trimmed = name.trim();
    let invalid = |reason: &str| WriteError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("name is empty"));
    }
    match emoji_clusters(trimmed) {
        Some(1) => Ok(ChannelName::from(trimmed)),
        Some(_) => Err(invalid("name must be a single emoji")),
        None => Err(invalid("name may only contain an emoji")),
    }
}
