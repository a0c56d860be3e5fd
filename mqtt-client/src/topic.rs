//! Topic-filter matching. No allocation: both predicates scan the two
//! strings level by level without building an intermediate `Vec`.

const LEVEL_SEP: u8 = b'/';
const SINGLE_WILDCARD: u8 = b'+';
const MULTI_WILDCARD: u8 = b'#';

/// Strict byte-equality, used by the subscription table to detect an
/// already-installed filter.
pub fn equals(filter: &str, topic: &str) -> bool {
    filter == topic
}

/// MQTT wildcard match: `+` matches exactly one level, `#` matches the
/// remainder (including zero levels) and is only meaningful as the final
/// filter level. A match requires both strings to be fully consumed.
///
/// Levels are walked with `str::split`, which yields an empty level for a
/// trailing separator (`"a/"` has levels `["a", ""]`) and distinguishes that
/// from a topic that simply ends (`"a"` has the single level `["a"]`) —
/// getting this distinction right is what lets `+` require a level to
/// actually be present rather than matching past the end of the topic.
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut f = filter.split(LEVEL_SEP as char);
    let mut t = topic.split(LEVEL_SEP as char);

    loop {
        match (f.next(), t.next()) {
            (Some(fl), _) if fl == MULTI_WILDCARD_STR => return true,
            (Some(fl), Some(_)) if fl == SINGLE_WILDCARD_STR => continue,
            (Some(fl), Some(tl)) => {
                if fl != tl {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

const MULTI_WILDCARD_STR: &str = "#";
const SINGLE_WILDCARD_STR: &str = "+";

/// Eager filter validation performed at `subscribe` time (Design Notes open
/// question): `#` may only appear as a whole final level, `+` may only
/// appear as a whole level.
pub fn validate_filter(filter: &str) -> bool {
    let levels: Vec<&str> = filter.split('/').collect();

    for (i, level) in levels.iter().enumerate() {
        if level.contains(MULTI_WILDCARD as char) {
            if *level != "#" || i != levels.len() - 1 {
                return false;
            }
        }
        if level.contains(SINGLE_WILDCARD as char) && *level != "+" {
            return false;
        }
    }

    true
}
