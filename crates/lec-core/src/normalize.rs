//! Name normalization shared by ingestion, loading and roster sync.

use crate::Role;

/// Aliases applied after champion key normalization.
const CHAMPION_ALIASES: &[(&str, &str)] = &[("nunuwillump", "nunu")];

/// Cell values the bulk export uses for "no value".
pub fn is_blank(value: &str) -> bool {
    let v = value.trim();
    v.is_empty()
        || v.eq_ignore_ascii_case("nan")
        || v.eq_ignore_ascii_case("none")
        || v.eq_ignore_ascii_case("null")
}

pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !is_blank(v))
}

/// Case-folded, punctuation-free champion key (`Kai'Sa` -> `kaisa`).
pub fn champion_key(name: &str) -> String {
    let key: String = name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    CHAMPION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(key)
}

/// Team display names appear with `_` for spaces on the wiki and with mixed case in the export.
pub fn team_name_key(name: &str) -> String {
    name.replace('_', " ")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn player_handle_key(handle: &str) -> String {
    handle.trim().to_lowercase()
}

pub const UNKNOWN_SPLIT: &str = "Unknown";

/// `spring` -> `Spring`, `season finals` -> `SeasonFinals`, blank -> `Unknown`.
pub fn split_type_label(raw: Option<&str>) -> String {
    let Some(raw) = non_blank(raw) else {
        return UNKNOWN_SPLIT.to_string();
    };
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Lowercase split token used inside series keys.
pub fn split_series_token(raw: Option<&str>) -> String {
    split_type_label(raw).to_lowercase()
}

/// Role for the `ordinal`-th player row of a game when its position column is unusable.
pub type RoleFallback = fn(ordinal: usize) -> Option<Role>;

/// Bulk exports list players top, jungle, mid, bot, support within each side.
pub fn ordinal_role_fallback(ordinal: usize) -> Option<Role> {
    Some(Role::ORDER[ordinal % Role::ORDER.len()])
}

pub fn no_role_fallback(_ordinal: usize) -> Option<Role> {
    None
}

pub fn resolve_role(position: Option<&str>, ordinal: usize, fallback: RoleFallback) -> Option<Role> {
    non_blank(position)
        .and_then(|p| p.parse::<Role>().ok())
        .or_else(|| fallback(ordinal))
}
