#[must_use]
pub(super) fn read_non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
pub(super) fn read_env_u32(name: &str) -> Option<u32> {
    read_non_empty_env(name).and_then(|raw| raw.parse::<u32>().ok())
}

#[must_use]
pub(super) fn read_env_u64(name: &str) -> Option<u64> {
    read_non_empty_env(name).and_then(|raw| raw.parse::<u64>().ok())
}

#[must_use]
pub(super) fn read_env_bool(name: &str) -> Option<bool> {
    read_non_empty_env(name).and_then(|raw| parse_bool(&raw))
}

#[must_use]
pub(super) fn read_env_list(name: &str) -> Option<Vec<String>> {
    read_non_empty_env(name).map(|raw| parse_list(&raw))
}

pub(super) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(super) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}
