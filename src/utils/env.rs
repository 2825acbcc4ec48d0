//! Environment variable utilities with platform-specific behavior.

/// Value of `name` if it is set and not blank.
pub fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn lookup(var_name: &str) -> Option<String> {
    if var_name.is_empty() {
        return None;
    }

    #[cfg(windows)]
    {
        // Windows environment variables are case-insensitive
        std::env::vars()
            .find(|(k, _)| k.eq_ignore_ascii_case(var_name))
            .map(|(_, v)| v)
    }

    #[cfg(not(windows))]
    {
        std::env::var(var_name).ok()
    }
}

/// Expands `$VAR` and `${VAR}` placeholders anywhere in `value`.
///
/// Unknown variables are left as written.
pub fn expand_env_vars(value: &str) -> String {
    shellexpand::env_with_context_no_errors(value, lookup).into_owned()
}
