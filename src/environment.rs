use std::env;
use std::str::FromStr;
use tracing::warn;

/// Retrieves an environment variable and splits it into a vector of strings based on a delimiter.
///
/// Empty segments are dropped.
pub fn get_env_var_as_vec(var: &str, delimiter: char) -> Vec<String> {
    env::var(var)
        .unwrap_or_default()
        .split(delimiter)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Returns the variable's value, or `default` when it is unset or blank.
pub fn get_env_or(var: &str, default: &str) -> String {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Returns the first of `vars` that is set and non-blank.
pub fn get_first_env(vars: &[&str]) -> Option<String> {
    vars.iter().find_map(|var| match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    })
}

/// Parses the variable into `T`, falling back to `default` (with a warning) on bad input.
pub fn get_env_parsed<T>(var: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid value '{}' for {}, using default {}", raw, var, default);
                default
            }
        },
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_fallback() {
        env::set_var("EVO_TEST_PARSED_BAD", "not-a-number");
        assert_eq!(get_env_parsed("EVO_TEST_PARSED_BAD", 7usize), 7);
        env::set_var("EVO_TEST_PARSED_GOOD", " 12 ");
        assert_eq!(get_env_parsed("EVO_TEST_PARSED_GOOD", 7usize), 12);
    }

    #[test]
    fn test_vec_drops_blank_segments() {
        env::set_var("EVO_TEST_VEC", "a; b;;  ;c");
        assert_eq!(get_env_var_as_vec("EVO_TEST_VEC", ';'), vec!["a", "b", "c"]);
    }
}
