use anyhow::{anyhow, Result};
use log::warn;
use std::collections::HashMap;

/// Get a parameter value with a default fallback
pub fn get_param(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

/// Get a parameter as usize with a minimum value
pub fn get_usize_param_min(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(min as f64) as usize)
        .unwrap_or(default)
}

/// Get a boolean switch encoded as a number (>= 0.5 is on)
pub fn get_flag_param(params: &HashMap<String, f64>, key: &str, default: bool) -> bool {
    let fallback = if default { 1.0 } else { 0.0 };
    coerce_binary_param(get_param(params, key, fallback), fallback) >= 0.5
}

pub fn coerce_binary_param(value: f64, default: f64) -> f64 {
    if !value.is_finite() {
        return default;
    }

    if value >= 0.5 {
        1.0
    } else {
        0.0
    }
}

/// Parses `key=value` assignments from the command line into a parameter map.
/// Booleans are accepted as `true`/`false`/`yes`/`no`.
pub fn parse_parameter_assignments(assignments: &[String]) -> Result<HashMap<String, f64>> {
    let mut parameters = HashMap::with_capacity(assignments.len());

    for assignment in assignments {
        let (key, raw_value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("Parameter `{}` must look like key=value", assignment))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("Parameter `{}` has an empty key", assignment));
        }

        let raw_value = raw_value.trim();
        let value = match raw_value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => 1.0,
            "false" | "no" | "off" => 0.0,
            _ => raw_value.parse::<f64>().map_err(|_| {
                anyhow!(
                    "Parameter `{}` must be numeric or boolean (value: {})",
                    key,
                    raw_value
                )
            })?,
        };

        if !value.is_finite() {
            return Err(anyhow!(
                "Parameter `{}` must be finite (value: {})",
                key,
                raw_value
            ));
        }

        if parameters.insert(key.to_string(), value).is_some() {
            warn!("Parameter `{}` given more than once; last value wins", key);
        }
    }

    Ok(parameters)
}

/// Warns about parameter keys that no config struct consumes.
pub fn warn_unknown_parameters(params: &HashMap<String, f64>, known: &[&str]) {
    for key in params.keys() {
        if !known.contains(&key.as_str()) {
            warn!("Ignoring unknown parameter `{}`", key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_boolean_assignments() {
        let parsed = parse_parameter_assignments(&[
            "minPrice=300".to_string(),
            " pushPct = 50 ".to_string(),
            "excludeIpo=false".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed.get("minPrice"), Some(&300.0));
        assert_eq!(parsed.get("pushPct"), Some(&50.0));
        assert_eq!(parsed.get("excludeIpo"), Some(&0.0));
    }

    #[test]
    fn rejects_malformed_assignments() {
        assert!(parse_parameter_assignments(&["minPrice".to_string()]).is_err());
        assert!(parse_parameter_assignments(&["=3".to_string()]).is_err());
        assert!(parse_parameter_assignments(&["minPrice=cheap".to_string()]).is_err());
        assert!(parse_parameter_assignments(&["minPrice=inf".to_string()]).is_err());
    }

    #[test]
    fn getters_fall_back_on_missing_or_non_finite_values() {
        let mut params = HashMap::new();
        params.insert("a".to_string(), f64::NAN);
        params.insert("b".to_string(), 3.6);
        params.insert("flag".to_string(), 0.2);
        assert_eq!(get_param(&params, "a", 1.5), 1.5);
        assert_eq!(get_param(&params, "missing", 2.0), 2.0);
        assert_eq!(get_usize_param_min(&params, "b", 1, 0), 4);
        assert_eq!(get_usize_param_min(&params, "a", 7, 0), 7);
        assert!(!get_flag_param(&params, "flag", true));
        assert!(get_flag_param(&params, "missing", true));
    }
}
