//! Fuzzy matching of undefined placeholder names against known keys

/// Maximum Levenshtein distance to consider for suggestions
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Find up to `limit` candidates close to `name`, closest first
pub fn find_closest_matches<'a>(name: &str, candidates: &[&'a str], limit: usize) -> Vec<&'a str> {
    let name_lower = name.to_lowercase();
    let mut scored: Vec<(usize, &str)> = candidates
        .iter()
        .map(|c| (strsim::levenshtein(&name_lower, &c.to_lowercase()), *c))
        .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
        .collect();

    scored.sort();
    scored.into_iter().take(limit).map(|(_, c)| c).collect()
}

/// Suggest how to fix a placeholder that names a missing override
pub fn suggest_undefined_variable(name: &str, available: &[&str]) -> String {
    let matches = find_closest_matches(name, available, 3);
    if matches.is_empty() {
        format!("Pass `{name}=VALUE` on the command line")
    } else {
        let quoted: Vec<String> = matches.iter().map(|m| format!("`{m}`")).collect();
        format!(
            "Did you mean {}? Otherwise pass `{name}=VALUE` on the command line",
            quoted.join(" or ")
        )
    }
}
