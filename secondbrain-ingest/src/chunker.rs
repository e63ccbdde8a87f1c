//! Sentence-like chunking: split on `.`, trim, drop empties.

pub fn generate_chunks(input: &str) -> Vec<String> {
    input
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
