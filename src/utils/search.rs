/// Text search configuration used by the `to_tsvector` indexes.
pub const SEARCH_CONFIG: &str = "simple";

/// `%term%` for `ILIKE`, with the term's own wildcards matched literally.
/// Postgres treats backslash as the default `LIKE` escape character.
pub fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::contains_pattern;

    #[test]
    fn wildcards_in_the_term_are_escaped() {
        assert_eq!(contains_pattern("ali"), "%ali%");
        assert_eq!(contains_pattern("100%"), "%100\\%%");
        assert_eq!(contains_pattern("a_b"), "%a\\_b%");
        assert_eq!(contains_pattern("c:\\dir"), "%c:\\\\dir%");
    }
}
