//! Name canonicalization for matching: strip corporate suffixes, casefold,
//! collapse whitespace and drop punctuation that varies between sources.

const SUFFIXES: &[&str] = &[
    "incorporated",
    "corporation",
    "company",
    "limited",
    "holdings",
    "partners",
    "group",
    "inc",
    "corp",
    "llc",
    "llp",
    "lp",
    "ltd",
    "plc",
    "co",
    "nv",
    "sa",
    "ag",
    "se",
    "the",
];

/// Canonical matching form of an entity name
pub fn canonical_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();

    // Strip leading article and trailing corporate suffixes
    while tokens.first().is_some_and(|t| *t == "the") && tokens.len() > 1 {
        tokens.remove(0);
    }
    while tokens.len() > 1 && tokens.last().is_some_and(|t| SUFFIXES.contains(t)) {
        tokens.pop();
    }

    tokens.join(" ")
}

/// Ticker values compare uppercase with separators removed
pub fn normalize_ticker(ticker: &str) -> String {
    ticker
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
        .collect()
}
