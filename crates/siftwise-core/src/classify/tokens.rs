/// Split a name into lowercase word tokens.
///
/// Breaks on anything that is not alphanumeric, on letter/digit transitions and on
/// lower-to-upper camel case humps: `myInvoice_2024-v2` -> `my invoice 2024 v 2`.
pub fn tokenize(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for ch in name.chars() {
        if !ch.is_alphanumeric() {
            flush(&mut current, &mut tokens);
            prev = None;
            continue;
        }
        if let Some(p) = prev {
            let boundary = (p.is_alphabetic() && ch.is_numeric())
                || (p.is_numeric() && ch.is_alphabetic())
                || (p.is_lowercase() && ch.is_uppercase());
            if boundary {
                flush(&mut current, &mut tokens);
            }
        }
        current.extend(ch.to_lowercase());
        prev = Some(ch);
    }
    flush(&mut current, &mut tokens);
    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Loose keyword match: exact, or a plain plural of the keyword.
pub fn token_matches(token: &str, keyword: &str) -> bool {
    token == keyword
        || token
            .strip_suffix('s')
            .map(|singular| singular == keyword)
            .unwrap_or(false)
}
