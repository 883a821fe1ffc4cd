// src/protocol/bracket.rs

//! Tagged bracket records: `[key value ...][key value ...]`.
//!
//! Values containing whitespace are wrapped in single or double quotes.

/// Split a record into its bracketed groups and tokenize each group.
///
/// Text outside brackets is ignored; an unterminated final group is
/// dropped.
pub fn parse_record(text: &str) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in text.chars() {
        if depth == 0 {
            if c == '[' {
                depth = 1;
                current.clear();
            }
            continue;
        }
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[') => {
                depth += 1;
                current.push(c);
            }
            (None, ']') => {
                depth -= 1;
                if depth == 0 {
                    groups.push(tokenize(&current));
                } else {
                    current.push(c);
                }
            }
            (None, c) => current.push(c),
        }
    }

    groups.into_iter().filter(|g| !g.is_empty()).collect()
}

/// Whitespace tokenizer honouring single and double quotes.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Quote a value if it is empty or contains whitespace.
pub fn quote(value: &str) -> String {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        if value.contains('\'') {
            format!("\"{value}\"")
        } else {
            format!("'{value}'")
        }
    } else {
        value.to_string()
    }
}

/// Render one `[key v1 v2 ...]` group.
pub fn field<I, S>(key: &str, values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::from("[");
    out.push_str(key);
    for v in values {
        out.push(' ');
        out.push_str(&quote(v.as_ref()));
    }
    out.push(']');
    out
}
