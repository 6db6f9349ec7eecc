//! Class names embedded in Ultralytics ONNX exports.
//!
//! The exporter stores them under the `names` metadata key as a Python
//! dict literal: `{0: 'Hardhat', 1: 'NO-Hardhat', 2: 'Person'}`.

/// Parse an Ultralytics `names` literal into an id-indexed list.
///
/// Missing ids are filled with `class_{i}`. Returns `None` when the text
/// holds no entries.
pub fn parse_names_literal(literal: &str) -> Option<Vec<String>> {
    let body = literal.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut entries: Vec<(usize, String)> = Vec::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.peek().copied() {
            if c == ':' {
                break;
            }
            key.push(c);
            chars.next();
        }
        let id: usize = key.trim().trim_matches(|c| c == '\'' || c == '"').parse().ok()?;
        chars.next()?; // ':'

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let quote = chars.next().filter(|c| *c == '\'' || *c == '"')?;
        let mut name = String::new();
        loop {
            match chars.next()? {
                '\\' => name.push(chars.next()?),
                c if c == quote => break,
                c => name.push(c),
            }
        }
        entries.push((id, name));
    }

    if entries.is_empty() {
        return None;
    }

    let len = entries.iter().map(|(id, _)| id + 1).max().unwrap_or(0);
    let mut names: Vec<String> = (0..len).map(fallback_name).collect();
    for (id, name) in entries {
        names[id] = name;
    }
    Some(names)
}

/// Parse a comma-separated override list (`PPE_CLASS_NAMES`).
pub fn parse_names_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Name used for ids the model does not label.
pub fn fallback_name(id: usize) -> String {
    format!("class_{id}")
}
