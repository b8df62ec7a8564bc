//! Dictionary file parsing and usefulness analysis.
//!
//! Dictionary files use the common fuzzing dictionary shape: one
//! `name="value"` entry per line (the name and an optional `@level` suffix
//! are ignored), `#` comments, and `\\`, `\"`, `\xNN` escapes inside the
//! quotes.
//!
//! The analyzer scores each token by coverage differential: replace its
//! occurrences in a corpus unit with their complement and compare feature
//! sets. A token whose masking never changes coverage earns a non-positive
//! score and is reported as useless.

use crate::error::{DriverError, DriverResult};
use crate::fsutil::ascii_repr;
use crate::fuzzer::{features_of_run, Fuzzer};

pub fn parse_dictionary_file(text: &str) -> DriverResult<Vec<Vec<u8>>> {
    let mut entries = Vec::new();
    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = parse_one_entry(line).map_err(|message| DriverError::Dictionary {
            line: lineno + 1,
            message,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_one_entry(line: &str) -> Result<Vec<u8>, String> {
    let open = line
        .find('"')
        .ok_or_else(|| "expected a quoted value".to_string())?;
    if !line.ends_with('"') || line.len() == open + 1 {
        return Err("value must end with a closing quote".to_string());
    }
    let body = &line.as_bytes()[open + 1..line.len() - 1];
    let mut token = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            b'\\' => {
                let escape = body
                    .get(i + 1)
                    .ok_or_else(|| "dangling escape".to_string())?;
                match escape {
                    b'\\' => {
                        token.push(b'\\');
                        i += 2;
                    }
                    b'"' => {
                        token.push(b'"');
                        i += 2;
                    }
                    b'x' => {
                        let hex = body
                            .get(i + 2..i + 4)
                            .ok_or_else(|| "truncated \\x escape".to_string())?;
                        let hex = std::str::from_utf8(hex)
                            .map_err(|_| "invalid \\x escape".to_string())?;
                        let value = u8::from_str_radix(hex, 16)
                            .map_err(|_| format!("invalid \\x escape '{hex}'"))?;
                        token.push(value);
                        i += 4;
                    }
                    other => return Err(format!("unknown escape '\\{}'", *other as char)),
                }
            }
            b'"' => return Err("unescaped quote inside value".to_string()),
            byte => {
                token.push(byte);
                i += 1;
            }
        }
    }
    if token.is_empty() {
        return Err("empty value".to_string());
    }
    Ok(token)
}

/// Complement every non-overlapping, leftmost occurrence of `token` in
/// `unit`. None when the unit does not contain the token.
fn mask_occurrences(unit: &[u8], token: &[u8]) -> Option<Vec<u8>> {
    if token.is_empty() || token.len() > unit.len() {
        return None;
    }
    let mut data = unit.to_vec();
    let mut found = false;
    let mut pos = 0;
    while pos + token.len() <= data.len() {
        if &data[pos..pos + token.len()] == token {
            for byte in &mut data[pos..pos + token.len()] {
                *byte ^= 0xff;
            }
            found = true;
            pos += token.len();
        } else {
            pos += 1;
        }
    }
    found.then_some(data)
}

/// Score every dictionary token against every corpus unit and report the
/// tokens that never changed coverage.
pub fn analyze_dictionary(fuzzer: &mut Fuzzer, dict: &[Vec<u8>], corpus: &[Vec<u8>]) -> i32 {
    eprintln!(
        "Started dictionary minimization (up to {} tests)",
        dict.len() * corpus.len() * 2
    );
    let mut scores = vec![0i32; dict.len()];
    let mut usages = vec![0i32; dict.len()];

    for unit in corpus {
        let initial_features = features_of_run(fuzzer, unit);

        for (i, token) in dict.iter().enumerate() {
            let Some(masked) = mask_occurrences(unit, token) else {
                continue;
            };
            usages[i] += 1;
            let modified_features = features_of_run(fuzzer, &masked);
            if initial_features == modified_features {
                scores[i] -= 1;
            } else {
                scores[i] += 2;
            }
        }
    }

    eprintln!("###### Useless dictionary elements. ######");
    for (i, token) in dict.iter().enumerate() {
        if scores[i] > 0 {
            continue;
        }
        eprintln!(
            "\"{}\" # Score: {}, Used: {}",
            ascii_repr(token),
            scores[i],
            usages[i]
        );
    }
    eprintln!("###### End of useless dictionary elements. ######");
    0
}
