//! Job selection expressions: `2`, `1-3`, `1;3`, `1-2;5`. Indices are 1-based.

use crate::error::{BackupError, Result};

/// Resolves `expression` against a list of `job_count` jobs into 0-based
/// indices, in the order given, without duplicates.
pub fn parse_selection(expression: &str, job_count: usize) -> Result<Vec<usize>> {
    let invalid =
        |reason: String| BackupError::InvalidSelection(format!("'{}': {}", expression, reason));

    let mut indices = Vec::new();
    for part in expression.split([';', ',']).map(str::trim) {
        if part.is_empty() {
            return Err(invalid("empty element".to_string()));
        }
        let (first, last) = match part.split_once('-') {
            Some((first, last)) => (
                parse_index(first, job_count).map_err(invalid)?,
                parse_index(last, job_count).map_err(invalid)?,
            ),
            None => {
                let single = parse_index(part, job_count).map_err(invalid)?;
                (single, single)
            }
        };
        if first > last {
            return Err(invalid(format!("range {} is reversed", part)));
        }
        for index in first..=last {
            if !indices.contains(&index) {
                indices.push(index);
            }
        }
    }
    Ok(indices)
}

fn parse_index(raw: &str, job_count: usize) -> std::result::Result<usize, String> {
    let number: usize = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a job number", raw.trim()))?;
    if number == 0 || number > job_count {
        return Err(format!("job {} does not exist (1-{})", number, job_count));
    }
    Ok(number - 1)
}
