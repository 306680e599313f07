/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::utils::{SessionError, decode_text};
use serde_json::Value;

/// Applies the `|`-separated value list of a `U` line to the current field values.
///
/// `current` holds one slot per subscribed field. Returns the 0-based positions
/// of the fields whose value changed.
pub(crate) fn apply_update(
    raw: &str,
    current: &mut [Option<String>],
) -> Result<Vec<usize>, SessionError> {
    let mut changed = Vec::new();
    let mut pos = 0usize;
    for token in raw.split('|') {
        if let Some(skip) = token.strip_prefix('^') {
            if let Ok(n) = skip.parse::<usize>() {
                pos += n;
                continue;
            }
        }
        let slot = current
            .get_mut(pos)
            .ok_or_else(|| SessionError::Parse(format!("too many values in update: {}", raw)))?;
        let new_value = match token {
            "" => {
                pos += 1;
                continue;
            }
            "#" => None,
            "$" => Some(String::new()),
            t if t.starts_with("^P") => Some(apply_json_patch(slot.as_deref(), &t[2..])?),
            t if t.starts_with("^T") => Some(apply_tlcp_diff(slot.as_deref(), &t[2..])?),
            t => Some(decode_text(t)),
        };
        if *slot != new_value {
            *slot = new_value;
            changed.push(pos);
        }
        pos += 1;
    }
    if pos > current.len() {
        return Err(SessionError::Parse(format!(
            "update skips past the last field: {}",
            raw
        )));
    }
    Ok(changed)
}

fn apply_json_patch(previous: Option<&str>, patch: &str) -> Result<String, SessionError> {
    let previous = previous
        .ok_or_else(|| SessionError::Parse("JSON patch applied to a null value".to_string()))?;
    let mut doc: Value = serde_json::from_str(previous)
        .map_err(|e| SessionError::Parse(format!("previous value is not JSON: {}", e)))?;
    let ops: Vec<json_patch::PatchOperation> = serde_json::from_str(&decode_text(patch))
        .map_err(|e| SessionError::Parse(format!("invalid JSON patch: {}", e)))?;
    json_patch::patch(&mut doc, &ops)
        .map_err(|e| SessionError::Parse(format!("JSON patch failed: {}", e)))?;
    Ok(doc.to_string())
}

/// TLCP-diff: alternating copy/add/delete counts; counts are base-26 with
/// uppercase continuation digits and a lowercase final digit.
fn apply_tlcp_diff(previous: Option<&str>, diff: &str) -> Result<String, SessionError> {
    let base: Vec<char> = previous
        .ok_or_else(|| SessionError::Parse("TLCP diff applied to a null value".to_string()))?
        .chars()
        .collect();
    let diff: Vec<char> = decode_text(diff).chars().collect();
    let bad = || SessionError::Parse("malformed TLCP diff".to_string());

    let mut out = String::new();
    let (mut i, mut cursor, mut phase) = (0usize, 0usize, 0u8);
    while i < diff.len() {
        let mut count = 0usize;
        loop {
            let c = *diff.get(i).ok_or_else(bad)?;
            i += 1;
            match c {
                'A'..='Z' => count = count * 26 + (c as usize - 'A' as usize),
                'a'..='z' => {
                    count = count * 26 + (c as usize - 'a' as usize);
                    break;
                }
                _ => return Err(bad()),
            }
        }
        match phase {
            0 => {
                let end = cursor + count;
                out.extend(base.get(cursor..end).ok_or_else(bad)?);
                cursor = end;
            }
            1 => {
                let end = i + count;
                out.extend(diff.get(i..end).ok_or_else(bad)?);
                i = end;
            }
            _ => {
                cursor += count;
                if cursor > base.len() {
                    return Err(bad());
                }
            }
        }
        phase = (phase + 1) % 3;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_first_update_fills_all_fields() {
        let mut current = vec![None; 3];
        let changed = apply_update("10.5|ACME%20Corp|$", &mut current).unwrap();
        assert_eq!(changed, vec![0, 1, 2]);
        assert_eq!(current, fields(&[Some("10.5"), Some("ACME Corp"), Some("")]));
    }

    #[test]
    fn test_unchanged_and_skips() {
        let mut current = fields(&[Some("a"), Some("b"), Some("c"), Some("d")]);
        let changed = apply_update("|^2|z", &mut current).unwrap();
        assert_eq!(changed, vec![3]);
        assert_eq!(current, fields(&[Some("a"), Some("b"), Some("c"), Some("z")]));
    }

    #[test]
    fn test_null_and_same_value_is_not_a_change() {
        let mut current = fields(&[Some("a"), Some("b")]);
        let changed = apply_update("#|b", &mut current).unwrap();
        assert_eq!(changed, vec![0]);
        assert_eq!(current, fields(&[None, Some("b")]));
    }

    #[test]
    fn test_json_patch() {
        let mut current = fields(&[Some(r#"{"bid":1,"ask":2}"#)]);
        let patch = r#"[{"op":"replace","path":"/bid","value":3}]"#;
        let changed = apply_update(&format!("^P{}", patch), &mut current).unwrap();
        assert_eq!(changed, vec![0]);
        let value: Value = serde_json::from_str(current[0].as_deref().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"bid": 3, "ask": 2}));
    }

    #[test]
    fn test_json_patch_on_null_fails() {
        let mut current = vec![None];
        assert!(apply_update("^P[]", &mut current).is_err());
    }

    #[test]
    fn test_tlcp_diff() {
        // copy 5 "hello", add 6 " world", delete 0
        let mut current = fields(&[Some("hello there")]);
        apply_update("^Tfg world", &mut current).unwrap();
        assert_eq!(current[0].as_deref(), Some("hello world"));
    }

    #[test]
    fn test_too_many_values() {
        let mut current = vec![None; 1];
        assert!(apply_update("a|b", &mut current).is_err());
        assert!(apply_update("^3", &mut current).is_err());
    }
}
