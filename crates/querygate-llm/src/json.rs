use crate::LlmError;
use serde::de::DeserializeOwned;

/// Parse a JSON object out of a model completion.
///
/// Accepts bare JSON, or JSON wrapped in prose/markdown, in which case the
/// first complete brace-balanced object (ignoring braces inside strings) is
/// used.
pub fn parse_llm_json_object<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }

    let Some(start) = trimmed.find('{') else {
        return Err(LlmError::InvalidResponse(
            "model did not return JSON (no '{' found)".to_string(),
        ));
    };

    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    let mut end: Option<usize> = None;

    for (offset, ch) in trimmed[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + offset);
                    break;
                }
            }
            _ => {}
        }
    }

    let candidate = match end {
        Some(end) => &trimmed[start..=end],
        None => {
            let Some(end) = trimmed.rfind('}') else {
                return Err(LlmError::InvalidResponse(
                    "model did not return JSON (no '}' found)".to_string(),
                ));
            };
            &trimmed[start..=end]
        }
    };

    serde_json::from_str(candidate)
        .map_err(|e| LlmError::InvalidResponse(format!("model returned invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_bare_object() {
        let v: Value = parse_llm_json_object(r#"{"tables": ["public.orders"]}"#).unwrap();
        assert_eq!(v["tables"][0], "public.orders");
    }

    #[test]
    fn test_object_inside_prose_and_fences() {
        let text = "Sure!\n```json\n{\"a\": \"}\", \"b\": {\"c\": 1}}\n```\ntrailing {junk";
        let v: Value = parse_llm_json_object(text).unwrap();
        assert_eq!(v["a"], "}");
        assert_eq!(v["b"]["c"], 1);
    }

    #[test]
    fn test_non_ascii_prefix() {
        let v: Value = parse_llm_json_object("Voilà… {\"ok\": true}").unwrap();
        assert_eq!(v["ok"], true);
    }

    #[test]
    fn test_no_json() {
        assert!(parse_llm_json_object::<Value>("no structure here").is_err());
    }
}
