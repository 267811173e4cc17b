use serde::de::DeserializeOwned;
use thiserror::Error;

/// Malformed model output
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("No JSON found in response. Preview: {0}...")]
    NoJson(String),

    #[error("Response JSON does not match the expected shape: {0}")]
    Shape(String),
}

/// Extract and parse JSON from an LLM response.
/// Handles: Markdown code blocks, conversational intro/outro, and nested
/// braces or brackets inside string values.
pub fn extract_json<T: DeserializeOwned>(response: &str) -> Result<T, ParseError> {
    let trimmed = response.trim();

    // Stage 1: direct parse (pure JSON response)
    if let Ok(parsed) = serde_json::from_str::<T>(trimmed) {
        return Ok(parsed);
    }

    // Stage 2: strip markdown code fences
    let cleaned = remove_markdown_blocks(trimmed);
    if let Ok(parsed) = serde_json::from_str::<T>(&cleaned) {
        return Ok(parsed);
    }

    // Stage 3: first balanced object or array in the text
    let mut last_error = None;
    for candidate in [find_balanced(&cleaned), find_balanced(trimmed)].into_iter().flatten() {
        match serde_json::from_str::<T>(candidate) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    match last_error {
        Some(e) => Err(ParseError::Shape(e)),
        None => Err(ParseError::NoJson(trimmed.chars().take(200).collect())),
    }
}

/// Remove a surrounding ```json ... ``` (or bare ```) fence
fn remove_markdown_blocks(text: &str) -> String {
    let Some(start) = text.find("```") else {
        return text.to_string();
    };
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

/// Find the first balanced `{...}` or `[...]`, ignoring delimiters that
/// appear inside JSON strings
fn find_balanced(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Envelope {
        suggestions: Vec<Entry>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Entry {
        handle: String,
        name: String,
    }

    #[test]
    fn test_pure_json() {
        let input = r#"{"suggestions": [{"handle": "n1", "name": "seq01-opening"}]}"#;
        let result: Envelope = extract_json(input).unwrap();
        assert_eq!(result.suggestions[0].name, "seq01-opening");
    }

    #[test]
    fn test_markdown_code_block() {
        let input = "```json\n{\"suggestions\": []}\n```";
        let result: Envelope = extract_json(input).unwrap();
        assert!(result.suggestions.is_empty());
    }

    #[test]
    fn test_json_with_text_around() {
        let input = r#"Sure! Here are my ideas:
{"suggestions": [{"handle": "n2", "name": "chase {night}"}]}
Let me know if you want more."#;
        let result: Envelope = extract_json(input).unwrap();
        assert_eq!(result.suggestions[0].name, "chase {night}");
    }

    #[test]
    fn test_top_level_array() {
        let input = r#"Result: [{"handle": "n1", "name": "a"}, {"handle": "n2", "name": "b"}]"#;
        let result: Vec<Entry> = extract_json(input).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_no_json() {
        let result: Result<Envelope, _> = extract_json("I cannot help with that.");
        assert!(matches!(result, Err(ParseError::NoJson(_))));
    }

    #[test]
    fn test_wrong_shape() {
        let result: Result<Envelope, _> = extract_json(r#"{"ideas": []}"#);
        assert!(matches!(result, Err(ParseError::Shape(_))));
    }
}
