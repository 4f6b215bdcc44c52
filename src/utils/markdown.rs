use std::sync::LazyLock;

use regex::Regex;

#[derive(Clone, Debug, PartialEq)]
pub struct FencedBlock {
    pub lang: String,
    pub body: String,
}

/// Body of the first fenced block, or the whole text when there is no fence
pub fn extract_code_block(s: &str) -> String {
    match fenced_blocks(s).into_iter().next() {
        Some(block) => block.body,
        None => s.trim().to_string(),
    }
}

pub fn fenced_blocks(s: &str) -> Vec<FencedBlock> {
    REGEX_FENCED_BLOCK
        .captures_iter(s)
        .map(|caps| FencedBlock {
            lang: caps
                .get(1)
                .map(|m| m.as_str().to_lowercase())
                .unwrap_or_default(),
            body: caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        })
        .collect()
}

static REGEX_FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*```[ \t]*([\w+-]*)[^\n]*\n([\s\S]*?)^[ \t]*```")
        .expect("FENCED_BLOCK regex is invalid")
});

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_extract_code_block() {
        assert_eq!(extract_code_block("  foobar \n"), "foobar");

        assert_eq!(
            extract_code_block(
                r#"
```
foobar
```
"#
            ),
            "foobar"
        );

        if let Ok(json) = serde_json::from_str::<HashMap<&str, &str>>(&extract_code_block(
            r#"
Here is the declaration:

```json
{
    "foo": "bar"
}
```

Some more text
"#,
        )) {
            assert_eq!(json.get("foo"), Some(&"bar"));
        } else {
            assert!(false);
        }
    }

    #[test]
    fn test_fenced_blocks() {
        let text = r#"
A chart:

```mermaid
graph TD;
    A-->B;
```

and data:

```JSON
{"a": 1}
```
"#;

        let blocks = fenced_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lang, "mermaid");
        assert_eq!(blocks[0].body, "graph TD;\n    A-->B;");
        assert_eq!(blocks[1].lang, "json");
        assert_eq!(blocks[1].body, r#"{"a": 1}"#);

        assert!(fenced_blocks("no blocks").is_empty());
    }
}
