use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

// Marker grammar: `{name}` or `{name: value}` where name is an identifier.
// Anything else between braces is ordinary lyric text and must survive
// stripping untouched.
static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\s*(?::([^{}]*))?\}").expect("valid tag regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneTag {
    pub name: String,
    /// `None` for bare boolean markers like `{lipsync}`.
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedLine {
    pub line_index: usize,
    pub text: String,
    pub tags: Vec<SceneTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedLyrics {
    pub lines: Vec<TaggedLine>,
}

impl ParsedLyrics {
    pub fn clean_text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tag_count(&self) -> usize {
        self.lines.iter().map(|line| line.tags.len()).sum()
    }
}

/// Removes exactly the marker spans. No other byte of the input changes, so
/// stripping an annotated text yields the unannotated original byte for byte.
pub fn strip_tags(text: &str) -> String {
    TAG_RE.replace_all(text, "").into_owned()
}

fn parse_line(line_index: usize, line: &str) -> TaggedLine {
    let mut tags = Vec::new();
    for captures in TAG_RE.captures_iter(line) {
        let name = captures[1].to_string();
        let value = captures
            .get(2)
            .map(|value| value.as_str().trim().to_string());
        tags.push(SceneTag { name, value });
    }

    TaggedLine {
        line_index,
        text: strip_tags(line),
        tags,
    }
}

/// Parses scene-annotated lyrics into clean per-line text plus the ordered tag
/// list for each line. Line indices are 1-based to match the timing contract.
pub fn parse_annotated(text: &str) -> ParsedLyrics {
    let normalized = text.replace("\r\n", "\n");
    let lines = normalized
        .split('\n')
        .enumerate()
        .map(|(index, line)| parse_line(index + 1, line))
        .collect();

    ParsedLyrics { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_value_and_boolean_tags() {
        let parsed = parse_annotated("{scene: bedroom}{lipsync}I wake up slow");
        let line = &parsed.lines[0];
        assert_eq!(line.text, "I wake up slow");
        assert_eq!(
            line.tags,
            vec![
                SceneTag {
                    name: "scene".to_string(),
                    value: Some("bedroom".to_string()),
                },
                SceneTag {
                    name: "lipsync".to_string(),
                    value: None,
                },
            ]
        );
    }

    #[test]
    fn stripping_is_byte_identical_to_unannotated_original() {
        let original = "I wake up slow\nthe ceiling spins  \n\nDo math, do math";
        let annotated =
            "{scene: bedroom}I wake up slow\nthe ceiling spins  {lipsync}\n\n{scene: classroom}Do math, do math";
        assert_eq!(strip_tags(annotated), original);
    }

    #[test]
    fn leaves_non_marker_braces_untouched() {
        let text = "count {1, 2, 3} and {not a tag!} and {";
        assert_eq!(strip_tags(text), text);
    }

    #[test]
    fn empty_value_is_kept_as_empty_string() {
        let parsed = parse_annotated("{scene:}hello");
        assert_eq!(
            parsed.lines[0].tags[0].value.as_deref(),
            Some("")
        );
    }

    #[test]
    fn blank_lines_are_preserved_as_lines() {
        let parsed = parse_annotated("first\n\nthird");
        assert_eq!(parsed.lines.len(), 3);
        assert_eq!(parsed.lines[1].text, "");
        assert_eq!(parsed.lines[2].line_index, 3);
    }

    #[test]
    fn normalizes_crlf_input() {
        let parsed = parse_annotated("one{lipsync}\r\ntwo");
        assert_eq!(parsed.lines.len(), 2);
        assert_eq!(parsed.lines[0].text, "one");
        assert_eq!(parsed.clean_text(), "one\ntwo");
    }
}
