use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONTRACT_VERSION: &str = "1.0";
pub const CONTRACT_UNITS: &str = "ms";

/// Strict v1.0 line-timing document. `deny_unknown_fields` enforces the
/// "exactly these fields" clause of the contract at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimedLyrics {
    pub version: String,
    pub units: String,
    pub line_count: i64,
    pub lyrics: Vec<TimedLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimedLine {
    pub line_index: i64,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub text: String,
}

impl TimedLine {
    pub fn is_aligned(&self) -> bool {
        self.start_ms.is_some() && self.end_ms.is_some()
    }
}

impl TimedLyrics {
    pub fn new(lyrics: Vec<TimedLine>) -> Self {
        TimedLyrics {
            version: CONTRACT_VERSION.to_string(),
            units: CONTRACT_UNITS.to_string(),
            line_count: lyrics.len() as i64,
            lyrics,
        }
    }

    pub fn aligned_line_count(&self) -> usize {
        self.lyrics.iter().filter(|line| line.is_aligned()).count()
    }

    pub fn null_line_count(&self) -> usize {
        self.lyrics.len() - self.aligned_line_count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimingViolation {
    #[error("version must be \"{CONTRACT_VERSION}\", found \"{found}\"")]
    VersionMismatch { found: String },
    #[error("units must be \"{CONTRACT_UNITS}\", found \"{found}\"")]
    UnitsMismatch { found: String },
    #[error("line_count is {declared} but lyrics has {actual} entries")]
    LineCountMismatch { declared: i64, actual: usize },
    #[error("entry {position} has line_index {found}, expected {expected}")]
    LineIndexMismatch {
        position: usize,
        expected: i64,
        found: i64,
    },
    #[error("line {line_index} has a half-null span; start_ms and end_ms must be both set or both null")]
    HalfNullSpan { line_index: i64 },
    #[error("line {line_index} has negative start_ms {start}")]
    NegativeStart { line_index: i64, start: i64 },
    #[error("line {line_index} has start_ms {start} >= end_ms {end}")]
    EmptySpan {
        line_index: i64,
        start: i64,
        end: i64,
    },
    #[error("line {line_index} ends at {end} which exceeds track duration {duration}")]
    ExceedsDuration {
        line_index: i64,
        end: i64,
        duration: i64,
    },
    #[error("line {line_index} starts at {start}, before the previous aligned line ends at {prev_end}")]
    OverlapsPrevious {
        line_index: i64,
        start: i64,
        prev_end: i64,
    },
    #[error("expected {expected} entries for the source lyrics, found {actual}")]
    SourceLineCountMismatch { expected: usize, actual: usize },
    #[error("line {line_index} text does not match the source lyric line")]
    TextMismatch { line_index: i64 },
}

/// Checks a timing document against the strict contract. Source lines and
/// track duration are optional; the corresponding checks run only when the
/// caller can supply them. An empty result means the document is valid.
pub fn validate_contract(
    doc: &TimedLyrics,
    source_lines: Option<&[String]>,
    track_duration_ms: Option<i64>,
) -> Vec<TimingViolation> {
    let mut violations = Vec::new();

    if doc.version != CONTRACT_VERSION {
        violations.push(TimingViolation::VersionMismatch {
            found: doc.version.clone(),
        });
    }
    if doc.units != CONTRACT_UNITS {
        violations.push(TimingViolation::UnitsMismatch {
            found: doc.units.clone(),
        });
    }
    if doc.line_count != doc.lyrics.len() as i64 {
        violations.push(TimingViolation::LineCountMismatch {
            declared: doc.line_count,
            actual: doc.lyrics.len(),
        });
    }

    if let Some(source) = source_lines {
        if source.len() != doc.lyrics.len() {
            violations.push(TimingViolation::SourceLineCountMismatch {
                expected: source.len(),
                actual: doc.lyrics.len(),
            });
        }
    }

    let mut prev_end: Option<i64> = None;
    for (position, line) in doc.lyrics.iter().enumerate() {
        let expected_index = position as i64 + 1;
        if line.line_index != expected_index {
            violations.push(TimingViolation::LineIndexMismatch {
                position,
                expected: expected_index,
                found: line.line_index,
            });
        }

        if let Some(source) = source_lines {
            if let Some(source_line) = source.get(position) {
                if source_line != &line.text {
                    violations.push(TimingViolation::TextMismatch {
                        line_index: line.line_index,
                    });
                }
            }
        }

        match (line.start_ms, line.end_ms) {
            (None, None) => {}
            (Some(start), Some(end)) => {
                if start < 0 {
                    violations.push(TimingViolation::NegativeStart {
                        line_index: line.line_index,
                        start,
                    });
                }
                if start >= end {
                    violations.push(TimingViolation::EmptySpan {
                        line_index: line.line_index,
                        start,
                        end,
                    });
                }
                if let Some(duration) = track_duration_ms {
                    if end > duration {
                        violations.push(TimingViolation::ExceedsDuration {
                            line_index: line.line_index,
                            end,
                            duration,
                        });
                    }
                }
                // Monotonicity is checked against the previous aligned line;
                // null lines do not break the chain.
                if let Some(prev) = prev_end {
                    if start < prev {
                        violations.push(TimingViolation::OverlapsPrevious {
                            line_index: line.line_index,
                            start,
                            prev_end: prev,
                        });
                    }
                }
                prev_end = Some(end);
            }
            _ => {
                violations.push(TimingViolation::HalfNullSpan {
                    line_index: line.line_index,
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(index: i64, start: Option<i64>, end: Option<i64>, text: &str) -> TimedLine {
        TimedLine {
            line_index: index,
            start_ms: start,
            end_ms: end,
            text: text.to_string(),
        }
    }

    fn valid_doc() -> TimedLyrics {
        TimedLyrics::new(vec![
            line(1, Some(0), Some(1200), "I wake up slow"),
            line(2, None, None, ""),
            line(3, Some(1500), Some(2800), "Do math, do math"),
        ])
    }

    #[test]
    fn accepts_a_valid_document() {
        let doc = valid_doc();
        assert!(validate_contract(&doc, None, Some(200_000)).is_empty());
        assert_eq!(doc.aligned_line_count(), 2);
        assert_eq!(doc.null_line_count(), 1);
    }

    #[test]
    fn rejects_wrong_version_and_units() {
        let mut doc = valid_doc();
        doc.version = "2.0".to_string();
        doc.units = "s".to_string();
        let violations = validate_contract(&doc, None, None);
        assert!(violations.contains(&TimingViolation::VersionMismatch {
            found: "2.0".to_string()
        }));
        assert!(violations.contains(&TimingViolation::UnitsMismatch {
            found: "s".to_string()
        }));
    }

    #[test]
    fn rejects_line_count_mismatch() {
        let mut doc = valid_doc();
        doc.line_count = 7;
        let violations = validate_contract(&doc, None, None);
        assert!(violations.contains(&TimingViolation::LineCountMismatch {
            declared: 7,
            actual: 3
        }));
    }

    #[test]
    fn line_index_must_be_one_based_and_sequential() {
        let doc = TimedLyrics::new(vec![
            line(0, Some(0), Some(100), "a"),
            line(2, Some(100), Some(200), "b"),
        ]);
        let violations = validate_contract(&doc, None, None);
        assert_eq!(
            violations,
            vec![TimingViolation::LineIndexMismatch {
                position: 0,
                expected: 1,
                found: 0
            }]
        );
    }

    #[test]
    fn rejects_half_null_spans() {
        let doc = TimedLyrics::new(vec![line(1, Some(10), None, "a")]);
        let violations = validate_contract(&doc, None, None);
        assert_eq!(
            violations,
            vec![TimingViolation::HalfNullSpan { line_index: 1 }]
        );
    }

    #[test]
    fn rejects_inverted_and_overlong_spans() {
        let doc = TimedLyrics::new(vec![
            line(1, Some(500), Some(500), "a"),
            line(2, Some(600), Some(9000), "b"),
        ]);
        let violations = validate_contract(&doc, None, Some(8000));
        assert!(violations.contains(&TimingViolation::EmptySpan {
            line_index: 1,
            start: 500,
            end: 500
        }));
        assert!(violations.contains(&TimingViolation::ExceedsDuration {
            line_index: 2,
            end: 9000,
            duration: 8000
        }));
    }

    #[test]
    fn overlap_check_skips_null_lines() {
        let doc = TimedLyrics::new(vec![
            line(1, Some(0), Some(1000), "a"),
            line(2, None, None, "b"),
            line(3, Some(900), Some(1500), "c"),
        ]);
        let violations = validate_contract(&doc, None, None);
        assert_eq!(
            violations,
            vec![TimingViolation::OverlapsPrevious {
                line_index: 3,
                start: 900,
                prev_end: 1000
            }]
        );
    }

    #[test]
    fn touching_spans_are_allowed() {
        let doc = TimedLyrics::new(vec![
            line(1, Some(0), Some(1000), "a"),
            line(2, Some(1000), Some(2000), "b"),
        ]);
        assert!(validate_contract(&doc, None, None).is_empty());
    }

    #[test]
    fn text_must_match_source_lines_exactly() {
        let doc = valid_doc();
        let source = vec![
            "I wake up slow".to_string(),
            String::new(),
            "Do math do math".to_string(),
        ];
        let violations = validate_contract(&doc, Some(&source), None);
        assert_eq!(
            violations,
            vec![TimingViolation::TextMismatch { line_index: 3 }]
        );
    }

    #[test]
    fn unknown_fields_fail_to_parse() {
        let raw = r#"{"version":"1.0","units":"ms","line_count":0,"lyrics":[],"extra":1}"#;
        assert!(serde_json::from_str::<TimedLyrics>(raw).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let doc = valid_doc();
        let raw = serde_json::to_string(&doc).unwrap();
        let parsed: TimedLyrics = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, doc);
    }
}
