use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StampParseError {
    #[error("timestamp '{0}' is not of the form MM:SS.mmm")]
    Malformed(String),
    #[error("timestamp '{0}' has seconds >= 60")]
    SecondsOutOfRange(String),
}

/// `MM:SS.mmm` clock stamp used by the word-level timing contract. Minutes
/// may exceed 59; there is no hour field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockStamp {
    total_ms: i64,
}

impl ClockStamp {
    pub fn from_ms(total_ms: i64) -> Self {
        ClockStamp { total_ms }
    }

    pub fn as_ms(&self) -> i64 {
        self.total_ms
    }
}

impl FromStr for ClockStamp {
    type Err = StampParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let malformed = || StampParseError::Malformed(value.to_string());

        let (minutes_part, rest) = value.split_once(':').ok_or_else(malformed)?;
        let (seconds_part, millis_part) = rest.split_once('.').ok_or_else(malformed)?;

        if minutes_part.len() < 2
            || seconds_part.len() != 2
            || millis_part.len() != 3
            || !minutes_part.bytes().all(|b| b.is_ascii_digit())
            || !seconds_part.bytes().all(|b| b.is_ascii_digit())
            || !millis_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }

        let minutes: i64 = minutes_part.parse().map_err(|_| malformed())?;
        let seconds: i64 = seconds_part.parse().map_err(|_| malformed())?;
        let millis: i64 = millis_part.parse().map_err(|_| malformed())?;

        if seconds >= 60 {
            return Err(StampParseError::SecondsOutOfRange(value.to_string()));
        }

        Ok(ClockStamp {
            total_ms: (minutes * 60 + seconds) * 1000 + millis,
        })
    }
}

impl fmt::Display for ClockStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = self.total_ms / 60_000;
        let seconds = (self.total_ms % 60_000) / 1000;
        let millis = self.total_ms % 1000;
        write!(f, "{:02}:{:02}.{:03}", minutes, seconds, millis)
    }
}

impl TryFrom<String> for ClockStamp {
    type Error = StampParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockStamp> for String {
    fn from(stamp: ClockStamp) -> String {
        stamp.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordTiming {
    pub word: String,
    pub start_time: ClockStamp,
    pub end_time: ClockStamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineTiming {
    pub line: String,
    pub start_time: ClockStamp,
    pub end_time: ClockStamp,
    pub words: Vec<WordTiming>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionTiming {
    pub lines: Vec<LineTiming>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SectionViolation {
    #[error("line {line}: startTime {start} is not before endTime {end}")]
    InvertedLineSpan {
        line: usize,
        start: ClockStamp,
        end: ClockStamp,
    },
    #[error("line {line}, word {word}: startTime {start} is not before endTime {end}")]
    InvertedWordSpan {
        line: usize,
        word: usize,
        start: ClockStamp,
        end: ClockStamp,
    },
    #[error("line {line}, word {word}: span lies outside the line span")]
    WordOutsideLine { line: usize, word: usize },
    #[error("line {line}, word {word}: starts before the previous word ends")]
    WordsOutOfOrder { line: usize, word: usize },
}

pub fn validate_section(section: &SectionTiming) -> Vec<SectionViolation> {
    let mut violations = Vec::new();

    for (line_pos, line) in section.lines.iter().enumerate() {
        if line.start_time >= line.end_time {
            violations.push(SectionViolation::InvertedLineSpan {
                line: line_pos,
                start: line.start_time,
                end: line.end_time,
            });
        }

        let mut prev_end: Option<ClockStamp> = None;
        for (word_pos, word) in line.words.iter().enumerate() {
            if word.start_time >= word.end_time {
                violations.push(SectionViolation::InvertedWordSpan {
                    line: line_pos,
                    word: word_pos,
                    start: word.start_time,
                    end: word.end_time,
                });
            }
            if word.start_time < line.start_time || word.end_time > line.end_time {
                violations.push(SectionViolation::WordOutsideLine {
                    line: line_pos,
                    word: word_pos,
                });
            }
            if let Some(prev) = prev_end {
                if word.start_time < prev {
                    violations.push(SectionViolation::WordsOutOfOrder {
                        line: line_pos,
                        word: word_pos,
                    });
                }
            }
            prev_end = Some(word.end_time);
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(value: &str) -> ClockStamp {
        value.parse().unwrap()
    }

    #[test]
    fn parses_and_renders_stamps() {
        assert_eq!(stamp("03:07.420").as_ms(), 187_420);
        assert_eq!(stamp("00:00.000").as_ms(), 0);
        assert_eq!(ClockStamp::from_ms(187_420).to_string(), "03:07.420");
    }

    #[test]
    fn minutes_may_exceed_fifty_nine() {
        assert_eq!(stamp("75:01.001").as_ms(), 75 * 60_000 + 1001);
        assert_eq!(stamp("103:00.000").as_ms(), 103 * 60_000);
        assert_eq!(ClockStamp::from_ms(4_501_001).to_string(), "75:01.001");
    }

    #[test]
    fn minutes_must_be_zero_padded_to_two_digits() {
        assert!("1:02.003".parse::<ClockStamp>().is_err());
        assert!("9:59.999".parse::<ClockStamp>().is_err());
        assert_eq!(stamp("01:02.003").as_ms(), 62_003);
    }

    #[test]
    fn rejects_malformed_stamps() {
        for bad in ["1:02.003", "01:2.003", "01:02.03", "01:02", "01:62.000x", "ab:cd.efg"] {
            assert!(
                bad.parse::<ClockStamp>().is_err(),
                "expected '{bad}' to be rejected"
            );
        }
        assert_eq!(
            "01:62.000".parse::<ClockStamp>(),
            Err(StampParseError::SecondsOutOfRange("01:62.000".to_string()))
        );
    }

    #[test]
    fn deserializes_the_contract_shape() {
        let raw = r#"{
            "lines": [
                {
                    "line": "Do math, do math",
                    "startTime": "00:12.500",
                    "endTime": "00:15.000",
                    "words": [
                        { "word": "Do", "startTime": "00:12.500", "endTime": "00:12.900" },
                        { "word": "math,", "startTime": "00:12.900", "endTime": "00:13.600" }
                    ]
                }
            ]
        }"#;
        let section: SectionTiming = serde_json::from_str(raw).unwrap();
        assert_eq!(section.lines[0].words[1].word, "math,");
        assert_eq!(section.lines[0].start_time.as_ms(), 12_500);
        assert!(validate_section(&section).is_empty());

        let rendered = serde_json::to_value(&section).unwrap();
        assert_eq!(rendered["lines"][0]["startTime"], "00:12.500");
        assert_eq!(rendered["lines"][0]["words"][0]["endTime"], "00:12.900");
    }

    #[test]
    fn flags_words_outside_their_line() {
        let section = SectionTiming {
            lines: vec![LineTiming {
                line: "hey".to_string(),
                start_time: stamp("00:10.000"),
                end_time: stamp("00:12.000"),
                words: vec![WordTiming {
                    word: "hey".to_string(),
                    start_time: stamp("00:09.000"),
                    end_time: stamp("00:11.000"),
                }],
            }],
        };
        assert_eq!(
            validate_section(&section),
            vec![SectionViolation::WordOutsideLine { line: 0, word: 0 }]
        );
    }

    #[test]
    fn flags_out_of_order_words() {
        let section = SectionTiming {
            lines: vec![LineTiming {
                line: "a b".to_string(),
                start_time: stamp("00:00.000"),
                end_time: stamp("00:04.000"),
                words: vec![
                    WordTiming {
                        word: "a".to_string(),
                        start_time: stamp("00:01.000"),
                        end_time: stamp("00:02.000"),
                    },
                    WordTiming {
                        word: "b".to_string(),
                        start_time: stamp("00:01.500"),
                        end_time: stamp("00:03.000"),
                    },
                ],
            }],
        };
        assert_eq!(
            validate_section(&section),
            vec![SectionViolation::WordsOutOfOrder { line: 0, word: 1 }]
        );
    }
}
