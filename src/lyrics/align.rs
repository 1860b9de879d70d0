use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{CONFIG, LINE_TIMING_SYSTEM_PROMPT, WORD_TIMING_SYSTEM_PROMPT};
use crate::lyrics::sections::{validate_section, SectionTiming};
use crate::lyrics::timing::{validate_contract, TimedLine, TimedLyrics, TimingViolation};
use crate::providers::media::MediaFile;
use crate::providers::{acquire_provider_slot, call_gemini_text, Provider};

static FENCED_JSON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid fence regex")
});

#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    pub doc: TimedLyrics,
    pub attempts: usize,
    pub used_fallback: bool,
}

/// Splits raw lyrics into contract lines: CRLF normalized, inner blank lines
/// kept, a single trailing newline not counted as a phantom line.
pub fn split_lyric_lines(raw: &str) -> Vec<String> {
    let normalized = raw.replace("\r\n", "\n");
    let mut lines: Vec<String> = normalized.split('\n').map(|line| line.to_string()).collect();
    if lines.last().map(|line| line.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines
}

pub fn build_alignment_request(lines: &[String], track_duration_ms: Option<i64>) -> String {
    let mut request = String::new();
    if let Some(duration) = track_duration_ms {
        request.push_str(&format!("Track duration: {duration} ms.\n"));
    }
    request.push_str(&format!("Lyrics ({} lines):\n", lines.len()));
    for (index, line) in lines.iter().enumerate() {
        request.push_str(&format!("{}: {}\n", index + 1, line));
    }
    request
}

/// Recovers the JSON object from an LLM reply that may wrap it in markdown
/// fences or leading prose.
pub fn extract_json_object(response: &str) -> Option<String> {
    let trimmed = response.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }

    if let Some(captures) = FENCED_JSON_RE.captures(trimmed) {
        return Some(captures[1].to_string());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        Some(trimmed[start..=end].to_string())
    } else {
        None
    }
}

fn describe_violations(violations: &[TimingViolation]) -> String {
    violations
        .iter()
        .map(|violation| format!("- {violation}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_alignment_response(
    response: &str,
    lines: &[String],
    track_duration_ms: Option<i64>,
) -> Result<TimedLyrics, String> {
    let Some(raw_json) = extract_json_object(response) else {
        return Err("the reply did not contain a JSON object".to_string());
    };

    // Surface shape errors distinctly from contract violations: a reply that
    // is not even the right shape gets the full contract restated on retry.
    let value: Value = match serde_json::from_str(&raw_json) {
        Ok(value) => value,
        Err(err) => return Err(format!("the reply was not valid JSON: {err}")),
    };
    let doc: TimedLyrics = match serde_json::from_value(value) {
        Ok(doc) => doc,
        Err(err) => return Err(format!("the JSON did not match the contract shape: {err}")),
    };

    let violations = validate_contract(&doc, Some(lines), track_duration_ms);
    if violations.is_empty() {
        Ok(doc)
    } else {
        Err(format!(
            "the JSON violated the contract:\n{}",
            describe_violations(&violations)
        ))
    }
}

/// Evenly spaces the non-blank lines across the track. Blank lines keep null
/// spans. Used when the LLM cannot produce a valid alignment and the caller
/// opted into the heuristic. Errors when the track is too short to give every
/// singable line its own span; the result is re-validated before it leaves.
pub fn fallback_even_spacing(lines: &[String], track_duration_ms: i64) -> Result<TimedLyrics> {
    let gap = CONFIG.align_fallback_gap_ms;
    let singable: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, _)| index)
        .collect();

    if !singable.is_empty() && track_duration_ms < singable.len() as i64 {
        return Err(anyhow!(
            "Track duration {} ms is too short to space {} lines",
            track_duration_ms,
            singable.len()
        ));
    }

    let mut spans: Vec<(Option<i64>, Option<i64>)> = vec![(None, None); lines.len()];
    if !singable.is_empty() {
        let slot = track_duration_ms / singable.len() as i64;
        for (slot_index, line_index) in singable.iter().enumerate() {
            let start = slot_index as i64 * slot;
            let end = (start + slot - gap).max(start + 1).min(track_duration_ms);
            spans[*line_index] = (Some(start), Some(end));
        }
    }

    let doc = TimedLyrics::new(
        lines
            .iter()
            .zip(spans)
            .enumerate()
            .map(|(index, (text, (start_ms, end_ms)))| TimedLine {
                line_index: index as i64 + 1,
                start_ms,
                end_ms,
                text: text.clone(),
            })
            .collect(),
    );

    let violations = validate_contract(&doc, Some(lines), Some(track_duration_ms));
    if !violations.is_empty() {
        return Err(anyhow!(
            "Even spacing produced an invalid document:\n{}",
            describe_violations(&violations)
        ));
    }

    Ok(doc)
}

/// Runs LLM timestamp alignment for the given lyric lines, optionally against
/// the track audio. Invalid replies are retried with the problems quoted back
/// to the model; after `max_attempts` the even-spacing heuristic kicks in when
/// allowed (and a duration is known), otherwise the last error is returned.
pub async fn align_lyrics(
    lines: &[String],
    audio: Option<MediaFile>,
    track_duration_ms: Option<i64>,
    max_attempts: usize,
    allow_fallback: bool,
) -> Result<AlignmentOutcome> {
    if lines.is_empty() {
        return Err(anyhow!("No lyric lines to align"));
    }

    let base_request = build_alignment_request(lines, track_duration_ms);
    let max_attempts = max_attempts.max(1);
    let mut last_problem = String::new();

    for attempt in 1..=max_attempts {
        acquire_provider_slot(Provider::Gemini).await;

        let request = if attempt == 1 {
            base_request.clone()
        } else {
            format!(
                "{base_request}\nYour previous reply was rejected because {last_problem}\n\
                 Return the corrected JSON object and nothing else."
            )
        };

        let response = call_gemini_text(
            LINE_TIMING_SYSTEM_PROMPT,
            &request,
            audio.as_ref(),
            Some("line_timing_system_prompt"),
        )
        .await?;

        match parse_alignment_response(&response, lines, track_duration_ms) {
            Ok(doc) => {
                info!(
                    "Alignment succeeded on attempt {}/{} ({} aligned, {} null)",
                    attempt,
                    max_attempts,
                    doc.aligned_line_count(),
                    doc.null_line_count()
                );
                return Ok(AlignmentOutcome {
                    doc,
                    attempts: attempt,
                    used_fallback: false,
                });
            }
            Err(problem) => {
                warn!(
                    "Alignment attempt {}/{} rejected: {}",
                    attempt, max_attempts, problem
                );
                last_problem = problem;
            }
        }
    }

    if allow_fallback {
        if let Some(duration) = track_duration_ms {
            warn!("Falling back to even spacing after {max_attempts} rejected attempts");
            return Ok(AlignmentOutcome {
                doc: fallback_even_spacing(lines, duration)?,
                attempts: max_attempts,
                used_fallback: true,
            });
        }
        warn!("Fallback requested but no track duration is known; cannot space lines");
    }

    Err(anyhow!(
        "Alignment failed after {} attempts: {}",
        max_attempts,
        last_problem
    ))
}

fn parse_section_response(response: &str) -> Result<SectionTiming, String> {
    let Some(raw_json) = extract_json_object(response) else {
        return Err("the reply did not contain a JSON object".to_string());
    };

    let section: SectionTiming = match serde_json::from_str(&raw_json) {
        Ok(section) => section,
        Err(err) => return Err(format!("the JSON did not match the lines/words shape: {err}")),
    };

    let violations = validate_section(&section);
    if violations.is_empty() {
        Ok(section)
    } else {
        Err(format!(
            "the JSON violated the timing rules:\n{}",
            violations
                .iter()
                .map(|violation| format!("- {violation}"))
                .collect::<Vec<_>>()
                .join("\n")
        ))
    }
}

/// Word-level timing for one song section. Same retry discipline as line
/// alignment, but there is no spacing heuristic to fall back on: without a
/// valid reply this errors.
pub async fn align_section_words(
    section_text: &str,
    audio: Option<MediaFile>,
    max_attempts: usize,
) -> Result<SectionTiming> {
    if section_text.trim().is_empty() {
        return Err(anyhow!("No section text to time"));
    }

    let max_attempts = max_attempts.max(1);
    let mut last_problem = String::new();

    for attempt in 1..=max_attempts {
        acquire_provider_slot(Provider::Gemini).await;

        let request = if attempt == 1 {
            format!("Section:\n{section_text}")
        } else {
            format!(
                "Section:\n{section_text}\nYour previous reply was rejected because {last_problem}\n\
                 Return the corrected JSON object and nothing else."
            )
        };

        let response = call_gemini_text(
            WORD_TIMING_SYSTEM_PROMPT,
            &request,
            audio.as_ref(),
            Some("word_timing_system_prompt"),
        )
        .await?;

        match parse_section_response(&response) {
            Ok(section) => {
                info!(
                    "Word timing succeeded on attempt {}/{} ({} lines)",
                    attempt,
                    max_attempts,
                    section.lines.len()
                );
                return Ok(section);
            }
            Err(problem) => {
                warn!(
                    "Word timing attempt {}/{} rejected: {}",
                    attempt, max_attempts, problem
                );
                last_problem = problem;
            }
        }
    }

    Err(anyhow!(
        "Word timing failed after {} attempts: {}",
        max_attempts,
        last_problem
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_without_phantom_trailing_entry() {
        assert_eq!(
            split_lyric_lines("one\r\ntwo\n\nfour\n"),
            vec!["one", "two", "", "four"]
        );
        assert_eq!(split_lyric_lines(""), Vec::<String>::new());
    }

    #[test]
    fn extracts_fenced_json() {
        let response = "Here you go:\n```json\n{\"version\": \"1.0\"}\n```\nDone.";
        assert_eq!(
            extract_json_object(response).as_deref(),
            Some("{\"version\": \"1.0\"}")
        );
    }

    #[test]
    fn extracts_bare_json_with_prose() {
        let response = "Sure. {\"a\": 1} hope that helps";
        assert_eq!(extract_json_object(response).as_deref(), Some("{\"a\": 1}"));
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn numbers_lines_from_one_in_the_request() {
        let lines = vec!["first".to_string(), "second".to_string()];
        let request = build_alignment_request(&lines, Some(200_000));
        assert!(request.contains("Track duration: 200000 ms."));
        assert!(request.contains("1: first\n2: second\n"));
    }

    #[test]
    fn rejects_response_with_contract_violation() {
        let lines = vec!["a".to_string()];
        let response = r#"{"version":"1.0","units":"ms","line_count":1,
            "lyrics":[{"line_index":1,"start_ms":500,"end_ms":100,"text":"a"}]}"#;
        let err = parse_alignment_response(response, &lines, None).unwrap_err();
        assert!(err.contains("violated the contract"));
        assert!(err.contains("start_ms 500 >= end_ms 100"));
    }

    #[test]
    fn rejects_section_with_inverted_word_span() {
        let response = r#"{"lines":[{"line":"hey","startTime":"00:01.000","endTime":"00:03.000",
            "words":[{"word":"hey","startTime":"00:02.000","endTime":"00:01.500"}]}]}"#;
        let err = parse_section_response(response).unwrap_err();
        assert!(err.contains("violated the timing rules"));
    }

    #[test]
    fn fallback_spans_cover_only_singable_lines() {
        let lines = vec![
            "first".to_string(),
            String::new(),
            "third".to_string(),
        ];
        let doc = fallback_even_spacing(&lines, 10_000).unwrap();
        assert!(validate_contract(&doc, Some(&lines), Some(10_000)).is_empty());
        assert!(doc.lyrics[0].is_aligned());
        assert!(!doc.lyrics[1].is_aligned());
        assert!(doc.lyrics[2].is_aligned());
        assert_eq!(doc.lyrics[0].start_ms, Some(0));
        assert_eq!(doc.lyrics[2].start_ms, Some(5000));
    }

    #[test]
    fn fallback_rejects_durations_too_short_to_space_the_lines() {
        let lines = vec!["first".to_string(), "second".to_string()];
        let err = fallback_even_spacing(&lines, 1).unwrap_err();
        assert!(err.to_string().contains("too short"));
        assert!(fallback_even_spacing(&lines, 0).is_err());
    }

    #[test]
    fn fallback_one_ms_per_line_still_satisfies_the_contract() {
        let lines = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let doc = fallback_even_spacing(&lines, 3).unwrap();
        assert!(validate_contract(&doc, Some(&lines), Some(3)).is_empty());
        assert_eq!(doc.lyrics[2].end_ms, Some(3));
    }
}
