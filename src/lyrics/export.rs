use crate::lyrics::timing::TimedLyrics;

fn format_lrc_stamp(ms: i64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let centis = (ms % 1000) / 10;
    format!("{:02}:{:02}.{:02}", minutes, seconds, centis)
}

fn format_srt_stamp(ms: i64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Renders aligned lines as LRC. Null lines carry no timestamp and are
/// skipped; blank aligned lines are kept so players clear the display.
pub fn to_lrc(doc: &TimedLyrics) -> String {
    let mut out = String::new();
    for line in &doc.lyrics {
        let (Some(start), Some(_)) = (line.start_ms, line.end_ms) else {
            continue;
        };
        out.push_str(&format!("[{}]{}\n", format_lrc_stamp(start), line.text));
    }
    out
}

/// Renders aligned lines as SRT cues, numbered sequentially over the emitted
/// cues rather than the source line indices.
pub fn to_srt(doc: &TimedLyrics) -> String {
    let mut out = String::new();
    let mut cue = 0usize;
    for line in &doc.lyrics {
        let (Some(start), Some(end)) = (line.start_ms, line.end_ms) else {
            continue;
        };
        if line.text.trim().is_empty() {
            continue;
        }
        cue += 1;
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            cue,
            format_srt_stamp(start),
            format_srt_stamp(end),
            line.text
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::timing::TimedLine;

    fn doc() -> TimedLyrics {
        TimedLyrics::new(vec![
            TimedLine {
                line_index: 1,
                start_ms: Some(12_500),
                end_ms: Some(15_000),
                text: "Do math, do math".to_string(),
            },
            TimedLine {
                line_index: 2,
                start_ms: None,
                end_ms: None,
                text: "unaligned line".to_string(),
            },
            TimedLine {
                line_index: 3,
                start_ms: Some(3_725_040),
                end_ms: Some(3_727_500),
                text: "way past the hour".to_string(),
            },
        ])
    }

    #[test]
    fn lrc_skips_null_lines_and_uses_centiseconds() {
        let lrc = to_lrc(&doc());
        assert_eq!(
            lrc,
            "[00:12.50]Do math, do math\n[62:05.04]way past the hour\n"
        );
    }

    #[test]
    fn srt_numbers_cues_sequentially_and_carries_hours() {
        let srt = to_srt(&doc());
        assert_eq!(
            srt,
            "1\n00:00:12,500 --> 00:00:15,000\nDo math, do math\n\n\
             2\n01:02:05,040 --> 01:02:07,500\nway past the hour\n\n"
        );
    }

    #[test]
    fn empty_document_renders_empty_output() {
        let empty = TimedLyrics::new(vec![]);
        assert!(to_lrc(&empty).is_empty());
        assert!(to_srt(&empty).is_empty());
    }
}
