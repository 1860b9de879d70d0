pub mod align;
pub mod export;
pub mod sections;
pub mod tags;
pub mod timing;

pub use align::{align_lyrics, align_section_words, split_lyric_lines, AlignmentOutcome};
pub use tags::{parse_annotated, strip_tags, ParsedLyrics};
pub use timing::{validate_contract, TimedLine, TimedLyrics, TimingViolation};
