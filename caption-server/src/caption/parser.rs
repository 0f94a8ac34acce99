//! Pairs model output lines into caption records.
//!
//! The model is asked for one caption line followed by one hashtag line. The
//! output is not contractually structured, so the pairing is lossy: a pair whose
//! second line is not a hashtag line is dropped as a whole.

use super::CaptionRecord;

const MAX_HASHTAGS: usize = 5;

pub fn parse_captions(text: &str) -> Vec<CaptionRecord> {
    let lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();

    lines
        .chunks_exact(2)
        .filter_map(|pair| {
            let (caption, hashtags) = (pair[0], pair[1]);
            hashtags.starts_with('#').then(|| CaptionRecord {
                caption: caption.to_string(),
                hashtags: filter_hashtags(hashtags),
            })
        })
        .collect()
}

fn filter_hashtags(line: &str) -> String {
    line.split_whitespace()
        .filter(|tag| tag.starts_with('#'))
        .take(MAX_HASHTAGS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_captions_with_hashtags() {
        let text = "Caught mid-laugh.\n#funny #laugh #mood\n\n  Life is better with friends.  \n#friends #squad\n";
        let records = parse_captions(text);
        assert_eq!(
            records,
            vec![
                CaptionRecord {
                    caption: "Caught mid-laugh.".into(),
                    hashtags: "#funny #laugh #mood".into(),
                },
                CaptionRecord {
                    caption: "Life is better with friends.".into(),
                    hashtags: "#friends #squad".into(),
                },
            ]
        );
    }

    #[test]
    fn test_hashtags_are_filtered_and_capped() {
        let text = "Sunset vibes\n#one two #three   #four and #five #six #seven";
        let records = parse_captions(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hashtags, "#one #three #four #five #six");
        let tags = records[0].hashtags.split(' ').collect::<Vec<_>>();
        assert!(tags.len() <= MAX_HASHTAGS);
        assert!(tags.iter().all(|t| t.starts_with('#')));
    }

    #[test]
    fn test_pair_without_hashtag_line_is_dropped() {
        // The second line is not re-tried as the start of the next pair.
        let text = "First caption\nSecond caption\nThird caption\n#kept";
        let records = parse_captions(text);
        assert_eq!(
            records,
            vec![CaptionRecord {
                caption: "Third caption".into(),
                hashtags: "#kept".into(),
            }]
        );
    }

    #[test]
    fn test_misaligned_output_drops_every_pair() {
        let text = "Caption one\nCaption two\n#tags #here";
        assert!(parse_captions(text).is_empty());
    }

    #[test]
    fn test_trailing_line_is_ignored() {
        let text = "Caption one\n#one\nDangling caption";
        let records = parse_captions(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].caption, "Caption one");
    }

    #[test]
    fn test_crlf_and_blank_output() {
        assert!(parse_captions("").is_empty());
        assert!(parse_captions("   \n\n  ").is_empty());
        let records = parse_captions("Caption\r\n#tag\r\n");
        assert_eq!(records[0].caption, "Caption");
        assert_eq!(records[0].hashtags, "#tag");
    }
}
