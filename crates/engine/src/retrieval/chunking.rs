/// Characters of page text considered for chunking.
const MAX_TEXT_CHARS: usize = 500_000;

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "inc", "ltd",
    "co", "corp", "no", "u.s", "u.k", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "sept", "oct", "nov", "dec",
];

/// A window of consecutive sentences. `start..=end` are sentence indices.
#[derive(Clone, Debug, PartialEq)]
pub struct Passage {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Passage {
    pub fn overlaps(&self, other: &Passage) -> bool {
        (self.start >= other.start && self.start <= other.end)
            || (self.end >= other.start && self.end <= other.end)
    }
}

fn ends_with_abbreviation(sentence: &str) -> bool {
    let last = sentence
        .trim_end_matches(['.', '!', '?'])
        .rsplit(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_lowercase();
    let initial = last.chars().count() == 1 && last.chars().all(char::is_alphabetic);
    initial || ABBREVIATIONS.contains(&last.as_str())
}

/// Split text into sentences at `.`, `!` or `?` followed by whitespace and
/// an uppercase letter, digit or opening quote. Newlines always split.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(c);

        if matches!(c, '.' | '!' | '?') {
            while let Some(&next) = chars.peek() {
                if matches!(next, '.' | '!' | '?' | '"' | '\'' | ')' | '\u{201d}') {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            let Some(&space) = chars.peek() else {
                continue;
            };
            if !space.is_whitespace() || space == '\n' {
                continue;
            }
            let mut lookahead = chars.clone();
            let following = lookahead.find(|ch| !ch.is_whitespace());
            let starts_sentence = following.is_some_and(|ch| {
                ch.is_uppercase()
                    || ch.is_ascii_digit()
                    || matches!(ch, '"' | '\'' | '\u{201c}' | '(')
            });
            if starts_sentence && !(c == '.' && ends_with_abbreviation(&current)) {
                push_sentence(&mut sentences, &mut current);
            }
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let sentence = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !sentence.is_empty() {
        sentences.push(sentence);
    }
    current.clear();
}

/// Sliding sentence windows over `text`. Sentences outside
/// `min_chars..=max_chars` are discarded before windowing.
pub fn chunk_text(
    text: &str,
    window: usize,
    stride: usize,
    min_chars: usize,
    max_chars: usize,
) -> Vec<Passage> {
    let window = window.max(1);
    let stride = stride.max(1);
    let text: String = text.chars().take(MAX_TEXT_CHARS).collect();

    let sentences: Vec<String> = split_sentences(&text)
        .into_iter()
        .filter(|s| {
            let len = s.chars().count();
            len >= min_chars && len <= max_chars
        })
        .collect();

    (0..sentences.len())
        .step_by(stride)
        .map(|start| {
            let stop = (start + window).min(sentences.len());
            Passage {
                text: sentences[start..stop].join(" "),
                start,
                end: start + window - 1,
            }
        })
        .collect()
}

/// Highest-scoring passages that do not overlap an already selected one,
/// at most `cap`. `scored` need not be sorted.
pub fn select_non_overlapping(mut scored: Vec<(Passage, f64)>, cap: usize) -> Vec<(Passage, f64)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut selected: Vec<(Passage, f64)> = Vec::new();
    for (passage, score) in scored {
        if selected.len() >= cap {
            break;
        }
        if selected.iter().any(|(p, _)| passage.overlaps(p)) {
            continue;
        }
        selected.push((passage, score));
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences() {
        let text = "Dr. Smith arrived at 9 a.m. on Monday. He spoke briefly! Was it enough? \"Yes,\" said one.\nNew line here";
        let sentences = split_sentences(text);
        assert_eq!(
            sentences,
            vec![
                "Dr. Smith arrived at 9 a.m. on Monday.",
                "He spoke briefly!",
                "Was it enough?",
                "\"Yes,\" said one.",
                "New line here",
            ]
        );
    }

    #[test]
    fn test_decimal_not_split() {
        assert_eq!(
            split_sentences("Growth was 2.5 percent. Prices rose."),
            vec!["Growth was 2.5 percent.", "Prices rose."]
        );
    }

    #[test]
    fn test_chunk_windows_and_stride() {
        let text = (0..12)
            .map(|i| format!("Sentence number {i} is here."))
            .collect::<Vec<_>>()
            .join(" ");
        let passages = chunk_text(&text, 10, 8, 3, 250);
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].start, 0);
        assert_eq!(passages[0].end, 9);
        assert!(passages[0].text.starts_with("Sentence number 0"));
        assert!(passages[0].text.ends_with("Sentence number 9 is here."));
        assert_eq!(passages[1].start, 8);
        assert!(passages[1].text.ends_with("Sentence number 11 is here."));
    }

    #[test]
    fn test_chunk_filters_sentence_length() {
        let long = "x".repeat(300);
        let text = format!("Ok. A normal sentence. Z{long}.");
        let passages = chunk_text(&text, 10, 8, 3, 250);
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "Ok. A normal sentence.");
    }

    #[test]
    fn test_select_non_overlapping() {
        let p = |start, end| Passage {
            text: format!("{start}-{end}"),
            start,
            end,
        };
        let scored = vec![
            (p(0, 9), 0.5),
            (p(8, 17), 0.9),
            (p(16, 25), 0.7),
            (p(24, 33), 0.1),
        ];
        let selected = select_non_overlapping(scored, 5);
        let starts: Vec<usize> = selected.iter().map(|(p, _)| p.start).collect();
        assert_eq!(starts, vec![8, 24]);
    }

    #[test]
    fn test_select_respects_cap() {
        let scored = (0..5)
            .map(|i| {
                (
                    Passage {
                        text: String::new(),
                        start: i * 20,
                        end: i * 20 + 9,
                    },
                    i as f64,
                )
            })
            .collect();
        assert_eq!(select_non_overlapping(scored, 2).len(), 2);
    }
}
