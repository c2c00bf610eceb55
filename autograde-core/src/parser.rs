//! Response parsing: turn free-form backend text into a bounded integer score.
//!
//! Backends are asked to finish with a `Score: <n>` line, but the text that
//! comes back is untrusted. [`split_response`] separates the score field from
//! the reasoning, and [`parse_score`] pulls an integer out of whatever text
//! it is handed.
//!
//! The numeric rule is deliberately simple: the LAST numeric token wins, a
//! leading minus sign is dropped, any fraction is truncated and the value is
//! clamped to `[0, max_points]`. A consequence is that `"8 out of 10"` reads
//! as `10`; callers that control the prompt should feed only the score field.

use regex::Regex;
use std::sync::LazyLock;

/// Maximal run of ASCII digits, optionally signed, optionally with one
/// decimal part.
static NUMERIC_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?[0-9]+(?:\.[0-9]+)?").expect("numeric token regex is valid"));

/// A `Score:` label at the start of a line or after a word boundary, so
/// `"... correctly. Score: 4"` is found but `subscore:` is not.
static SCORE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)(?:^[ \t*#>_-]*|\b)score[ \t*_]*[:=][ \t*_]*")
        .expect("score label regex is valid")
});

static REASONING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)reasoning[ \t*_]*[:=]").expect("reasoning label regex is valid")
});

static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[0-9]+(?:\.[0-9]+)?$").expect("bare number regex is valid"));

/// The response contained no digits at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoreParseError {
    #[error("no numeric token found in response")]
    NoNumericToken,
}

/// A parsed score together with whether clamping to the upper bound occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedScore {
    pub value: u32,
    pub clamped: bool,
}

/// Extract an integer score in `[0, max_points]` from `raw`.
///
/// ```
/// use autograde_core::parser::parse_score;
///
/// assert_eq!(parse_score("First 3, then 5, finally 8", 10), Ok(8));
/// assert_eq!(parse_score("-5", 10), Ok(5));
/// assert_eq!(parse_score("7.9", 10), Ok(7));
/// assert!(parse_score("excellent work", 10).is_err());
/// ```
pub fn parse_score(raw: &str, max_points: u32) -> Result<u32, ScoreParseError> {
    parse_score_detailed(raw, max_points).map(|parsed| parsed.value)
}

/// Like [`parse_score`], but also reports whether the value was clamped.
pub fn parse_score_detailed(raw: &str, max_points: u32) -> Result<ParsedScore, ScoreParseError> {
    let token = NUMERIC_TOKEN
        .find_iter(raw)
        .last()
        .ok_or(ScoreParseError::NoNumericToken)?
        .as_str();

    let unsigned = token.trim_start_matches('-');
    let integral = unsigned.split('.').next().unwrap_or(unsigned);
    // Only overflow can fail here since the token is all ASCII digits.
    let value: u64 = integral.parse().unwrap_or(u64::MAX);

    let upper = u64::from(max_points);
    Ok(ParsedScore {
        value: value.min(upper) as u32,
        clamped: value > upper,
    })
}

/// A backend response split into the part holding the score and the part
/// holding the explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseShape {
    pub score_field: String,
    pub reasoning: String,
}

impl ResponseShape {
    /// True when the score field is a plain number with nothing around it
    /// (markdown emphasis aside).
    pub fn score_is_bare_number(&self) -> bool {
        BARE_NUMBER.is_match(
            self.score_field
                .trim_matches(|c: char| c == '*' || c == '_' || c.is_whitespace()),
        )
    }
}

/// Separate the score field from the reasoning.
///
/// The score field is the text after the last `Score:` label up to the end of
/// its line; without a label it is the whole response. Reasoning is the text
/// after a `Reasoning:` label, else everything except the score field.
pub fn split_response(raw: &str) -> ResponseShape {
    let Some(label) = SCORE_LABEL.find_iter(raw).last() else {
        return ResponseShape {
            score_field: raw.trim().to_string(),
            reasoning: strip_reasoning_label(raw),
        };
    };

    let field_end = raw[label.end()..]
        .find('\n')
        .map_or(raw.len(), |i| label.end() + i);
    let score_field = raw[label.end()..field_end].trim().to_string();

    let rest = format!("{}\n{}", &raw[..label.start()], &raw[field_end..]);
    ResponseShape {
        score_field,
        reasoning: strip_reasoning_label(&rest),
    }
}

fn strip_reasoning_label(text: &str) -> String {
    match REASONING_LABEL.find(text) {
        Some(m) => text[m.end()..].trim().to_string(),
        None => text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_last_numeric_token_wins() {
        assert_eq!(parse_score("First 3, then 5, finally 8", 10), Ok(8));
    }

    #[test]
    fn test_negative_sign_is_stripped() {
        assert_eq!(parse_score("-5", 10), Ok(5));
        assert_eq!(parse_score("score: -2", 4), Ok(2));
    }

    #[test]
    fn test_out_of_reads_as_the_bound() {
        // Known sharp edge of the last-token rule.
        assert_eq!(parse_score("The score is 8 out of 10", 10), Ok(10));
    }

    #[test]
    fn test_fraction_is_truncated() {
        assert_eq!(parse_score("7.9", 10), Ok(7));
        assert_eq!(parse_score("about 2.5 points", 3), Ok(2));
    }

    #[test]
    fn test_clamped_to_max_points() {
        let parsed = parse_score_detailed("15", 10).unwrap();
        assert_eq!(parsed, ParsedScore { value: 10, clamped: true });
        let parsed = parse_score_detailed("10", 10).unwrap();
        assert!(!parsed.clamped);
    }

    #[test]
    fn test_overflowing_token_clamps() {
        let parsed = parse_score_detailed("99999999999999999999999", 6).unwrap();
        assert_eq!(parsed.value, 6);
        assert!(parsed.clamped);
    }

    #[test]
    fn test_no_digits_is_an_error() {
        assert_eq!(
            parse_score("excellent, deserves full marks", 10),
            Err(ScoreParseError::NoNumericToken)
        );
        assert_eq!(parse_score("", 1), Err(ScoreParseError::NoNumericToken));
    }

    #[test]
    fn test_non_ascii_digits_are_not_numeric() {
        assert!(parse_score("٣", 10).is_err());
    }

    #[test]
    fn test_split_response_with_labels() {
        let shape = split_response("Reasoning: Loops are correct and tidy.\nScore: 4");
        assert_eq!(shape.score_field, "4");
        assert_eq!(shape.reasoning, "Loops are correct and tidy.");
        assert!(shape.score_is_bare_number());
    }

    #[test]
    fn test_split_response_uses_last_score_line() {
        let shape = split_response("Score: 2\nOn reflection the edge cases pass.\n**Score:** 3");
        assert_eq!(shape.score_field, "3");
        assert!(shape.reasoning.contains("edge cases pass"));
    }

    #[test]
    fn test_split_response_label_mid_line() {
        let shape =
            split_response("Reasoning: handles every edge case correctly. Score: 4");
        assert_eq!(shape.score_field, "4");
        assert_eq!(shape.reasoning, "handles every edge case correctly.");
        assert!(shape.score_is_bare_number());

        let shape = split_response("Reasoning: first pass Score: 2, revised, Score: 3");
        assert_eq!(shape.score_field, "3");
    }

    #[test]
    fn test_split_response_ignores_embedded_score_words() {
        let shape = split_response("The subscore: 9 is irrelevant, 5");
        assert_eq!(shape.score_field, "The subscore: 9 is irrelevant, 5");
    }

    #[test]
    fn test_split_response_without_labels() {
        let shape = split_response("Solid work overall, 5");
        assert_eq!(shape.score_field, "Solid work overall, 5");
        assert_eq!(shape.reasoning, "Solid work overall, 5");
        assert!(!shape.score_is_bare_number());
    }

    #[test]
    fn test_bare_number_ignores_emphasis() {
        let shape = split_response("Score: **6**");
        assert!(shape.score_is_bare_number());
        assert_eq!(shape.reasoning, "");
    }
}
