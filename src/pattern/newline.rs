//! Newline Token
//!
//! Some providers normalise or reject raw newlines inside a constrained
//! string field, so the model is asked to spell them as a short ASCII
//! token instead. The token is chosen per generation so it never collides
//! with text that is already present.

/// Candidate tokens, tried in order
pub const DEFAULT_NEWLINE_TOKENS: &[&str] = &["<br>", "<nl>", "<lf>", "~~nl~~"];

/// Pick the first ASCII candidate absent from every text in `texts`.
///
/// When every candidate collides a fresh `<nl-N>` token is synthesised.
pub fn choose_newline_token<S: AsRef<str>>(candidates: &[S], texts: &[&str]) -> String {
    let collides = |token: &str| texts.iter().any(|t| t.contains(token));

    for candidate in candidates {
        let token = candidate.as_ref();
        if !token.is_empty() && token.is_ascii() && !token.contains('\n') && !collides(token) {
            return token.to_string();
        }
    }

    let mut n = 1usize;
    loop {
        let token = format!("<nl-{}>", n);
        if !collides(&token) {
            return token;
        }
        n += 1;
    }
}

/// Replace every `\n` with `token`
pub fn encode_newlines(text: &str, token: &str) -> String {
    text.replace('\n', token)
}

/// Replace every `token` with `\n`
pub fn decode_newlines(text: &str, token: &str) -> String {
    if token.is_empty() {
        return text.to_string();
    }
    text.replace(token, "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_free_candidate() {
        assert_eq!(choose_newline_token(DEFAULT_NEWLINE_TOKENS, &["plain"]), "<br>");
        assert_eq!(
            choose_newline_token(DEFAULT_NEWLINE_TOKENS, &["line<br>break"]),
            "<nl>"
        );
    }

    #[test]
    fn test_non_ascii_candidates_skipped() {
        assert_eq!(choose_newline_token(&["\u{23CE}", "<lf>"], &[]), "<lf>");
    }

    #[test]
    fn test_synthesised_when_all_collide() {
        let text = "<br><nl><lf>~~nl~~<nl-1>";
        assert_eq!(choose_newline_token(DEFAULT_NEWLINE_TOKENS, &[text]), "<nl-2>");
    }

    #[test]
    fn test_round_trip() {
        let original = "first line\nsecond line\n\nfourth";
        let encoded = encode_newlines(original, "<br>");
        assert!(!encoded.contains('\n'));
        assert_eq!(decode_newlines(&encoded, "<br>"), original);
    }
}
