//! Text canonicalization for fuzzy alignment.
//!
//! Folds characters that render alike (smart quotes, non-breaking and thin
//! spaces, dash variants) to ASCII and lowercases, one output character per
//! input character, so positions map straight back to the original text.

/// Canonical form of a string plus a map back to byte offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    chars: Vec<char>,
    /// `offsets[i]` is the byte offset of char `i`; one extra entry for the end
    offsets: Vec<usize>,
}

impl Canonical {
    pub fn new(text: &str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut offsets = Vec::with_capacity(text.len() + 1);
        for (i, c) in text.char_indices() {
            chars.push(canon_char(c));
            offsets.push(i);
        }
        offsets.push(text.len());
        Canonical { chars, offsets }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Byte offset in the original text of canonical char `index`
    pub fn byte_offset(&self, index: usize) -> usize {
        self.offsets[index.min(self.chars.len())]
    }

    pub fn starts_with(&self, prefix: &[char]) -> bool {
        self.chars.starts_with(prefix)
    }

    /// Char positions where `needle` occurs
    pub fn find_all(&self, needle: &[char]) -> Vec<usize> {
        if needle.is_empty() || needle.len() > self.chars.len() {
            return Vec::new();
        }
        self.chars
            .windows(needle.len())
            .enumerate()
            .filter(|(_, window)| *window == needle)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Canonical form of a single character
pub fn canon_char(c: char) -> char {
    let folded = match c {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '`' => '\'',
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '\u{00AB}'
        | '\u{00BB}' => '"',
        '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}' => ' ',
        '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE58}' | '\u{FE63}' | '\u{FF0D}' => '-',
        c => c,
    };
    folded.to_lowercase().next().unwrap_or(folded)
}

/// Canonical form of a whole string
pub fn canonicalize(text: &str) -> String {
    text.chars().map(canon_char).collect()
}
