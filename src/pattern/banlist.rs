//! Ban-List Complement Automaton
//!
//! Builds a pattern fragment that consumes one "safe step" of text: a run
//! of characters that starts and ends in the root state of the phrase
//! automaton without ever completing a banned phrase. Repeating the step
//! and finishing with the tail fragment matches text that contains none of
//! the phrases.
//!
//! The automaton is a trie over the case-folded phrases with Aho-Corasick
//! failure links. Each phrase subtree becomes an alternation: trie edges
//! recurse, and a failure transition back to a state already on the path
//! becomes a `*` loop around the path segment it closes.
//!
//! A failure transition onto the first character of a phrase is a handoff:
//! the subtree ends there and the next phrase start is taken by a shared
//! loop over all subtrees. A state where some phrase starts would not land
//! on their own first character hands off under a class that forbids those
//! starts. Handoff classes and jumps into unrelated subtrees are what the
//! pattern size grows with, so large lists are rebuilt with fewer classes
//! and no jumps. Anything the coarser levels cannot follow is excluded,
//! never allowed: the fragment may reject some clean text but never
//! accepts a banned phrase.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet, VecDeque};

use regex::Regex;

use super::assembler::ContinuationToken;
use super::dialect::{escape_class_char, Dialect};

/// Step and tail fragments larger than this are rebuilt at a coarser level
pub const MAX_FRAGMENT_BYTES: usize = 32 * 1024;

/// Build levels, most permissive first: handoff classes kept (`None` for
/// all) and failure jumps into unrelated subtrees followed per step
const LEVELS: [(Option<usize>, usize); 5] = [
    (None, 1),
    (None, 0),
    (Some(3), 0),
    (Some(1), 0),
    (Some(0), 0),
];

const ROOT: usize = 0;

/// A deduplicated, case-folded list of banned phrases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanList {
    phrases: Vec<String>,
}

impl BanList {
    /// Parse a newline-separated list
    pub fn parse(text: &str) -> Self {
        Self::from_phrases(text.lines())
    }

    pub fn from_phrases<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        for phrase in phrases {
            let folded = fold_phrase(phrase.as_ref());
            if !folded.is_empty() && seen.insert(folded.clone()) {
                list.push(folded);
            }
        }
        BanList { phrases: list }
    }

    /// Merge another list into this one
    pub fn extend(&mut self, other: &BanList) {
        for phrase in &other.phrases {
            if !self.phrases.contains(phrase) {
                self.phrases.push(phrase.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// First phrase that occurs in `text`, ignoring case and spacing
    pub fn first_banned(&self, text: &str) -> Option<&str> {
        let folded = fold_phrase(text);
        self.phrases
            .iter()
            .find(|p| folded.contains(p.as_str()))
            .map(String::as_str)
    }

    /// Build the complement step for `dialect`.
    ///
    /// Returns `None` when the list is empty or the fragment could not be
    /// built; callers then use the unconstrained token.
    pub fn compile(&self, dialect: Dialect) -> Option<ContinuationToken> {
        let phrases: Vec<&str> = if dialect.capabilities().ascii_only {
            let (ascii, dropped): (Vec<&str>, Vec<&str>) = self
                .phrases
                .iter()
                .map(String::as_str)
                .partition(|p| p.is_ascii());
            if !dropped.is_empty() {
                log::warn!(
                    target: "structured_prefill::compile",
                    "dropping {} non-ASCII banned phrases for the {} dialect",
                    dropped.len(),
                    dialect
                );
            }
            ascii
        } else {
            self.phrases.iter().map(String::as_str).collect()
        };
        if phrases.is_empty() {
            return None;
        }

        let automaton = Automaton::build(&phrases);
        for (level, &(classes, jumps)) in LEVELS.iter().enumerate() {
            let builder = Builder::new(&automaton, classes);
            let Some((step, tail)) = builder.fragments(jumps) else {
                continue;
            };
            let check = format!("^(?:{step})+{tail}$");
            if let Err(err) = Regex::new(&check) {
                log::warn!(
                    target: "structured_prefill::compile",
                    "ban list pattern rejected, ignoring ban list: {}", err
                );
                return None;
            }
            log::debug!(
                target: "structured_prefill::compile",
                "ban list: {} phrases, {} nodes, level {}, {} classes, {} step bytes",
                phrases.len(),
                automaton.nodes.len(),
                level,
                builder.classes.len(),
                step.len()
            );
            return Some(ContinuationToken { step, tail });
        }

        log::warn!(
            target: "structured_prefill::compile",
            "ban list of {} phrases is too large, ignoring it",
            phrases.len()
        );
        None
    }
}

/// Lowercase and collapse whitespace runs to one space
fn fold_phrase(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<char, usize>,
    fail: usize,
    /// Reaching this state completes a phrase (directly or as a suffix)
    banned: bool,
}

/// Trie with failure links, nodes stored in an arena
#[derive(Debug)]
struct Automaton {
    nodes: Vec<Node>,
}

impl Automaton {
    fn build(phrases: &[&str]) -> Self {
        let mut nodes = vec![Node::default()];
        for phrase in phrases {
            let mut at = ROOT;
            for c in phrase.chars() {
                at = match nodes[at].children.get(&c) {
                    Some(&next) => next,
                    None => {
                        nodes.push(Node::default());
                        let next = nodes.len() - 1;
                        nodes[at].children.insert(c, next);
                        next
                    }
                };
            }
            nodes[at].banned = true;
        }

        let mut queue: VecDeque<usize> = nodes[ROOT].children.values().copied().collect();
        while let Some(at) = queue.pop_front() {
            let edges: Vec<(char, usize)> =
                nodes[at].children.iter().map(|(&c, &n)| (c, n)).collect();
            for (c, child) in edges {
                let mut f = nodes[at].fail;
                let fail = loop {
                    if let Some(&n) = nodes[f].children.get(&c) {
                        break n;
                    }
                    if f == ROOT {
                        break ROOT;
                    }
                    f = nodes[f].fail;
                };
                nodes[child].fail = fail;
                if nodes[fail].banned {
                    nodes[child].banned = true;
                }
                queue.push_back(child);
            }
        }

        Automaton { nodes }
    }

    fn delta(&self, mut at: usize, c: char) -> usize {
        loop {
            if let Some(&next) = self.nodes[at].children.get(&c) {
                return next;
            }
            if at == ROOT {
                return ROOT;
            }
            at = self.nodes[at].fail;
        }
    }

    /// Characters whose transition from `at` leaves the root
    fn live_chars(&self, at: usize) -> Vec<char> {
        let mut chars: Vec<char> = Vec::new();
        let mut f = at;
        loop {
            for &c in self.nodes[f].children.keys() {
                if !chars.contains(&c) {
                    chars.push(c);
                }
            }
            if f == ROOT {
                break;
            }
            f = self.nodes[f].fail;
        }
        chars
    }

    /// Phrase starts that would not land on their own first-character
    /// state when read in state `at`
    fn blocked(&self, at: usize, starts: &[char]) -> Vec<char> {
        starts
            .iter()
            .copied()
            .filter(|&c| {
                Some(self.delta(at, c)) != self.nodes[ROOT].children.get(&c).copied()
            })
            .collect()
    }
}

/// Where a path through one phrase subtree leaves off
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Exit {
    /// A character that starts nothing brought the automaton back to root
    Root,
    /// Text may end here
    Stop,
    /// A phrase start follows, from outside the indexed handoff class
    Handoff(usize),
    /// Back to a state already on the path
    Revisit(usize),
}

/// Alternatives for one exit; `empty` adds the empty string
#[derive(Debug, Default)]
struct Alts {
    empty: bool,
    items: Vec<String>,
}

impl Alts {
    fn render(&self) -> String {
        if self.items.is_empty() {
            return String::new();
        }
        let group = format!("(?:{})", self.items.join("|"));
        if self.empty {
            group + "?"
        } else {
            group
        }
    }

    fn bytes(&self) -> usize {
        self.items.iter().map(String::len).sum()
    }
}

type Paths = BTreeMap<Exit, Alts>;

/// Builds step and tail fragments at one level
struct Builder<'a> {
    automaton: &'a Automaton,
    /// First characters of phrases longer than one character
    starts: Vec<char>,
    /// Handoff classes; index 0 forbids nothing
    classes: Vec<Vec<char>>,
}

impl<'a> Builder<'a> {
    fn new(automaton: &'a Automaton, class_limit: Option<usize>) -> Self {
        let starts: Vec<char> = automaton.nodes[ROOT]
            .children
            .iter()
            .filter(|&(_, &next)| !automaton.nodes[next].banned)
            .map(|(&c, _)| c)
            .collect();

        let mut counts: BTreeMap<Vec<char>, usize> = BTreeMap::new();
        for (at, node) in automaton.nodes.iter().enumerate().skip(1) {
            if node.banned {
                continue;
            }
            let blocked = automaton.blocked(at, &starts);
            if !blocked.is_empty() && blocked.len() < starts.len() {
                *counts.entry(blocked).or_default() += 1;
            }
        }
        let mut ranked: Vec<(Vec<char>, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let keep = class_limit.unwrap_or(ranked.len()).min(ranked.len());
        let mut classes = vec![Vec::new()];
        classes.extend(ranked[..keep].iter().map(|(class, _)| class.clone()));
        let rest = &ranked[keep..];
        if !rest.is_empty() {
            let union: Vec<char> = starts
                .iter()
                .copied()
                .filter(|c| rest.iter().any(|(class, _)| class.contains(c)))
                .collect();
            if !classes.contains(&union) {
                classes.push(union);
            }
        }

        Builder {
            automaton,
            starts,
            classes,
        }
    }

    /// Smallest class that forbids at least `blocked`
    fn class_for(&self, blocked: &[char]) -> Option<usize> {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, class)| blocked.iter().all(|c| class.contains(c)))
            .min_by_key(|(_, class)| class.len())
            .map(|(index, _)| index)
    }

    /// Paths out of state `at`, grouped by exit. `path` holds the states
    /// above `at`; `jumps` is how many failure transitions into states off
    /// the path may still be followed. `None` once a node outgrows the
    /// fragment limit.
    fn subtree(&self, at: usize, path: &mut Vec<usize>, jumps: usize) -> Option<Paths> {
        let automaton = self.automaton;
        let blocked = automaton.blocked(at, &self.starts);
        let handoff = if blocked.len() < self.starts.len() {
            self.class_for(&blocked)
        } else {
            None
        };

        let mut paths = Paths::new();
        let mut excluded = String::new();
        for c in automaton.live_chars(at) {
            let next = automaton.delta(at, c);
            excluded.push_str(&case_class_chars(c));
            if automaton.nodes[next].banned {
                continue;
            }
            if handoff.is_some() && self.starts.contains(&c) && !blocked.contains(&c) {
                continue;
            }
            if next == at || path.contains(&next) {
                paths.entry(Exit::Revisit(next)).or_default().items.push(edge(c));
                continue;
            }
            let remaining = if automaton.nodes[at].children.get(&c) == Some(&next) {
                jumps
            } else if jumps > 0 {
                jumps - 1
            } else {
                continue;
            };
            path.push(at);
            let sub = self.subtree(next, path, remaining);
            path.pop();
            for (exit, alts) in sub? {
                paths
                    .entry(exit)
                    .or_default()
                    .items
                    .push(format!("{}{}", edge(c), alts.render()));
            }
        }

        paths
            .entry(Exit::Root)
            .or_default()
            .items
            .insert(0, format!("[^{}]", excluded));
        paths.entry(Exit::Stop).or_default().empty = true;
        if let Some(class) = handoff {
            paths.entry(Exit::Handoff(class)).or_default().empty = true;
        }

        if let Some(cycle) = paths.remove(&Exit::Revisit(at)) {
            let star = format!("(?:{})*", cycle.items.join("|"));
            paths = paths
                .into_iter()
                .map(|(exit, alts)| {
                    let items = vec![format!("{}{}", star, alts.render())];
                    (exit, Alts { empty: false, items })
                })
                .collect();
        }

        let bytes: usize = paths.values().map(Alts::bytes).sum();
        (bytes <= MAX_FRAGMENT_BYTES).then_some(paths)
    }

    /// Step and tail fragments, or `None` if they outgrow the limit.
    ///
    /// Handoff classes are the states of a small automaton whose edges are
    /// whole phrase subtrees. Eliminating every class but the unrestricted
    /// class 0 leaves a loop over subtrees that ends back at root.
    fn fragments(&self, jumps: usize) -> Option<(String, String)> {
        let automaton = self.automaton;
        let count = self.classes.len();
        let (end, stop) = (count, count + 1);

        let mut solved = Vec::with_capacity(self.starts.len());
        for &c in &self.starts {
            let first = *automaton.nodes[ROOT].children.get(&c)?;
            let mut path = vec![ROOT];
            solved.push((c, self.subtree(first, &mut path, jumps)?));
        }

        let mut grouped: BTreeMap<(usize, usize), Vec<String>> = BTreeMap::new();
        for (from, class) in self.classes.iter().enumerate() {
            for (c, paths) in &solved {
                if class.contains(c) {
                    continue;
                }
                for (exit, alts) in paths {
                    let to = match *exit {
                        Exit::Root => end,
                        Exit::Stop => stop,
                        Exit::Handoff(class) => class,
                        Exit::Revisit(_) => continue,
                    };
                    grouped
                        .entry((from, to))
                        .or_default()
                        .push(format!("{}{}", edge(*c), alts.render()));
                }
            }
        }
        let mut labels: BTreeMap<(usize, usize), String> = grouped
            .into_iter()
            .map(|(key, items)| (key, items.join("|")))
            .collect();

        for k in (1..count).rev() {
            let star = labels
                .remove(&(k, k))
                .map(|cycle| format!("(?:{})*", cycle))
                .unwrap_or_default();
            let ins = take_edges(&mut labels, |(_, to)| to == k);
            let outs = take_edges(&mut labels, |(from, _)| from == k);
            for ((from, _), into) in &ins {
                for ((_, to), out) in &outs {
                    let through = format!("(?:{}){}(?:{})", into, star, out);
                    match labels.entry((*from, *to)) {
                        Entry::Occupied(mut label) => {
                            label.get_mut().push('|');
                            label.get_mut().push_str(&through);
                        }
                        Entry::Vacant(label) => {
                            label.insert(through);
                        }
                    }
                }
            }
            if labels.values().map(String::len).sum::<usize>() > 2 * MAX_FRAGMENT_BYTES {
                return None;
            }
        }

        let star = labels
            .remove(&(0, 0))
            .map(|cycle| format!("(?:{})*", cycle))
            .unwrap_or_default();
        let leaves_root: String = automaton.nodes[ROOT]
            .children
            .keys()
            .map(|&c| case_class_chars(c))
            .collect();
        let mut step = format!("(?:[^{}]", leaves_root);
        if let Some(label) = labels.get(&(0, end)) {
            step.push_str(&format!("|{}(?:{})", star, label));
        }
        step.push(')');
        let tail = labels
            .get(&(0, stop))
            .map(|label| format!("(?:{}(?:{}))?", star, label))
            .unwrap_or_default();

        (step.len() <= MAX_FRAGMENT_BYTES && tail.len() <= MAX_FRAGMENT_BYTES)
            .then_some((step, tail))
    }
}

/// Remove and return the edges whose key matches `pick`
fn take_edges(
    labels: &mut BTreeMap<(usize, usize), String>,
    pick: impl Fn((usize, usize)) -> bool,
) -> Vec<((usize, usize), String)> {
    let keys: Vec<(usize, usize)> = labels.keys().copied().filter(|&key| pick(key)).collect();
    keys.into_iter()
        .filter_map(|key| labels.remove(&key).map(|label| (key, label)))
        .collect()
}

/// Class members for `c` in both cases
fn case_class_chars(c: char) -> String {
    let mut out = escape_class_char(c);
    let mut upper = c.to_uppercase();
    if let (Some(u), None) = (upper.next(), upper.next()) {
        if u != c {
            out.push_str(&escape_class_char(u));
        }
    }
    out
}

fn edge(c: char) -> String {
    format!("[{}]", case_class_chars(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(list: &BanList, dialect: Dialect) -> Regex {
        let token = list.compile(dialect).unwrap();
        Regex::new(&format!("^(?:{})+{}$", token.step, token.tail)).unwrap()
    }

    #[test]
    fn test_parse_dedupes_case_insensitively() {
        let list = BanList::parse("Gaze\n  gaze \n\nshiver  down\nSHIVER DOWN");
        assert_eq!(list.phrases(), &["gaze".to_string(), "shiver down".to_string()]);
    }

    #[test]
    fn test_empty_list_compiles_to_nothing() {
        assert!(BanList::parse("\n \n").compile(Dialect::Default).is_none());
    }

    #[test]
    fn test_single_phrase() {
        let re = matcher(&BanList::parse("gaze"), Dialect::Default);
        assert!(!re.is_match("her gaze fell"));
        assert!(!re.is_match("HER GAZE FELL"));
        assert!(!re.is_match("gaze"));
        assert!(re.is_match("her glance fell"));
        assert!(re.is_match("a ga"));
        assert!(re.is_match("the gas"));
        assert!(re.is_match("g a z e\nand more text, of any length."));
    }

    #[test]
    fn test_overlapping_starts() {
        let re = matcher(&BanList::parse("gaze"), Dialect::Default);
        assert!(!re.is_match("ggaze"));
        assert!(!re.is_match("gagaze"));
        let re = matcher(&BanList::parse("aab"), Dialect::Default);
        assert!(!re.is_match("aaab"));
        assert!(re.is_match("aaa ab"));
    }

    #[test]
    fn test_stuttered_starts() {
        let re = matcher(&BanList::parse("gaze"), Dialect::Default);
        assert!(!re.is_match("ggggaze"));
        assert!(!re.is_match("gagagagaze"));
        assert!(re.is_match("gggg "));
        assert!(re.is_match("gagaga garden"));

        let re = matcher(&BanList::parse("the end"), Dialect::Default);
        assert!(!re.is_match("the the the the end"));
        assert!(!re.is_match("and that was the end of it"));
        assert!(re.is_match("the the then "));
    }

    #[test]
    fn test_small_alphabet_exhaustive() {
        let list = BanList::parse("aab\nbba");
        let re = matcher(&list, Dialect::Default);
        let mut words = vec![String::new()];
        for _ in 0..7 {
            words = words
                .iter()
                .flat_map(|w| ['a', 'b', 'x'].map(|c| format!("{w}{c}")))
                .collect();
            for word in &words {
                if word.contains("aab") || word.contains("bba") {
                    assert!(!re.is_match(word), "{word}");
                }
            }
        }
    }

    #[test]
    fn test_long_list_stays_sound() {
        let list = BanList::from_phrases([
            "gaze",
            "shivers down",
            "ministrations",
            "a testament to",
            "barely above a whisper",
            "unspoken",
            "palpable",
            "tapestry",
        ]);
        let token = list.compile(Dialect::Default).unwrap();
        assert!(token.step.len() <= MAX_FRAGMENT_BYTES);
        let re = matcher(&list, Dialect::Default);
        assert!(!re.is_match("tatapestry"));
        assert!(!re.is_match("ggaze here"));
        assert!(!re.is_match("a a testament to"));
        assert!(!re.is_match("her unspoken fear"));
        assert!(re.is_match("The cat sat by the door."));
        assert!(re.is_match("She closed the door and left."));
    }

    #[test]
    fn test_shorter_phrase_blocks_longer() {
        let re = matcher(&BanList::parse("ab\nabc\nbcd"), Dialect::Default);
        assert!(!re.is_match("xab"));
        assert!(!re.is_match("xbcd"));
        assert!(re.is_match("xbc ac"));
    }

    #[test]
    fn test_suffix_phrase_inside_longer_path() {
        let re = matcher(&BanList::parse("abcd\nbc"), Dialect::Default);
        assert!(!re.is_match("abce"));
        assert!(re.is_match("abd"));
    }

    #[test]
    fn test_multiword_phrase() {
        let re = matcher(&BanList::parse("Shivers down"), Dialect::Default);
        assert!(!re.is_match("it sent shivers down her spine"));
        assert!(re.is_match("it sent shivers up her spine"));
    }

    #[test]
    fn test_jump_between_phrases() {
        let re = matcher(&BanList::parse("shivers down\nministrations"), Dialect::Default);
        assert!(!re.is_match("mishivers down"));
        assert!(re.is_match("she smiled at the small mishap"));
    }

    #[test]
    fn test_conservative_drops_non_ascii() {
        let list = BanList::parse("café\nnaïve");
        assert!(list.compile(Dialect::Conservative).is_none());
        assert!(list.compile(Dialect::Default).is_some());
    }

    #[test]
    fn test_first_banned() {
        let list = BanList::parse("gaze\nministrations");
        assert_eq!(list.first_banned("Her  MINISTRATIONS"), Some("ministrations"));
        assert_eq!(list.first_banned("nothing here"), None);
    }
}
