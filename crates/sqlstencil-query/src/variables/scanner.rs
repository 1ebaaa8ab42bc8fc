//! Template Variable Scanner
//!
//! Discovers which variable names a template references, without rendering
//! it. Expressions (`{{ ... }}`) contribute their base identifier; control
//! tags (`{% if|elif|for|set ... %}`) contribute every bare identifier.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

// Lazy-compiled regex patterns for template scanning
static TEMPLATE_COMMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{#.*?#\}").expect("valid regex"));

static TEMPLATE_SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{-?(?P<expr>.*?)-?\}\}|\{%-?\s*(?P<tag>if|elif|for|set)\b(?P<body>.*?)-?%\}")
        .expect("valid regex")
});

static BASE_IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([a-zA-Z_][a-zA-Z0-9_]*)").expect("valid regex"));

static WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-zA-Z_][a-zA-Z0-9_]*\b").expect("valid regex"));

static FOR_IN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bin\b").expect("valid regex"));

// a single `=` that is not part of `==`, `!=`, `<=` or `>=`
static SET_ASSIGN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^=!<>])(=)(?:[^=]|$)").expect("valid regex"));

static QUOTED_STRING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).expect("valid regex"));

/// Words that never name a variable: tag keywords, literals, operators,
/// tests, loop internals and the built-in date globals.
const RESERVED_WORDS: &[&str] = &[
    "if", "elif", "else", "endif", "for", "endfor", "in", "set", "endset", "not", "and", "or",
    "is", "true", "false", "True", "False", "none", "None", "null", "loop", "range", "defined",
    "undefined", "recursive", "super", "self", "varargs", "kwargs", "caller", "today", "now",
    "yesterday",
];

fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS.contains(&word)
}

/// Extracts referenced variable names from template text.
///
/// Returns each name once, in order of first occurrence. Identifiers inside
/// `{# ... #}` comments and string literals are ignored.
///
/// # Example
///
/// ```
/// use sqlstencil_query::variables::scan;
///
/// let names = scan("SELECT * FROM t WHERE {{ REGION('r') | eq }} {% if LIMIT %}LIMIT {{ LIMIT }}{% endif %}");
/// assert_eq!(names, vec!["REGION".to_string(), "LIMIT".to_string()]);
/// ```
pub fn scan(template: &str) -> Vec<String> {
    let masked = mask_comments(template);

    let mut names: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    // Names bound by the template itself (loop targets, `set` targets)
    let mut declared: HashSet<String> = HashSet::new();

    let mut push = |name: &str, declared: &HashSet<String>| {
        if !is_reserved(name) && !declared.contains(name) && seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    };

    for cap in TEMPLATE_SEGMENT_REGEX.captures_iter(&masked) {
        if let Some(expr) = cap.name("expr") {
            if let Some(name) = expression_base(expr.as_str()) {
                push(name, &declared);
            }
        } else if let (Some(tag), Some(body)) = (cap.name("tag"), cap.name("body")) {
            let (targets, expr) = split_tag_body(tag.as_str(), body.as_str());
            for word in tag_identifiers(expr) {
                push(word, &declared);
            }
            for target in tag_identifiers(targets) {
                declared.insert(target.to_string());
            }
        }
    }

    names
}

/// Split a tag body into its binding targets and the expression it reads.
fn split_tag_body<'a>(tag: &str, body: &'a str) -> (&'a str, &'a str) {
    match tag {
        "for" => match FOR_IN_REGEX.find(body) {
            Some(m) => (&body[..m.start()], &body[m.end()..]),
            None => ("", body),
        },
        "set" => match SET_ASSIGN_REGEX.captures(body).and_then(|cap| cap.get(1)) {
            Some(eq) => (&body[..eq.start()], &body[eq.end()..]),
            // block form `{% set name %}...{% endset %}`
            None => (body, ""),
        },
        _ => ("", body),
    }
}

/// Base identifier of an expression: `VAR.path('x') | f` -> `VAR`
fn expression_base(expr: &str) -> Option<&str> {
    let head = expr.split('|').next().unwrap_or_default();
    BASE_IDENTIFIER_REGEX
        .captures(head)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

/// Bare identifiers in a tag body, skipping attribute, filter, keyword
/// argument and test names
fn tag_identifiers(body: &str) -> Vec<&str> {
    let unquoted = QUOTED_STRING_REGEX.replace_all(body, |caps: &regex::Captures| " ".repeat(caps[0].len()));
    let bytes = unquoted.as_bytes();

    let mut words = Vec::new();
    // set while the next word is the test after `is` / `is not`
    let mut after_is = false;
    for m in WORD_REGEX.find_iter(&unquoted) {
        let word = m.as_str();
        let is_test = after_is && word != "not";
        after_is = word == "is" || (after_is && word == "not");

        let preceding = bytes[..m.start()]
            .iter()
            .rev()
            .find(|b| !b.is_ascii_whitespace());
        let mut following = bytes[m.end()..].iter().skip_while(|b| b.is_ascii_whitespace());
        let is_keyword = following.next() == Some(&b'=') && following.next() != Some(&b'=');

        if is_test || is_keyword || matches!(preceding, Some(b'.') | Some(b'|')) {
            continue;
        }
        words.push(&body[m.start()..m.end()]);
    }
    words
}

/// Masks template comments with spaces, preserving offsets.
fn mask_comments(template: &str) -> String {
    TEMPLATE_COMMENT_REGEX
        .replace_all(template, |caps: &regex::Captures| " ".repeat(caps[0].len()))
        .into_owned()
}
