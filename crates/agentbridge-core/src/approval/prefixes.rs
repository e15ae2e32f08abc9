//! Shell command → approval prefixes.
//!
//! `cd app && FOO=1 npm test 2>&1 | tail -5` yields `["cd", "npm test", "tail"]`:
//! the command is cut at `&&`, `||`, `;`, `|`, `&` and newlines outside of
//! quotes, leading environment assignments are dropped, and each piece is
//! reduced to its program name plus, for programs with subcommands, the
//! first non-flag word.

use std::sync::LazyLock;

use regex::Regex;

use super::commands::takes_operand;

static SHORT_FLAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-[A-Za-z]$").expect("valid regex"));

static ENV_ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("valid regex"));

pub fn parse_command_prefixes(command: &str) -> Vec<String> {
    split_segments(command)
        .into_iter()
        .filter_map(|segment| prefix_of(&tokenize(segment)))
        .collect()
}

fn split_segments(command: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev: Option<char> = None;
    let mut chars = command.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let before = prev.replace(c);
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (q, '\\') if q != Some('\'') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ';' | '\n') => {
                segments.push(&command[start..i]);
                start = i + 1;
            }
            (None, '&' | '|') => {
                let doubled = chars.peek().is_some_and(|&(_, next)| next == c);
                // `2>&1`, `&>log`
                let redirect = c == '&'
                    && (matches!(before, Some('>' | '<'))
                        || chars.peek().is_some_and(|&(_, next)| next == '>'));
                if redirect {
                    continue;
                }
                segments.push(&command[start..i]);
                if doubled {
                    chars.next();
                    start = i + 2;
                } else {
                    start = i + 1;
                }
            }
            _ => {}
        }
    }
    segments.push(&command[start..]);
    segments
}

fn tokenize(segment: &str) -> Vec<String> {
    shlex::split(segment)
        .unwrap_or_else(|| segment.split_whitespace().map(str::to_string).collect())
}

fn prefix_of(tokens: &[String]) -> Option<String> {
    let mut words = tokens
        .iter()
        .map(String::as_str)
        .skip_while(|word| ENV_ASSIGNMENT.is_match(word));
    let program = words.next()?;
    if takes_operand(program) {
        return Some(program.to_string());
    }

    let mut rest = words.peekable();
    while let Some(word) = rest.next() {
        if !word.starts_with('-') {
            return Some(format!("{program} {word}"));
        }
        if SHORT_FLAG.is_match(word) {
            // value of `-c key=value`
            rest.next_if(|next| !next.starts_with('-'));
        }
    }
    Some(program.to_string())
}
