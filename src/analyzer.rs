//! The analysis function consumed by the worker, plus a small demo analyzer.
//!
//! `AssignmentAnalyzer` understands just enough of a Python-like language to
//! answer completion, signature help and reference queries: `name = value`
//! bindings, `def name(params):` declarations and identifier occurrences.

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::model::Version;

/// External analysis collaborator: `(content, version) -> payload`.
///
/// May be slow and may fail. Failures never reach waiters; the worker logs
/// them and moves on.
#[async_trait]
pub trait Analyzer: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;

    async fn analyze(&self, content: &str, version: Version) -> Result<Self::Payload>;
}

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "break", "class", "continue", "def", "del", "elif", "else", "except",
    "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal", "not",
    "or", "pass", "raise", "return", "try", "while", "with", "yield", "None", "True", "False",
];

/// Name bound by `name = value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub name: String,
    pub line: usize,
    pub column: usize,
}

/// `def name(params):`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSignature {
    pub name: String,
    pub parameters: Vec<String>,
    pub line: usize,
}

impl FunctionSignature {
    pub fn label(&self) -> String {
        format!("{}({})", self.name, self.parameters.join(", "))
    }
}

/// Any identifier that is not a keyword
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub name: String,
    pub line: usize,
    pub column: usize,
    pub is_definition: bool,
}

impl Occurrence {
    pub fn end_column(&self) -> usize {
        self.column + self.name.chars().count()
    }
}

/// Payload of `AssignmentAnalyzer`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub line_count: usize,
    pub bindings: Vec<Binding>,
    pub functions: Vec<FunctionSignature>,
    #[serde(skip)]
    pub occurrences: Vec<Occurrence>,
}

impl ModuleSummary {
    /// Bound names and function names starting with `prefix`, sorted, deduplicated
    pub fn completions(&self, prefix: &str) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .bindings
            .iter()
            .map(|b| b.name.as_str())
            .chain(self.functions.iter().map(|f| f.name.as_str()))
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.into_iter().map(str::to_string).collect()
    }

    pub fn signature(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.iter().rev().find(|f| f.name == name)
    }

    pub fn references(&self, name: &str, include_definitions: bool) -> Vec<&Occurrence> {
        self.occurrences
            .iter()
            .filter(|o| o.name == name && (include_definitions || !o.is_definition))
            .collect()
    }

    /// Identifier under (line, column), inclusive of its end
    pub fn occurrence_at(&self, line: usize, column: usize) -> Option<&Occurrence> {
        self.occurrences
            .iter()
            .find(|o| o.line == line && column >= o.column && column <= o.end_column())
    }
}

/// Demo analyzer over Python-like text
#[derive(Debug, Default, Clone, Copy)]
pub struct AssignmentAnalyzer;

#[async_trait]
impl Analyzer for AssignmentAnalyzer {
    type Payload = ModuleSummary;

    async fn analyze(&self, content: &str, _version: Version) -> Result<ModuleSummary> {
        summarize(content)
    }
}

/// Summarize `content`; fails on unbalanced brackets
pub fn summarize(content: &str) -> Result<ModuleSummary> {
    let code = code_lines(content);
    check_brackets(&code)?;

    let mut summary = ModuleSummary {
        line_count: code.len(),
        ..Default::default()
    };
    for (line_num, line) in code.iter().enumerate() {
        let tokens = identifiers(line);

        let binding = binding_target(line, &tokens);
        let function = function_declaration(line_num, line, &tokens);

        for (column, name) in &tokens {
            if KEYWORDS.contains(name) {
                continue;
            }
            let is_definition = binding.is_some_and(|(c, _)| c == *column)
                || function.as_ref().is_some_and(|(c, _)| *c == *column);
            summary.occurrences.push(Occurrence {
                name: name.to_string(),
                line: line_num,
                column: *column,
                is_definition,
            });
        }
        if let Some((column, name)) = binding {
            summary.bindings.push(Binding {
                name: name.to_string(),
                line: line_num,
                column,
            });
        }
        if let Some((_, signature)) = function {
            summary.functions.push(signature);
        }
    }
    Ok(summary)
}

/// Lexer position relative to string literals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Literal {
    Code,
    /// `'...'` or `"..."`, ends at the line end unless escaped
    Short(char),
    /// `'''...'''` or `"""..."""`, may span lines
    Long(char),
}

/// Lines with string literals blanked and comments cut off.
///
/// Every blanked char becomes one space, so char columns still line up with
/// the source text.
fn code_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut state = Literal::Code;

    for raw_line in content.lines() {
        let chars: Vec<char> = raw_line.chars().collect();
        let mut code = String::with_capacity(raw_line.len());
        let mut escaped = false;
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            match state {
                Literal::Code if ch == '#' => break,
                Literal::Code if ch == '\'' || ch == '"' => {
                    if chars[i..].starts_with(&[ch, ch, ch]) {
                        state = Literal::Long(ch);
                        code.push_str("   ");
                        i += 3;
                        continue;
                    }
                    state = Literal::Short(ch);
                    code.push(' ');
                }
                Literal::Code => code.push(ch),
                Literal::Short(quote) | Literal::Long(quote) => {
                    if escaped {
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == quote {
                        if state == Literal::Short(quote) {
                            state = Literal::Code;
                        } else if chars[i..].starts_with(&[quote, quote, quote]) {
                            state = Literal::Code;
                            code.push_str("   ");
                            i += 3;
                            continue;
                        }
                    }
                    code.push(' ');
                }
            }
            i += 1;
        }

        // An unterminated short string only carries over a trailing backslash.
        if matches!(state, Literal::Short(_)) && !escaped {
            state = Literal::Code;
        }
        lines.push(code);
    }
    lines
}

fn check_brackets(lines: &[String]) -> Result<()> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (line_num, line) in lines.iter().enumerate() {
        for ch in line.chars() {
            match ch {
                '(' | '[' | '{' => stack.push((ch, line_num)),
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => bail!("line {}: unbalanced '{ch}'", line_num + 1),
                    }
                }
                _ => {}
            }
        }
    }
    if let Some((open, line_num)) = stack.pop() {
        bail!("line {}: '{open}' is never closed", line_num + 1);
    }
    Ok(())
}

/// Identifiers of a code line as (char column, name)
fn identifiers(line: &str) -> Vec<(usize, &str)> {
    let mut found = Vec::new();
    let mut start: Option<(usize, usize)> = None;

    for (column, (i, ch)) in line.char_indices().enumerate() {
        let is_ident = ch == '_' || ch.is_alphanumeric();
        match start {
            Some((byte, col)) if !is_ident => {
                found.push((col, &line[byte..i]));
                start = None;
            }
            None if is_ident && !ch.is_ascii_digit() => start = Some((i, column)),
            _ => {}
        }
    }
    if let Some((byte, col)) = start {
        found.push((col, &line[byte..]));
    }
    found
}

/// `name = ...` (but not `==`) at the start of a statement
fn binding_target<'a>(line: &'a str, tokens: &[(usize, &'a str)]) -> Option<(usize, &'a str)> {
    let (column, name) = *tokens.first()?;
    if KEYWORDS.contains(&name) {
        return None;
    }
    let rest = line.trim_start().strip_prefix(name)?.trim_start();
    if rest.starts_with('=') && !rest.starts_with("==") {
        Some((column, name))
    } else {
        None
    }
}

fn function_declaration(
    line_num: usize,
    line: &str,
    tokens: &[(usize, &str)],
) -> Option<(usize, FunctionSignature)> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with("def ") {
        return None;
    }
    let (column, name) = *tokens.get(1)?;
    let open = trimmed.find('(')?;
    let close = trimmed.rfind(')')?;
    if close < open {
        return None;
    }
    let parameters = trimmed[open + 1..close]
        .split(',')
        .map(|p| {
            p.split(['=', ':'])
                .next()
                .unwrap_or_default()
                .trim()
                .to_string()
        })
        .filter(|p| !p.is_empty())
        .collect();
    Some((
        column,
        FunctionSignature {
            name: name.to_string(),
            parameters,
            line: line_num,
        },
    ))
}
