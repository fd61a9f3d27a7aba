//! Turns plan text into [`Command`]s.
//!
//! A plan has one step per line; blank lines and lines starting with `#`
//! are ignored.
//!
//! ```text
//! # marker: program args...         (spawned directly, `|` splits stages)
//! align: STAR --genomeDir ref --readFilesIn r1.fq r2.fq
//! count: samtools view -c aligned.bam | tee count.txt
//! # marker:$ text handed to the shell
//! filter:$ zcat calls.tsv.gz | awk '$5 > 3' > filtered.tsv
//! ```

use crate::command::{Argv, Command, Invocation};
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Pipe,
}

enum Quote {
    Unquoted,
    SingleQuoted,
    DoubleQuoted,
}

/// Splits a line into words with shell-like quoting. An unquoted `|` is
/// returned as [`Token::Pipe`].
pub fn tokenize(line: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut buffer = String::new();
    // Distinguishes `''` (an empty word) from no word at all.
    let mut in_word = false;
    let mut quote = Quote::Unquoted;

    let push = |buffer: &mut String, in_word: &mut bool, tokens: &mut Vec<Token>| {
        if *in_word {
            tokens.push(Token::Word(std::mem::take(buffer)));
        }
        *in_word = false;
    };

    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Quote::Unquoted => match c {
                ' ' | '\t' | '\n' | '\r' => push(&mut buffer, &mut in_word, &mut tokens),
                '|' => {
                    push(&mut buffer, &mut in_word, &mut tokens);
                    tokens.push(Token::Pipe);
                }
                '\'' => {
                    quote = Quote::SingleQuoted;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::DoubleQuoted;
                    in_word = true;
                }
                '\\' => {
                    let next = chars.next().ok_or("trailing backslash")?;
                    buffer.push(next);
                    in_word = true;
                }
                _ => {
                    buffer.push(c);
                    in_word = true;
                }
            },
            Quote::SingleQuoted => match c {
                '\'' => quote = Quote::Unquoted,
                _ => buffer.push(c),
            },
            Quote::DoubleQuoted => match c {
                '"' => quote = Quote::Unquoted,
                '\\' => match chars.peek() {
                    Some(&next) if matches!(next, '\\' | '"' | '$' | '`') => {
                        chars.next();
                        buffer.push(next);
                    }
                    _ => buffer.push(c),
                },
                _ => buffer.push(c),
            },
        }
    }

    match quote {
        Quote::Unquoted => {}
        Quote::SingleQuoted => return Err("unterminated single quote".into()),
        Quote::DoubleQuoted => return Err("unterminated double quote".into()),
    }
    push(&mut buffer, &mut in_word, &mut tokens);

    Ok(tokens)
}

/// Builds a structured invocation: one stage is plain argv, several a pipe.
pub fn parse_invocation(text: &str) -> Result<Invocation, String> {
    let tokens = tokenize(text)?;
    let mut stages: Vec<Vec<String>> = vec![Vec::new()];
    for token in tokens {
        match token {
            Token::Word(word) => {
                if let Some(stage) = stages.last_mut() {
                    stage.push(word);
                }
            }
            Token::Pipe => stages.push(Vec::new()),
        }
    }

    let mut argvs: Vec<Argv> = stages
        .into_iter()
        .map(|stage| Argv::from_tokens(stage).unwrap_or_else(|| Argv::new("", Vec::<String>::new())))
        .collect();

    if argvs.len() == 1 {
        Ok(Invocation::Argv(argvs.remove(0)))
    } else {
        Ok(Invocation::Pipe(argvs))
    }
}

/// Parses `<marker>: <argv...>` or `<marker>:$ <shell text>`.
fn parse_line(line: &str) -> Result<Command, String> {
    let (id, rest) = line
        .split_once(':')
        .ok_or("expected `<marker>: <command>`")?;
    let invocation = match rest.strip_prefix('$') {
        Some(text) => Invocation::Shell(text.trim().to_string()),
        None => parse_invocation(rest)?,
    };
    Command::new(invocation, id.trim()).map_err(|e| e.to_string())
}

pub fn parse_plan(text: &str) -> Result<Vec<Command>, ConfigError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| {
            parse_line(line).map_err(|message| ConfigError::Plan {
                line: i + 1,
                message,
            })
        })
        .collect()
}

/// Parses a single step given on the command line, in plan-line syntax.
pub fn parse_step(spec: &str) -> Result<Command, ConfigError> {
    parse_line(spec.trim()).map_err(|message| ConfigError::Step {
        spec: spec.to_string(),
        message,
    })
}
