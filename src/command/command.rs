use crate::error::ConfigError;
use sha2::{Digest, Sha256};
use std::fmt;

/// A program and its arguments, spawned without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argv {
    program: String,
    args: Vec<String>,
}

impl Argv {
    pub fn new<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Splits `tokens` into program and arguments.
    pub fn from_tokens(tokens: Vec<String>) -> Option<Self> {
        let mut iter = tokens.into_iter();
        let program = iter.next()?;
        Some(Self {
            program,
            args: iter.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn is_empty(&self) -> bool {
        self.program.trim().is_empty()
    }
}

impl fmt::Display for Argv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Argv(Argv),
    /// Stages connected stdout to stdin; fails if any stage fails.
    Pipe(Vec<Argv>),
    /// Opaque text handed to a shell with pipefail enabled.
    Shell(String),
}

impl Invocation {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Invocation::Argv(argv) if argv.is_empty() => Err(ConfigError::EmptyInvocation),
            Invocation::Argv(_) => Ok(()),
            Invocation::Pipe(stages) if stages.is_empty() => Err(ConfigError::EmptyInvocation),
            Invocation::Pipe(stages) => match stages.iter().position(Argv::is_empty) {
                Some(index) => Err(ConfigError::EmptyPipeStage { index }),
                None => Ok(()),
            },
            Invocation::Shell(text) if text.trim().is_empty() => {
                Err(ConfigError::EmptyInvocation)
            }
            Invocation::Shell(_) => Ok(()),
        }
    }

    /// Programs spawned directly, i.e. every program outside shell text.
    pub fn programs(&self) -> Vec<&str> {
        match self {
            Invocation::Argv(argv) => vec![argv.program()],
            Invocation::Pipe(stages) => stages.iter().map(Argv::program).collect(),
            Invocation::Shell(_) => Vec::new(),
        }
    }

    /// SHA-256 over a tagged, NUL separated encoding of the invocation.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Invocation::Argv(argv) => {
                feed(&mut hasher, argv);
                hasher.update(b"\x01argv");
            }
            Invocation::Pipe(stages) => {
                for stage in stages {
                    feed(&mut hasher, stage);
                    hasher.update([0x1f]);
                }
                hasher.update(b"\x01pipe");
            }
            Invocation::Shell(text) => {
                hasher.update(text.as_bytes());
                hasher.update(b"\x01shell");
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

fn feed(hasher: &mut Sha256, argv: &Argv) {
    hasher.update(argv.program.as_bytes());
    for arg in &argv.args {
        hasher.update([0u8]);
        hasher.update(arg.as_bytes());
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Argv(argv) => write!(f, "{argv}"),
            Invocation::Pipe(stages) => {
                for (i, stage) in stages.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{stage}")?;
                }
                Ok(())
            }
            Invocation::Shell(text) => write!(f, "{text}"),
        }
    }
}

/// One external invocation and the marker proving it already succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    invocation: Invocation,
    marker_id: String,
}

impl Command {
    pub fn new(invocation: Invocation, marker_id: impl Into<String>) -> Result<Self, ConfigError> {
        let marker_id = marker_id.into();
        invocation.validate()?;
        validate_marker_id(&marker_id)?;
        Ok(Self {
            invocation,
            marker_id,
        })
    }

    pub fn argv<P, I, S>(program: P, args: I, marker_id: &str) -> Result<Self, ConfigError>
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Invocation::Argv(Argv::new(program, args)), marker_id)
    }

    pub fn shell(text: impl Into<String>, marker_id: &str) -> Result<Self, ConfigError> {
        Self::new(Invocation::Shell(text.into()), marker_id)
    }

    pub fn pipe(stages: Vec<Argv>, marker_id: &str) -> Result<Self, ConfigError> {
        Self::new(Invocation::Pipe(stages), marker_id)
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn marker_id(&self) -> &str {
        &self.marker_id
    }

    pub fn fingerprint(&self) -> String {
        self.invocation.fingerprint()
    }
}

/// Marker ids become file names in the marker directory.
fn validate_marker_id(id: &str) -> Result<(), ConfigError> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.trim() != id;
    if bad {
        Err(ConfigError::InvalidMarkerId(id.to_string()))
    } else {
        Ok(())
    }
}
