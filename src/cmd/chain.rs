use std::{path::PathBuf, str::FromStr};

use strum::{Display, EnumString};
use thiserror::Error;

/// Words with a structural meaning on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum Operator {
    #[strum(serialize = "|")]
    Pipe,
    #[strum(serialize = "<")]
    Read,
    #[strum(serialize = ">")]
    Write,
    #[strum(serialize = ">>")]
    Append,
    #[strum(serialize = "&")]
    Background,
}

impl Operator {
    pub fn parse(word: &str) -> Option<Self> {
        Self::from_str(word).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("no command specified")]
    NoCommand,
    #[error("& can only appear at end of command")]
    MisplacedBackground,
    #[error("no command before |")]
    EmptyBeforePipe,
    #[error("no command after |")]
    EmptyAfterPipe,
    #[error("empty command in pipeline")]
    EmptyStage,
    #[error("no input file specified")]
    MissingInputFile,
    #[error("no output file specified")]
    MissingOutputFile,
    #[error("input redirection only allowed in first command of pipeline")]
    MisplacedInput,
    #[error("output redirection only allowed in last command of pipeline")]
    MisplacedOutput,
    #[error("input redirected more than once")]
    DuplicateInput,
    #[error("output redirected more than once")]
    DuplicateOutput,
    #[error("{0}: builtin commands cannot be part of a pipeline")]
    BuiltinInPipeline(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    Truncate,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRedirect {
    pub path: PathBuf,
    pub mode: RedirectMode,
}

/// One program invocation. `argv` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    argv: Vec<String>,
}

impl Stage {
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

/// A validated pipeline: stages connected left to right, with the input
/// redirect attached to the first stage and the output redirect to the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandChain {
    stages: Vec<Stage>,
    input: Option<PathBuf>,
    output: Option<OutputRedirect>,
    background: bool,
}

impl CommandChain {
    pub fn build(mut tokens: Vec<String>) -> Result<Self, SyntaxError> {
        let background = matches!(tokens.last(), Some(last) if last == "&");
        if background {
            tokens.pop();
        }

        if tokens.iter().any(|t| t == "&") {
            return Err(SyntaxError::MisplacedBackground);
        }

        if tokens.is_empty() {
            return Err(SyntaxError::NoCommand);
        }

        let segments = tokens.split(|t| t == "|").collect::<Vec<_>>();
        let last = segments.len() - 1;

        let mut stages = Vec::with_capacity(segments.len());
        let mut input = None;
        let mut output = None;

        for (idx, segment) in segments.into_iter().enumerate() {
            let mut argv = Vec::new();
            let mut words = segment.iter();

            while let Some(word) = words.next() {
                match Operator::parse(word) {
                    Some(Operator::Read) => {
                        if idx != 0 {
                            return Err(SyntaxError::MisplacedInput);
                        }
                        let path =
                            redirect_target(&mut words).ok_or(SyntaxError::MissingInputFile)?;
                        if input.replace(path).is_some() {
                            return Err(SyntaxError::DuplicateInput);
                        }
                    }
                    Some(op @ (Operator::Write | Operator::Append)) => {
                        if idx != last {
                            return Err(SyntaxError::MisplacedOutput);
                        }
                        let path =
                            redirect_target(&mut words).ok_or(SyntaxError::MissingOutputFile)?;
                        let mode = if op == Operator::Append {
                            RedirectMode::Append
                        } else {
                            RedirectMode::Truncate
                        };
                        if output.replace(OutputRedirect { path, mode }).is_some() {
                            return Err(SyntaxError::DuplicateOutput);
                        }
                    }
                    _ => argv.push(word.clone()),
                }
            }

            if argv.is_empty() {
                return Err(match idx {
                    _ if last == 0 => SyntaxError::NoCommand,
                    0 => SyntaxError::EmptyBeforePipe,
                    _ if idx == last => SyntaxError::EmptyAfterPipe,
                    _ => SyntaxError::EmptyStage,
                });
            }

            stages.push(Stage { argv });
        }

        Ok(Self {
            stages,
            input,
            output,
            background,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn input(&self) -> Option<&PathBuf> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&OutputRedirect> {
        self.output.as_ref()
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn is_pipeline(&self) -> bool {
        self.stages.len() > 1
    }
}

fn redirect_target<'a, I>(words: &mut I) -> Option<PathBuf>
where
    I: Iterator<Item = &'a String>,
{
    words
        .next()
        .filter(|word| Operator::parse(word).is_none())
        .map(PathBuf::from)
}
