use std::{env, fmt, path::PathBuf};

/// A raw `--flag` or positional path argument, before it's been checked for
/// consistency against the others.
#[derive(Debug, Clone)]
enum Token {
    Version,
    Help,
    Unknown(String),
    Path(PathBuf),
}

fn lex(mut args: impl Iterator<Item = String>) -> Vec<Token> {
    args.next(); // argv[0]
    args.map(|arg| match arg.as_str() {
        "--version" => Token::Version,
        "--help" => Token::Help,
        x if x.starts_with("--") => Token::Unknown(arg),
        _ => Token::Path(PathBuf::from(arg)),
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Repl,
    File(PathBuf),
    Version,
    Help,
}

#[derive(Debug, Clone)]
pub enum ParseError {
    UnknownFlag(String),
    TooManyArguments,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFlag(flag) => write!(f, "unknown flag '{flag}'"),
            Self::TooManyArguments => write!(f, "expected at most one path argument"),
        }
    }
}

/// Interprets the tokenized argument list. `--version`/`--help` win outright
/// (and ignore any path given alongside them); otherwise at most one path is
/// allowed, and its absence means "run the REPL".
fn interpret(tokens: Vec<Token>) -> Result<Action, ParseError> {
    let mut path = None;
    for token in tokens {
        match token {
            Token::Version => return Ok(Action::Version),
            Token::Help => return Ok(Action::Help),
            Token::Unknown(flag) => return Err(ParseError::UnknownFlag(flag)),
            Token::Path(p) => {
                if path.replace(p).is_some() {
                    return Err(ParseError::TooManyArguments);
                }
            }
        }
    }
    Ok(match path {
        Some(p) => Action::File(p),
        None => Action::Repl,
    })
}

pub fn parse(args: impl Iterator<Item = String>) -> Result<Action, ParseError> {
    interpret(lex(args))
}

pub fn from_env() -> Result<Action, ParseError> {
    parse(env::args())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_means_repl() {
        assert_eq!(parse(args(&["prog"]).into_iter()).unwrap(), Action::Repl);
    }

    #[test]
    fn a_single_path_runs_that_file() {
        assert_eq!(
            parse(args(&["prog", "script.qt"]).into_iter()).unwrap(),
            Action::File(PathBuf::from("script.qt"))
        );
    }

    #[test]
    fn version_flag_wins_over_a_path() {
        assert_eq!(
            parse(args(&["prog", "--version", "script.qt"]).into_iter()).unwrap(),
            Action::Version
        );
    }

    #[test]
    fn help_flag() {
        assert_eq!(parse(args(&["prog", "--help"]).into_iter()).unwrap(), Action::Help);
    }

    #[test]
    fn two_paths_is_a_usage_error() {
        assert!(matches!(
            parse(args(&["prog", "a.qt", "b.qt"]).into_iter()),
            Err(ParseError::TooManyArguments)
        ));
    }

    #[test]
    fn unknown_flag_is_a_usage_error() {
        assert!(matches!(
            parse(args(&["prog", "--nope"]).into_iter()),
            Err(ParseError::UnknownFlag(_))
        ));
    }
}
