//! Parsing for the REPL's line-level commands.

use thiserror::Error;

use crate::record::Row;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Insert(Row),
    Select,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrepareError {
    #[error("Syntax error. Could not parse statement.")]
    Syntax,

    #[error("ID must be positive.")]
    NegativeId,

    #[error("Unrecognized keyword at start of '{0}'.")]
    UnrecognizedStatement(String),

    #[error("Unrecognized command '{0}'.")]
    UnrecognizedCommand(String),
}

/// Commands starting with `.`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCommand {
    Exit,
    Btree,
    Constants,
}

impl MetaCommand {
    pub fn parse(input: &str) -> Result<Self, PrepareError> {
        match input.trim() {
            ".exit" => Ok(MetaCommand::Exit),
            ".btree" => Ok(MetaCommand::Btree),
            ".constants" => Ok(MetaCommand::Constants),
            other => Err(PrepareError::UnrecognizedCommand(other.to_string())),
        }
    }
}

/// Parse `insert <id> <username> <email>` or `select`. Keywords match by
/// prefix and tokens after the email are ignored.
pub fn prepare(input: &str) -> Result<Statement, PrepareError> {
    let input = input.trim();

    if input.starts_with("insert") {
        let mut tokens = input.split_whitespace().skip(1);
        let (Some(id), Some(username), Some(email)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(PrepareError::Syntax);
        };

        let id: i64 = id.parse().map_err(|_| PrepareError::Syntax)?;
        if id < 0 {
            return Err(PrepareError::NegativeId);
        }
        let id = u32::try_from(id).map_err(|_| PrepareError::Syntax)?;
        return Ok(Statement::Insert(Row::new(id, username, email)));
    }

    if input.starts_with("select") {
        return Ok(Statement::Select);
    }

    Err(PrepareError::UnrecognizedStatement(input.to_string()))
}
