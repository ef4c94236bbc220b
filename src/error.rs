use thiserror::Error;

/// Everything the lexer, parsers, kernel, and VM can fail with. Message
/// texts match the classic tools so scripts that grep diagnostics keep
/// working.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Lexer.
    #[error("bad character")]
    BadChar,
    #[error("string end could not be found")]
    NoStringEnd,
    #[error("comment end could not be found")]
    NoCommentEnd,
    #[error("end of file")]
    Eof,

    // Parsers.
    #[error("bad token")]
    BadToken,
    #[error("bad expression")]
    BadExpression,
    #[error("empty expression")]
    EmptyExpression,
    #[error("bad print statement")]
    BadPrint,
    #[error("bad function definition")]
    BadFunc,
    #[error("bad assignment: left side must be scale, ibase, obase, last, var, or array element")]
    BadAssign,
    #[error("no auto variable found")]
    NoAuto,
    #[error("function parameter or auto var has the same name as another")]
    DuplicateLocal,
    #[error("block end could not be found")]
    NoBlockEnd,

    // Math.
    #[error("negative number")]
    Negative,
    #[error("non integer number")]
    NonInteger,
    #[error("overflow")]
    Overflow,
    #[error("divide by zero")]
    DivideByZero,
    #[error("bad number string")]
    BadNumString,

    // Execution.
    #[error("number too long: must be [1, BC_NUM_MAX]")]
    NumLen,
    #[error("name too long: must be [1, BC_NAME_MAX]")]
    NameLen,
    #[error("string too long: must be [1, BC_STRING_MAX]")]
    StringLen,
    #[error("array too long; must be [1, BC_DIM_MAX]")]
    ArrayLen,
    #[error("bad ibase; must be [2, 16]")]
    BadIbase,
    #[error("bad obase; must be [2, BC_BASE_MAX]")]
    BadObase,
    #[error("bad scale; must be [0, BC_SCALE_MAX]")]
    BadScale,
    #[error("bad read() expression")]
    BadRead,
    #[error("read() call inside of a read() call")]
    RecursiveRead,
    #[error("variable is wrong type")]
    WrongType,
    #[error("stack has too few elements")]
    StackUnderflow,
    #[error("index is out of bounds")]
    IndexOutOfBounds,
    #[error("mismatched parameters")]
    MismatchedParams,
    #[error("undefined function")]
    UndefinedFunction,
    #[error("signal caught and not handled")]
    Signal,

    #[error("I/O error: {0}")]
    Io(String),

    // A POSIX advisory promoted to fatal by `-s`.
    #[error("{0}")]
    Posix(Warning),
}

impl Error {
    /// Diagnostic category, printed as `<category> error: <message>`.
    pub fn family(&self) -> &'static str {
        use Error::*;
        match self {
            BadChar | NoStringEnd | NoCommentEnd | Eof => "Lex",
            BadToken | BadExpression | EmptyExpression | BadPrint | BadFunc | BadAssign
            | NoAuto | DuplicateLocal | NoBlockEnd => "Parse",
            Negative | NonInteger | Overflow | DivideByZero | BadNumString => "Math",
            Posix(_) => "POSIX",
            _ => "Runtime",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Non-POSIX constructs the lexer and parser notice. Advisory by default;
/// `-s` turns them into errors, `-w` prints them, otherwise they are
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    #[error("POSIX only allows one character names; the following is bad: {0}")]
    NameLen(String),
    #[error("POSIX does not allow '#' script comments")]
    ScriptComment,
    #[error("POSIX does not allow the following keyword: {0}")]
    BadKeyword(&'static str),
    #[error("POSIX does not allow a period ('.') as a shortcut for the last result")]
    DotLast,
    #[error("POSIX requires parentheses around return expressions")]
    ReturnParens,
    #[error("POSIX does not allow boolean operators; the following is bad: {0}")]
    BoolOps(&'static str),
    #[error("POSIX does not allow comparison operators outside if or loops")]
    RelPosition,
    #[error("POSIX requires exactly one comparison operator per condition")]
    MultipleRel,
    #[error("POSIX does not allow an empty init expression in a for loop")]
    EmptyForInit,
    #[error("POSIX does not allow an empty condition expression in a for loop")]
    EmptyForCond,
    #[error("POSIX does not allow an empty update expression in a for loop")]
    EmptyForUpdate,
    #[error("POSIX requires the left brace be on the same line as the function header")]
    BracePlacement,
}

/// How strictly the front end treats POSIX advisories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PosixMode {
    #[default]
    Ignore,
    Warn,
    Error,
}

impl PosixMode {
    /// Report `w` for source line `line` under this mode.
    pub fn check(self, name: &str, w: Warning, line: usize) -> Result<(), Error> {
        match self {
            PosixMode::Ignore => Ok(()),
            PosixMode::Warn => {
                eprintln!("\n{} warning: {}\n:{}\n", name, w, line);
                Ok(())
            }
            PosixMode::Error => Err(Error::Posix(w)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families() {
        assert_eq!(Error::BadChar.family(), "Lex");
        assert_eq!(Error::BadAssign.family(), "Parse");
        assert_eq!(Error::DivideByZero.family(), "Math");
        assert_eq!(Error::RecursiveRead.family(), "Runtime");
    }

    #[test]
    fn test_ignore_mode_swallows() {
        assert!(PosixMode::Ignore.check("bc", Warning::ScriptComment, 3).is_ok());
        assert!(matches!(
            PosixMode::Error.check("bc", Warning::ScriptComment, 3),
            Err(Error::Posix(Warning::ScriptComment))
        ));
    }
}
