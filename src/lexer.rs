use crate::error::{Error, PosixMode, Warning};
use crate::limits;
use crate::token::Token;
use crate::Dialect;

/// Turns one chunk of source text at a time into tokens. The REPL feeds it
/// a line per call; state that must survive chunk boundaries (line count,
/// pending-register flag) lives here.
pub struct Lexer {
    buf: Vec<u8>,
    i: usize,
    pub line: usize,
    newline: bool,
    dialect: Dialect,
    pub mode: PosixMode,
    // Set after a DC register-taking command: the next raw character is a
    // register name regardless of its class.
    reg_pending: bool,
}

impl Lexer {
    pub fn new(dialect: Dialect, mode: PosixMode) -> Self {
        Lexer {
            buf: Vec::new(),
            i: 0,
            line: 1,
            newline: false,
            dialect,
            mode,
            reg_pending: false,
        }
    }

    /// Replace the buffer with a new chunk of the same source.
    pub fn set_text(&mut self, text: &str) {
        self.buf = text.as_bytes().to_vec();
        self.i = 0;
    }

    /// Start over for a new source file.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.i = 0;
        self.line = 1;
        self.newline = false;
        self.reg_pending = false;
    }

    pub fn at_eof(&self) -> bool {
        self.i >= self.buf.len()
    }

    /// Abandon the rest of the current chunk (error recovery).
    pub fn drain(&mut self) {
        self.i = self.buf.len();
        self.reg_pending = false;
    }

    fn posix(&self, w: Warning) -> Result<(), Error> {
        self.mode.check(self.dialect.name(), w, self.line)
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.i).copied()
    }

    /// Next non-whitespace token, or `Eof` at the end of the buffer.
    pub fn next(&mut self) -> Result<Token, Error> {
        if self.newline {
            self.line += 1;
            self.newline = false;
        }
        loop {
            if self.i >= self.buf.len() {
                return Ok(Token::Eof);
            }
            let tok = match self.dialect {
                Dialect::Bc => self.bc_token()?,
                Dialect::Dc => self.dc_token()?,
            };
            if let Some(t) = tok {
                if self.dialect == Dialect::Dc && takes_register(&t) {
                    self.reg_pending = true;
                }
                return Ok(t);
            }
        }
    }

    /// Digits, `A`-`F`, and radix points, with `\`+newline spliced out.
    /// Validity against the current ibase is the kernel's business.
    fn read_number(&mut self, start: u8) -> Result<Token, Error> {
        let mut num = String::new();
        num.push(start as char);
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || (b'A'..=b'F').contains(&c) || c == b'.' {
                num.push(c as char);
                self.i += 1;
            } else if c == b'\\' && self.buf.get(self.i + 1) == Some(&b'\n') {
                self.i += 2;
                self.line += 1;
            } else {
                break;
            }
        }
        if num.len() > limits::NUM_MAX as usize {
            return Err(Error::NumLen);
        }
        Ok(Token::Number(num))
    }

    fn two_char(&mut self, second: u8, with: Token, without: Token) -> Token {
        if self.peek() == Some(second) {
            self.i += 1;
            with
        } else {
            without
        }
    }

    fn bc_string(&mut self) -> Result<Token, Error> {
        let start = self.i;
        let mut nls = 0;
        loop {
            match self.peek() {
                None => {
                    return Err(Error::NoStringEnd);
                }
                Some(b'"') => break,
                Some(c) => {
                    if c == b'\n' {
                        nls += 1;
                    }
                    self.i += 1;
                }
            }
        }
        let len = self.i - start;
        if len > limits::STRING_MAX as usize {
            return Err(Error::StringLen);
        }
        let s = String::from_utf8_lossy(&self.buf[start..self.i]).into_owned();
        self.i += 1;
        self.line += nls;
        Ok(Token::String(s))
    }

    fn bc_comment(&mut self) -> Result<(), Error> {
        // Positioned just past the `/*`.
        let mut nls = 0;
        loop {
            match self.peek() {
                None => return Err(Error::NoCommentEnd),
                Some(b'*') if self.buf.get(self.i + 1) == Some(&b'/') => {
                    self.i += 2;
                    self.line += nls;
                    return Ok(());
                }
                Some(c) => {
                    if c == b'\n' {
                        nls += 1;
                    }
                    self.i += 1;
                }
            }
        }
    }

    fn line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.i += 1;
        }
    }

    fn bc_identifier(&mut self, start: u8) -> Result<Token, Error> {
        let mut name = String::new();
        name.push(start as char);
        while let Some(c) = self.peek() {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'_' {
                name.push(c as char);
                self.i += 1;
            } else {
                break;
            }
        }
        if let Some((tok, posix_ok)) = Token::keyword(&name) {
            if !posix_ok {
                let kw = crate::token::KEYWORDS
                    .iter()
                    .find(|(n, _, _)| *n == name)
                    .map(|(n, _, _)| *n)
                    .unwrap_or("");
                self.posix(Warning::BadKeyword(kw))?;
            }
            return Ok(tok);
        }
        if name.len() > limits::NAME_MAX as usize {
            return Err(Error::NameLen);
        }
        if name.len() > 1 {
            self.posix(Warning::NameLen(name.clone()))?;
        }
        Ok(Token::Ident(name))
    }

    fn bc_token(&mut self) -> Result<Option<Token>, Error> {
        let c = self.buf[self.i];
        self.i += 1;
        let tok = match c {
            b'\n' => {
                self.newline = true;
                Token::Newline
            }
            b'\t' | b'\x0b' | b'\x0c' | b'\r' | b' ' => return Ok(None),
            b'!' => {
                let t = self.two_char(b'=', Token::RelNe, Token::BoolNot);
                if t == Token::BoolNot {
                    self.posix(Warning::BoolOps("!"))?;
                }
                t
            }
            b'"' => self.bc_string()?,
            b'#' => {
                self.posix(Warning::ScriptComment)?;
                self.line_comment();
                return Ok(None);
            }
            b'%' => self.two_char(b'=', Token::AssignModulus, Token::Modulus),
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.posix(Warning::BoolOps("&&"))?;
                    self.i += 1;
                    Token::BoolAnd
                } else {
                    return Err(Error::BadChar);
                }
            }
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'*' => self.two_char(b'=', Token::AssignMultiply, Token::Multiply),
            b'+' => {
                if self.peek() == Some(b'+') {
                    self.i += 1;
                    Token::Inc
                } else {
                    self.two_char(b'=', Token::AssignPlus, Token::Plus)
                }
            }
            b',' => Token::Comma,
            b'-' => {
                if self.peek() == Some(b'-') {
                    self.i += 1;
                    Token::Dec
                } else {
                    self.two_char(b'=', Token::AssignMinus, Token::Minus)
                }
            }
            b'.' => {
                if self.peek().map_or(false, |c| c.is_ascii_digit()) {
                    self.read_number(c)?
                } else {
                    self.posix(Warning::DotLast)?;
                    Token::Last
                }
            }
            b'/' => {
                if self.peek() == Some(b'*') {
                    self.i += 1;
                    self.bc_comment()?;
                    return Ok(None);
                }
                self.two_char(b'=', Token::AssignDivide, Token::Divide)
            }
            b'0'..=b'9' | b'A'..=b'F' => self.read_number(c)?,
            b';' => Token::Semicolon,
            b'<' => self.two_char(b'=', Token::RelLe, Token::RelLt),
            b'=' => self.two_char(b'=', Token::RelEq, Token::Assign),
            b'>' => self.two_char(b'=', Token::RelGe, Token::RelGt),
            b'[' => Token::LBracket,
            b'\\' => {
                if self.peek() == Some(b'\n') {
                    self.i += 1;
                    self.line += 1;
                    return Ok(None);
                }
                return Err(Error::BadChar);
            }
            b']' => Token::RBracket,
            b'^' => self.two_char(b'=', Token::AssignPower, Token::Power),
            b'a'..=b'z' => self.bc_identifier(c)?,
            b'{' => Token::LBrace,
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.posix(Warning::BoolOps("||"))?;
                    self.i += 1;
                    Token::BoolOr
                } else {
                    return Err(Error::BadChar);
                }
            }
            b'}' => Token::RBrace,
            _ => return Err(Error::BadChar),
        };
        Ok(Some(tok))
    }

    fn dc_string(&mut self) -> Result<Token, Error> {
        // Brackets nest inside dc strings.
        let start = self.i;
        let mut depth = 1usize;
        while let Some(c) = self.peek() {
            match c {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                b'\n' => self.line += 1,
                _ => {}
            }
            self.i += 1;
        }
        if depth != 0 {
            return Err(Error::NoStringEnd);
        }
        if self.i - start > limits::STRING_MAX as usize {
            return Err(Error::StringLen);
        }
        let s = String::from_utf8_lossy(&self.buf[start..self.i]).into_owned();
        self.i += 1;
        Ok(Token::String(s))
    }

    fn dc_register(&mut self) -> Result<Option<Token>, Error> {
        self.i -= 1;
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                if c == b'\n' {
                    self.line += 1;
                }
                self.i += 1;
            } else {
                break;
            }
        }
        match self.peek() {
            None => Err(Error::Eof),
            Some(c) => {
                self.i += 1;
                self.reg_pending = false;
                Ok(Some(Token::Ident((c as char).to_string())))
            }
        }
    }

    fn dc_token(&mut self) -> Result<Option<Token>, Error> {
        let c = self.buf[self.i];
        self.i += 1;

        if self.reg_pending {
            return self.dc_register();
        }

        let tok = match c {
            b'\n' => {
                self.line += 1;
                return Ok(None);
            }
            b'\t' | b'\x0b' | b'\x0c' | b'\r' | b' ' => return Ok(None),
            b'#' => {
                self.line_comment();
                return Ok(None);
            }
            b'!' => match self.peek() {
                Some(b'<') => {
                    self.i += 1;
                    Token::RelLe
                }
                Some(b'>') => {
                    self.i += 1;
                    Token::RelGe
                }
                Some(b'=') => {
                    self.i += 1;
                    Token::RelNe
                }
                _ => Token::BoolNot,
            },
            b'%' => Token::Modulus,
            b'*' => Token::Multiply,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'/' => Token::Divide,
            b'^' => Token::Power,
            b'|' => Token::Modexp,
            b'~' => Token::Divmod,
            b'_' => Token::Neg,
            b'0'..=b'9' | b'A'..=b'F' | b'.' => self.read_number(c)?,
            b'[' => self.dc_string()?,
            b':' => Token::Colon,
            b';' => Token::Semicolon,
            b'<' => Token::RelGt,
            b'=' => Token::RelEq,
            b'>' => Token::RelLt,
            b'?' => Token::Read,
            b'I' => Token::Ibase,
            b'K' => Token::Scale,
            b'L' => Token::LoadPop,
            b'O' => Token::Obase,
            b'P' => Token::PrintStream,
            b'Q' => Token::Nquit,
            b'R' => Token::Pop,
            b'S' => Token::StorePush,
            b'X' => Token::ScaleFactor,
            b'Z' => Token::Length,
            b'a' => Token::Asciify,
            b'c' => Token::ClearStack,
            b'd' => Token::Duplicate,
            b'e' => Token::ElseReg,
            b'f' => Token::PrintStack,
            b'i' => Token::StoreIbase,
            b'k' => Token::StoreScale,
            b'l' => Token::Load,
            b'n' => Token::PrintPop,
            b'o' => Token::StoreObase,
            b'p' => Token::Print,
            b'q' => Token::Quit,
            b'r' => Token::Swap,
            b's' => Token::Assign,
            b'v' => Token::Sqrt,
            b'x' => Token::Execute,
            b'z' => Token::StackLevel,
            _ => return Err(Error::BadChar),
        };
        Ok(Some(tok))
    }
}

/// DC commands whose next raw character is a register name.
fn takes_register(t: &Token) -> bool {
    matches!(
        t,
        Token::RelEq
            | Token::RelLe
            | Token::RelGe
            | Token::RelNe
            | Token::RelLt
            | Token::RelGt
            | Token::Colon
            | Token::Semicolon
            | Token::ElseReg
            | Token::Load
            | Token::LoadPop
            | Token::Assign
            | Token::StorePush
    )
}
