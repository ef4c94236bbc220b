use crate::bytecode::{Func, Inst};
use crate::error::{Error, PosixMode, Warning};
use crate::interrupt;
use crate::lexer::Lexer;
use crate::program::{Program, MAIN_FUNC};
use crate::token::Token;
use crate::Dialect;

// Statement-context flags, one bitset per nesting level.
pub const FLAG_FUNC_INNER: u8 = 0x01;
pub const FLAG_FUNC: u8 = 0x02;
pub const FLAG_BODY: u8 = 0x04;
pub const FLAG_LOOP: u8 = 0x08;
pub const FLAG_LOOP_INNER: u8 = 0x10;
pub const FLAG_IF: u8 = 0x20;
pub const FLAG_ELSE: u8 = 0x40;
pub const FLAG_IF_END: u8 = 0x80;

// Expression-compiler flags.
pub const EXPR_REL: u8 = 0x01;
pub const EXPR_PRINT: u8 = 0x02;
pub const EXPR_NOCALL: u8 = 0x04;
pub const EXPR_NOREAD: u8 = 0x08;
pub const EXPR_ARRAY: u8 = 0x10;

// Tokens allowed to follow an expression, by context.
pub const NEXT_EXPR: &[Token] = &[Token::Newline, Token::Semicolon, Token::RBrace, Token::Eof];
const NEXT_PARAM: &[Token] = &[Token::RParen, Token::Comma];
const NEXT_PRINT: &[Token] = &[Token::Comma, Token::Newline, Token::Semicolon, Token::Eof];
const NEXT_REL: &[Token] = &[Token::RParen];
const NEXT_ELEM: &[Token] = &[Token::RBracket];
const NEXT_FOR: &[Token] = &[Token::Semicolon];
pub const NEXT_READ: &[Token] = &[Token::Newline, Token::Eof];

/// Parse-time pseudo-statements the REPL must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pseudo {
    Quit,
    Limits,
}

/// A forward-jump label waiting for its offset; loop exits are marked so
/// `break` can find the innermost loop past any `if` exits.
struct ExitLabel {
    label: usize,
    is_loop: bool,
}

/// Sentinel for a label that has not been patched yet.
const UNSET: usize = usize::MAX;

/// The parser/compiler. It carries its operator stack, scope flags, and
/// pending labels across `parse` calls so the REPL can feed it a line at a
/// time; compiled code lands in `Program::fns[self.fidx]`.
pub struct Parser {
    pub lexer: Lexer,
    pub tok: Token,
    flags: Vec<u8>,
    exits: Vec<ExitLabel>,
    conds: Vec<usize>,
    ops: Vec<Token>,
    pub fidx: usize,
    nbraces: usize,
    auto_part: bool,
    dialect: Dialect,
    pub pseudo: Option<Pseudo>,
}

impl Parser {
    pub fn new(dialect: Dialect, mode: PosixMode) -> Self {
        Parser {
            lexer: Lexer::new(dialect, mode),
            tok: Token::Eof,
            flags: vec![0],
            exits: Vec::new(),
            conds: Vec::new(),
            ops: Vec::new(),
            fidx: MAIN_FUNC,
            nbraces: 0,
            auto_part: false,
            dialect,
            pseudo: None,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Feed the next chunk of source and prime the first token.
    pub fn parse_text(&mut self, text: &str) -> Result<(), Error> {
        self.lexer.set_text(text);
        self.next()
    }

    pub fn next(&mut self) -> Result<(), Error> {
        self.tok = self.lexer.next()?;
        Ok(())
    }

    fn top_flags(&self) -> u8 {
        *self.flags.last().expect("flag stack nonempty")
    }

    fn flag(&self, bit: u8) -> bool {
        self.top_flags() & bit != 0
    }

    /// True when nothing is pending: no open function, loop, if, or body.
    pub fn can_exec(&self) -> bool {
        self.top_flags() == 0
    }

    fn posix(&self, w: Warning) -> Result<(), Error> {
        self.lexer.mode.check(self.dialect.name(), w, self.lexer.line)
    }

    fn func<'a>(&self, prog: &'a mut Program) -> &'a mut Func {
        &mut prog.fns[self.fidx]
    }

    pub(crate) fn push_inst(&self, prog: &mut Program, inst: Inst) {
        self.func(prog).push_inst(inst);
    }

    pub(crate) fn push_index(&self, prog: &mut Program, idx: usize) {
        self.func(prog).push_index(idx);
    }

    pub(crate) fn push_name(&self, prog: &mut Program, name: &str) {
        self.func(prog).push_name(name);
    }

    pub(crate) fn push_strend(&self, prog: &mut Program) {
        self.func(prog).code.push(crate::bytecode::STREND);
    }

    pub(crate) fn expect(&mut self, tok: Token, err: Error) -> Result<(), Error> {
        if self.tok == tok {
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Throw away everything half-parsed after an error: the current
    /// function body if it was a definition, the scope stacks, and the
    /// rest of the input buffer.
    pub fn reset(&mut self, prog: &mut Program) {
        if self.fidx != MAIN_FUNC {
            prog.fns[self.fidx].reset();
            self.fidx = MAIN_FUNC;
        }
        self.tok = Token::Eof;
        self.lexer.drain();
        self.auto_part = false;
        self.nbraces = 0;
        self.flags.clear();
        self.flags.push(0);
        self.exits.clear();
        self.conds.clear();
        self.ops.clear();
        self.pseudo = None;
        prog.reset();
    }

    /// Resolve a pending else-less `if` once the source is exhausted, and
    /// reject truly unclosed blocks.
    pub fn flush(&mut self, prog: &mut Program) -> Result<(), Error> {
        while self.flag(FLAG_IF_END) {
            self.no_else(prog);
        }
        if !self.can_exec() {
            return Err(Error::NoBlockEnd);
        }
        Ok(())
    }

    /// Parse one unit of input: a BC statement or function definition, or
    /// the rest of the chunk for DC. The REPL calls this uniformly for
    /// both dialects.
    pub fn parse(&mut self, prog: &mut Program) -> Result<(), Error> {
        if self.dialect == Dialect::Dc {
            return self.dc_expr(prog, 0);
        }
        if self.tok == Token::Define {
            if !self.can_exec() {
                return Err(Error::BadToken);
            }
            return self.parse_func(prog);
        }
        self.parse_stmt(prog)
    }

    fn parse_stmt(&mut self, prog: &mut Program) -> Result<(), Error> {
        match &self.tok {
            Token::Newline => return self.next(),
            Token::Else => self.auto_part = false,
            Token::LBrace => {
                if !self.flag(FLAG_BODY) {
                    return Err(Error::BadToken);
                }
                self.nbraces += 1;
                self.next()?;
                return self.parse_body(prog, true);
            }
            Token::Auto => return self.parse_auto(prog),
            _ => {
                self.auto_part = false;
                if self.flag(FLAG_IF_END) {
                    self.no_else(prog);
                    return Ok(());
                }
                if self.flag(FLAG_BODY) {
                    return self.parse_body(prog, false);
                }
            }
        }

        match self.tok.clone() {
            Token::Inc
            | Token::Dec
            | Token::Minus
            | Token::BoolNot
            | Token::LParen
            | Token::Ident(_)
            | Token::Number(_)
            | Token::Ibase
            | Token::Last
            | Token::Length
            | Token::Obase
            | Token::Read
            | Token::Scale
            | Token::Sqrt => self.parse_expr(prog, EXPR_PRINT, NEXT_EXPR),
            Token::Else => self.parse_else(prog),
            Token::Semicolon => {
                while self.tok == Token::Semicolon {
                    self.next()?;
                }
                Ok(())
            }
            Token::RBrace => self.parse_end_body(prog, true),
            Token::String(_) => self.parse_string(prog, Inst::PrintStr),
            Token::Break | Token::Continue => self.parse_loop_exit(prog),
            Token::For => self.parse_for(prog),
            Token::Halt => {
                self.push_inst(prog, Inst::Halt);
                self.next()
            }
            Token::If => self.parse_if(prog),
            Token::Limits => {
                self.pseudo = Some(Pseudo::Limits);
                self.next()
            }
            Token::Print => self.parse_print(prog),
            Token::Quit => {
                // A compile-time command: takes effect even inside an
                // unexecuted block.
                self.pseudo = Some(Pseudo::Quit);
                self.next()
            }
            Token::Return => self.parse_return(prog),
            Token::While => self.parse_while(prog),
            _ => Err(Error::BadToken),
        }
    }

    fn start_body(&mut self, flags: u8) {
        let inherited = self.top_flags() & (FLAG_FUNC | FLAG_LOOP);
        self.flags.push(flags | inherited | FLAG_BODY);
    }

    fn parse_body(&mut self, prog: &mut Program, brace: bool) -> Result<(), Error> {
        debug_assert!(self.flags.len() >= 2);
        let top = self.flags.last_mut().expect("flag stack nonempty");
        *top &= !FLAG_BODY;

        if self.flag(FLAG_FUNC_INNER) {
            if !brace {
                return Err(Error::BadToken);
            }
            // The auto section stays open until the first real statement.
            self.auto_part = true;
            if self.tok == Token::Auto {
                self.parse_auto(prog)?;
            }
            if self.tok == Token::Newline {
                self.next()?;
            }
            Ok(())
        } else {
            let s = self.parse_stmt(prog);
            if s.is_ok() && !brace {
                return self.parse_end_body(prog, false);
            }
            s
        }
    }

    fn parse_end_body(&mut self, prog: &mut Program, brace: bool) -> Result<(), Error> {
        if self.flags.len() <= 1 || (brace && self.nbraces == 0) {
            return Err(Error::BadToken);
        }

        if brace {
            if self.tok != Token::RBrace || self.nbraces == 0 {
                return Err(Error::BadToken);
            }
            self.nbraces -= 1;
            self.next()?;
        }

        if self.flag(FLAG_IF) {
            while self.tok == Token::Newline {
                self.next()?;
            }
            self.flags.pop();
            let top = self.flags.last_mut().expect("flag stack nonempty");
            *top |= FLAG_IF_END;
            if self.tok == Token::Else {
                self.parse_else(prog)?;
            }
        } else if self.flag(FLAG_ELSE) {
            self.flags.pop();
            let exit = self.exits.pop().ok_or(Error::BadToken)?;
            let end = self.func(prog).code.len();
            self.func(prog).labels[exit.label] = end;
        } else if self.flag(FLAG_FUNC_INNER) {
            self.push_inst(prog, Inst::Ret0);
            self.fidx = MAIN_FUNC;
            self.flags.pop();
        } else {
            // End of a loop body: jump back to the condition (or the
            // update section of a for), then resolve the exit label.
            let exit = self.exits.pop().ok_or(Error::BadToken)?;
            let cond = self.conds.pop().ok_or(Error::BadToken)?;
            self.push_inst(prog, Inst::Jump);
            self.push_index(prog, cond);
            let end = self.func(prog).code.len();
            self.func(prog).labels[exit.label] = end;
            self.flags.pop();
        }
        Ok(())
    }

    /// Clear a pending IF_END without an `else`: the exit label lands
    /// right here.
    fn no_else(&mut self, prog: &mut Program) {
        let top = self.flags.last_mut().expect("flag stack nonempty");
        *top &= !FLAG_IF_END;
        if let Some(exit) = self.exits.pop() {
            let end = self.func(prog).code.len();
            self.func(prog).labels[exit.label] = end;
        }
    }

    fn parse_if(&mut self, prog: &mut Program) -> Result<(), Error> {
        self.next()?;
        self.expect(Token::LParen, Error::BadToken)?;
        self.next()?;
        self.parse_expr(prog, EXPR_REL, NEXT_REL)?;
        self.expect(Token::RParen, Error::BadToken)?;
        self.next()?;

        self.push_inst(prog, Inst::JumpZero);
        let label = self.func(prog).labels.len();
        self.push_index(prog, label);
        self.func(prog).add_label(UNSET);
        self.exits.push(ExitLabel {
            label,
            is_loop: false,
        });
        self.start_body(FLAG_IF);
        Ok(())
    }

    fn parse_else(&mut self, prog: &mut Program) -> Result<(), Error> {
        if !self.flag(FLAG_IF_END) {
            return Err(Error::BadToken);
        }

        self.push_inst(prog, Inst::Jump);
        let label = self.func(prog).labels.len();
        self.push_index(prog, label);
        self.func(prog).add_label(UNSET);

        self.no_else(prog);
        self.exits.push(ExitLabel {
            label,
            is_loop: false,
        });
        self.start_body(FLAG_ELSE);
        self.next()
    }

    fn parse_while(&mut self, prog: &mut Program) -> Result<(), Error> {
        self.next()?;
        self.expect(Token::LParen, Error::BadToken)?;
        self.next()?;

        let here = self.func(prog).code.len();
        let cond = self.func(prog).add_label(here);
        self.conds.push(cond);

        let exit = self.func(prog).add_label(UNSET);
        self.exits.push(ExitLabel {
            label: exit,
            is_loop: true,
        });

        self.parse_expr(prog, EXPR_REL, NEXT_REL)?;
        self.expect(Token::RParen, Error::BadToken)?;
        self.next()?;

        self.push_inst(prog, Inst::JumpZero);
        self.push_index(prog, exit);
        self.start_body(FLAG_LOOP | FLAG_LOOP_INNER);
        Ok(())
    }

    fn parse_for(&mut self, prog: &mut Program) -> Result<(), Error> {
        self.next()?;
        self.expect(Token::LParen, Error::BadToken)?;
        self.next()?;

        if self.tok != Token::Semicolon {
            self.parse_expr(prog, 0, NEXT_FOR)?;
            self.push_inst(prog, Inst::Pop);
        } else {
            self.posix(Warning::EmptyForInit)?;
        }
        self.expect(Token::Semicolon, Error::BadToken)?;
        self.next()?;

        let cond_idx = self.func(prog).labels.len();
        let update_idx = cond_idx + 1;
        let body_idx = cond_idx + 2;
        let exit_idx = cond_idx + 3;

        let here = self.func(prog).code.len();
        self.func(prog).add_label(here);

        if self.tok != Token::Semicolon {
            self.parse_expr(prog, EXPR_REL, NEXT_FOR)?;
        } else {
            self.posix(Warning::EmptyForCond)?;
            // An absent condition means forever.
            let one = prog.add_const("1".to_string());
            self.push_inst(prog, Inst::Num);
            self.push_index(prog, one);
        }
        self.expect(Token::Semicolon, Error::BadToken)?;
        self.next()?;

        self.push_inst(prog, Inst::JumpZero);
        self.push_index(prog, exit_idx);
        self.push_inst(prog, Inst::Jump);
        self.push_index(prog, body_idx);

        self.conds.push(update_idx);
        let here = self.func(prog).code.len();
        self.func(prog).add_label(here);

        if self.tok != Token::RParen {
            self.parse_expr(prog, 0, NEXT_REL)?;
            self.push_inst(prog, Inst::Pop);
        } else {
            self.posix(Warning::EmptyForUpdate)?;
        }
        self.expect(Token::RParen, Error::BadToken)?;

        self.push_inst(prog, Inst::Jump);
        self.push_index(prog, cond_idx);
        let here = self.func(prog).code.len();
        self.func(prog).add_label(here);
        self.func(prog).add_label(UNSET);

        self.exits.push(ExitLabel {
            label: exit_idx,
            is_loop: true,
        });
        self.next()?;
        self.start_body(FLAG_LOOP | FLAG_LOOP_INNER);
        Ok(())
    }

    fn parse_loop_exit(&mut self, prog: &mut Program) -> Result<(), Error> {
        if !self.flag(FLAG_LOOP) {
            return Err(Error::BadToken);
        }

        let target = if self.tok == Token::Break {
            self.exits
                .iter()
                .rev()
                .find(|e| e.is_loop)
                .map(|e| e.label)
                .ok_or(Error::BadToken)?
        } else {
            *self.conds.last().ok_or(Error::BadToken)?
        };

        self.push_inst(prog, Inst::Jump);
        self.push_index(prog, target);

        self.next()?;
        if self.tok != Token::Semicolon && self.tok != Token::Newline {
            return Err(Error::BadToken);
        }
        self.next()
    }

    fn parse_func(&mut self, prog: &mut Program) -> Result<(), Error> {
        self.next()?;
        let name = match &self.tok {
            Token::Ident(n) => n.clone(),
            _ => return Err(Error::BadFunc),
        };
        self.fidx = prog.add_func(&name);

        self.next()?;
        self.expect(Token::LParen, Error::BadFunc)?;
        self.next()?;

        let mut comma = false;
        while self.tok != Token::RParen {
            let pname = match &self.tok {
                Token::Ident(n) => n.clone(),
                _ => return Err(Error::BadFunc),
            };
            self.next()?;

            let mut is_array = false;
            if self.tok == Token::LBracket {
                self.next()?;
                self.expect(Token::RBracket, Error::BadFunc)?;
                self.next()?;
                is_array = true;
            }

            comma = self.tok == Token::Comma;
            if comma {
                self.next()?;
            }

            prog.fns[self.fidx].insert_param(pname, is_array)?;
        }
        if comma {
            return Err(Error::BadFunc);
        }

        self.start_body(FLAG_FUNC | FLAG_FUNC_INNER);
        self.next()?;

        if self.tok != Token::LBrace {
            self.posix(Warning::BracePlacement)?;
        }
        Ok(())
    }

    fn parse_auto(&mut self, prog: &mut Program) -> Result<(), Error> {
        if !self.auto_part {
            return Err(Error::BadToken);
        }
        self.next()?;
        self.auto_part = false;

        let mut one = false;
        let mut comma = false;
        while let Token::Ident(name) = self.tok.clone() {
            one = true;
            self.next()?;

            let mut is_array = false;
            if self.tok == Token::LBracket {
                self.next()?;
                self.expect(Token::RBracket, Error::BadFunc)?;
                self.next()?;
                is_array = true;
            }

            comma = self.tok == Token::Comma;
            if comma {
                self.next()?;
            }

            prog.fns[self.fidx].insert_auto(name, is_array)?;
        }
        if comma {
            return Err(Error::BadFunc);
        }
        if !one {
            return Err(Error::NoAuto);
        }
        if self.tok != Token::Newline && self.tok != Token::Semicolon {
            return Err(Error::BadToken);
        }
        self.next()
    }

    fn parse_return(&mut self, prog: &mut Program) -> Result<(), Error> {
        if !self.flag(FLAG_FUNC) {
            return Err(Error::BadToken);
        }
        self.next()?;

        let paren = self.tok == Token::LParen;
        if self.tok == Token::Newline || self.tok == Token::Semicolon {
            self.push_inst(prog, Inst::Ret0);
            return Ok(());
        }

        match self.parse_expr(prog, 0, NEXT_EXPR) {
            Err(Error::EmptyExpression) => {
                self.push_inst(prog, Inst::Ret0);
                self.next()?;
            }
            Err(e) => return Err(e),
            Ok(()) => {
                if !paren {
                    self.posix(Warning::ReturnParens)?;
                }
                self.push_inst(prog, Inst::Ret);
            }
        }
        Ok(())
    }

    fn parse_print(&mut self, prog: &mut Program) -> Result<(), Error> {
        self.next()?;

        if matches!(self.tok, Token::Semicolon | Token::Newline | Token::Eof) {
            return Err(Error::BadPrint);
        }

        let mut comma = false;
        while !matches!(self.tok, Token::Semicolon | Token::Newline | Token::Eof) {
            if matches!(self.tok, Token::String(_)) {
                self.parse_string(prog, Inst::PrintPop)?;
            } else {
                self.parse_expr(prog, 0, NEXT_PRINT)?;
                self.push_inst(prog, Inst::PrintPop);
            }
            comma = self.tok == Token::Comma;
            if comma {
                self.next()?;
            }
        }
        if comma {
            return Err(Error::BadToken);
        }
        if self.tok != Token::Eof {
            self.next()?;
        }
        Ok(())
    }

    fn parse_string(&mut self, prog: &mut Program, inst: Inst) -> Result<(), Error> {
        let s = match &self.tok {
            Token::String(s) => s.clone(),
            _ => return Err(Error::BadToken),
        };
        let idx = prog.add_str(s);
        self.push_inst(prog, Inst::Str);
        self.push_index(prog, idx);
        self.push_inst(prog, inst);
        self.next()
    }

    // ----- expression compiler (shunting yard over the token stream) -----

    /// Compile one expression into the current function. `eflags` selects
    /// context behavior; `next_toks` lists the tokens allowed to follow.
    pub fn parse_expr(
        &mut self,
        prog: &mut Program,
        eflags: u8,
        next_toks: &[Token],
    ) -> Result<(), Error> {
        let mut prev = Inst::Print;
        let ops_bgn = self.ops.len();
        let mut nexprs: isize = 0;
        let mut nparens = 0u32;
        let mut nrelops = 0u32;

        let paren_first = self.tok == Token::LParen;
        let mut paren_expr = false;
        let mut rprn = false;
        let mut done = false;
        let mut bin_last = true;

        while !done && token_in_expr(&self.tok) {
            if interrupt::pending() {
                return Err(Error::Signal);
            }
            let mut get_token = false;
            match self.tok.clone() {
                Token::Inc | Token::Dec => {
                    self.parse_incdec(prog, &mut prev, &mut paren_expr, &mut nexprs, eflags)?;
                    rprn = false;
                    bin_last = false;
                }
                Token::Minus => {
                    self.parse_minus(prog, &mut prev, ops_bgn, rprn, &mut nexprs)?;
                    rprn = false;
                    bin_last = prev == Inst::Minus;
                }
                t if t.op_prec().is_some() => {
                    if t.is_assign_op() && !prev.is_lvalue() {
                        return Err(Error::BadAssign);
                    }
                    let is_not = t == Token::BoolNot;
                    if is_not != bin_last || (!is_not && prev == Inst::BoolNot) {
                        return Err(Error::BadExpression);
                    }
                    if t.is_rel_op() {
                        nrelops += 1;
                    }
                    prev = op_inst(&t);
                    self.parse_operator(prog, t, ops_bgn, &mut nexprs, true)?;
                    rprn = false;
                    bin_last = !is_not;
                }
                Token::LParen => {
                    if is_leaf(prev, rprn) {
                        return Err(Error::BadExpression);
                    }
                    nparens += 1;
                    paren_expr = false;
                    rprn = false;
                    bin_last = false;
                    get_token = true;
                    self.ops.push(Token::LParen);
                }
                Token::RParen => {
                    if bin_last || prev == Inst::BoolNot {
                        return Err(Error::BadExpression);
                    }
                    if nparens == 0 {
                        done = true;
                    } else {
                        if !paren_expr {
                            return Err(Error::EmptyExpression);
                        }
                        nparens -= 1;
                        paren_expr = true;
                        rprn = true;
                        bin_last = false;
                        self.parse_right_paren(prog, ops_bgn, &mut nexprs)?;
                    }
                }
                Token::Ident(_) => {
                    if is_leaf(prev, rprn) {
                        return Err(Error::BadExpression);
                    }
                    paren_expr = true;
                    rprn = false;
                    bin_last = false;
                    self.parse_name(prog, &mut prev, eflags & !EXPR_NOCALL)?;
                    nexprs += 1;
                }
                Token::Number(lit) => {
                    if is_leaf(prev, rprn) {
                        return Err(Error::BadExpression);
                    }
                    let idx = prog.add_const(lit);
                    self.push_inst(prog, Inst::Num);
                    self.push_index(prog, idx);
                    prev = Inst::Num;
                    nexprs += 1;
                    paren_expr = true;
                    rprn = false;
                    bin_last = false;
                    get_token = true;
                }
                t @ (Token::Ibase | Token::Obase | Token::Last) => {
                    if is_leaf(prev, rprn) {
                        return Err(Error::BadExpression);
                    }
                    prev = match t {
                        Token::Ibase => Inst::Ibase,
                        Token::Obase => Inst::Obase,
                        _ => Inst::Last,
                    };
                    self.push_inst(prog, prev);
                    nexprs += 1;
                    paren_expr = true;
                    rprn = false;
                    bin_last = false;
                    get_token = true;
                }
                t @ (Token::Length | Token::Sqrt) => {
                    if is_leaf(prev, rprn) {
                        return Err(Error::BadExpression);
                    }
                    self.parse_builtin(prog, t, eflags, &mut prev)?;
                    nexprs += 1;
                    paren_expr = true;
                    rprn = false;
                    bin_last = false;
                }
                Token::Read => {
                    if is_leaf(prev, rprn) {
                        return Err(Error::BadExpression);
                    }
                    if eflags & EXPR_NOREAD != 0 {
                        return Err(Error::RecursiveRead);
                    }
                    self.parse_read(prog)?;
                    prev = Inst::Read;
                    nexprs += 1;
                    paren_expr = true;
                    rprn = false;
                    bin_last = false;
                }
                Token::Scale => {
                    if is_leaf(prev, rprn) {
                        return Err(Error::BadExpression);
                    }
                    self.parse_scale(prog, &mut prev, eflags)?;
                    nexprs += 1;
                    paren_expr = true;
                    rprn = false;
                    bin_last = false;
                }
                _ => return Err(Error::BadToken),
            }
            if get_token {
                self.next()?;
            }
        }

        let mut assign = false;
        while self.ops.len() > ops_bgn {
            let top = self.ops.last().expect("ops nonempty").clone();
            if top == Token::LParen || top == Token::RParen {
                return Err(Error::BadExpression);
            }
            assign = top.is_assign_op();
            self.push_inst(prog, op_inst(&top));
            if top != Token::BoolNot && top != Token::Neg {
                nexprs -= 1;
            }
            self.ops.pop();
        }

        if prev == Inst::BoolNot || nexprs != 1 {
            return Err(Error::BadExpression);
        }

        if !next_toks.contains(&self.tok) {
            return Err(Error::BadExpression);
        }

        if eflags & EXPR_REL == 0 && nrelops > 0 {
            self.posix(Warning::RelPosition)?;
        } else if eflags & EXPR_REL != 0 && nrelops > 1 {
            self.posix(Warning::MultipleRel)?;
        }

        if eflags & EXPR_PRINT != 0 {
            if paren_first || !assign {
                self.push_inst(prog, Inst::Print);
            } else {
                self.push_inst(prog, Inst::Pop);
            }
        }

        Ok(())
    }

    /// Pop stack operators that bind at least as tightly as `t`, then push
    /// `t`.
    fn parse_operator(
        &mut self,
        prog: &mut Program,
        t: Token,
        ops_bgn: usize,
        nexprs: &mut isize,
        next: bool,
    ) -> Result<(), Error> {
        let (r_prec, left) = t.op_prec().expect("operator token");

        while self.ops.len() > ops_bgn {
            let top = self.ops.last().expect("ops nonempty").clone();
            if top == Token::LParen {
                break;
            }
            let (l_prec, _) = top.op_prec().expect("operator on stack");
            if l_prec > r_prec || (l_prec == r_prec && left) {
                self.push_inst(prog, op_inst(&top));
                self.ops.pop();
                if top != Token::BoolNot && top != Token::Neg {
                    *nexprs -= 1;
                }
            } else {
                break;
            }
        }

        self.ops.push(t);
        if next {
            self.next()?;
        }
        Ok(())
    }

    fn parse_right_paren(
        &mut self,
        prog: &mut Program,
        ops_bgn: usize,
        nexprs: &mut isize,
    ) -> Result<(), Error> {
        if self.ops.len() <= ops_bgn {
            return Err(Error::BadExpression);
        }
        loop {
            let top = self.ops.last().expect("ops nonempty").clone();
            if top == Token::LParen {
                break;
            }
            self.push_inst(prog, op_inst(&top));
            self.ops.pop();
            if top != Token::BoolNot && top != Token::Neg {
                *nexprs -= 1;
            }
            if self.ops.len() <= ops_bgn {
                return Err(Error::BadExpression);
            }
        }
        self.ops.pop();
        self.next()
    }

    /// Unary vs. binary minus is decided by what came before: a leaf (or a
    /// close paren, or a postfix op) means binary.
    fn parse_minus(
        &mut self,
        prog: &mut Program,
        prev: &mut Inst,
        ops_bgn: usize,
        rprn: bool,
        nexprs: &mut isize,
    ) -> Result<(), Error> {
        self.next()?;

        let binary = rprn || is_leaf_inst(*prev);
        if binary {
            *prev = Inst::Minus;
            self.parse_operator(prog, Token::Minus, ops_bgn, nexprs, false)
        } else {
            *prev = Inst::Neg;
            // Negation binds tighter than any stacked operator; push it
            // without popping anything.
            self.ops.push(Token::Neg);
            Ok(())
        }
    }

    fn parse_incdec(
        &mut self,
        prog: &mut Program,
        prev: &mut Inst,
        paren_expr: &mut bool,
        nexprs: &mut isize,
        eflags: u8,
    ) -> Result<(), Error> {
        let inc = self.tok == Token::Inc;
        if prev.is_lvalue() {
            // Postfix: the target instruction was just emitted.
            let inst = if inc { Inst::IncPost } else { Inst::DecPost };
            *prev = inst;
            self.push_inst(prog, inst);
            self.next()
        } else {
            let inst = if inc { Inst::IncPre } else { Inst::DecPre };
            *prev = inst;
            *paren_expr = true;
            self.next()?;
            *nexprs += 1;

            match self.tok.clone() {
                Token::Ident(_) => {
                    self.parse_name(prog, prev, eflags | EXPR_NOCALL)?;
                }
                t @ (Token::Ibase | Token::Obase | Token::Last) => {
                    let target = match t {
                        Token::Ibase => Inst::Ibase,
                        Token::Obase => Inst::Obase,
                        _ => Inst::Last,
                    };
                    self.push_inst(prog, target);
                    self.next()?;
                }
                Token::Scale => {
                    self.next()?;
                    if self.tok == Token::LParen {
                        return Err(Error::BadToken);
                    }
                    self.push_inst(prog, Inst::Scale);
                }
                _ => return Err(Error::BadToken),
            }
            self.push_inst(prog, inst);
            Ok(())
        }
    }

    fn parse_name(
        &mut self,
        prog: &mut Program,
        prev: &mut Inst,
        eflags: u8,
    ) -> Result<(), Error> {
        let name = match &self.tok {
            Token::Ident(n) => n.clone(),
            _ => return Err(Error::BadToken),
        };
        self.next()?;

        if self.tok == Token::LBracket {
            self.next()?;
            if self.tok == Token::RBracket {
                if eflags & EXPR_ARRAY == 0 {
                    return Err(Error::BadExpression);
                }
                *prev = Inst::Array;
            } else {
                *prev = Inst::ArrayElem;
                self.parse_expr(prog, eflags & !(EXPR_PRINT | EXPR_REL), NEXT_ELEM)?;
            }
            self.next()?;
            let inst = *prev;
            self.push_inst(prog, inst);
            self.push_name(prog, &name);
            Ok(())
        } else if self.tok == Token::LParen {
            if eflags & EXPR_NOCALL != 0 {
                return Err(Error::BadToken);
            }
            *prev = Inst::Call;
            self.parse_call(prog, &name, eflags)
        } else {
            *prev = Inst::Var;
            self.push_inst(prog, Inst::Var);
            self.push_name(prog, &name);
            Ok(())
        }
    }

    fn parse_call(&mut self, prog: &mut Program, name: &str, eflags: u8) -> Result<(), Error> {
        self.next()?;

        let mut nparams = 0usize;
        let mut comma = false;
        while self.tok != Token::RParen {
            let f = (eflags & !(EXPR_PRINT | EXPR_REL)) | EXPR_ARRAY;
            self.parse_expr(prog, f, NEXT_PARAM)?;
            nparams += 1;
            comma = self.tok == Token::Comma;
            if comma {
                self.next()?;
            }
        }
        if comma {
            return Err(Error::BadToken);
        }

        self.push_inst(prog, Inst::Call);
        self.push_index(prog, nparams);

        // Forward references are fine: register an empty body now, filled
        // in if a definition shows up later.
        let idx = match prog.fn_map.get(name) {
            Some(&i) => i,
            None => prog.add_func(name),
        };
        self.push_index(prog, idx);
        self.next()
    }

    fn parse_builtin(
        &mut self,
        prog: &mut Program,
        t: Token,
        eflags: u8,
        prev: &mut Inst,
    ) -> Result<(), Error> {
        self.next()?;
        self.expect(Token::LParen, Error::BadToken)?;
        self.next()?;

        let f = (eflags & !(EXPR_PRINT | EXPR_REL)) | EXPR_ARRAY;
        self.parse_expr(prog, f, NEXT_REL)?;
        self.expect(Token::RParen, Error::BadToken)?;

        *prev = if t == Token::Length {
            Inst::Length
        } else {
            Inst::Sqrt
        };
        self.push_inst(prog, *prev);
        self.next()
    }

    fn parse_scale(
        &mut self,
        prog: &mut Program,
        prev: &mut Inst,
        eflags: u8,
    ) -> Result<(), Error> {
        self.next()?;

        if self.tok != Token::LParen {
            *prev = Inst::Scale;
            self.push_inst(prog, Inst::Scale);
            return Ok(());
        }

        *prev = Inst::ScaleFunc;
        self.next()?;
        self.parse_expr(prog, eflags & !(EXPR_PRINT | EXPR_REL), NEXT_REL)?;
        self.expect(Token::RParen, Error::BadToken)?;
        self.push_inst(prog, Inst::ScaleFunc);
        self.next()
    }

    fn parse_read(&mut self, prog: &mut Program) -> Result<(), Error> {
        self.next()?;
        self.expect(Token::LParen, Error::BadToken)?;
        self.next()?;
        self.expect(Token::RParen, Error::BadToken)?;
        self.push_inst(prog, Inst::Read);
        self.next()
    }
}

/// Tokens that may appear inside an expression.
fn token_in_expr(t: &Token) -> bool {
    t.op_prec().is_some()
        || matches!(
            t,
            Token::LParen
                | Token::RParen
                | Token::Ident(_)
                | Token::Number(_)
                | Token::Ibase
                | Token::Obase
                | Token::Scale
                | Token::Last
                | Token::Length
                | Token::Sqrt
                | Token::Read
        )
}

/// Value-producing instructions; a binary operator may follow one.
fn is_leaf_inst(prev: Inst) -> bool {
    matches!(
        prev,
        Inst::Num
            | Inst::Var
            | Inst::ArrayElem
            | Inst::Array
            | Inst::Ibase
            | Inst::Obase
            | Inst::Scale
            | Inst::Last
            | Inst::Length
            | Inst::Sqrt
            | Inst::ScaleFunc
            | Inst::Read
            | Inst::IncPost
            | Inst::DecPost
    )
}

fn is_leaf(prev: Inst, rprn: bool) -> bool {
    rprn || is_leaf_inst(prev)
}

/// Operator token to instruction.
pub(crate) fn op_inst(t: &Token) -> Inst {
    match t {
        Token::Neg => Inst::Neg,
        Token::Power => Inst::Power,
        Token::Multiply => Inst::Multiply,
        Token::Divide => Inst::Divide,
        Token::Modulus => Inst::Modulus,
        Token::Plus => Inst::Plus,
        Token::Minus => Inst::Minus,
        Token::RelEq => Inst::RelEq,
        Token::RelLe => Inst::RelLe,
        Token::RelGe => Inst::RelGe,
        Token::RelNe => Inst::RelNe,
        Token::RelLt => Inst::RelLt,
        Token::RelGt => Inst::RelGt,
        Token::BoolNot => Inst::BoolNot,
        Token::BoolOr => Inst::BoolOr,
        Token::BoolAnd => Inst::BoolAnd,
        Token::AssignPower => Inst::AssignPower,
        Token::AssignMultiply => Inst::AssignMultiply,
        Token::AssignDivide => Inst::AssignDivide,
        Token::AssignModulus => Inst::AssignModulus,
        Token::AssignPlus => Inst::AssignPlus,
        Token::AssignMinus => Inst::AssignMinus,
        Token::Assign => Inst::Assign,
        _ => unreachable!("not an operator token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> (Program, Parser) {
        let mut prog = Program::new();
        let mut p = Parser::new(Dialect::Bc, PosixMode::Ignore);
        p.parse_text(src).unwrap();
        while p.tok != Token::Eof {
            p.parse(&mut prog).unwrap();
        }
        p.flush(&mut prog).unwrap();
        (prog, p)
    }

    fn code(prog: &Program) -> &[u8] {
        &prog.fns[MAIN_FUNC].code
    }

    #[test]
    fn test_simple_expression() {
        let (prog, _) = compile("1 + 2\n");
        let c = code(&prog);
        assert!(c.contains(&(Inst::Plus as u8)));
        assert_eq!(*c.last().unwrap(), Inst::Print as u8);
    }

    #[test]
    fn test_precedence_emission_order() {
        // 1 + 2 * 3 must emit Multiply before Plus.
        let (prog, _) = compile("1 + 2 * 3\n");
        let c = code(&prog);
        let mul = c.iter().position(|&b| b == Inst::Multiply as u8).unwrap();
        let add = c.iter().position(|&b| b == Inst::Plus as u8).unwrap();
        assert!(mul < add);
    }

    #[test]
    fn test_power_right_associative() {
        // 2 ^ 3 ^ 2: the second Power must be emitted first.
        let (prog, _) = compile("2 ^ 3 ^ 2\n");
        let c = code(&prog);
        let powers: Vec<_> = c
            .iter()
            .enumerate()
            .filter(|(_, &b)| b == Inst::Power as u8)
            .collect();
        assert_eq!(powers.len(), 2);
    }

    #[test]
    fn test_assignment_pops_instead_of_printing() {
        let (prog, _) = compile("x = 5\n");
        let c = code(&prog);
        assert_eq!(*c.last().unwrap(), Inst::Pop as u8);
        assert!(c.contains(&(Inst::Assign as u8)));
    }

    #[test]
    fn test_bad_assignment_target() {
        let mut prog = Program::new();
        let mut p = Parser::new(Dialect::Bc, PosixMode::Ignore);
        p.parse_text("1 = 2\n").unwrap();
        assert_eq!(p.parse(&mut prog), Err(Error::BadAssign));
    }

    #[test]
    fn test_unary_vs_binary_minus() {
        let (prog, _) = compile("-3 - 4\n");
        let c = code(&prog);
        assert!(c.contains(&(Inst::Neg as u8)));
        assert!(c.contains(&(Inst::Minus as u8)));
    }

    #[test]
    fn test_if_labels_resolved() {
        let (prog, _) = compile("if (1) 2\n");
        let f = &prog.fns[MAIN_FUNC];
        assert!(f.code.contains(&(Inst::JumpZero as u8)));
        assert!(f.labels.iter().all(|&l| l != UNSET));
    }

    #[test]
    fn test_while_emits_backward_jump() {
        let (prog, _) = compile("while (0) 1\n");
        let f = &prog.fns[MAIN_FUNC];
        assert!(f.code.contains(&(Inst::Jump as u8)));
        assert!(f.code.contains(&(Inst::JumpZero as u8)));
        assert_eq!(f.labels.len(), 2);
        assert!(f.labels.iter().all(|&l| l != UNSET));
    }

    #[test]
    fn test_for_builds_four_labels() {
        let (prog, _) = compile("for (i = 0; i < 3; i = i + 1) i\n");
        let f = &prog.fns[MAIN_FUNC];
        assert_eq!(f.labels.len(), 4);
        assert!(f.labels.iter().all(|&l| l != UNSET));
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let mut prog = Program::new();
        let mut p = Parser::new(Dialect::Bc, PosixMode::Ignore);
        p.parse_text("break\n").unwrap();
        assert_eq!(p.parse(&mut prog), Err(Error::BadToken));
    }

    #[test]
    fn test_function_definition() {
        let (prog, _) = compile("define f(x) { return x * 2 }\n");
        let idx = prog.fn_map["f"];
        let f = &prog.fns[idx];
        assert_eq!(f.params.len(), 1);
        assert!(f.code.contains(&(Inst::Ret as u8)));
        assert_eq!(*f.code.last().unwrap(), Inst::Ret0 as u8);
    }

    #[test]
    fn test_function_with_autos_and_array_param() {
        let (prog, _) = compile("define f(a[], n) { auto i, b[]\n return n\n}\n");
        let f = &prog.fns[prog.fn_map["f"]];
        assert_eq!(f.params.len(), 2);
        assert!(f.params[0].is_array);
        assert!(!f.params[1].is_array);
        assert_eq!(f.autos.len(), 2);
        assert!(f.autos[1].is_array);
    }

    #[test]
    fn test_return_outside_function_rejected() {
        let mut prog = Program::new();
        let mut p = Parser::new(Dialect::Bc, PosixMode::Ignore);
        p.parse_text("return 1\n").unwrap();
        assert_eq!(p.parse(&mut prog), Err(Error::BadToken));
    }

    #[test]
    fn test_pending_if_waits_for_else() {
        let mut prog = Program::new();
        let mut p = Parser::new(Dialect::Bc, PosixMode::Ignore);
        p.parse_text("if (1) 2\n").unwrap();
        while p.tok != Token::Eof {
            p.parse(&mut prog).unwrap();
        }
        // The if is still pending an else; not executable yet.
        assert!(!p.can_exec());
        p.flush(&mut prog).unwrap();
        assert!(p.can_exec());
    }

    #[test]
    fn test_quit_is_parse_time() {
        let mut prog = Program::new();
        let mut p = Parser::new(Dialect::Bc, PosixMode::Ignore);
        p.parse_text("quit\n").unwrap();
        p.parse(&mut prog).unwrap();
        assert_eq!(p.pseudo, Some(Pseudo::Quit));
    }

    #[test]
    fn test_reset_after_error() {
        let mut prog = Program::new();
        let mut p = Parser::new(Dialect::Bc, PosixMode::Ignore);
        p.parse_text("define f() { auto\n").unwrap();
        let mut failed = false;
        while p.tok != Token::Eof {
            if p.parse(&mut prog).is_err() {
                failed = true;
                p.reset(&mut prog);
                break;
            }
        }
        assert!(failed);
        assert!(p.can_exec());
        assert_eq!(p.fidx, MAIN_FUNC);
    }
}
