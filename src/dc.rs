use crate::bytecode::Inst;
use crate::error::{Error, PosixMode};
use crate::interrupt;
use crate::parser::{op_inst, Parser, EXPR_NOCALL, EXPR_NOREAD};
use crate::program::Program;
use crate::token::Token;
use crate::Dialect;

/// Function-table name for the anonymous function holding string `idx`.
/// Users cannot type parentheses into a name, so these never collide.
pub fn macro_name(idx: usize) -> String {
    format!("(str{})", idx)
}

/// Compile the body of a `[...]` string on its first execution. The code
/// ends in `PopExec` so falling off the end returns from the macro frame.
pub fn compile_macro(
    prog: &mut Program,
    fidx: usize,
    text: &str,
    mode: PosixMode,
) -> Result<(), Error> {
    let mut p = Parser::new(Dialect::Dc, mode);
    p.fidx = fidx;
    p.parse_text(text)?;
    p.dc_expr(prog, EXPR_NOCALL)
}

/// Tokens that translate to exactly one instruction.
fn direct_inst(t: &Token) -> Option<Inst> {
    let inst = match t {
        Token::Plus => Inst::Plus,
        Token::Minus => Inst::Minus,
        Token::Multiply => Inst::Multiply,
        Token::Divide => Inst::Divide,
        Token::Modulus => Inst::Modulus,
        Token::Power => Inst::Power,
        Token::BoolNot => Inst::BoolNot,
        Token::Modexp => Inst::Modexp,
        Token::Divmod => Inst::Divmod,
        Token::Ibase => Inst::Ibase,
        Token::Obase => Inst::Obase,
        Token::Scale => Inst::Scale,
        Token::Length => Inst::Length,
        Token::ScaleFactor => Inst::ScaleFunc,
        Token::Sqrt => Inst::Sqrt,
        Token::PrintPop => Inst::PrintPop,
        Token::PrintStream => Inst::PrintStream,
        Token::PrintStack => Inst::PrintStack,
        Token::Quit => Inst::Quit,
        Token::Nquit => Inst::Nquit,
        Token::Pop => Inst::Pop,
        Token::ClearStack => Inst::ClearStack,
        Token::Duplicate => Inst::Duplicate,
        Token::Swap => Inst::Swap,
        Token::Execute => Inst::Execute,
        Token::StackLevel => Inst::StackLen,
        Token::Asciify => Inst::Asciify,
        _ => return None,
    };
    Some(inst)
}

impl Parser {
    /// The DC parser: almost a straight token-to-instruction translation,
    /// consuming the whole current chunk. With `EXPR_NOCALL` the chunk is
    /// a macro body and gets a trailing `PopExec`; with `EXPR_NOREAD` it
    /// is a `?` line and `?` itself is rejected.
    pub(crate) fn dc_expr(&mut self, prog: &mut Program, eflags: u8) -> Result<(), Error> {
        while self.tok != Token::Eof {
            if interrupt::pending() {
                return Err(Error::Signal);
            }
            if let Some(inst) = direct_inst(&self.tok) {
                self.push_inst(prog, inst);
                self.next()?;
            } else {
                self.dc_token(prog, eflags)?;
            }
        }
        if eflags & EXPR_NOCALL != 0 {
            self.push_inst(prog, Inst::PopExec);
        }
        Ok(())
    }

    fn dc_register(&mut self, prog: &mut Program) -> Result<(), Error> {
        self.next()?;
        let name = match &self.tok {
            Token::Ident(n) => n.clone(),
            _ => return Err(Error::BadToken),
        };
        self.push_name(prog, &name);
        Ok(())
    }

    /// Emit `inst`, an optional register operand, and for store forms the
    /// `SWAP; ASSIGN; POP` tail that writes the popped value through it.
    fn dc_mem(
        &mut self,
        prog: &mut Program,
        inst: Inst,
        name: bool,
        store: bool,
    ) -> Result<(), Error> {
        self.push_inst(prog, inst);
        if name {
            self.dc_register(prog)?;
        }
        if store {
            self.push_inst(prog, Inst::Swap);
            self.push_inst(prog, Inst::Assign);
            self.push_inst(prog, Inst::Pop);
        }
        self.next()
    }

    /// `<r`, `>r`, `=r` and negations, with an optional `er` else branch.
    fn dc_cond(&mut self, prog: &mut Program, rel: Inst) -> Result<(), Error> {
        self.push_inst(prog, rel);
        self.push_inst(prog, Inst::ExecCond);

        self.dc_register(prog)?;
        self.next()?;

        if self.tok == Token::ElseReg {
            self.dc_register(prog)?;
            self.next()?;
        } else {
            self.push_strend(prog);
        }
        Ok(())
    }

    fn dc_string(&mut self, prog: &mut Program) -> Result<(), Error> {
        let s = match &self.tok {
            Token::String(s) => s.clone(),
            _ => return Err(Error::BadToken),
        };
        let idx = prog.add_str(s);
        self.push_inst(prog, Inst::Str);
        self.push_index(prog, idx);
        // Reserve the function slot now; its body compiles lazily on the
        // first execute.
        prog.add_func(&macro_name(idx));
        self.next()
    }

    fn dc_token(&mut self, prog: &mut Program, eflags: u8) -> Result<(), Error> {
        match self.tok.clone() {
            t if t.is_rel_op() => self.dc_cond(prog, op_inst(&t)),

            Token::Semicolon => self.dc_mem(prog, Inst::ArrayElem, true, false),
            Token::Colon => self.dc_mem(prog, Inst::ArrayElem, true, true),

            Token::String(_) => self.dc_string(prog),

            Token::Neg => {
                self.next()?;
                let lit = match &self.tok {
                    Token::Number(n) => n.clone(),
                    _ => return Err(Error::BadToken),
                };
                let idx = prog.add_const(lit);
                self.push_inst(prog, Inst::Num);
                self.push_index(prog, idx);
                self.push_inst(prog, Inst::Neg);
                self.next()
            }
            Token::Number(lit) => {
                let idx = prog.add_const(lit);
                self.push_inst(prog, Inst::Num);
                self.push_index(prog, idx);
                self.next()
            }

            Token::Read => {
                if eflags & EXPR_NOREAD != 0 {
                    return Err(Error::RecursiveRead);
                }
                self.push_inst(prog, Inst::Read);
                self.next()
            }

            // `p` keeps its operand on the stack; spell that as dup+print.
            Token::Print => {
                self.push_inst(prog, Inst::Duplicate);
                self.push_inst(prog, Inst::Print);
                self.next()
            }

            Token::Assign => self.dc_mem(prog, Inst::Var, true, true),
            Token::StorePush => self.dc_mem(prog, Inst::PushToVar, true, false),
            Token::Load => self.dc_mem(prog, Inst::Load, true, false),
            Token::LoadPop => self.dc_mem(prog, Inst::PushVar, true, false),

            Token::StoreIbase => self.dc_mem(prog, Inst::Ibase, false, true),
            Token::StoreObase => self.dc_mem(prog, Inst::Obase, false, true),
            Token::StoreScale => self.dc_mem(prog, Inst::Scale, false, true),

            _ => Err(Error::BadToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::MAIN_FUNC;

    fn compile(src: &str) -> Program {
        let mut prog = Program::new();
        let mut p = Parser::new(Dialect::Dc, PosixMode::Ignore);
        p.parse_text(src).unwrap();
        p.parse(&mut prog).unwrap();
        prog
    }

    fn code(prog: &Program) -> &[u8] {
        &prog.fns[MAIN_FUNC].code
    }

    #[test]
    fn test_arith_sequence() {
        let prog = compile("2 3 + p");
        let c = code(&prog);
        assert!(c.contains(&(Inst::Plus as u8)));
        assert!(c.contains(&(Inst::Duplicate as u8)));
        assert!(c.contains(&(Inst::Print as u8)));
    }

    #[test]
    fn test_store_emits_assign_tail() {
        let prog = compile("5 sa");
        let c = code(&prog);
        let var = c.iter().position(|&b| b == Inst::Var as u8).unwrap();
        assert_eq!(c[var + 1], b'a');
        assert!(c.contains(&(Inst::Swap as u8)));
        assert!(c.contains(&(Inst::Assign as u8)));
        assert_eq!(*c.last().unwrap(), Inst::Pop as u8);
    }

    #[test]
    fn test_string_registers_macro_function() {
        let prog = compile("[1p]sa");
        assert!(prog.fn_map.contains_key(&macro_name(0)));
        assert_eq!(prog.strs[0], "1p");
    }

    #[test]
    fn test_conditional_with_else() {
        let prog = compile("[1p]sa [2p]sb 2 3 >a eb");
        let c = code(&prog);
        assert!(c.contains(&(Inst::RelLt as u8)));
        assert!(c.contains(&(Inst::ExecCond as u8)));
    }

    #[test]
    fn test_conditional_without_else_has_strend() {
        let prog = compile("2 3 >a");
        let c = code(&prog);
        let pos = c.iter().position(|&b| b == Inst::ExecCond as u8).unwrap();
        // name 'a', STREND, then the empty else marker.
        assert_eq!(c[pos + 1], b'a');
        assert_eq!(c[pos + 2], crate::bytecode::STREND);
        assert_eq!(c[pos + 3], crate::bytecode::STREND);
    }

    #[test]
    fn test_negative_literal() {
        let prog = compile("_5");
        let c = code(&prog);
        assert!(c.contains(&(Inst::Num as u8)));
        assert!(c.contains(&(Inst::Neg as u8)));
    }

    #[test]
    fn test_macro_body_ends_in_pop_exec() {
        let mut prog = Program::new();
        let fidx = prog.add_func(&macro_name(0));
        compile_macro(&mut prog, fidx, "2 3 +", PosixMode::Ignore).unwrap();
        assert_eq!(*prog.fns[fidx].code.last().unwrap(), Inst::PopExec as u8);
    }
}
