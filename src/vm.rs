use std::io::{BufRead, Write};

use crate::bytecode::{read_index, read_name, Inst, STREND};
use crate::dc;
use crate::error::{Error, PosixMode};
use crate::interrupt;
use crate::io::Output;
use crate::limits;
use crate::num::Number;
use crate::parser::{Parser, Pseudo, EXPR_NOCALL, EXPR_NOREAD, NEXT_READ};
use crate::program::{Binding, Frame, Program, Value, READ_FUNC};
use crate::token::Token;
use crate::Dialect;

/// Where execution stands between REPL turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Running,
    Suspended,
    Halted,
    Failed,
}

/// What a chunk of source asked the host to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Quit,
}

/// Decoded operands of one instruction.
enum Args {
    None,
    Index(usize),
    Two(usize, usize),
    Name(String),
    Cond(String, Option<String>),
}

/// The execution engine plus the REPL driver around it: owns the program,
/// one persistent parser, and the host's I/O endpoints.
pub struct Vm {
    pub prog: Program,
    pub parser: Parser,
    out: Output,
    input: Box<dyn BufRead>,
    interactive: bool,
    mode: PosixMode,
    state: ExecState,
}

impl Vm {
    pub fn new(
        dialect: Dialect,
        mode: PosixMode,
        input: Box<dyn BufRead>,
        output: Box<dyn Write>,
        interactive: bool,
    ) -> Self {
        Vm {
            prog: Program::new(),
            parser: Parser::new(dialect, mode),
            out: Output::new(output),
            input,
            interactive,
            mode,
            state: ExecState::Suspended,
        }
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    /// Parse and run one chunk of source. Statements execute as soon as
    /// the parser has nothing pending, so output interleaves the way an
    /// interactive user expects.
    pub fn run_text(&mut self, text: &str) -> Result<Outcome, Error> {
        self.parser.parse_text(text)?;
        while self.parser.tok != Token::Eof {
            self.parser.parse(&mut self.prog)?;
            if let Some(ps) = self.parser.pseudo.take() {
                match ps {
                    Pseudo::Quit => return Ok(Outcome::Quit),
                    Pseudo::Limits => self.print_limits()?,
                }
            }
            if self.parser.can_exec() && self.exec()? == ExecState::Halted {
                return Ok(Outcome::Quit);
            }
        }
        self.out.flush()?;
        Ok(Outcome::Continue)
    }

    /// Resolve whatever is still pending (an `if` waiting on an `else`)
    /// once the source is exhausted, and run it.
    pub fn finish(&mut self) -> Result<Outcome, Error> {
        self.parser.flush(&mut self.prog)?;
        if self.parser.can_exec() && self.exec()? == ExecState::Halted {
            return Ok(Outcome::Quit);
        }
        self.out.flush()?;
        Ok(Outcome::Continue)
    }

    /// Print a diagnostic the way the classic tools do.
    pub fn report(&mut self, e: &Error) {
        let _ = self.out.flush();
        eprintln!("\n{} error: {}\n", e.family(), e);
        if matches!(e.family(), "Lex" | "Parse" | "POSIX") {
            eprintln!(":{}\n", self.parser.lexer.line);
        }
    }

    /// Interactive recovery: report, wipe transient parser and VM state,
    /// acknowledge any pending interrupt, and wait for more input.
    fn recover(&mut self, e: &Error) {
        self.report(e);
        self.parser.reset(&mut self.prog);
        interrupt::clear();
        self.state = ExecState::Suspended;
        eprintln!("ready for more input");
    }

    /// Line-at-a-time driver over the input endpoint.
    pub fn repl(&mut self) -> Result<(), Error> {
        loop {
            self.out.flush()?;
            let mut line = String::new();
            let n = self.input.read_line(&mut line).map_err(Error::from)?;
            if n == 0 {
                break;
            }
            match self.run_text(&line) {
                Ok(Outcome::Quit) => return Ok(()),
                Ok(Outcome::Continue) => {}
                Err(e) => {
                    if self.interactive {
                        self.recover(&e);
                    } else {
                        self.state = ExecState::Failed;
                        self.report(&e);
                        return Err(e);
                    }
                }
            }
        }
        match self.finish() {
            Ok(_) => Ok(()),
            Err(e) => {
                self.state = ExecState::Failed;
                self.report(&e);
                Err(e)
            }
        }
    }

    fn print_limits(&mut self) -> Result<(), Error> {
        let table = [
            ("BC_BASE_MAX", limits::BASE_MAX),
            ("BC_DIM_MAX", limits::DIM_MAX),
            ("BC_SCALE_MAX", limits::SCALE_MAX),
            ("BC_STRING_MAX", limits::STRING_MAX),
            ("BC_NAME_MAX", limits::NAME_MAX),
            ("BC_NUM_MAX", limits::NUM_MAX),
        ];
        for (name, val) in table {
            self.out.write_str(&format!("{:<13} = {}\n", name, val))?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn label_off(&self, func: usize, idx: usize) -> Result<usize, Error> {
        self.prog.fns[func]
            .labels
            .get(idx)
            .copied()
            .filter(|&off| off != usize::MAX)
            .ok_or(Error::BadToken)
    }

    /// The interpreter loop. Runs until main runs out of code, something
    /// halts, or an error unwinds; the interrupt flag is polled between
    /// opcodes.
    fn exec(&mut self) -> Result<ExecState, Error> {
        self.state = ExecState::Running;
        loop {
            if interrupt::pending() {
                self.state = ExecState::Failed;
                return Err(Error::Signal);
            }

            let func = self.prog.frame().func;
            let mut ip = self.prog.frame().ip;
            if ip >= self.prog.fns[func].code.len() {
                if self.prog.stack.len() == 1 {
                    break;
                }
                self.prog.pop_frame();
                continue;
            }

            let inst;
            let args;
            {
                let code = &self.prog.fns[func].code;
                inst = Inst::from_u8(code[ip]).ok_or(Error::BadToken)?;
                ip += 1;
                args = match inst {
                    Inst::Num | Inst::Str | Inst::Jump | Inst::JumpZero => {
                        Args::Index(read_index(code, &mut ip))
                    }
                    Inst::Call => {
                        let argc = read_index(code, &mut ip);
                        let fidx = read_index(code, &mut ip);
                        Args::Two(argc, fidx)
                    }
                    Inst::Var
                    | Inst::Array
                    | Inst::ArrayElem
                    | Inst::Load
                    | Inst::PushVar
                    | Inst::PushToVar => Args::Name(read_name(code, &mut ip)),
                    Inst::ExecCond => {
                        let reg = read_name(code, &mut ip);
                        let els = if code[ip] == STREND {
                            ip += 1;
                            None
                        } else {
                            Some(read_name(code, &mut ip))
                        };
                        Args::Cond(reg, els)
                    }
                    _ => Args::None,
                };
            }
            self.prog.frame().ip = ip;
            log::trace!("exec {:?} at {}:{}", inst, func, ip);

            match (inst, args) {
                (Inst::Halt, _) => {
                    self.state = ExecState::Halted;
                    return Ok(ExecState::Halted);
                }

                (Inst::Ret, _) | (Inst::Ret0, _) => {
                    // Resolve before unbinding: the returned expression
                    // may name a local.
                    let n = if inst == Inst::Ret {
                        self.prog.pop_num()?
                    } else {
                        Number::zero()
                    };
                    self.prog.pop_frame();
                    self.prog.push(Value::Num(n));
                }

                (Inst::Jump, Args::Index(idx)) => {
                    let off = self.label_off(func, idx)?;
                    self.prog.frame().ip = off;
                }
                (Inst::JumpZero, Args::Index(idx)) => {
                    let off = self.label_off(func, idx)?;
                    let n = self.prog.pop_num()?;
                    if n.is_zero() {
                        self.prog.frame().ip = off;
                    }
                }

                (Inst::Call, Args::Two(argc, fidx)) => self.call(argc, fidx)?,
                (Inst::Read, _) => self.do_read()?,

                (Inst::Num, Args::Index(idx)) => {
                    let lit = self.prog.consts.get(idx).ok_or(Error::BadToken)?.clone();
                    let n = Number::parse(&lit, self.prog.ibase)?;
                    self.prog.push(Value::Num(n));
                }
                (Inst::Str, Args::Index(idx)) => self.prog.push(Value::Str(idx)),
                (Inst::Var, Args::Name(name)) => self.prog.push(Value::Var(name)),
                (Inst::Array, Args::Name(name)) => self.prog.push(Value::Array(name)),
                (Inst::ArrayElem, Args::Name(name)) => {
                    let iv = self.prog.pop_num()?;
                    let idx = iv.to_u64().map_err(|_| Error::IndexOutOfBounds)?;
                    self.prog.push(Value::ArrayElem(name, idx));
                }

                (Inst::Ibase, _) => self.prog.push(Value::Ibase),
                (Inst::Obase, _) => self.prog.push(Value::Obase),
                (Inst::Scale, _) => self.prog.push(Value::Scale),
                (Inst::Last, _) => self.prog.push(Value::Last),

                (
                    Inst::Power
                    | Inst::Multiply
                    | Inst::Divide
                    | Inst::Modulus
                    | Inst::Plus
                    | Inst::Minus,
                    _,
                ) => {
                    let rhs = self.prog.pop_num()?;
                    let lhs = self.prog.pop_num()?;
                    let scale = self.prog.scale;
                    let r = match inst {
                        Inst::Power => lhs.pow(&rhs, scale)?,
                        Inst::Multiply => lhs.mul(&rhs, scale)?,
                        Inst::Divide => lhs.div(&rhs, scale)?,
                        Inst::Modulus => lhs.rem(&rhs, scale)?,
                        Inst::Plus => lhs.add(&rhs, scale)?,
                        _ => lhs.sub(&rhs, scale)?,
                    };
                    self.prog.push(Value::Num(r));
                }
                (Inst::Neg, _) => {
                    let mut n = self.prog.pop_num()?;
                    n.negate();
                    self.prog.push(Value::Num(n));
                }

                (
                    Inst::RelEq
                    | Inst::RelLe
                    | Inst::RelGe
                    | Inst::RelNe
                    | Inst::RelLt
                    | Inst::RelGt,
                    _,
                ) => {
                    let rhs = self.prog.pop_num()?;
                    let lhs = self.prog.pop_num()?;
                    let c = lhs.cmp(&rhs)?;
                    let t = match inst {
                        Inst::RelEq => c == 0,
                        Inst::RelLe => c <= 0,
                        Inst::RelGe => c >= 0,
                        Inst::RelNe => c != 0,
                        Inst::RelLt => c < 0,
                        _ => c > 0,
                    };
                    self.prog.push(Value::Num(Number::from_u64(t as u64)));
                }

                (Inst::BoolNot, _) => {
                    let n = self.prog.pop_num()?;
                    self.prog
                        .push(Value::Num(Number::from_u64(n.is_zero() as u64)));
                }
                (Inst::BoolOr | Inst::BoolAnd, _) => {
                    let rhs = self.prog.pop_num()?;
                    let lhs = self.prog.pop_num()?;
                    let t = if inst == Inst::BoolOr {
                        !lhs.is_zero() || !rhs.is_zero()
                    } else {
                        !lhs.is_zero() && !rhs.is_zero()
                    };
                    self.prog.push(Value::Num(Number::from_u64(t as u64)));
                }

                (
                    Inst::Assign
                    | Inst::AssignPower
                    | Inst::AssignMultiply
                    | Inst::AssignDivide
                    | Inst::AssignModulus
                    | Inst::AssignPlus
                    | Inst::AssignMinus,
                    _,
                ) => self.assign(inst)?,

                (Inst::IncPre | Inst::DecPre | Inst::IncPost | Inst::DecPost, _) => {
                    let target = self.prog.pop()?;
                    let cur = self.prog.num_of(&target)?;
                    let one = Number::one();
                    let newv = if matches!(inst, Inst::IncPre | Inst::IncPost) {
                        cur.add(&one, 0)?
                    } else {
                        cur.sub(&one, 0)?
                    };
                    self.prog.store(&target, newv.clone())?;
                    let pushed = if matches!(inst, Inst::IncPre | Inst::DecPre) {
                        newv
                    } else {
                        cur
                    };
                    self.prog.push(Value::Num(pushed));
                }

                (Inst::Length, _) => {
                    let v = self.prog.pop()?;
                    let n = match &v {
                        Value::Array(name) => self.prog.array(name).borrow().len() as u64,
                        Value::Str(i) => self.prog.strs[*i].len() as u64,
                        _ => self.prog.num_of(&v)?.len() as u64,
                    };
                    self.prog.push(Value::Num(Number::from_u64(n)));
                }
                (Inst::Sqrt, _) => {
                    let n = self.prog.pop_num()?;
                    let r = n.sqrt(self.prog.scale)?;
                    self.prog.push(Value::Num(r));
                }
                (Inst::ScaleFunc, _) => {
                    let n = self.prog.pop_num()?;
                    self.prog
                        .push(Value::Num(Number::from_u64(n.scale() as u64)));
                }

                (Inst::Print, _) => self.print_pop(true)?,
                (Inst::PrintPop, _) => self.print_pop(false)?,
                (Inst::PrintStr, _) => {
                    let v = self.prog.pop()?;
                    match v {
                        Value::Str(i) => {
                            let s = self.prog.strs[i].clone();
                            self.out.write_str(&s)?;
                        }
                        _ => return Err(Error::WrongType),
                    }
                }
                (Inst::PrintStream, _) => {
                    let v = self.prog.pop()?;
                    match v {
                        Value::Str(i) => {
                            let s = self.prog.strs[i].clone();
                            self.out.write_str(&s)?;
                        }
                        _ => {
                            let n = self.prog.num_of(&v)?;
                            n.stream(&mut self.out)?;
                        }
                    }
                    self.out.flush()?;
                }

                (Inst::Pop, _) => {
                    self.prog.pop()?;
                }
                (Inst::Duplicate, _) => {
                    let v = self.prog.pop()?;
                    self.prog.push(v.clone());
                    self.prog.push(v);
                }
                (Inst::Swap, _) => {
                    let a = self.prog.pop()?;
                    let b = self.prog.pop()?;
                    self.prog.push(a);
                    self.prog.push(b);
                }
                (Inst::ClearStack, _) => self.prog.results.clear(),
                (Inst::StackLen, _) => {
                    let len = self.prog.results.len() as u64;
                    self.prog.push(Value::Num(Number::from_u64(len)));
                }
                (Inst::Asciify, _) => {
                    let mut n = self.prog.pop_num()?;
                    if n.is_neg() {
                        n.negate();
                    }
                    let byte = n.rem(&Number::from_u64(256), 0)?.to_u64()? as u8;
                    self.out.putchar(byte)?;
                    self.out.flush()?;
                }
                (Inst::PrintStack, _) => {
                    let vals = self.prog.results.clone();
                    for v in vals.iter().rev() {
                        match v {
                            Value::Str(i) => {
                                let s = self.prog.strs[*i].clone();
                                self.out.write_str(&s)?;
                                self.out.putchar(b'\n')?;
                            }
                            _ => {
                                let n = self.prog.num_of(v)?;
                                n.print(self.prog.obase, true, &mut self.out)?;
                            }
                        }
                    }
                    self.out.flush()?;
                }

                (Inst::Load, Args::Name(name)) => {
                    let b = self.prog.var_binding(&name).clone();
                    self.prog.push(binding_value(b));
                }
                (Inst::PushVar, Args::Name(name)) => {
                    let b = self.prog.var_pop(&name);
                    self.prog.push(binding_value(b));
                }
                (Inst::PushToVar, Args::Name(name)) => {
                    let v = self.prog.pop()?;
                    let b = match v {
                        Value::Str(i) => Binding::Str(i),
                        other => Binding::Num(self.prog.num_of(&other)?),
                    };
                    self.prog.var_push(&name, b);
                }

                (Inst::Execute, _) => {
                    let v = self.prog.pop()?;
                    match v {
                        Value::Str(i) => self.call_macro(i)?,
                        other => self.prog.push(other),
                    }
                }
                (Inst::ExecCond, Args::Cond(reg, els)) => {
                    let cond = self.prog.pop_num()?;
                    let chosen = if !cond.is_zero() { Some(reg) } else { els };
                    if let Some(r) = chosen {
                        match self.prog.var_binding(&r).clone() {
                            Binding::Str(i) => self.call_macro(i)?,
                            Binding::Num(_) => return Err(Error::WrongType),
                        }
                    }
                }
                (Inst::PopExec, _) => self.prog.pop_frame(),
                (Inst::Nquit, _) => {
                    let n = self.prog.pop_num()?.to_u64()? as usize;
                    if n > self.prog.stack.len() - 1 {
                        self.state = ExecState::Halted;
                        return Ok(ExecState::Halted);
                    }
                    for _ in 0..n {
                        self.prog.pop_frame();
                    }
                }
                (Inst::Quit, _) => {
                    if self.prog.stack.len() - 1 < 2 {
                        self.state = ExecState::Halted;
                        return Ok(ExecState::Halted);
                    }
                    self.prog.pop_frame();
                    self.prog.pop_frame();
                }
                (Inst::Modexp, _) => {
                    let c = self.prog.pop_num()?;
                    let b = self.prog.pop_num()?;
                    let a = self.prog.pop_num()?;
                    let r = a.modexp(&b, &c)?;
                    self.prog.push(Value::Num(r));
                }
                (Inst::Divmod, _) => {
                    let rhs = self.prog.pop_num()?;
                    let lhs = self.prog.pop_num()?;
                    let (q, r) = lhs.divmod(&rhs, self.prog.scale)?;
                    self.prog.push(Value::Num(q));
                    self.prog.push(Value::Num(r));
                }

                _ => return Err(Error::BadToken),
            }
        }
        self.state = ExecState::Suspended;
        Ok(ExecState::Suspended)
    }

    /// `=` copies the right side into the left binding; `op=` reads the
    /// left, applies `op`, and writes back. dc may assign a string to a
    /// plain register.
    fn assign(&mut self, inst: Inst) -> Result<(), Error> {
        let rhs_v = self.prog.pop()?;
        let lhs_v = self.prog.pop()?;

        if inst == Inst::Assign {
            if let (Value::Str(i), Value::Var(name)) = (&rhs_v, &lhs_v) {
                *self.prog.var_binding(name) = Binding::Str(*i);
                self.prog.push(Value::Str(*i));
                return Ok(());
            }
        }

        let rhs = self.prog.num_of(&rhs_v)?;
        let scale = self.prog.scale;
        let val = match inst {
            Inst::Assign => rhs,
            Inst::AssignPower => self.prog.num_of(&lhs_v)?.pow(&rhs, scale)?,
            Inst::AssignMultiply => self.prog.num_of(&lhs_v)?.mul(&rhs, scale)?,
            Inst::AssignDivide => self.prog.num_of(&lhs_v)?.div(&rhs, scale)?,
            Inst::AssignModulus => self.prog.num_of(&lhs_v)?.rem(&rhs, scale)?,
            Inst::AssignPlus => self.prog.num_of(&lhs_v)?.add(&rhs, scale)?,
            _ => self.prog.num_of(&lhs_v)?.sub(&rhs, scale)?,
        };
        self.prog.store(&lhs_v, val.clone())?;
        self.prog.push(Value::Num(val));
        Ok(())
    }

    /// Pop the top value and print it: numbers in the current obase
    /// (updating `last`), strings verbatim, bc print-statement strings
    /// with escapes.
    fn print_pop(&mut self, newline: bool) -> Result<(), Error> {
        let v = self.prog.pop()?;
        match v {
            Value::Str(i) => {
                let s = self.prog.strs[i].clone();
                if self.parser.dialect() == Dialect::Bc {
                    self.write_escaped(&s)?;
                } else {
                    self.out.write_str(&s)?;
                }
                if newline {
                    self.out.putchar(b'\n')?;
                }
            }
            _ => {
                let n = self.prog.num_of(&v)?;
                n.print(self.prog.obase, newline, &mut self.out)?;
                self.prog.last = n;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    fn write_escaped(&mut self, s: &str) -> Result<(), Error> {
        let b = s.as_bytes();
        let mut i = 0;
        while i < b.len() {
            if b[i] == b'\\' && i + 1 < b.len() {
                let c = match b[i + 1] {
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b'e' => 0x1B,
                    b'f' => 0x0C,
                    b'n' => b'\n',
                    b'q' => b'"',
                    b'r' => b'\r',
                    b't' => b'\t',
                    b'\\' => b'\\',
                    other => {
                        self.out.putchar(b'\\')?;
                        other
                    }
                };
                self.out.putchar(c)?;
                i += 2;
            } else {
                self.out.putchar(b[i])?;
                i += 1;
            }
        }
        Ok(())
    }

    /// Bind arguments right-to-left (scalars by value, arrays by
    /// reference), install zeroed autos, and enter the function.
    fn call(&mut self, argc: usize, fidx: usize) -> Result<(), Error> {
        if self.prog.fns[fidx].code.is_empty() {
            return Err(Error::UndefinedFunction);
        }
        let params = self.prog.fns[fidx].params.clone();
        let autos = self.prog.fns[fidx].autos.clone();
        if argc != params.len() {
            return Err(Error::MismatchedParams);
        }

        let mut frame = Frame::new(fidx);
        for p in params.iter().rev() {
            let v = self.prog.pop()?;
            if p.is_array {
                match v {
                    Value::Array(name) => {
                        let arr = self.prog.array(&name);
                        self.prog.arr_push(&p.name, arr);
                        frame.arrs.push(p.name.clone());
                    }
                    _ => return Err(Error::WrongType),
                }
            } else {
                let n = self.prog.num_of(&v)?;
                self.prog.var_push(&p.name, Binding::Num(n));
                frame.vars.push(p.name.clone());
            }
        }
        for a in &autos {
            if a.is_array {
                self.prog.arr_push_new(&a.name);
                frame.arrs.push(a.name.clone());
            } else {
                self.prog.var_push(&a.name, Binding::Num(Number::zero()));
                frame.vars.push(a.name.clone());
            }
        }
        self.prog.stack.push(frame);
        Ok(())
    }

    /// Execute the function behind string `idx`, compiling it on first
    /// use.
    fn call_macro(&mut self, idx: usize) -> Result<(), Error> {
        let name = dc::macro_name(idx);
        let fidx = *self
            .prog
            .fn_map
            .get(&name)
            .ok_or(Error::UndefinedFunction)?;
        if self.prog.fns[fidx].code.is_empty() {
            let text = self.prog.strs[idx].clone();
            if let Err(e) = dc::compile_macro(&mut self.prog, fidx, &text, self.mode) {
                self.prog.fns[fidx].reset();
                return Err(e);
            }
        }
        self.prog.stack.push(Frame::new(fidx));
        Ok(())
    }

    /// `read()` / `?`: one line from the host, compiled in the invoking
    /// dialect into the reserved read function and entered like a call.
    fn do_read(&mut self) -> Result<(), Error> {
        if self.prog.stack.iter().any(|f| f.func == READ_FUNC) {
            return Err(Error::RecursiveRead);
        }

        self.out.flush()?;
        let mut line = String::new();
        let n = self.input.read_line(&mut line).map_err(Error::from)?;
        if n == 0 {
            return Err(Error::BadRead);
        }

        self.prog.fns[READ_FUNC].reset();
        let dialect = self.parser.dialect();
        let mut rp = Parser::new(dialect, self.mode);
        rp.fidx = READ_FUNC;

        let compiled = (|| -> Result<(), Error> {
            rp.parse_text(&line)?;
            match dialect {
                Dialect::Bc => {
                    rp.parse_expr(&mut self.prog, EXPR_NOREAD, NEXT_READ)?;
                    self.prog.fns[READ_FUNC].push_inst(Inst::Ret);
                    Ok(())
                }
                Dialect::Dc => rp.dc_expr(&mut self.prog, EXPR_NOREAD | EXPR_NOCALL),
            }
        })();
        compiled.map_err(|e| match e {
            Error::Signal | Error::RecursiveRead => e,
            _ => Error::BadRead,
        })?;

        self.prog.stack.push(Frame::new(READ_FUNC));
        Ok(())
    }
}

fn binding_value(b: Binding) -> Value {
    match b {
        Binding::Num(n) => Value::Num(n),
        Binding::Str(i) => Value::Str(i),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Capture;
    use std::io::Cursor;

    fn vm_with(dialect: Dialect, input: &str) -> (Vm, Capture) {
        let cap = Capture::new();
        let vm = Vm::new(
            dialect,
            PosixMode::Ignore,
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            Box::new(cap.clone()),
            false,
        );
        (vm, cap)
    }

    fn run_bc(src: &str) -> String {
        let (mut vm, cap) = vm_with(Dialect::Bc, "");
        vm.run_text(src).unwrap();
        vm.finish().unwrap();
        cap.contents()
    }

    fn run_dc(src: &str) -> String {
        let (mut vm, cap) = vm_with(Dialect::Dc, "");
        vm.run_text(src).unwrap();
        vm.finish().unwrap();
        cap.contents()
    }

    #[test]
    fn test_bc_arithmetic_prints() {
        assert_eq!(run_bc("1 + 2\n"), "3\n");
        assert_eq!(run_bc("2 + 3 * 4\n"), "14\n");
        assert_eq!(run_bc("(2 + 3) * 4\n"), "20\n");
        assert_eq!(run_bc("2 ^ 3 ^ 2\n"), "512\n");
        assert_eq!(run_bc("10 % 3\n"), "1\n");
    }

    #[test]
    fn test_bc_assignment_silent() {
        assert_eq!(run_bc("x = 5\nx\n"), "5\n");
        assert_eq!(run_bc("x = 5\nx += 2\nx\n"), "7\n");
    }

    #[test]
    fn test_bc_scale_division() {
        assert_eq!(run_bc("scale = 20\n1/3\n"), ".33333333333333333333\n");
    }

    #[test]
    fn test_bc_last_register() {
        assert_eq!(run_bc("5\nlast + 1\n"), "5\n6\n");
        assert_eq!(run_bc("7\n. + 1\n"), "7\n8\n");
    }

    #[test]
    fn test_bc_if_else() {
        assert_eq!(run_bc("if (1 < 2) 3\nelse 4\n"), "3\n");
        assert_eq!(run_bc("if (2 < 1) 3\nelse 4\n"), "4\n");
        assert_eq!(run_bc("if (2 < 1) 3\n"), "");
        assert_eq!(run_bc("if (1 < 2) { 3 } else { 4 }\n"), "3\n");
    }

    #[test]
    fn test_bc_while_loop() {
        assert_eq!(run_bc("i = 0\nwhile (i < 3) i += 1\ni\n"), "3\n");
    }

    #[test]
    fn test_bc_for_loop_with_break_continue() {
        assert_eq!(
            run_bc("for (i = 0; i < 5; i += 1) { if (i == 1) continue\n if (i == 3) break\n i }\n"),
            "0\n2\n"
        );
    }

    #[test]
    fn test_bc_function_and_recursion() {
        let src = "define f(n) { if (n < 2) return n\n return f(n-1) + f(n-2) }\nf(10)\n";
        assert_eq!(run_bc(src), "55\n");
    }

    #[test]
    fn test_bc_auto_shadowing() {
        let src = "x = 9\ndefine f() { auto x\n x = 1\n return x }\nf()\nx\n";
        assert_eq!(run_bc(src), "1\n9\n");
    }

    #[test]
    fn test_bc_array_pass_by_reference() {
        let src = "define f(a[]) { a[0] = 7\n return 0 }\nb[0] = 1\nt = f(b[])\nb[0]\n";
        assert_eq!(run_bc(src), "7\n");
    }

    #[test]
    fn test_bc_base_conversion() {
        assert_eq!(run_bc("obase = 16\n255\n"), "FF\n");
        assert_eq!(run_bc("ibase = 16\nFF\n"), "255\n");
    }

    #[test]
    fn test_bc_print_statement() {
        assert_eq!(run_bc("print 1, \" and \", 2, \"\\n\"\n"), "1 and 2\n");
    }

    #[test]
    fn test_bc_halt_stops() {
        let (mut vm, cap) = vm_with(Dialect::Bc, "");
        assert_eq!(vm.run_text("1\nhalt\n2\n").unwrap(), Outcome::Quit);
        assert_eq!(cap.contents(), "1\n");
        assert_eq!(vm.state(), ExecState::Halted);
    }

    #[test]
    fn test_bc_quit_is_immediate() {
        let (mut vm, cap) = vm_with(Dialect::Bc, "");
        assert_eq!(vm.run_text("if (0) { quit }\n").unwrap(), Outcome::Quit);
        assert_eq!(cap.contents(), "");
    }

    #[test]
    fn test_bc_divide_by_zero_reports() {
        let (mut vm, _cap) = vm_with(Dialect::Bc, "");
        assert_eq!(vm.run_text("1/0\n"), Err(Error::DivideByZero));
    }

    #[test]
    fn test_bc_read_line() {
        let (mut vm, cap) = vm_with(Dialect::Bc, "6\n");
        vm.run_text("read() + 1\n").unwrap();
        assert_eq!(cap.contents(), "7\n");
    }

    #[test]
    fn test_bc_ibase_range_enforced() {
        let (mut vm, _) = vm_with(Dialect::Bc, "");
        assert_eq!(vm.run_text("ibase = 17\n"), Err(Error::BadIbase));
    }

    #[test]
    fn test_dc_basic_stack() {
        assert_eq!(run_dc("2 3 + p"), "5\n");
        assert_eq!(run_dc("10 3 - p"), "7\n");
        assert_eq!(run_dc("2 3 4 f"), "4\n3\n2\n");
        assert_eq!(run_dc("1 2 r f"), "1\n2\n");
        assert_eq!(run_dc("5 d + p"), "10\n");
    }

    #[test]
    fn test_dc_registers() {
        assert_eq!(run_dc("5 sa la la + p"), "10\n");
        assert_eq!(run_dc("1 Sa 2 Sa La La + p"), "3\n");
    }

    #[test]
    fn test_dc_macro_execute() {
        assert_eq!(run_dc("[2 3 +] x p"), "5\n");
        assert_eq!(run_dc("[1p]sa lax"), "1\n");
    }

    #[test]
    fn test_dc_conditional_execute() {
        assert_eq!(run_dc("[1p]sa 2 3 >a"), "1\n");
        assert_eq!(run_dc("[1p]sa 3 2 >a"), "");
        assert_eq!(run_dc("[1p]sa [2p]sb 3 2 >a eb"), "2\n");
        assert_eq!(run_dc("[1p]sa 3 2 !>a"), "1\n");
    }

    #[test]
    fn test_dc_stack_len_and_clear() {
        assert_eq!(run_dc("1 2 3 z p"), "3\n");
        assert_eq!(run_dc("1 2 c z p"), "0\n");
    }

    #[test]
    fn test_dc_divmod_and_modexp() {
        assert_eq!(run_dc("17 5 ~ f"), "2\n3\n");
        assert_eq!(run_dc("4 13 497 | p"), "445\n");
    }

    #[test]
    fn test_dc_arrays() {
        assert_eq!(run_dc("7 0 :a 0 ;a p"), "7\n");
    }

    #[test]
    fn test_dc_negative_literal() {
        assert_eq!(run_dc("_5 2 + p"), "-3\n");
    }

    #[test]
    fn test_dc_bases() {
        assert_eq!(run_dc("16 o 255 p"), "FF\n");
        assert_eq!(run_dc("2 o 5 p"), "101\n");
    }
}
