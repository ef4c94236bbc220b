use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::bytecode::Func;
use crate::error::Error;
use crate::limits;
use crate::num::Number;

/// Function index of the top-level body.
pub const MAIN_FUNC: usize = 0;
/// Function index reused by every `read()` call.
pub const READ_FUNC: usize = 1;

pub const MAIN_NAME: &str = "(main)";
pub const READ_NAME: &str = "(read)";

/// Arrays are shared by reference when passed as `f(a[])` parameters, so
/// they live behind a reference-counted cell.
pub type ArrayRef = Rc<RefCell<Vec<Number>>>;

/// A tagged entry on the results stack. Named variants resolve to the
/// number currently bound to the name when a value is demanded.
#[derive(Debug, Clone)]
pub enum Value {
    Num(Number),
    Str(usize),
    Var(String),
    ArrayElem(String, u64),
    Array(String),
    Scale,
    Ibase,
    Obase,
    Last,
}

/// What a variable (dc: register level) holds. bc only ever binds
/// numbers; dc's `s`/`S` may store strings, which is how macros live in
/// registers.
#[derive(Debug, Clone)]
pub enum Binding {
    Num(Number),
    Str(usize),
}

impl Binding {
    pub fn num(&self) -> Result<&Number, Error> {
        match self {
            Binding::Num(n) => Ok(n),
            Binding::Str(_) => Err(Error::WrongType),
        }
    }
}

/// One activation record: the function being executed, the instruction
/// pointer, and the names this call shadowed, to be restored on return.
#[derive(Debug)]
pub struct Frame {
    pub func: usize,
    pub ip: usize,
    pub vars: Vec<String>,
    pub arrs: Vec<String>,
}

impl Frame {
    pub fn new(func: usize) -> Self {
        Frame {
            func,
            ip: 0,
            vars: Vec::new(),
            arrs: Vec::new(),
        }
    }
}

/// The single owner of all program state: functions, bindings, pools, the
/// special registers, and both runtime stacks. The parser and the VM
/// borrow it mutably, never each other.
pub struct Program {
    pub fns: Vec<Func>,
    pub fn_map: BTreeMap<String, usize>,

    vars: BTreeMap<String, Vec<Binding>>,
    arrs: BTreeMap<String, Vec<ArrayRef>>,

    pub consts: Vec<String>,
    pub strs: Vec<String>,

    pub scale: usize,
    pub ibase: u64,
    pub obase: u64,
    pub last: Number,

    pub results: Vec<Value>,
    pub stack: Vec<Frame>,
}

impl Default for Program {
    fn default() -> Self {
        Program::new()
    }
}

impl Program {
    pub fn new() -> Self {
        let mut p = Program {
            fns: Vec::new(),
            fn_map: BTreeMap::new(),
            vars: BTreeMap::new(),
            arrs: BTreeMap::new(),
            consts: Vec::new(),
            strs: Vec::new(),
            scale: 0,
            ibase: 10,
            obase: 10,
            last: Number::zero(),
            results: Vec::new(),
            stack: Vec::new(),
        };
        let main = p.add_func(MAIN_NAME);
        let read = p.add_func(READ_NAME);
        debug_assert_eq!(main, MAIN_FUNC);
        debug_assert_eq!(read, READ_FUNC);
        p.stack.push(Frame::new(MAIN_FUNC));
        p
    }

    /// Register a function name, reusing (and clearing) the old body when
    /// the name is already taken. This is what makes bc redefinition work.
    pub fn add_func(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.fn_map.get(name) {
            self.fns[idx].reset();
            return idx;
        }
        let idx = self.fns.len();
        self.fns.push(Func::new());
        self.fn_map.insert(name.to_string(), idx);
        log::debug!("registered function {:?} at index {}", name, idx);
        idx
    }

    pub fn add_const(&mut self, lit: String) -> usize {
        self.consts.push(lit);
        self.consts.len() - 1
    }

    pub fn add_str(&mut self, s: String) -> usize {
        self.strs.push(s);
        self.strs.len() - 1
    }

    fn var_stack(&mut self, name: &str) -> &mut Vec<Binding> {
        let st = self.vars.entry(name.to_string()).or_default();
        if st.is_empty() {
            st.push(Binding::Num(Number::zero()));
        }
        st
    }

    /// Current binding, created as zero on first touch.
    pub fn var_binding(&mut self, name: &str) -> &mut Binding {
        self.var_stack(name).last_mut().expect("var stack nonempty")
    }

    /// Current binding as a number; strings have no number form.
    pub fn var_top(&mut self, name: &str) -> Result<&mut Number, Error> {
        match self.var_binding(name) {
            Binding::Num(n) => Ok(n),
            Binding::Str(_) => Err(Error::WrongType),
        }
    }

    /// Shadow a binding for a call (or a dc `S`).
    pub fn var_push(&mut self, name: &str, val: Binding) {
        // Touch first so the base binding exists to restore to.
        self.var_stack(name).push(val);
    }

    /// dc `L`: move the top binding out, leaving whatever is beneath.
    pub fn var_pop(&mut self, name: &str) -> Binding {
        self.var_stack(name).pop().expect("var stack nonempty")
    }

    fn arr_stack(&mut self, name: &str) -> &mut Vec<ArrayRef> {
        let st = self.arrs.entry(name.to_string()).or_default();
        if st.is_empty() {
            st.push(Rc::new(RefCell::new(Vec::new())));
        }
        st
    }

    /// Current binding of an array, created empty on first touch.
    pub fn array(&mut self, name: &str) -> ArrayRef {
        self.arr_stack(name).last().expect("arr stack nonempty").clone()
    }

    /// Shadow an array binding for a call.
    pub fn arr_push(&mut self, name: &str, arr: ArrayRef) {
        self.arr_stack(name).push(arr);
    }

    /// Shadow with a fresh empty array (array autos).
    pub fn arr_push_new(&mut self, name: &str) {
        self.arr_stack(name).push(Rc::new(RefCell::new(Vec::new())));
    }

    pub fn arr_pop(&mut self, name: &str) {
        self.arr_stack(name).pop();
    }

    pub fn elem_get(&mut self, name: &str, idx: u64) -> Result<Number, Error> {
        if idx >= limits::DIM_MAX {
            return Err(Error::ArrayLen);
        }
        let arr = self.array(name);
        let mut a = arr.borrow_mut();
        let i = idx as usize;
        if i >= a.len() {
            a.resize(i + 1, Number::zero());
        }
        Ok(a[i].clone())
    }

    pub fn elem_set(&mut self, name: &str, idx: u64, val: Number) -> Result<(), Error> {
        if idx >= limits::DIM_MAX {
            return Err(Error::ArrayLen);
        }
        let arr = self.array(name);
        let mut a = arr.borrow_mut();
        let i = idx as usize;
        if i >= a.len() {
            a.resize(i + 1, Number::zero());
        }
        a[i] = val;
        Ok(())
    }

    /// Resolve a stack value to a number, creating zero bindings on first
    /// read. Strings and whole arrays have no number form.
    pub fn num_of(&mut self, v: &Value) -> Result<Number, Error> {
        match v {
            Value::Num(n) => Ok(n.clone()),
            Value::Var(name) => Ok(self.var_top(name)?.clone()),
            Value::ArrayElem(name, idx) => self.elem_get(name, *idx),
            Value::Scale => Ok(Number::from_u64(self.scale as u64)),
            Value::Ibase => Ok(Number::from_u64(self.ibase)),
            Value::Obase => Ok(Number::from_u64(self.obase)),
            Value::Last => Ok(self.last.clone()),
            Value::Str(_) | Value::Array(_) => Err(Error::WrongType),
        }
    }

    /// Write through an l-value. Range checks guard the registers; `last`
    /// is only ever written by the VM's print path.
    pub fn store(&mut self, target: &Value, val: Number) -> Result<(), Error> {
        match target {
            Value::Var(name) => {
                *self.var_binding(name) = Binding::Num(val);
                Ok(())
            }
            Value::ArrayElem(name, idx) => self.elem_set(name, *idx, val),
            Value::Scale => {
                let s = val.to_u64().map_err(|_| Error::BadScale)?;
                if s > limits::SCALE_MAX {
                    return Err(Error::BadScale);
                }
                self.scale = s as usize;
                Ok(())
            }
            Value::Ibase => {
                let b = val.to_u64().map_err(|_| Error::BadIbase)?;
                if !(2..=16).contains(&b) {
                    return Err(Error::BadIbase);
                }
                self.ibase = b;
                Ok(())
            }
            Value::Obase => {
                let b = val.to_u64().map_err(|_| Error::BadObase)?;
                if !(2..=limits::BASE_MAX).contains(&b) {
                    return Err(Error::BadObase);
                }
                self.obase = b;
                Ok(())
            }
            Value::Last => Err(Error::BadAssign),
            Value::Num(_) | Value::Str(_) | Value::Array(_) => Err(Error::BadAssign),
        }
    }

    pub fn push(&mut self, v: Value) {
        self.results.push(v);
    }

    pub fn pop(&mut self) -> Result<Value, Error> {
        self.results.pop().ok_or(Error::StackUnderflow)
    }

    /// Pop and resolve in one step.
    pub fn pop_num(&mut self) -> Result<Number, Error> {
        let v = self.pop()?;
        self.num_of(&v)
    }

    pub fn frame(&mut self) -> &mut Frame {
        self.stack.last_mut().expect("call stack nonempty")
    }

    /// Pop a call frame, restoring every binding it shadowed.
    pub fn pop_frame(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        let fr = self.stack.pop().expect("checked nonempty");
        for name in fr.vars.iter().rev() {
            if let Some(st) = self.vars.get_mut(name) {
                st.pop();
            }
        }
        for name in fr.arrs.iter().rev() {
            if let Some(st) = self.arrs.get_mut(name) {
                st.pop();
            }
        }
    }

    /// Error recovery: drop every frame above main, clear the results
    /// stack, and drain main's unexecuted code.
    pub fn reset(&mut self) {
        while self.stack.len() > 1 {
            self.pop_frame();
        }
        self.results.clear();
        let end = self.fns[MAIN_FUNC].code.len();
        self.frame().ip = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_functions() {
        let p = Program::new();
        assert_eq!(p.fn_map[MAIN_NAME], MAIN_FUNC);
        assert_eq!(p.fn_map[READ_NAME], READ_FUNC);
        assert_eq!(p.stack.len(), 1);
    }

    #[test]
    fn test_add_func_idempotent_resets_body() {
        let mut p = Program::new();
        let f = p.add_func("f");
        p.fns[f].code.push(0x42);
        assert_eq!(p.add_func("f"), f);
        assert!(p.fns[f].code.is_empty());
    }

    #[test]
    fn test_vars_lazily_zero() {
        let mut p = Program::new();
        assert!(p.var_top("x").unwrap().is_zero());
        *p.var_top("x").unwrap() = Number::from_u64(7);
        assert_eq!(p.var_top("x").unwrap().to_u64().unwrap(), 7);
    }

    #[test]
    fn test_array_grows_with_zeros() {
        let mut p = Program::new();
        p.elem_set("a", 4, Number::from_u64(9)).unwrap();
        assert!(p.elem_get("a", 2).unwrap().is_zero());
        assert_eq!(p.elem_get("a", 4).unwrap().to_u64().unwrap(), 9);
        assert_eq!(p.array("a").borrow().len(), 5);
    }

    #[test]
    fn test_array_binding_aliases() {
        let mut p = Program::new();
        p.elem_set("a", 0, Number::from_u64(1)).unwrap();
        let shared = p.array("a");
        p.arr_push("x", shared);
        p.elem_set("x", 0, Number::from_u64(5)).unwrap();
        assert_eq!(p.elem_get("a", 0).unwrap().to_u64().unwrap(), 5);
        p.arr_pop("x");
        assert!(p.elem_get("x", 0).unwrap().is_zero());
    }

    #[test]
    fn test_store_register_ranges() {
        let mut p = Program::new();
        assert_eq!(
            p.store(&Value::Ibase, Number::from_u64(17)),
            Err(Error::BadIbase)
        );
        assert_eq!(
            p.store(&Value::Obase, Number::from_u64(1)),
            Err(Error::BadObase)
        );
        p.store(&Value::Ibase, Number::from_u64(16)).unwrap();
        assert_eq!(p.ibase, 16);
        p.store(&Value::Scale, Number::from_u64(20)).unwrap();
        assert_eq!(p.scale, 20);
        assert_eq!(
            p.store(&Value::Last, Number::from_u64(1)),
            Err(Error::BadAssign)
        );
    }

    #[test]
    fn test_shadowing_restores() {
        let mut p = Program::new();
        *p.var_top("n").unwrap() = Number::from_u64(3);
        let mut fr = Frame::new(MAIN_FUNC);
        p.var_push("n", Binding::Num(Number::from_u64(10)));
        fr.vars.push("n".to_string());
        p.stack.push(fr);
        assert_eq!(p.var_top("n").unwrap().to_u64().unwrap(), 10);
        p.pop_frame();
        assert_eq!(p.var_top("n").unwrap().to_u64().unwrap(), 3);
    }

    #[test]
    fn test_string_binding_has_no_number_form() {
        let mut p = Program::new();
        let idx = p.add_str("1p".to_string());
        *p.var_binding("a") = Binding::Str(idx);
        assert_eq!(p.num_of(&Value::Var("a".into())), Err(Error::WrongType));
    }
}
