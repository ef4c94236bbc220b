pub mod bytecode;
pub mod cli;
pub mod dc;
pub mod error;
pub mod io;
pub mod lexer;
pub mod num;
pub mod parser;
pub mod program;
pub mod token;
pub mod vm;

/// Which command language a front end speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Bc,
    Dc,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Bc => "bc",
            Dialect::Dc => "dc",
        }
    }
}

/// The process-wide interrupt flag. A signal handler (or embedder) raises
/// it; the VM and the kernel's digit loops poll it between iterations and
/// unwind with a signal error; the REPL clears it once it has recovered.
pub mod interrupt {
    use std::sync::atomic::{AtomicBool, Ordering};

    static FLAG: AtomicBool = AtomicBool::new(false);

    pub fn raise() {
        FLAG.store(true, Ordering::Relaxed);
    }

    pub fn pending() -> bool {
        FLAG.load(Ordering::Relaxed)
    }

    pub fn clear() {
        FLAG.store(false, Ordering::Relaxed);
    }
}

/// Implementation limits, reported by bc's `limits` statement.
pub mod limits {
    pub const BASE_MAX: u64 = u64::MAX;
    pub const DIM_MAX: u64 = u32::MAX as u64;
    pub const SCALE_MAX: u64 = u32::MAX as u64;
    pub const STRING_MAX: u64 = u32::MAX as u64;
    pub const NAME_MAX: u64 = 4096;
    pub const NUM_MAX: u64 = u32::MAX as u64;
}
