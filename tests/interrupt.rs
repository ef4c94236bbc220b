//! The interrupt flag is process-wide, so everything that touches it runs
//! inside one test function, in one test binary.

use std::io::Cursor;

use bcvm::error::{Error, PosixMode};
use bcvm::interrupt;
use bcvm::io::Capture;
use bcvm::num::Number;
use bcvm::vm::Vm;
use bcvm::Dialect;

#[test]
fn test_interrupt_unwinds_kernel_and_vm_without_corruption() {
    // Kernel loops bail out with a signal error and release temporaries.
    interrupt::raise();
    let big = Number::parse(&"9".repeat(400), 10).unwrap();
    assert_eq!(big.mul(&big, 0), Err(Error::Signal));
    interrupt::clear();

    // Once cleared, the same operation completes.
    assert!(big.mul(&big, 0).is_ok());

    // A VM with a defined function hits a pending interrupt between
    // opcodes and unwinds...
    let cap = Capture::new();
    let mut vm = Vm::new(
        Dialect::Bc,
        PosixMode::Ignore,
        Box::new(Cursor::new(Vec::new())),
        Box::new(cap.clone()),
        false,
    );
    vm.run_text("define f(n) { return n + 1 }\n").unwrap();

    interrupt::raise();
    assert_eq!(vm.run_text("while (1) x += 1\n"), Err(Error::Signal));
    interrupt::clear();

    // ...without corrupting the function table: after a reset the same
    // session keeps working and f is still callable.
    vm.parser.reset(&mut vm.prog);
    vm.run_text("f(41)\n").unwrap();
    assert_eq!(cap.contents(), "42\n");
}
