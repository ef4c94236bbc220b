use std::io::Cursor;

use bcvm::error::PosixMode;
use bcvm::io::Capture;
use bcvm::vm::Vm;
use bcvm::Dialect;
use pretty_assertions::assert_eq;

fn run(src: &str) -> String {
    run_with_input(src, "")
}

fn run_with_input(src: &str, input: &str) -> String {
    let cap = Capture::new();
    let mut vm = Vm::new(
        Dialect::Bc,
        PosixMode::Ignore,
        Box::new(Cursor::new(input.as_bytes().to_vec())),
        Box::new(cap.clone()),
        false,
    );
    vm.run_text(src).unwrap();
    vm.finish().unwrap();
    cap.contents()
}

/// Numeric output wraps with a backslash-newline at column 69.
fn wrap70(digits: &str) -> String {
    let mut out = String::new();
    let mut col = 0;
    for c in digits.chars() {
        if col == 69 {
            out.push_str("\\\n");
            col = 0;
        }
        out.push(c);
        col += 1;
    }
    out.push('\n');
    out
}

#[test]
fn test_division_precision() {
    assert_eq!(run("scale = 20\n1/3\n"), ".33333333333333333333\n");
}

#[test]
fn test_base_conversion_round_trip() {
    assert_eq!(
        run("obase = 16\n255\nobase = 10\nibase = 16\nFF\n"),
        "FF\n255\n"
    );
}

#[test]
fn test_binary_output() {
    assert_eq!(run("obase = 2\n255\n"), "11111111\n");
}

#[test]
fn test_large_base_blocks() {
    assert_eq!(run("obase = 100\n100\n"), " 01 00\n");
}

#[test]
fn test_karatsuba_square_of_200_digits() {
    // (10^199 + 1)^2 = 10^398 + 2*10^199 + 1; both operands are 200
    // digits, far beyond the Karatsuba cutoff.
    let src = "x = 10^199 + 1\nx * x\n";
    let mut expect = String::from("1");
    expect.push_str(&"0".repeat(198));
    expect.push('2');
    expect.push_str(&"0".repeat(198));
    expect.push('1');
    assert_eq!(run(src), wrap70(&expect));
}

#[test]
fn test_sqrt_fifty_digits() {
    let out = run("scale = 50\nsqrt(2)\n");
    assert_eq!(
        out,
        "1.41421356237309504880168872420969807856967187537694\n"
    );
    // Stable across reruns.
    assert_eq!(run("scale = 50\nsqrt(2)\n"), out);
}

#[test]
fn test_function_recursion_fib() {
    let src = "define f(n) { if (n < 2) return n\n return f(n-1) + f(n-2) }\nf(10)\n";
    assert_eq!(run(src), "55\n");
}

#[test]
fn test_scale_is_read_at_execution_time() {
    // Both divisions are compiled before the first executes; the second
    // must still see the scale assigned between them at runtime.
    let src = "scale = 2\n1/3\nscale = 4\n1/3\n";
    assert_eq!(run(src), ".33\n.3333\n");
}

#[test]
fn test_constants_reparse_under_ibase() {
    // The literal 11 is parsed when its NUM executes, honoring the ibase
    // in force at that moment.
    let src = "define f() { return 11 }\nf()\nibase = 16\nf()\n";
    assert_eq!(run(src), "11\n17\n");
}

#[test]
fn test_length_and_scale_builtins() {
    assert_eq!(run("length(123.456)\n"), "6\n");
    assert_eq!(run("scale(123.456)\n"), "3\n");
    assert_eq!(run("scale(10)\n"), "0\n");
}

#[test]
fn test_power_negative_exponent() {
    assert_eq!(run("scale = 4\n2^-2\n"), ".2500\n");
}

#[test]
fn test_modulus_scale_semantics() {
    assert_eq!(run("7 % 3\n"), "1\n");
    assert_eq!(run("-7 % 3\n"), "-1\n");
    assert_eq!(run("scale = 2\n7.5 % 2.25\n"), ".0075\n");
}

#[test]
fn test_boolean_and_relational() {
    assert_eq!(run("1 && 2\n"), "1\n");
    assert_eq!(run("1 && 0\n"), "0\n");
    assert_eq!(run("0 || 3\n"), "1\n");
    assert_eq!(run("!5\n"), "0\n");
    assert_eq!(run("!0\n"), "1\n");
    assert_eq!(run("-100 < -5\n"), "1\n");
}

#[test]
fn test_inc_dec_pre_post() {
    assert_eq!(run("x = 5\nx++\nx\n"), "5\n6\n");
    assert_eq!(run("x = 5\n++x\nx\n"), "6\n6\n");
    assert_eq!(run("x = 5\n--x\n"), "4\n");
}

#[test]
fn test_array_growth_and_indexing() {
    assert_eq!(run("a[10] = 3\na[10]\na[5]\n"), "3\n0\n");
}

#[test]
fn test_function_redefinition_replaces_body() {
    let src = "define f() { return 1 }\nf()\ndefine f() { return 2 }\nf()\n";
    assert_eq!(run(src), "1\n2\n");
}

#[test]
fn test_mutual_recursion_forward_reference() {
    let src = "define e(n) { if (n == 0) return 1\n return o(n-1) }\n\
               define o(n) { if (n == 0) return 0\n return e(n-1) }\ne(10)\ne(7)\n";
    assert_eq!(run(src), "1\n0\n");
}

#[test]
fn test_read_evaluates_an_expression() {
    assert_eq!(run_with_input("read() * 2\n", "21\n"), "42\n");
}

#[test]
fn test_print_statement_escapes() {
    assert_eq!(run("print \"a\\tb\\n\"\n"), "a\tb\n");
    assert_eq!(run("print 1, 2, \"\\n\"\n"), "12\n");
}

#[test]
fn test_bare_string_statement() {
    assert_eq!(run("\"hello\"\n"), "hello");
}

#[test]
fn test_limits_reports_minimums() {
    let out = run("limits\n");
    assert!(out.contains("BC_BASE_MAX"));
    assert!(out.contains("BC_SCALE_MAX"));
    assert!(out.contains("BC_DIM_MAX"));
    assert!(out.contains("BC_STRING_MAX"));
}

#[test]
fn test_pass_by_value_scalars() {
    let src = "define f(x) { x = 99\n return 0 }\ny = 5\nt = f(y)\ny\n";
    assert_eq!(run(src), "5\n");
}

#[test]
fn test_recursive_shadowing_restores_callers_values() {
    // Each activation's `n` must be independent; after the call tree the
    // global n is untouched.
    let src = "n = 77\ndefine f(n) { if (n == 0) return 0\n return f(n-1) }\nt = f(5)\nn\n";
    assert_eq!(run(src), "77\n");
}

#[test]
fn test_deep_fraction_division() {
    assert_eq!(run("scale = 0\n1 / 0.0005\n"), "2000\n");
}

#[test]
fn test_negative_sqrt_is_error() {
    let cap = Capture::new();
    let mut vm = Vm::new(
        Dialect::Bc,
        PosixMode::Ignore,
        Box::new(Cursor::new(Vec::new())),
        Box::new(cap.clone()),
        false,
    );
    assert!(vm.run_text("sqrt(-1)\n").is_err());
}
