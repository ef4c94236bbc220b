use bcvm::{cli, Dialect};

fn main() {
    std::process::exit(cli::run(Dialect::Bc));
}
