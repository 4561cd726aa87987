//! The main compiler binary: takes a source file and an output stage,
//! compiles it, and writes the result to stdout or a file.
//!
//! Run with `--help` for more info.

use clap::Parser;
use qcc::driver::{init_tracing, run, Args};

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(err) = run(&args) {
        eprintln!("qcc: {err}");
        std::process::exit(1);
    }
}
