//! phaseline CLI binary
//!
//! All logic is in the library; main.rs only maps the exit code.

fn main() {
    // cli::run() prints everything, including errors
    if let Err(code) = phaseline::cli::run() {
        std::process::exit(code.as_i32());
    }
}
