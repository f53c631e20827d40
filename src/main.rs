#![forbid(unsafe_code)]

//! probestats: probe-request statistics CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = match cli_app::Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version go to stdout and succeed; usage errors are bad input.
            let code = i32::from(e.use_stderr());
            let _ = e.print();
            std::process::exit(code);
        }
    };
    if let Err(e) = cli_app::run(&args) {
        eprintln!("probestats: {e}");
        std::process::exit(e.exit_code());
    }
}
