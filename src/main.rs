use clap::Parser;
use clap::error::ErrorKind;

mod cli;
mod cmd;

use cli::{Args, Command};

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let exit_code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(exit_code);
        }
    };

    let result = match &args.command {
        Command::Cv(cv) => cmd::connectivity::run(cv),
        Command::Rt(rt) => cmd::discovery::run(rt),
        Command::Sh(sh) => cmd::interfaces::run(sh),
    };
    if let Err(err) = result {
        eprintln!("ipoam: {err:#}");
        std::process::exit(1);
    }
}
