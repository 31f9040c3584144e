use std::process::ExitCode;

fn main() -> ExitCode {
    remedi_cli::run()
}
