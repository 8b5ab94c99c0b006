mod cli;
mod exit_codes;
mod logging;
mod output;
mod plan;
mod run;
mod run_error;
mod validate;
mod workload;

use clap::Parser;
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let cli = match cli::Cli::try_parse() {
        Ok(v) => v,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    exit_codes::ExitCode::Success.as_i32()
                }
                _ => exit_codes::ExitCode::InvalidInput.as_i32(),
            };
            std::process::exit(code);
        }
    };

    logging::init(cli.verbose);
    let code = dispatch(cli.command).await;
    std::process::exit(code.as_i32());
}

async fn dispatch(command: cli::Command) -> exit_codes::ExitCode {
    let outcome = match command {
        cli::Command::Run(args) => run::run(args).await,
        cli::Command::Validate(args) => validate::validate(args)
            .await
            .map(|()| exit_codes::ExitCode::Success),
    };

    outcome.unwrap_or_else(|err| {
        eprintln!("error: {err}");
        err.exit_code()
    })
}
