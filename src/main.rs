use clap::Parser;

use ytflow::cli::{self, Cli};
use ytflow::logging;

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.log_file.as_deref());

    if let Err(err) = cli::execute(cli) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
