use human_panic::{metadata, setup_panic};
use log::error;
use mine2farm::{cli::run_cli, log::is_logger_initialised};

fn main() {
    setup_panic!(metadata!().support("Please report the issue along with the model directory used."));

    if let Err(err) = run_cli() {
        if is_logger_initialised() {
            error!("{err:?}");
        } else {
            eprintln!("Error: {err:?}");
        }

        std::process::exit(1);
    }
}
