mod infra;
mod runtime;

fn main() {
    if let Err(err) = runtime::run_from_args() {
        eprintln!("scada-plc: {err}");
        std::process::exit(1);
    }
}
