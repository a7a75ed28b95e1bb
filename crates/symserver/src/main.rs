fn main() {
    if let Err(error) = symserver::cli::execute() {
        eprintln!("error: {}", error);
        for cause in error.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
        std::process::exit(1);
    }
}
