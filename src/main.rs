fn main() {
    let exit_code = match gg::run::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("gg: error: {:#}", err);
            1
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
