fn main() {
    if handle_cli_flags() {
        return;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let result = tube_instances::app::parse_args(std::env::args().skip(1))
        .and_then(tube_instances::app::run);
    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut saw_flag = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("tube-instances {}", tube_instances::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{}", tube_instances::app::USAGE);
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}
