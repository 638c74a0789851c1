use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info};

use webserv::application::server::ServerManager;
use webserv::config;
use webserv::logger;

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_sigint(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

fn main() -> ExitCode {
    logger::init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "webserv".to_string());
    let (Some(config_path), None) = (args.next(), args.next()) else {
        eprintln!("Usage: {program} <config_file>");
        return ExitCode::FAILURE;
    };

    let config = match config::load_config(&PathBuf::from(&config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Broken pipes surface as write errors; SIGINT triggers a graceful
    // shutdown checked once per poll cycle.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }

    let mut manager = match ServerManager::new(config) {
        Ok(m) => m,
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("webserv ready - listening on {} server(s)", manager.server_count());

    if let Err(e) = manager.run(&RUNNING) {
        error!("event loop failed: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
