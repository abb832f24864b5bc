mod clock;
mod command;
mod config;
mod dmx;
mod fader;
mod fx;
mod scene;
mod show;
mod transaction;
mod universe;

use rustop::opts;

use command::spawn_command_surface;
use config::ShowConfig;
use show::Show;

#[tokio::main]
async fn main() {
    let (args, _) = opts! {
        synopsis "Real-time stage lighting output core";
        param config:String, desc: "Path to the show configuration JSON file";
        opt log_dir:Option<String>, desc: "Directory to write log files into (stderr only if omitted)";
    }
    .parse_or_exit();

    init_logging(args.log_dir.as_deref());

    error_stack::Report::set_color_mode(error_stack::fmt::ColorMode::None);

    log::info!("{}", get_version());

    let config = match ShowConfig::load(&args.config) {
        Ok(config) => config,
        Err(report) => {
            eprintln!("failed to load show config from {}: {report:?}", args.config);
            std::process::exit(1);
        }
    };

    let show = match Show::start(&config) {
        Ok(show) => show,
        Err(e) => {
            eprintln!("failed to start show: {e}");
            std::process::exit(1);
        }
    };

    let handle = spawn_command_surface(show);

    tokio::signal::ctrl_c().await.unwrap();
    log::info!("received ctrl-c, shutting down");
    handle.shutdown().await;
}

fn init_logging(log_dir: Option<&str>) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(log::LevelFilter::Info);

    if let Some(dir) = log_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("could not create log directory {dir}: {e}");
            builder.init();
            return;
        }
        let path = std::path::Path::new(dir).join("lumen-core.log");
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
                builder.init();
            }
            Err(e) => {
                eprintln!("could not open log file {}: {e}", path.display());
                builder.init();
            }
        }
    } else {
        builder.init();
    }
}

pub fn get_version() -> String {
    format!("lumen-core: {} (built at {})", built_info::PKG_VERSION, built_info::BUILT_TIME_UTC)
}

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
