use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter};

/// Crates in this workspace, logged at info and up. Everything else only
/// gets through at warn or above.
const LOCAL_CRATES: [&str; 3] = ["tallyboard", "tallyboard_collab", "tallyboard_server"];

pub fn init_logger() {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {} {} {}",
                chrono::Local::now()
                    .format("%H:%M:%S")
                    .to_string()
                    .bright_black(),
                level_tag(record.level()),
                crate_of(record.target()).bold(),
                message
            ))
        })
        .level(LevelFilter::Warn);

    for name in LOCAL_CRATES {
        dispatch = dispatch.level_for(name, LevelFilter::Info);
    }

    dispatch
        .chain(std::io::stdout())
        .apply()
        .expect("logging is initialized");
}

fn level_tag(level: Level) -> ColoredString {
    match level {
        Level::Error => "error".red(),
        Level::Warn => "warn ".yellow(),
        Level::Info => "info ".green(),
        Level::Debug => "debug".cyan(),
        Level::Trace => "trace".normal(),
    }
}

/// The crate segment of a log target, which is enough context for a
/// workspace this size.
fn crate_of(target: &str) -> &str {
    target.split("::").next().unwrap_or(target)
}
