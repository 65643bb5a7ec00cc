pub fn init_logger(name: String) -> Result<(), fern::InitError> {
    let level = std::env::var("SESSIOND_LOG_LEVEL")
        .ok()
        .and_then(|l| l.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Debug);
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}][{}][{}]-{}",
                chrono::Local::now().format("%Y-%m-%d-%H:%M:%S.%3f"),
                std::thread::current().name().unwrap_or("none"),
                record.level(),
                record.target(),
                name,
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}
