use anyhow::Result;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

const LOG_PREFIX: &str = "server_live_";

pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    // Keep only the most recent previous log
    cleanup_old_logs(log_dir)?;

    let log_file_name = format!("{}{}.log", LOG_PREFIX, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_path = log_dir.join(log_file_name);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}

fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

fn cleanup_old_logs(log_dir: &Path) -> Result<()> {
    let mut entries: Vec<(SystemTime, std::path::PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(LOG_PREFIX) && name.ends_with(".log")
        })
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();

    // Newest first
    entries.sort_by_key(|(modified, _)| std::cmp::Reverse(*modified));

    for (_, path) in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to delete old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn keeps_only_newest_previous_log() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("server_live_2024-01-01_00-00-00.log");
        let newer = dir.path().join("server_live_2024-01-02_00-00-00.log");
        let unrelated = dir.path().join("notes.txt");

        fs::write(&older, "old").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::write(&newer, "new").unwrap();
        fs::write(&unrelated, "keep").unwrap();

        cleanup_old_logs(dir.path()).unwrap();

        assert!(!older.exists());
        assert!(newer.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn unknown_level_means_info() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("fatal"), log::LevelFilter::Info);
    }
}
