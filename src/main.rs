use anomaly_core::{init_logging, AppConfig};
use anomaly_scheduler::{wait_for_shutdown_signal, Application};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("anomaly-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("异常检测任务调度 Worker")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时按默认路径查找"),
        )
        .arg(
            Arg::new("worker-id")
                .long("worker-id")
                .value_name("ID")
                .help("固定 Worker ID，覆盖配置文件")
                .value_parser(clap::value_parser!(i64))
                .conflicts_with("random-worker-id"),
        )
        .arg(
            Arg::new("random-worker-id")
                .long("random-worker-id")
                .help("每次启动使用随机 Worker ID")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config =
        AppConfig::load_unvalidated(config_path.map(String::as_str)).context("加载配置失败")?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    if let Some(id) = matches.get_one::<i64>("worker-id") {
        config.worker.id = Some(*id);
        config.worker.random_worker_id_enabled = false;
    }
    if matches.get_flag("random-worker-id") {
        config.worker.random_worker_id_enabled = true;
    }

    init_logging(&config.observability.log_level, &config.observability.log_format)?;

    let host = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    info!("启动异常检测任务调度 Worker, 主机 {}", host);
    if let Some(path) = config_path {
        info!("配置文件: {}", path);
    }
    info!("任务存储: {}", config.database.url);

    let app = Application::build(config).await?;
    app.start().await?;
    info!("Worker {} 已启动", app.worker_id());

    wait_for_shutdown_signal().await?;
    info!("收到关闭信号，开始优雅关闭...");
    app.shutdown().await;

    info!("异常检测任务调度 Worker 已退出");
    Ok(())
}
