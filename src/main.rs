use anyhow::Result;
use clap::{Arg, Command};
use shipqueue::common::{start_application, StartupConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("shipqueue")
        .version(env!("CARGO_PKG_VERSION"))
        .about("异步任务执行核心：持久化队列、任务运行器与日程调度器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/shipqueue.toml 和 shipqueue.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["runner", "scheduler", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("runner-id")
                .long("runner-id")
                .value_name("ID")
                .help("运行器标识，覆盖配置文件"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty", "compact"]),
        )
        .get_matches();

    let startup_config = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        mode: matches.get_one::<String>("mode").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
        runner_id: matches.get_one::<String>("runner-id").cloned(),
    };

    start_application(startup_config).await
}
