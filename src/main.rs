use anyhow::Result;
use clap::Parser;

use case_portal_flow::utils::logging;
use case_portal_flow::{App, Config};

#[derive(Parser, Debug)]
#[command(name = "case-portal-flow")]
#[command(about = "案件门户自动化：翻页、打开案件、执行并确认操作")]
struct Args {
    /// 配置文件（TOML），缺省时只使用默认值与环境变量
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP 控制端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 启动无头浏览器而不是连接已有浏览器
    #[arg(long)]
    headless: bool,

    /// 显示详细日志
    #[arg(short, long)]
    verbose: bool,

    /// 允许任意来源的跨域请求
    #[arg(long)]
    cors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 加载配置
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    config.headless |= args.headless;
    config.verbose_logging |= args.verbose;

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    let app = App::initialize(config).await?;
    app.run(args.cors).await?;

    Ok(())
}
