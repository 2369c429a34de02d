pub mod cli;
pub mod errors;
pub mod loader;
pub mod outline;

use std::path::PathBuf;

use bcf_config::AppConfig;
use errors::FrontendError;
use tracing::info;

/// 加载指定归档（或回退来源）并打印浏览视图。
pub fn run_cli(paths: &[PathBuf], config: &AppConfig) -> Result<(), FrontendError> {
    info!("启动 CLI 浏览前端");
    let collection = loader::load_collection(paths, config)?;
    cli::render(&collection, config);
    Ok(())
}
