use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("命令行指定的归档均无法读取")]
    NoReadableArchive,
}
