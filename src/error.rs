use salvo::http::StatusCode;
use salvo::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("{0}")]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    SQLError(#[from] sqlx::Error),
    #[error(transparent)]
    HttpError(#[from] reqwest::Error),
    #[error(transparent)]
    ConfigError(#[from] config::ConfigError),
    #[error(transparent)]
    GeoError(#[from] maxminddb::MaxMindDbError),
    #[error("can't connect to any judge after {0} attempts")]
    NoJudge(u32),
    #[error("busy")]
    Busy,
    #[error("unsupported database url: {0}")]
    UnsupportedDb(String),
    #[error("invalid table name `{0}`, use letters, digits and underscores, not starting with a digit")]
    InvalidTableName(String),
    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
}

pub type PoolResult<T> = Result<T, PoolError>;

#[async_trait]
impl Writer for PoolError {
    async fn write(self, _req: &mut Request, _depot: &mut Depot, res: &mut Response) {
        tracing::error!("request failed: {}", self);
        res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
        res.render(Text::Plain(self.to_string()));
    }
}
