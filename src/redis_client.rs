use redis::{aio::MultiplexedConnection, Client};
use tracing::info;

/// Мультиплексированное соединение с Redis; клонируется дёшево, используется издателем quick-sale.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Redis connected");
        Ok(RedisClient { conn })
    }
}
