use mongodb::{bson::doc, Client, Database};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::Result;

pub async fn get_db_client(config: &AppConfig) -> Result<Database> {
    let client = Client::with_uri_str(&config.mongodb_uri).await?;
    let db = client.database(&config.mongodb_database);

    match db.run_command(doc! { "ping": 1 }).await {
        Ok(_) => info!(database = %config.mongodb_database, "Connected to MongoDB"),
        // The driver reconnects lazily; a failed ping at boot is not fatal.
        Err(e) => warn!(database = %config.mongodb_database, error = %e, "MongoDB ping failed"),
    }

    Ok(db)
}
