mod deregister;
mod report;

use anyhow::Result;

use crate::state::AppState;

/// Subscribes to the device topics and spawns one consumer task per topic.
/// Subscriptions are in place when this returns.
pub async fn spawn_all(app: AppState) -> Result<()> {
    report::spawn(app.clone()).await?;
    deregister::spawn(app).await?;
    Ok(())
}
