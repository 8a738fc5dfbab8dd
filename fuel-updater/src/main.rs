/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use chrono::{DateTime, Utc};
use fleet_core::{run_lambda, ApiError, DocumentStore, DynamoDbStore, FuelLevel, FuelTracker, Role};
use lambda_runtime::{Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::main as tokio_main;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    role: Role,
    unit_id: String,
    level: FuelLevel,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    level: FuelLevel,
    checked_at: DateTime<Utc>,
}

#[tokio_main]
async fn main() -> Result<(), Error> {
    let store: Arc<dyn DocumentStore> = Arc::new(DynamoDbStore::load_from_env().await?);
    let tracker = &FuelTracker::new(store);

    run_lambda!(move |event: LambdaEvent<Request>| async move {
        let checked_at = tracker
            .update_fuel(event.payload.role, &event.payload.unit_id, event.payload.level)
            .await?;

        Ok::<Response, ApiError>(Response {
            level: event.payload.level,
            checked_at,
        })
    })
}
