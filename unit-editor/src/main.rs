/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use fleet_core::{run_lambda, DocumentStore, DynamoDbStore, HierarchyManager, LocationDraft, Role, UnitAggregate};
use lambda_runtime::{Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::main as tokio_main;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    role: Role,
    unit_id: String,
    locations: Vec<LocationDraft>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LocationResponse {
    location_id: String,
    element_ids: Vec<String>,
}

/// Saved layout with the IDs assigned to new entries, in submission order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    unit_id: String,
    locations: Vec<LocationResponse>,
}

impl From<UnitAggregate> for Response {
    fn from(model: UnitAggregate) -> Self {
        Self {
            unit_id: model.unit.id,
            locations: model
                .locations
                .into_iter()
                .map(|node| LocationResponse {
                    location_id: node.location.id,
                    element_ids: node.elements.into_iter().map(|element| element.id).collect(),
                })
                .collect(),
        }
    }
}

#[tokio_main]
async fn main() -> Result<(), Error> {
    let store: Arc<dyn DocumentStore> = Arc::new(DynamoDbStore::load_from_env().await?);
    let manager = &HierarchyManager::new(store);

    run_lambda!(move |event: LambdaEvent<Request>| async move {
        manager
            .save_unit(event.payload.role, &event.payload.unit_id, event.payload.locations)
            .await
            .map(Response::from)
    })
}
