/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use fleet_core::{run_lambda, ApiError, DocumentStore, DynamoDbStore, HierarchyManager, NewUnit, Role};
use lambda_runtime::{Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::main as tokio_main;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    role: Role,
    #[serde(flatten)]
    unit: NewUnit,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    unit_id: String,
}

#[tokio_main]
async fn main() -> Result<(), Error> {
    let store: Arc<dyn DocumentStore> = Arc::new(DynamoDbStore::load_from_env().await?);
    let manager = &HierarchyManager::new(store);

    run_lambda!(move |event: LambdaEvent<Request>| async move {
        let unit_id = manager.create_unit(event.payload.role, event.payload.unit).await?;

        Ok::<Response, ApiError>(Response { unit_id })
    })
}

#[cfg(test)]
mod tests {
    use crate::{Request, Response};
    use fleet_core::{Role, UnitStatus, UnitType};
    use serde_json::{from_str, to_string};

    const UNIT_ID: &str = "4c2f6a1e-0000-4000-8000-000000000005";

    #[test]
    fn deserialize_request() {
        let input = "{\"role\":\"admin\",\"name\":\"Unidad 5\",\"model\":\"Mercedes-Benz Atego\",\"plate\":\"AB123CD\",\"unitType\":\"Unidad de Incendio Estructural\",\"status\":\"En Reparación\",\"odometer\":\"120000\"}";
        let request: Request = from_str(input).unwrap();

        assert_eq!(Role::Admin, request.role);
        assert_eq!("Unidad 5", request.unit.name);
        assert_eq!("AB123CD", request.unit.plate);
        assert_eq!(UnitType::StructuralFire, request.unit.unit_type);
        assert_eq!(UnitStatus::InRepair, request.unit.status);
        assert_eq!("120000", request.unit.odometer);
    }

    #[test]
    fn deserialize_request_defaults() {
        let input = "{\"role\":\"admin\",\"name\":\"Unidad 1\",\"model\":\"Toyota Hilux\",\"plate\":\"AA000AA\",\"unitType\":\"Ambulancia\"}";
        let request: Request = from_str(input).unwrap();

        assert_eq!(UnitStatus::Operative, request.unit.status);
        assert!(request.unit.odometer.is_empty());
    }

    #[test]
    fn deserialize_request_unknown_role() {
        let input = "{\"role\":\"visitante\",\"name\":\"Unidad 1\",\"model\":\"Toyota Hilux\",\"plate\":\"AA000AA\",\"unitType\":\"Ambulancia\"}";

        assert!(from_str::<Request>(input).is_err());
    }

    #[test]
    fn serialize_response() {
        let output = to_string(&Response {
            unit_id: UNIT_ID.to_string(),
        })
        .unwrap();

        assert_eq!(format!("{{\"unitId\":\"{UNIT_ID}\"}}"), output);
    }
}
