/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use chrono::{DateTime, Utc};
use fleet_core::{
    run_lambda, DocumentStore, DynamoDbStore, Element, ElementStatus, FuelLevel, HierarchyManager, LocationNode,
    Quantity, Role, UnitAggregate, UnitStatus, UnitType,
};
use lambda_runtime::{Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::main as tokio_main;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    role: Role,
    unit_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ElementResponse {
    element_id: String,
    name: String,
    quantity: Quantity,
    status: ElementStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LocationResponse {
    location_id: String,
    name: String,
    elements: Vec<ElementResponse>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    unit_id: String,
    name: String,
    model: String,
    plate: String,
    unit_type: UnitType,
    status: UnitStatus,
    odometer: String,
    fuel: Option<FuelLevel>,
    fuel_checked_at: Option<DateTime<Utc>>,
    last_revision_at: Option<DateTime<Utc>>,
    image: Option<String>,
    locations: Vec<LocationResponse>,
}

impl From<Element> for ElementResponse {
    fn from(model: Element) -> Self {
        Self {
            element_id: model.id,
            name: model.name,
            quantity: model.quantity,
            status: model.status,
        }
    }
}

impl From<LocationNode> for LocationResponse {
    fn from(model: LocationNode) -> Self {
        Self {
            location_id: model.location.id,
            name: model.location.name,
            elements: model.elements.into_iter().map(ElementResponse::from).collect(),
        }
    }
}

impl From<UnitAggregate> for Response {
    fn from(model: UnitAggregate) -> Self {
        Self {
            unit_id: model.unit.id,
            name: model.unit.name,
            model: model.unit.model,
            plate: model.unit.plate,
            unit_type: model.unit.unit_type,
            status: model.unit.status,
            odometer: model.unit.odometer,
            fuel: model.unit.fuel,
            fuel_checked_at: model.unit.fuel_checked_at,
            last_revision_at: model.unit.last_revision_at,
            image: model.unit.image,
            locations: model.locations.into_iter().map(LocationResponse::from).collect(),
        }
    }
}

#[tokio_main]
async fn main() -> Result<(), Error> {
    let store: Arc<dyn DocumentStore> = Arc::new(DynamoDbStore::load_from_env().await?);
    let manager = &HierarchyManager::new(store);

    run_lambda!(move |event: LambdaEvent<Request>| async move {
        manager
            .load_unit(event.payload.role, &event.payload.unit_id)
            .await
            .map(Response::from)
    })
}

#[cfg(test)]
mod tests {
    use crate::{Request, Response};
    use chrono::{TimeZone, Utc};
    use fleet_core::{
        Element, ElementStatus, FuelLevel, Location, LocationNode, Quantity, Role, Unit, UnitAggregate, UnitStatus,
        UnitType,
    };
    use serde_json::{from_str, to_string};

    const UNIT_ID: &str = "unit-5";
    const LOCATION_ID: &str = "location-0";
    const ELEMENT_ID: &str = "element-0";

    fn aggregate() -> UnitAggregate {
        UnitAggregate {
            unit: Unit {
                id: UNIT_ID.to_string(),
                name: "Unidad 5".to_string(),
                model: "Mercedes-Benz Atego".to_string(),
                plate: "AB123CD".to_string(),
                unit_type: UnitType::StructuralFire,
                status: UnitStatus::Operative,
                odometer: "120000".to_string(),
                fuel: Some(FuelLevel::ThreeQuarters),
                fuel_checked_at: Some(Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap()),
                last_revision_at: None,
                image: None,
            },
            locations: vec![LocationNode {
                location: Location {
                    id: LOCATION_ID.to_string(),
                    name: "Cabina".to_string(),
                    unit_id: UNIT_ID.to_string(),
                    order: 0,
                },
                elements: vec![Element {
                    id: ELEMENT_ID.to_string(),
                    name: "Extintor".to_string(),
                    quantity: Quantity::NotApplicable,
                    status: ElementStatus::Faulty,
                    unit_id: UNIT_ID.to_string(),
                    location_id: LOCATION_ID.to_string(),
                    order: 0,
                }],
            }],
        }
    }

    #[test]
    fn deserialize_request() {
        let input = format!("{{\"role\":\"guardia\",\"unitId\":\"{UNIT_ID}\"}}");
        let request: Request = from_str(&input).unwrap();

        assert_eq!(Role::Guardia, request.role);
        assert_eq!(UNIT_ID, request.unit_id);
    }

    #[test]
    fn serialize_response() {
        let output = to_string(&Response::from(aggregate())).unwrap();

        assert!(output.contains("\"unitType\":\"Unidad de Incendio Estructural\""));
        assert!(output.contains("\"fuel\":\"3/4\""));
        assert!(output.contains("\"fuelCheckedAt\":\"2024-05-02T08:30:00Z\""));
        assert!(output.contains("\"quantity\":\"-\""));
        assert!(output.contains("\"status\":\"Con falla\""));
        assert!(output.contains("\"lastRevisionAt\":null"));
    }

    #[test]
    fn response_from_model() {
        let response = Response::from(aggregate());

        assert_eq!(UNIT_ID, response.unit_id);
        assert_eq!(1, response.locations.len());
        assert_eq!(LOCATION_ID, response.locations[0].location_id);
        assert_eq!(ELEMENT_ID, response.locations[0].elements[0].element_id);
        assert_eq!(ElementStatus::Faulty, response.locations[0].elements[0].status);
    }
}
