/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use chrono::{DateTime, Utc};
use fleet_core::{run_lambda, DocumentStore, DynamoDbStore, NewRevision, Revision, RevisionRecorder, Role};
use lambda_runtime::{Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::main as tokio_main;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    role: Role,
    unit_id: String,
    #[serde(flatten)]
    revision: NewRevision,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    revision_id: String,
    created_at: DateTime<Utc>,
}

impl From<Revision> for Response {
    fn from(model: Revision) -> Self {
        Self {
            revision_id: model.id,
            created_at: model.created_at,
        }
    }
}

#[tokio_main]
async fn main() -> Result<(), Error> {
    let store: Arc<dyn DocumentStore> = Arc::new(DynamoDbStore::load_from_env().await?);
    let recorder = &RevisionRecorder::new(store);

    run_lambda!(move |event: LambdaEvent<Request>| async move {
        recorder
            .record_revision(event.payload.role, &event.payload.unit_id, event.payload.revision)
            .await
            .map(Response::from)
    })
}

#[cfg(test)]
mod tests {
    use crate::{Request, Response};
    use chrono::{TimeZone, Utc};
    use fleet_core::{ElementStatus, Revision, Role};
    use serde_json::{from_str, to_string};
    use std::collections::BTreeMap;

    const UNIT_ID: &str = "unit-3";
    const REVISION_ID: &str = "revision-1";

    #[test]
    fn deserialize_request() {
        let input = format!(
            "{{\"role\":\"guardia\",\"unitId\":\"{UNIT_ID}\",\"inspectors\":\"Pérez, Gómez\",\"observations\":\"Falta el hacha\",\"statuses\":{{\"e1\":\"Operativo\",\"e2\":\"Faltante\"}}}}"
        );
        let request: Request = from_str(&input).unwrap();

        assert_eq!(Role::Guardia, request.role);
        assert_eq!(UNIT_ID, request.unit_id);
        assert_eq!("Pérez, Gómez", request.revision.inspectors);
        assert_eq!("Falta el hacha", request.revision.observations);
        assert_eq!(Some(&ElementStatus::Operative), request.revision.statuses.get("e1"));
        assert_eq!(Some(&ElementStatus::Missing), request.revision.statuses.get("e2"));
    }

    #[test]
    fn deserialize_request_no_observations() {
        let input =
            format!("{{\"role\":\"admin\",\"unitId\":\"{UNIT_ID}\",\"statuses\":{{\"e1\":\"Con falla\"}}}}");
        let request: Request = from_str(&input).unwrap();

        assert!(request.revision.inspectors.is_empty());
        assert!(request.revision.observations.is_empty());
        assert_eq!(1, request.revision.statuses.len());
    }

    #[test]
    fn serialize_response() {
        let output = to_string(&Response::from(Revision {
            id: REVISION_ID.to_string(),
            unit_id: UNIT_ID.to_string(),
            inspectors: String::new(),
            observations: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            statuses: BTreeMap::from([("e1".to_string(), ElementStatus::Operative)]),
        }))
        .unwrap();

        assert_eq!(
            format!("{{\"revisionId\":\"{REVISION_ID}\",\"createdAt\":\"2024-03-01T12:00:00Z\"}}"),
            output
        );
    }
}
