/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use chrono::{DateTime, Utc};
use fleet_core::{
    run_lambda, DocumentStore, DynamoDbStore, ElementStatus, ResultsPage, Revision, RevisionRecorder, Role,
};
use lambda_runtime::{Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::main as tokio_main;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    role: Role,
    unit_id: String,
    page_token: Option<String>,
    page_size: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RevisionResponse {
    revision_id: String,
    inspectors: String,
    observations: String,
    created_at: DateTime<Utc>,
    statuses: BTreeMap<String, ElementStatus>,
    problems: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    revisions: Vec<RevisionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

impl From<Revision> for RevisionResponse {
    fn from(model: Revision) -> Self {
        Self {
            problems: model.problems().count(),
            revision_id: model.id,
            inspectors: model.inspectors,
            observations: model.observations,
            created_at: model.created_at,
            statuses: model.statuses,
        }
    }
}

impl From<ResultsPage<Revision, String>> for Response {
    fn from(value: ResultsPage<Revision, String>) -> Self {
        Self {
            revisions: value.items.into_iter().map(RevisionResponse::from).collect(),
            page_token: value.last_evaluated_key,
        }
    }
}

#[tokio_main]
async fn main() -> Result<(), Error> {
    let store: Arc<dyn DocumentStore> = Arc::new(DynamoDbStore::load_from_env().await?);
    let recorder = &RevisionRecorder::new(store);

    run_lambda!(move |event: LambdaEvent<Request>| async move {
        recorder
            .list_revisions(
                event.payload.role,
                &event.payload.unit_id,
                event.payload.page_token,
                event.payload.page_size,
            )
            .await
            .map(Response::from)
    })
}

#[cfg(test)]
mod tests {
    use crate::{Request, Response};
    use chrono::{TimeZone, Utc};
    use fleet_core::{ElementStatus, ResultsPage, Revision, Role};
    use serde_json::{from_str, to_string};
    use std::collections::BTreeMap;

    const UNIT_ID: &str = "unit-3";
    const PAGE_TOKEN: &str = "2024-03-01T12:00:00.000000Z|revision-1";

    fn revision() -> Revision {
        Revision {
            id: "revision-1".to_string(),
            unit_id: UNIT_ID.to_string(),
            inspectors: "Pérez".to_string(),
            observations: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            statuses: BTreeMap::from([
                ("e1".to_string(), ElementStatus::Operative),
                ("e2".to_string(), ElementStatus::Faulty),
                ("e3".to_string(), ElementStatus::Missing),
            ]),
        }
    }

    #[test]
    fn deserialize_request() {
        let input = format!(
            "{{\"role\":\"jefatura\",\"unitId\":\"{UNIT_ID}\",\"pageToken\":\"{PAGE_TOKEN}\",\"pageSize\":5}}"
        );
        let request: Request = from_str(&input).unwrap();

        assert_eq!(Role::Jefatura, request.role);
        assert_eq!(UNIT_ID, request.unit_id);
        assert_eq!(Some(PAGE_TOKEN.to_string()), request.page_token);
        assert_eq!(Some(5), request.page_size);
    }

    #[test]
    fn deserialize_request_no_page() {
        let input = format!("{{\"role\":\"admin\",\"unitId\":\"{UNIT_ID}\"}}");
        let request: Request = from_str(&input).unwrap();

        assert!(request.page_token.is_none());
        assert!(request.page_size.is_none());
    }

    #[test]
    fn serialize_response() {
        let output = to_string(&Response::from(ResultsPage {
            items: vec![revision()],
            last_evaluated_key: Some(PAGE_TOKEN.to_string()),
        }))
        .unwrap();

        assert!(output.contains("\"e2\":\"Con falla\""));
        assert!(output.contains("\"problems\":2"));
        assert!(output.contains(&format!("\"pageToken\":\"{PAGE_TOKEN}\"")));
    }

    #[test]
    fn serialize_response_no_page() {
        let output = to_string(&Response::from(ResultsPage {
            items: vec![],
            last_evaluated_key: None,
        }))
        .unwrap();

        assert_eq!("{\"revisions\":[]}", output);
    }
}
