/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use fleet_core::{run_lambda, DocumentStore, DynamoDbStore, RevisionRecorder, Role};
use lambda_runtime::{Error, LambdaEvent};
use serde::Deserialize;
use std::sync::Arc;
use tokio::main as tokio_main;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    role: Role,
    revision_id: String,
}

#[tokio_main]
async fn main() -> Result<(), Error> {
    let store: Arc<dyn DocumentStore> = Arc::new(DynamoDbStore::load_from_env().await?);
    let recorder = &RevisionRecorder::new(store);

    run_lambda!(move |event: LambdaEvent<Request>| async move {
        recorder
            .delete_revision(event.payload.role, &event.payload.revision_id)
            .await
    })
}

#[cfg(test)]
mod tests {
    use crate::Request;
    use fleet_core::Role;
    use serde_json::from_str;

    const REVISION_ID: &str = "revision-1";

    #[test]
    fn deserialize_request() {
        let input = format!("{{\"role\":\"admin\",\"revisionId\":\"{REVISION_ID}\"}}");
        let request: Request = from_str(&input).unwrap();

        assert_eq!(Role::Admin, request.role);
        assert_eq!(REVISION_ID, request.revision_id);
    }

    #[test]
    fn deserialize_request_missing_role() {
        let input = format!("{{\"revisionId\":\"{REVISION_ID}\"}}");

        assert!(from_str::<Request>(&input).is_err());
    }
}
