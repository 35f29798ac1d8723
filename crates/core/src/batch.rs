//! Wire types for the LFS Batch API (`application/vnd.git-lfs+json`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::oid::Oid;

/// The intent a client declares when negotiating a batch.
///
/// Operations outside the closed set parse into [`Operation::Unknown`] so
/// the endpoint can answer 501 instead of failing JSON validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Upload,
    Download,
    #[serde(other)]
    Unknown,
}

/// One object a client intends to transfer: its id and declared size.
///
/// Also the body of the `verify` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub oid: Oid,
    pub size: u64,
}

/// The parsed body of a `POST …/info/lfs/objects/batch` request.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub operation: Operation,
    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
}

/// A single planned transfer: where to send the request and how to
/// authenticate it.
#[derive(Debug, Clone, Serialize)]
pub struct ActionPlan {
    /// Absolute transfer URL.
    pub href: String,
    /// Headers the client must attach, including `Authorization`.
    pub header: BTreeMap<String, String>,
    /// When the embedded credentials stop working.
    pub expires_at: DateTime<Utc>,
}

/// The per-operation action plans for one object.
///
/// Serialization omits absent entries, so an upload plan renders as
/// `{"upload": …, "verify": …}` and a download plan as `{"download": …}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlannedActions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<ActionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<ActionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<ActionPlan>,
}

/// A per-object failure inside an otherwise successful batch response.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectError {
    pub code: u16,
    pub message: String,
}

impl ObjectError {
    /// The canonical "object does not exist" entry for download misses.
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            code: 404,
            message: "Object does not exist".to_owned(),
        }
    }
}

/// One entry of the batch response's `objects` array.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectPlan {
    pub oid: Oid,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<PlannedActions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ObjectError>,
}

impl ObjectPlan {
    /// An object that needs no client action (already present on upload).
    #[must_use]
    pub fn already_present(spec: &ObjectSpec) -> Self {
        Self {
            oid: spec.oid.clone(),
            size: spec.size,
            actions: None,
            error: None,
        }
    }

    /// An object with planned transfer actions.
    #[must_use]
    pub fn with_actions(spec: &ObjectSpec, actions: PlannedActions) -> Self {
        Self {
            oid: spec.oid.clone(),
            size: spec.size,
            actions: Some(actions),
            error: None,
        }
    }

    /// An object that failed individually (e.g. download of a missing blob).
    #[must_use]
    pub fn with_error(spec: &ObjectSpec, error: ObjectError) -> Self {
        Self {
            oid: spec.oid.clone(),
            size: spec.size,
            actions: None,
            error: Some(error),
        }
    }
}

/// The body of a successful batch response.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    /// Always `"basic"`: the only transfer adapter this service speaks.
    pub transfer: &'static str,
    pub objects: Vec<ObjectPlan>,
}

impl BatchResponse {
    #[must_use]
    pub fn basic(objects: Vec<ObjectPlan>) -> Self {
        Self {
            transfer: "basic",
            objects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn spec() -> ObjectSpec {
        ObjectSpec {
            oid: Oid::new(SAMPLE).unwrap(),
            size: 100,
        }
    }

    #[test]
    fn unknown_operation_parses() {
        let req: BatchRequest =
            serde_json::from_str(r#"{"operation":"archive","objects":[]}"#).unwrap();
        assert_eq!(req.operation, Operation::Unknown);
    }

    #[test]
    fn request_objects_default_to_empty() {
        let req: BatchRequest = serde_json::from_str(r#"{"operation":"upload"}"#).unwrap();
        assert!(req.objects.is_empty());
    }

    #[test]
    fn already_present_omits_actions_and_error() {
        let json = serde_json::to_value(ObjectPlan::already_present(&spec())).unwrap();
        assert_eq!(json["oid"], SAMPLE);
        assert_eq!(json["size"], 100);
        assert!(json.get("actions").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_entry_carries_404() {
        let json =
            serde_json::to_value(ObjectPlan::with_error(&spec(), ObjectError::not_found())).unwrap();
        assert_eq!(json["error"]["code"], 404);
        assert_eq!(json["error"]["message"], "Object does not exist");
        assert!(json.get("actions").is_none());
    }

    #[test]
    fn planned_actions_skip_absent_entries() {
        let plan = ActionPlan {
            href: "https://example.com/org/p/info/lfs/objects/download?oid=x&size=1".to_owned(),
            header: BTreeMap::from([("Authorization".to_owned(), "Basic Zm9v".to_owned())]),
            expires_at: Utc::now(),
        };
        let actions = PlannedActions {
            download: Some(plan),
            ..PlannedActions::default()
        };
        let json = serde_json::to_value(ObjectPlan::with_actions(&spec(), actions)).unwrap();
        assert!(json["actions"].get("download").is_some());
        assert!(json["actions"].get("upload").is_none());
        assert!(json["actions"].get("verify").is_none());
    }

    #[test]
    fn batch_response_names_basic_transfer() {
        let json = serde_json::to_value(BatchResponse::basic(vec![])).unwrap();
        assert_eq!(json["transfer"], "basic");
        assert!(json["objects"].as_array().unwrap().is_empty());
    }
}
