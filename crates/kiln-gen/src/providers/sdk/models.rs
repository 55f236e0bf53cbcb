//! Typed request and response models for the `ai3d` API

use serde::{Deserialize, Serialize};

/// An extra view image for multi-view reconstruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewImage {
    #[serde(rename = "View")]
    pub view: String,
    #[serde(rename = "ImageUrl")]
    pub image_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmitHunyuanTo3DProJobRequest {
    #[serde(rename = "Prompt", skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(rename = "ImageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(rename = "MultiViewImages", skip_serializing_if = "Vec::is_empty")]
    pub multi_view_images: Vec<ViewImage>,
    #[serde(rename = "EnablePBR", skip_serializing_if = "Option::is_none")]
    pub enable_pbr: Option<bool>,
    #[serde(rename = "FaceCount", skip_serializing_if = "Option::is_none")]
    pub face_count: Option<u32>,
    #[serde(rename = "GenerateType", skip_serializing_if = "Option::is_none")]
    pub generate_type: Option<String>,
    #[serde(rename = "PolygonType", skip_serializing_if = "Option::is_none")]
    pub polygon_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubmitHunyuanTo3DProJobResponse {
    #[serde(rename = "JobId", default)]
    pub job_id: Option<String>,
    #[serde(rename = "RequestId", default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryHunyuanTo3DProJobRequest {
    #[serde(rename = "JobId")]
    pub job_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct File3D {
    #[serde(rename = "Type", default)]
    pub file_type: Option<String>,
    #[serde(rename = "Url", default)]
    pub url: Option<String>,
    #[serde(rename = "PreviewImageUrl", default)]
    pub preview_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QueryHunyuanTo3DProJobResponse {
    /// WAIT, RUN, DONE or FAIL
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: Option<String>,
    #[serde(rename = "ErrorMessage", default)]
    pub error_message: Option<String>,
    /// Null until the job is done
    #[serde(rename = "ResultFile3Ds", default)]
    pub result_file_3ds: Option<Vec<File3D>>,
    #[serde(rename = "RequestId", default)]
    pub request_id: Option<String>,
}

/// `Response.Error`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "Code", default)]
    pub code: String,
    #[serde(rename = "Message", default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_request_skips_unset_fields() {
        let request = SubmitHunyuanTo3DProJobRequest {
            prompt: Some("a lantern".into()),
            face_count: Some(40_000),
            ..Default::default()
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"Prompt": "a lantern", "FaceCount": 40000}));
    }

    #[test]
    fn test_query_response_parses_result_files() {
        let response: QueryHunyuanTo3DProJobResponse = serde_json::from_str(
            r#"{
                "Status": "DONE",
                "ResultFile3Ds": [{"Type": "OBJ", "Url": "https://cdn.example.com/m.zip"}],
                "RequestId": "r-1"
            }"#,
        )
        .unwrap();
        assert_eq!(response.status.as_deref(), Some("DONE"));
        let files = response.result_file_3ds.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].preview_image_url, None);
        assert_eq!(response.request_id.as_deref(), Some("r-1"));
    }

    #[test]
    fn test_query_response_tolerates_nulls() {
        let response: QueryHunyuanTo3DProJobResponse =
            serde_json::from_str(r#"{"Status": "RUN", "ResultFile3Ds": null, "ErrorCode": null}"#)
                .unwrap();
        assert_eq!(response.status.as_deref(), Some("RUN"));
        assert!(response.result_file_3ds.is_none());
    }
}
