//! HTTP Gateway
//!
//! reqwest-backed implementation of the server ports.

use std::time::Duration;

use kernel::id::SessionId;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::application::config::CheckinConfig;
use crate::domain::entities::{
    DeviceStatus, DisplayedCode, RotatedCode, Session, Submission, SubmissionReceipt,
};
use crate::domain::repository::{AttendanceRepository, DeviceRepository, SessionRepository};
use crate::domain::value_objects::{DeviceId, ImageArtifact};
use crate::error::{CheckinError, CheckinResult};
use crate::presentation::dto::{
    ActiveSessionResponse, BindResponse, CodeDisplayResponse, DeviceStatusResponse,
    EnrollFaceResponse, ErrorBody, RotateResponse, SubmitResponse,
};

/// Attendance server client for both roles
#[derive(Clone)]
pub struct HttpCheckinApi {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpCheckinApi {
    pub fn new(config: &CheckinConfig) -> CheckinResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &CheckinConfig) -> Self {
        Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> CheckinResult<T> {
        let response = builder.send().await?;
        read_json(response).await
    }
}

/// Decode a success body, or turn an error body into a [`CheckinError`]
async fn read_json<T: DeserializeOwned>(response: Response) -> CheckinResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, status = status.as_u16(), "Unexpected response body");
            CheckinError::Internal(format!("Unexpected response from server: {e}"))
        });
    }

    let detail = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });
    Err(CheckinError::from_server(status.as_u16(), detail))
}

fn image_part(image: &ImageArtifact) -> CheckinResult<Part> {
    Ok(Part::bytes(image.bytes().to_vec())
        .file_name(image.file_name().to_string())
        .mime_str(image.content_type())?)
}

impl DeviceRepository for HttpCheckinApi {
    async fn status(&self) -> CheckinResult<DeviceStatus> {
        let dto: DeviceStatusResponse = self
            .send(self.request(Method::GET, "/student/device/status"))
            .await?;
        Ok(dto.into())
    }

    async fn bind(&self, device_id: &DeviceId) -> CheckinResult<()> {
        let dto: BindResponse = self
            .send(
                self.request(Method::POST, "/student/device/bind")
                    .query(&[("device_id", device_id.as_str())]),
            )
            .await?;
        tracing::info!(
            device = %device_id.fingerprint(),
            status = ?dto.status,
            "Device bound"
        );
        Ok(())
    }

    async fn enroll_face(&self, image: &ImageArtifact) -> CheckinResult<()> {
        let form = Form::new().part("file", image_part(image)?);
        let dto: EnrollFaceResponse = self
            .send(self.request(Method::POST, "/student/enroll-face").multipart(form))
            .await?;
        tracing::info!(message = ?dto.message, "Reference face uploaded");
        Ok(())
    }
}

impl SessionRepository for HttpCheckinApi {
    async fn active_sessions(&self) -> CheckinResult<Vec<Session>> {
        let dtos: Vec<ActiveSessionResponse> = self
            .send(self.request(Method::GET, "/student/sessions/active"))
            .await?;
        Ok(dtos.into_iter().map(Session::from).collect())
    }

    async fn display_code(&self, session_id: SessionId) -> CheckinResult<DisplayedCode> {
        let dto: CodeDisplayResponse = self
            .send(self.request(Method::GET, &format!("/lecturer/qr/{session_id}/display")))
            .await?;
        Ok(dto.into())
    }

    async fn rotate_code(
        &self,
        session_id: SessionId,
        ttl: Duration,
    ) -> CheckinResult<RotatedCode> {
        let dto: RotateResponse = self
            .send(
                self.request(
                    Method::POST,
                    &format!("/lecturer/sessions/{session_id}/qr/rotate"),
                )
                .query(&[("ttl_seconds", ttl.as_secs().max(1))]),
            )
            .await?;
        dto.try_into()
    }
}

impl AttendanceRepository for HttpCheckinApi {
    async fn submit(&self, submission: &Submission) -> CheckinResult<SubmissionReceipt> {
        let form = Form::new()
            .text("qr_session_id", submission.session_id.to_string())
            .text("qr_nonce", submission.nonce.as_str().to_string())
            .text("latitude", submission.location.latitude().to_string())
            .text("longitude", submission.location.longitude().to_string())
            .text("device_id", submission.device_id.as_str().to_string())
            .part("selfie", image_part(&submission.selfie)?);

        let dto: SubmitResponse = self
            .send(self.request(Method::POST, "/student/attendance").multipart(form))
            .await?;
        Ok(dto.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_dropped() {
        let config = CheckinConfig {
            api_base_url: "https://attendance.example.edu/api/v1/".to_string(),
            ..CheckinConfig::default()
        };
        let api = HttpCheckinApi::with_client(Client::new(), &config);
        assert_eq!(
            api.url("/student/device/status"),
            "https://attendance.example.edu/api/v1/student/device/status"
        );
    }

    #[test]
    fn test_image_part_accepts_known_content_types() {
        let image = ImageArtifact::new("selfie.png", vec![0x89, 0x50]).unwrap();
        assert!(image_part(&image).is_ok());
    }
}
