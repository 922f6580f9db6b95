//! HTTP implementation of the backend traits.
//!
//! Speaks the hosted service's REST dialect:
//!
//! | Operation            | Request                                           |
//! |----------------------|---------------------------------------------------|
//! | password sign-in     | `POST /auth/v1/token?grant_type=password`         |
//! | token refresh        | `POST /auth/v1/token?grant_type=refresh_token`    |
//! | sign-up              | `POST /auth/v1/signup`                            |
//! | sign-out             | `POST /auth/v1/logout`                            |
//! | current user         | `GET  /auth/v1/user`                              |
//! | role lookup          | `GET  /rest/v1/user_roles?id=eq.<id>&select=role` |
//! | license class lookup | `GET  /rest/v1/license_types?name_en=ilike.<c>`   |
//! | driver registration  | `POST /rest/v1/drivers?on_conflict=id`            |
//! | vehicle registration | `POST /rest/v1/vehicles?on_conflict=driver_id`    |
//!
//! Every request carries the public `apikey` header; authenticated ones add
//! the bearer token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tokio::sync::broadcast;

use roadlink_auth::{
    AuthEvent, AuthEvents, AuthProvider, BackendError, BearerToken, Credentials, RemoteSession,
    RemoteUser, RoleDirectory, SignUpOutcome,
};
use roadlink_core::UserId;
use roadlink_onboarding::{DriverRecord, DriverRegistry};

use crate::ClientConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend client over HTTP.
///
/// Clones share the connection pool and the event channel.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    events: broadcast::Sender<AuthEvent>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            events,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, BackendError> {
        Self::new(config.backend_url.clone(), config.anon_key.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
    }

    fn authed(&self, method: Method, path: &str, token: &BearerToken) -> RequestBuilder {
        self.request(method, path).bearer_auth(token.expose())
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    /// Numeric id of the license class named `class`.
    async fn license_type_id(&self, class: &str, token: &BearerToken) -> Result<i64, BackendError> {
        let path = format!(
            "/rest/v1/license_types?select=id&name_en=ilike.{}",
            urlencoding::encode(class)
        );
        let resp = self
            .authed(Method::GET, &path, token)
            .send()
            .await
            .map_err(transport_error)?;

        let rows: Vec<LicenseTypeRow> = read_json(resp).await?;
        rows.into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| BackendError::Api {
                status: 422,
                message: format!("unknown license class {class:?}"),
            })
    }

    /// Insert `row` into `table`, replacing the row that conflicts on
    /// `key`.
    async fn upsert<T: Serialize + Sync>(
        &self,
        table: &str,
        key: &str,
        row: &T,
        token: &BearerToken,
    ) -> Result<(), BackendError> {
        let resp = self
            .authed(Method::POST, &format!("/rest/v1/{table}?on_conflict={key}"), token)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await
            .map_err(transport_error)?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(error_from(resp).await)
        }
    }
}

impl core::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl AuthProvider for HttpBackend {
    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<RemoteSession, BackendError> {
        let resp = self
            .request(Method::POST, "/auth/v1/token?grant_type=password")
            .json(&json!({ "email": credentials.email, "password": credentials.password }))
            .send()
            .await
            .map_err(transport_error)?;

        // The service answers bad credentials with 400 (invalid_grant).
        if matches!(resp.status(), StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
            return Err(BackendError::InvalidCredentials);
        }

        let session = read_json::<SessionPayload>(resp).await?.into_session(Utc::now())?;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome, BackendError> {
        let resp = self
            .request(Method::POST, "/auth/v1/signup")
            .json(&json!({ "email": credentials.email, "password": credentials.password }))
            .send()
            .await
            .map_err(transport_error)?;

        let body: JsonValue = match read_json(resp).await {
            Err(BackendError::Api { message, .. })
                if message.to_lowercase().contains("already registered") =>
            {
                return Err(BackendError::AccountExists);
            }
            other => other?,
        };

        // With email confirmation enabled the response is the bare user (or a
        // session object without tokens).
        if body.get("access_token").and_then(JsonValue::as_str).is_none() {
            let user = body
                .get("user")
                .filter(|u| u.is_object())
                .cloned()
                .unwrap_or(body);
            return Ok(SignUpOutcome::ConfirmationRequired(remote_user(user)?));
        }

        let payload: SessionPayload =
            serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))?;
        let session = payload.into_session(Utc::now())?;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(SignUpOutcome::SignedIn(session))
    }

    async fn sign_out(&self, token: &BearerToken) -> Result<(), BackendError> {
        // Local state is already gone; announce it whatever the server says.
        self.emit(AuthEvent::SignedOut);

        let resp = self
            .authed(Method::POST, "/auth/v1/logout", token)
            .send()
            .await
            .map_err(transport_error)?;

        match resp.status() {
            // An already-invalid token is as signed out as it gets.
            s if s.is_success() || s == StatusCode::UNAUTHORIZED || s == StatusCode::FORBIDDEN => Ok(()),
            _ => Err(error_from(resp).await),
        }
    }

    async fn user_for_token(&self, token: &BearerToken) -> Result<RemoteUser, BackendError> {
        let resp = self
            .authed(Method::GET, "/auth/v1/user", token)
            .send()
            .await
            .map_err(transport_error)?;

        remote_user(read_json(resp).await?)
    }

    async fn refresh_session(&self, refresh_token: &BearerToken) -> Result<RemoteSession, BackendError> {
        let resp = self
            .request(Method::POST, "/auth/v1/token?grant_type=refresh_token")
            .json(&json!({ "refresh_token": refresh_token.expose() }))
            .send()
            .await
            .map_err(transport_error)?;

        // A used or revoked refresh token is answered with 400.
        if resp.status() == StatusCode::BAD_REQUEST {
            return Err(BackendError::Unauthorized);
        }

        let session = read_json::<SessionPayload>(resp).await?.into_session(Utc::now())?;
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    fn subscribe(&self) -> AuthEvents {
        self.events.subscribe()
    }
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    #[serde(default)]
    role: Option<String>,
}

#[async_trait::async_trait]
impl RoleDirectory for HttpBackend {
    async fn role_of(
        &self,
        user_id: &UserId,
        token: &BearerToken,
    ) -> Result<Option<String>, BackendError> {
        let path = format!(
            "/rest/v1/user_roles?id=eq.{}&select=role",
            urlencoding::encode(user_id.as_str())
        );
        let resp = self
            .authed(Method::GET, &path, token)
            .send()
            .await
            .map_err(transport_error)?;

        let rows: Vec<RoleRow> = read_json(resp).await?;
        Ok(rows.into_iter().next().and_then(|r| r.role))
    }
}

#[derive(Debug, Deserialize)]
struct LicenseTypeRow {
    id: i64,
}

/// Column layout of the `drivers` table.
#[derive(Debug, Serialize)]
struct DriverRow<'a> {
    id: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    date_of_birth: String,
    city: &'a str,
    address: &'a str,
    phone: &'a str,
    email: &'a str,
    license_number: &'a str,
    license_type: i64,
    license_expiry_date: String,
    is_verified: bool,
    updated_at: DateTime<Utc>,
}

impl<'a> DriverRow<'a> {
    fn new(record: &'a DriverRecord, license_type: i64) -> Self {
        let p = &record.profile.personal;
        let l = &record.profile.license;
        Self {
            id: record.user_id.as_str(),
            first_name: &p.first_name,
            last_name: &p.last_name,
            date_of_birth: p.date_of_birth.to_string(),
            city: &p.city,
            address: &p.address,
            phone: &p.phone_number,
            email: &p.email,
            license_number: &l.number,
            license_type,
            license_expiry_date: l.expiry.to_string(),
            is_verified: false,
            updated_at: record.registered_at,
        }
    }
}

/// Column layout of the `vehicles` table, one row per driver.
#[derive(Debug, Serialize)]
struct VehicleRow<'a> {
    driver_id: &'a str,
    vehicle_type: &'a str,
    make: &'a str,
    model: &'a str,
    year: u16,
    plate_number: &'a str,
    color: &'a str,
    capacity: f64,
    is_chilled: bool,
}

impl<'a> From<&'a DriverRecord> for VehicleRow<'a> {
    fn from(record: &'a DriverRecord) -> Self {
        let v = &record.profile.vehicle;
        Self {
            driver_id: record.user_id.as_str(),
            vehicle_type: &v.kind,
            make: &v.make,
            model: &v.model,
            year: v.year,
            plate_number: &v.plate,
            color: &v.color,
            capacity: v.capacity,
            is_chilled: v.is_chilled,
        }
    }
}

#[async_trait::async_trait]
impl DriverRegistry for HttpBackend {
    async fn register(&self, record: &DriverRecord, token: &BearerToken) -> Result<(), BackendError> {
        let license_type = self
            .license_type_id(&record.profile.license.class, token)
            .await?;

        self.upsert("drivers", "id", &DriverRow::new(record, license_type), token)
            .await?;
        self.upsert("vehicles", "driver_id", &VehicleRow::from(record), token)
            .await
    }
}

/// Session object returned by the token and sign-up endpoints.
#[derive(Debug, Deserialize)]
struct SessionPayload {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Absolute expiry, seconds since the epoch.
    #[serde(default)]
    expires_at: Option<i64>,
    /// Relative expiry, seconds.
    #[serde(default)]
    expires_in: Option<i64>,
    user: JsonValue,
}

impl SessionPayload {
    fn into_session(self, now: DateTime<Utc>) -> Result<RemoteSession, BackendError> {
        let access_token = BearerToken::new(self.access_token)
            .ok_or_else(|| BackendError::Decode("empty access token".to_string()))?;
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| now + chrono::Duration::seconds(secs)));

        Ok(RemoteSession {
            user: remote_user(self.user)?,
            access_token,
            refresh_token: self.refresh_token.and_then(BearerToken::new),
            expires_at,
        })
    }
}

fn remote_user(raw: JsonValue) -> Result<RemoteUser, BackendError> {
    let id = raw
        .get("id")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| BackendError::Decode("user object without id".to_string()))?;
    let id = UserId::new(id).map_err(|e| BackendError::Decode(e.to_string()))?;
    let email = raw
        .get("email")
        .and_then(JsonValue::as_str)
        .filter(|e| !e.is_empty())
        .map(String::from);

    Ok(RemoteUser { id, email, raw })
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Network(err.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
    if !resp.status().is_success() {
        return Err(error_from(resp).await);
    }
    resp.json()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

async fn error_from(resp: Response) -> BackendError {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return BackendError::Unauthorized;
    }

    let body = resp.text().await.unwrap_or_default();
    BackendError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    }
}

/// Human-readable message from an error body, whichever field the service
/// used for it.
fn error_message(body: &str) -> String {
    let parsed: Option<JsonValue> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            ["msg", "message", "error_description", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(JsonValue::as_str))
        })
        .map(String::from)
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_payload_prefers_absolute_expiry() {
        let now = Utc::now();
        let payload: SessionPayload = serde_json::from_value(json!({
            "access_token": "tok",
            "refresh_token": "ref",
            "expires_at": 1_900_000_000,
            "expires_in": 3600,
            "user": { "id": "u1", "email": "u1@example.com" }
        }))
        .unwrap();

        let session = payload.into_session(now).unwrap();
        assert_eq!(session.expires_at, DateTime::from_timestamp(1_900_000_000, 0));
        assert_eq!(session.user.email.as_deref(), Some("u1@example.com"));
        assert_eq!(session.refresh_token.as_ref().map(|t| t.expose()), Some("ref"));
    }

    #[test]
    fn session_payload_falls_back_to_relative_expiry() {
        let now = Utc::now();
        let payload: SessionPayload = serde_json::from_value(json!({
            "access_token": "tok",
            "expires_in": 60,
            "user": { "id": "u1" }
        }))
        .unwrap();

        let session = payload.into_session(now).unwrap();
        assert_eq!(session.expires_at, Some(now + chrono::Duration::seconds(60)));
        assert!(session.refresh_token.is_none());
        assert_eq!(session.user.email, None);
    }

    #[test]
    fn user_without_id_is_a_decode_error() {
        assert!(matches!(remote_user(json!({ "email": "x@y.z" })), Err(BackendError::Decode(_))));
        assert!(matches!(remote_user(json!({ "id": "  " })), Err(BackendError::Decode(_))));
    }

    #[test]
    fn error_messages() {
        assert_eq!(error_message(r#"{"msg":"User already registered"}"#), "User already registered");
        assert_eq!(error_message(r#"{"error":"invalid_grant","error_description":"bad"}"#), "bad");
        assert_eq!(error_message("  gateway down "), "gateway down");
    }

    #[test]
    fn driver_rows_split_personal_and_vehicle_columns() {
        let record: DriverRecord = serde_json::from_value(json!({
            "user_id": "d1",
            "personal": {
                "firstName": "Rana", "lastName": "Khalil", "email": "rana@roadlink.sy",
                "phoneNumber": "0944123456", "dateOfBirth": "1988-11-02",
                "address": "Bab Touma", "city": "Damascus"
            },
            "license": { "number": "SY-1", "expiry": "2028-01-31", "class": "C" },
            "vehicle": {
                "type": "Van", "make": "Kia", "model": "K2700", "year": 2019,
                "plate": "DAM-1", "color": "White", "capacity": 2.5, "isChilled": false
            },
            "registered_at": "2025-06-01T10:00:00Z"
        }))
        .unwrap();

        let driver = serde_json::to_value(DriverRow::new(&record, 3)).unwrap();
        assert_eq!(driver["id"], "d1");
        assert_eq!(driver["license_type"], 3);
        assert_eq!(driver["date_of_birth"], "1988-11-02");
        assert_eq!(driver["is_verified"], false);
        assert!(driver.get("make").is_none());

        let vehicle = serde_json::to_value(VehicleRow::from(&record)).unwrap();
        assert_eq!(vehicle["driver_id"], "d1");
        assert_eq!(vehicle["plate_number"], "DAM-1");
        assert_eq!(vehicle["year"], 2019);
    }
}
