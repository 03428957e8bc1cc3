use axum::{
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
    Form, Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::Validate;

/// Validated request body, decoded as urlencoded form data when the client
/// says so and as JSON otherwise. Every rejection becomes an `AppError`.
pub struct ValidatedBody<T>(pub T);

fn is_form(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedBody<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let value = if is_form(&req) {
            let Form(value) = Form::<T>::from_request(req, state).await.map_err(|e| {
                AppError::BadRequest(anyhow::anyhow!("Form parse error: {}", e.body_text()))
            })?;
            value
        } else {
            let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
                AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e.body_text()))
            })?;
            value
        };

        value.validate()?;
        Ok(ValidatedBody(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtos::CreatePaymentRequest;
    use axum::{body::Body, http::StatusCode, response::IntoResponse};

    async fn extract(content_type: &str, body: &str) -> Result<CreatePaymentRequest, AppError> {
        let req = Request::builder()
            .method("POST")
            .uri("/create-payment")
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap();
        ValidatedBody::<CreatePaymentRequest>::from_request(req, &())
            .await
            .map(|ValidatedBody(value)| value)
    }

    #[tokio::test]
    async fn test_form_body() {
        let req = extract(
            "application/x-www-form-urlencoded",
            "name=Olena&email=olena%40example.com&course=solo",
        )
        .await
        .unwrap();
        assert_eq!(req.name, "Olena");
        assert_eq!(req.product, "solo");
    }

    #[tokio::test]
    async fn test_json_body() {
        let req = extract(
            "application/json",
            r#"{"name":"Olena","email":"olena@example.com","product":"support"}"#,
        )
        .await
        .unwrap();
        assert_eq!(req.product, "support");
    }

    #[tokio::test]
    async fn test_wrong_type_is_bad_request() {
        let err = extract("application/json", r#"{"name":5}"#).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_content_type_is_bad_request() {
        let err = extract("text/plain", "name=Olena").await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_form_fields_are_unprocessable() {
        let err = extract("application/x-www-form-urlencoded", "name=A&email=x&course=gold")
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
