//! reqwest-backed CRM transport.
//!
//! GET requests carry their params and the caller's credentials in the query
//! string; everything else sends a JSON body with credentials in headers.
//! That split is decided by [`CrmRequest`]; this module only moves bytes.

use std::time::Duration;

use async_trait::async_trait;
use coachline_agent::dispatch::{CrmRequest, CrmResponse, CrmTransport, TransportError};
use coachline_core::config::CrmConfig;
use coachline_core::endpoints::HttpMethod;
use reqwest::{header::CONTENT_TYPE, Client};

#[derive(Clone, Debug)]
pub struct HttpCrmTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpCrmTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &CrmConfig) -> Self {
        Self::new(config.base_url.trim(), Duration::from_secs(config.timeout_secs))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl CrmTransport for HttpCrmTransport {
    async fn send(&self, request: CrmRequest) -> Result<CrmResponse, TransportError> {
        let url = self.url(&request.path);
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&url).query(&request.query_pairs()),
            HttpMethod::Post => {
                let mut builder = self.client.post(&url);
                for (name, value) in request.auth_headers() {
                    builder = builder.header(name, value);
                }
                match request.json_body() {
                    Some(body) => builder.json(&body),
                    None => builder,
                }
            }
        };

        let response = builder.timeout(self.timeout).send().await.map_err(|error| {
            if error.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Failed(error.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|error| {
            if error.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Failed(format!("failed to read crm response body: {error}"))
            }
        })?;

        Ok(CrmResponse { status, content_type, body })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coachline_agent::dispatch::{
        CrmRequest, CrmTransport, TransportError, API_KEY_HEADER, API_SECRET_HEADER,
    };
    use coachline_core::endpoints::HttpMethod;
    use coachline_core::profile::CrmCredentials;
    use serde_json::{json, Map, Value};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::HttpCrmTransport;

    fn credentials() -> CrmCredentials {
        CrmCredentials {
            api_key: "key-1".to_string().into(),
            api_secret: "secret-1".to_string().into(),
        }
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn get_sends_params_and_credentials_in_the_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contacts/search"))
            .and(query_param("search", "Acme"))
            .and(query_param("limit", "1"))
            .and(query_param("api_key", "key-1"))
            .and(query_param("api_secret", "secret-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": [{"contact_id": "C1"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpCrmTransport::new(format!("{}/", server.uri()), Duration::from_secs(5));
        let response = transport
            .send(CrmRequest {
                method: HttpMethod::Get,
                path: "/contacts/search".to_string(),
                params: params(json!({"search": "Acme", "limit": 1})),
                credentials: credentials(),
            })
            .await
            .expect("response");

        assert_eq!(response.status, 200);
        assert!(response.content_type.as_deref().unwrap_or_default().contains("json"));
        assert!(response.body.contains("C1"));
    }

    #[tokio::test]
    async fn post_sends_json_body_and_credential_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .and(header(API_KEY_HEADER, "key-1"))
            .and(header(API_SECRET_HEADER, "secret-1"))
            .and(body_json(json!({"contact_id": "C1", "title": "Call back"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "T1"})))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpCrmTransport::new(server.uri(), Duration::from_secs(5));
        let response = transport
            .send(CrmRequest {
                method: HttpMethod::Post,
                path: "/tasks".to_string(),
                params: params(json!({"contact_id": "C1", "title": "Call back"})),
                credentials: credentials(),
            })
            .await
            .expect("response");

        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn non_success_status_is_passed_through_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad search"))
            .mount(&server)
            .await;

        let transport = HttpCrmTransport::new(server.uri(), Duration::from_secs(5));
        let response = transport
            .send(CrmRequest {
                method: HttpMethod::Get,
                path: "/contacts/search".to_string(),
                params: Map::new(),
                credentials: credentials(),
            })
            .await
            .expect("response");

        assert_eq!(response.status, 422);
        assert_eq!(response.body, "bad search");
    }

    #[tokio::test]
    async fn slow_crm_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = HttpCrmTransport::new(server.uri(), Duration::from_millis(50));
        let error = transport
            .send(CrmRequest {
                method: HttpMethod::Get,
                path: "/tasks".to_string(),
                params: Map::new(),
                credentials: credentials(),
            })
            .await
            .expect_err("timeout");

        assert!(matches!(error, TransportError::Timeout));
    }
}
