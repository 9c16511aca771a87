// Pairing server endpoint and connect URL construction

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConnectionError;

/// Scheme + host of a pairing server, chosen by deployment profile
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
}

impl Endpoint {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    /// `<scheme>://<host>/ws?id=<identity-or-empty>&name=<name>&interests=<json-array>`
    pub fn connect_url(
        &self,
        identity_hint: Option<&str>,
        display_name: &str,
        interests: &[String],
    ) -> Result<Url, ConnectionError> {
        let mut url = Url::parse(&format!("{}://{}/ws", self.scheme, self.host))
            .map_err(|e| ConnectionError::InvalidEndpoint(format!("{}://{}: {}", self.scheme, self.host, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        // A Vec<String> always serializes
        let interests_json = serde_json::to_string(interests).unwrap_or_else(|_| "[]".to_string());
        url.query_pairs_mut()
            .append_pair("id", identity_hint.unwrap_or(""))
            .append_pair("name", display_name)
            .append_pair("interests", &interests_json);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_connect_has_empty_identity() {
        let endpoint = Endpoint::new("ws", "localhost:8080");
        let url = endpoint.connect_url(None, "Stranger", &[]).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8080/ws?id=&name=Stranger&interests=%5B%5D"
        );
    }

    #[test]
    fn test_reconnect_carries_identity_and_interests() {
        let endpoint = Endpoint::new("wss", "chat.example.net");
        let interests = vec!["board games".to_string(), "jazz".to_string()];
        let url = endpoint.connect_url(Some("a-1"), "Ann B", &interests).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://chat.example.net/ws?id=a-1&name=Ann+B\
             &interests=%5B%22board+games%22%2C%22jazz%22%5D"
        );

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[1], ("name".to_string(), "Ann B".to_string()));
        assert_eq!(pairs[2].1, r#"["board games","jazz"]"#);
    }

    #[test]
    fn test_query_values_are_escaped() {
        let endpoint = Endpoint::new("ws", "localhost:8080");
        let url = endpoint.connect_url(None, "é&=", &[]).unwrap();
        assert!(url.as_str().contains("name=%C3%A9%26%3D&"));
    }

    #[test]
    fn test_bad_endpoint_is_rejected() {
        let bad_host = Endpoint::new("wss", "exa mple.net");
        assert!(matches!(
            bad_host.connect_url(None, "ann", &[]),
            Err(ConnectionError::InvalidEndpoint(_))
        ));

        let http = Endpoint::new("http", "example.net");
        assert!(matches!(
            http.connect_url(None, "ann", &[]),
            Err(ConnectionError::InvalidEndpoint(_))
        ));
    }
}
