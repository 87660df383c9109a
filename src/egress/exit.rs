//! Exit address lookup through the egress

use super::EgressError;
use reqwest::{Client, Proxy};
use std::time::Duration;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Asks `check_url` which address the egress currently exits from
///
/// The endpoint must answer with a JSON object carrying an `IP` string, as
/// `https://check.torproject.org/api/ip` does.
pub async fn exit_address(proxy: &str, check_url: &str) -> Result<String, EgressError> {
    let client = Client::builder()
        .proxy(Proxy::all(proxy).map_err(|e| EgressError::ExitCheck(e.to_string()))?)
        .timeout(CHECK_TIMEOUT)
        .build()
        .map_err(|e| EgressError::ExitCheck(e.to_string()))?;

    let body = client
        .get(check_url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| EgressError::ExitCheck(e.to_string()))?
        .text()
        .await
        .map_err(|e| EgressError::ExitCheck(e.to_string()))?;

    let reply: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| EgressError::ExitCheck(e.to_string()))?;

    reply
        .get("IP")
        .and_then(|ip| ip.as_str())
        .map(str::to_string)
        .ok_or_else(|| EgressError::ExitCheck(format!("no IP in reply: {}", reply)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // The mock server stands in for the egress proxy
    const CHECK_URL: &str = "http://ipcheck.invalid/api/ip";

    #[tokio::test]
    async fn test_reads_exit_address() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"IsTor": true, "IP": "185.220.101.4"})),
            )
            .expect(1)
            .mount(&proxy)
            .await;

        let address = exit_address(&proxy.uri(), CHECK_URL).await.unwrap();
        assert_eq!(address, "185.220.101.4");
    }

    #[tokio::test]
    async fn test_reply_without_address_is_an_error() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"IsTor": false})))
            .mount(&proxy)
            .await;

        let result = exit_address(&proxy.uri(), CHECK_URL).await;
        assert!(matches!(result, Err(EgressError::ExitCheck(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_an_error() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&proxy)
            .await;

        let result = exit_address(&proxy.uri(), CHECK_URL).await;
        assert!(matches!(result, Err(EgressError::ExitCheck(_))));
    }
}
