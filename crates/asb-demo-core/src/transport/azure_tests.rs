//! Tests for the Azure Service Bus REST provider.
//!
//! Wire behaviour is checked against a wiremock server standing in for the
//! namespace endpoint; the connection string points at it over plain HTTP.

use super::*;
use chrono::TimeZone;
use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_CONNECTION: &str = "Endpoint=sb://test.servicebus.windows.net/;SharedAccessKeyName=test;SharedAccessKey=dGVzdA==";

fn connection_for(server: &MockServer) -> String {
    format!(
        "Endpoint={}/;SharedAccessKeyName=test;SharedAccessKey=dGVzdA==",
        server.uri()
    )
}

fn sample_envelope() -> OutboundEnvelope {
    OutboundEnvelope {
        body: json!("{\"kind\":\"Test\",\"message\":\"hello\",\"retries\":0}"),
        content_type: "application/json".to_string(),
        correlation_id: "corr-1".to_string(),
        message_id: "msg-1".to_string(),
        subject: Some("test01".to_string()),
        application_properties: Some([("p1".to_string(), "prop1".to_string())].into_iter().collect()),
        scheduled_enqueue_time_utc: Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap()),
    }
}

// ============================================================================
// Connection String Tests
// ============================================================================

mod connection_string_tests {
    use super::*;

    #[test]
    fn test_parse_namespace_connection_string() {
        let parsed = ConnectionString::parse(TEST_CONNECTION).unwrap();

        assert_eq!(
            parsed.endpoint.as_str(),
            "https://test.servicebus.windows.net/"
        );
        assert_eq!(parsed.key_name, "test");
        assert_eq!(parsed.key, "dGVzdA==", "values keep embedded '=' characters");
        assert_eq!(parsed.entity_path, None);
    }

    #[test]
    fn test_parse_is_case_insensitive_and_reads_entity_path() {
        let parsed = ConnectionString::parse(
            "endpoint=sb://ns.servicebus.windows.net;sharedaccesskeyname=k;sharedaccesskey=v;EntityPath=orders;",
        )
        .unwrap();

        assert_eq!(parsed.endpoint.as_str(), "https://ns.servicebus.windows.net/");
        assert_eq!(parsed.entity_path.as_deref(), Some("orders"));
    }

    #[test]
    fn test_parse_keeps_http_endpoint() {
        let parsed = ConnectionString::parse(
            "Endpoint=http://localhost:5672;SharedAccessKeyName=k;SharedAccessKey=v",
        )
        .unwrap();
        assert_eq!(parsed.endpoint.as_str(), "http://localhost:5672/");
        assert_eq!(parsed.resource_uri("q"), "http://localhost:5672/q");
    }

    #[test]
    fn test_signed_resource_matches_request_path() {
        let parsed = ConnectionString::parse(TEST_CONNECTION).unwrap();

        let resource = parsed.resource_uri("orders/eu west");
        assert_eq!(
            resource,
            "https://test.servicebus.windows.net/orders%2Feu%20west"
        );

        let url = parsed.entity_url("orders/eu west", "messages").unwrap();
        assert_eq!(url.as_str(), format!("{}/messages", resource));
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        let cases = [
            "SharedAccessKeyName=k;SharedAccessKey=v",
            "Endpoint=sb://x/;SharedAccessKey=v",
            "Endpoint=sb://x/;SharedAccessKeyName=k",
            "Endpoint=sb://x/;SharedAccessKeyName=k;SharedAccessKey=",
            "Endpoint=sb://x;...",
        ];

        for case in cases {
            let result = ConnectionString::parse(case);
            assert!(
                matches!(result, Err(TransportError::InvalidConnectionString { .. })),
                "'{}' should be rejected",
                case
            );
        }
    }

    #[test]
    fn test_parse_rejects_unsupported_scheme() {
        let result =
            ConnectionString::parse("Endpoint=amqp://x/;SharedAccessKeyName=k;SharedAccessKey=v");
        assert!(matches!(
            result,
            Err(TransportError::InvalidConnectionString { .. })
        ));
    }
}

// ============================================================================
// Shared Access Signature Tests
// ============================================================================

mod signature_tests {
    use super::*;

    fn field<'a>(token: &'a str, name: &str) -> &'a str {
        token
            .trim_start_matches("SharedAccessSignature ")
            .split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{}=", name)))
            .unwrap_or_else(|| panic!("token has no '{}' field", name))
    }

    #[test]
    fn test_token_shape() {
        let signer = SasSigner::new(
            "RootManageSharedAccessKey".to_string(),
            "secret".to_string(),
            chrono::Duration::hours(1),
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let token = signer
            .token("https://ns.servicebus.windows.net/orders", now)
            .unwrap();

        assert!(token.starts_with("SharedAccessSignature "));
        assert_eq!(
            field(&token, "sr"),
            "https%3A%2F%2Fns.servicebus.windows.net%2Forders"
        );
        assert_eq!(field(&token, "se"), (now.timestamp() + 3600).to_string());
        assert_eq!(field(&token, "skn"), "RootManageSharedAccessKey");
    }

    #[test]
    fn test_token_signature_verifies_against_key() {
        let signer = SasSigner::new(
            "test".to_string(),
            "secret".to_string(),
            chrono::Duration::minutes(5),
        );
        let now = Utc::now();
        let token = signer.token("https://ns/q", now).unwrap();

        let sig = urlencoding::decode(field(&token, "sig")).unwrap();
        let raw = STANDARD.decode(sig.as_bytes()).unwrap();

        let expected_input = format!("{}\n{}", field(&token, "sr"), field(&token, "se"));
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(expected_input.as_bytes());
        assert!(mac.verify_slice(&raw).is_ok());
    }
}

// ============================================================================
// Broker Properties Tests
// ============================================================================

mod broker_properties_tests {
    use super::*;

    #[test]
    fn test_broker_properties_from_envelope() {
        let props = BrokerProperties::from_envelope(&sample_envelope());
        let value = serde_json::to_value(&props).unwrap();

        assert_eq!(value["MessageId"], "msg-1");
        assert_eq!(value["CorrelationId"], "corr-1");
        assert_eq!(value["Label"], "test01");
        assert_eq!(
            value["ScheduledEnqueueTimeUtc"],
            "Wed, 02 Jan 2030 03:04:05 GMT"
        );
        assert!(value.get("DeliveryCount").is_none());
    }

    #[test]
    fn test_rfc1123_round_trip() {
        let at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let text = at.format(RFC1123_FORMAT).to_string();
        assert_eq!(parse_rfc1123(&text), Some(at));
        assert_eq!(parse_rfc1123("yesterday"), None);
    }
}

// ============================================================================
// HTTP Operation Tests
// ============================================================================

mod operation_tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_invalid_connection_string() {
        let transport = AzureServiceBusTransport::new();
        let result = transport.connect("Endpoint=sb://x;...", "test").await;
        assert!(matches!(
            result,
            Err(TransportError::InvalidConnectionString { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_posts_envelope() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/testqueue/messages"))
            .and(header("Content-Type", "application/json"))
            .and(header("p1", "\"prop1\""))
            .and(header_exists("Authorization"))
            .and(header_exists("BrokerProperties"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = AzureServiceBusTransport::new();
        let client = transport
            .connect(&connection_for(&mock_server), "test")
            .await
            .unwrap();
        assert_eq!(client.identifier(), "test");

        let sender = client.create_sender("testqueue").await.unwrap();
        sender.send_message(&sample_envelope()).await.unwrap();
        sender.close().await.unwrap();
        client.close().await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        let request = &requests[0];

        let auth = request.headers.get("Authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("SharedAccessSignature sr="));
        assert!(auth.contains("&skn=test"));

        let broker: serde_json::Value = serde_json::from_str(
            request.headers.get("BrokerProperties").unwrap().to_str().unwrap(),
        )
        .unwrap();
        assert_eq!(broker["MessageId"], "msg-1");
        assert_eq!(broker["Label"], "test01");

        let body = String::from_utf8(request.body.clone()).unwrap();
        assert_eq!(body, "{\"kind\":\"Test\",\"message\":\"hello\",\"retries\":0}");
    }

    #[tokio::test]
    async fn test_send_maps_unauthorized() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/testqueue/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&mock_server)
            .await;

        let client = AzureServiceBusTransport::new()
            .connect(&connection_for(&mock_server), "test")
            .await
            .unwrap();
        let sender = client.create_sender("testqueue").await.unwrap();

        let result = sender.send_message(&sample_envelope()).await;
        match result {
            Err(TransportError::Authentication(message)) => assert_eq!(message, "bad token"),
            other => panic!("Expected Authentication error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_maps_missing_queue() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = AzureServiceBusTransport::new()
            .connect(&connection_for(&mock_server), "test")
            .await
            .unwrap();
        let sender = client.create_sender("nosuchqueue").await.unwrap();

        let result = sender.send_message(&sample_envelope()).await;
        assert!(matches!(result, Err(TransportError::QueueNotFound(q)) if q == "nosuchqueue"));
    }

    #[tokio::test]
    async fn test_receive_returns_message() {
        let mock_server = MockServer::start().await;

        let broker = json!({
            "MessageId": "msg-9",
            "CorrelationId": "corr-9",
            "Label": "greeting",
            "DeliveryCount": 2,
            "SequenceNumber": 42,
            "EnqueuedTimeUtc": "Wed, 02 Jan 2030 03:04:05 GMT"
        });

        Mock::given(method("DELETE"))
            .and(path("/testqueue/messages/head"))
            .and(query_param("timeout", "5"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("BrokerProperties", broker.to_string().as_str())
                    .insert_header("Content-Type", "application/json")
                    .set_body_string("{\"f1\":\"hello\"}"),
            )
            .mount(&mock_server)
            .await;

        let client = AzureServiceBusTransport::new()
            .connect(&connection_for(&mock_server), "test")
            .await
            .unwrap();
        let receiver = client.create_receiver("testqueue").await.unwrap();

        let message = receiver
            .receive_message(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("a message should be returned");

        assert_eq!(message.message_id, "msg-9");
        assert_eq!(message.correlation_id.as_deref(), Some("corr-9"));
        assert_eq!(message.subject.as_deref(), Some("greeting"));
        assert_eq!(message.delivery_count, 2);
        assert_eq!(message.sequence_number, Some(42));
        assert_eq!(
            message.enqueued_time_utc,
            Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap())
        );
        assert_eq!(message.body, "{\"f1\":\"hello\"}");
    }

    #[tokio::test]
    async fn test_receive_empty_queue() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/testqueue/messages/head"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let client = AzureServiceBusTransport::new()
            .connect(&connection_for(&mock_server), "test")
            .await
            .unwrap();
        let receiver = client.create_receiver("testqueue").await.unwrap();

        let message = receiver.receive_message(Duration::from_secs(1)).await.unwrap();
        assert!(message.is_none());
    }

    #[tokio::test]
    async fn test_receive_maps_service_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(503).set_body_string("server busy"))
            .mount(&mock_server)
            .await;

        let client = AzureServiceBusTransport::new()
            .connect(&connection_for(&mock_server), "test")
            .await
            .unwrap();
        let receiver = client.create_receiver("testqueue").await.unwrap();

        let result = receiver.receive_message(Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(TransportError::Service { status: 503, .. })
        ));
    }
}
