/// Generated gRPC protocol definitions for remote backend plugins.
///
/// This crate provides the protocol buffer definitions and generated code
/// spoken between the plugin host and out-of-process plugins: the `Data`,
/// `Diagnostics`, `Resource` and `Stream` services, with client and server
/// stubs for each.
pub mod pluginv2 {
    tonic::include_proto!("pluginv2");
}

// Re-export commonly used types for convenience
pub use pluginv2::check_health_response::HealthStatus;
pub use pluginv2::data_client::DataClient;
pub use pluginv2::diagnostics_client::DiagnosticsClient;
pub use pluginv2::publish_stream_response::Status as PublishStreamStatus;
pub use pluginv2::resource_client::ResourceClient;
pub use pluginv2::stream_client::StreamClient;
pub use pluginv2::subscribe_stream_response::Status as SubscribeStreamStatus;
pub use pluginv2::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_health_status_falls_back_to_default() {
        let response = CheckHealthResponse {
            status: 42,
            message: String::new(),
            json_details: Vec::new(),
        };

        assert_eq!(response.status(), HealthStatus::Unknown);
    }

    #[test]
    fn test_health_status_names() {
        assert_eq!(HealthStatus::Ok.as_str_name(), "OK");
        assert_eq!(HealthStatus::Error.as_str_name(), "ERROR");
        assert_eq!(HealthStatus::try_from(1).ok(), Some(HealthStatus::Ok));
    }

    #[test]
    fn test_stream_status_variants() {
        assert_eq!(SubscribeStreamStatus::NotFound.as_str_name(), "NOT_FOUND");
        assert_eq!(PublishStreamStatus::default(), PublishStreamStatus::Ok);
    }
}
