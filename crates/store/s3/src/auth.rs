use aws_config::timeout::TimeoutConfig;
use tracing::{debug, info};

use crate::config::S3StoreConfig;

/// Build an S3 client from the given [`S3StoreConfig`].
///
/// Credentials come from the standard AWS environment chain. When
/// `role_arn` is set the role is assumed via STS with automatic refresh.
pub async fn build_client(config: &S3StoreConfig) -> aws_sdk_s3::Client {
    let region = aws_config::Region::new(config.region.clone());
    let timeouts = TimeoutConfig::builder()
        .operation_timeout(config.operation_timeout())
        .build();

    let mut loader = aws_config::from_env()
        .region(region.clone())
        .timeout_config(timeouts.clone());

    if let Some(endpoint) = &config.endpoint_url {
        debug!(endpoint = %endpoint, "using custom S3 endpoint");
        loader = loader.endpoint_url(endpoint);
    }

    if let Some(role_arn) = &config.role_arn {
        let session_name = config.session_name.as_deref().unwrap_or("vanish-store");
        info!(role_arn = %role_arn, session_name = %session_name, "assuming IAM role via STS");

        // The assume-role provider inherits base credentials and the
        // endpoint override from the first load.
        let base_config = loader.load().await;
        let provider = aws_config::sts::AssumeRoleProvider::builder(role_arn)
            .session_name(session_name)
            .region(region.clone())
            .configure(&base_config)
            .build()
            .await;

        loader = aws_config::from_env()
            .region(region)
            .timeout_config(timeouts)
            .credentials_provider(provider);
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
    }

    let sdk_config = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(config.force_path_style)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}
