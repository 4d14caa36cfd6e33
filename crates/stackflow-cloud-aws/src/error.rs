//! AWS provider error types and error-code classification
//!
//! Service errors are classified by their `.code()` from
//! [`ProvideErrorMetadata`], never by matching on Debug output.

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use stackflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    /// Error reported by an AWS API, with its error code
    #[error("{code}: {message}")]
    Api { code: String, message: String },

    #[error("AWS request timed out: {0}")]
    Timeout(String),

    /// The request never got a response (DNS, connection, broken response)
    #[error("AWS endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("AWS SDK error: {0}")]
    Sdk(String),

    #[error("Unexpected AWS response: missing {0}")]
    UnexpectedResponse(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, AwsError>;

impl AwsError {
    /// Whether the API reported the resource as nonexistent
    pub fn is_not_found(&self) -> bool {
        match self {
            AwsError::Api { code, message } => classify(code, message).is_not_found(),
            _ => false,
        }
    }
}

impl<E, R> From<SdkError<E, R>> for AwsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    fn from(err: SdkError<E, R>) -> Self {
        if let Some(service) = err.as_service_error()
            && let Some(code) = service.code()
        {
            return AwsError::Api {
                code: code.to_string(),
                message: service.message().unwrap_or_default().to_string(),
            };
        }

        let detail = DisplayErrorContext(&err).to_string();
        match &err {
            SdkError::TimeoutError(_) => AwsError::Timeout(detail),
            SdkError::DispatchFailure(failure) if failure.is_timeout() => AwsError::Timeout(detail),
            SdkError::DispatchFailure(failure) if failure.is_io() => AwsError::Unreachable(detail),
            SdkError::ResponseError(_) => AwsError::Unreachable(detail),
            _ => AwsError::Sdk(detail),
        }
    }
}

/// Error codes for rate limiting
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "RequestThrottled",
    "SlowDown",
];

/// Elastic Load Balancing "not found" codes; EC2 uses the `*.NotFound` suffix
const NOT_FOUND_CODES: &[&str] = &[
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
    "ListenerNotFound",
    "RuleNotFound",
    "NoSuchEntity",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "AlreadyExists",
    "AlreadyExistsFault",
    "DuplicateLoadBalancerName",
    "DuplicateTargetGroupName",
    "DuplicateListener",
    "PriorityInUse",
    "RouteAlreadyExists",
    "Resource.AlreadyAssociated",
];

/// Resource is still in use; usually clears once dependents finish deleting
const DEPENDENCY_CODES: &[&str] = &["DependencyViolation", "ResourceInUse"];

const AUTH_CODES: &[&str] = &[
    "AuthFailure",
    "UnauthorizedOperation",
    "InvalidClientTokenId",
    "ExpiredToken",
    "AccessDenied",
    "AccessDeniedException",
    "UnrecognizedClientException",
];

const UNAVAILABLE_CODES: &[&str] = &[
    "InternalError",
    "InternalFailure",
    "ServiceUnavailable",
    "Unavailable",
];

const TIMEOUT_CODES: &[&str] = &["RequestTimeout", "RequestTimeoutException"];

/// Maps an AWS error code to the engine's error classification
pub fn classify(code: &str, message: &str) -> CloudError {
    let detail = format!("{}: {}", code, message);

    if THROTTLING_CODES.contains(&code) {
        CloudError::Throttled(detail)
    } else if code.ends_with(".NotFound")
        || NOT_FOUND_CODES.contains(&code)
        // Auto Scaling reports unknown groups as a validation error
        || (code == "ValidationError" && message.contains("not found"))
    {
        CloudError::NotFound(detail)
    } else if code.ends_with(".Duplicate") || ALREADY_EXISTS_CODES.contains(&code) {
        CloudError::Conflict(detail)
    } else if DEPENDENCY_CODES.contains(&code) {
        CloudError::Unavailable(detail)
    } else if AUTH_CODES.contains(&code) {
        CloudError::AuthenticationFailed(detail)
    } else if UNAVAILABLE_CODES.contains(&code) {
        CloudError::Unavailable(detail)
    } else if TIMEOUT_CODES.contains(&code) {
        CloudError::Timeout(detail)
    } else if code.ends_with("LimitExceeded") || code.starts_with("TooMany") {
        CloudError::QuotaExceeded(detail)
    } else {
        CloudError::Rejected(detail)
    }
}

impl From<AwsError> for CloudError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::Api { code, message } => classify(&code, &message),
            AwsError::Timeout(detail) => CloudError::Timeout(detail),
            AwsError::Unreachable(detail) => CloudError::Unavailable(detail),
            AwsError::MissingParameter(_) | AwsError::InvalidParameter(_) => {
                CloudError::InvalidConfig(err.to_string())
            }
            AwsError::Sdk(_) | AwsError::UnexpectedResponse(_) => {
                CloudError::CommandFailed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::error::ErrorMetadata;
    use aws_sdk_ec2::operation::create_vpc::CreateVpcError;

    fn service_error(code: &str, message: &str) -> SdkError<CreateVpcError, ()> {
        SdkError::service_error(
            CreateVpcError::generic(ErrorMetadata::builder().code(code).message(message).build()),
            (),
        )
    }

    #[test]
    fn test_throttling_is_transient() {
        for code in THROTTLING_CODES {
            let err = classify(code, "Rate exceeded");
            assert!(matches!(err, CloudError::Throttled(_)), "{code}");
            assert!(err.is_transient());
        }
    }

    #[test]
    fn test_not_found_codes() {
        for code in NOT_FOUND_CODES {
            assert!(classify(code, "gone").is_not_found(), "{code}");
        }
        assert!(classify("InvalidVpcID.NotFound", "The vpc ID 'vpc-1' does not exist").is_not_found());
        assert!(classify("ValidationError", "AutoScalingGroup name not found - web").is_not_found());
        assert!(!classify("ValidationError", "Max bound must be >= min").is_not_found());
    }

    #[test]
    fn test_permanent_codes() {
        for code in ALREADY_EXISTS_CODES {
            assert!(matches!(classify(code, "exists"), CloudError::Conflict(_)), "{code}");
        }
        assert!(matches!(
            classify("InvalidGroup.Duplicate", "exists"),
            CloudError::Conflict(_)
        ));
        assert!(matches!(
            classify("VpcLimitExceeded", "maximum number of VPCs"),
            CloudError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify("TooManyLoadBalancers", "limit"),
            CloudError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify("UnauthorizedOperation", "not authorized"),
            CloudError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            classify("InvalidSubnet.Conflict", "overlaps"),
            CloudError::Rejected(_)
        ));
    }

    #[test]
    fn test_dependency_violation_is_retried() {
        for code in DEPENDENCY_CODES {
            assert!(classify(code, "has dependencies").is_transient(), "{code}");
        }
    }

    #[test]
    fn test_service_error_uses_error_code() {
        let err = AwsError::from(service_error("RequestLimitExceeded", "Request limit exceeded."));
        assert!(matches!(&err, AwsError::Api { code, .. } if code == "RequestLimitExceeded"));
        assert!(CloudError::from(err).is_transient());

        let err = AwsError::from(service_error("InvalidVpcID.NotFound", "no such vpc"));
        assert!(err.is_not_found());

        let cloud = CloudError::from(AwsError::from(service_error(
            "VpcLimitExceeded",
            "The maximum number of VPCs has been reached.",
        )));
        assert!(matches!(cloud, CloudError::QuotaExceeded(_)));
        assert!(!cloud.is_transient());
    }

    #[test]
    fn test_transport_errors_are_transient() {
        let err = AwsError::from(SdkError::<CreateVpcError, ()>::timeout_error("deadline"));
        assert!(matches!(err, AwsError::Timeout(_)));
        assert!(CloudError::from(err).is_transient());

        let cloud = CloudError::from(AwsError::Unreachable("dns error".into()));
        assert!(cloud.is_transient());
    }

    #[test]
    fn test_local_failures_are_permanent() {
        let err = AwsError::from(SdkError::<CreateVpcError, ()>::construction_failure(
            "missing field",
        ));
        assert!(matches!(err, AwsError::Sdk(_)));
        assert!(!CloudError::from(err).is_transient());

        let cloud = CloudError::from(AwsError::MissingParameter("s.network".into()));
        assert!(matches!(cloud, CloudError::InvalidConfig(_)));
    }
}
