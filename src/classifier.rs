//! Client for the external health prediction service.
//!
//! The service takes the four vitals of a reading and answers with a binary
//! label plus the model's confidence:
//!
//! ```json
//! { "prediction": 1, "probability": 0.93, "status": "healthy" }
//! ```
//!
//! Only a `status` of `"healthy"` counts as healthy; any other label is
//! treated as at risk. A classifier that cannot be reached, times out, or
//! answers with an error never blocks a reading from being recorded: the
//! configured [`FallbackPolicy`] decides the label instead.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::model::Vitals;

/// Default base URL of the prediction service.
pub const DEFAULT_CLASSIFIER_URL: &str = "http://localhost:5000";

/// Failures talking to the prediction service.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("prediction service returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid prediction response: {0}")]
    InvalidResponse(String),
}

/// The label the classifier assigned to one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub healthy: bool,
    /// Confidence in `[0, 1]`, when the service reported one.
    pub probability: Option<f64>,
}

/// Something that can label a set of vitals.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, vitals: &Vitals) -> Result<Classification, ClassifierError>;
}

/// What to record when the classifier is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    #[default]
    Healthy,
    AtRisk,
}

impl FallbackPolicy {
    pub fn classification(&self) -> Classification {
        Classification {
            healthy: matches!(self, FallbackPolicy::Healthy),
            probability: None,
        }
    }
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthy" => Ok(FallbackPolicy::Healthy),
            "at_risk" | "at-risk" => Ok(FallbackPolicy::AtRisk),
            other => Err(format!(
                "unknown fallback policy '{other}' (expected 'healthy' or 'at_risk')"
            )),
        }
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FallbackPolicy::Healthy => "healthy",
            FallbackPolicy::AtRisk => "at_risk",
        })
    }
}

/// Classify a reading, substituting the fallback label on any failure.
///
/// The returned flag is `true` when the fallback was used.
pub async fn classify_or_fallback(
    classifier: &dyn Classifier,
    vitals: &Vitals,
    fallback: FallbackPolicy,
) -> (Classification, bool) {
    match classifier.classify(vitals).await {
        Ok(classification) => (classification, false),
        Err(e) => {
            warn!(error = %e, fallback = %fallback, "Classifier unavailable, using fallback");
            (fallback.classification(), true)
        }
    }
}

/// Wire format of a prediction response.
#[derive(Debug, Deserialize)]
struct PredictionResponse {
    status: String,
    probability: Option<f64>,
}

/// Client for the HTTP prediction service.
#[derive(Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClassifier {
    /// Create a client with a custom base URL and request timeout.
    pub fn with_base_url(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, vitals: &Vitals) -> Result<Classification, ClassifierError> {
        let url = format!("{}/predict", self.base_url);

        let response = self.client.post(&url).json(vitals).send().await?;
        if !response.status().is_success() {
            return Err(ClassifierError::Status(response.status()));
        }

        let data = response.json::<PredictionResponse>().await?;
        parse_prediction(data)
    }
}

fn parse_prediction(data: PredictionResponse) -> Result<Classification, ClassifierError> {
    let probability = match data.probability {
        Some(p) if p.is_finite() => Some(p.clamp(0.0, 1.0)),
        Some(p) => {
            return Err(ClassifierError::InvalidResponse(format!(
                "probability {p} is not a finite number"
            )));
        }
        None => None,
    };

    Ok(Classification {
        healthy: data.status.trim().eq_ignore_ascii_case("healthy"),
        probability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl Classifier for Unreachable {
        async fn classify(&self, _vitals: &Vitals) -> Result<Classification, ClassifierError> {
            Err(ClassifierError::InvalidResponse("offline".to_string()))
        }
    }

    fn vitals() -> Vitals {
        Vitals {
            body_temperature: 38.5,
            heart_rate: 70.0,
            sleeping_duration: 8.0,
            lying_down_duration: 6.0,
        }
    }

    #[test]
    fn test_parse_prediction_labels() {
        let healthy = parse_prediction(PredictionResponse {
            status: "healthy".to_string(),
            probability: Some(0.8),
        })
        .unwrap();
        assert!(healthy.healthy);
        assert_eq!(healthy.probability, Some(0.8));

        for label in ["at risk", "at_risk", "unknown"] {
            let parsed = parse_prediction(PredictionResponse {
                status: label.to_string(),
                probability: None,
            })
            .unwrap();
            assert!(!parsed.healthy, "{label} should not be healthy");
        }
    }

    #[test]
    fn test_parse_prediction_clamps_probability() {
        let parsed = parse_prediction(PredictionResponse {
            status: "Healthy".to_string(),
            probability: Some(1.5),
        })
        .unwrap();
        assert!(parsed.healthy);
        assert_eq!(parsed.probability, Some(1.0));
    }

    #[test]
    fn test_fallback_policy_from_str() {
        assert_eq!("healthy".parse(), Ok(FallbackPolicy::Healthy));
        assert_eq!(" AT_RISK ".parse(), Ok(FallbackPolicy::AtRisk));
        assert!("unknown".parse::<FallbackPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_classify_or_fallback_fails_open() {
        let (result, used_fallback) =
            classify_or_fallback(&Unreachable, &vitals(), FallbackPolicy::Healthy).await;
        assert!(used_fallback);
        assert!(result.healthy);
        assert_eq!(result.probability, None);

        let (result, _) =
            classify_or_fallback(&Unreachable, &vitals(), FallbackPolicy::AtRisk).await;
        assert!(!result.healthy);
    }
}
