use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid header format: '{value}'. Expected 'Key: Value'")]
    InvalidHeaderFormat { value: String },
    #[error("Duration must not be empty.")]
    DurationEmpty,
    #[error("Invalid duration '{value}'.")]
    InvalidDurationFormat { value: String },
    #[error("Invalid duration '{value}': {source}")]
    InvalidDurationNumber {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Duration overflow.")]
    DurationOverflow,
    #[error("Invalid duration unit '{unit}'.")]
    InvalidDurationUnit { unit: String },
    #[error("Duration must be > 0.")]
    DurationZero,
    #[error("Invalid percentage '{value}'. Expected e.g. 5%, 0.5% or 12.25%.")]
    InvalidPercent { value: String },
    #[error("Percentage '{value}' must be between 0% and 100%.")]
    PercentOutOfRange { value: String },
    #[error("Value must be >= {min}.")]
    ValueTooSmall { min: u64 },
    #[error("Invalid value: {source}")]
    InvalidNumber {
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Rate must be > 0.")]
    RateZero,
    #[error("Rate period must be > 0.")]
    RatePeriodZero,
    #[error("Burst capacity must be >= 1.")]
    BurstZero,
    #[error("max_concurrency must be >= 1.")]
    MaxLevelZero,
    #[error("initial level must be >= 1.")]
    InitialLevelZero,
    #[error("initial level {initial} exceeds max level {max}.")]
    InitialAboveMax { initial: u64, max: u64 },
    #[error("Linear ramp step must be >= 1.")]
    LinearStepZero,
    #[error("Trial batch size must be >= 1 task per worker.")]
    TrialBatchZero,
    #[error("Retry policy needs max_attempts >= 1.")]
    RetryAttemptsZero,
    #[error("Retry backoff multiplier must be >= 1.")]
    RetryMultiplierZero,
    #[error("Missing target (set --url or provide a scenario in config).")]
    MissingTarget,
    #[error("Request mix must include at least one request.")]
    EmptyRequestMix,
    #[error("Request mix needs at least one request with weight >= 1.")]
    RequestMixWeightZero,
    #[error("Request mix weights overflow.")]
    RequestMixWeightOverflow,
    #[error("Scenario must include at least one step.")]
    ScenarioMissingSteps,
    #[error("Failed to build runtime: {source}")]
    RuntimeBuildFailed {
        #[source]
        source: std::io::Error,
    },
}
