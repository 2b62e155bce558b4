//! Error types for memcload using snafu.
//!
//! Per-record and per-batch failures ([`ParseFailure`], [`UnknownShard`],
//! [`StoreError`]) are recovered locally by counting them. [`ReaderError`]
//! aborts a single file and [`LoaderError`] aborts the whole run.

use snafu::prelude::*;

// ============ Record Errors ============

/// Reasons a raw input line cannot become a record.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ParseFailure {
    /// The line has fewer than five tab-separated fields.
    #[snafu(display("Expected 5 tab-separated fields, found {found}"))]
    TooFewFields { found: usize },

    /// The device type field is empty.
    #[snafu(display("Device type is empty"))]
    EmptyDeviceType,

    /// The device id field is empty.
    #[snafu(display("Device id is empty"))]
    EmptyDeviceId,

    /// The store key would contain whitespace or control characters, or be too long.
    #[snafu(display("Key `{key}` cannot be stored"))]
    UnstorableKey { key: String },
}

/// A record whose device type has no configured shard.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("Unknown device type: {device_type}"))]
pub struct UnknownShard {
    pub device_type: String,
}

/// Failure to decode a stored payload.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// The bytes are not a valid `UserApps` message.
    #[snafu(display("Failed to decode UserApps payload"))]
    Decode { source: prost::DecodeError },
}

// ============ Store Errors ============

/// Errors that can occur while talking to the key-value store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Invalid store address.
    #[snafu(display("Invalid store address: {address}"))]
    InvalidAddress { address: String },

    /// Failed to connect to the store.
    #[snafu(display("Failed to connect to {address}: {source}"))]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// IO error on an established connection.
    #[snafu(display("IO error talking to {address}: {source}"))]
    StoreIo {
        address: String,
        source: std::io::Error,
    },

    /// The operation did not finish within the configured timeout.
    #[snafu(display("Operation against {address} timed out"))]
    Timeout { address: String },

    /// The server replied with something the client does not understand.
    #[snafu(display("Unexpected reply from {address}: {reply}"))]
    Protocol { address: String, reply: String },

    /// The key cannot be sent over the text protocol.
    #[snafu(display("Invalid key: {key}"))]
    InvalidKey { key: String },

    /// The server accepted the request but rejected some keys.
    #[snafu(display("{count} key(s) rejected by {address} (first: {first})"))]
    Rejected {
        address: String,
        count: usize,
        first: String,
    },

    /// The write was abandoned because the run or file was cancelled.
    #[snafu(display("Write to {address} cancelled"))]
    Cancelled { address: String },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Input pattern is empty.
    #[snafu(display("Input pattern cannot be empty"))]
    EmptyPattern,

    /// A shard has no address.
    #[snafu(display("Shard '{device_type}' has an empty address"))]
    EmptyShardAddress { device_type: String },

    /// A numeric setting that must be positive is zero.
    #[snafu(display("Setting '{name}' must be greater than zero"))]
    ZeroSetting { name: String },

    /// Error rate threshold outside of [0, 1].
    #[snafu(display("normal_err_rate must be within [0, 1], got {value}"))]
    InvalidErrorRate { value: f64 },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },
}

// ============ Reader Errors ============

/// Errors that can occur while reading an input file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// The file could not be opened.
    #[snafu(display("Failed to open {path}: {source}"))]
    FileOpen {
        path: String,
        source: std::io::Error,
    },

    /// The decompressor could not be created or rejected the first block.
    #[snafu(display("Failed to decode {path} as {codec}: {source}"))]
    Decompression {
        codec: &'static str,
        path: String,
        source: std::io::Error,
    },

    /// Reading a line failed (truncated or corrupt input).
    #[snafu(display("Failed to read line {line} of {path}: {source}"))]
    ReadLine {
        path: String,
        line: usize,
        source: std::io::Error,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Loader Error (top-level) ============

/// Top-level errors that abort the whole run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoaderError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// The input glob pattern is malformed.
    #[snafu(display("Invalid input pattern '{pattern}': {source}"))]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    /// Address parsing error.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    /// Failed to open the log file.
    #[snafu(display("Failed to open log file {path}: {source}"))]
    LogFile {
        path: String,
        source: std::io::Error,
    },

    /// The encode/decode self-check found a mismatch.
    #[snafu(display("Self-check failed: {message}"))]
    SelfCheck { message: String },
}

impl From<ConfigError> for LoaderError {
    fn from(source: ConfigError) -> Self {
        LoaderError::Config { source }
    }
}

impl StoreError {
    /// Check if this error came from a cancelled write.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled { .. })
    }
}
