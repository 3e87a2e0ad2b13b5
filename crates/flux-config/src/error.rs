use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Value out of range: {field} = {value}, expected {expected}")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid value: {field} = {value}, reason: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub(crate) fn check_range_f32(field: &'static str, value: f32, min: f32, max: f32, expected: &'static str) -> Result<()> {
    // NaN 与任何值比较都为 false，必须单独拒绝
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        });
    }
    Ok(())
}

pub(crate) fn check_range_u64(field: &'static str, value: u64, min: u64, max: u64, expected: &'static str) -> Result<()> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        });
    }
    Ok(())
}
