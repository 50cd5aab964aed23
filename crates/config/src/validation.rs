use crate::{ConfigError, ConfigResult};

pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// 通用校验工具
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{field_name} 不能为空")));
        }
        Ok(())
    }

    pub fn validate_timeout_seconds(timeout_seconds: u64, field_name: &str) -> ConfigResult<()> {
        if timeout_seconds == 0 {
            return Err(ConfigError::Validation(format!("{field_name} 必须大于0")));
        }
        if timeout_seconds > 86_400 {
            return Err(ConfigError::Validation(format!(
                "{field_name} 不能超过86400秒"
            )));
        }
        Ok(())
    }

    pub fn validate_count(count: usize, field_name: &str, max: usize) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::Validation(format!("{field_name} 必须大于0")));
        }
        if count > max {
            return Err(ConfigError::Validation(format!(
                "{field_name} 不能超过 {max}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_utils() {
        assert!(ValidationUtils::validate_not_empty("x", "f").is_ok());
        assert!(ValidationUtils::validate_not_empty("  ", "f").is_err());
        assert!(ValidationUtils::validate_timeout_seconds(0, "t").is_err());
        assert!(ValidationUtils::validate_timeout_seconds(90_000, "t").is_err());
        assert!(ValidationUtils::validate_count(5, "c", 10).is_ok());
        assert!(ValidationUtils::validate_count(11, "c", 10).is_err());
    }
}
