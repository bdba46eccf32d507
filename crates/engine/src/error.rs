use core_types::CoreError;
use executor::ExecutorError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Order validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order book unavailable for {0}")]
    OrderBookUnavailable(String),

    #[error("Insufficient {asset} balance. Required: {required}, Available: {available}")]
    InsufficientBalance {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("Not enough liquidity in the {0} book to fill the order")]
    InsufficientLiquidity(String),

    #[error("Order state error: {0}")]
    OrderState(#[from] CoreError),

    #[error("Executor error: {0}")]
    Executor(ExecutorError),

    #[error("Risk management error: {0}")]
    Risk(#[from] risk::RiskError),
}

impl From<ExecutorError> for EngineError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::InsufficientBalance {
                asset,
                required,
                available,
            } => EngineError::InsufficientBalance {
                asset,
                required,
                available,
            },
            ExecutorError::OrderBookUnavailable(asset) => EngineError::OrderBookUnavailable(asset),
            ExecutorError::InsufficientLiquidity(asset) => EngineError::InsufficientLiquidity(asset),
            other => EngineError::Executor(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_joined() {
        let err = EngineError::Validation(vec![
            "Amount must be greater than 0".to_string(),
            "Unsupported asset: DOGE".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Order validation failed: Amount must be greater than 0; Unsupported asset: DOGE"
        );
    }

    #[test]
    fn executor_balance_errors_surface_directly() {
        let err: EngineError = ExecutorError::OrderBookUnavailable("SOL".to_string()).into();
        assert_eq!(err, EngineError::OrderBookUnavailable("SOL".to_string()));
    }
}
