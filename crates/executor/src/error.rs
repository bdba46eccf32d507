use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("Insufficient {asset} balance. Required: {required}, Available: {available}")]
    InsufficientBalance {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("Order book unavailable for {0}")]
    OrderBookUnavailable(String),

    #[error("No price available for {0}")]
    MissingPrice(String),

    #[error("Invalid reference price {price} for {asset}")]
    InvalidReferencePrice { asset: String, price: Decimal },

    #[error("Not enough liquidity in the {0} book to fill the order")]
    InsufficientLiquidity(String),
}
