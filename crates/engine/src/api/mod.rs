//! External market data clients

pub mod market_context;

pub use market_context::MarketContextClient;
