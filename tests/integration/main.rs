//! Integration tests: full market-making sessions against an in-memory
//! exchange.

mod mock_exchange;
mod scenarios;
