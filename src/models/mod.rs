pub mod api_error;
pub mod cmc_cache;
pub mod futures_pair;
pub mod market_data;
pub mod token;

pub use api_error::*;
pub use cmc_cache::*;
pub use futures_pair::*;
pub use market_data::*;
pub use token::*;
