pub mod connection;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod repository;
pub mod schema;

pub use connection::*;
pub use memory::InMemoryMarketRepository;
pub use migrations::*;
pub use postgres::PgMarketRepository;
pub use repository::MarketRepository;
