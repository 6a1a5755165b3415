pub mod backend;
pub mod deck;

pub use backend::{TestBackend, TestTable};
pub use deck::TestDeck;
